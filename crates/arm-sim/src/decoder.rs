//! A32 instruction decoder for the supported subset.
//!
//! The decoder validates an encoding and produces an [`Instruction`] value.
//! Anything outside the subset, or any form whose behavior is unpredictable
//! on the architecture, is rejected with [`FaultCode::IllegalEncoding`].

#![allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]

use crate::fault::FaultCode;
use crate::state::CoreRegister;

/// Condition field value that selects the unconditional instruction space.
pub const COND_UNCONDITIONAL_SPACE: u8 = 0xF;

/// Barrel shifter operation for immediate-shifted register operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum ShiftType {
    Lsl,
    Lsr,
    Asr,
    Ror,
}

impl ShiftType {
    /// Decodes the two-bit shift type field.
    #[must_use]
    pub const fn from_u2(bits: u32) -> Self {
        match bits & 0b11 {
            0 => Self::Lsl,
            1 => Self::Lsr,
            2 => Self::Asr,
            _ => Self::Ror,
        }
    }
}

/// Data-processing opcode field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum DataOpcode {
    And,
    Eor,
    Sub,
    Rsb,
    Add,
    Adc,
    Sbc,
    Rsc,
    Tst,
    Teq,
    Cmp,
    Cmn,
    Orr,
    Mov,
    Bic,
    Mvn,
}

impl DataOpcode {
    const ALL: [Self; 16] = [
        Self::And,
        Self::Eor,
        Self::Sub,
        Self::Rsb,
        Self::Add,
        Self::Adc,
        Self::Sbc,
        Self::Rsc,
        Self::Tst,
        Self::Teq,
        Self::Cmp,
        Self::Cmn,
        Self::Orr,
        Self::Mov,
        Self::Bic,
        Self::Mvn,
    ];

    /// Decodes the four-bit opcode field.
    #[must_use]
    pub const fn from_u4(bits: u32) -> Self {
        Self::ALL[(bits & 0xF) as usize]
    }

    /// `TST`, `TEQ`, `CMP` and `CMN` only update flags.
    #[must_use]
    pub const fn is_comparison(self) -> bool {
        matches!(self, Self::Tst | Self::Teq | Self::Cmp | Self::Cmn)
    }
}

/// Second operand of a data-processing instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShifterOperand {
    /// Rotated 8-bit immediate.
    Imm {
        /// Expanded 32-bit value.
        value: u32,
        /// Rotation amount in bits (`0..=30`, even).
        rotation: u8,
    },
    /// Register shifted by an immediate amount.
    Reg {
        /// Source register.
        rm: CoreRegister,
        /// Shift operation.
        shift: ShiftType,
        /// Raw 5-bit amount field.
        amount: u8,
    },
}

/// Offset of a single-register load or store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferOffset {
    /// 12-bit unsigned immediate.
    Imm(u16),
    /// Register shifted by an immediate amount.
    Reg {
        /// Offset register.
        rm: CoreRegister,
        /// Shift operation.
        shift: ShiftType,
        /// Raw 5-bit amount field.
        amount: u8,
    },
}

/// Source of an `MSR` write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MsrSource {
    /// Register source.
    Reg(CoreRegister),
    /// Rotated immediate source, already expanded.
    Imm(u32),
}

/// Decoded A32 instruction. Every variant carries its condition field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Instruction {
    DataProcessing {
        cond: u8,
        op: DataOpcode,
        set_flags: bool,
        rd: CoreRegister,
        rn: CoreRegister,
        operand: ShifterOperand,
    },
    /// `MOVW` (`top == false`) or `MOVT`.
    MoveWide {
        cond: u8,
        top: bool,
        rd: CoreRegister,
        imm16: u16,
    },
    SingleTransfer {
        cond: u8,
        load: bool,
        pre: bool,
        up: bool,
        writeback: bool,
        rn: CoreRegister,
        rt: CoreRegister,
        offset: TransferOffset,
    },
    BlockTransfer {
        cond: u8,
        load: bool,
        pre: bool,
        up: bool,
        writeback: bool,
        rn: CoreRegister,
        list: u16,
    },
    Mrs {
        cond: u8,
        rd: CoreRegister,
    },
    /// `mask` is the four-bit field selector (`f`, `s`, `x`, `c` from high
    /// to low).
    Msr {
        cond: u8,
        mask: u8,
        source: MsrSource,
    },
    /// `offset` is the signed byte displacement relative to `pc + 8`.
    Branch {
        cond: u8,
        link: bool,
        offset: i32,
    },
    BranchExchange {
        cond: u8,
        link: bool,
        rm: CoreRegister,
    },
}

impl Instruction {
    /// Condition field.
    #[must_use]
    pub const fn cond(&self) -> u8 {
        match *self {
            Self::DataProcessing { cond, .. }
            | Self::MoveWide { cond, .. }
            | Self::SingleTransfer { cond, .. }
            | Self::BlockTransfer { cond, .. }
            | Self::Mrs { cond, .. }
            | Self::Msr { cond, .. }
            | Self::Branch { cond, .. }
            | Self::BranchExchange { cond, .. } => cond,
        }
    }
}

/// Result of decoding one word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodedOrFault {
    /// Valid instruction.
    Instruction(Instruction),
    /// Rejected encoding.
    Fault(FaultCode),
}

impl DecodedOrFault {
    /// Decoded instruction, if any.
    #[must_use]
    pub const fn instruction(self) -> Option<Instruction> {
        match self {
            Self::Instruction(instr) => Some(instr),
            Self::Fault(_) => None,
        }
    }

    /// Fault, if decoding failed.
    #[must_use]
    pub const fn fault(self) -> Option<FaultCode> {
        match self {
            Self::Instruction(_) => None,
            Self::Fault(code) => Some(code),
        }
    }
}

impl From<DecodedOrFault> for Result<Instruction, FaultCode> {
    fn from(value: DecodedOrFault) -> Self {
        match value {
            DecodedOrFault::Instruction(instr) => Ok(instr),
            DecodedOrFault::Fault(code) => Err(code),
        }
    }
}

/// Stateless A32 decoder.
#[derive(Debug, Clone, Copy, Default)]
pub struct Decoder;

const fn reg(word: u32, lsb: u32) -> CoreRegister {
    CoreRegister::ALL[((word >> lsb) & 0xF) as usize]
}

const fn bit(word: u32, n: u32) -> bool {
    (word >> n) & 1 != 0
}

/// Expands a 12-bit rotated immediate field.
#[must_use]
pub const fn expand_imm12(field: u32) -> (u32, u8) {
    let rotation = ((field >> 8) & 0xF) * 2;
    ((field & 0xFF).rotate_right(rotation), rotation as u8)
}

const fn illegal() -> DecodedOrFault {
    DecodedOrFault::Fault(FaultCode::IllegalEncoding)
}

impl Decoder {
    /// Decodes a single instruction word.
    #[must_use]
    pub const fn decode(word: u32) -> DecodedOrFault {
        let cond = (word >> 28) as u8;
        if cond == COND_UNCONDITIONAL_SPACE {
            return illegal();
        }

        match (word >> 25) & 0b111 {
            0b000 => Self::decode_misc_or_register(word, cond),
            0b001 => Self::decode_immediate(word, cond),
            0b010 => Self::decode_single_transfer(word, cond, false),
            0b011 => {
                // Bit 4 set selects the media instruction space.
                if bit(word, 4) {
                    illegal()
                } else {
                    Self::decode_single_transfer(word, cond, true)
                }
            }
            0b100 => Self::decode_block_transfer(word, cond),
            0b101 => DecodedOrFault::Instruction(Instruction::Branch {
                cond,
                link: bit(word, 24),
                offset: ((word << 8) as i32 >> 8) << 2,
            }),
            _ => illegal(),
        }
    }

    const fn decode_misc_or_register(word: u32, cond: u8) -> DecodedOrFault {
        match word & 0x0FFF_FFF0 {
            0x012F_FF10 | 0x012F_FF30 => {
                let rm = reg(word, 0);
                let link = bit(word, 5);
                if link && matches!(rm, CoreRegister::Pc) {
                    return illegal();
                }
                return DecodedOrFault::Instruction(Instruction::BranchExchange { cond, link, rm });
            }
            _ => {}
        }

        if word & 0x0FBF_0FFF == 0x010F_0000 {
            let rd = reg(word, 12);
            if bit(word, 22) || matches!(rd, CoreRegister::Pc) {
                return illegal();
            }
            return DecodedOrFault::Instruction(Instruction::Mrs { cond, rd });
        }

        if word & 0x0FB0_FFF0 == 0x0120_F000 {
            let mask = ((word >> 16) & 0xF) as u8;
            let rm = reg(word, 0);
            if bit(word, 22) || mask == 0 || matches!(rm, CoreRegister::Pc) {
                return illegal();
            }
            return DecodedOrFault::Instruction(Instruction::Msr {
                cond,
                mask,
                source: MsrSource::Reg(rm),
            });
        }

        // Register-shifted registers, multiplies and extra load/stores.
        if bit(word, 4) {
            return illegal();
        }

        let operand = ShifterOperand::Reg {
            rm: reg(word, 0),
            shift: ShiftType::from_u2(word >> 5),
            amount: ((word >> 7) & 0x1F) as u8,
        };
        Self::data_processing(word, cond, operand)
    }

    const fn decode_immediate(word: u32, cond: u8) -> DecodedOrFault {
        if word & 0x0FB0_F000 == 0x0320_F000 {
            let mask = ((word >> 16) & 0xF) as u8;
            // Mask zero is the hint space.
            if bit(word, 22) || mask == 0 {
                return illegal();
            }
            let (value, _) = expand_imm12(word & 0xFFF);
            return DecodedOrFault::Instruction(Instruction::Msr {
                cond,
                mask,
                source: MsrSource::Imm(value),
            });
        }

        match word & 0x0FF0_0000 {
            0x0300_0000 | 0x0340_0000 => {
                let rd = reg(word, 12);
                if matches!(rd, CoreRegister::Pc) {
                    return illegal();
                }
                return DecodedOrFault::Instruction(Instruction::MoveWide {
                    cond,
                    top: bit(word, 22),
                    rd,
                    imm16: (((word >> 4) & 0xF000) | (word & 0x0FFF)) as u16,
                });
            }
            _ => {}
        }

        let (value, rotation) = expand_imm12(word & 0xFFF);
        Self::data_processing(word, cond, ShifterOperand::Imm { value, rotation })
    }

    const fn data_processing(word: u32, cond: u8, operand: ShifterOperand) -> DecodedOrFault {
        let op = DataOpcode::from_u4(word >> 21);
        let set_flags = bit(word, 20);
        let rd = reg(word, 12);

        // Comparisons without S live in the miscellaneous space.
        if op.is_comparison() && !set_flags {
            return illegal();
        }
        // S with rd == pc is an exception return.
        if set_flags && !op.is_comparison() && matches!(rd, CoreRegister::Pc) {
            return illegal();
        }

        DecodedOrFault::Instruction(Instruction::DataProcessing {
            cond,
            op,
            set_flags,
            rd,
            rn: reg(word, 16),
            operand,
        })
    }

    const fn decode_single_transfer(word: u32, cond: u8, register: bool) -> DecodedOrFault {
        let pre = bit(word, 24);
        let writeback_bit = bit(word, 21);
        // Byte accesses and unprivileged (`T`) forms.
        if bit(word, 22) || (!pre && writeback_bit) {
            return illegal();
        }

        let load = bit(word, 20);
        let rn = reg(word, 16);
        let rt = reg(word, 12);
        let writeback = !pre || writeback_bit;
        if writeback && (matches!(rn, CoreRegister::Pc) || rn as u8 == rt as u8) {
            return illegal();
        }
        if !load && matches!(rt, CoreRegister::Pc) {
            return illegal();
        }

        let offset = if register {
            let rm = reg(word, 0);
            if matches!(rm, CoreRegister::Pc) {
                return illegal();
            }
            TransferOffset::Reg {
                rm,
                shift: ShiftType::from_u2(word >> 5),
                amount: ((word >> 7) & 0x1F) as u8,
            }
        } else {
            TransferOffset::Imm((word & 0xFFF) as u16)
        };

        DecodedOrFault::Instruction(Instruction::SingleTransfer {
            cond,
            load,
            pre,
            up: bit(word, 23),
            writeback,
            rn,
            rt,
            offset,
        })
    }

    const fn decode_block_transfer(word: u32, cond: u8) -> DecodedOrFault {
        let list = (word & 0xFFFF) as u16;
        let rn = reg(word, 16);
        let writeback = bit(word, 21);
        let load = bit(word, 20);

        // User-bank and exception-return forms.
        if bit(word, 22) || list == 0 || matches!(rn, CoreRegister::Pc) {
            return illegal();
        }
        if writeback && list & (1 << (rn as u16)) != 0 {
            return illegal();
        }
        if !load && list & (1 << 15) != 0 {
            return illegal();
        }

        DecodedOrFault::Instruction(Instruction::BlockTransfer {
            cond,
            load,
            pre: bit(word, 24),
            up: bit(word, 23),
            writeback,
            rn,
            list,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::{
        DataOpcode, DecodedOrFault, Decoder, Instruction, MsrSource, ShiftType, ShifterOperand,
        TransferOffset,
    };
    use crate::fault::FaultCode;
    use crate::state::CoreRegister;
    use proptest::prelude::*;
    use rstest::rstest;

    fn decode(word: u32) -> Instruction {
        Decoder::decode(word)
            .instruction()
            .unwrap_or_else(|| panic!("{word:#010x} should decode"))
    }

    #[test]
    fn push_and_pop_decode_as_block_transfers() {
        assert_eq!(
            decode(0xE92D_4007),
            Instruction::BlockTransfer {
                cond: 0xE,
                load: false,
                pre: true,
                up: false,
                writeback: true,
                rn: CoreRegister::Sp,
                list: 0x4007,
            }
        );
        assert_eq!(
            decode(0xE8BD_4007),
            Instruction::BlockTransfer {
                cond: 0xE,
                load: true,
                pre: false,
                up: true,
                writeback: true,
                rn: CoreRegister::Sp,
                list: 0x4007,
            }
        );
    }

    #[test]
    fn status_register_transfers_decode() {
        assert_eq!(
            decode(0xE10F_4000),
            Instruction::Mrs {
                cond: 0xE,
                rd: CoreRegister::R4
            }
        );
        assert_eq!(
            decode(0xE12C_F004),
            Instruction::Msr {
                cond: 0xE,
                mask: 0b1100,
                source: MsrSource::Reg(CoreRegister::R4),
            }
        );
        assert_eq!(
            decode(0xE328_F20F),
            Instruction::Msr {
                cond: 0xE,
                mask: 0b1000,
                source: MsrSource::Imm(0xF000_0000),
            }
        );
    }

    #[test]
    fn branches_decode_with_byte_offsets() {
        assert_eq!(
            decode(0xEAFF_FFFE),
            Instruction::Branch {
                cond: 0xE,
                link: false,
                offset: -8
            }
        );
        assert_eq!(
            decode(0xEB00_0001),
            Instruction::Branch {
                cond: 0xE,
                link: true,
                offset: 4
            }
        );
        assert_eq!(
            decode(0xE12F_FF3C),
            Instruction::BranchExchange {
                cond: 0xE,
                link: true,
                rm: CoreRegister::R12
            }
        );
        assert_eq!(
            decode(0xE12F_FF1E),
            Instruction::BranchExchange {
                cond: 0xE,
                link: false,
                rm: CoreRegister::Lr
            }
        );
    }

    #[test]
    fn move_wide_and_data_processing_decode() {
        assert_eq!(
            decode(0xE305_C678),
            Instruction::MoveWide {
                cond: 0xE,
                top: false,
                rd: CoreRegister::R12,
                imm16: 0x5678
            }
        );
        assert_eq!(
            decode(0xE341_C234),
            Instruction::MoveWide {
                cond: 0xE,
                top: true,
                rd: CoreRegister::R12,
                imm16: 0x1234
            }
        );
        assert_eq!(
            decode(0xE1A0_0000),
            Instruction::DataProcessing {
                cond: 0xE,
                op: DataOpcode::Mov,
                set_flags: false,
                rd: CoreRegister::R0,
                rn: CoreRegister::R0,
                operand: ShifterOperand::Reg {
                    rm: CoreRegister::R0,
                    shift: ShiftType::Lsl,
                    amount: 0
                },
            }
        );
        assert_eq!(
            decode(0xE28D_B010),
            Instruction::DataProcessing {
                cond: 0xE,
                op: DataOpcode::Add,
                set_flags: false,
                rd: CoreRegister::R11,
                rn: CoreRegister::Sp,
                operand: ShifterOperand::Imm {
                    value: 16,
                    rotation: 0
                },
            }
        );
    }

    #[test]
    fn loads_decode_with_index_modes() {
        assert_eq!(
            decode(0xE59B_300C),
            Instruction::SingleTransfer {
                cond: 0xE,
                load: true,
                pre: true,
                up: true,
                writeback: false,
                rn: CoreRegister::R11,
                rt: CoreRegister::R3,
                offset: TransferOffset::Imm(12),
            }
        );
        assert_eq!(
            decode(0xE490_1004),
            Instruction::SingleTransfer {
                cond: 0xE,
                load: true,
                pre: false,
                up: true,
                writeback: true,
                rn: CoreRegister::R0,
                rt: CoreRegister::R1,
                offset: TransferOffset::Imm(4),
            }
        );
        assert_eq!(
            decode(0xE790_1102),
            Instruction::SingleTransfer {
                cond: 0xE,
                load: true,
                pre: true,
                up: true,
                writeback: false,
                rn: CoreRegister::R0,
                rt: CoreRegister::R1,
                offset: TransferOffset::Reg {
                    rm: CoreRegister::R2,
                    shift: ShiftType::Lsl,
                    amount: 2
                },
            }
        );
    }

    #[rstest]
    #[case::unconditional_space(0xF57F_F04F)]
    #[case::byte_load(0xE5DB_300C)]
    #[case::unprivileged_load(0xE4B0_1004)]
    #[case::writeback_base_is_rt(0xE5B1_1004)]
    #[case::media_space(0xE600_0010)]
    #[case::coprocessor(0xEE00_0000)]
    #[case::empty_register_list(0xE8BD_0000)]
    #[case::user_bank_ldm(0xE8DD_4007)]
    #[case::spsr_read(0xE14F_0000)]
    #[case::empty_msr_mask(0xE120_F004)]
    #[case::hint_space(0xE320_F000)]
    #[case::multiply(0xE000_0091)]
    #[case::register_shifted_register(0xE1A0_0110)]
    #[case::compare_without_s(0xE140_0000)]
    #[case::exception_return(0xE1B0_F00E)]
    #[case::store_pc_in_list(0xE92D_8000)]
    #[case::blx_pc(0xE12F_FF3F)]
    #[case::writeback_base_in_list(0xE8BD_2001)]
    fn unsupported_encodings_are_rejected(#[case] word: u32) {
        assert_eq!(
            Decoder::decode(word),
            DecodedOrFault::Fault(FaultCode::IllegalEncoding)
        );
    }

    #[test]
    fn decoded_or_fault_converts_into_result() {
        let ok: Result<Instruction, FaultCode> = Decoder::decode(0xE1A0_0000).into();
        assert!(ok.is_ok());
        let err: Result<Instruction, FaultCode> = Decoder::decode(0xEE00_0000).into();
        assert_eq!(err, Err(FaultCode::IllegalEncoding));
    }

    proptest! {
        #[test]
        fn decoding_is_total_and_preserves_condition(word in any::<u32>()) {
            match Decoder::decode(word) {
                DecodedOrFault::Instruction(instr) => {
                    prop_assert_eq!(u32::from(instr.cond()), word >> 28);
                    prop_assert_ne!(instr.cond(), 0xF);
                }
                DecodedOrFault::Fault(code) => prop_assert_eq!(code, FaultCode::IllegalEncoding),
            }
        }
    }
}
