//! Helper functions for instruction execution.

#![allow(clippy::cast_lossless, clippy::cast_possible_wrap, clippy::cast_sign_loss)]

use crate::decoder::ShiftType;
use crate::state::{ArchState, CoreRegister, CPSR_C, CPSR_N, CPSR_V, CPSR_Z};

/// Reads a register as an operand. `pc` reads as the current instruction
/// address plus eight.
#[must_use]
pub const fn read_operand(state: &ArchState, reg: CoreRegister) -> u32 {
    match reg {
        CoreRegister::Pc => state.pc().wrapping_add(8),
        _ => state.reg(reg),
    }
}

/// Evaluates a condition field against the current flags.
#[must_use]
pub const fn condition_passed(cond: u8, cpsr: u32) -> bool {
    let n = cpsr & CPSR_N != 0;
    let z = cpsr & CPSR_Z != 0;
    let c = cpsr & CPSR_C != 0;
    let v = cpsr & CPSR_V != 0;

    let base = match cond >> 1 {
        0 => z,
        1 => c,
        2 => n,
        3 => v,
        4 => c && !z,
        5 => n == v,
        6 => !z && n == v,
        _ => true,
    };

    // Odd codes invert their even partner. 0b1111 is not a condition.
    if cond & 1 == 1 && cond != 0xF {
        !base
    } else {
        base
    }
}

/// Applies an immediate shift, returning the result and shifter carry-out.
///
/// An amount of zero encodes `LSL #0` (no shift), `LSR #32`, `ASR #32` and
/// `RRX` respectively.
#[must_use]
pub const fn shift_imm(value: u32, shift: ShiftType, amount: u8, carry_in: bool) -> (u32, bool) {
    let amount = amount as u32 & 0x1F;
    match shift {
        ShiftType::Lsl => {
            if amount == 0 {
                (value, carry_in)
            } else {
                (value << amount, (value >> (32 - amount)) & 1 != 0)
            }
        }
        ShiftType::Lsr => {
            if amount == 0 {
                (0, value >> 31 != 0)
            } else {
                (value >> amount, (value >> (amount - 1)) & 1 != 0)
            }
        }
        ShiftType::Asr => {
            if amount == 0 {
                let fill = ((value as i32) >> 31) as u32;
                (fill, fill != 0)
            } else {
                (
                    ((value as i32) >> amount) as u32,
                    (value >> (amount - 1)) & 1 != 0,
                )
            }
        }
        ShiftType::Ror => {
            if amount == 0 {
                ((value >> 1) | ((carry_in as u32) << 31), value & 1 != 0)
            } else {
                (value.rotate_right(amount), (value >> (amount - 1)) & 1 != 0)
            }
        }
    }
}

/// Selects the `CPSR` bits written by an `MSR` field mask.
#[must_use]
pub const fn msr_byte_mask(mask: u8) -> u32 {
    let mut bytes = 0;
    let mut field = 0;
    while field < 4 {
        if mask & (1 << field) != 0 {
            bytes |= 0xFF << (field * 8);
        }
        field += 1;
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::{condition_passed, msr_byte_mask, read_operand, shift_imm};
    use crate::decoder::ShiftType;
    use crate::state::{ArchState, CoreRegister, CPSR_C, CPSR_N, CPSR_V, CPSR_Z};
    use rstest::rstest;

    #[rstest]
    #[case::eq_taken(0x0, CPSR_Z, true)]
    #[case::ne_not_taken(0x1, CPSR_Z, false)]
    #[case::cs(0x2, CPSR_C, true)]
    #[case::cc(0x3, CPSR_C, false)]
    #[case::mi(0x4, CPSR_N, true)]
    #[case::vs(0x6, CPSR_V, true)]
    #[case::hi(0x8, CPSR_C, true)]
    #[case::ls(0x9, CPSR_C | CPSR_Z, true)]
    #[case::ge(0xA, CPSR_N | CPSR_V, true)]
    #[case::lt(0xB, CPSR_N, true)]
    #[case::gt(0xC, 0, true)]
    #[case::le(0xD, CPSR_Z, true)]
    #[case::al(0xE, 0, true)]
    fn conditions_follow_flags(#[case] cond: u8, #[case] cpsr: u32, #[case] expected: bool) {
        assert_eq!(condition_passed(cond, cpsr), expected);
    }

    #[test]
    fn zero_shift_amounts_use_special_forms() {
        assert_eq!(shift_imm(0x8000_0001, ShiftType::Lsl, 0, true), (0x8000_0001, true));
        assert_eq!(shift_imm(0x8000_0001, ShiftType::Lsr, 0, false), (0, true));
        assert_eq!(
            shift_imm(0x8000_0000, ShiftType::Asr, 0, false),
            (u32::MAX, true)
        );
        assert_eq!(
            shift_imm(0x0000_0003, ShiftType::Ror, 0, true),
            (0x8000_0001, true)
        );
    }

    #[test]
    fn shifts_report_last_bit_out() {
        assert_eq!(shift_imm(0x4000_0001, ShiftType::Lsl, 2, false), (4, true));
        assert_eq!(shift_imm(0x0000_0006, ShiftType::Lsr, 2, false), (1, true));
        assert_eq!(
            shift_imm(0x8000_0000, ShiftType::Asr, 4, false),
            (0xF800_0000, false)
        );
        assert_eq!(
            shift_imm(0x0000_00F1, ShiftType::Ror, 4, false),
            (0x1000_000F, false)
        );
    }

    #[test]
    fn pc_reads_eight_ahead() {
        let mut state = ArchState::default();
        state.set_pc(0x1_0000);
        state.set_reg(CoreRegister::R1, 7);
        assert_eq!(read_operand(&state, CoreRegister::Pc), 0x1_0008);
        assert_eq!(read_operand(&state, CoreRegister::R1), 7);
    }

    #[test]
    fn msr_masks_select_whole_bytes() {
        assert_eq!(msr_byte_mask(0b1000), 0xFF00_0000);
        assert_eq!(msr_byte_mask(0b1100), 0xFFFF_0000);
        assert_eq!(msr_byte_mask(0b0001), 0x0000_00FF);
    }
}
