//! Instruction execution pipeline.
//!
//! Execution is split in two phases so that faults are precise:
//! [`execute_instruction`] reads operands and memory and validates every
//! access, accumulating the effects in an [`ExecuteState`] without touching
//! the machine. [`commit_execution`] then applies memory writes, register
//! writes, flag updates and the new `pc` in that order. A faulting
//! instruction has no side effects.

mod flags;
mod helpers;

pub use flags::{add_with_carry, FlagsUpdate};
pub use helpers::{condition_passed, msr_byte_mask, read_operand, shift_imm};

use crate::decoder::{DataOpcode, Instruction, MsrSource, ShifterOperand, TransferOffset};
use crate::memory::{validate_word_alignment, validate_write_access, Memory};
use crate::state::{ArchState, CoreRegister, CORE_REGISTER_COUNT, CPSR_C};
use crate::FaultCode;

/// Effects accumulated while executing one instruction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecuteState {
    /// Pending register writes, indexed by register number. `pc` is never
    /// written here; see `next_pc`.
    pub reg_writes: [Option<u32>; CORE_REGISTER_COUNT],
    /// Pending word stores in program order.
    pub mem_writes: Vec<(u32, u32)>,
    /// `APSR` update to apply.
    pub flags_update: FlagsUpdate,
    /// Address of the next instruction.
    pub next_pc: u32,
}

impl ExecuteState {
    fn sequential(state: &ArchState) -> Self {
        Self {
            reg_writes: [None; CORE_REGISTER_COUNT],
            mem_writes: Vec::new(),
            flags_update: FlagsUpdate::None,
            next_pc: state.pc().wrapping_add(4),
        }
    }

    /// Queues a register write. Writes to `pc` redirect control flow.
    pub const fn write_reg(&mut self, reg: CoreRegister, value: u32) {
        match reg {
            CoreRegister::Pc => self.next_pc = value,
            _ => self.reg_writes[reg.index()] = Some(value),
        }
    }
}

/// Computes the effects of `instr` at the current `pc`.
///
/// # Errors
///
/// Returns the memory fault raised by the first illegal or unaligned access.
pub fn execute_instruction(
    instr: &Instruction,
    state: &ArchState,
    memory: &Memory,
) -> Result<ExecuteState, FaultCode> {
    let mut effects = ExecuteState::sequential(state);
    if !condition_passed(instr.cond(), state.cpsr()) {
        return Ok(effects);
    }

    match *instr {
        Instruction::DataProcessing {
            op,
            set_flags,
            rd,
            rn,
            operand,
            ..
        } => execute_data_processing(&mut effects, state, op, set_flags, rd, rn, operand),
        Instruction::MoveWide { top, rd, imm16, .. } => {
            let value = if top {
                (state.reg(rd) & 0xFFFF) | (u32::from(imm16) << 16)
            } else {
                u32::from(imm16)
            };
            effects.write_reg(rd, value);
        }
        Instruction::SingleTransfer {
            load,
            pre,
            up,
            writeback,
            rn,
            rt,
            offset,
            ..
        } => {
            let base = read_operand(state, rn);
            let carry = state.flag_is_set(CPSR_C);
            let delta = match offset {
                TransferOffset::Imm(imm) => u32::from(imm),
                TransferOffset::Reg { rm, shift, amount } => {
                    shift_imm(read_operand(state, rm), shift, amount, carry).0
                }
            };
            let offset_addr = if up {
                base.wrapping_add(delta)
            } else {
                base.wrapping_sub(delta)
            };
            let addr = if pre { offset_addr } else { base };

            if load {
                let value = memory.read_u32(addr)?;
                effects.write_reg(rt, value);
            } else {
                validate_word_alignment(addr)?;
                validate_write_access(addr)?;
                effects.mem_writes.push((addr, read_operand(state, rt)));
            }
            if writeback {
                effects.write_reg(rn, offset_addr);
            }
        }
        Instruction::BlockTransfer {
            load,
            pre,
            up,
            writeback,
            rn,
            list,
            ..
        } => {
            let base = state.reg(rn);
            let span = list.count_ones() * 4;
            let (start, new_base) = match (pre, up) {
                (false, true) => (base, base.wrapping_add(span)),
                (true, true) => (base.wrapping_add(4), base.wrapping_add(span)),
                (false, false) => (base.wrapping_sub(span).wrapping_add(4), base.wrapping_sub(span)),
                (true, false) => (base.wrapping_sub(span), base.wrapping_sub(span)),
            };

            let mut addr = start;
            for reg in CoreRegister::ALL {
                if list & (1 << reg.index()) == 0 {
                    continue;
                }
                if load {
                    let value = memory.read_u32(addr)?;
                    effects.write_reg(reg, value);
                } else {
                    validate_word_alignment(addr)?;
                    validate_write_access(addr)?;
                    effects.mem_writes.push((addr, read_operand(state, reg)));
                }
                addr = addr.wrapping_add(4);
            }
            if writeback {
                effects.write_reg(rn, new_base);
            }
        }
        Instruction::Mrs { rd, .. } => effects.write_reg(rd, state.cpsr()),
        Instruction::Msr { mask, source, .. } => {
            let value = match source {
                MsrSource::Reg(rm) => state.reg(rm),
                MsrSource::Imm(value) => value,
            };
            effects.flags_update = FlagsUpdate::Apsr {
                value,
                mask: msr_byte_mask(mask),
            };
        }
        Instruction::Branch { link, offset, .. } => {
            if link {
                effects.write_reg(CoreRegister::Lr, state.pc().wrapping_add(4));
            }
            effects.next_pc = state.pc().wrapping_add(8).wrapping_add_signed(offset);
        }
        Instruction::BranchExchange { link, rm, .. } => {
            let target = read_operand(state, rm);
            if link {
                effects.write_reg(CoreRegister::Lr, state.pc().wrapping_add(4));
            }
            effects.next_pc = target;
        }
    }

    Ok(effects)
}

fn execute_data_processing(
    effects: &mut ExecuteState,
    state: &ArchState,
    op: DataOpcode,
    set_flags: bool,
    rd: CoreRegister,
    rn: CoreRegister,
    operand: ShifterOperand,
) {
    let carry = state.flag_is_set(CPSR_C);
    let (op2, shifter_carry) = match operand {
        ShifterOperand::Imm { value, rotation } => {
            (value, if rotation == 0 { carry } else { value >> 31 != 0 })
        }
        ShifterOperand::Reg { rm, shift, amount } => {
            shift_imm(read_operand(state, rm), shift, amount, carry)
        }
    };
    let rn_value = read_operand(state, rn);

    let (result, update) = match op {
        DataOpcode::And | DataOpcode::Tst => logical(rn_value & op2, shifter_carry),
        DataOpcode::Eor | DataOpcode::Teq => logical(rn_value ^ op2, shifter_carry),
        DataOpcode::Orr => logical(rn_value | op2, shifter_carry),
        DataOpcode::Bic => logical(rn_value & !op2, shifter_carry),
        DataOpcode::Mov => logical(op2, shifter_carry),
        DataOpcode::Mvn => logical(!op2, shifter_carry),
        DataOpcode::Sub | DataOpcode::Cmp => arithmetic(rn_value, !op2, true),
        DataOpcode::Rsb => arithmetic(op2, !rn_value, true),
        DataOpcode::Add | DataOpcode::Cmn => arithmetic(rn_value, op2, false),
        DataOpcode::Adc => arithmetic(rn_value, op2, carry),
        DataOpcode::Sbc => arithmetic(rn_value, !op2, carry),
        DataOpcode::Rsc => arithmetic(op2, !rn_value, carry),
    };

    if set_flags {
        effects.flags_update = update;
    }
    if !op.is_comparison() {
        effects.write_reg(rd, result);
    }
}

const fn logical(result: u32, carry: bool) -> (u32, FlagsUpdate) {
    (result, FlagsUpdate::logical(result, carry))
}

const fn arithmetic(x: u32, y: u32, carry_in: bool) -> (u32, FlagsUpdate) {
    let (result, carry, overflow) = add_with_carry(x, y, carry_in);
    (result, FlagsUpdate::arithmetic(result, carry, overflow))
}

/// Applies accumulated effects to the machine.
///
/// # Errors
///
/// Propagates a memory fault if a store was not validated during execution.
pub fn commit_execution(
    effects: ExecuteState,
    state: &mut ArchState,
    memory: &mut Memory,
) -> Result<(), FaultCode> {
    for &(addr, value) in &effects.mem_writes {
        memory.write_u32(addr, value)?;
    }
    for (reg, value) in CoreRegister::ALL.into_iter().zip(effects.reg_writes) {
        if let Some(value) = value {
            state.set_reg(reg, value);
        }
    }
    effects.flags_update.apply(state);
    state.set_pc(effects.next_pc);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{commit_execution, execute_instruction, ExecuteState};
    use crate::decoder::Decoder;
    use crate::memory::{Memory, CODE_START, STACK_END, STACK_START};
    use crate::state::{ArchState, CoreRegister, CPSR_C, CPSR_N, CPSR_V, CPSR_Z};
    use crate::FaultCode;

    const STACK_TOP: u32 = STACK_END + 1;

    fn machine() -> (ArchState, Memory) {
        let mut state = ArchState::default();
        state.set_pc(CODE_START);
        state.set_sp(STACK_TOP);
        (state, Memory::new())
    }

    fn run(word: u32, state: &mut ArchState, memory: &mut Memory) -> Result<(), FaultCode> {
        let instr: Result<_, FaultCode> = Decoder::decode(word).into();
        let effects: ExecuteState = execute_instruction(&instr?, state, memory)?;
        commit_execution(effects, state, memory)
    }

    #[test]
    fn push_then_pop_restores_registers() {
        let (mut state, mut memory) = machine();
        for (value, reg) in (0x10_u32..).zip([
            CoreRegister::R0,
            CoreRegister::R1,
            CoreRegister::R2,
            CoreRegister::Lr,
        ]) {
            state.set_reg(reg, value);
        }

        // push {r0, r1, r2, lr}
        run(0xE92D_4007, &mut state, &mut memory).unwrap();
        assert_eq!(state.sp(), STACK_TOP - 16);
        assert_eq!(memory.read_u32(STACK_TOP - 16), Ok(0x10));
        assert_eq!(memory.read_u32(STACK_TOP - 4), Ok(0x13));

        for reg in [CoreRegister::R0, CoreRegister::R1, CoreRegister::R2, CoreRegister::Lr] {
            state.set_reg(reg, 0xDEAD);
        }
        // pop {r0, r1, r2, lr}
        run(0xE8BD_4007, &mut state, &mut memory).unwrap();
        assert_eq!(state.sp(), STACK_TOP);
        assert_eq!(state.reg(CoreRegister::R0), 0x10);
        assert_eq!(state.lr(), 0x13);
        assert_eq!(state.pc(), CODE_START + 8);
    }

    #[test]
    fn faulting_store_has_no_side_effects() {
        let (mut state, mut memory) = machine();
        state.set_sp(STACK_START + 8);
        // push {r0, r1, r2, lr} crosses into the code region.
        assert_eq!(
            run(0xE92D_4007, &mut state, &mut memory),
            Err(FaultCode::IllegalMemoryAccess)
        );
        assert_eq!(state.sp(), STACK_START + 8);
        assert_eq!(state.pc(), CODE_START);
        assert_eq!(memory.read_u32(STACK_START), Ok(0));
    }

    #[test]
    fn unaligned_load_faults() {
        let (mut state, mut memory) = machine();
        state.set_reg(CoreRegister::R11, STACK_START + 2);
        // ldr r3, [fp, #12]
        assert_eq!(
            run(0xE59B_300C, &mut state, &mut memory),
            Err(FaultCode::UnalignedAccess)
        );
        assert_eq!(state.pc(), CODE_START);
    }

    #[test]
    fn mrs_and_msr_round_trip_apsr() {
        let (mut state, mut memory) = machine();
        state.write_apsr(0xF80F_0000, u32::MAX);
        // mrs r4, apsr
        run(0xE10F_4000, &mut state, &mut memory).unwrap();
        assert_eq!(state.reg(CoreRegister::R4) & 0xF80F_0000, 0xF80F_0000);

        state.write_apsr(0, u32::MAX);
        // msr APSR_nzcvqg, r4
        run(0xE12C_F004, &mut state, &mut memory).unwrap();
        assert_eq!(state.apsr(), 0xF80F_0000);
    }

    #[test]
    fn msr_flags_only_leaves_ge_alone() {
        let (mut state, mut memory) = machine();
        state.write_apsr(0x000F_0000, u32::MAX);
        state.set_reg(CoreRegister::R4, 0xF000_0000);
        // msr cpsr_f, r4
        run(0xE128_F004, &mut state, &mut memory).unwrap();
        assert_eq!(state.apsr(), 0xF00F_0000);
    }

    #[test]
    fn compare_sets_flags_without_writing() {
        let (mut state, mut memory) = machine();
        state.set_reg(CoreRegister::R0, 3);
        state.set_reg(CoreRegister::R1, 5);
        // cmp r0, r1
        run(0xE150_0001, &mut state, &mut memory).unwrap();
        assert!(state.flag_is_set(CPSR_N));
        assert!(!state.flag_is_set(CPSR_Z));
        assert!(!state.flag_is_set(CPSR_C));
        assert!(!state.flag_is_set(CPSR_V));
        assert_eq!(state.reg(CoreRegister::R0), 3);
    }

    #[test]
    fn failed_condition_only_advances_pc() {
        let (mut state, mut memory) = machine();
        // addeq r0, r0, #1 with Z clear
        run(0x0280_0001, &mut state, &mut memory).unwrap();
        assert_eq!(state.reg(CoreRegister::R0), 0);
        assert_eq!(state.pc(), CODE_START + 4);
    }

    #[test]
    fn branches_are_relative_to_pc_plus_eight() {
        let (mut state, mut memory) = machine();
        // bl +4
        run(0xEB00_0001, &mut state, &mut memory).unwrap();
        assert_eq!(state.pc(), CODE_START + 12);
        assert_eq!(state.lr(), CODE_START + 4);
    }

    #[test]
    fn blx_reads_target_before_linking() {
        let (mut state, mut memory) = machine();
        state.set_lr(0x2_0000);
        // blx lr
        run(0xE12F_FF3E, &mut state, &mut memory).unwrap();
        assert_eq!(state.pc(), 0x2_0000);
        assert_eq!(state.lr(), CODE_START + 4);
    }

    #[test]
    fn movw_movt_build_a_constant() {
        let (mut state, mut memory) = machine();
        run(0xE305_C678, &mut state, &mut memory).unwrap();
        run(0xE341_C234, &mut state, &mut memory).unwrap();
        assert_eq!(state.reg(CoreRegister::R12), 0x1234_5678);
    }

    #[test]
    fn adds_sets_carry_from_unsigned_overflow() {
        let (mut state, mut memory) = machine();
        state.set_reg(CoreRegister::R0, u32::MAX);
        // adds r0, r0, #1
        run(0xE290_0001, &mut state, &mut memory).unwrap();
        assert_eq!(state.reg(CoreRegister::R0), 0);
        assert!(state.flag_is_set(CPSR_Z));
        assert!(state.flag_is_set(CPSR_C));
    }

    #[test]
    fn pc_relative_add_sees_pc_plus_eight() {
        let (mut state, mut memory) = machine();
        // add r0, pc, #4
        run(0xE28F_0004, &mut state, &mut memory).unwrap();
        assert_eq!(state.reg(CoreRegister::R0), CODE_START + 12);
    }
}
