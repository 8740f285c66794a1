//! Emits debug probes and runs them on the reference interpreter.

use arm_emit::encoder::decode_branch_target;
use arm_emit::{
    AssemblerConfig, FrozenCode, MacroAssembler, Operand, ProbeConfig, ProbeLayout, RegionKind,
    Register,
};
use arm_sim::{
    ArchState, CoreRegister, HostBus, HostError, Machine, Memory, APSR_MASK, CODE_START,
    DEFAULT_STACK_TOP,
};
use env_logger as _;
use log as _;
use proptest::prelude::*;
use rstest::rstest;
use tempfile as _;
use thiserror as _;

const HOST_LOG: u32 = 0xF000_0100;
const MAX_MESSAGE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq)]
struct LoggedCall {
    message: Vec<u8>,
    args: [u32; 3],
}

/// Records each call and then trashes everything the calling convention
/// lets a callee trash.
#[derive(Default)]
struct RecordingHost {
    calls: Vec<LoggedCall>,
}

impl HostBus for RecordingHost {
    fn call(&mut self, target: u32, state: &mut ArchState, memory: &Memory) -> Result<(), HostError> {
        if target != HOST_LOG {
            return Err(HostError::UnknownTarget(target));
        }
        let message = memory
            .read_c_string(state.reg(CoreRegister::R0), MAX_MESSAGE)
            .map_err(|fault| HostError::Failed(fault.to_string()))?;
        self.calls.push(LoggedCall {
            message,
            args: [
                state.reg(CoreRegister::R1),
                state.reg(CoreRegister::R2),
                state.reg(CoreRegister::R3),
            ],
        });

        for reg in [
            CoreRegister::R0,
            CoreRegister::R1,
            CoreRegister::R2,
            CoreRegister::R3,
            CoreRegister::R12,
            CoreRegister::Lr,
        ] {
            state.set_reg(reg, 0xDEAD_BEEF);
        }
        state.write_apsr(!state.apsr(), APSR_MASK);
        Ok(())
    }
}

fn core(reg: Register) -> CoreRegister {
    CoreRegister::from_u4(reg.code()).expect("4-bit register code")
}

fn seed_registers(machine: &mut Machine, seeds: &[u32; 13], lr: u32, apsr: u32) {
    let state = machine.state_mut();
    for (reg, value) in CoreRegister::ALL.into_iter().zip(seeds) {
        state.set_reg(reg, *value);
    }
    state.set_lr(lr);
    state.write_apsr(apsr, APSR_MASK);
}

fn load(code: &FrozenCode) -> Machine {
    let mut machine = Machine::default();
    machine
        .load_code(code.bytes(), code.data_ranges())
        .expect("probe fits in the code region");
    machine
}

fn emit_probe(message: &[u8], args: [Register; 3], probe: ProbeConfig) -> (FrozenCode, ProbeLayout) {
    let mut masm = MacroAssembler::new(AssemblerConfig::default(), probe).unwrap();
    let layout = masm.debug_probe(message, args).unwrap();
    (masm.into_inner().finalize().unwrap(), layout)
}

/// Runs a single probe and checks the full round-trip contract.
fn check_round_trip(
    message: &[u8],
    args: [Register; 3],
    probe: ProbeConfig,
    seeds: &[u32; 13],
    apsr: u32,
) -> LoggedCall {
    let (code, layout) = emit_probe(message, args, probe);
    let mut machine = load(&code);
    seed_registers(&mut machine, seeds, 0x0004_0000, apsr);
    let before = machine.state().clone();

    let mut host = RecordingHost::default();
    let outcome = machine.run(&mut host, CODE_START + layout.end);
    assert_eq!(outcome.fault(), None, "probe faulted:\n{}", code.listing());

    let after = machine.state();
    for reg in CoreRegister::ALL.into_iter().take(15) {
        assert_eq!(after.reg(reg), before.reg(reg), "{reg:?} changed");
    }
    assert_eq!(after.sp(), DEFAULT_STACK_TOP);
    assert_eq!(after.apsr(), before.apsr());

    assert_eq!(host.calls.len(), 1);
    host.calls.remove(0)
}

#[test]
fn short_message_round_trip() {
    let seeds: [u32; 13] = std::array::from_fn(|i| 0x1000 + i as u32);
    let call = check_round_trip(
        b"hi",
        [Register::R0, Register::R1, Register::R2],
        ProbeConfig::new(HOST_LOG),
        &seeds,
        0xF80F_0000,
    );
    assert_eq!(call.message, b"hi");
    assert_eq!(call.args, [0x1000, 0x1001, 0x1002]);
}

#[rstest]
#[case::callee_saved([Register::R4, Register::R5, Register::R6])]
#[case::reversed([Register::R2, Register::R1, Register::R0])]
#[case::frame_and_ip([Register::R11, Register::R12, Register::R3])]
#[case::scratch_as_argument([Register::R4, Register::R0, Register::R4])]
#[case::repeated([Register::R7, Register::R7, Register::R7])]
fn arguments_are_entry_values(#[case] args: [Register; 3]) {
    let seeds: [u32; 13] = std::array::from_fn(|i| 0xA5A5_0000 | i as u32);
    let call = check_round_trip(b"probe", args, ProbeConfig::new(HOST_LOG), &seeds, 0);
    let expected = args.map(|reg| seeds[usize::from(reg.code())]);
    assert_eq!(call.args, expected);
    assert_eq!(call.message, b"probe");
}

#[rstest]
#[case(Register::R4)]
#[case(Register::R7)]
#[case(Register::R10)]
fn any_valid_scratch_restores_flags(#[case] scratch: Register) {
    let seeds = [7; 13];
    let probe = ProbeConfig {
        host_log_fn: HOST_LOG,
        flags_scratch: scratch,
    };
    check_round_trip(
        b"flags",
        [Register::R0, Register::R5, Register::R9],
        probe,
        &seeds,
        0x5008_0000,
    );
}

#[test]
fn long_message_uses_multi_chunk_address() {
    let message = vec![b'x'; 1500];
    let seeds = [0; 13];
    let call = check_round_trip(
        &message,
        [Register::R0, Register::R1, Register::R2],
        ProbeConfig::new(HOST_LOG),
        &seeds,
        0,
    );
    assert_eq!(call.message, message);
}

#[test]
fn skip_branch_lands_past_padded_message() {
    let (code, layout) = emit_probe(
        b"hi",
        [Register::R0, Register::R1, Register::R2],
        ProbeConfig::new(HOST_LOG),
    );
    let branch = code.word_at(layout.skip_branch).unwrap();
    assert_eq!(
        decode_branch_target(branch, layout.skip_branch),
        Some(layout.resume)
    );
    assert_eq!(layout.resume, layout.data.start + 4);
    assert_eq!(code.region_at(layout.data.start), Some(RegionKind::Data));
    assert_eq!(code.region_at(layout.resume), Some(RegionKind::Code));
    assert_eq!(&code.bytes()[layout.data.start as usize..][..4], b"hi\0\0");
}

#[test]
fn consecutive_probes_preserve_surrounding_code() {
    let mut masm = MacroAssembler::new(AssemblerConfig::default(), ProbeConfig::new(HOST_LOG)).unwrap();
    masm.mov(Register::R5, Operand::imm(1)).unwrap();
    masm.debug_probe(b"first", [Register::R5, Register::R0, Register::R0])
        .unwrap();
    masm.add(Register::R5, Register::R5, Operand::imm(1)).unwrap();
    masm.debug_probe(b"second", [Register::R5, Register::R0, Register::R0])
        .unwrap();
    let end = masm.current_offset();
    let code = masm.into_inner().finalize().unwrap();

    let mut machine = load(&code);
    let mut host = RecordingHost::default();
    let outcome = machine.run(&mut host, CODE_START + end);
    assert_eq!(outcome.fault(), None);
    assert_eq!(machine.state().reg(CoreRegister::R5), 2);
    assert_eq!(
        host.calls,
        vec![
            LoggedCall {
                message: b"first".to_vec(),
                args: [1, 0, 0]
            },
            LoggedCall {
                message: b"second".to_vec(),
                args: [2, 0, 0]
            },
        ]
    );
}

#[test]
fn misdirected_host_address_faults_in_the_call() {
    let (code, layout) = emit_probe(
        b"x",
        [Register::R0, Register::R1, Register::R2],
        ProbeConfig::new(HOST_LOG + 4),
    );
    let mut machine = load(&code);
    let outcome = machine.run(&mut RecordingHost::default(), CODE_START + layout.end);
    assert_eq!(outcome.fault(), Some(arm_sim::FaultCode::UnknownHostTarget));
    assert_eq!(machine.state().lr(), CODE_START + layout.call_site + 4);
}

#[test]
fn aligned_gaps_between_instructions_execute() {
    let mut masm = MacroAssembler::new(AssemblerConfig::default(), ProbeConfig::new(HOST_LOG)).unwrap();
    masm.nop().unwrap();
    masm.align_to(8).unwrap();
    masm.mov(Register::R5, Operand::imm(3)).unwrap();
    masm.align_to(32).unwrap();
    masm.debug_probe(b"aligned", [Register::R5, Register::R0, Register::R0])
        .unwrap();
    let end = masm.current_offset();
    let code = masm.into_inner().finalize().unwrap();
    assert_eq!(code.region_at(4), Some(RegionKind::Code));

    let mut machine = load(&code);
    let mut host = RecordingHost::default();
    let outcome = machine.run(&mut host, CODE_START + end);
    assert_eq!(outcome.fault(), None, "{}", code.listing());
    assert_eq!(machine.state().reg(CoreRegister::R5), 3);
    assert_eq!(host.calls[0].args[0], 3);
}

fn probe_register() -> impl Strategy<Value = Register> {
    (0_u8..13).prop_map(|code| Register::new(code).unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn probes_are_transparent(
        message in prop::collection::vec(1_u8..=255, 0..64),
        args in [probe_register(), probe_register(), probe_register()],
        seeds in prop::array::uniform13(any::<u32>()),
        apsr in any::<u32>(),
    ) {
        let call = check_round_trip(&message, args, ProbeConfig::new(HOST_LOG), &seeds, apsr);
        prop_assert_eq!(call.message, message);
        prop_assert_eq!(call.args, args.map(|reg| seeds[usize::from(reg.code())]));
    }
}
