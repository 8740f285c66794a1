#![no_main]

use arm_sim::{
    validate_fetch_access, validate_read_access, validate_word_alignment, validate_write_access,
    ArchState, CoreRegister, Decoder, HostBus, HostError, Machine, Memory, StepOutcome,
};
use libfuzzer_sys::fuzz_target;

struct ClobberingHost;

impl HostBus for ClobberingHost {
    fn call(&mut self, _target: u32, state: &mut ArchState, _memory: &Memory) -> Result<(), HostError> {
        state.set_reg(CoreRegister::R0, 0);
        Ok(())
    }
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 8 {
        return;
    }

    let word = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let addr = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);

    let _ = Decoder::decode(word);

    let mut machine = Machine::default();
    if machine.load_code(&data[..data.len() & !3], []).is_err() {
        return;
    }
    machine.state_mut().set_reg(CoreRegister::R0, addr);
    for _ in 0..64 {
        if let StepOutcome::Fault { .. } = machine.step(&mut ClobberingHost) {
            break;
        }
    }

    let _ = validate_fetch_access(addr);
    let _ = validate_read_access(addr);
    let _ = validate_write_access(addr);
    let _ = validate_word_alignment(addr);
});
