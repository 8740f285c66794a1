//! Reference interpreter for a user-mode A32 subset.
//!
//! The machine runs code images produced by an emitter and checks them
//! against a fixed memory map: executable code, a writable stack, and a host
//! region that is reachable only by branching into it. Host routines are
//! supplied through [`HostBus`]. Faults are precise and latch.

/// Memory model primitives and fixed region map.
pub mod memory;
pub use memory::{
    decode_memory_region, validate_fetch_access, validate_read_access, validate_word_alignment,
    validate_write_access, Memory, MemoryRegion, RegionDescriptor, ADDRESS_SPACE_BYTES, CODE_END,
    CODE_START, FIXED_MEMORY_REGIONS, HOST_END, HOST_START, NULL_END, NULL_START, RESERVED_END,
    RESERVED_START, STACK_END, STACK_START, WORD_ACCESS_BYTES,
};

/// Host-facing machine API.
pub mod api;
pub use api::{
    HostBus, HostError, Machine, RunOutcome, SimConfig, StepOutcome, DEFAULT_STACK_TOP,
    DEFAULT_STEP_LIMIT,
};

/// Architectural CPU state.
pub mod state;
pub use state::{
    ArchState, CoreRegister, APSR_MASK, CORE_REGISTER_COUNT, CPSR_C, CPSR_GE_MASK,
    CPSR_MODE_USER, CPSR_N, CPSR_NZCV_MASK, CPSR_Q, CPSR_V, CPSR_Z,
};

/// Instruction decoder.
pub mod decoder;
pub use decoder::{
    expand_imm12, DataOpcode, DecodedOrFault, Decoder, Instruction, MsrSource, ShiftType,
    ShifterOperand, TransferOffset,
};

/// Fault taxonomy.
pub mod fault;
pub use fault::{FaultClass, FaultCode};

/// Instruction execution pipeline.
pub mod execute;
pub use execute::{commit_execution, execute_instruction, ExecuteState, FlagsUpdate};

#[cfg(test)]
use proptest as _;
#[cfg(test)]
use rstest as _;
