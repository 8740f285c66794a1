//! Architectural CPU state model primitives.

/// Core register file and `CPSR` storage model.
pub mod registers;

pub use registers::{
    ArchState, CoreRegister, APSR_MASK, CORE_REGISTER_COUNT, CPSR_C, CPSR_GE_MASK,
    CPSR_MODE_USER, CPSR_N, CPSR_NZCV_MASK, CPSR_Q, CPSR_V, CPSR_Z,
};
