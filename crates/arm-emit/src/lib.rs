//! A32 machine-code emission core.
//!
//! An [`Assembler`] is one compilation unit: emit instructions, create and
//! bind labels, then [`Assembler::finalize`] into an immutable
//! [`FrozenCode`]. [`MacroAssembler`] layers multi-instruction sequences on
//! top, including a debug-probe trampoline that calls host code without
//! disturbing guest state.
//!
//! ```
//! use arm_emit::{AssemblerConfig, MacroAssembler, ProbeConfig, Register};
//!
//! let mut masm = MacroAssembler::new(AssemblerConfig::default(), ProbeConfig::new(0xF000_0000))?;
//! let layout = masm.debug_probe(b"hit", [Register::R0, Register::R1, Register::R2])?;
//! let code = masm.into_inner().finalize()?;
//! assert_eq!(code.len() as u32, layout.end);
//! # Ok::<(), arm_emit::AsmError>(())
//! ```

use env_logger as _;
#[cfg(test)]
use arm_sim as _;
#[cfg(test)]
use tempfile as _;

/// Instruction emitters, labels and finalization for one unit.
pub mod assembler;
/// Append-only code arena.
pub mod buffer;
/// Pure A32 instruction encoders.
pub mod encoder;
/// Emission error taxonomy.
pub mod errors;
/// Finalized code and its region map.
pub mod frozen;
/// Label arena and branch fixups.
pub mod label;
/// Macro sequences: probes, constants, PC-relative addresses.
pub mod macro_assembler;
/// Registers, operands and addressing modes.
pub mod operand;

pub use assembler::{Assembler, AssemblerConfig};
pub use buffer::{CodeBuffer, CodeOffset};
pub use errors::{AsmError, AsmErrorKind, ErrorClass};
pub use frozen::{CodeRegion, FrozenCode, Listing, RegionKind};
pub use label::Label;
pub use macro_assembler::{MacroAssembler, ProbeConfig, ProbeLayout, HOST_CALL_CLOBBERS};
pub use operand::{
    AddrMode, BlockMode, Condition, MemOperand, Operand, PsrFields, RegList, Register, Shift,
};
