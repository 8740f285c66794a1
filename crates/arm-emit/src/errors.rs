//! Structured error reporting for code emission.
//!
//! Every failure carries the emitter that raised it and the buffer offset at
//! which it was raised, so a translation driver can point at the offending
//! call. Errors fall into three classes:
//!
//! - **Usage** errors are detected before any byte is written. The unit stays
//!   usable.
//! - **Encoding-range** errors mean a value does not fit its instruction field.
//!   The unit is poisoned and must be discarded.
//! - **Resource** errors mean the buffer could not grow. The unit is poisoned.

use thiserror::Error;

use crate::operand::Register;

/// Error class used by drivers to decide whether a unit is still usable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorClass {
    /// Invalid arguments; reported synchronously, nothing emitted.
    Usage,
    /// A value exceeded its field's representable range.
    EncodingRange,
    /// Buffer growth failed or exceeded the configured cap.
    Resource,
}

/// Classification of emission errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AsmErrorKind {
    /// Register code outside `0..=15`.
    #[error("invalid register code {0}")]
    InvalidRegister(u8),
    /// Register is valid but not permitted in this position.
    #[error("register {reg} is not allowed as {role}")]
    RegisterNotAllowed {
        /// Offending register.
        reg: Register,
        /// Operand position description.
        role: &'static str,
    },
    /// Operand kind not supported by this instruction.
    #[error("unsupported operand: {0}")]
    InvalidOperand(&'static str),
    /// Illegal index-mode / writeback combination.
    #[error("invalid addressing mode: {0}")]
    InvalidAddressingMode(&'static str),
    /// Block transfer with no registers.
    #[error("register list is empty")]
    EmptyRegisterList,
    /// `bind` called on a label that already has an offset.
    #[error("label {index} is already bound at offset {offset:#x}")]
    LabelAlreadyBound {
        /// Label index within its unit.
        index: u32,
        /// Offset the label was bound to.
        offset: u32,
    },
    /// Label handle created by a different assembler.
    #[error("label {index} belongs to another compilation unit")]
    ForeignLabel {
        /// Label index within its unit.
        index: u32,
    },
    /// Finalize found a label that was never bound.
    #[error("label {index} is unbound ({pending} pending fixups)")]
    UnboundLabel {
        /// Label index within its unit.
        index: u32,
        /// Number of branches still waiting on it.
        pending: usize,
    },
    /// Probe argument outside the preservable register range.
    #[error("probe argument {0} is outside r0..r12")]
    ProbeRegisterReserved(Register),
    /// Probe message carries an interior NUL byte.
    #[error("probe message contains a NUL byte at index {0}")]
    MessageContainsNul(usize),
    /// Trampoline scratch register collides with the call contract.
    #[error("scratch register {0} collides with the host call registers")]
    ScratchConflict(Register),
    /// Instruction emission attempted at a non word-aligned cursor.
    #[error("instruction emission at unaligned offset")]
    MisalignedInstruction,
    /// `align_to` with a zero or non power-of-two argument.
    #[error("alignment {0} is not a non-zero power of two")]
    InvalidAlignment(u32),
    /// Unit already hit a fatal error.
    #[error("compilation unit was poisoned by an earlier fatal error")]
    UnitPoisoned,
    /// Immediate cannot be expressed by the instruction's immediate field.
    #[error("immediate {0:#x} is not encodable")]
    ImmediateNotEncodable(u32),
    /// Memory offset exceeds the 12-bit offset field.
    #[error("memory offset {0} out of range")]
    OffsetOutOfRange(i32),
    /// Branch displacement exceeds the signed 24-bit word field.
    #[error("branch displacement {0} bytes out of range")]
    BranchOutOfRange(i64),
    /// Shift amount outside the range of its shift type.
    #[error("shift amount {0} out of range")]
    ShiftOutOfRange(u8),
    /// Buffer reservation failed.
    #[error("code buffer allocation failed")]
    OutOfMemory,
    /// Buffer would exceed the configured maximum size.
    #[error("code buffer would exceed {limit} bytes")]
    CodeSizeLimit {
        /// Configured cap in bytes.
        limit: usize,
    },
}

impl AsmErrorKind {
    /// Returns the class for this error kind.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        match self {
            Self::ImmediateNotEncodable(_)
            | Self::OffsetOutOfRange(_)
            | Self::BranchOutOfRange(_)
            | Self::ShiftOutOfRange(_) => ErrorClass::EncodingRange,
            Self::OutOfMemory | Self::CodeSizeLimit { .. } => ErrorClass::Resource,
            _ => ErrorClass::Usage,
        }
    }

    /// Errors after which the unit must be discarded.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        !matches!(self.class(), ErrorClass::Usage)
    }
}

/// Emission error with the offending operation and buffer position.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{op} at offset {offset:#x}: {kind}")]
pub struct AsmError {
    /// Kind of error.
    pub kind: AsmErrorKind,
    /// Mnemonic or operation that failed.
    pub op: &'static str,
    /// Cursor when the failing call was made.
    pub offset: u32,
}

impl AsmError {
    /// Creates an error for `op` at `offset`.
    #[must_use]
    pub const fn new(kind: AsmErrorKind, op: &'static str, offset: u32) -> Self {
        Self { kind, op, offset }
    }

    /// Shorthand for `self.kind.class()`.
    #[must_use]
    pub const fn class(&self) -> ErrorClass {
        self.kind.class()
    }
}
