//! Multi-instruction sequences built from [`Assembler`] emitters.
//!
//! The centrepiece is [`MacroAssembler::debug_probe`], a trampoline that logs
//! a message through a host routine from the middle of generated code and
//! resumes with every guest register and the NZCVQ/GE flags unchanged.
//!
//! Probe frame, from high to low addresses:
//!
//! ```text
//!   entry sp ->  +----------------------+
//!                | preserved: args, lr  |  <- fp
//!                +----------------------+
//!                | clobbered: r0-r3,    |
//!                | scratch, fp, ip, pad |
//!          sp -> +----------------------+
//! ```

use std::ops::{Deref, DerefMut, Range};

use log::debug;

use crate::assembler::{Assembler, AssemblerConfig};
use crate::buffer::CodeOffset;
use crate::encoder::{split_modified_immediates, DataOp};
use crate::errors::{AsmError, AsmErrorKind};
use crate::operand::{MemOperand, Operand, PsrFields, RegList, Register};

/// Registers (besides the flags) a host routine may clobber: `r0-r3`, `ip`
/// and `lr`.
pub const HOST_CALL_CLOBBERS: RegList = RegList::from_bits(
    Register::R0.bit()
        | Register::R1.bit()
        | Register::R2.bit()
        | Register::R3.bit()
        | Register::IP.bit()
        | Register::LR.bit(),
);

/// Registers used to pass the four host-call arguments.
const ARGUMENT_REGISTERS: [Register; 4] = [Register::R0, Register::R1, Register::R2, Register::R3];

/// Candidates for the stack alignment filler.
const PAD_CANDIDATES: [Register; 7] = [
    Register::R4,
    Register::R5,
    Register::R6,
    Register::R7,
    Register::R8,
    Register::R9,
    Register::R10,
];

/// Host routine and scratch choice for debug probes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Absolute address of the host logging routine.
    pub host_log_fn: u32,
    /// Register holding the saved CPSR across the host call.
    pub flags_scratch: Register,
}

impl ProbeConfig {
    /// Config calling `host_log_fn` with `r4` as the flags scratch.
    #[must_use]
    pub const fn new(host_log_fn: u32) -> Self {
        Self {
            host_log_fn,
            flags_scratch: Register::R4,
        }
    }

    /// Checks the scratch register survives the host call and the frame
    /// setup.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::ScratchConflict`] when the scratch is a
    /// call-clobbered register, `fp`, `sp` or `pc`.
    pub const fn validate(&self) -> Result<(), AsmErrorKind> {
        let reg = self.flags_scratch;
        let reserved = HOST_CALL_CLOBBERS.union(RegList::from_bits(
            Register::FP.bit() | Register::SP.bit() | Register::PC.bit(),
        ));
        if reserved.contains(reg) {
            Err(AsmErrorKind::ScratchConflict(reg))
        } else {
            Ok(())
        }
    }
}

/// Where the pieces of an emitted probe landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeLayout {
    /// First byte of the probe.
    pub start: CodeOffset,
    /// The branch over the message.
    pub skip_branch: CodeOffset,
    /// Message, terminator and padding.
    pub data: Range<CodeOffset>,
    /// Skip branch target, first instruction after the data.
    pub resume: CodeOffset,
    /// The `blx` into the host routine.
    pub call_site: CodeOffset,
    /// One past the last byte; execution falls through here.
    pub end: CodeOffset,
    /// Registers saved first and restored last.
    pub preserved: RegList,
    /// Scratch registers saved around the call.
    pub clobbered: RegList,
}

/// Register sets for one probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ProbeFrame {
    preserved: RegList,
    clobbered: RegList,
}

impl ProbeFrame {
    fn plan(args: [Register; 3], scratch: Register) -> Self {
        let mut preserved = RegList::of(&args);
        preserved.insert(Register::LR);

        let mut clobbered = RegList::of(&ARGUMENT_REGISTERS);
        clobbered.insert(scratch);
        clobbered.insert(Register::FP);
        clobbered.insert(Register::IP);
        let mut clobbered = clobbered.difference(preserved);

        if (preserved.len() + clobbered.len()) % 2 == 1 {
            let taken = preserved.union(clobbered);
            if let Some(pad) = PAD_CANDIDATES.into_iter().find(|reg| !taken.contains(*reg)) {
                clobbered.insert(pad);
            }
        }
        Self {
            preserved,
            clobbered,
        }
    }
}

/// [`Assembler`] plus macro sequences. Derefs to the assembler for raw
/// emitters.
#[derive(Debug)]
pub struct MacroAssembler {
    asm: Assembler,
    probe: ProbeConfig,
}

impl Deref for MacroAssembler {
    type Target = Assembler;

    fn deref(&self) -> &Assembler {
        &self.asm
    }
}

impl DerefMut for MacroAssembler {
    fn deref_mut(&mut self) -> &mut Assembler {
        &mut self.asm
    }
}

impl MacroAssembler {
    /// Starts a unit with probe support.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::ScratchConflict`] for an invalid probe config,
    /// or a resource error from the buffer.
    pub fn new(config: AssemblerConfig, probe: ProbeConfig) -> Result<Self, AsmError> {
        probe
            .validate()
            .map_err(|kind| AsmError::new(kind, "new", 0))?;
        Ok(Self {
            asm: Assembler::new(config)?,
            probe,
        })
    }

    /// Active probe configuration.
    #[must_use]
    pub const fn probe_config(&self) -> &ProbeConfig {
        &self.probe
    }

    /// Unwraps the underlying assembler.
    #[must_use]
    pub fn into_inner(self) -> Assembler {
        self.asm
    }

    /// Loads a 32-bit constant with `movw`, plus `movt` when the high half is
    /// non-zero.
    ///
    /// # Errors
    ///
    /// Returns a usage error for `pc`.
    #[allow(clippy::cast_possible_truncation)]
    pub fn mov32(&mut self, rd: Register, value: u32) -> Result<CodeOffset, AsmError> {
        let at = self.asm.movw(rd, value as u16)?;
        let high = (value >> 16) as u16;
        if high != 0 {
            self.asm.movt(rd, high)?;
        }
        Ok(at)
    }

    /// Materializes the runtime address of buffer offset `target` in `rd`,
    /// relative to `pc`.
    ///
    /// # Errors
    ///
    /// Returns a usage error for `pc` as destination.
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn adr(&mut self, rd: Register, target: CodeOffset) -> Result<CodeOffset, AsmError> {
        const OP: &str = "adr";
        let at = self.asm.instruction_offset(OP)?;
        if rd == Register::PC {
            return Err(AsmError::new(
                AsmErrorKind::RegisterNotAllowed { reg: rd, role: "adr destination" },
                OP,
                at,
            ));
        }
        let distance = i64::from(target) - (i64::from(at) + 8);
        let op = if distance < 0 { DataOp::Sub } else { DataOp::Add };
        let chunks = split_modified_immediates(distance.unsigned_abs() as u32);
        if chunks.is_empty() {
            self.asm.add(rd, Register::PC, Operand::imm(0))?;
            return Ok(at);
        }
        let mut base = Register::PC;
        for chunk in chunks {
            self.asm
                .data_processing(op, false, rd, base, Operand::imm_u32(chunk))?;
            base = rd;
        }
        Ok(at)
    }

    /// Emits a trampoline that calls the host routine as
    /// `host(message, a, b, c)` and resumes with all guest state intact.
    ///
    /// Arguments are read from the values the registers held on entry. The
    /// message is embedded inline, NUL-terminated and padded to a word.
    ///
    /// # Errors
    ///
    /// Usage errors (nothing emitted): an argument outside `r0..r12`, a NUL
    /// inside `message`, a poisoned unit or an unaligned cursor. A resource
    /// error mid-sequence poisons the unit.
    #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
    pub fn debug_probe(&mut self, message: &[u8], args: [Register; 3]) -> Result<ProbeLayout, AsmError> {
        const OP: &str = "debug_probe";
        let start = self.asm.instruction_offset(OP)?;
        if let Some(reg) = args.into_iter().find(|reg| !reg.is_probe_preservable()) {
            return Err(AsmError::new(AsmErrorKind::ProbeRegisterReserved(reg), OP, start));
        }
        if let Some(index) = message.iter().position(|&byte| byte == 0) {
            return Err(AsmError::new(AsmErrorKind::MessageContainsNul(index), OP, start));
        }

        let scratch = self.probe.flags_scratch;
        let ProbeFrame {
            preserved,
            clobbered,
        } = ProbeFrame::plan(args, scratch);
        debug!(
            "MacroAssembler: probe at {start:#x}, {} message bytes, preserve {preserved}, clobber {clobbered}",
            message.len()
        );

        self.asm.push(preserved)?;
        self.asm.push(clobbered)?;
        self.asm.add(
            Register::FP,
            Register::SP,
            Operand::imm(clobbered.byte_size() as i32),
        )?;
        self.asm.mrs(scratch)?;

        let skip = self.asm.new_label();
        let skip_branch = self.asm.b(skip)?;
        let data_start = self.asm.emit_data(message)?.start;
        self.asm.db(0)?;
        self.asm.align_to(4)?;
        let resume = self.asm.bind(skip)?;

        let [a, b, c] = args;
        for (dest, src) in [(Register::R3, c), (Register::R2, b), (Register::R1, a)] {
            let slot = preserved
                .slot_of(src)
                .ok_or_else(|| AsmError::new(AsmErrorKind::InvalidOperand("probe slot"), OP, start))?;
            self.asm
                .ldr(dest, &MemOperand::offset(Register::FP, (slot * 4) as i32))?;
        }
        self.adr(Register::R0, data_start)?;
        self.mov32(Register::IP, self.probe.host_log_fn)?;
        let call_site = self.asm.blx(Register::IP)?;

        self.asm.msr(PsrFields::APSR, scratch.into())?;
        self.asm.pop(clobbered)?;
        self.asm.pop(preserved)?;

        Ok(ProbeLayout {
            start,
            skip_branch,
            data: data_start..resume,
            resume,
            call_site,
            end: self.asm.current_offset(),
            preserved,
            clobbered,
        })
    }
}
