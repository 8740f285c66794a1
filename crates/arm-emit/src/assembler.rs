//! Single-unit instruction assembler.
//!
//! An [`Assembler`] is one compilation unit: it owns the [`CodeBuffer`], the
//! label arena, and the ledger of inline data spans. Every emitter validates
//! and encodes first, then appends, so a usage error leaves the buffer
//! untouched. Encoding-range and resource errors poison the unit; from then
//! on every call fails with [`AsmErrorKind::UnitPoisoned`].

use std::ops::Range;

use log::{debug, trace, warn};

use crate::buffer::{CodeBuffer, CodeOffset, INSTRUCTION_BYTES};
use crate::encoder::{
    self, branch_displacement, encode_block_transfer, encode_branch, encode_branch_exchange,
    encode_data_processing, encode_move_wide, encode_mrs, encode_msr, encode_single_transfer,
    patch_branch, DataOp, NOP_WORD,
};
use crate::errors::{AsmError, AsmErrorKind};
use crate::frozen::FrozenCode;
use crate::label::{Fixup, FixupKind, Label, LabelTable};
use crate::operand::{BlockMode, Condition, MemOperand, Operand, PsrFields, RegList, Register};

/// Buffer sizing for a new unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssemblerConfig {
    /// Bytes reserved up front.
    pub initial_capacity: usize,
    /// Hard cap on the unit's size; exceeding it is a resource error.
    pub max_code_size: Option<usize>,
    /// Byte written by `align_to`.
    pub filler_byte: u8,
}

impl Default for AssemblerConfig {
    fn default() -> Self {
        Self {
            initial_capacity: 4096,
            max_code_size: None,
            filler_byte: 0x00,
        }
    }
}

/// A32 assembler for one compilation unit.
#[derive(Debug)]
pub struct Assembler {
    buffer: CodeBuffer,
    labels: LabelTable,
    data: Vec<Range<CodeOffset>>,
    entry: CodeOffset,
    poisoned: bool,
}

impl Assembler {
    /// Starts a new unit.
    ///
    /// # Errors
    ///
    /// Returns a resource error when the initial reservation fails or exceeds
    /// `max_code_size`.
    pub fn new(config: AssemblerConfig) -> Result<Self, AsmError> {
        let buffer = CodeBuffer::with_capacity(
            config.initial_capacity,
            config.max_code_size,
            config.filler_byte,
        )
        .map_err(|kind| AsmError::new(kind, "new", 0))?;
        Ok(Self {
            buffer,
            labels: LabelTable::new(),
            data: Vec::new(),
            entry: 0,
            poisoned: false,
        })
    }

    /// Current write cursor.
    #[must_use]
    pub fn current_offset(&self) -> CodeOffset {
        self.buffer.current_offset()
    }

    /// Bytes emitted so far.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        self.buffer.as_slice()
    }

    /// Inline data spans recorded so far, in ascending order.
    #[must_use]
    pub fn data_regions(&self) -> &[Range<CodeOffset>] {
        &self.data
    }

    /// Returns `true` once a fatal error has been reported.
    #[must_use]
    pub const fn is_poisoned(&self) -> bool {
        self.poisoned
    }

    /// Wraps `kind`, poisoning the unit when it is fatal.
    fn fail(&mut self, op: &'static str, at: CodeOffset, kind: AsmErrorKind) -> AsmError {
        if kind.is_fatal() && !self.poisoned {
            warn!("Assembler: unit poisoned by {op} at {at:#x}: {kind}");
            self.poisoned = true;
        }
        AsmError::new(kind, op, at)
    }

    /// Cursor, provided the unit is still usable.
    pub(crate) fn live_offset(&self, op: &'static str) -> Result<CodeOffset, AsmError> {
        let at = self.current_offset();
        if self.poisoned {
            return Err(AsmError::new(AsmErrorKind::UnitPoisoned, op, at));
        }
        Ok(at)
    }

    /// Cursor, provided the unit is usable and word-aligned.
    pub(crate) fn instruction_offset(&self, op: &'static str) -> Result<CodeOffset, AsmError> {
        let at = self.live_offset(op)?;
        if at % INSTRUCTION_BYTES != 0 {
            return Err(AsmError::new(AsmErrorKind::MisalignedInstruction, op, at));
        }
        Ok(at)
    }

    fn emit_word(
        &mut self,
        op: &'static str,
        encode: impl FnOnce() -> Result<u32, AsmErrorKind>,
    ) -> Result<CodeOffset, AsmError> {
        let at = self.instruction_offset(op)?;
        let word = encode().map_err(|kind| self.fail(op, at, kind))?;
        self.buffer
            .emit_u32(word)
            .map_err(|kind| self.fail(op, at, kind))?;
        trace!("Assembler: {at:#010x}: {word:08x} {op}");
        Ok(at)
    }

    fn record_data(&mut self, span: Range<CodeOffset>) {
        if span.is_empty() {
            return;
        }
        match self.data.last_mut() {
            Some(last) if last.end == span.start => last.end = span.end,
            _ => self.data.push(span),
        }
    }

    /// Makes the current cursor the unit's entry point.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::UnitPoisoned`] or
    /// [`AsmErrorKind::MisalignedInstruction`].
    pub fn mark_entry(&mut self) -> Result<CodeOffset, AsmError> {
        let at = self.instruction_offset("mark_entry")?;
        self.entry = at;
        Ok(at)
    }

    // Data processing

    /// Emits any data-processing instruction; `set_flags` selects the `s`
    /// form.
    ///
    /// # Errors
    ///
    /// Returns an encoding-range error for unencodable immediates or shifts,
    /// or a usage error for illegal register choices.
    pub fn data_processing(
        &mut self,
        op: DataOp,
        set_flags: bool,
        rd: Register,
        rn: Register,
        operand: Operand,
    ) -> Result<CodeOffset, AsmError> {
        self.emit_word(op.mnemonic(), || {
            encode_data_processing(Condition::Al, op, set_flags, rd, rn, operand)
        })
    }

    /// `add rd, rn, operand`.
    ///
    /// # Errors
    ///
    /// See [`Assembler::data_processing`].
    pub fn add(&mut self, rd: Register, rn: Register, operand: Operand) -> Result<CodeOffset, AsmError> {
        self.data_processing(DataOp::Add, false, rd, rn, operand)
    }

    /// `sub rd, rn, operand`.
    ///
    /// # Errors
    ///
    /// See [`Assembler::data_processing`].
    pub fn sub(&mut self, rd: Register, rn: Register, operand: Operand) -> Result<CodeOffset, AsmError> {
        self.data_processing(DataOp::Sub, false, rd, rn, operand)
    }

    /// `rsb rd, rn, operand`.
    ///
    /// # Errors
    ///
    /// See [`Assembler::data_processing`].
    pub fn rsb(&mut self, rd: Register, rn: Register, operand: Operand) -> Result<CodeOffset, AsmError> {
        self.data_processing(DataOp::Rsb, false, rd, rn, operand)
    }

    /// `and rd, rn, operand`.
    ///
    /// # Errors
    ///
    /// See [`Assembler::data_processing`].
    pub fn and(&mut self, rd: Register, rn: Register, operand: Operand) -> Result<CodeOffset, AsmError> {
        self.data_processing(DataOp::And, false, rd, rn, operand)
    }

    /// `orr rd, rn, operand`.
    ///
    /// # Errors
    ///
    /// See [`Assembler::data_processing`].
    pub fn orr(&mut self, rd: Register, rn: Register, operand: Operand) -> Result<CodeOffset, AsmError> {
        self.data_processing(DataOp::Orr, false, rd, rn, operand)
    }

    /// `eor rd, rn, operand`.
    ///
    /// # Errors
    ///
    /// See [`Assembler::data_processing`].
    pub fn eor(&mut self, rd: Register, rn: Register, operand: Operand) -> Result<CodeOffset, AsmError> {
        self.data_processing(DataOp::Eor, false, rd, rn, operand)
    }

    /// `mov rd, operand`.
    ///
    /// # Errors
    ///
    /// See [`Assembler::data_processing`].
    pub fn mov(&mut self, rd: Register, operand: Operand) -> Result<CodeOffset, AsmError> {
        self.data_processing(DataOp::Mov, false, rd, Register::R0, operand)
    }

    /// `mvn rd, operand`.
    ///
    /// # Errors
    ///
    /// See [`Assembler::data_processing`].
    pub fn mvn(&mut self, rd: Register, operand: Operand) -> Result<CodeOffset, AsmError> {
        self.data_processing(DataOp::Mvn, false, rd, Register::R0, operand)
    }

    /// `cmp rn, operand`.
    ///
    /// # Errors
    ///
    /// See [`Assembler::data_processing`].
    pub fn cmp(&mut self, rn: Register, operand: Operand) -> Result<CodeOffset, AsmError> {
        self.data_processing(DataOp::Cmp, true, Register::R0, rn, operand)
    }

    /// `movw rd, #imm16`: writes the low half and clears the high half.
    ///
    /// # Errors
    ///
    /// Returns a usage error for `pc`.
    pub fn movw(&mut self, rd: Register, imm16: u16) -> Result<CodeOffset, AsmError> {
        self.emit_word("movw", || encode_move_wide(Condition::Al, false, rd, imm16))
    }

    /// `movt rd, #imm16`: writes the high half, keeping the low half.
    ///
    /// # Errors
    ///
    /// Returns a usage error for `pc`.
    pub fn movt(&mut self, rd: Register, imm16: u16) -> Result<CodeOffset, AsmError> {
        self.emit_word("movt", || encode_move_wide(Condition::Al, true, rd, imm16))
    }

    /// `nop`.
    ///
    /// # Errors
    ///
    /// Fails only when the unit is poisoned, misaligned or full.
    pub fn nop(&mut self) -> Result<CodeOffset, AsmError> {
        self.emit_word("nop", || Ok(NOP_WORD))
    }

    // Memory

    /// `ldr rt, mem`.
    ///
    /// # Errors
    ///
    /// Returns an encoding-range error for offsets beyond ±4095, or a usage
    /// error for illegal register/writeback combinations.
    pub fn ldr(&mut self, rt: Register, mem: &MemOperand) -> Result<CodeOffset, AsmError> {
        self.emit_word("ldr", || encode_single_transfer(Condition::Al, true, rt, mem))
    }

    /// `str rt, mem`.
    ///
    /// # Errors
    ///
    /// See [`Assembler::ldr`].
    pub fn str(&mut self, rt: Register, mem: &MemOperand) -> Result<CodeOffset, AsmError> {
        self.emit_word("str", || encode_single_transfer(Condition::Al, false, rt, mem))
    }

    /// `ldm<mode> base{!}, list`.
    ///
    /// # Errors
    ///
    /// Returns a usage error for an empty list, `pc` as base, or writeback
    /// with the base in the list.
    pub fn ldm(
        &mut self,
        mode: BlockMode,
        base: Register,
        writeback: bool,
        list: RegList,
    ) -> Result<CodeOffset, AsmError> {
        self.emit_word("ldm", || {
            encode_block_transfer(Condition::Al, true, mode, base, writeback, list)
        })
    }

    /// `stm<mode> base{!}, list`.
    ///
    /// # Errors
    ///
    /// See [`Assembler::ldm`].
    pub fn stm(
        &mut self,
        mode: BlockMode,
        base: Register,
        writeback: bool,
        list: RegList,
    ) -> Result<CodeOffset, AsmError> {
        self.emit_word("stm", || {
            encode_block_transfer(Condition::Al, false, mode, base, writeback, list)
        })
    }

    /// `push list` (`stmdb sp!`). An empty list emits nothing.
    ///
    /// # Errors
    ///
    /// See [`Assembler::stm`].
    pub fn push(&mut self, list: RegList) -> Result<Option<CodeOffset>, AsmError> {
        if list.is_empty() {
            self.live_offset("push")?;
            return Ok(None);
        }
        self.stm(BlockMode::DecrementBefore, Register::SP, true, list)
            .map(Some)
    }

    /// `pop list` (`ldmia sp!`). An empty list emits nothing.
    ///
    /// # Errors
    ///
    /// See [`Assembler::ldm`].
    pub fn pop(&mut self, list: RegList) -> Result<Option<CodeOffset>, AsmError> {
        if list.is_empty() {
            self.live_offset("pop")?;
            return Ok(None);
        }
        self.ldm(BlockMode::IncrementAfter, Register::SP, true, list)
            .map(Some)
    }

    // Status register

    /// `mrs rd, cpsr`.
    ///
    /// # Errors
    ///
    /// Returns a usage error for `pc`.
    pub fn mrs(&mut self, rd: Register) -> Result<CodeOffset, AsmError> {
        self.emit_word("mrs", || encode_mrs(Condition::Al, rd))
    }

    /// `msr cpsr_<fields>, operand`.
    ///
    /// # Errors
    ///
    /// Returns a usage error for an empty mask, `pc`, or a shifted register;
    /// an encoding-range error for an unencodable immediate.
    pub fn msr(&mut self, fields: PsrFields, operand: Operand) -> Result<CodeOffset, AsmError> {
        self.emit_word("msr", || encode_msr(Condition::Al, fields, operand))
    }

    // Branches

    /// `bx rm`.
    ///
    /// # Errors
    ///
    /// Returns a usage error for `pc`.
    pub fn bx(&mut self, rm: Register) -> Result<CodeOffset, AsmError> {
        self.emit_word("bx", || encode_branch_exchange(Condition::Al, false, rm))
    }

    /// `blx rm`.
    ///
    /// # Errors
    ///
    /// Returns a usage error for `pc`.
    pub fn blx(&mut self, rm: Register) -> Result<CodeOffset, AsmError> {
        self.emit_word("blx", || encode_branch_exchange(Condition::Al, true, rm))
    }

    /// `b label`.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::ForeignLabel`], or
    /// [`AsmErrorKind::BranchOutOfRange`] for a bound label beyond ±32 MiB.
    pub fn b(&mut self, label: Label) -> Result<CodeOffset, AsmError> {
        self.branch_to("b", Condition::Al, false, label)
    }

    /// `b<cond> label`.
    ///
    /// # Errors
    ///
    /// See [`Assembler::b`].
    pub fn b_cond(&mut self, cond: Condition, label: Label) -> Result<CodeOffset, AsmError> {
        self.branch_to("b<cond>", cond, false, label)
    }

    /// `bl label`.
    ///
    /// # Errors
    ///
    /// See [`Assembler::b`].
    pub fn bl(&mut self, label: Label) -> Result<CodeOffset, AsmError> {
        self.branch_to("bl", Condition::Al, true, label)
    }

    fn branch_to(
        &mut self,
        op: &'static str,
        cond: Condition,
        link: bool,
        label: Label,
    ) -> Result<CodeOffset, AsmError> {
        let at = self.instruction_offset(op)?;
        let bound = self
            .labels
            .offset(label)
            .map_err(|kind| self.fail(op, at, kind))?;
        let displacement = bound.map_or(0, |target| branch_displacement(at, target));
        self.emit_word(op, || encode_branch(cond, link, displacement))?;
        if bound.is_none() {
            let fixup = Fixup {
                offset: at,
                kind: FixupKind::Branch24,
            };
            self.labels
                .add_fixup(label, fixup)
                .map_err(|kind| self.fail(op, at, kind))?;
            trace!("Assembler: fixup at {at:#x} for label {}", label.index());
        }
        Ok(at)
    }

    // Labels

    /// Allocates an unbound label.
    pub fn new_label(&mut self) -> Label {
        self.labels.create()
    }

    /// Bound offset of `label`, or `None` while unbound.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::ForeignLabel`] for labels of another unit.
    pub fn label_offset(&self, label: Label) -> Result<Option<CodeOffset>, AsmError> {
        self.labels
            .offset(label)
            .map_err(|kind| AsmError::new(kind, "label_offset", self.current_offset()))
    }

    /// Binds `label` to the cursor and patches every branch waiting on it.
    ///
    /// # Errors
    ///
    /// Returns a usage error for a second bind, a foreign label or an
    /// unaligned cursor, and a fatal [`AsmErrorKind::BranchOutOfRange`] when a
    /// pending branch cannot reach the cursor.
    pub fn bind(&mut self, label: Label) -> Result<CodeOffset, AsmError> {
        const OP: &str = "bind";
        let at = self.instruction_offset(OP)?;
        let fixups = self
            .labels
            .bind(label, at)
            .map_err(|kind| self.fail(OP, at, kind))?;
        for fixup in fixups {
            self.patch(fixup, at)
                .map_err(|kind| self.fail(OP, fixup.offset, kind))?;
        }
        Ok(at)
    }

    fn patch(&mut self, fixup: Fixup, target: CodeOffset) -> Result<(), AsmErrorKind> {
        let word = self
            .buffer
            .read_u32_at(fixup.offset)
            .ok_or(AsmErrorKind::InvalidOperand("fixup site past cursor"))?;
        let patched = match fixup.kind {
            FixupKind::Branch24 => patch_branch(word, branch_displacement(fixup.offset, target))?,
        };
        // The top byte holds condition and opcode; only the field is rewritten.
        for (i, byte) in (0..).zip(patched.to_le_bytes().into_iter().take(3)) {
            self.buffer.write_byte_at(fixup.offset + i, byte)?;
        }
        trace!(
            "Assembler: patched {:#x} -> {target:#x} ({word:08x} => {patched:08x})",
            fixup.offset
        );
        Ok(())
    }

    /// Target of the branch emitted at `at`, if it is one.
    #[must_use]
    pub fn decode_branch_target(&self, at: CodeOffset) -> Option<CodeOffset> {
        encoder::decode_branch_target(self.buffer.read_u32_at(at)?, at)
    }

    // Data

    /// Appends one data byte.
    ///
    /// # Errors
    ///
    /// Returns a resource error if the buffer cannot grow.
    pub fn db(&mut self, byte: u8) -> Result<CodeOffset, AsmError> {
        self.emit_data(&[byte]).map(|span| span.start)
    }

    /// Appends inline data and records it as a data span.
    ///
    /// # Errors
    ///
    /// Returns a resource error if the buffer cannot grow.
    pub fn emit_data(&mut self, data: &[u8]) -> Result<Range<CodeOffset>, AsmError> {
        const OP: &str = "emit_data";
        let start = self.live_offset(OP)?;
        self.buffer
            .emit_bytes(data)
            .map_err(|kind| self.fail(OP, start, kind))?;
        let span = start..self.current_offset();
        self.record_data(span.clone());
        Ok(span)
    }

    /// Pads the cursor to a multiple of `align`.
    ///
    /// Padding that extends an open data span is filler and joins the span.
    /// Between instructions the gap is filled with `nop`s and stays code, so
    /// fall-through execution runs across it.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::InvalidAlignment`] unless `align` is a
    /// non-zero power of two, or a resource error.
    pub fn align_to(&mut self, align: u32) -> Result<u32, AsmError> {
        const OP: &str = "align_to";
        let start = self.live_offset(OP)?;
        let extends_data = start % INSTRUCTION_BYTES != 0
            || self.data.last().is_some_and(|span| span.end == start);
        if !extends_data {
            return self
                .buffer
                .align_with_word(align, NOP_WORD)
                .map_err(|kind| self.fail(OP, start, kind));
        }
        let pad = self
            .buffer
            .align_to(align)
            .map_err(|kind| self.fail(OP, start, kind))?;
        self.record_data(start..self.current_offset());
        Ok(pad)
    }

    // Finalization

    /// Freezes the unit.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::UnitPoisoned`] after a fatal error, or
    /// [`AsmErrorKind::UnboundLabel`] for the first label never bound.
    pub fn finalize(self) -> Result<FrozenCode, AsmError> {
        const OP: &str = "finalize";
        let at = self.live_offset(OP)?;
        if let Some((index, pending)) = self.labels.first_unbound() {
            return Err(AsmError::new(
                AsmErrorKind::UnboundLabel { index, pending },
                OP,
                at,
            ));
        }
        debug!(
            "Assembler: finalized {} bytes, {} labels, {} data spans",
            self.buffer.len(),
            self.labels.len(),
            self.data.len()
        );
        Ok(FrozenCode::new(self.buffer.freeze(), self.entry, &self.data))
    }
}
