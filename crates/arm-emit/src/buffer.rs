//! Append-only code arena addressed by offsets.
//!
//! The backing `Vec` may reallocate as it grows, so nothing outside this
//! module holds a pointer into it. Offsets ([`CodeOffset`]) are the only
//! stable reference until the buffer is frozen.

use log::trace;

use crate::errors::AsmErrorKind;

/// Byte offset from the start of a code buffer.
pub type CodeOffset = u32;

/// Width in bytes of one A32 instruction.
pub const INSTRUCTION_BYTES: u32 = 4;

/// Largest unit addressable by a [`CodeOffset`].
pub const MAX_UNIT_BYTES: usize = CodeOffset::MAX as usize;

/// Growable, append-only byte buffer with a monotonically increasing cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodeBuffer {
    bytes: Vec<u8>,
    max_size: Option<usize>,
    filler: u8,
}

impl Default for CodeBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl CodeBuffer {
    /// Empty buffer with no size cap and `0x00` filler.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            bytes: Vec::new(),
            max_size: None,
            filler: 0,
        }
    }

    /// Buffer with an initial reservation, optional size cap and filler byte.
    ///
    /// # Errors
    ///
    /// Returns a resource error when the initial reservation fails or already
    /// exceeds the cap.
    pub fn with_capacity(
        capacity: usize,
        max_size: Option<usize>,
        filler: u8,
    ) -> Result<Self, AsmErrorKind> {
        let mut buffer = Self {
            bytes: Vec::new(),
            max_size,
            filler,
        };
        let limit = buffer.size_limit();
        if capacity > limit {
            return Err(AsmErrorKind::CodeSizeLimit { limit });
        }
        buffer
            .bytes
            .try_reserve(capacity)
            .map_err(|_| AsmErrorKind::OutOfMemory)?;
        Ok(buffer)
    }

    /// Configured cap, never above what offsets can address.
    fn size_limit(&self) -> usize {
        self.max_size.map_or(MAX_UNIT_BYTES, |cap| cap.min(MAX_UNIT_BYTES))
    }

    /// Current write cursor.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn current_offset(&self) -> CodeOffset {
        // `reserve` keeps the length within `MAX_UNIT_BYTES`.
        self.bytes.len() as CodeOffset
    }

    /// Number of bytes emitted.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` when nothing has been emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Filler byte used by [`CodeBuffer::align_to`].
    #[must_use]
    pub const fn filler(&self) -> u8 {
        self.filler
    }

    /// Emitted bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    /// Checks that `additional` more bytes fit, reserving storage for them.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::CodeSizeLimit`] or [`AsmErrorKind::OutOfMemory`].
    pub fn reserve(&mut self, additional: usize) -> Result<(), AsmErrorKind> {
        let limit = self.size_limit();
        if self.bytes.len().saturating_add(additional) > limit {
            return Err(AsmErrorKind::CodeSizeLimit { limit });
        }
        self.bytes
            .try_reserve(additional)
            .map_err(|_| AsmErrorKind::OutOfMemory)
    }

    /// Appends one byte.
    ///
    /// # Errors
    ///
    /// Returns a resource error if the buffer cannot grow.
    pub fn emit_byte(&mut self, byte: u8) -> Result<(), AsmErrorKind> {
        self.reserve(1)?;
        self.bytes.push(byte);
        Ok(())
    }

    /// Appends a little-endian 32-bit word.
    ///
    /// # Errors
    ///
    /// Returns a resource error if the buffer cannot grow.
    pub fn emit_u32(&mut self, word: u32) -> Result<(), AsmErrorKind> {
        self.reserve(4)?;
        self.bytes.extend_from_slice(&word.to_le_bytes());
        Ok(())
    }

    /// Appends a run of bytes.
    ///
    /// # Errors
    ///
    /// Returns a resource error if the buffer cannot grow.
    pub fn emit_bytes(&mut self, data: &[u8]) -> Result<(), AsmErrorKind> {
        self.reserve(data.len())?;
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    /// Overwrites a previously emitted byte. Only the fixup path calls this.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::InvalidOperand`] when `offset` was never
    /// emitted.
    pub fn write_byte_at(&mut self, offset: CodeOffset, byte: u8) -> Result<(), AsmErrorKind> {
        let slot = self
            .bytes
            .get_mut(offset as usize)
            .ok_or(AsmErrorKind::InvalidOperand("write past cursor"))?;
        *slot = byte;
        Ok(())
    }

    /// Reads back an emitted little-endian word.
    #[must_use]
    pub fn read_u32_at(&self, offset: CodeOffset) -> Option<u32> {
        let start = offset as usize;
        let word = self.bytes.get(start..start.checked_add(4)?)?;
        Some(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
    }

    /// Pads with the filler byte until `cursor % align == 0`.
    ///
    /// Returns the number of padding bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::InvalidAlignment`] unless `align` is a non-zero
    /// power of two, or a resource error if the buffer cannot grow.
    pub fn align_to(&mut self, align: u32) -> Result<u32, AsmErrorKind> {
        if !align.is_power_of_two() {
            return Err(AsmErrorKind::InvalidAlignment(align));
        }
        let pad = self.current_offset().wrapping_neg() & (align - 1);
        trace!(
            "CodeBuffer: align to {align} at {:#x}, {pad} filler bytes",
            self.current_offset()
        );
        self.reserve(pad as usize)?;
        let end = self.bytes.len() + pad as usize;
        self.bytes.resize(end, self.filler);
        Ok(pad)
    }

    /// Pads with copies of `word` until `cursor % align == 0`. The cursor must
    /// already be word-aligned; alignments below a word need no padding.
    ///
    /// Returns the number of padding bytes written.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::InvalidAlignment`] unless `align` is a non-zero
    /// power of two, [`AsmErrorKind::MisalignedInstruction`] off a word
    /// boundary, or a resource error if the buffer cannot grow.
    pub fn align_with_word(&mut self, align: u32, word: u32) -> Result<u32, AsmErrorKind> {
        if !align.is_power_of_two() {
            return Err(AsmErrorKind::InvalidAlignment(align));
        }
        if self.current_offset() % INSTRUCTION_BYTES != 0 {
            return Err(AsmErrorKind::MisalignedInstruction);
        }
        let pad = self.current_offset().wrapping_neg() & (align - 1);
        trace!(
            "CodeBuffer: align to {align} at {:#x}, {} padding words",
            self.current_offset(),
            pad / INSTRUCTION_BYTES
        );
        self.reserve(pad as usize)?;
        for _ in 0..pad / INSTRUCTION_BYTES {
            self.bytes.extend_from_slice(&word.to_le_bytes());
        }
        Ok(pad)
    }

    /// Consumes the buffer; no further writes are possible.
    #[must_use]
    pub fn freeze(self) -> Box<[u8]> {
        self.bytes.into_boxed_slice()
    }
}
