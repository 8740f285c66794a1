//! Memory model primitives and fixed address-space policies.

/// Deterministic fetch/read/write legality policy helpers.
pub mod access;
/// Fixed memory-region map and address decoder.
pub mod map;

pub use access::{
    validate_fetch_access, validate_read_access, validate_word_alignment, validate_write_access,
    WORD_ACCESS_BYTES,
};
pub use map::{
    decode_memory_region, MemoryRegion, RegionDescriptor, CODE_END, CODE_START,
    FIXED_MEMORY_REGIONS, HOST_END, HOST_START, NULL_END, NULL_START, RESERVED_END,
    RESERVED_START, STACK_END, STACK_START,
};

use crate::FaultCode;

/// Size in bytes of the backed address space (1 MiB, `0..=STACK_END`).
pub const ADDRESS_SPACE_BYTES: usize = STACK_END as usize + 1;

/// Flat little-endian backing store for the mapped regions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Memory {
    bytes: Box<[u8]>,
}

impl Default for Memory {
    fn default() -> Self {
        Self::new()
    }
}

impl Memory {
    /// Zeroed address space.
    #[must_use]
    pub fn new() -> Self {
        Self {
            bytes: vec![0; ADDRESS_SPACE_BYTES].into_boxed_slice(),
        }
    }

    /// Raw backing bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.bytes
    }

    fn slot(&self, addr: u32, len: usize) -> Option<std::ops::Range<usize>> {
        let start = addr as usize;
        let end = start.checked_add(len)?;
        (end <= self.bytes.len()).then_some(start..end)
    }

    /// Copies `data` to `addr` without region policy checks.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::IllegalMemoryAccess`] when the span is not backed.
    pub fn load(&mut self, addr: u32, data: &[u8]) -> Result<(), FaultCode> {
        let range = self
            .slot(addr, data.len())
            .ok_or(FaultCode::IllegalMemoryAccess)?;
        self.bytes[range].copy_from_slice(data);
        Ok(())
    }

    /// Reads a word for instruction fetch, subject to the fetch policy.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::UnalignedAccess`] or
    /// [`FaultCode::NonExecutableFetch`].
    pub fn fetch_u32(&self, addr: u32) -> Result<u32, FaultCode> {
        validate_word_alignment(addr)?;
        validate_fetch_access(addr)?;
        self.raw_u32(addr)
    }

    /// Reads a data word, subject to the read policy.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::UnalignedAccess`] or
    /// [`FaultCode::IllegalMemoryAccess`].
    pub fn read_u32(&self, addr: u32) -> Result<u32, FaultCode> {
        validate_word_alignment(addr)?;
        validate_read_access(addr)?;
        self.raw_u32(addr)
    }

    /// Writes a data word, subject to the write policy.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::UnalignedAccess`] or
    /// [`FaultCode::IllegalMemoryAccess`].
    pub fn write_u32(&mut self, addr: u32, value: u32) -> Result<(), FaultCode> {
        validate_word_alignment(addr)?;
        validate_write_access(addr)?;
        let range = self
            .slot(addr, 4)
            .ok_or(FaultCode::IllegalMemoryAccess)?;
        self.bytes[range].copy_from_slice(&value.to_le_bytes());
        Ok(())
    }

    fn raw_u32(&self, addr: u32) -> Result<u32, FaultCode> {
        let range = self
            .slot(addr, 4)
            .ok_or(FaultCode::IllegalMemoryAccess)?;
        let b = &self.bytes[range];
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Reads a NUL-terminated byte string of at most `max_len` bytes from a
    /// readable region. The terminator is not included.
    ///
    /// # Errors
    ///
    /// Returns [`FaultCode::IllegalMemoryAccess`] when the string leaves the
    /// readable regions or no terminator is found within `max_len`.
    pub fn read_c_string(&self, addr: u32, max_len: usize) -> Result<Vec<u8>, FaultCode> {
        let mut out = Vec::new();
        for offset in 0..=max_len {
            let at = u32::try_from(offset)
                .ok()
                .and_then(|offset| addr.checked_add(offset))
                .ok_or(FaultCode::IllegalMemoryAccess)?;
            validate_read_access(at)?;
            let byte = *self
                .bytes
                .get(at as usize)
                .ok_or(FaultCode::IllegalMemoryAccess)?;
            if byte == 0 {
                return Ok(out);
            }
            out.push(byte);
        }
        Err(FaultCode::IllegalMemoryAccess)
    }
}
