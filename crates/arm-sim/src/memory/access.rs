//! Deterministic memory access policy helpers by fixed region.

use crate::{decode_memory_region, FaultCode, MemoryRegion};

/// Byte width of a word access.
pub const WORD_ACCESS_BYTES: u32 = 4;

/// Validates instruction fetch legality.
///
/// Only the code region is executable. Host-region targets are dispatched
/// before fetch and never reach this check.
///
/// # Errors
///
/// Returns [`FaultCode::NonExecutableFetch`] outside the code region.
pub const fn validate_fetch_access(addr: u32) -> Result<(), FaultCode> {
    match decode_memory_region(addr) {
        MemoryRegion::Code => Ok(()),
        MemoryRegion::Null | MemoryRegion::Stack | MemoryRegion::Reserved | MemoryRegion::Host => {
            Err(FaultCode::NonExecutableFetch)
        }
    }
}

/// Validates data read legality. Code and stack are readable.
///
/// # Errors
///
/// Returns [`FaultCode::IllegalMemoryAccess`] for unmapped regions.
pub const fn validate_read_access(addr: u32) -> Result<(), FaultCode> {
    match decode_memory_region(addr) {
        MemoryRegion::Code | MemoryRegion::Stack => Ok(()),
        MemoryRegion::Null | MemoryRegion::Reserved | MemoryRegion::Host => {
            Err(FaultCode::IllegalMemoryAccess)
        }
    }
}

/// Validates data write legality. Only the stack is writable.
///
/// # Errors
///
/// Returns [`FaultCode::IllegalMemoryAccess`] outside the stack region.
pub const fn validate_write_access(addr: u32) -> Result<(), FaultCode> {
    match decode_memory_region(addr) {
        MemoryRegion::Stack => Ok(()),
        MemoryRegion::Null
        | MemoryRegion::Code
        | MemoryRegion::Reserved
        | MemoryRegion::Host => Err(FaultCode::IllegalMemoryAccess),
    }
}

/// Validates alignment for word accesses and fetches.
///
/// # Errors
///
/// Returns [`FaultCode::UnalignedAccess`] unless `addr % 4 == 0`.
pub const fn validate_word_alignment(addr: u32) -> Result<(), FaultCode> {
    if addr % WORD_ACCESS_BYTES == 0 {
        Ok(())
    } else {
        Err(FaultCode::UnalignedAccess)
    }
}

#[cfg(test)]
mod tests {
    use crate::{
        validate_fetch_access, validate_read_access, validate_word_alignment,
        validate_write_access, FaultCode, CODE_END, CODE_START, HOST_START, NULL_START,
        RESERVED_START, STACK_END, STACK_START,
    };

    #[test]
    fn fetch_legality_matches_region_policy() {
        assert_eq!(validate_fetch_access(CODE_START), Ok(()));
        assert_eq!(validate_fetch_access(CODE_END & !3), Ok(()));

        for addr in [NULL_START, STACK_START, RESERVED_START, HOST_START] {
            assert_eq!(
                validate_fetch_access(addr),
                Err(FaultCode::NonExecutableFetch)
            );
        }
    }

    #[test]
    fn read_legality_matches_region_policy() {
        assert_eq!(validate_read_access(CODE_START), Ok(()));
        assert_eq!(validate_read_access(STACK_END), Ok(()));
        for addr in [NULL_START, RESERVED_START, HOST_START] {
            assert_eq!(
                validate_read_access(addr),
                Err(FaultCode::IllegalMemoryAccess)
            );
        }
    }

    #[test]
    fn write_legality_matches_region_policy() {
        assert_eq!(validate_write_access(STACK_START), Ok(()));
        for addr in [NULL_START, CODE_START, RESERVED_START, HOST_START] {
            assert_eq!(
                validate_write_access(addr),
                Err(FaultCode::IllegalMemoryAccess)
            );
        }
    }

    #[test]
    fn word_alignment_rejects_low_bits() {
        assert_eq!(validate_word_alignment(0x1000), Ok(()));
        for low in 1..4 {
            assert_eq!(
                validate_word_alignment(0x1000 + low),
                Err(FaultCode::UnalignedAccess)
            );
        }
    }
}
