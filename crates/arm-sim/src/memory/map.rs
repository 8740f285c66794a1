//! Fixed memory-region map and decoding helpers.

/// Inclusive start of the unmapped null guard.
pub const NULL_START: u32 = 0x0000_0000;
/// Inclusive end of the unmapped null guard.
pub const NULL_END: u32 = 0x0000_FFFF;
/// Inclusive start of the code region.
pub const CODE_START: u32 = 0x0001_0000;
/// Inclusive end of the code region.
pub const CODE_END: u32 = 0x0007_FFFF;
/// Inclusive start of the stack region.
pub const STACK_START: u32 = 0x0008_0000;
/// Inclusive end of the stack region.
pub const STACK_END: u32 = 0x000F_FFFF;
/// Inclusive start of the reserved region.
pub const RESERVED_START: u32 = 0x0010_0000;
/// Inclusive end of the reserved region.
pub const RESERVED_END: u32 = 0xEFFF_FFFF;
/// Inclusive start of the host-call region.
pub const HOST_START: u32 = 0xF000_0000;
/// Inclusive end of the host-call region.
pub const HOST_END: u32 = 0xFFFF_FFFF;

/// Canonical fixed-region descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegionDescriptor {
    /// Region classification.
    pub region: MemoryRegion,
    /// Inclusive start address.
    pub start: u32,
    /// Inclusive end address.
    pub end: u32,
}

/// Region classification for 32-bit addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemoryRegion {
    /// Unmapped guard at the bottom of the address space.
    Null,
    /// Executable, read-only code.
    Code,
    /// Readable and writable stack.
    Stack,
    /// Unmapped.
    Reserved,
    /// Host routines; reachable only as a branch target.
    Host,
}

impl MemoryRegion {
    /// Returns the inclusive bounds for this region.
    #[must_use]
    pub const fn bounds(self) -> (u32, u32) {
        match self {
            Self::Null => (NULL_START, NULL_END),
            Self::Code => (CODE_START, CODE_END),
            Self::Stack => (STACK_START, STACK_END),
            Self::Reserved => (RESERVED_START, RESERVED_END),
            Self::Host => (HOST_START, HOST_END),
        }
    }

    /// Returns `true` when `addr` belongs to this region.
    #[must_use]
    pub const fn contains(self, addr: u32) -> bool {
        let (start, end) = self.bounds();
        addr >= start && addr <= end
    }

    /// Returns the canonical descriptor for this region.
    #[must_use]
    pub const fn descriptor(self) -> RegionDescriptor {
        let (start, end) = self.bounds();
        RegionDescriptor {
            region: self,
            start,
            end,
        }
    }
}

/// Fixed region layout in ascending address order.
pub const FIXED_MEMORY_REGIONS: [RegionDescriptor; 5] = [
    MemoryRegion::Null.descriptor(),
    MemoryRegion::Code.descriptor(),
    MemoryRegion::Stack.descriptor(),
    MemoryRegion::Reserved.descriptor(),
    MemoryRegion::Host.descriptor(),
];

const _: () = assert_fixed_region_layout();

const fn assert_fixed_region_layout() {
    let mut index = 0;
    while index < FIXED_MEMORY_REGIONS.len() {
        let descriptor = FIXED_MEMORY_REGIONS[index];
        assert!(
            descriptor.start <= descriptor.end,
            "region start cannot be greater than end"
        );

        if index > 0 {
            let previous = FIXED_MEMORY_REGIONS[index - 1];
            assert!(
                previous.end.wrapping_add(1) == descriptor.start,
                "fixed regions must be contiguous"
            );
        }

        index += 1;
    }

    assert!(
        FIXED_MEMORY_REGIONS[0].start == 0 && FIXED_MEMORY_REGIONS[4].end == u32::MAX,
        "fixed regions must cover full address space"
    );
}

/// Decodes a 32-bit address into its fixed memory region.
#[must_use]
pub const fn decode_memory_region(addr: u32) -> MemoryRegion {
    match addr {
        NULL_START..=NULL_END => MemoryRegion::Null,
        CODE_START..=CODE_END => MemoryRegion::Code,
        STACK_START..=STACK_END => MemoryRegion::Stack,
        RESERVED_START..=RESERVED_END => MemoryRegion::Reserved,
        HOST_START..=HOST_END => MemoryRegion::Host,
    }
}
