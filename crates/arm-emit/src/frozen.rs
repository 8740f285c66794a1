//! Finalized, immutable code.

use std::fmt;
use std::ops::Range;

use crate::buffer::CodeOffset;
use crate::encoder::decode_branch_target;

/// What a span of finalized bytes holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionKind {
    /// Executable instructions.
    Code,
    /// Inline data that must never be fetched as an instruction.
    Data,
}

/// A contiguous span of one [`RegionKind`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CodeRegion {
    /// Byte range within the code.
    pub range: Range<CodeOffset>,
    /// Region contents.
    pub kind: RegionKind,
}

/// Output of a finished compilation unit.
///
/// Regions tile `0..len()` in ascending order with no gaps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrozenCode {
    bytes: Box<[u8]>,
    entry_offset: CodeOffset,
    regions: Vec<CodeRegion>,
}

impl FrozenCode {
    pub(crate) fn new(bytes: Box<[u8]>, entry_offset: CodeOffset, data: &[Range<CodeOffset>]) -> Self {
        let regions = tile_regions(data, bytes.len());
        Self {
            bytes,
            entry_offset,
            regions,
        }
    }

    /// Finalized bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Total length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Returns `true` when nothing was emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Offset execution should start at.
    #[must_use]
    pub const fn entry_offset(&self) -> CodeOffset {
        self.entry_offset
    }

    /// Region map covering every byte.
    #[must_use]
    pub fn regions(&self) -> &[CodeRegion] {
        &self.regions
    }

    /// Data spans only.
    pub fn data_ranges(&self) -> impl Iterator<Item = Range<CodeOffset>> + '_ {
        self.regions
            .iter()
            .filter(|region| region.kind == RegionKind::Data)
            .map(|region| region.range.clone())
    }

    /// Kind of the region containing `offset`.
    #[must_use]
    pub fn region_at(&self, offset: CodeOffset) -> Option<RegionKind> {
        self.regions
            .iter()
            .find(|region| region.range.contains(&offset))
            .map(|region| region.kind)
    }

    /// Little-endian word at `offset`.
    #[must_use]
    pub fn word_at(&self, offset: CodeOffset) -> Option<u32> {
        let start = offset as usize;
        let word = self.bytes.get(start..start.checked_add(4)?)?;
        Some(u32::from_le_bytes([word[0], word[1], word[2], word[3]]))
    }

    /// Hex listing: one line per instruction word, data shown as bytes.
    ///
    /// ```text
    /// 00000000: e92d4007
    /// 0000000c: ea000000  ; -> 0x14
    /// 00000010: .byte 68 69 00 00
    /// ```
    #[must_use]
    pub const fn listing(&self) -> Listing<'_> {
        Listing { code: self }
    }
}

/// [`fmt::Display`] adapter returned by [`FrozenCode::listing`].
#[derive(Debug, Clone, Copy)]
pub struct Listing<'a> {
    code: &'a FrozenCode,
}

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bytes = &self.code.bytes;
        for region in &self.code.regions {
            let span = &bytes[region.range.start as usize..region.range.end as usize];
            match region.kind {
                RegionKind::Code => {
                    for at in region.range.clone().step_by(4) {
                        match self.code.word_at(at) {
                            Some(word) => {
                                write!(f, "{at:08x}: {word:08x}")?;
                                if let Some(target) = decode_branch_target(word, at) {
                                    write!(f, "  ; -> {target:#x}")?;
                                }
                                writeln!(f)?;
                            }
                            None => {
                                let tail = &bytes[at as usize..region.range.end as usize];
                                write_byte_line(f, at, tail)?;
                            }
                        }
                    }
                }
                RegionKind::Data => {
                    for (at, chunk) in region.range.clone().step_by(4).zip(span.chunks(4)) {
                        write_byte_line(f, at, chunk)?;
                    }
                }
            }
        }
        Ok(())
    }
}

fn write_byte_line(f: &mut fmt::Formatter<'_>, at: CodeOffset, bytes: &[u8]) -> fmt::Result {
    write!(f, "{at:08x}: .byte")?;
    for byte in bytes {
        write!(f, " {byte:02x}")?;
    }
    writeln!(f)
}

/// Fills the gaps between sorted, disjoint data spans with code spans.
#[allow(clippy::cast_possible_truncation)]
fn tile_regions(data: &[Range<CodeOffset>], len: usize) -> Vec<CodeRegion> {
    let end = len as CodeOffset;
    let mut regions = Vec::with_capacity(data.len() * 2 + 1);
    let mut cursor = 0;
    for span in data.iter().filter(|span| !span.is_empty()) {
        if span.start > cursor {
            regions.push(CodeRegion {
                range: cursor..span.start,
                kind: RegionKind::Code,
            });
        }
        regions.push(CodeRegion {
            range: span.clone(),
            kind: RegionKind::Data,
        });
        cursor = span.end;
    }
    if cursor < end {
        regions.push(CodeRegion {
            range: cursor..end,
            kind: RegionKind::Code,
        });
    }
    regions
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> FrozenCode {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xEA00_0000_u32.to_le_bytes());
        bytes.extend_from_slice(b"hi\0\0");
        bytes.extend_from_slice(&0xE1A0_0000_u32.to_le_bytes());
        FrozenCode::new(bytes.into_boxed_slice(), 0, &[4..8])
    }

    #[test]
    fn regions_tile_the_whole_output() {
        let code = sample();
        assert_eq!(
            code.regions(),
            &[
                CodeRegion { range: 0..4, kind: RegionKind::Code },
                CodeRegion { range: 4..8, kind: RegionKind::Data },
                CodeRegion { range: 8..12, kind: RegionKind::Code },
            ]
        );
        assert_eq!(code.region_at(5), Some(RegionKind::Data));
        assert_eq!(code.region_at(12), None);
        assert_eq!(code.data_ranges().collect::<Vec<_>>(), vec![4..8]);
    }

    #[test]
    fn listing_annotates_branches_and_data() {
        let listing = sample().listing().to_string();
        let lines: Vec<&str> = listing.lines().collect();
        assert_eq!(
            lines,
            vec![
                "00000000: ea000000  ; -> 0x8",
                "00000004: .byte 68 69 00 00",
                "00000008: e1a00000",
            ]
        );
    }

    #[test]
    fn empty_output_has_no_regions() {
        let code = FrozenCode::new(Box::new([]), 0, &[]);
        assert!(code.is_empty());
        assert!(code.regions().is_empty());
        assert!(code.listing().to_string().is_empty());
    }
}
