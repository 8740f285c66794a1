//! Label arena and pending branch fixups.
//!
//! Labels are plain `{ unit, index }` handles into a per-assembler arena. The
//! unit id comes from a process-wide counter so a handle can never silently
//! resolve against another assembler's table.

use std::sync::atomic::{AtomicU32, Ordering};

use log::trace;

use crate::buffer::CodeOffset;
use crate::errors::AsmErrorKind;

static NEXT_UNIT: AtomicU32 = AtomicU32::new(1);

/// Handle to a code position that may not be known yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label {
    unit: u32,
    index: u32,
}

impl Label {
    /// Index of the label within its unit.
    #[must_use]
    pub const fn index(self) -> u32 {
        self.index
    }
}

/// How a fixup site is rewritten once its label is bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FixupKind {
    /// `b`/`bl` signed 24-bit word displacement.
    Branch24,
}

/// A branch emitted before its target was known.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fixup {
    /// Offset of the instruction to patch.
    pub offset: CodeOffset,
    /// Field to rewrite.
    pub kind: FixupKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct LabelState {
    bound: Option<CodeOffset>,
    fixups: Vec<Fixup>,
}

/// Label states for one compilation unit.
#[derive(Debug)]
pub struct LabelTable {
    unit: u32,
    labels: Vec<LabelState>,
}

impl Default for LabelTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LabelTable {
    /// Empty table with a fresh unit id.
    #[must_use]
    pub fn new() -> Self {
        Self {
            unit: NEXT_UNIT.fetch_add(1, Ordering::Relaxed),
            labels: Vec::new(),
        }
    }

    /// Number of labels created so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.labels.len()
    }

    /// Returns `true` when no label was created.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    /// Allocates an unbound label.
    #[allow(clippy::cast_possible_truncation)]
    pub fn create(&mut self) -> Label {
        let index = self.labels.len() as u32;
        self.labels.push(LabelState::default());
        trace!("LabelTable[{}]: new label {index}", self.unit);
        Label {
            unit: self.unit,
            index,
        }
    }

    fn state(&self, label: Label) -> Result<&LabelState, AsmErrorKind> {
        if label.unit != self.unit {
            return Err(AsmErrorKind::ForeignLabel { index: label.index });
        }
        self.labels
            .get(label.index as usize)
            .ok_or(AsmErrorKind::ForeignLabel { index: label.index })
    }

    fn state_mut(&mut self, label: Label) -> Result<&mut LabelState, AsmErrorKind> {
        if label.unit != self.unit {
            return Err(AsmErrorKind::ForeignLabel { index: label.index });
        }
        self.labels
            .get_mut(label.index as usize)
            .ok_or(AsmErrorKind::ForeignLabel { index: label.index })
    }

    /// Bound offset of `label`, or `None` while unbound.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::ForeignLabel`] for handles from another unit.
    pub fn offset(&self, label: Label) -> Result<Option<CodeOffset>, AsmErrorKind> {
        Ok(self.state(label)?.bound)
    }

    /// Fixups still waiting on `label`.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::ForeignLabel`] for handles from another unit.
    pub fn pending(&self, label: Label) -> Result<&[Fixup], AsmErrorKind> {
        Ok(&self.state(label)?.fixups)
    }

    /// Records a branch that must be patched when `label` is bound.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::ForeignLabel`] for handles from another unit,
    /// or [`AsmErrorKind::LabelAlreadyBound`] if the label is already bound.
    pub fn add_fixup(&mut self, label: Label, fixup: Fixup) -> Result<(), AsmErrorKind> {
        let state = self.state_mut(label)?;
        if let Some(offset) = state.bound {
            return Err(AsmErrorKind::LabelAlreadyBound {
                index: label.index,
                offset,
            });
        }
        state.fixups.push(fixup);
        Ok(())
    }

    /// Binds `label` to `offset` and hands back its pending fixups.
    ///
    /// # Errors
    ///
    /// Returns [`AsmErrorKind::LabelAlreadyBound`] on a second bind, or
    /// [`AsmErrorKind::ForeignLabel`].
    pub fn bind(&mut self, label: Label, offset: CodeOffset) -> Result<Vec<Fixup>, AsmErrorKind> {
        let state = self.state_mut(label)?;
        if let Some(previous) = state.bound {
            return Err(AsmErrorKind::LabelAlreadyBound {
                index: label.index,
                offset: previous,
            });
        }
        state.bound = Some(offset);
        let fixups = std::mem::take(&mut state.fixups);
        trace!(
            "LabelTable[{}]: bind label {} at {offset:#x}, {} fixups",
            self.unit,
            label.index,
            fixups.len()
        );
        Ok(fixups)
    }

    /// First label that was never bound, with its pending fixup count.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn first_unbound(&self) -> Option<(u32, usize)> {
        self.labels
            .iter()
            .enumerate()
            .find(|(_, state)| state.bound.is_none())
            .map(|(index, state)| (index as u32, state.fixups.len()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SITE: Fixup = Fixup {
        offset: 8,
        kind: FixupKind::Branch24,
    };

    #[test]
    fn bind_returns_pending_fixups_once() {
        let mut table = LabelTable::new();
        let label = table.create();
        table.add_fixup(label, SITE).unwrap();
        table.add_fixup(label, Fixup { offset: 16, ..SITE }).unwrap();
        assert_eq!(table.pending(label).unwrap().len(), 2);

        let fixups = table.bind(label, 32).unwrap();
        assert_eq!(fixups.len(), 2);
        assert_eq!(table.offset(label), Ok(Some(32)));
        assert!(table.pending(label).unwrap().is_empty());
    }

    #[test]
    fn second_bind_is_rejected() {
        let mut table = LabelTable::new();
        let label = table.create();
        table.bind(label, 4).unwrap();
        assert_eq!(
            table.bind(label, 8),
            Err(AsmErrorKind::LabelAlreadyBound { index: 0, offset: 4 })
        );
        assert!(table.add_fixup(label, SITE).is_err());
    }

    #[test]
    fn labels_from_other_units_are_foreign() {
        let mut ours = LabelTable::new();
        let mut theirs = LabelTable::new();
        let _ = ours.create();
        let foreign = theirs.create();
        assert_eq!(
            ours.offset(foreign),
            Err(AsmErrorKind::ForeignLabel { index: 0 })
        );
        assert!(ours.bind(foreign, 0).is_err());
    }

    #[test]
    fn first_unbound_reports_pending_count() {
        let mut table = LabelTable::new();
        let bound = table.create();
        let open = table.create();
        table.bind(bound, 0).unwrap();
        assert_eq!(table.first_unbound(), Some((1, 0)));
        table.add_fixup(open, SITE).unwrap();
        assert_eq!(table.first_unbound(), Some((1, 1)));
        table.bind(open, 12).unwrap();
        assert_eq!(table.first_unbound(), None);
    }
}
