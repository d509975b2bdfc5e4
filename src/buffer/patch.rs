//! Position patching after edits
//!
//! An edit publishes the ordered `(position, removed, added)` table of its
//! modifications; a [`PositionPatcher`] walks that table once and projects
//! a non-decreasing series of old positions onto the edited document.

/// Position information of one modification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModificationPosition {
    /// Position of the modification, after all previous modifications of
    /// the same edit.
    pub position: usize,
    /// Length of the removed range.
    pub removed: usize,
    /// Length of the added range.
    pub added: usize,
}

/// How to adjust a position that lies inside a removed region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchStrategy {
    /// Collapse onto the front of the replaced region.
    Front,
    /// Collapse onto the back of the added region.
    Back,
    /// Keep the relative offset where possible, clamped to the added range.
    TryKeep,
}

/// Adjusts an ordered sequence of positions across one edit. Queries must
/// be issued with non-decreasing positions; call [`PositionPatcher::reset`]
/// to start a new series.
pub struct PositionPatcher<'a> {
    positions: &'a [ModificationPosition],
    next: usize,
    /// Accumulated old-to-new difference; may wrap, which still works as
    /// intended.
    diff: usize,
}

impl<'a> PositionPatcher<'a> {
    pub fn new(positions: &'a [ModificationPosition]) -> Self {
        PositionPatcher {
            positions,
            next: 0,
            diff: 0,
        }
    }

    pub fn reset(&mut self) {
        self.next = 0;
        self.diff = 0;
    }

    /// Patches the next position of the series. Modifications that removed
    /// nothing still capture positions lying exactly on the insertion
    /// point.
    pub fn patch_next(&mut self, pos: usize, strategy: PatchStrategy) -> usize {
        let mut pos = pos.wrapping_add(self.diff);
        while let Some(m) = self.positions.get(self.next) {
            if pos < m.position + m.removed.max(1) {
                break;
            }
            let ndiff = m.added.wrapping_sub(m.removed);
            pos = pos.wrapping_add(ndiff);
            self.diff = self.diff.wrapping_add(ndiff);
            self.next += 1;
        }
        if let Some(m) = self.positions.get(self.next) {
            if pos >= m.position + m.removed.min(1) {
                pos = match strategy {
                    PatchStrategy::Front => m.position,
                    PatchStrategy::Back => m.position + m.added,
                    PatchStrategy::TryKeep => pos.min(m.position + m.added),
                };
            }
        }
        pos
    }
}
