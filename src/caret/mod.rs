//! Multi-caret set
//!
//! An ordered set of non-overlapping selections. Carets are stored with
//! their selection begin *relative to the end of the previous selection*,
//! and the tree aggregates the sum of those offsets plus lengths, so both
//! position lookups and whole-set shifts are O(log n). Touching carets are
//! merged on insertion unless both carry a selection. A set always holds at
//! least one caret.

use crate::buffer::{ModificationPosition, PatchStrategy, PositionPatcher};
use crate::error::{Error, Result};
use crate::tree::{Augment, Branch, Cursor, Tree};


/// A caret with its selection, in absolute character positions. The caret
/// itself sits at `begin + caret_offset`, with `caret_offset` in
/// `[0, length]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    pub begin: usize,
    pub length: usize,
    pub caret_offset: usize,
}

impl Selection {
    /// A bare caret at `pos`.
    pub fn cursor(pos: usize) -> Selection {
        Selection {
            begin: pos,
            length: 0,
            caret_offset: 0,
        }
    }

    /// A selection spanning `[begin, end)` with the caret at `end`.
    pub fn range(begin: usize, end: usize) -> Selection {
        Selection {
            begin,
            length: end - begin,
            caret_offset: end - begin,
        }
    }

    pub fn end(&self) -> usize {
        self.begin + self.length
    }

    pub fn caret_position(&self) -> usize {
        self.begin + self.caret_offset
    }

    pub fn has_selection(&self) -> bool {
        self.length > 0
    }
}

/// Per-caret state preserved across edits and vertical motion.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaretData {
    /// Visual column targeted during vertical caret movement.
    pub alignment: f64,
    /// When the caret sits exactly on a soft linebreak, whether it belongs
    /// to the line after the break rather than the one before.
    pub after_break: bool,
}

impl Default for CaretData {
    fn default() -> Self {
        CaretData {
            alignment: 0.0,
            after_break: false,
        }
    }
}

struct CaretRecord {
    /// Selection begin, relative to the end of the previous selection.
    begin_offset: usize,
    length: usize,
    caret_offset: usize,
    data: CaretData,
}

impl CaretRecord {
    fn total_offset(&self) -> usize {
        self.begin_offset + self.length
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
struct CaretSynth {
    offset_sum: usize,
}

impl Augment for CaretRecord {
    type Synth = CaretSynth;

    fn synthesize(&self, left: Option<&CaretSynth>, right: Option<&CaretSynth>) -> CaretSynth {
        CaretSynth {
            offset_sum: self.total_offset()
                + left.map_or(0, |s| s.offset_sum)
                + right.map_or(0, |s| s.offset_sum),
        }
    }
}

/// A cursor into the set plus the absolute end of the previous selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaretPos {
    cursor: Cursor,
    prev_end: usize,
}

impl CaretPos {
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn is_end(&self) -> bool {
        self.cursor.is_end()
    }
}

pub struct CaretSet {
    tree: Tree<CaretRecord>,
}

impl Default for CaretSet {
    fn default() -> Self {
        Self::new()
    }
}

impl CaretSet {
    /// A set holding one bare caret at the front of the document.
    pub fn new() -> Self {
        let mut tree = Tree::new();
        tree.push_back(CaretRecord {
            begin_offset: 0,
            length: 0,
            caret_offset: 0,
            data: CaretData::default(),
        });
        CaretSet { tree }
    }

    /// Drops all carets, leaving one at the front of the document.
    pub fn reset(&mut self) {
        self.tree.clear();
        self.tree.push_back(CaretRecord {
            begin_offset: 0,
            length: 0,
            caret_offset: 0,
            data: CaretData::default(),
        });
    }

    pub fn count(&self) -> usize {
        self.tree.len()
    }

    /// Position of the first caret.
    pub fn begin(&self) -> CaretPos {
        CaretPos {
            cursor: self.tree.first(),
            prev_end: 0,
        }
    }

    /// The absolute selection at `at`.
    pub fn selection(&self, at: CaretPos) -> Result<Selection> {
        let rec = self.tree.get(at.cursor)?;
        Ok(Selection {
            begin: at.prev_end + rec.begin_offset,
            length: rec.length,
            caret_offset: rec.caret_offset,
        })
    }

    pub fn data(&self, at: CaretPos) -> Result<&CaretData> {
        Ok(&self.tree.get(at.cursor)?.data)
    }

    /// Updates the per-caret data at `at`.
    pub fn set_data(&mut self, at: CaretPos, data: CaretData) -> Result<()> {
        self.tree.update(at.cursor, |r| r.data = data)
    }

    pub fn move_next(&self, at: CaretPos) -> CaretPos {
        match self.tree.get(at.cursor) {
            Ok(rec) => CaretPos {
                cursor: self.tree.next(at.cursor).unwrap_or(at.cursor),
                prev_end: at.prev_end + rec.total_offset(),
            },
            Err(_) => at,
        }
    }

    /// Iterates carets in order as absolute selections with their data.
    pub fn iter(&self) -> CaretIter<'_> {
        CaretIter {
            set: self,
            at: self.begin(),
        }
    }

    /// First caret whose selection end is at or after `pos`.
    pub fn find_first_ending_at_or_after(&self, pos: usize) -> CaretPos {
        let mut remaining = pos;
        let mut acc = 0;
        let cursor = self.tree.find_custom(|rec, left, _| {
            let left_sum = left.map_or(0, |s| s.offset_sum);
            if remaining <= left_sum {
                return Branch::Left;
            }
            remaining -= left_sum;
            acc += left_sum;
            if remaining <= rec.total_offset() {
                Branch::Stop
            } else {
                remaining -= rec.total_offset();
                acc += rec.total_offset();
                Branch::Right
            }
        });
        CaretPos {
            cursor,
            prev_end: acc,
        }
    }

    /// Adds a caret, merging it with any caret whose selection intersects
    /// it. Two carets that merely touch are left unmerged only when both
    /// have selections. Returns the position of the inserted caret and
    /// whether any merge happened.
    pub fn add(&mut self, caret: Selection, data: CaretData) -> (CaretPos, bool) {
        let has_selection = caret.has_selection();
        let range_end = caret.end();

        let mut first = self.find_first_ending_at_or_after(caret.begin);
        if !first.cursor.is_end() {
            let isect = self.selection(first).expect("own cursor");
            if isect.end() == caret.begin && has_selection && isect.has_selection() {
                first = self.move_next(first);
            }
        }

        let mut new_begin = caret.begin;
        let mut new_end = range_end;
        let mut last = first;
        while !last.cursor.is_end() {
            let cur = self.selection(last).expect("own cursor");
            if cur.begin > range_end {
                break;
            }
            if cur.begin == range_end && has_selection && cur.has_selection() {
                break;
            }
            new_begin = new_begin.min(cur.begin);
            new_end = new_end.max(cur.end());
            last = self.move_next(last);
        }

        let has_merged = first.cursor != last.cursor;
        if has_merged {
            self.tree
                .erase_range(first.cursor, last.cursor)
                .expect("own cursors");
        }

        if !last.cursor.is_end() {
            // the survivor's begin is now relative to the merged selection
            let abs_begin = last.prev_end
                + self.tree.get(last.cursor).expect("own cursor").begin_offset;
            self.tree
                .update(last.cursor, |r| r.begin_offset = abs_begin - new_end)
                .expect("own cursor");
        }

        let mut inserted = caret;
        if has_merged {
            inserted.caret_offset = caret.begin + caret.caret_offset - new_begin;
            inserted.length = new_end - new_begin;
            inserted.begin = new_begin;
        }
        let cursor = self
            .tree
            .insert_before(
                last.cursor,
                CaretRecord {
                    begin_offset: inserted.begin - first.prev_end,
                    length: inserted.length,
                    caret_offset: inserted.caret_offset,
                    data,
                },
            )
            .expect("own cursor");
        (
            CaretPos {
                cursor,
                prev_end: first.prev_end,
            },
            has_merged,
        )
    }

    /// Removes the caret at `at`; fails when it is the last one. Absolute
    /// positions of the remaining carets are unchanged.
    pub fn remove(&mut self, at: CaretPos) -> Result<()> {
        if self.tree.len() <= 1 {
            return Err(Error::EmptyCaretSet);
        }
        let total = self.tree.get(at.cursor)?.total_offset();
        let next = self.tree.erase(at.cursor)?;
        if !next.is_end() {
            self.tree
                .update(next, |r| r.begin_offset += total)
                .expect("own cursor");
        }
        Ok(())
    }

    /// Whether `pos` lies inside any selection. Boundary positions count
    /// as inside according to `include_start`/`include_end`.
    pub fn is_in_selection(&self, pos: usize, include_start: bool, include_end: bool) -> bool {
        let mut cur = self.find_first_ending_at_or_after(pos);
        while !cur.cursor.is_end() {
            let sel = self.selection(cur).expect("own cursor");
            if sel.begin > pos {
                break;
            }
            if sel.has_selection() {
                let front_ok = if include_start {
                    sel.begin <= pos
                } else {
                    sel.begin < pos
                };
                let rear_ok = if include_end {
                    pos <= sel.end()
                } else {
                    pos < sel.end()
                };
                if front_ok && rear_ok {
                    return true;
                }
            }
            cur = self.move_next(cur);
        }
        false
    }

    /// Re-projects every caret across an edit using its character-level
    /// patch table: the caret head patches with the `back` strategy, the
    /// anchor with `front`, and carets that collide afterwards are merged.
    /// Per-caret data (alignment, soft-break side) is preserved.
    pub fn fixup_after_edit(&mut self, positions: &[ModificationPosition]) {
        let old: Vec<(Selection, CaretData)> =
            self.iter().map(|(sel, data)| (sel, *data)).collect();
        self.tree.clear();
        let mut patcher = PositionPatcher::new(positions);
        for (sel, data) in old {
            let head_at_end = sel.caret_offset == sel.length;
            let (begin_strategy, end_strategy) = if sel.has_selection() && !head_at_end {
                (PatchStrategy::Back, PatchStrategy::Front)
            } else {
                (PatchStrategy::Front, PatchStrategy::Back)
            };
            let new_sel = if sel.has_selection() {
                let a = patcher.patch_next(sel.begin, begin_strategy);
                let b = patcher.patch_next(sel.end(), end_strategy);
                let (begin, end) = if a <= b { (a, b) } else { (b, a) };
                let length = end - begin;
                Selection {
                    begin,
                    length,
                    caret_offset: if head_at_end {
                        length
                    } else {
                        sel.caret_offset.min(length)
                    },
                }
            } else {
                Selection::cursor(patcher.patch_next(sel.begin, PatchStrategy::Back))
            };
            self.add(new_sel, data);
        }
        if self.tree.is_empty() {
            self.reset();
        }
    }

    /// Validates ordering and overlap invariants.
    pub fn check_integrity(&self) -> bool {
        if self.tree.is_empty() || !self.tree.check_integrity() {
            return false;
        }
        let mut prev_end: Option<(usize, bool)> = None;
        for (sel, _) in self.iter() {
            if let Some((end, had_selection)) = prev_end {
                if sel.begin < end {
                    return false;
                }
                if sel.begin == end && !(had_selection && sel.has_selection()) {
                    return false;
                }
            }
            if sel.caret_offset > sel.length {
                return false;
            }
            prev_end = Some((sel.end(), sel.has_selection()));
        }
        true
    }
}

/// Iterator over `(absolute selection, data)` pairs.
pub struct CaretIter<'a> {
    set: &'a CaretSet,
    at: CaretPos,
}

impl<'a> Iterator for CaretIter<'a> {
    type Item = (Selection, &'a CaretData);

    fn next(&mut self) -> Option<Self::Item> {
        let rec = self.set.tree.get(self.at.cursor).ok()?;
        let sel = Selection {
            begin: self.at.prev_end + rec.begin_offset,
            length: rec.length,
            caret_offset: rec.caret_offset,
        };
        self.at = self.set.move_next(self.at);
        Some((sel, &rec.data))
    }
}
