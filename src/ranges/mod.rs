//! Overlapping-range registry
//!
//! Stores a series of possibly-overlapping ranges ordered by start. Each
//! node is keyed by the offset of its start from the *start* of the
//! previous range, and subtrees synthesize both the offset sum and the
//! maximum end position — the interval-tree augmentation that makes point
//! and range intersection queries O(log n + k).

use crate::tree::{Augment, Branch, Cursor, Tree};

pub mod theme;
#[cfg(test)]
mod tests;

/// A stored range: `offset` from the previous range's start, plus `length`.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeRecord<T> {
    pub value: T,
    pub offset: usize,
    pub length: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RangeSynth {
    /// Sum of all offsets in the subtree.
    pub offset_sum: usize,
    /// Maximum end position in the subtree, measured from the start of the
    /// range preceding the subtree.
    pub max_end: usize,
}

impl<T> Augment for RangeRecord<T> {
    type Synth = RangeSynth;

    fn synthesize(&self, left: Option<&RangeSynth>, right: Option<&RangeSynth>) -> RangeSynth {
        let mut max_end = left.map_or(0, |s| s.max_end);
        let mut base = left.map_or(0, |s| s.offset_sum);
        base += self.offset;
        max_end = max_end.max(base + self.length);
        if let Some(r) = right {
            max_end = max_end.max(base + r.max_end);
        }
        RangeSynth {
            offset_sum: base + right.map_or(0, |s| s.offset_sum),
            max_end,
        }
    }
}

/// A cursor into the registry plus the start position of the *previous*
/// range, from which the current range's absolute start is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IterPos {
    cursor: Cursor,
    prev_start: usize,
}

impl IterPos {
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    pub fn is_end(&self) -> bool {
        self.cursor.is_end()
    }
}

/// Result of a point intersection query.
pub struct PointQuery {
    /// First range that may intersect the point; iterate with
    /// [`OverlappingRanges::find_next_ending_after`] to skip false
    /// positives.
    pub begin: IterPos,
    /// Past the last range that can intersect the point.
    pub end: IterPos,
}

/// Result of a range intersection query.
pub struct RangeQuery {
    /// First range ending at or after the queried start; elements up to
    /// `begin` potentially intersect but need testing via
    /// [`OverlappingRanges::find_next_ending_after`].
    pub before_begin: IterPos,
    /// First range starting inside the queried range.
    pub begin: IterPos,
    /// Past the last range starting inside the queried range.
    pub end: IterPos,
}

pub struct OverlappingRanges<T> {
    tree: Tree<RangeRecord<T>>,
}

impl<T> Default for OverlappingRanges<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> OverlappingRanges<T> {
    pub fn new() -> Self {
        OverlappingRanges { tree: Tree::new() }
    }

    pub fn len(&self) -> usize {
        self.tree.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    pub fn clear(&mut self) {
        self.tree.clear();
    }

    /// The record at an iterator position.
    pub fn record(&self, at: IterPos) -> Option<&RangeRecord<T>> {
        self.tree.get(at.cursor).ok()
    }

    /// Absolute start of the range at `at`.
    pub fn range_start(&self, at: IterPos) -> usize {
        let offset = self
            .tree
            .get(at.cursor)
            .map(|r| r.offset)
            .unwrap_or_default();
        at.prev_start + offset
    }

    /// Iterator position of the first range.
    pub fn begin_position(&self) -> IterPos {
        IterPos {
            cursor: self.tree.first(),
            prev_start: 0,
        }
    }

    /// Advances to the next range, tracking the previous start.
    pub fn move_next(&self, at: IterPos) -> IterPos {
        let offset = self
            .tree
            .get(at.cursor)
            .map(|r| r.offset)
            .unwrap_or_default();
        IterPos {
            cursor: self.tree.next(at.cursor).unwrap_or(at.cursor),
            prev_start: at.prev_start + offset,
        }
    }

    /// Iterates all ranges as `(start, length, value)`.
    pub fn iter(&self) -> RangesIter<'_, T> {
        RangesIter {
            ranges: self,
            at: self.begin_position(),
        }
    }

    /// Inserts a range; among ranges starting at the same position the new
    /// one comes first.
    pub fn insert(&mut self, start: usize, length: usize, value: T) -> IterPos {
        let before = self.find_first_start_at_or_after(start);
        let insert_offset = start - before.prev_start;
        if !before.cursor.is_end() {
            self.tree
                .update(before.cursor, |r| r.offset -= insert_offset)
                .expect("own cursor");
        }
        let cursor = self
            .tree
            .insert_before(
                before.cursor,
                RangeRecord {
                    value,
                    offset: insert_offset,
                    length,
                },
            )
            .expect("own cursor");
        IterPos {
            cursor,
            prev_start: before.prev_start,
        }
    }

    /// Erases the range at `at`, preserving the positions of later ranges.
    pub fn erase(&mut self, at: IterPos) {
        let offset = match self.tree.get(at.cursor) {
            Ok(r) => r.offset,
            Err(_) => return,
        };
        let next = self.tree.erase(at.cursor).expect("own cursor");
        if !next.is_end() {
            self.tree
                .update(next, |r| r.offset += offset)
                .expect("own cursor");
        }
    }

    /// Finds the ranges that may contain `point`.
    pub fn find_intersecting(&self, point: usize) -> PointQuery {
        PointQuery {
            begin: self.find_first_ending_at_or_after(point),
            end: self.find_first_start_after(point),
        }
    }

    /// Finds the ranges that may intersect `[begin, past_end)`.
    pub fn find_intersecting_range(&self, begin: usize, past_end: usize) -> RangeQuery {
        RangeQuery {
            before_begin: self.find_first_ending_at_or_after(begin),
            begin: self.find_first_start_at_or_after(begin),
            end: self.find_first_start_after(past_end),
        }
    }

    /// Given a position on a range, finds the next range (itself excluded)
    /// ending at or after `begin`, using the max-end augmentation to skip
    /// whole subtrees.
    pub fn find_next_ending_after(&self, begin: usize, at: IterPos) -> IterPos {
        let tree = &self.tree;
        let mut pos = at.prev_start;
        let mut cur = at.cursor;
        loop {
            let right = tree.right(cur).expect("valid cursor");
            let right_reaches = !right.is_end() && {
                let own_offset = tree.get(cur).expect("valid cursor").offset;
                pos + own_offset + tree.synth(right).expect("valid").max_end >= begin
            };
            if right_reaches {
                break;
            }
            // the right subtree cannot contain the target: climb to the
            // next in-order ancestor
            while !cur.is_end() && tree.is_right_child(cur).unwrap_or(false) {
                let left = tree.left(cur).expect("valid cursor");
                if !left.is_end() {
                    pos -= tree.synth(left).expect("valid").offset_sum;
                }
                let parent = tree.parent(cur).expect("valid cursor");
                pos -= tree.get(parent).expect("valid").offset;
                cur = parent;
            }
            let parent = tree.parent(cur).expect("valid cursor");
            if parent.is_end() {
                // no next range: return the end position
                return IterPos {
                    cursor: tree.end(),
                    prev_start: tree.root_synth().map_or(0, |s| s.offset_sum),
                };
            }
            pos += tree.get(cur).expect("valid").offset;
            let right = tree.right(cur).expect("valid cursor");
            if !right.is_end() {
                pos += tree.synth(right).expect("valid").offset_sum;
            }
            cur = parent;
            // moved to the next in-order element; take it if it ends late
            // enough, otherwise keep scanning from here
            let rec = tree.get(cur).expect("valid cursor");
            if pos + rec.offset + rec.length >= begin {
                return IterPos {
                    cursor: cur,
                    prev_start: pos,
                };
            }
        }
        // the right subtree contains the answer
        let own_offset = tree.get(cur).expect("valid cursor").offset;
        let mut sub = tree.right(cur).expect("valid cursor");
        let mut base = pos + own_offset;
        if begin <= base {
            // every element there ends at or after begin: take the leftmost
            loop {
                let left = tree.left(sub).expect("valid cursor");
                if left.is_end() {
                    break;
                }
                sub = left;
            }
            return IterPos {
                cursor: sub,
                prev_start: base,
            };
        }
        // descend with the extent rule inside the subtree
        let mut remaining = begin - base;
        loop {
            let left = tree.left(sub).expect("valid cursor");
            if !left.is_end() {
                let ls = tree.synth(left).expect("valid");
                if remaining <= ls.max_end {
                    sub = left;
                    continue;
                }
                remaining -= ls.offset_sum;
                base += ls.offset_sum;
            }
            let rec = tree.get(sub).expect("valid cursor");
            if remaining <= rec.offset + rec.length {
                return IterPos {
                    cursor: sub,
                    prev_start: base,
                };
            }
            remaining -= rec.offset;
            base += rec.offset;
            sub = tree.right(sub).expect("valid cursor");
        }
    }

    /// Patches every range across one modification: ranges fully inside the
    /// erased region are removed, partially covered ones are truncated, and
    /// later ones shift.
    pub fn on_modification(&mut self, start: usize, removed: usize, inserted: usize) {
        let erase_end = start + removed;
        let char_diff = inserted.wrapping_sub(removed);
        let query = self.find_intersecting_range(start, erase_end);

        // ranges starting before `start`
        let mut before = query.before_begin;
        while before.cursor != query.begin.cursor {
            let rec_len = self.tree.get(before.cursor).expect("valid").length;
            let end = self.range_start(before) + rec_len;
            if end > erase_end {
                self.tree
                    .update(before.cursor, |r| r.length = r.length.wrapping_add(char_diff))
                    .expect("own cursor");
            } else {
                // truncated to the edit start
                self.tree
                    .update(before.cursor, |r| r.length -= end - start)
                    .expect("own cursor");
            }
            before = self.find_next_ending_after(start, before);
        }

        if query.begin.cursor.is_end() {
            return;
        }
        // ranges starting at or after `start`
        let mut blank_inserted = false;
        let additional_offset = start - query.begin.prev_start;
        let mut cur = query.begin;
        while cur.cursor != query.end.cursor {
            let rec = self.tree.get(cur.cursor).expect("valid");
            let rec_len = rec.length;
            let end = self.range_start(cur) + rec_len;
            let next = self.move_next(cur);
            if end <= erase_end {
                // fully erased
                self.tree.erase(cur.cursor).expect("own cursor");
            } else {
                let diff = erase_end - self.range_start(cur);
                let offset = if blank_inserted {
                    0
                } else {
                    blank_inserted = true;
                    additional_offset + inserted
                };
                self.tree
                    .update(cur.cursor, |r| {
                        r.length -= diff;
                        r.offset = offset;
                    })
                    .expect("own cursor");
            }
            cur = next;
        }
        if !cur.cursor.is_end() {
            let mut end_offset = self.range_start(cur) - erase_end;
            if !blank_inserted {
                end_offset += additional_offset + inserted;
            }
            self.tree
                .update(cur.cursor, |r| r.offset = end_offset)
                .expect("own cursor");
        }
    }

    // ---- finders -------------------------------------------------------

    /// First range whose start is `>= target`.
    fn find_first_start_at_or_after(&self, target: usize) -> IterPos {
        let mut remaining = target;
        let mut acc = 0;
        let cursor = self.tree.find_custom(|rec, left, _| {
            let left_sum = left.map_or(0, |s| s.offset_sum);
            if remaining <= left_sum {
                return Branch::Left;
            }
            remaining -= left_sum;
            acc += left_sum;
            if remaining <= rec.offset {
                Branch::Stop
            } else {
                remaining -= rec.offset;
                acc += rec.offset;
                Branch::Right
            }
        });
        IterPos {
            cursor,
            prev_start: acc,
        }
    }

    /// First range whose start is `> target`.
    fn find_first_start_after(&self, target: usize) -> IterPos {
        let mut remaining = target;
        let mut acc = 0;
        let cursor = self.tree.find_custom(|rec, left, _| {
            let left_sum = left.map_or(0, |s| s.offset_sum);
            if remaining < left_sum {
                return Branch::Left;
            }
            remaining -= left_sum;
            acc += left_sum;
            if remaining < rec.offset {
                Branch::Stop
            } else {
                remaining -= rec.offset;
                acc += rec.offset;
                Branch::Right
            }
        });
        IterPos {
            cursor,
            prev_start: acc,
        }
    }

    /// First range whose end is `>= target`, via the max-end field.
    fn find_first_ending_at_or_after(&self, target: usize) -> IterPos {
        let mut remaining = target;
        let mut acc = 0;
        let cursor = self.tree.find_custom(|rec, left, _| {
            if let Some(ls) = left {
                if remaining <= ls.max_end {
                    return Branch::Left;
                }
                remaining -= ls.offset_sum;
                acc += ls.offset_sum;
            }
            if remaining <= rec.offset + rec.length {
                Branch::Stop
            } else {
                remaining -= rec.offset;
                acc += rec.offset;
                Branch::Right
            }
        });
        IterPos {
            cursor,
            prev_start: acc,
        }
    }
}

/// Iterator yielding `(start, length, &value)` in order.
pub struct RangesIter<'a, T> {
    ranges: &'a OverlappingRanges<T>,
    at: IterPos,
}

impl<'a, T> Iterator for RangesIter<'a, T> {
    type Item = (usize, usize, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let rec = self.ranges.tree.get(self.at.cursor).ok()?;
        let start = self.at.prev_start + rec.offset;
        let item = (start, rec.length, &rec.value);
        self.at = self.ranges.move_next(self.at);
        Some(item)
    }
}
