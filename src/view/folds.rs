//! Fold registry
//!
//! Records collapsed character ranges. Each node stores the gap to the
//! previous fold and its own folded span, both in characters and in
//! visual lines, so conversions between folded and unfolded coordinates
//! are single descents. Before an edit, byte positions of every fold are
//! cached; afterwards they are re-projected through the byte patch table
//! and converted back, dropping folds whose range vanished.

use log::debug;

use crate::buffer::{ModificationPosition, PatchStrategy, PositionPatcher};
use crate::interp::CharByteConverter;
use crate::tree::{Augment, Branch, Cursor, Tree};

/// A fold region in absolute coordinates, used for insertion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldRegion {
    pub begin: usize,
    pub end: usize,
    pub begin_line: usize,
    pub end_line: usize,
}

/// One fold record: the unfolded gap before it plus its folded extent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FoldRecord {
    /// Characters between the end of the previous fold and this one.
    pub gap: usize,
    /// Folded characters.
    pub length: usize,
    /// Visual lines (soft and hard) covered by `gap`.
    pub gap_lines: usize,
    /// Visual lines covered by the folded range; these are hard lines.
    pub folded_lines: usize,
    /// Cached byte positions, valid after `prepare_for_edit`.
    pub byte_first: usize,
    pub byte_second: usize,
}

impl FoldRecord {
    fn span(&self) -> usize {
        self.gap + self.length
    }

    fn line_span(&self) -> usize {
        self.gap_lines + self.folded_lines
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FoldSynth {
    pub span: usize,
    pub folded_chars: usize,
    pub lines: usize,
    pub folded_lines: usize,
    pub count: usize,
}

impl Augment for FoldRecord {
    type Synth = FoldSynth;

    fn synthesize(&self, left: Option<&FoldSynth>, right: Option<&FoldSynth>) -> FoldSynth {
        let mut s = FoldSynth {
            span: self.span(),
            folded_chars: self.length,
            lines: self.line_span(),
            folded_lines: self.folded_lines,
            count: 1,
        };
        for side in [left, right].into_iter().flatten() {
            s.span += side.span;
            s.folded_chars += side.folded_chars;
            s.lines += side.lines;
            s.folded_lines += side.folded_lines;
            s.count += side.count;
        }
        s
    }
}

/// A fold plus the character and line totals before it.
#[derive(Debug, Clone, Copy)]
pub struct FoldInfo {
    pub cursor: Cursor,
    pub prev_chars: usize,
    pub prev_lines: usize,
}

pub struct FoldRegistry {
    tree: Tree<FoldRecord>,
    bytes_valid: bool,
}

impl Default for FoldRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl FoldRegistry {
    pub fn new() -> Self {
        FoldRegistry {
            tree: Tree::new(),
            bytes_valid: false,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Number of folded regions.
    pub fn count(&self) -> usize {
        self.tree.root_synth().map_or(0, |s| s.count)
    }

    /// Number of linebreaks hidden by folds.
    pub fn folded_linebreaks(&self) -> usize {
        self.tree.root_synth().map_or(0, |s| s.folded_lines)
    }

    pub fn record(&self, cursor: Cursor) -> Option<&FoldRecord> {
        self.tree.get(cursor).ok()
    }

    /// Iterates folds as `(begin, end)` character ranges.
    pub fn iter_regions(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        let mut acc = 0;
        self.tree.iter().map(move |rec| {
            let begin = acc + rec.gap;
            let end = begin + rec.length;
            acc = end;
            (begin, end)
        })
    }

    // ---- folded <-> unfolded bijections --------------------------------

    /// Line index in the folded document for an unfolded line index.
    /// Lines inside a fold collapse onto the fold's line.
    pub fn unfolded_to_folded_line(&self, line: usize) -> usize {
        let (cursor, remaining, total_unfolded) =
            self.descend_strict(line, |r| r.line_span(), |s| s.lines, |r| r.gap_lines, |s| {
                s.lines - s.folded_lines
            });
        let mut remaining = remaining;
        if let Ok(rec) = self.tree.get(cursor) {
            remaining = remaining.min(rec.gap_lines);
        }
        total_unfolded + remaining
    }

    /// Inverse of [`FoldRegistry::unfolded_to_folded_line`].
    pub fn folded_to_unfolded_line(&self, line: usize) -> usize {
        let (_, remaining, total) = self.descend_inclusive(
            line,
            |r| r.gap_lines,
            |s| s.lines - s.folded_lines,
            |r| r.line_span(),
            |s| s.lines,
        );
        total + remaining
    }

    /// Caret position in the folded document for an unfolded position.
    pub fn unfolded_to_folded_pos(&self, pos: usize) -> usize {
        let (cursor, remaining, total_unfolded) =
            self.descend_strict(pos, |r| r.span(), |s| s.span, |r| r.gap, |s| {
                s.span - s.folded_chars
            });
        let mut remaining = remaining;
        if let Ok(rec) = self.tree.get(cursor) {
            remaining = remaining.min(rec.gap);
        }
        total_unfolded + remaining
    }

    /// Inverse of [`FoldRegistry::unfolded_to_folded_pos`].
    pub fn folded_to_unfolded_pos(&self, pos: usize) -> usize {
        let (_, remaining, total) = self.descend_inclusive(
            pos,
            |r| r.gap,
            |s| s.span - s.folded_chars,
            |r| r.span(),
            |s| s.span,
        );
        total + remaining
    }

    /// First unfolded line of the folded-line group containing `line`.
    pub fn folded_group_first_line(&self, line: usize) -> usize {
        self.folded_to_unfolded_line(self.unfolded_to_folded_line(line))
    }

    /// Past the last unfolded line of the folded-line group containing
    /// `line`.
    pub fn folded_group_past_last_line(&self, line: usize) -> usize {
        self.folded_to_unfolded_line(self.unfolded_to_folded_line(line) + 1)
    }

    // ---- containment queries -------------------------------------------

    /// The fold strictly containing `pos` (both endpoints excluded).
    pub fn find_region_containing_open(&self, pos: usize) -> Option<FoldInfo> {
        let (cursor, remaining, prev_chars, prev_lines) = self.find_region::<false>(pos);
        match self.tree.get(cursor) {
            Ok(rec) if remaining > rec.gap => Some(FoldInfo {
                cursor,
                prev_chars,
                prev_lines,
            }),
            _ => None,
        }
    }

    /// The fold containing `pos`, endpoints included; of two touching
    /// folds the earlier one wins.
    pub fn find_region_containing_closed(&self, pos: usize) -> Option<FoldInfo> {
        let (cursor, remaining, prev_chars, prev_lines) = self.find_region::<true>(pos);
        match self.tree.get(cursor) {
            Ok(rec) if remaining >= rec.gap => Some(FoldInfo {
                cursor,
                prev_chars,
                prev_lines,
            }),
            _ => None,
        }
    }

    /// Like the open query, but falls back to the first fold after `pos`.
    pub fn find_region_containing_or_first_after_open(&self, pos: usize) -> FoldInfo {
        let (cursor, _, prev_chars, prev_lines) = self.find_region::<false>(pos);
        FoldInfo {
            cursor,
            prev_chars,
            prev_lines,
        }
    }

    /// Like the open query, but falls back to the first fold before `pos`;
    /// `None` when `pos` precedes every fold.
    pub fn find_region_containing_or_first_before_open(&self, pos: usize) -> Option<FoldInfo> {
        let (cursor, remaining, mut prev_chars, mut prev_lines) = self.find_region::<true>(pos);
        let before_this = match self.tree.get(cursor) {
            Ok(rec) => remaining <= rec.gap,
            Err(_) => true,
        };
        let mut cursor = cursor;
        if before_this {
            if cursor == self.tree.first() {
                return None;
            }
            cursor = if cursor.is_end() {
                self.tree.last()
            } else {
                self.tree.prev(cursor).expect("not first")
            };
            let rec = self.tree.get(cursor).expect("fold cursor");
            prev_chars -= rec.span();
            prev_lines -= rec.line_span();
        }
        Some(FoldInfo {
            cursor,
            prev_chars,
            prev_lines,
        })
    }

    // ---- mutation ------------------------------------------------------

    /// Folds a region, removing any folds it fully or partially covers.
    pub fn add(&mut self, region: FoldRegion) -> Cursor {
        self.bytes_valid = false;
        let begin = self.find_region_containing_or_first_after_open(region.begin);
        let (mut end_cursor, end_prev_chars, end_prev_lines) =
            match self.find_region_containing_or_first_before_open(region.end) {
                Some(info) => {
                    let rec = *self.tree.get(info.cursor).expect("fold cursor");
                    (
                        self.tree.next(info.cursor).expect("fold cursor"),
                        info.prev_chars + rec.span(),
                        info.prev_lines + rec.line_span(),
                    )
                }
                None => (self.tree.first(), 0, 0),
            };
        if !end_cursor.is_end() {
            self.tree
                .update(end_cursor, |r| {
                    r.gap = r
                        .gap
                        .wrapping_add(end_prev_chars)
                        .wrapping_sub(region.end);
                    r.gap_lines = r
                        .gap_lines
                        .wrapping_add(end_prev_lines)
                        .wrapping_sub(region.end_line);
                })
                .expect("own cursor");
        }
        if begin.cursor != end_cursor {
            end_cursor = self
                .tree
                .erase_range(begin.cursor, end_cursor)
                .expect("own cursors");
        }
        self.tree
            .insert_before(
                end_cursor,
                FoldRecord {
                    gap: region.begin - begin.prev_chars,
                    length: region.end - region.begin,
                    gap_lines: region.begin_line - begin.prev_lines,
                    folded_lines: region.end_line - region.begin_line,
                    byte_first: 0,
                    byte_second: 0,
                },
            )
            .expect("own cursor")
    }

    /// Unfolds one region, keeping later folds in place.
    pub fn remove(&mut self, cursor: Cursor) {
        let rec = match self.tree.get(cursor) {
            Ok(rec) => *rec,
            Err(_) => return,
        };
        let next = self.tree.erase(cursor).expect("own cursor");
        if !next.is_end() {
            self.tree
                .update(next, |r| {
                    r.gap += rec.span();
                    r.gap_lines += rec.line_span();
                })
                .expect("own cursor");
        }
    }

    pub fn clear(&mut self) {
        self.tree.clear();
        self.bytes_valid = true;
    }

    // ---- edit fixup ----------------------------------------------------

    /// Caches every fold's byte endpoints so they can be re-projected
    /// after the edit shifts character positions.
    pub fn prepare_for_edit(&mut self, converter: &mut CharByteConverter<'_, '_>) {
        if self.bytes_valid {
            return;
        }
        let mut cursor = self.tree.first();
        let mut pos = 0;
        while !cursor.is_end() {
            let rec = *self.tree.get(cursor).expect("own cursor");
            pos += rec.gap;
            let first = converter.char_to_byte(pos).unwrap_or_default();
            pos += rec.length;
            let second = converter.char_to_byte(pos).unwrap_or_default();
            self.tree
                .update(cursor, |r| {
                    r.byte_first = first;
                    r.byte_second = second;
                })
                .expect("own cursor");
            cursor = self.tree.next(cursor).expect("own cursor");
        }
        self.bytes_valid = true;
    }

    /// Re-projects fold positions through the byte patch table of an edit
    /// and converts them back to characters; folds with an empty new range
    /// are dropped. Line counts must be recalculated afterwards.
    pub fn fixup_after_edit(
        &mut self,
        positions: &[ModificationPosition],
        converter: &mut CharByteConverter<'_, '_>,
    ) {
        if self.tree.is_empty() {
            return;
        }
        let mut patcher = PositionPatcher::new(positions);
        let mut dropped = 0usize;
        let mut last_pos = 0usize;
        let mut cursor = self.tree.first();
        while !cursor.is_end() {
            let rec = *self.tree.get(cursor).expect("own cursor");
            let begin_byte = patcher.patch_next(rec.byte_first, PatchStrategy::Back);
            let end_byte = patcher.patch_next(rec.byte_second, PatchStrategy::Front);
            let mut keep = false;
            if begin_byte < end_byte {
                let begin_char = converter.byte_to_char(begin_byte).unwrap_or_default();
                let end_char = converter.byte_to_char(end_byte).unwrap_or_default();
                if begin_char < end_char {
                    self.tree
                        .update(cursor, |r| {
                            r.gap = begin_char - last_pos;
                            r.length = end_char - begin_char;
                        })
                        .expect("own cursor");
                    last_pos = end_char;
                    keep = true;
                }
            }
            cursor = if keep {
                self.tree.next(cursor).expect("own cursor")
            } else {
                dropped += 1;
                self.tree.erase(cursor).expect("own cursor")
            };
        }
        if dropped > 0 {
            debug!("dropped {} fold(s) emptied by the edit", dropped);
        }
        self.bytes_valid = false;
    }

    /// Rewrites the visual line counts of every fold from a line lookup
    /// (after soft breaks changed or an edit moved fold endpoints).
    pub fn recalc_lines(&mut self, mut visual_line_of_char: impl FnMut(usize) -> usize) {
        let mut cursor = self.tree.first();
        let mut prev_lines = 0;
        let mut total_chars = 0;
        while !cursor.is_end() {
            let rec = *self.tree.get(cursor).expect("own cursor");
            total_chars += rec.gap;
            let begin_line = visual_line_of_char(total_chars);
            total_chars += rec.length;
            let end_line = visual_line_of_char(total_chars);
            self.tree
                .update(cursor, |r| {
                    r.gap_lines = begin_line - prev_lines;
                    r.folded_lines = end_line - begin_line;
                })
                .expect("own cursor");
            prev_lines = end_line;
            cursor = self.tree.next(cursor).expect("own cursor");
        }
    }

    // ---- descents ------------------------------------------------------

    /// Strict descent over a folded+unfolded property pair; accumulates
    /// the other property along the path.
    fn descend_strict(
        &self,
        target: usize,
        span_of: impl Fn(&FoldRecord) -> usize,
        synth_span: impl Fn(&FoldSynth) -> usize,
        gap_of: impl Fn(&FoldRecord) -> usize,
        synth_other: impl Fn(&FoldSynth) -> usize,
    ) -> (Cursor, usize, usize) {
        let mut remaining = target;
        let mut total_other = 0;
        let cursor = self.tree.find_custom(|rec, left, _| {
            let left_span = left.map_or(0, |s| synth_span(s));
            if remaining < left_span {
                return Branch::Left;
            }
            remaining -= left_span;
            total_other += left.map_or(0, |s| synth_other(s));
            if remaining < span_of(rec) {
                Branch::Stop
            } else {
                remaining -= span_of(rec);
                total_other += gap_of(rec);
                Branch::Right
            }
        });
        (cursor, remaining, total_other)
    }

    /// Inclusive descent over the unfolded property, accumulating the full
    /// span property.
    fn descend_inclusive(
        &self,
        target: usize,
        unfolded_of: impl Fn(&FoldRecord) -> usize,
        synth_unfolded: impl Fn(&FoldSynth) -> usize,
        span_of: impl Fn(&FoldRecord) -> usize,
        synth_span: impl Fn(&FoldSynth) -> usize,
    ) -> (Cursor, usize, usize) {
        let mut remaining = target;
        let mut total_span = 0;
        let cursor = self.tree.find_custom(|rec, left, _| {
            let left_unfolded = left.map_or(0, |s| synth_unfolded(s));
            if remaining <= left_unfolded {
                return Branch::Left;
            }
            remaining -= left_unfolded;
            total_span += left.map_or(0, |s| synth_span(s));
            if remaining <= unfolded_of(rec) {
                Branch::Stop
            } else {
                remaining -= unfolded_of(rec);
                total_span += span_of(rec);
                Branch::Right
            }
        });
        (cursor, remaining, total_span)
    }

    /// Descent by character position; `INCLUSIVE` controls whether a
    /// position at a fold's very end still selects it.
    fn find_region<const INCLUSIVE: bool>(&self, pos: usize) -> (Cursor, usize, usize, usize) {
        let mut remaining = pos;
        let mut prev_chars = 0;
        let mut prev_lines = 0;
        let cursor = self.tree.find_custom(|rec, left, _| {
            let left_span = left.map_or(0, |s| s.span);
            let go_left = if INCLUSIVE {
                remaining <= left_span
            } else {
                remaining < left_span
            };
            if go_left {
                return Branch::Left;
            }
            remaining -= left_span;
            prev_chars += left_span;
            prev_lines += left.map_or(0, |s| s.lines);
            let stop = if INCLUSIVE {
                remaining <= rec.span()
            } else {
                remaining < rec.span()
            };
            if stop {
                Branch::Stop
            } else {
                remaining -= rec.span();
                prev_chars += rec.span();
                prev_lines += rec.line_span();
                Branch::Right
            }
        });
        (cursor, remaining, prev_chars, prev_lines)
    }
}

