//! Line/column registry
//!
//! Tracks the hard line structure of an interpretation as a balanced tree
//! of line segments. Each segment covers one line's non-break codepoints
//! plus its ending; a CRLF ending counts as two codepoints but one
//! character. Exactly one segment has no ending and it is always the last
//! one, so the registry is never empty.

use crate::error::{Error, Result};
use crate::tree::{Augment, Branch, Cursor, Tree};

/// A hard line ending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEnding {
    /// No ending; only valid for the final segment.
    None,
    Cr,
    Lf,
    CrLf,
}

impl LineEnding {
    /// Codepoints occupied by the ending.
    pub fn codepoints(self) -> usize {
        match self {
            LineEnding::None => 0,
            LineEnding::Cr | LineEnding::Lf => 1,
            LineEnding::CrLf => 2,
        }
    }

    /// Characters occupied by the ending (CRLF is one character).
    pub fn chars(self) -> usize {
        match self {
            LineEnding::None => 0,
            _ => 1,
        }
    }
}

/// One line: its non-break codepoints and how it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LineSegment {
    /// Codepoints in the line, excluding the ending.
    pub nonbreak: usize,
    pub ending: LineEnding,
}

impl LineSegment {
    pub fn new(nonbreak: usize, ending: LineEnding) -> Self {
        LineSegment { nonbreak, ending }
    }

    /// Codepoints including the ending.
    pub fn codepoints(&self) -> usize {
        self.nonbreak + self.ending.codepoints()
    }

    /// Characters including the ending.
    pub fn chars(&self) -> usize {
        self.nonbreak + self.ending.chars()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LineSynth {
    pub codepoints: usize,
    pub chars: usize,
    pub breaks: usize,
    pub segments: usize,
}

impl Augment for LineSegment {
    type Synth = LineSynth;

    fn synthesize(&self, left: Option<&LineSynth>, right: Option<&LineSynth>) -> LineSynth {
        let mut s = LineSynth {
            codepoints: self.codepoints(),
            chars: self.chars(),
            breaks: self.ending.chars(),
            segments: 1,
        };
        for side in [left, right].into_iter().flatten() {
            s.codepoints += side.codepoints;
            s.chars += side.chars;
            s.breaks += side.breaks;
            s.segments += side.segments;
        }
        s
    }
}

/// Position of a character or codepoint within its line.
#[derive(Debug, Clone, Copy)]
pub struct LinePosition {
    pub cursor: Cursor,
    pub line: usize,
    /// Offset within the line, in the unit of the query.
    pub column: usize,
    /// Characters before the line.
    pub first_char: usize,
    /// Codepoints before the line.
    pub first_codepoint: usize,
}

/// Result of [`LinebreakRegistry::insert_codepoints`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertResult {
    /// The insertion split an existing CRLF.
    pub split: bool,
    /// The first inserted line merged with a preceding CR.
    pub merge_front: bool,
    /// A trailing LF merged with the last inserted line's CR.
    pub merge_back: bool,
}

/// Result of [`LinebreakRegistry::erase_codepoints`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EraseResult {
    /// The erased range started inside a CRLF.
    pub split_front: bool,
    /// The erased range ended inside a CRLF.
    pub split_back: bool,
    /// The segments surrounding the erased range merged into a CRLF.
    pub merge: bool,
}

pub struct LinebreakRegistry {
    tree: Tree<LineSegment>,
}

impl Default for LinebreakRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LinebreakRegistry {
    pub fn new() -> Self {
        let mut tree = Tree::new();
        tree.push_back(LineSegment::new(0, LineEnding::None));
        LinebreakRegistry { tree }
    }

    /// Resets to a single empty line.
    pub fn clear(&mut self) {
        self.tree.clear();
        self.tree.push_back(LineSegment::new(0, LineEnding::None));
    }

    pub fn num_codepoints(&self) -> usize {
        self.tree.root_synth().map_or(0, |s| s.codepoints)
    }

    pub fn num_chars(&self) -> usize {
        self.tree.root_synth().map_or(0, |s| s.chars)
    }

    pub fn num_linebreaks(&self) -> usize {
        self.tree.root_synth().map_or(0, |s| s.breaks)
    }

    pub fn num_lines(&self) -> usize {
        self.tree.root_synth().map_or(1, |s| s.segments)
    }

    pub fn segment(&self, cursor: Cursor) -> Result<&LineSegment> {
        self.tree.get(cursor)
    }

    pub(crate) fn tree(&self) -> &Tree<LineSegment> {
        &self.tree
    }

    /// Iterates the segments in order.
    pub fn iter(&self) -> impl Iterator<Item = &LineSegment> {
        self.tree.iter()
    }

    /// Locates the line with the given index, returning its cursor plus the
    /// character and codepoint totals before it.
    pub fn line_info(&self, line: usize) -> Result<LinePosition> {
        if line >= self.num_lines() {
            return Err(Error::BadPosition {
                position: line,
                len: self.num_lines(),
            });
        }
        let mut remaining = line;
        let mut first_char = 0;
        let mut first_codepoint = 0;
        let cursor = self.tree.find_custom(|seg, left, _| {
            let left_segments = left.map_or(0, |s| s.segments);
            if remaining < left_segments {
                Branch::Left
            } else {
                remaining -= left_segments;
                first_char += left.map_or(0, |s| s.chars);
                first_codepoint += left.map_or(0, |s| s.codepoints);
                if remaining == 0 {
                    Branch::Stop
                } else {
                    remaining -= 1;
                    first_char += seg.chars();
                    first_codepoint += seg.codepoints();
                    Branch::Right
                }
            }
        });
        Ok(LinePosition {
            cursor,
            line,
            column: 0,
            first_char,
            first_codepoint,
        })
    }

    /// Locates the line containing character `pos`. `pos == num_chars()`
    /// resolves to the end of the last line.
    pub fn line_of_char(&self, pos: usize) -> Result<LinePosition> {
        if pos > self.num_chars() {
            return Err(Error::BadPosition {
                position: pos,
                len: self.num_chars(),
            });
        }
        Ok(self.locate(pos, |seg| seg.chars(), |s| s.chars))
    }

    /// Locates the line containing codepoint `pos` (column in codepoints).
    pub fn line_of_codepoint(&self, pos: usize) -> Result<LinePosition> {
        if pos > self.num_codepoints() {
            return Err(Error::BadPosition {
                position: pos,
                len: self.num_codepoints(),
            });
        }
        Ok(self.locate(pos, |seg| seg.codepoints(), |s| s.codepoints))
    }

    fn locate(
        &self,
        pos: usize,
        seg_units: impl Fn(&LineSegment) -> usize,
        synth_units: impl Fn(&LineSynth) -> usize,
    ) -> LinePosition {
        let mut remaining = pos;
        let mut line = 0;
        let mut first_char = 0;
        let mut first_codepoint = 0;
        let cursor = self.tree.find_custom(|seg, left, _| {
            let left_units = left.map_or(0, |s| synth_units(s));
            if remaining < left_units {
                Branch::Left
            } else {
                remaining -= left_units;
                line += left.map_or(0, |s| s.segments);
                first_char += left.map_or(0, |s| s.chars);
                first_codepoint += left.map_or(0, |s| s.codepoints);
                if remaining < seg_units(seg) {
                    Branch::Stop
                } else {
                    remaining -= seg_units(seg);
                    line += 1;
                    first_char += seg.chars();
                    first_codepoint += seg.codepoints();
                    Branch::Right
                }
            }
        });
        if cursor.is_end() {
            // pos equals the total: normalize to the end of the last line
            let cursor = self.tree.last();
            let seg = self.tree.get(cursor).expect("registry never empty");
            let column = seg_units(seg);
            return LinePosition {
                cursor,
                line: line - 1,
                column,
                first_char: first_char - seg.chars(),
                first_codepoint: first_codepoint - seg.codepoints(),
            };
        }
        LinePosition {
            cursor,
            line,
            column: remaining,
            first_char,
            first_codepoint,
        }
    }

    /// Converts a character position to the position of its first
    /// codepoint.
    pub fn char_to_codepoint(&self, pos: usize) -> Result<usize> {
        let at = self.line_of_char(pos)?;
        Ok(at.first_codepoint + at.column)
    }

    /// Converts a codepoint position to the character containing it. The
    /// second codepoint of a CRLF maps to the CRLF character.
    pub fn codepoint_to_char(&self, pos: usize) -> Result<usize> {
        let at = self.line_of_codepoint(pos)?;
        let seg = self.tree.get(at.cursor).expect("registry never empty");
        Ok(at.first_char + at.column.min(seg.nonbreak))
    }

    /// First character of the given line.
    pub fn char_of_line_start(&self, line: usize) -> Result<usize> {
        Ok(self.line_info(line)?.first_char)
    }

    /// First codepoint of the given line.
    pub fn codepoint_of_line_start(&self, line: usize) -> Result<usize> {
        Ok(self.line_info(line)?.first_codepoint)
    }

    /// Records a clip of codepoints inserted at codepoint position `pos`.
    /// `lines` is the line structure of the clip; its last entry must have
    /// no ending (and may be empty).
    pub fn insert_codepoints(&mut self, pos: usize, lines: &[LineSegment]) -> Result<InsertResult> {
        debug_assert!(matches!(lines.last(), Some(seg) if seg.ending == LineEnding::None));
        if lines.len() == 1 && lines[0].nonbreak == 0 {
            // nothing to insert; continuing could wrongly break a CRLF
            return Ok(InsertResult::default());
        }
        let at = self.line_of_codepoint(pos)?;
        let cursor = at.cursor;
        let mut offset = at.column;
        let mut result = InsertResult::default();

        let seg = *self.tree.get(cursor).expect("registry never empty");
        if offset > seg.nonbreak {
            // the insertion lands between the CR and LF of a CRLF
            debug_assert_eq!(seg.ending, LineEnding::CrLf);
            self.tree
                .update(cursor, |s| {
                    s.nonbreak = 0;
                    s.ending = LineEnding::Lf;
                })
                .expect("own cursor");
            self.tree
                .insert_before(cursor, LineSegment::new(seg.nonbreak, LineEnding::Cr))
                .expect("own cursor");
            offset = 0;
            result.split = true;
        }

        if lines.len() == 1 {
            self.tree
                .update(cursor, |s| s.nonbreak += lines[0].nonbreak)
                .expect("own cursor");
            return Ok(result);
        }

        let last = lines[lines.len() - 1];
        self.tree
            .update(cursor, |s| s.nonbreak = s.nonbreak - offset + last.nonbreak)
            .expect("own cursor");
        let first = self
            .tree
            .insert_before(
                cursor,
                LineSegment::new(offset + lines[0].nonbreak, lines[0].ending),
            )
            .expect("own cursor");
        for mid in &lines[1..lines.len() - 1] {
            self.tree.insert_before(cursor, *mid).expect("own cursor");
        }
        result.merge_front = self.try_merge_crlf(first);
        result.merge_back = self.try_merge_crlf(cursor);
        Ok(result)
    }

    /// Records the erasure of the codepoints in `[begin, end)`.
    pub fn erase_codepoints(&mut self, begin: usize, end: usize) -> Result<EraseResult> {
        let beg_at = self.line_of_codepoint(begin)?;
        let end_at = self.line_of_codepoint(end)?;
        let mut beg = beg_at.cursor;
        let mut begoff = beg_at.column;
        let end_cursor = end_at.cursor;
        let mut endoff = end_at.column;
        let mut result = EraseResult::default();
        if beg == end_cursor && begoff == endoff {
            return Ok(result);
        }

        let beg_seg = *self.tree.get(beg).expect("registry never empty");
        if beg_seg.nonbreak < begoff {
            // erase starts between CR and LF
            debug_assert_eq!(beg_seg.ending, LineEnding::CrLf);
            result.split_front = true;
            self.tree
                .update(beg, |s| s.ending = LineEnding::Cr)
                .expect("own cursor");
            beg = self.tree.next(beg).expect("own cursor");
            begoff = 0;
        }
        let end_seg = *self.tree.get(end_cursor).expect("registry never empty");
        if end_seg.nonbreak < endoff {
            // erase ends between CR and LF
            debug_assert_eq!(end_seg.ending, LineEnding::CrLf);
            result.split_back = true;
            let new_off = if beg == end_cursor { begoff } else { 0 };
            self.tree
                .update(end_cursor, |s| {
                    s.nonbreak = new_off;
                    s.ending = LineEnding::Lf;
                })
                .expect("own cursor");
            endoff = new_off;
        }
        if beg != end_cursor {
            self.tree.erase_range(beg, end_cursor).expect("own cursors");
        }
        // within one segment begoff < endoff; the wrapping add subtracts
        self.tree
            .update(end_cursor, |s| {
                s.nonbreak = s.nonbreak.wrapping_add(begoff.wrapping_sub(endoff));
            })
            .expect("own cursor");
        result.merge = self.try_merge_crlf(end_cursor);
        Ok(result)
    }

    /// Merges a bare LF segment with a preceding CR-ended segment into one
    /// CRLF segment. The given cursor stays valid.
    fn try_merge_crlf(&mut self, at: Cursor) -> bool {
        if at.is_end() || at == self.tree.first() {
            return false;
        }
        let seg = *self.tree.get(at).expect("own cursor");
        if seg.nonbreak != 0 || seg.ending != LineEnding::Lf {
            return false;
        }
        let prev = self.tree.prev(at).expect("not first");
        let prev_seg = *self.tree.get(prev).expect("own cursor");
        if prev_seg.ending != LineEnding::Cr {
            return false;
        }
        self.tree.erase(prev).expect("own cursor");
        self.tree
            .update(at, |s| {
                s.nonbreak = prev_seg.nonbreak;
                s.ending = LineEnding::CrLf;
            })
            .expect("own cursor");
        true
    }

    /// Validates the registry's structural invariants.
    pub fn check_integrity(&self) -> bool {
        if !self.tree.check_integrity() || self.tree.is_empty() {
            return false;
        }
        let mut none_endings = 0;
        let mut last_is_none = false;
        for seg in self.tree.iter() {
            last_is_none = seg.ending == LineEnding::None;
            if last_is_none {
                none_endings += 1;
            }
        }
        none_endings == 1 && last_is_none
    }
}
