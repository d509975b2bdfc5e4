//! Soft linebreak registry
//!
//! Records the view-level wrap points of one document view as a tree of
//! run lengths between consecutive soft breaks. Combined with the hard
//! line registry it answers visual-line queries; locating the start of a
//! visual line requires interleaving soft and hard breaks by position,
//! done with a parallel descent through both trees.

use crate::interp::{LinebreakRegistry, LineSegment};
use crate::tree::{Augment, Branch, Cursor, Tree};

/// Characters between the previous soft break (or document start) and this
/// soft break.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakRun {
    pub length: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BreakSynth {
    pub chars: usize,
    pub breaks: usize,
}

impl Augment for BreakRun {
    type Synth = BreakSynth;

    fn synthesize(&self, left: Option<&BreakSynth>, right: Option<&BreakSynth>) -> BreakSynth {
        BreakSynth {
            chars: self.length
                + left.map_or(0, |s| s.chars)
                + right.map_or(0, |s| s.chars),
            breaks: 1 + left.map_or(0, |s| s.breaks) + right.map_or(0, |s| s.breaks),
        }
    }
}

/// Which kind of break starts or ends a visual line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakKind {
    Soft,
    Hard,
}

/// Result of a soft-break lookup: the run containing the queried position
/// plus totals before it.
#[derive(Debug, Clone, Copy)]
pub struct SoftbreakInfo {
    pub cursor: Cursor,
    /// Characters before the beginning of the run at `cursor`.
    pub prev_chars: usize,
    /// Soft breaks before the one at the start of that run.
    pub prev_breaks: usize,
}

/// The soft and hard segments containing one visual line.
#[derive(Debug, Clone, Copy)]
pub struct VisualLineInfo {
    pub soft: Cursor,
    pub soft_start_char: usize,
    pub hard: Cursor,
    pub hard_start_char: usize,
    pub prev_softbreaks: usize,
}

pub struct SoftBreakRegistry {
    tree: Tree<BreakRun>,
}

impl Default for SoftBreakRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SoftBreakRegistry {
    pub fn new() -> Self {
        SoftBreakRegistry { tree: Tree::new() }
    }

    /// Replaces all soft breaks. Positions must be sorted, strictly
    /// increasing and non-zero.
    pub fn set_breaks(&mut self, positions: &[usize]) {
        self.tree.clear();
        let mut last = 0;
        for &pos in positions {
            debug_assert!(pos > last, "softbreak list not sorted");
            self.tree.push_back(BreakRun { length: pos - last });
            last = pos;
        }
    }

    pub fn clear_breaks(&mut self) {
        self.tree.clear();
    }

    pub fn num_breaks(&self) -> usize {
        self.tree.root_synth().map_or(0, |s| s.breaks)
    }

    pub fn num_visual_lines(&self, lines: &LinebreakRegistry) -> usize {
        lines.num_linebreaks() + self.num_breaks() + 1
    }

    /// Positions of all soft breaks, in order.
    pub fn break_positions(&self) -> Vec<usize> {
        let mut out = Vec::with_capacity(self.tree.len());
        let mut acc = 0;
        for run in self.tree.iter() {
            acc += run.length;
            out.push(acc);
        }
        out
    }

    /// The run the given character is in. A position exactly on a soft
    /// break belongs to the run after it.
    pub fn softbreak_before_or_at_char(&self, c: usize) -> SoftbreakInfo {
        let mut remaining = c;
        let mut prev_breaks = 0;
        let mut prev_chars = 0;
        let cursor = self.tree.find_custom(|run, left, _| {
            let left_chars = left.map_or(0, |s| s.chars);
            if remaining < left_chars {
                return Branch::Left;
            }
            remaining -= left_chars;
            prev_breaks += left.map_or(0, |s| s.breaks);
            prev_chars += left_chars;
            if remaining < run.length {
                Branch::Stop
            } else {
                remaining -= run.length;
                prev_breaks += 1;
                prev_chars += run.length;
                Branch::Right
            }
        });
        SoftbreakInfo {
            cursor,
            prev_chars,
            prev_breaks,
        }
    }

    /// Index of the visual line the character is on.
    pub fn visual_line_of_char(&self, lines: &LinebreakRegistry, c: usize) -> usize {
        let hard = lines
            .line_of_char(c)
            .map(|at| at.line)
            .unwrap_or_else(|_| lines.num_lines() - 1);
        hard + self.softbreak_before_or_at_char(c).prev_breaks
    }

    /// Visual line and column of a character.
    pub fn visual_line_and_column_of_char(
        &self,
        lines: &LinebreakRegistry,
        c: usize,
    ) -> (usize, usize) {
        let hard = lines.line_of_char(c).unwrap_or_else(|_| {
            lines
                .line_of_char(lines.num_chars())
                .expect("total is valid")
        });
        let soft = self.softbreak_before_or_at_char(c);
        let soft_column = c - soft.prev_chars;
        (hard.line + soft.prev_breaks, soft_column.min(hard.column))
    }

    /// Character position where the given visual line starts, plus the
    /// kind of break before it.
    pub fn visual_line_start(&self, lines: &LinebreakRegistry, line: usize) -> (usize, BreakKind) {
        if self.tree.is_empty() {
            let first_char = lines
                .line_info(line)
                .map(|at| at.first_char)
                .unwrap_or_else(|_| lines.num_chars());
            return (first_char, BreakKind::Hard);
        }
        let info = self.find_line_ending(lines, line);
        if info.soft_start_char > info.hard_start_char {
            (info.soft_start_char, BreakKind::Soft)
        } else {
            (info.hard_start_char, BreakKind::Hard)
        }
    }

    /// Character position past the given visual line's contents, plus the
    /// kind of break that ends it.
    pub fn visual_line_past_end(
        &self,
        lines: &LinebreakRegistry,
        line: usize,
    ) -> (usize, BreakKind) {
        if self.tree.is_empty() {
            let past = lines
                .line_info(line)
                .map(|at| {
                    at.first_char
                        + lines
                            .segment(at.cursor)
                            .map(|seg| seg.nonbreak)
                            .unwrap_or_default()
                })
                .unwrap_or_else(|_| lines.num_chars());
            return (past, BreakKind::Hard);
        }
        let info = self.find_line_ending(lines, line);
        let mut hardc = info.hard_start_char;
        if !info.hard.is_end() {
            let seg: &LineSegment = lines.segment(info.hard).expect("line cursor");
            hardc += seg.nonbreak;
            if !info.soft.is_end() {
                let softc = info.soft_start_char
                    + self.tree.get(info.soft).expect("soft cursor").length;
                if softc < hardc {
                    return (softc, BreakKind::Soft);
                }
            }
        }
        (hardc, BreakKind::Hard)
    }

    /// Combined information about a visual line.
    pub fn line_info(
        &self,
        lines: &LinebreakRegistry,
        line: usize,
    ) -> (Option<(Cursor, usize)>, SoftbreakInfo) {
        if self.tree.is_empty() {
            let hard = lines.line_info(line).ok();
            return (
                hard.map(|at| (at.cursor, at.first_char)),
                SoftbreakInfo {
                    cursor: self.tree.end(),
                    prev_chars: 0,
                    prev_breaks: 0,
                },
            );
        }
        let info = self.find_line_ending(lines, line);
        (
            Some((info.hard, info.hard_start_char)),
            SoftbreakInfo {
                cursor: info.soft,
                prev_chars: info.soft_start_char,
                prev_breaks: info.prev_softbreaks,
            },
        )
    }

    /// Parallel descent through the soft tree and the hard line tree,
    /// locating the soft and hard segments containing the visual line. At
    /// every step the candidate break counts of both trees are combined;
    /// whichever side's next break is nearer decides which tree descends.
    fn find_line_ending(&self, lines: &LinebreakRegistry, line: usize) -> VisualLineInfo {
        let soft_tree = &self.tree;
        let hard_tree = lines.tree();
        let total_breaks = self.num_breaks();
        let total_chars_soft = soft_tree.root_synth().map_or(0, |s| s.chars);

        if line > total_breaks + lines.num_linebreaks() {
            // past the end of the document
            return VisualLineInfo {
                soft: soft_tree.end(),
                soft_start_char: total_chars_soft,
                hard: hard_tree.end(),
                hard_start_char: lines.num_chars(),
                prev_softbreaks: total_breaks,
            };
        }
        let mut result = VisualLineInfo {
            soft: soft_tree.end(),
            soft_start_char: 0,
            hard: hard_tree.end(),
            hard_start_char: 0,
            prev_softbreaks: total_breaks,
        };
        if line >= total_breaks {
            // first candidate: all soft breaks precede the line
            result.soft_start_char = total_chars_soft;
            if let Ok(hard) = lines.line_info(line - total_breaks) {
                result.hard = hard.cursor;
                result.hard_start_char = hard.first_char;
            }
        }

        let mut my = soft_tree.root();
        let mut their = hard_tree.root();
        let mut my_anc_count = 0usize;
        let mut my_anc_pos = 0usize;
        let mut their_anc_count = 0usize;
        let mut their_anc_pos = 0usize;
        while !my.is_end() && !their.is_end() {
            let mut my_count = my_anc_count;
            let mut my_exc = my_anc_pos;
            let mut their_count = their_anc_count;
            let mut their_exc = their_anc_pos;
            let my_left = soft_tree.left(my).expect("valid cursor");
            if !my_left.is_end() {
                let s = soft_tree.synth(my_left).expect("valid");
                my_count += s.breaks;
                my_exc += s.chars;
            }
            let their_left = hard_tree.left(their).expect("valid cursor");
            if !their_left.is_end() {
                let s = hard_tree.synth(their_left).expect("valid");
                their_count += s.breaks;
                their_exc += s.chars;
            }
            let my_pos = my_exc + soft_tree.get(my).expect("valid").length;
            let their_pos = their_exc + hard_tree.get(their).expect("valid").chars();
            let before = my_count + their_count;

            if before > line {
                // a break right before one of the candidates is not on the
                // left side; it must be the one starting later
                if my_exc > their_exc {
                    my = my_left;
                } else {
                    their = their_left;
                }
            } else if before < line {
                // one of the candidates is on the left side; it must be
                // the one ending earlier
                if my_pos < their_pos {
                    my = soft_tree.right(my).expect("valid");
                    my_anc_count = my_count + 1;
                    my_anc_pos = my_pos;
                } else {
                    their = hard_tree.right(their).expect("valid");
                    their_anc_count = their_count + 1;
                    their_anc_pos = their_pos;
                }
            } else {
                // a candidate pair; accept it unless a previously accepted
                // break of the same kind lies between the two
                let soft_between = result.soft_start_char > my_exc
                    && result.soft_start_char < their_exc;
                let hard_between = result.hard_start_char > their_exc
                    && result.hard_start_char < my_exc;
                if !(soft_between || hard_between) {
                    result.soft = my;
                    result.soft_start_char = my_exc;
                    result.hard = their;
                    result.hard_start_char = their_exc;
                    result.prev_softbreaks = my_count;
                }
                if my_exc > their_exc {
                    my = my_left;
                    their = hard_tree.right(their).expect("valid");
                    their_anc_count = their_count + 1;
                    their_anc_pos = their_pos;
                } else {
                    their = their_left;
                    my = soft_tree.right(my).expect("valid");
                    my_anc_count = my_count + 1;
                    my_anc_pos = my_pos;
                }
            }
        }
        result
    }
}
