//! View formatting
//!
//! Combines the soft-linebreak registry and the fold registry of one view
//! and exposes the coordinate conversions an editor surface needs, plus
//! [`DocumentView`]: the per-surface state (carets + formatting) that
//! subscribes to an interpretation's edit events and keeps itself
//! consistent.

use std::cell::RefCell;
use std::rc::Rc;

use unicode_width::UnicodeWidthChar;

use crate::buffer::ModificationPosition;
use crate::caret::{CaretData, CaretSet, Selection};
use crate::event::EventToken;
use crate::interp::{CharByteConverter, EndEditCharsInfo, Interpretation, LinebreakRegistry};
use crate::tree::Cursor;

pub mod folds;
pub mod softbreaks;

pub use folds::{FoldInfo, FoldRegion, FoldRegistry};
pub use softbreaks::{BreakKind, SoftBreakRegistry, SoftbreakInfo};

/// Measures the horizontal extent of codepoints for caret alignment.
/// Implementations wrap the host's glyph shaping; the default uses
/// Unicode width tables.
pub trait ColumnMeasure {
    /// Width of `cp` when placed at visual column `column`.
    fn width(&self, cp: u32, column: f64, tab_width: f64) -> f64;
}

/// Default measure backed by `unicode-width`.
pub struct UnicodeColumnMeasure;

impl ColumnMeasure for UnicodeColumnMeasure {
    fn width(&self, cp: u32, column: f64, tab_width: f64) -> f64 {
        if cp == '\t' as u32 {
            let next = (column / tab_width).floor() * tab_width + tab_width;
            return next - column;
        }
        match char::from_u32(cp) {
            Some(c) => UnicodeWidthChar::width(c).unwrap_or(0) as f64,
            None => 1.0,
        }
    }
}

/// Formatting state of a single view of a document: its soft wraps and
/// folded regions.
pub struct ViewFormatting {
    pub soft: SoftBreakRegistry,
    pub folds: FoldRegistry,
    tab_width: f64,
}

impl Default for ViewFormatting {
    fn default() -> Self {
        Self::new()
    }
}

impl ViewFormatting {
    pub fn new() -> Self {
        ViewFormatting {
            soft: SoftBreakRegistry::new(),
            folds: FoldRegistry::new(),
            tab_width: 4.0,
        }
    }

    pub fn tab_width(&self) -> f64 {
        self.tab_width
    }

    /// Maximum width of a tab character, in blank-space widths.
    pub fn set_tab_width(&mut self, width: f64) {
        self.tab_width = width;
    }

    /// Replaces the soft breaks of this view and recalculates fold line
    /// counts.
    pub fn set_softbreaks(&mut self, positions: &[usize], lines: &LinebreakRegistry) {
        self.soft.set_breaks(positions);
        self.recalc_fold_lines(lines);
    }

    pub fn clear_softbreaks(&mut self, lines: &LinebreakRegistry) {
        self.soft.clear_breaks();
        self.recalc_fold_lines(lines);
    }

    /// Folds the character range `[begin, end)`.
    pub fn add_fold(&mut self, range: (usize, usize), lines: &LinebreakRegistry) -> Cursor {
        debug_assert!(range.1 > range.0, "invalid fold region");
        let begin_line = self.soft.visual_line_of_char(lines, range.0);
        let end_line = self.soft.visual_line_of_char(lines, range.1);
        self.folds.add(FoldRegion {
            begin: range.0,
            end: range.1,
            begin_line,
            end_line,
        })
    }

    pub fn remove_fold(&mut self, cursor: Cursor) {
        self.folds.remove(cursor);
    }

    pub fn clear_folds(&mut self) {
        self.folds.clear();
    }

    /// Visual line of a character with folding applied.
    pub fn folded_visual_line_of_char(&self, lines: &LinebreakRegistry, c: usize) -> usize {
        self.folds
            .unfolded_to_folded_line(self.soft.visual_line_of_char(lines, c))
    }

    /// Rewrites every fold's visual line counts from the current soft and
    /// hard breaks.
    pub fn recalc_fold_lines(&mut self, lines: &LinebreakRegistry) {
        let soft = &self.soft;
        self.folds
            .recalc_lines(|c| soft.visual_line_of_char(lines, c));
    }

    /// Caches fold byte positions ahead of an edit.
    pub fn prepare_for_edit(&mut self, converter: &mut CharByteConverter<'_, '_>) {
        self.folds.prepare_for_edit(converter);
    }

    /// Re-projects fold positions after an edit and refreshes their line
    /// counts.
    pub fn fixup_after_edit(
        &mut self,
        byte_positions: &[ModificationPosition],
        converter: &mut CharByteConverter<'_, '_>,
        lines: &LinebreakRegistry,
    ) {
        self.folds.fixup_after_edit(byte_positions, converter);
        self.recalc_fold_lines(lines);
    }
}

/// The editor-surface state layered on one interpretation: carets and
/// view formatting, kept consistent through the interpretation's events.
pub struct DocumentView {
    pub carets: CaretSet,
    pub formatting: ViewFormatting,
    measure: Box<dyn ColumnMeasure>,
}

impl Default for DocumentView {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentView {
    pub fn new() -> Self {
        DocumentView {
            carets: CaretSet::new(),
            formatting: ViewFormatting::new(),
            measure: Box::new(UnicodeColumnMeasure),
        }
    }

    pub fn with_measure(measure: Box<dyn ColumnMeasure>) -> Self {
        DocumentView {
            carets: CaretSet::new(),
            formatting: ViewFormatting::new(),
            measure,
        }
    }

    /// Wires this view to an interpretation's edit cycle: fold byte
    /// positions are cached on `begin_edit`, and carets plus folds are
    /// re-projected on the interpretation's `end_edit`. Dropping the
    /// returned subscription detaches the view.
    pub fn attach(
        view: &Rc<RefCell<DocumentView>>,
        interp: &Rc<Interpretation>,
    ) -> ViewSubscription {
        let begin_edit = {
            let view = Rc::downgrade(view);
            let interp_weak = Rc::downgrade(interp);
            interp.buffer().begin_edit.subscribe(move |_| {
                if let (Some(view), Some(interp)) = (view.upgrade(), interp_weak.upgrade()) {
                    view.borrow_mut().prepare_for_edit(&interp);
                }
            })
        };
        let end_edit = {
            let view = Rc::downgrade(view);
            let interp_weak = Rc::downgrade(interp);
            interp.end_edit.subscribe(move |info| {
                if let (Some(view), Some(interp)) = (view.upgrade(), interp_weak.upgrade()) {
                    view.borrow_mut().fixup_after_edit(&interp, info);
                }
            })
        };
        ViewSubscription {
            interp: Rc::clone(interp),
            begin_edit,
            end_edit,
        }
    }

    /// Caches state that the post-edit fixup needs.
    pub fn prepare_for_edit(&mut self, interp: &Interpretation) {
        let reader = interp.read();
        let mut converter = reader.char_byte_converter();
        self.formatting.prepare_for_edit(&mut converter);
    }

    /// Patches carets and folds with the tables of a finished edit.
    pub fn fixup_after_edit(&mut self, interp: &Interpretation, info: &EndEditCharsInfo) {
        self.carets.fixup_after_edit(&info.character_positions);
        let reader = interp.read();
        let mut converter = reader.char_byte_converter();
        self.formatting
            .fixup_after_edit(&info.byte_positions, &mut converter, reader.linebreaks());
    }

    /// Places a single caret, updating its alignment column.
    pub fn set_caret(&mut self, interp: &Interpretation, pos: usize) {
        let alignment = self.visual_column_of(interp, pos, false);
        self.replace_carets(vec![(
            pos,
            CaretData {
                alignment,
                after_break: false,
            },
        )]);
    }

    /// Replaces the whole caret set with bare carets at the given
    /// positions.
    fn replace_carets(&mut self, carets: Vec<(usize, CaretData)>) {
        self.carets = CaretSet::new();
        let mut rest = carets.into_iter();
        if let Some((pos, data)) = rest.next() {
            if pos == 0 {
                let first = self.carets.begin();
                let _ = self.carets.set_data(first, data);
            } else {
                let (at, _) = self.carets.add(Selection::cursor(pos), data);
                let first = self.carets.begin();
                if first.cursor() != at.cursor() {
                    let _ = self.carets.remove(first);
                }
            }
            for (pos, data) in rest {
                self.carets.add(Selection::cursor(pos), data);
            }
        }
    }

    /// Moves every caret `delta` visual lines (negative is up), skipping
    /// folded regions and keeping each caret's remembered alignment.
    pub fn move_vertically(&mut self, interp: &Interpretation, delta: isize) {
        let old: Vec<(Selection, CaretData)> = self
            .carets
            .iter()
            .map(|(sel, data)| (sel, *data))
            .collect();
        let reader = interp.read();
        let lines = reader.linebreaks();
        let max_folded = self
            .formatting
            .folds
            .unfolded_to_folded_line(self.formatting.soft.num_visual_lines(lines) - 1);

        let mut moved = Vec::with_capacity(old.len());
        for (sel, data) in old {
            let pos = sel.caret_position();
            let mut vline = self.formatting.soft.visual_line_of_char(lines, pos);
            if !data.after_break && vline > 0 {
                let soft = self.formatting.soft.softbreak_before_or_at_char(pos);
                if soft.prev_chars == pos && pos > 0 {
                    vline -= 1;
                }
            }
            let folded = self.formatting.folds.unfolded_to_folded_line(vline);
            let target_folded = if delta < 0 {
                folded.saturating_sub(delta.unsigned_abs())
            } else {
                (folded + delta as usize).min(max_folded)
            };
            let target = self.formatting.folds.folded_to_unfolded_line(target_folded);
            let (new_pos, after_break) =
                self.char_closest_to_column(interp, target, data.alignment);
            moved.push((
                new_pos,
                CaretData {
                    alignment: data.alignment,
                    after_break,
                },
            ));
        }
        drop(reader);
        self.replace_carets(moved);
    }

    /// Moves every caret one character left or right, updating alignments.
    pub fn move_horizontally(&mut self, interp: &Interpretation, delta: isize) {
        let num_chars = interp.num_chars();
        let old: Vec<Selection> = self.carets.iter().map(|(sel, _)| sel).collect();
        let mut positions = Vec::with_capacity(old.len());
        for sel in old {
            let pos = sel.caret_position();
            let new_pos = if delta < 0 {
                pos.saturating_sub(delta.unsigned_abs())
            } else {
                (pos + delta as usize).min(num_chars)
            };
            positions.push(new_pos);
        }
        let moved: Vec<(usize, CaretData)> = positions
            .into_iter()
            .map(|pos| {
                let alignment = self.visual_column_of(interp, pos, false);
                (
                    pos,
                    CaretData {
                        alignment,
                        after_break: false,
                    },
                )
            })
            .collect();
        self.replace_carets(moved);
    }

    /// Visual column of a character position within its visual line.
    pub fn visual_column_of(&self, interp: &Interpretation, pos: usize, after_break: bool) -> f64 {
        let reader = interp.read();
        let lines = reader.linebreaks();
        let mut vline = self.formatting.soft.visual_line_of_char(lines, pos);
        if !after_break && vline > 0 {
            let soft = self.formatting.soft.softbreak_before_or_at_char(pos);
            if soft.prev_chars == pos && pos > 0 {
                vline -= 1;
            }
        }
        let (start, _) = self.formatting.soft.visual_line_start(lines, vline);
        let mut column = 0.0;
        let Ok(mut it) = reader.char_iter(start) else {
            return 0.0;
        };
        let mut at = start;
        while at < pos && !it.ended() {
            let cp = it.codepoints().codepoint().unwrap_or(0);
            column += self
                .measure
                .width(cp, column, self.formatting.tab_width());
            it.advance();
            at += 1;
        }
        column
    }

    /// The character on the given visual line whose column is closest to
    /// `alignment`, with the soft-break side flag for line-edge positions.
    pub fn char_closest_to_column(
        &self,
        interp: &Interpretation,
        vline: usize,
        alignment: f64,
    ) -> (usize, bool) {
        let reader = interp.read();
        let lines = reader.linebreaks();
        let (start, start_kind) = self.formatting.soft.visual_line_start(lines, vline);
        let (past_end, end_kind) = self.formatting.soft.visual_line_past_end(lines, vline);
        let mut column = 0.0;
        let Ok(mut it) = reader.char_iter(start) else {
            return (start, start_kind == BreakKind::Soft);
        };
        let mut pos = start;
        while pos < past_end && !it.ended() && !it.is_linebreak() {
            let cp = it.codepoints().codepoint().unwrap_or(0);
            let width = self
                .measure
                .width(cp, column, self.formatting.tab_width());
            if column + width / 2.0 > alignment {
                break;
            }
            column += width;
            it.advance();
            pos += 1;
        }
        let after_break = pos == start && start_kind == BreakKind::Soft;
        let at_soft_end = pos == past_end && end_kind == BreakKind::Soft;
        (pos, after_break && !at_soft_end)
    }
}

/// Keeps a [`DocumentView`] subscribed to an interpretation; unsubscribes
/// on drop.
pub struct ViewSubscription {
    interp: Rc<Interpretation>,
    begin_edit: EventToken,
    end_edit: EventToken,
}

impl Drop for ViewSubscription {
    fn drop(&mut self) {
        self.interp.buffer().begin_edit.unsubscribe(self.begin_edit);
        self.interp.end_edit.unsubscribe(self.end_edit);
    }
}
