//! Buffer interpretation
//!
//! Decodes a byte buffer as codepoints under a chosen encoding and keeps
//! the decoded view consistent across edits. Two structures are
//! maintained: a tree of decoding chunks aggregating (bytes, codepoints)
//! for O(log n) position conversion, and the line/column registry tracking
//! hard linebreaks. Edits are handled incrementally: codepoint boundaries
//! around each modification are snapshotted before the bytes change, and
//! afterwards only the smallest codepoint-aligned window is re-decoded and
//! spliced back in.

use std::cell::{Ref, RefCell, RefMut};
use std::rc::{Rc, Weak};

use log::{debug, trace};

use crate::buffer::{
    BeginModificationInfo, Buffer, BufferReader, ByteCursor, EditSource, EditType, EndEditInfo,
    EndModificationInfo, Modifier, ModificationPosition,
};
use crate::caret::CaretSet;
use crate::constants::interp::{MAX_CODEPOINTS_PER_CHUNK, POST_ERASE_BOUNDARY_WINDOW};
use crate::encoding::Encoding;
use crate::error::{Error, Result};
use crate::event::{Event, EventToken};
use crate::ranges::theme::{DecorationProviders, ThemeProviders};
use crate::tree::{Augment, Branch, Cursor, Tree};

pub mod linebreaks;
#[cfg(test)]
mod tests;

pub use linebreaks::{LineEnding, LinePosition, LineSegment, LinebreakRegistry};

const CR: u32 = 0x0D;
const LF: u32 = 0x0A;

/// A run of consecutive codepoints and the bytes they occupy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeChunk {
    pub bytes: usize,
    pub codepoints: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DecodeSynth {
    pub bytes: usize,
    pub codepoints: usize,
}

impl Augment for DecodeChunk {
    type Synth = DecodeSynth;

    fn synthesize(&self, left: Option<&DecodeSynth>, right: Option<&DecodeSynth>) -> DecodeSynth {
        let mut s = DecodeSynth {
            bytes: self.bytes,
            codepoints: self.codepoints,
        };
        for side in [left, right].into_iter().flatten() {
            s.bytes += side.bytes;
            s.codepoints += side.codepoints;
        }
        s
    }
}

/// Payload of [`Interpretation::modification_decoded`]: the new contents
/// have been decoded, but the chunk tree and line registry still reflect
/// the pre-modification document, which is what makes the removed-text
/// positions in here meaningful.
#[derive(Debug, Clone)]
pub struct ModificationDecodedInfo {
    /// First byte of the re-decoded window.
    pub start_byte: usize,
    /// Past-the-end byte of the window, in post-modification positions.
    pub past_end_byte: usize,
    pub start_codepoint: usize,
    /// Past-the-end codepoint of the replaced window, in the old document.
    pub past_end_codepoint: usize,
    /// Codepoints decoded from the new window.
    pub inserted_codepoints: usize,
    /// Character of the window start, in the old document.
    pub start_character: usize,
    /// Past-the-end character of the replaced window, in the old document.
    pub past_end_character: usize,
}

/// Payload of [`Interpretation::end_modification`]: character-accurate
/// positions of one modification, accounting for CRLF splitting/merging.
#[derive(Debug, Clone)]
pub struct EndModificationCharsInfo {
    pub start_character: usize,
    pub removed_characters: usize,
    pub inserted_characters: usize,
    /// Line/column of the erase end in the old document.
    pub erase_end_line: usize,
    pub erase_end_column: usize,
}

/// Payload of [`Interpretation::end_edit`], the fully consistent
/// character-level view of an edit.
#[derive(Debug, Clone)]
pub struct EndEditCharsInfo {
    pub edit_type: EditType,
    pub source: EditSource,
    /// Character-level `(start, removed, inserted)` table. Entries may
    /// overlap; they describe consecutive operations.
    pub character_positions: Vec<ModificationPosition>,
    /// Byte-level patch table from the buffer.
    pub byte_positions: Vec<ModificationPosition>,
}

/// How much of the document's appearance an event invalidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppearanceChange {
    VisualOnly,
    LayoutAndVisual,
}

/// State snapshotted between `begin_modify` and `end_modify`.
#[derive(Default)]
struct ModificationCache {
    /// Byte positions of consecutive codepoint boundaries, the last of
    /// which is at or before the modification position.
    start_boundaries: Vec<usize>,
    /// Codepoint index of the first entry of `start_boundaries`.
    start_codepoint: usize,
    /// Byte positions (old document) of codepoint boundaries at or after
    /// the erased range.
    post_erase_boundaries: Vec<usize>,
    /// Codepoint index of the first entry of `post_erase_boundaries`.
    post_erase_codepoint: usize,
    old_total_codepoints: usize,
    /// Character-level positions accumulated over the edit.
    character_positions: Vec<ModificationPosition>,
}

struct InterpInner {
    chunks: Tree<DecodeChunk>,
    linebreaks: LinebreakRegistry,
    themes: ThemeProviders,
    decorations: DecorationProviders,
    default_ending: LineEnding,
    cache: ModificationCache,
}

struct EventTokens {
    begin_modify: EventToken,
    end_modify: EventToken,
    end_edit: EventToken,
}

/// A buffer decoded under one encoding. Shares ownership of its buffer and
/// reacts to its edit events; observers wanting a fully consistent state
/// subscribe to this type's events instead of the buffer's.
pub struct Interpretation {
    buffer: Rc<Buffer>,
    encoding: &'static dyn Encoding,
    inner: RefCell<InterpInner>,
    /// Fired per modification after its new contents have been decoded but
    /// before the chunk tree and line registry are updated.
    pub modification_decoded: Event<ModificationDecodedInfo>,
    /// Fired per modification after the chunk tree and line registry have
    /// been updated.
    pub end_modification: Event<EndModificationCharsInfo>,
    /// Fired once per edit, after the buffer's own `end_edit`.
    pub end_edit: Event<EndEditCharsInfo>,
    /// Fired when the document's appearance may have changed.
    pub appearance_changed: Event<AppearanceChange>,
    tokens: RefCell<Option<EventTokens>>,
}

impl Interpretation {
    /// Decodes the whole buffer once and wires up the edit listeners.
    pub fn new(buffer: Rc<Buffer>, encoding: &'static dyn Encoding) -> Rc<Interpretation> {
        let interp = Rc::new(Interpretation {
            buffer: Rc::clone(&buffer),
            encoding,
            inner: RefCell::new(InterpInner {
                chunks: Tree::new(),
                linebreaks: LinebreakRegistry::new(),
                themes: ThemeProviders::new(),
                decorations: DecorationProviders::new(),
                default_ending: LineEnding::Lf,
                cache: ModificationCache::default(),
            }),
            modification_decoded: Event::new(),
            end_modification: Event::new(),
            end_edit: Event::new(),
            appearance_changed: Event::new(),
            tokens: RefCell::new(None),
        });
        interp.full_decode();

        let weak: Weak<Interpretation> = Rc::downgrade(&interp);
        let begin_modify = {
            let weak = weak.clone();
            buffer.begin_modify.subscribe(move |info| {
                if let Some(interp) = weak.upgrade() {
                    interp.on_begin_modify(info);
                }
            })
        };
        let end_modify = {
            let weak = weak.clone();
            buffer.end_modify.subscribe(move |info| {
                if let Some(interp) = weak.upgrade() {
                    interp.on_end_modify(info);
                }
            })
        };
        let end_edit = {
            let weak = weak.clone();
            // post_end_edit runs after every buffer end_edit handler, which
            // keeps this interpretation's own end_edit last in the cycle
            buffer.post_end_edit.subscribe(move |info| {
                if let Some(interp) = weak.upgrade() {
                    interp.on_end_edit(info);
                }
            })
        };
        *interp.tokens.borrow_mut() = Some(EventTokens {
            begin_modify,
            end_modify,
            end_edit,
        });
        interp
    }

    pub fn buffer(&self) -> &Rc<Buffer> {
        &self.buffer
    }

    pub fn encoding(&self) -> &'static dyn Encoding {
        self.encoding
    }

    /// Total number of codepoints.
    pub fn num_codepoints(&self) -> usize {
        self.inner
            .borrow()
            .chunks
            .root_synth()
            .map_or(0, |s| s.codepoints)
    }

    /// Total number of characters.
    pub fn num_chars(&self) -> usize {
        self.inner.borrow().linebreaks.num_chars()
    }

    /// Total number of lines (linebreaks plus one).
    pub fn num_lines(&self) -> usize {
        self.inner.borrow().linebreaks.num_lines()
    }

    /// Read-only view of the line registry.
    pub fn linebreaks(&self) -> Ref<'_, LinebreakRegistry> {
        Ref::map(self.inner.borrow(), |inner| &inner.linebreaks)
    }

    /// Theme providers of this document; patched automatically on edits.
    pub fn themes_mut(&self) -> RefMut<'_, ThemeProviders> {
        RefMut::map(self.inner.borrow_mut(), |inner| &mut inner.themes)
    }

    pub fn themes(&self) -> Ref<'_, ThemeProviders> {
        Ref::map(self.inner.borrow(), |inner| &inner.themes)
    }

    /// Decoration providers of this document; patched automatically.
    pub fn decorations_mut(&self) -> RefMut<'_, DecorationProviders> {
        RefMut::map(self.inner.borrow_mut(), |inner| &mut inner.decorations)
    }

    pub fn decorations(&self) -> Ref<'_, DecorationProviders> {
        Ref::map(self.inner.borrow(), |inner| &inner.decorations)
    }

    pub fn default_line_ending(&self) -> LineEnding {
        self.inner.borrow().default_ending
    }

    /// Sets the ending used when new lines are synthesized. Existing text
    /// is unaffected.
    pub fn set_default_line_ending(&self, ending: LineEnding) {
        self.inner.borrow_mut().default_ending = ending;
    }

    /// Borrows the decoded document for reading (iterators, converters).
    pub fn read(&self) -> InterpReader<'_> {
        InterpReader {
            inner: self.inner.borrow(),
            buffer: self.buffer.read(),
            encoding: self.encoding,
        }
    }

    /// Encodes a string under this interpretation's encoding.
    pub fn encode_str(&self, text: &str) -> Vec<u8> {
        let mut out = Vec::with_capacity(text.len());
        for c in text.chars() {
            out.extend_from_slice(&self.encoding.encode(c as u32));
        }
        out
    }

    // ---- caret-driven edit helpers -------------------------------------

    /// Replaces every caret's selection with `text`.
    pub fn edit_insert(&self, carets: &CaretSet, text: &[u8], source: EditSource) -> Result<()> {
        let spans = self.caret_byte_spans(carets, SpanMode::Selection)?;
        let mut modifier = Modifier::begin(Rc::clone(&self.buffer), source, EditType::Normal);
        for (begin, len) in spans {
            modifier.modify(begin, len, text.to_vec())?;
        }
        modifier.end();
        Ok(())
    }

    /// Erases each selection, or the character before each bare caret.
    pub fn edit_backspace(&self, carets: &CaretSet, source: EditSource) -> Result<()> {
        let spans = self.caret_byte_spans(carets, SpanMode::Backspace)?;
        if spans.len() == 1 && spans[0].1 == 0 {
            return Ok(());
        }
        let mut modifier = Modifier::begin(Rc::clone(&self.buffer), source, EditType::Normal);
        for (begin, len) in spans {
            modifier.modify(begin, len, Vec::new())?;
        }
        modifier.end();
        Ok(())
    }

    /// Erases each selection, or the character after each bare caret.
    pub fn edit_delete(&self, carets: &CaretSet, source: EditSource) -> Result<()> {
        let spans = self.caret_byte_spans(carets, SpanMode::Delete)?;
        if spans.len() == 1 && spans[0].1 == 0 {
            return Ok(());
        }
        let mut modifier = Modifier::begin(Rc::clone(&self.buffer), source, EditType::Normal);
        for (begin, len) in spans {
            modifier.modify(begin, len, Vec::new())?;
        }
        modifier.end();
        Ok(())
    }

    /// Re-decodes the whole buffer and compares against the incremental
    /// state. Used by tests.
    pub fn check_integrity(&self) -> bool {
        let (fresh_chunks, fresh_lines) = {
            let reader = self.buffer.read();
            let mut cursor = match reader.cursor_at(0) {
                Ok(c) => c,
                Err(_) => return false,
            };
            let mut builder = ChunkBuilder::new();
            let mut lines = LineCollector::new();
            let mut last = 0;
            while let Some(d) = self.encoding.decode_one(&mut cursor) {
                let pos = cursor.position();
                builder.push(pos - last);
                last = pos;
                lines.push(d.codepoint);
            }
            (builder.finish(), lines.finish())
        };
        let inner = self.inner.borrow();
        let total_bytes: usize = inner.chunks.root_synth().map_or(0, |s| s.bytes);
        let total_cps: usize = inner.chunks.root_synth().map_or(0, |s| s.codepoints);
        let fresh_bytes: usize = fresh_chunks.iter().map(|c| c.bytes).sum();
        let fresh_cps: usize = fresh_chunks.iter().map(|c| c.codepoints).sum();
        if total_bytes != self.buffer.len() || total_bytes != fresh_bytes {
            return false;
        }
        if total_cps != fresh_cps || total_cps != inner.linebreaks.num_codepoints() {
            return false;
        }
        let actual_lines: Vec<LineSegment> = inner.linebreaks.iter().copied().collect();
        if actual_lines != fresh_lines {
            return false;
        }
        inner.chunks.check_integrity() && inner.linebreaks.check_integrity()
    }

    // ---- edit handling -------------------------------------------------

    fn full_decode(&self) {
        let (chunks, lines) = {
            let reader = self.buffer.read();
            let mut cursor = reader.cursor_at(0).expect("position zero");
            let mut builder = ChunkBuilder::new();
            let mut lines = LineCollector::new();
            let mut last = 0;
            while let Some(d) = self.encoding.decode_one(&mut cursor) {
                let pos = cursor.position();
                builder.push(pos - last);
                last = pos;
                lines.push(d.codepoint);
            }
            (builder.finish(), lines.finish())
        };
        let mut inner = self.inner.borrow_mut();
        inner.chunks.clear();
        for chunk in chunks {
            inner.chunks.push_back(chunk);
        }
        inner.linebreaks.clear();
        inner
            .linebreaks
            .insert_codepoints(0, &lines)
            .expect("insert into fresh registry");
    }

    /// Snapshots codepoint boundaries around the modification while the
    /// buffer still holds the old bytes.
    fn on_begin_modify(&self, info: &BeginModificationInfo) {
        let window = self.encoding.max_codepoint_bytes().max(1);
        let carried_positions =
            std::mem::take(&mut self.inner.borrow_mut().cache.character_positions);
        let cache = {
            let inner = self.inner.borrow();
            let reader = self.buffer.read();
            let position = info.position;
            let erase_end = position + info.erase_len;

            // boundaries at or before the modification start; the scan
            // starts early enough that codepoints able to combine with the
            // inserted bytes are always inside the window, even when the
            // position sits on a chunk boundary
            let lookback = position.saturating_sub(window);
            let (_, chunk_cp, chunk_byte) = inner.chunk_containing_byte(lookback);
            let mut cursor = reader.cursor_at(chunk_byte).expect("chunk start");
            let mut start_boundaries = vec![chunk_byte];
            let start_codepoint = chunk_cp;
            while cursor.position() < position {
                if self.encoding.decode_one(&mut cursor).is_none() {
                    break;
                }
                if cursor.position() > position {
                    break;
                }
                start_boundaries.push(cursor.position());
            }

            // boundaries at or after the erased range, in old positions
            let (_, end_chunk_cp, end_chunk_byte) = inner.chunk_containing_byte(erase_end);
            let mut cursor = reader.cursor_at(end_chunk_byte).expect("chunk start");
            let mut post_erase_codepoint = end_chunk_cp;
            let mut boundary = end_chunk_byte;
            while boundary < erase_end {
                if self.encoding.decode_one(&mut cursor).is_none() {
                    break;
                }
                boundary = cursor.position();
                post_erase_codepoint += 1;
            }
            let mut post_erase_boundaries = vec![boundary];
            while post_erase_boundaries.len() < POST_ERASE_BOUNDARY_WINDOW {
                if self.encoding.decode_one(&mut cursor).is_none() {
                    break;
                }
                post_erase_boundaries.push(cursor.position());
            }

            ModificationCache {
                start_boundaries,
                start_codepoint,
                post_erase_boundaries,
                post_erase_codepoint,
                old_total_codepoints: inner.chunks.root_synth().map_or(0, |s| s.codepoints),
                character_positions: carried_positions,
            }
        };
        self.inner.borrow_mut().cache = cache;
    }

    /// Re-decodes the minimal window around a modification and splices the
    /// chunk tree and line registry.
    fn on_end_modify(&self, info: &EndModificationInfo) {
        struct Redecode {
            start_byte: usize,
            start_codepoint: usize,
            end_byte_new: usize,
            end_codepoint_old: usize,
            new_chunks: Vec<DecodeChunk>,
            new_lines: Vec<LineSegment>,
            new_codepoints: usize,
            start_character: usize,
            past_end_character: usize,
            erase_end_line: usize,
            erase_end_column: usize,
        }

        let redecode = {
            let inner = self.inner.borrow();
            let reader = self.buffer.read();
            let cache = &inner.cache;
            let delta = info.added_len as i64 - info.removed_len as i64;
            let insert_end = info.position + info.added_len;

            // decode from the earliest snapshotted boundary: inserted bytes
            // may combine with preceding bytes (e.g. a continuation byte
            // completing a previously truncated sequence)
            let mut start_byte = *cache.start_boundaries.first().expect("window never empty");
            let mut start_codepoint = cache.start_codepoint;

            // decode the new window, watching for re-synchronization with
            // the old boundaries recorded past the erased range
            let mut cursor = reader.cursor_at(start_byte).expect("old boundary");
            let mut decoded: Vec<(u32, usize)> = Vec::new();
            let mut target = 0usize;
            let mut synced: Option<(usize, usize)> = None;
            loop {
                let q = cursor.position();
                if q >= insert_end {
                    while target < cache.post_erase_boundaries.len() {
                        let t_new =
                            (cache.post_erase_boundaries[target] as i64 + delta) as usize;
                        if t_new < q {
                            target += 1;
                        } else {
                            if t_new == q {
                                synced =
                                    Some((q, cache.post_erase_codepoint + target));
                            }
                            break;
                        }
                    }
                    if synced.is_some() {
                        break;
                    }
                }
                let Some(d) = self.encoding.decode_one(&mut cursor) else {
                    // end of buffer is always a boundary
                    synced = Some((q, cache.old_total_codepoints));
                    break;
                };
                decoded.push((d.codepoint, cursor.position() - q));
            }
            let (end_byte_new, end_codepoint_old) = synced.expect("loop sets sync");

            // trim the unchanged prefix: a re-decoded codepoint is
            // identical to an old one exactly when its byte range matches
            // two consecutive snapshotted boundaries (matching the range
            // alone is enough; decode verdicts over the same bytes agree).
            // This keeps the observable window and the character table
            // minimal without trusting codepoints whose decoding peeked at
            // replaced bytes.
            let mut trimmed = 0;
            let mut trim_byte = start_byte;
            for &(_, len) in &decoded {
                match cache.start_boundaries.get(trimmed + 1) {
                    Some(&next) if next == trim_byte + len => {
                        trim_byte += len;
                        trimmed += 1;
                    }
                    _ => break,
                }
            }
            start_byte = trim_byte;
            start_codepoint += trimmed;
            let mut builder = ChunkBuilder::new();
            let mut lines = LineCollector::new();
            let mut new_codepoints = 0usize;
            for &(cp, len) in &decoded[trimmed..] {
                builder.push(len);
                lines.push(cp);
                new_codepoints += 1;
            }

            let start_character = inner
                .linebreaks
                .codepoint_to_char(start_codepoint)
                .expect("old codepoint");
            let past_end_character = inner
                .linebreaks
                .codepoint_to_char(end_codepoint_old)
                .expect("old codepoint");
            let erase_end = inner
                .linebreaks
                .line_of_char(past_end_character)
                .expect("old character");

            Redecode {
                start_byte,
                start_codepoint,
                end_byte_new,
                end_codepoint_old,
                new_chunks: builder.finish(),
                new_lines: lines.finish(),
                new_codepoints,
                start_character,
                past_end_character,
                erase_end_line: erase_end.line,
                erase_end_column: past_end_character - erase_end.first_char,
            }
        };

        trace!(
            "re-decode window: bytes [{}, {}), codepoints [{}, {}) -> {} new",
            redecode.start_byte,
            redecode.end_byte_new,
            redecode.start_codepoint,
            redecode.end_codepoint_old,
            redecode.new_codepoints
        );
        self.modification_decoded.emit(&ModificationDecodedInfo {
            start_byte: redecode.start_byte,
            past_end_byte: redecode.end_byte_new,
            start_codepoint: redecode.start_codepoint,
            past_end_codepoint: redecode.end_codepoint_old,
            inserted_codepoints: redecode.new_codepoints,
            start_character: redecode.start_character,
            past_end_character: redecode.past_end_character,
        });

        let chars_info = {
            let inner = &mut *self.inner.borrow_mut();

            // splice the chunk tree
            let (from, from_cp, from_byte) = inner.chunk_containing_cp(redecode.start_codepoint);
            let prefix = DecodeChunk {
                bytes: redecode.start_byte - from_byte,
                codepoints: redecode.start_codepoint - from_cp,
            };
            let (to, to_cp, to_byte) = inner.chunk_containing_cp(redecode.end_codepoint_old);
            let mut suffix = DecodeChunk {
                bytes: 0,
                codepoints: 0,
            };
            let erase_to = if redecode.end_codepoint_old == to_cp || to.is_end() {
                to
            } else {
                let chunk = *inner.chunks.get(to).expect("chunk cursor");
                let end_byte_old = (redecode.end_byte_new as i64
                    - (info.added_len as i64 - info.removed_len as i64))
                    as usize;
                suffix = DecodeChunk {
                    bytes: chunk.bytes - (end_byte_old - to_byte),
                    codepoints: chunk.codepoints - (redecode.end_codepoint_old - to_cp),
                };
                inner.chunks.next(to).expect("chunk cursor")
            };
            if from != erase_to {
                inner.chunks.erase_range(from, erase_to).expect("own cursors");
            }
            if prefix.codepoints > 0 {
                inner
                    .chunks
                    .insert_before(erase_to, prefix)
                    .expect("own cursor");
            }
            for chunk in &redecode.new_chunks {
                inner
                    .chunks
                    .insert_before(erase_to, *chunk)
                    .expect("own cursor");
            }
            if suffix.codepoints > 0 {
                inner
                    .chunks
                    .insert_before(erase_to, suffix)
                    .expect("own cursor");
            }
            inner.merge_small_chunks(erase_to);

            // splice the line registry
            let erase_result = inner
                .linebreaks
                .erase_codepoints(redecode.start_codepoint, redecode.end_codepoint_old)
                .expect("old range");
            inner
                .linebreaks
                .insert_codepoints(redecode.start_codepoint, &redecode.new_lines)
                .expect("spliced range");

            let new_start_char = inner
                .linebreaks
                .codepoint_to_char(redecode.start_codepoint)
                .expect("new codepoint");
            let new_past_end_char = inner
                .linebreaks
                .codepoint_to_char(redecode.start_codepoint + redecode.new_codepoints)
                .expect("new codepoint");

            let removed_characters = redecode.past_end_character - redecode.start_character
                + usize::from(erase_result.split_back);
            let inserted_characters = new_past_end_char - new_start_char;

            let chars_info = EndModificationCharsInfo {
                start_character: redecode.start_character,
                removed_characters,
                inserted_characters,
                erase_end_line: redecode.erase_end_line,
                erase_end_column: redecode.erase_end_column,
            };
            inner.cache.character_positions.push(ModificationPosition {
                position: chars_info.start_character,
                removed: chars_info.removed_characters,
                added: chars_info.inserted_characters,
            });
            inner.themes.on_modification(
                chars_info.start_character,
                chars_info.removed_characters,
                chars_info.inserted_characters,
            );
            inner.decorations.on_modification(
                chars_info.start_character,
                chars_info.removed_characters,
                chars_info.inserted_characters,
            );
            chars_info
        };
        self.end_modification.emit(&chars_info);
    }

    fn on_end_edit(&self, info: &EndEditInfo) {
        let character_positions =
            std::mem::take(&mut self.inner.borrow_mut().cache.character_positions);
        debug!(
            "edit decoded: {} modification(s), {} codepoints, {} chars",
            character_positions.len(),
            self.num_codepoints(),
            self.num_chars()
        );
        self.end_edit.emit(&EndEditCharsInfo {
            edit_type: info.edit_type,
            source: info.source,
            character_positions,
            byte_positions: info.positions.clone(),
        });
        self.appearance_changed.emit(&AppearanceChange::LayoutAndVisual);
    }

    fn caret_byte_spans(&self, carets: &CaretSet, mode: SpanMode) -> Result<Vec<(usize, usize)>> {
        let reader = self.read();
        let mut converter = reader.char_byte_converter();
        let num_chars = reader.num_chars();
        let mut spans = Vec::with_capacity(carets.count());
        for (sel, _) in carets.iter() {
            let (first_char, second_char) = if sel.has_selection() {
                (sel.begin, sel.end())
            } else {
                let caret = sel.caret_position();
                match mode {
                    SpanMode::Selection => (caret, caret),
                    SpanMode::Backspace => (caret.saturating_sub(1), caret),
                    SpanMode::Delete => (caret, (caret + 1).min(num_chars)),
                }
            };
            let first = converter.char_to_byte(first_char)?;
            let second = converter.char_to_byte(second_char)?;
            spans.push((first, second - first));
        }
        Ok(spans)
    }
}

impl Drop for Interpretation {
    fn drop(&mut self) {
        if let Some(tokens) = self.tokens.borrow_mut().take() {
            self.buffer.begin_modify.unsubscribe(tokens.begin_modify);
            self.buffer.end_modify.unsubscribe(tokens.end_modify);
            self.buffer.post_end_edit.unsubscribe(tokens.end_edit);
        }
    }
}

#[derive(Clone, Copy)]
enum SpanMode {
    Selection,
    Backspace,
    Delete,
}

impl InterpInner {
    /// Chunk containing the given byte, with the codepoint and byte totals
    /// before it. A position equal to the total yields the end cursor.
    fn chunk_containing_byte(&self, byte: usize) -> (Cursor, usize, usize) {
        let mut remaining = byte;
        let mut cp_before = 0;
        let mut bytes_before = 0;
        let cursor = self.chunks.find_custom(|chunk, left, _| {
            let left_bytes = left.map_or(0, |s| s.bytes);
            if remaining < left_bytes {
                Branch::Left
            } else {
                remaining -= left_bytes;
                cp_before += left.map_or(0, |s| s.codepoints);
                bytes_before += left_bytes;
                if remaining < chunk.bytes {
                    Branch::Stop
                } else {
                    remaining -= chunk.bytes;
                    cp_before += chunk.codepoints;
                    bytes_before += chunk.bytes;
                    Branch::Right
                }
            }
        });
        (cursor, cp_before, bytes_before)
    }

    /// Chunk containing the given codepoint; boundary positions resolve to
    /// the following chunk.
    fn chunk_containing_cp(&self, cp: usize) -> (Cursor, usize, usize) {
        let mut remaining = cp;
        let mut cp_before = 0;
        let mut bytes_before = 0;
        let cursor = self.chunks.find_custom(|chunk, left, _| {
            let left_cps = left.map_or(0, |s| s.codepoints);
            if remaining < left_cps {
                Branch::Left
            } else {
                remaining -= left_cps;
                cp_before += left_cps;
                bytes_before += left.map_or(0, |s| s.bytes);
                if remaining < chunk.codepoints {
                    Branch::Stop
                } else {
                    remaining -= chunk.codepoints;
                    cp_before += chunk.codepoints;
                    bytes_before += chunk.bytes;
                    Branch::Right
                }
            }
        });
        (cursor, cp_before, bytes_before)
    }

    /// Merges the chunk at `at` with a neighbour when both fit in one.
    fn merge_small_chunks(&mut self, at: Cursor) {
        if at.is_end() {
            return;
        }
        let chunk = *self.chunks.get(at).expect("chunk cursor");
        if at != self.chunks.first() {
            let prev = self.chunks.prev(at).expect("not first");
            let prev_chunk = *self.chunks.get(prev).expect("chunk cursor");
            if chunk.codepoints + prev_chunk.codepoints < MAX_CODEPOINTS_PER_CHUNK {
                self.chunks.erase(prev).expect("own cursor");
                self.chunks
                    .update(at, |c| {
                        c.bytes += prev_chunk.bytes;
                        c.codepoints += prev_chunk.codepoints;
                    })
                    .expect("own cursor");
            }
        }
    }
}

/// Incrementally builds decoding chunks capped at
/// [`MAX_CODEPOINTS_PER_CHUNK`] codepoints.
struct ChunkBuilder {
    chunks: Vec<DecodeChunk>,
    bytes: usize,
    codepoints: usize,
}

impl ChunkBuilder {
    fn new() -> Self {
        ChunkBuilder {
            chunks: Vec::new(),
            bytes: 0,
            codepoints: 0,
        }
    }

    fn push(&mut self, cp_bytes: usize) {
        self.bytes += cp_bytes;
        self.codepoints += 1;
        if self.codepoints == MAX_CODEPOINTS_PER_CHUNK {
            self.flush();
        }
    }

    fn flush(&mut self) {
        if self.codepoints > 0 {
            self.chunks.push(DecodeChunk {
                bytes: self.bytes,
                codepoints: self.codepoints,
            });
            self.bytes = 0;
            self.codepoints = 0;
        }
    }

    fn finish(mut self) -> Vec<DecodeChunk> {
        self.flush();
        self.chunks
    }
}

/// Splits a codepoint stream into line segments, combining CR+LF pairs.
struct LineCollector {
    lines: Vec<LineSegment>,
    run: usize,
    pending_cr: bool,
}

impl LineCollector {
    fn new() -> Self {
        LineCollector {
            lines: Vec::new(),
            run: 0,
            pending_cr: false,
        }
    }

    fn push(&mut self, cp: u32) {
        if self.pending_cr {
            self.pending_cr = false;
            if cp == LF {
                self.lines.push(LineSegment::new(self.run, LineEnding::CrLf));
                self.run = 0;
                return;
            }
            self.lines.push(LineSegment::new(self.run, LineEnding::Cr));
            self.run = 0;
        }
        match cp {
            CR => self.pending_cr = true,
            LF => {
                self.lines.push(LineSegment::new(self.run, LineEnding::Lf));
                self.run = 0;
            }
            _ => self.run += 1,
        }
    }

    fn finish(mut self) -> Vec<LineSegment> {
        if self.pending_cr {
            self.lines.push(LineSegment::new(self.run, LineEnding::Cr));
            self.run = 0;
        }
        self.lines.push(LineSegment::new(self.run, LineEnding::None));
        self.lines
    }
}

// ---- reading: iterators & converters -----------------------------------

/// Borrow guard exposing codepoint/character iteration and position
/// conversion over a consistent snapshot of the document.
pub struct InterpReader<'a> {
    inner: Ref<'a, InterpInner>,
    buffer: BufferReader<'a>,
    encoding: &'static dyn Encoding,
}

impl<'a> InterpReader<'a> {
    pub fn num_codepoints(&self) -> usize {
        self.inner.chunks.root_synth().map_or(0, |s| s.codepoints)
    }

    pub fn num_chars(&self) -> usize {
        self.inner.linebreaks.num_chars()
    }

    pub fn linebreaks(&self) -> &LinebreakRegistry {
        &self.inner.linebreaks
    }

    /// Iterator over codepoints starting at codepoint `pos`.
    pub fn codepoint_iter(&self, pos: usize) -> Result<CodepointIter<'_>> {
        let mut converter = self.codepoint_byte_converter();
        let byte = converter.codepoint_to_byte(pos)?;
        let cursor = self.buffer.cursor_at(byte)?;
        Ok(CodepointIter::new(cursor, self.encoding))
    }

    /// Iterator over characters starting at character `pos`.
    pub fn char_iter(&self, pos: usize) -> Result<CharIter<'_>> {
        let at = self.inner.linebreaks.line_of_char(pos)?;
        let codepoint = at.first_codepoint + at.column;
        let segment = *self.inner.linebreaks.segment(at.cursor).expect("line cursor");
        let codepoints = self.codepoint_iter(codepoint)?;
        Ok(CharIter {
            reader: self,
            codepoints,
            line: at.line,
            segment,
            column: at.column,
        })
    }

    pub fn codepoint_byte_converter(&self) -> CodepointByteConverter<'_, 'a> {
        CodepointByteConverter {
            reader: self,
            chunk_first_cp: 0,
            chunk_first_byte: 0,
            chunk: None,
            cursor_cp: 0,
            cursor: None,
        }
    }

    pub fn char_codepoint_converter(&self) -> CharCodepointConverter<'_, 'a> {
        CharCodepointConverter {
            reader: self,
            line: None,
        }
    }

    pub fn char_byte_converter(&self) -> CharByteConverter<'_, 'a> {
        CharByteConverter {
            chars: self.char_codepoint_converter(),
            codepoints: self.codepoint_byte_converter(),
        }
    }
}

/// Iterates codepoints; exposes the current codepoint, its validity, and
/// the byte iterator used to avoid re-descending the decoding tree.
pub struct CodepointIter<'a> {
    cursor: ByteCursor<'a>,
    encoding: &'static dyn Encoding,
    current: Option<(u32, bool)>,
    start_byte: usize,
}

impl<'a> CodepointIter<'a> {
    fn new(cursor: ByteCursor<'a>, encoding: &'static dyn Encoding) -> Self {
        let mut it = CodepointIter {
            cursor,
            encoding,
            current: None,
            start_byte: 0,
        };
        it.advance();
        it
    }

    /// Decodes the next codepoint; returns whether one was available.
    pub fn advance(&mut self) -> bool {
        self.start_byte = self.cursor.position();
        match self.encoding.decode_one(&mut self.cursor) {
            Some(d) => {
                self.current = Some((d.codepoint, d.valid));
                true
            }
            None => {
                self.current = None;
                false
            }
        }
    }

    pub fn ended(&self) -> bool {
        self.current.is_none()
    }

    /// The current codepoint (replacement marker on decode failure).
    pub fn codepoint(&self) -> Option<u32> {
        self.current.map(|(cp, _)| cp)
    }

    pub fn is_valid(&self) -> bool {
        self.current.map(|(_, valid)| valid).unwrap_or(false)
    }

    /// Byte position of the first byte of the current codepoint.
    pub fn byte_position(&self) -> usize {
        self.start_byte
    }
}

/// Iterates characters, combining the codepoint stream with the line
/// registry; a CRLF pair advances as a single character.
pub struct CharIter<'a> {
    reader: &'a InterpReader<'a>,
    codepoints: CodepointIter<'a>,
    line: usize,
    segment: LineSegment,
    column: usize,
}

impl<'a> CharIter<'a> {
    /// Whether the iterator currently sits on the line's break.
    pub fn is_linebreak(&self) -> bool {
        self.column == self.segment.nonbreak
    }

    pub fn line_ending(&self) -> LineEnding {
        self.segment.ending
    }

    pub fn column(&self) -> usize {
        self.column
    }

    pub fn line(&self) -> usize {
        self.line
    }

    pub fn codepoints(&self) -> &CodepointIter<'a> {
        &self.codepoints
    }

    pub fn ended(&self) -> bool {
        self.codepoints.ended()
    }

    /// Advances one character (one codepoint, or the full line ending).
    pub fn advance(&mut self) {
        if self.ended() {
            return;
        }
        if self.is_linebreak() {
            for _ in 0..self.segment.ending.codepoints() {
                self.codepoints.advance();
            }
            self.line += 1;
            self.column = 0;
            if let Ok(info) = self.reader.inner.linebreaks.line_info(self.line) {
                self.segment = *self
                    .reader
                    .inner
                    .linebreaks
                    .segment(info.cursor)
                    .expect("line cursor");
            }
        } else {
            self.codepoints.advance();
            self.column += 1;
        }
    }
}

/// Converts between codepoint and byte positions; caches the last chunk so
/// monotone query series stay cheap.
pub struct CodepointByteConverter<'a, 'r> {
    reader: &'a InterpReader<'r>,
    chunk_first_cp: usize,
    chunk_first_byte: usize,
    chunk: Option<DecodeChunk>,
    cursor_cp: usize,
    cursor: Option<ByteCursor<'a>>,
}

impl<'a, 'r> CodepointByteConverter<'a, 'r> {
    pub fn reset(&mut self) {
        self.chunk = None;
        self.cursor = None;
    }

    fn seek_chunk(&mut self, cp: usize) -> Result<()> {
        let (cursor, cp_before, bytes_before) = self.reader.inner.chunk_containing_cp(cp);
        let chunk = if cursor.is_end() {
            None
        } else {
            Some(*self.reader.inner.chunks.get(cursor).expect("chunk cursor"))
        };
        self.chunk_first_cp = cp_before;
        self.chunk_first_byte = bytes_before;
        self.chunk = chunk;
        self.cursor_cp = cp_before;
        self.cursor = Some(self.reader.buffer.cursor_at(bytes_before)?);
        Ok(())
    }

    /// Byte position of the first byte of codepoint `pos`. Queries should
    /// be non-decreasing; call [`Self::reset`] to start a new series.
    pub fn codepoint_to_byte(&mut self, pos: usize) -> Result<usize> {
        let total = self.reader.num_codepoints();
        if pos > total {
            return Err(Error::BadPosition {
                position: pos,
                len: total,
            });
        }
        let in_cached_chunk = match &self.chunk {
            Some(chunk) => {
                pos >= self.cursor_cp && pos < self.chunk_first_cp + chunk.codepoints
            }
            None => false,
        };
        if !in_cached_chunk {
            self.seek_chunk(pos)?;
        }
        let cursor = self.cursor.as_mut().expect("seeked");
        while self.cursor_cp < pos {
            let _ = self.reader.encoding.decode_one(cursor);
            self.cursor_cp += 1;
        }
        Ok(cursor.position())
    }

    /// Codepoint containing byte `pos` and the byte position of its first
    /// byte. Queries should be non-decreasing.
    pub fn byte_to_codepoint(&mut self, pos: usize) -> Result<(usize, usize)> {
        let total_bytes = self.reader.buffer.len();
        if pos > total_bytes {
            return Err(Error::BadPosition {
                position: pos,
                len: total_bytes,
            });
        }
        let cached_ok = match (&self.chunk, &self.cursor) {
            (Some(chunk), Some(cursor)) => {
                pos >= cursor.position() && pos < self.chunk_first_byte + chunk.bytes
            }
            _ => false,
        };
        if !cached_ok {
            let (cursor, cp_before, bytes_before) =
                self.reader.inner.chunk_containing_byte(pos);
            let chunk = if cursor.is_end() {
                None
            } else {
                Some(*self.reader.inner.chunks.get(cursor).expect("chunk cursor"))
            };
            self.chunk_first_cp = cp_before;
            self.chunk_first_byte = bytes_before;
            self.chunk = chunk;
            self.cursor_cp = cp_before;
            self.cursor = Some(self.reader.buffer.cursor_at(bytes_before)?);
        }
        let cursor = self.cursor.as_mut().expect("seeked");
        loop {
            let start = cursor.position();
            let mut probe = cursor.clone();
            if self.reader.encoding.decode_one(&mut probe).is_none() {
                return Ok((self.cursor_cp, start));
            }
            if probe.position() > pos {
                return Ok((self.cursor_cp, start));
            }
            *cursor = probe;
            self.cursor_cp += 1;
        }
    }
}

/// Converts between character and codepoint positions with a cached line.
pub struct CharCodepointConverter<'a, 'r> {
    reader: &'a InterpReader<'r>,
    /// Cached line: (segment, first char, first codepoint).
    line: Option<(LineSegment, usize, usize)>,
}

impl<'a, 'r> CharCodepointConverter<'a, 'r> {
    pub fn reset(&mut self) {
        self.line = None;
    }

    pub fn char_to_codepoint(&mut self, pos: usize) -> Result<usize> {
        if let Some((segment, first_char, first_cp)) = self.line {
            if pos >= first_char && pos < first_char + segment.chars() {
                return Ok(first_cp + (pos - first_char));
            }
        }
        let at = self.reader.inner.linebreaks.line_of_char(pos)?;
        let segment = *self
            .reader
            .inner
            .linebreaks
            .segment(at.cursor)
            .expect("line cursor");
        self.line = Some((segment, at.first_char, at.first_codepoint));
        Ok(at.first_codepoint + at.column)
    }

    pub fn codepoint_to_char(&mut self, pos: usize) -> Result<usize> {
        if let Some((segment, first_char, first_cp)) = self.line {
            if pos >= first_cp && pos < first_cp + segment.codepoints() {
                return Ok(first_char + (pos - first_cp).min(segment.nonbreak));
            }
        }
        let at = self.reader.inner.linebreaks.line_of_codepoint(pos)?;
        let segment = *self
            .reader
            .inner
            .linebreaks
            .segment(at.cursor)
            .expect("line cursor");
        self.line = Some((segment, at.first_char, at.first_codepoint));
        Ok(at.first_char + at.column.min(segment.nonbreak))
    }
}

/// Chains the two converters into character ↔ byte conversion.
pub struct CharByteConverter<'a, 'r> {
    chars: CharCodepointConverter<'a, 'r>,
    codepoints: CodepointByteConverter<'a, 'r>,
}

impl<'a, 'r> CharByteConverter<'a, 'r> {
    pub fn reset(&mut self) {
        self.chars.reset();
        self.codepoints.reset();
    }

    pub fn char_to_byte(&mut self, pos: usize) -> Result<usize> {
        let cp = self.chars.char_to_codepoint(pos)?;
        self.codepoints.codepoint_to_byte(cp)
    }

    pub fn byte_to_char(&mut self, pos: usize) -> Result<usize> {
        let (cp, _) = self.codepoints.byte_to_codepoint(pos)?;
        self.chars.codepoint_to_char(cp)
    }
}
