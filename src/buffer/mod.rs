//! Chunked byte buffer
//!
//! Stores the raw contents of a document as a balanced tree of byte chunks
//! (at most [`MAX_CHUNK_BYTES`] each) whose subtree aggregate is the byte
//! count, giving O(log n) random access and O(log n + k) edits. All
//! mutation goes through the scoped [`Modifier`], which records a linear
//! undo/redo history and publishes edit events.

use std::cell::{Ref, RefCell};
use std::path::PathBuf;
use std::rc::Rc;

use crate::constants::buffer::MAX_CHUNK_BYTES;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::tree::{Augment, Branch, Cursor, Tree};

mod modifier;
mod patch;
#[cfg(test)]
mod tests;

pub use modifier::{EditType, Modification, Modifier};
pub use patch::{ModificationPosition, PatchStrategy, PositionPatcher};

/// Identifies the origin of an edit so observers can tell their own edits
/// apart from everyone else's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EditSource(pub u64);

/// The unique identity of a buffer: its canonical path when file-backed, or
/// an id drawn from the registry's pool when anonymous.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BufferId {
    Path(PathBuf),
    Anonymous(usize),
}

/// One edit: the ordered modifications made by a single modifier scope.
pub type Edit = Rc<Vec<Modification>>;

/// Payload of [`Buffer::begin_edit`].
#[derive(Debug, Clone)]
pub struct BeginEditInfo {
    pub edit_type: EditType,
    pub source: EditSource,
}

/// Payload of [`Buffer::begin_modify`]; fired before the bytes of one
/// modification change.
#[derive(Debug, Clone)]
pub struct BeginModificationInfo {
    /// Position of the modification, after all previous modifications of
    /// the same edit.
    pub position: usize,
    /// Number of bytes about to be erased at `position`.
    pub erase_len: usize,
}

/// Payload of [`Buffer::end_modify`]; fired once the bytes of one
/// modification are in place.
#[derive(Debug, Clone)]
pub struct EndModificationInfo {
    pub position: usize,
    pub removed_len: usize,
    pub added_len: usize,
}

/// Payload of [`Buffer::end_edit`].
#[derive(Debug, Clone)]
pub struct EndEditInfo {
    pub edit_type: EditType,
    pub source: EditSource,
    /// The modifications of this edit. For undo edits the removed and added
    /// sides are to be read reversed.
    pub edit: Edit,
    /// Accurate byte positions of the edit, usable with
    /// [`PositionPatcher`].
    pub positions: Vec<ModificationPosition>,
}

/// A chunk of contiguous bytes; tree aggregate is the byte count.
pub(crate) struct ByteChunk {
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct ByteSynth {
    pub bytes: usize,
}

impl Augment for ByteChunk {
    type Synth = ByteSynth;

    fn synthesize(&self, left: Option<&ByteSynth>, right: Option<&ByteSynth>) -> ByteSynth {
        ByteSynth {
            bytes: self.data.len()
                + left.map_or(0, |s| s.bytes)
                + right.map_or(0, |s| s.bytes),
        }
    }
}

pub(crate) struct BufferInner {
    pub chunks: Tree<ByteChunk>,
    history: Vec<Edit>,
    cur_edit: usize,
}

/// A buffer of raw bytes, shared between its interpretations through `Rc`.
pub struct Buffer {
    pub(crate) inner: RefCell<BufferInner>,
    id: BufferId,
    /// Invoked when this buffer is about to be modified.
    pub begin_edit: Event<BeginEditInfo>,
    /// Invoked before each modification's bytes change.
    pub begin_modify: Event<BeginModificationInfo>,
    /// Invoked after each modification's bytes are in place.
    pub end_modify: Event<EndModificationInfo>,
    /// Invoked when this buffer has been modified.
    pub end_edit: Event<EndEditInfo>,
    /// Invoked after every `end_edit` handler has run; interpretations
    /// publish their own end-of-edit notification from here so that it
    /// always comes last.
    pub(crate) post_end_edit: Event<EndEditInfo>,
}

impl Buffer {
    /// Creates a buffer holding `bytes`, laid out into initial chunks.
    pub fn from_bytes(id: BufferId, bytes: &[u8]) -> Rc<Buffer> {
        let mut chunks = Tree::new();
        for piece in bytes.chunks(MAX_CHUNK_BYTES) {
            chunks.push_back(ByteChunk {
                data: piece.to_vec(),
            });
        }
        Rc::new(Buffer {
            inner: RefCell::new(BufferInner {
                chunks,
                history: Vec::new(),
                cur_edit: 0,
            }),
            id,
            begin_edit: Event::new(),
            begin_modify: Event::new(),
            end_modify: Event::new(),
            end_edit: Event::new(),
            post_end_edit: Event::new(),
        })
    }

    /// Creates a buffer by reading the file at `path` once.
    pub fn from_file(path: PathBuf) -> Result<Rc<Buffer>> {
        let bytes = std::fs::read(&path)?;
        Ok(Self::from_bytes(BufferId::Path(path), &bytes))
    }

    pub fn id(&self) -> &BufferId {
        &self.id
    }

    /// Total number of bytes, from the root aggregate.
    pub fn len(&self) -> usize {
        self.inner.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Borrows the buffer contents for reading.
    pub fn read(&self) -> BufferReader<'_> {
        BufferReader {
            inner: self.inner.borrow(),
        }
    }

    /// Copies the bytes in `[begin, end)`.
    pub fn clip(&self, begin: usize, end: usize) -> Result<Vec<u8>> {
        self.inner.borrow().clip(begin, end)
    }

    pub fn can_undo(&self) -> bool {
        self.inner.borrow().cur_edit > 0
    }

    pub fn can_redo(&self) -> bool {
        let inner = self.inner.borrow();
        inner.cur_edit < inner.history.len()
    }

    /// Number of recorded edits.
    pub fn history_len(&self) -> usize {
        self.inner.borrow().history.len()
    }

    /// Index after the last applied edit.
    pub fn current_edit(&self) -> usize {
        self.inner.borrow().cur_edit
    }

    /// Reverts the previous edit. Returns whether an edit was undone.
    pub fn undo(self: &Rc<Self>, source: EditSource) -> bool {
        let entry = {
            let inner = self.inner.borrow();
            if inner.cur_edit == 0 {
                return false;
            }
            Rc::clone(&inner.history[inner.cur_edit - 1])
        };
        let mut modifier = Modifier::begin(Rc::clone(self), source, EditType::Undo);
        self.inner.borrow_mut().cur_edit -= 1;
        for modification in entry.iter() {
            modifier.replay_undo(modification);
        }
        modifier.end_replay(entry);
        true
    }

    /// Restores the next undone edit. Returns whether an edit was redone.
    pub fn redo(self: &Rc<Self>, source: EditSource) -> bool {
        let entry = {
            let inner = self.inner.borrow();
            if inner.cur_edit >= inner.history.len() {
                return false;
            }
            Rc::clone(&inner.history[inner.cur_edit])
        };
        let mut modifier = Modifier::begin(Rc::clone(self), source, EditType::Redo);
        for modification in entry.iter() {
            modifier.replay_redo(modification);
        }
        self.inner.borrow_mut().cur_edit += 1;
        modifier.end_replay(entry);
        true
    }

    /// Validates chunk invariants; used by tests.
    pub fn check_integrity(&self) -> bool {
        let inner = self.inner.borrow();
        if !inner.chunks.check_integrity() {
            return false;
        }
        let mut total = 0;
        for chunk in inner.chunks.iter() {
            if chunk.data.is_empty() || chunk.data.len() > MAX_CHUNK_BYTES {
                return false;
            }
            total += chunk.data.len();
        }
        total == inner.len()
    }
}

impl BufferInner {
    pub fn len(&self) -> usize {
        self.chunks.root_synth().map_or(0, |s| s.bytes)
    }

    /// Finds the chunk containing byte `pos` and the offset inside it.
    /// `pos == len` yields the end cursor.
    pub fn chunk_at(&self, pos: usize) -> (Cursor, usize) {
        let mut remaining = pos;
        let cursor = self.chunks.find_custom(|chunk, left, _| {
            let left_bytes = left.map_or(0, |s| s.bytes);
            if remaining < left_bytes {
                Branch::Left
            } else if remaining < left_bytes + chunk.data.len() {
                remaining -= left_bytes;
                Branch::Stop
            } else {
                remaining -= left_bytes + chunk.data.len();
                Branch::Right
            }
        });
        (cursor, remaining)
    }

    pub fn clip(&self, begin: usize, end: usize) -> Result<Vec<u8>> {
        let len = self.len();
        if begin > end || end > len {
            return Err(Error::BadPosition {
                position: end.max(begin),
                len,
            });
        }
        let mut out = Vec::with_capacity(end - begin);
        let (mut cursor, mut offset) = self.chunk_at(begin);
        let mut remaining = end - begin;
        while remaining > 0 {
            let chunk = self.chunks.get(cursor).expect("clip inside buffer");
            let take = remaining.min(chunk.data.len() - offset);
            out.extend_from_slice(&chunk.data[offset..offset + take]);
            remaining -= take;
            offset = 0;
            cursor = self.chunks.next(cursor).expect("clip inside buffer");
        }
        Ok(out)
    }

    pub fn byte_at(&self, pos: usize) -> Result<u8> {
        let (cursor, offset) = self.chunk_at(pos);
        if cursor.is_end() {
            return Err(Error::BadPosition {
                position: pos,
                len: self.len(),
            });
        }
        Ok(self.chunks.get(cursor).expect("checked cursor").data[offset])
    }

    /// Inserts bytes at `pos`, splitting and filling chunks as needed.
    pub fn insert_bytes(&mut self, pos: usize, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let (at, offset) = self.chunk_at(pos);
        let mut tail = Vec::new();
        let insert_at;
        let append_to;
        if pos == 0 {
            insert_at = self.chunks.first();
            append_to = None;
        } else if at.is_end() || offset == 0 {
            // chunk boundary which is not the very front: extend the
            // preceding chunk
            insert_at = at;
            append_to = Some(self.chunks.prev(at).expect("pos > 0"));
        } else {
            // middle of a chunk: split, keep the tail for later
            tail = self
                .chunks
                .update(at, |c| c.data.split_off(offset))
                .expect("chunk cursor");
            insert_at = self.chunks.next(at).expect("chunk cursor");
            append_to = Some(at);
        }

        // fill a working list of chunk buffers, the first of which is the
        // chunk being appended to (if any)
        let mut out: Vec<Vec<u8>> = vec![match append_to {
            Some(c) => self
                .chunks
                .update(c, |ch| std::mem::take(&mut ch.data))
                .expect("chunk cursor"),
            None => Vec::with_capacity(MAX_CHUNK_BYTES.min(bytes.len())),
        }];
        for &b in bytes {
            if out.last().expect("nonempty").len() == MAX_CHUNK_BYTES {
                out.push(Vec::with_capacity(MAX_CHUNK_BYTES));
            }
            out.last_mut().expect("nonempty").push(b);
        }
        if !tail.is_empty() {
            let last = out.last_mut().expect("nonempty");
            if last.len() + tail.len() <= MAX_CHUNK_BYTES {
                last.extend_from_slice(&tail);
            } else {
                out.push(tail);
            }
        }

        let mut rest = out.into_iter();
        match append_to {
            Some(c) => {
                let first = rest.next().expect("nonempty");
                self.chunks
                    .update(c, |ch| ch.data = first)
                    .expect("chunk cursor");
            }
            None => {
                let first = rest.next().expect("nonempty");
                if !first.is_empty() {
                    self.chunks
                        .insert_before(insert_at, ByteChunk { data: first })
                        .expect("own cursor");
                }
            }
        }
        for data in rest {
            self.chunks
                .insert_before(insert_at, ByteChunk { data })
                .expect("own cursor");
        }
        self.try_merge_small(insert_at);
    }

    /// Erases the bytes in `[begin, end)`.
    pub fn erase_bytes(&mut self, begin: usize, end: usize) {
        if begin == end {
            return;
        }
        let (bc, boff) = self.chunk_at(begin);
        let (ec, eoff) = self.chunk_at(end);
        if !bc.is_end() && bc == ec {
            // entirely inside one chunk
            self.chunks
                .update(bc, |c| {
                    c.data.drain(boff..eoff);
                })
                .expect("chunk cursor");
            return;
        }
        let range_start = if boff > 0 {
            self.chunks
                .update(bc, |c| c.data.truncate(boff))
                .expect("chunk cursor");
            self.chunks.next(bc).expect("chunk cursor")
        } else {
            bc
        };
        if eoff > 0 {
            self.chunks
                .update(ec, |c| {
                    c.data.drain(..eoff);
                })
                .expect("chunk cursor");
        }
        self.chunks
            .erase_range(range_start, ec)
            .expect("own cursors");
        self.try_merge_small(ec);
    }

    /// Merges the chunk at `at` with a neighbour when their combined size
    /// stays under the limit. Prefers the previous neighbour.
    fn try_merge_small(&mut self, at: Cursor) {
        if at.is_end() {
            return;
        }
        let len = self.chunks.get(at).expect("chunk cursor").data.len();
        if len * 2 > MAX_CHUNK_BYTES {
            return;
        }
        if at != self.chunks.first() {
            let prev = self.chunks.prev(at).expect("not first");
            let prev_len = self.chunks.get(prev).expect("chunk cursor").data.len();
            if prev_len + len < MAX_CHUNK_BYTES {
                let moved = self
                    .chunks
                    .update(at, |c| std::mem::take(&mut c.data))
                    .expect("chunk cursor");
                self.chunks
                    .update(prev, |c| c.data.extend_from_slice(&moved))
                    .expect("chunk cursor");
                self.chunks.erase(at).expect("chunk cursor");
                return;
            }
        }
        let next = self.chunks.next(at).expect("chunk cursor");
        if !next.is_end() {
            let next_len = self.chunks.get(next).expect("chunk cursor").data.len();
            if next_len + len < MAX_CHUNK_BYTES {
                let moved = self
                    .chunks
                    .update(next, |c| std::mem::take(&mut c.data))
                    .expect("chunk cursor");
                self.chunks
                    .update(at, |c| c.data.extend_from_slice(&moved))
                    .expect("chunk cursor");
                self.chunks.erase(next).expect("chunk cursor");
            }
        }
    }

    pub(crate) fn append_edit(&mut self, edit: Edit) {
        self.history.truncate(self.cur_edit);
        self.history.push(edit);
        self.cur_edit = self.history.len();
    }
}

/// Borrow guard for reading buffer contents.
pub struct BufferReader<'a> {
    inner: Ref<'a, BufferInner>,
}

impl<'a> BufferReader<'a> {
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn byte_at(&self, pos: usize) -> Result<u8> {
        self.inner.byte_at(pos)
    }

    pub fn clip(&self, begin: usize, end: usize) -> Result<Vec<u8>> {
        self.inner.clip(begin, end)
    }

    /// A byte iterator starting at `pos` (which may equal the length).
    pub fn cursor_at(&self, pos: usize) -> Result<ByteCursor<'_>> {
        let len = self.inner.len();
        if pos > len {
            return Err(Error::BadPosition { position: pos, len });
        }
        let (chunk, offset) = self.inner.chunk_at(pos);
        Ok(ByteCursor {
            inner: &self.inner,
            chunk,
            offset,
            pos,
        })
    }
}

/// Forward byte iterator over the buffer. Walks chunk by chunk so that
/// sequential decoding never re-descends the tree.
#[derive(Clone)]
pub struct ByteCursor<'a> {
    inner: &'a BufferInner,
    chunk: Cursor,
    offset: usize,
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// Absolute position of the byte this cursor points at.
    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_end(&self) -> bool {
        self.chunk.is_end()
    }

    /// The byte at the current position, if any.
    pub fn peek(&self) -> Option<u8> {
        if self.chunk.is_end() {
            return None;
        }
        let chunk = self.inner.chunks.get(self.chunk).expect("live chunk");
        Some(chunk.data[self.offset])
    }

    /// Advances past the current byte.
    pub fn advance(&mut self) {
        if self.chunk.is_end() {
            return;
        }
        let chunk_len = self
            .inner
            .chunks
            .get(self.chunk)
            .expect("live chunk")
            .data
            .len();
        self.pos += 1;
        self.offset += 1;
        if self.offset == chunk_len {
            self.chunk = self.inner.chunks.next(self.chunk).expect("live chunk");
            self.offset = 0;
        }
    }

    /// Returns the current byte and advances.
    pub fn next_byte(&mut self) -> Option<u8> {
        let b = self.peek()?;
        self.advance();
        Some(b)
    }
}
