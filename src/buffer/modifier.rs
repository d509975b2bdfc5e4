//! Scoped buffer modification
//!
//! A [`Modifier`] is the only way to change a buffer's bytes. It publishes
//! `begin_edit` when opened, applies each modification immediately (with
//! `begin_modify`/`end_modify` around every one), and on `end` (or drop)
//! commits the edit to history and publishes `end_edit` with the byte
//! position-patch table.

use std::rc::Rc;

use log::debug;

use super::{
    BeginEditInfo, BeginModificationInfo, Buffer, Edit, EditSource, EndEditInfo,
    EndModificationInfo, ModificationPosition,
};
use crate::error::{Error, Result};

/// The specific kind of an edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EditType {
    /// A normal edit made by the user through an editor.
    Normal,
    /// An edit reverting a previous edit.
    Undo,
    /// An edit restoring a previously undone edit.
    Redo,
    /// An edit made externally (e.g. the file changed on disk).
    External,
}

/// A single modification: erase `removed` at `position`, insert `added`
/// there. `position` is the value after all previous modifications of the
/// same edit have been applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub position: usize,
    pub removed: Vec<u8>,
    pub added: Vec<u8>,
}

impl Modification {
    pub fn position_info(&self) -> ModificationPosition {
        ModificationPosition {
            position: self.position,
            removed: self.removed.len(),
            added: self.added.len(),
        }
    }
}

/// Scoped handle for one edit transaction.
pub struct Modifier {
    buffer: Rc<Buffer>,
    source: EditSource,
    edit_type: EditType,
    modifications: Vec<Modification>,
    positions: Vec<ModificationPosition>,
    /// Running old-to-new offset; may wrap, which still works as intended.
    diff: usize,
    finished: bool,
}

impl Modifier {
    /// Opens an edit on `buffer` and publishes `begin_edit`.
    pub fn begin(buffer: Rc<Buffer>, source: EditSource, edit_type: EditType) -> Modifier {
        buffer.begin_edit.emit(&BeginEditInfo { edit_type, source });
        Modifier {
            buffer,
            source,
            edit_type,
            modifications: Vec::new(),
            positions: Vec::new(),
            diff: 0,
            finished: false,
        }
    }

    /// The offset to add to positions obtained before this edit to account
    /// for the modifications made so far.
    pub fn fixup_offset(&self) -> usize {
        self.diff
    }

    /// Erases `erase_len` bytes at `pos` and inserts `insert` there, where
    /// `pos` was obtained before the edit began; the running offset of the
    /// previous modifications is added internally. Modifications must be
    /// issued with increasing pre-edit positions.
    pub fn modify(&mut self, pos: usize, erase_len: usize, insert: Vec<u8>) -> Result<()> {
        self.modify_raw(pos.wrapping_add(self.diff), erase_len, insert)
    }

    /// Like [`Modifier::modify`], but `pos` already accounts for all
    /// previous modifications of this edit.
    pub fn modify_raw(&mut self, pos: usize, erase_len: usize, insert: Vec<u8>) -> Result<()> {
        let len = self.buffer.len();
        let end = pos.checked_add(erase_len).ok_or(Error::BadPosition {
            position: pos,
            len,
        })?;
        if end > len {
            return Err(Error::BadPosition { position: end, len });
        }
        self.buffer.begin_modify.emit(&BeginModificationInfo {
            position: pos,
            erase_len,
        });
        let removed = {
            let mut inner = self.buffer.inner.borrow_mut();
            let removed = inner.clip(pos, end).expect("validated range");
            inner.erase_bytes(pos, end);
            inner.insert_bytes(pos, &insert);
            removed
        };
        self.diff = self
            .diff
            .wrapping_add(insert.len())
            .wrapping_sub(removed.len());
        self.buffer.end_modify.emit(&EndModificationInfo {
            position: pos,
            removed_len: removed.len(),
            added_len: insert.len(),
        });
        self.positions.push(ModificationPosition {
            position: pos,
            removed: removed.len(),
            added: insert.len(),
        });
        self.modifications.push(Modification {
            position: pos,
            removed,
            added: insert,
        });
        Ok(())
    }

    /// Reverts a recorded modification. Used by undo; not recorded in
    /// history.
    pub(crate) fn replay_undo(&mut self, modification: &Modification) {
        let pos = modification.position.wrapping_add(self.diff);
        self.buffer.begin_modify.emit(&BeginModificationInfo {
            position: pos,
            erase_len: modification.added.len(),
        });
        {
            let mut inner = self.buffer.inner.borrow_mut();
            inner.erase_bytes(pos, pos + modification.added.len());
            inner.insert_bytes(pos, &modification.removed);
        }
        self.diff = self
            .diff
            .wrapping_add(modification.removed.len())
            .wrapping_sub(modification.added.len());
        self.buffer.end_modify.emit(&EndModificationInfo {
            position: pos,
            removed_len: modification.added.len(),
            added_len: modification.removed.len(),
        });
        self.positions.push(ModificationPosition {
            position: pos,
            removed: modification.added.len(),
            added: modification.removed.len(),
        });
    }

    /// Re-applies a recorded modification. Used by redo; not recorded in
    /// history. Recorded positions already account for earlier
    /// modifications of the edit, so no fixup is applied.
    pub(crate) fn replay_redo(&mut self, modification: &Modification) {
        self.buffer.begin_modify.emit(&BeginModificationInfo {
            position: modification.position,
            erase_len: modification.removed.len(),
        });
        {
            let mut inner = self.buffer.inner.borrow_mut();
            inner.erase_bytes(
                modification.position,
                modification.position + modification.removed.len(),
            );
            inner.insert_bytes(modification.position, &modification.added);
        }
        self.diff = self
            .diff
            .wrapping_add(modification.added.len())
            .wrapping_sub(modification.removed.len());
        self.buffer.end_modify.emit(&EndModificationInfo {
            position: modification.position,
            removed_len: modification.removed.len(),
            added_len: modification.added.len(),
        });
        self.positions.push(modification.position_info());
    }

    /// Commits the modifications as a new history entry (truncating the
    /// redo tail) and publishes `end_edit`. Also runs on drop.
    pub fn end(mut self) {
        self.finish();
    }

    /// Finishes an undo/redo edit: publishes `end_edit` with the replayed
    /// entry without touching history.
    pub(crate) fn end_replay(mut self, edit: Edit) {
        self.finished = true;
        let positions = std::mem::take(&mut self.positions);
        let info = EndEditInfo {
            edit_type: self.edit_type,
            source: self.source,
            edit,
            positions,
        };
        self.buffer.end_edit.emit(&info);
        self.buffer.post_end_edit.emit(&info);
    }

    fn finish(&mut self) {
        if self.finished {
            return;
        }
        self.finished = true;
        let edit: Edit = Rc::new(std::mem::take(&mut self.modifications));
        debug!(
            "committing edit: {} modification(s), buffer len {}",
            edit.len(),
            self.buffer.len()
        );
        self.buffer.inner.borrow_mut().append_edit(Rc::clone(&edit));
        let positions = std::mem::take(&mut self.positions);
        let info = EndEditInfo {
            edit_type: self.edit_type,
            source: self.source,
            edit,
            positions,
        };
        self.buffer.end_edit.emit(&info);
        self.buffer.post_end_edit.emit(&info);
    }
}

impl Drop for Modifier {
    fn drop(&mut self) {
        self.finish();
    }
}
