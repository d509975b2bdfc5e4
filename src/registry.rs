//! Buffer registry
//!
//! Owns the long-lived buffers of an application. File-backed buffers are
//! identified by their canonical path; anonymous buffers draw an integer
//! id from a small pool that reuses freed slots. Interpretations are
//! cached per `(buffer, encoding)` so every consumer of the same document
//! and encoding shares one decoded view.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use log::debug;

use crate::buffer::{Buffer, BufferId};
use crate::encoding::Encoding;
use crate::error::Result;
use crate::interp::Interpretation;

#[derive(Default)]
pub struct BufferRegistry {
    file_buffers: HashMap<PathBuf, Rc<Buffer>>,
    anonymous: HashMap<usize, Rc<Buffer>>,
    freed_ids: Vec<usize>,
    next_id: usize,
    interpretations: HashMap<(BufferId, &'static str), Rc<Interpretation>>,
}

impl BufferRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens the file at `path`, reading it once; returns the existing
    /// buffer if the path is already open.
    pub fn open(&mut self, path: &Path) -> Result<Rc<Buffer>> {
        let canonical = path.canonicalize()?;
        if let Some(existing) = self.file_buffers.get(&canonical) {
            return Ok(Rc::clone(existing));
        }
        let buffer = Buffer::from_file(canonical.clone())?;
        debug!("opened buffer {:?}", canonical);
        self.file_buffers.insert(canonical, Rc::clone(&buffer));
        Ok(buffer)
    }

    /// Creates an empty anonymous buffer with an id from the pool.
    pub fn new_anonymous(&mut self) -> Rc<Buffer> {
        self.new_anonymous_with(&[])
    }

    /// Creates an anonymous buffer holding `bytes`.
    pub fn new_anonymous_with(&mut self, bytes: &[u8]) -> Rc<Buffer> {
        let id = self.freed_ids.pop().unwrap_or_else(|| {
            let id = self.next_id;
            self.next_id += 1;
            id
        });
        let buffer = Buffer::from_bytes(BufferId::Anonymous(id), bytes);
        self.anonymous.insert(id, Rc::clone(&buffer));
        buffer
    }

    /// Returns the open buffer for `path`, if any.
    pub fn get_file(&self, path: &Path) -> Option<Rc<Buffer>> {
        let canonical = path.canonicalize().ok()?;
        self.file_buffers.get(&canonical).cloned()
    }

    /// The interpretation of `buffer` under `encoding`, creating and
    /// caching it on first use.
    pub fn interpretation(
        &mut self,
        buffer: &Rc<Buffer>,
        encoding: &'static dyn Encoding,
    ) -> Rc<Interpretation> {
        let key = (buffer.id().clone(), encoding.name());
        if let Some(existing) = self.interpretations.get(&key) {
            return Rc::clone(existing);
        }
        let interp = Interpretation::new(Rc::clone(buffer), encoding);
        self.interpretations.insert(key, Rc::clone(&interp));
        interp
    }

    /// Closes a buffer, releasing its identity (anonymous ids return to
    /// the pool) and dropping its cached interpretations.
    pub fn close(&mut self, buffer: &Rc<Buffer>) {
        let id = buffer.id().clone();
        self.interpretations.retain(|(bid, _), _| *bid != id);
        match &id {
            BufferId::Path(path) => {
                self.file_buffers.remove(path);
            }
            BufferId::Anonymous(n) => {
                if self.anonymous.remove(n).is_some() {
                    self.freed_ids.push(*n);
                }
            }
        }
        debug!("closed buffer {:?}", id);
    }

    /// Visits every open buffer.
    pub fn for_each_buffer(&self, mut f: impl FnMut(&Rc<Buffer>)) {
        for buffer in self.file_buffers.values() {
            f(buffer);
        }
        for buffer in self.anonymous.values() {
            f(buffer);
        }
    }

    /// Visits every cached interpretation.
    pub fn for_each_interpretation(&self, mut f: impl FnMut(&Rc<Interpretation>)) {
        for interp in self.interpretations.values() {
            f(interp);
        }
    }

    pub fn open_buffer_count(&self) -> usize {
        self.file_buffers.len() + self.anonymous.len()
    }
}
