//! Per-tree lock bookkeeping. Each tree slot admits any number of readers
//! or exactly one writer. Holder thread ids are recorded so a thread that
//! already holds a conflicting lock on the same slot fails fast instead of
//! deadlocking against itself.

use std::thread::ThreadId;

use eyre::{ensure, Result};
use smallvec::SmallVec;

#[derive(Debug, Default)]
pub(crate) struct SlotLock {
    readers: SmallVec<[ThreadId; 4]>,
    writer: Option<ThreadId>,
}

impl SlotLock {
    pub(crate) fn writer(&self) -> Option<ThreadId> {
        self.writer
    }

    pub(crate) fn holds_read(&self, thread: ThreadId) -> bool {
        self.readers.contains(&thread)
    }

    pub(crate) fn can_read(&self) -> bool {
        self.writer.is_none()
    }

    pub(crate) fn can_write(&self) -> bool {
        self.writer.is_none() && self.readers.is_empty()
    }

    pub(crate) fn add_reader(&mut self, thread: ThreadId) {
        debug_assert!(self.writer.is_none());
        self.readers.push(thread);
    }

    pub(crate) fn remove_reader(&mut self, thread: ThreadId) -> Result<()> {
        let index = self
            .readers
            .iter()
            .position(|&t| t == thread)
            .ok_or_else(|| eyre::eyre!("no read lock held by this thread"))?;
        self.readers.swap_remove(index);
        Ok(())
    }

    pub(crate) fn set_writer(&mut self, thread: ThreadId) {
        debug_assert!(self.can_write());
        self.writer = Some(thread);
    }

    pub(crate) fn clear_writer(&mut self, thread: ThreadId) -> Result<()> {
        ensure!(
            self.writer == Some(thread),
            "no write lock held by this thread"
        );
        self.writer = None;
        Ok(())
    }
}
