//! Resource and handle registry.
//!
//! File handles handed to the kernel are allocated here from a
//! monotonic counter and never reused within a session. The registry is
//! how the core enforces the handle state machine: an operation on a
//! handle that was never allocated, or was already released, fails with
//! `EBADF` before any handler runs.
//!
//! The registry also maintains the per-inode lookup counter: the number
//! of references the kernel holds, incremented by successful
//! lookup/create replies and decremented by forget. At zero the core is
//! free to drop any cached state for the inode.

use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;

use crate::error::{Errno, FsError, FsResult};
use crate::handlers::FileInfo;
use crate::types::{Fd, Ino};

/// State tracked for one open handle.
#[derive(Debug, Clone)]
pub(crate) struct HandleEntry {
    /// Inode the handle was opened on.
    pub(crate) ino: Ino,
    /// The handler's open state, including its private fh slot.
    pub(crate) fi: FileInfo,
    /// Directory handle (opendir) rather than file handle (open).
    pub(crate) dir: bool,
}

/// Allocator and table for open handles, plus lookup counting.
#[derive(Debug)]
pub struct HandleRegistry {
    next_fh: AtomicU64,
    handles: DashMap<u64, HandleEntry>,
    lookups: DashMap<u64, u64>,
}

impl HandleRegistry {
    pub(crate) fn new() -> HandleRegistry {
        HandleRegistry {
            // Zero is reserved for "no handle".
            next_fh: AtomicU64::new(1),
            handles: DashMap::new(),
            lookups: DashMap::new(),
        }
    }

    /// Allocates a fresh handle for the given open state.
    pub(crate) fn register(&self, ino: Ino, fi: FileInfo, dir: bool) -> Fd {
        let fh = self.next_fh.fetch_add(1, Ordering::Relaxed);
        self.handles.insert(fh, HandleEntry { ino, fi, dir });
        Fd(fh)
    }

    /// Looks up an open handle of the expected kind; `EBADF` otherwise.
    pub(crate) fn get(&self, fh: Fd, dir: bool) -> FsResult<HandleEntry> {
        match self.handles.get(&fh.0) {
            Some(entry) if entry.dir == dir => Ok(entry.clone()),
            Some(_) => Err(FsError::with_message(Errno::EBADF, "handle kind mismatch")),
            None => Err(FsError::new(Errno::EBADF)),
        }
    }

    /// Removes an open handle; `EBADF` when it was never allocated or
    /// was already released.
    pub(crate) fn deregister(&self, fh: Fd, dir: bool) -> FsResult<HandleEntry> {
        match self.handles.get(&fh.0) {
            Some(entry) if entry.dir != dir => {
                return Err(FsError::with_message(Errno::EBADF, "handle kind mismatch"));
            }
            None => return Err(FsError::new(Errno::EBADF)),
            Some(_) => {}
        }
        self.handles
            .remove(&fh.0)
            .map(|(_, entry)| entry)
            .ok_or_else(|| FsError::new(Errno::EBADF))
    }

    /// Number of handles currently open.
    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    /// Records one kernel reference to the inode (a successful lookup
    /// or create reply).
    pub(crate) fn note_lookup(&self, ino: Ino) {
        *self.lookups.entry(ino.0).or_insert(0) += 1;
    }

    /// Drops `nlookup` kernel references; saturating, and the entry
    /// disappears at zero.
    pub(crate) fn forget(&self, ino: Ino, nlookup: u64) {
        let remove = match self.lookups.get_mut(&ino.0) {
            Some(mut count) => {
                *count = count.saturating_sub(nlookup);
                *count == 0
            }
            None => false,
        };
        if remove {
            self.lookups.remove_if(&ino.0, |_, count| *count == 0);
        }
    }

    /// Outstanding kernel references to the inode.
    pub fn lookup_count(&self, ino: Ino) -> u64 {
        self.lookups.get(&ino.0).map(|count| *count).unwrap_or(0)
    }
}
