//! File system collaborator
//!
//! The block-device file system is external. It is reached through
//! [`FileSystem`] and the per-open [`File`] handles it returns.
//!
//! The storage layer is not reentrant, so every open, create, and remove
//! system-wide goes through the single lock held by [`FsLock`].

use alloc::boxed::Box;
use alloc::sync::Arc;

use spin::{Mutex, MutexGuard};

/// An open file.
///
/// Dropping the handle closes it.
pub trait File: Send {
    /// Read at the current position. Returns bytes read, short at end of file.
    fn read(&mut self, buf: &mut [u8]) -> usize;

    /// Write at the current position, never growing the file.
    /// Returns bytes written; zero while writes are denied.
    fn write(&mut self, buf: &[u8]) -> usize;

    /// Move the position. Positions past the end are allowed.
    fn seek(&mut self, pos: u32);

    /// Current position.
    fn tell(&self) -> u32;

    /// File size in bytes.
    fn length(&self) -> u32;

    /// Refuse writes to the underlying file through any handle.
    fn deny_write(&mut self);

    /// Undo one `deny_write` made through this handle.
    fn allow_write(&mut self);
}

/// Named-file operations.
pub trait FileSystem: Send + Sync {
    fn open(&self, name: &str) -> Option<Box<dyn File>>;
    fn create(&self, name: &str, initial_size: u32) -> bool;
    fn remove(&self, name: &str) -> bool;
}

/// A file system plus the global lock that serializes it.
pub struct FsLock {
    fs: Arc<dyn FileSystem>,
    lock: Mutex<()>,
}

impl FsLock {
    pub fn new(fs: Arc<dyn FileSystem>) -> Self {
        Self {
            fs,
            lock: Mutex::new(()),
        }
    }

    /// Acquire the global lock for a sequence of operations.
    pub fn lock(&self) -> FsGuard<'_> {
        FsGuard {
            fs: &*self.fs,
            _guard: self.lock.lock(),
        }
    }

    /// Open without taking the lock.
    ///
    /// Only for the loader, which runs on the child thread while
    /// [`crate::Kernel::spawn`] holds the lock on its behalf.
    pub(crate) fn open_unlocked(&self, name: &str) -> Option<Box<dyn File>> {
        self.fs.open(name)
    }
}

/// Proof that the global file-system lock is held.
pub struct FsGuard<'a> {
    fs: &'a dyn FileSystem,
    _guard: MutexGuard<'a, ()>,
}

impl FsGuard<'_> {
    pub fn open(&self, name: &str) -> Option<Box<dyn File>> {
        self.fs.open(name)
    }

    pub fn create(&self, name: &str, initial_size: u32) -> bool {
        self.fs.create(name, initial_size)
    }

    pub fn remove(&self, name: &str) -> bool {
        self.fs.remove(name)
    }
}
