//! Per-process File-Descriptor Table
//!
//! Maps small integers to open files. 0 and 1 are the keyboard and the
//! console and never appear in the table; the first file gets 2.
//!
//! # Design
//! - Growable vector of slots, slot `i` holds descriptor `i + 2`
//! - New descriptors reuse the lowest free slot
//! - Dropping a removed handle closes the file

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::fs::File;

/// A descriptor number as seen by user code.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(transparent)]
pub struct Fd(pub i32);

impl Fd {
    /// Keyboard input.
    pub const STDIN: Self = Self(0);

    /// Console output.
    pub const STDOUT: Self = Self(1);

    /// First descriptor handed out for files.
    pub const FIRST_FILE: Self = Self(2);

    /// Whether this is one of the two standard streams.
    #[inline]
    pub const fn is_standard(self) -> bool {
        self.0 >= 0 && self.0 < Self::FIRST_FILE.0
    }

    fn slot(self) -> Option<usize> {
        usize::try_from(self.0.checked_sub(Self::FIRST_FILE.0)?).ok()
    }

    fn from_slot(slot: usize) -> Self {
        Self(slot as i32 + Self::FIRST_FILE.0)
    }
}

impl core::fmt::Display for Fd {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "fd {}", self.0)
    }
}

/// Open files of one process.
pub struct FdTable {
    slots: Vec<Option<Box<dyn File>>>,
    open: usize,
    limit: usize,
}

impl FdTable {
    /// Empty table holding at most `limit` files.
    pub fn new(limit: usize) -> Self {
        Self {
            slots: Vec::new(),
            open: 0,
            limit,
        }
    }

    /// Number of open files.
    #[inline]
    pub fn len(&self) -> usize {
        self.open
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.open == 0
    }

    /// Store `file` under the smallest free descriptor.
    ///
    /// Returns `None` (closing `file`) when the table is full.
    pub fn insert(&mut self, file: Box<dyn File>) -> Option<Fd> {
        if self.open >= self.limit {
            return None;
        }
        let slot = match self.slots.iter().position(Option::is_none) {
            Some(free) => {
                self.slots[free] = Some(file);
                free
            }
            None => {
                self.slots.push(Some(file));
                self.slots.len() - 1
            }
        };
        self.open += 1;
        Some(Fd::from_slot(slot))
    }

    pub fn get_mut(&mut self, fd: Fd) -> Option<&mut dyn File> {
        let slot = fd.slot()?;
        match self.slots.get_mut(slot)? {
            Some(file) => Some(&mut **file),
            None => None,
        }
    }

    #[inline]
    pub fn contains(&self, fd: Fd) -> bool {
        fd.slot()
            .and_then(|slot| self.slots.get(slot))
            .map_or(false, Option::is_some)
    }

    /// Take `fd` out of the table. Dropping the result closes the file.
    pub fn remove(&mut self, fd: Fd) -> Option<Box<dyn File>> {
        let file = self.slots.get_mut(fd.slot()?)?.take()?;
        self.open -= 1;
        while matches!(self.slots.last(), Some(None)) {
            self.slots.pop();
        }
        Some(file)
    }

    /// Close every open file.
    pub fn close_all(&mut self) {
        self.slots.clear();
        self.open = 0;
    }
}

impl core::fmt::Debug for FdTable {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let fds: Vec<i32> = self
            .slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| Fd::from_slot(i).0)
            .collect();
        f.debug_struct("FdTable").field("open", &fds).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemFile;

    fn file() -> Box<dyn File> {
        Box::new(MemFile::detached(vec![0; 8]))
    }

    #[test]
    fn test_standard_streams() {
        assert!(Fd::STDIN.is_standard());
        assert!(Fd::STDOUT.is_standard());
        assert!(!Fd(2).is_standard());
        assert!(!Fd(-1).is_standard());
    }

    #[test]
    fn test_smallest_free_descriptor() {
        let mut t = FdTable::new(128);
        assert_eq!(t.insert(file()), Some(Fd(2)));
        assert_eq!(t.insert(file()), Some(Fd(3)));
        assert_eq!(t.insert(file()), Some(Fd(4)));
        assert!(t.remove(Fd(3)).is_some());
        assert_eq!(t.insert(file()), Some(Fd(3)));
        assert_eq!(t.insert(file()), Some(Fd(5)));
        assert_eq!(t.len(), 4);
    }

    #[test]
    fn test_unknown_descriptors() {
        let mut t = FdTable::new(128);
        assert!(t.get_mut(Fd(0)).is_none());
        assert!(t.get_mut(Fd(1)).is_none());
        assert!(t.get_mut(Fd(2)).is_none());
        assert!(t.get_mut(Fd(-7)).is_none());
        assert!(t.remove(Fd(9)).is_none());
        let fd = t.insert(file()).unwrap();
        assert!(t.remove(fd).is_some());
        assert!(t.remove(fd).is_none());
        assert!(!t.contains(fd));
    }

    #[test]
    fn test_limit() {
        let mut t = FdTable::new(2);
        assert!(t.insert(file()).is_some());
        assert!(t.insert(file()).is_some());
        assert!(t.insert(file()).is_none());
        t.remove(Fd(2));
        assert_eq!(t.insert(file()), Some(Fd(2)));
    }

    #[test]
    fn test_close_all() {
        let mut t = FdTable::new(8);
        t.insert(file());
        t.insert(file());
        t.close_all();
        assert!(t.is_empty());
        assert_eq!(t.insert(file()), Some(Fd(2)));
    }
}
