//! Page Table Entries
//!
//! One entry per mapped user page: the backing frame plus its
//! protection bits.
//!
//! # Security Properties
//! - Page flags are strictly typed to prevent invalid combinations
//! - Every user mapping carries `USER`; kernel pages are never entered
//! - Writability can be upgraded in place but never silently dropped

use bitflags::bitflags;

use super::frame::PhysFrame;

bitflags! {
    /// Protection bits of a user page.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PageFlags: u32 {
        /// Entry is valid.
        const PRESENT = 1 << 0;
        /// User may write the page.
        const WRITABLE = 1 << 1;
        /// Page is accessible from user mode.
        const USER = 1 << 2;

        /// Read-only user page (code, rodata).
        const USER_RO = Self::PRESENT.bits() | Self::USER.bits();
        /// Read/write user page (data, bss, stack).
        const USER_RW = Self::USER_RO.bits() | Self::WRITABLE.bits();
    }
}

impl PageFlags {
    /// Flags for a user page with the requested writability.
    #[inline]
    pub const fn user(writable: bool) -> Self {
        if writable {
            Self::USER_RW
        } else {
            Self::USER_RO
        }
    }
}

/// A single page table entry.
///
/// Owns the frame it maps; dropping the entry returns the frame to its
/// pool.
#[derive(Debug)]
pub struct PageTableEntry {
    frame: PhysFrame,
    flags: PageFlags,
}

impl PageTableEntry {
    /// Create a page entry mapping a physical frame.
    #[inline]
    pub fn page(frame: PhysFrame, flags: PageFlags) -> Self {
        Self { frame, flags }
    }

    /// Get the flags from this entry.
    #[inline]
    pub fn flags(&self) -> PageFlags {
        self.flags
    }

    /// Check if the page is writable by user code.
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.flags.contains(PageFlags::WRITABLE)
    }

    /// Set or clear the writable bit.
    #[inline]
    pub fn set_writable(&mut self, writable: bool) {
        self.flags.set(PageFlags::WRITABLE, writable);
    }

    /// The backing frame.
    #[inline]
    pub fn frame(&self) -> &PhysFrame {
        &self.frame
    }

    /// The backing frame, mutably.
    #[inline]
    pub fn frame_mut(&mut self) -> &mut PhysFrame {
        &mut self.frame
    }
}

/// Error type for page mapping operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MappingError {
    /// The virtual address is already mapped.
    AlreadyMapped,
    /// The virtual address is not mapped.
    NotMapped,
    /// No physical frames available.
    OutOfMemory,
    /// The address is not properly aligned.
    MisalignedAddress,
    /// Attempted to map a kernel address into a user space.
    InvalidPermissions,
}

impl core::fmt::Display for MappingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::AlreadyMapped => write!(f, "virtual address already mapped"),
            Self::NotMapped => write!(f, "virtual address not mapped"),
            Self::OutOfMemory => write!(f, "out of user frames"),
            Self::MisalignedAddress => write!(f, "address not properly aligned"),
            Self::InvalidPermissions => write!(f, "kernel address in user mapping"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::FramePool;

    #[test]
    fn test_user_flags() {
        assert!(PageFlags::user(true).contains(PageFlags::WRITABLE | PageFlags::USER));
        assert!(!PageFlags::user(false).contains(PageFlags::WRITABLE));
        assert!(PageFlags::user(false).contains(PageFlags::PRESENT));
    }

    #[test]
    fn test_writable_upgrade() {
        let pool = FramePool::new(1);
        let mut pte = PageTableEntry::page(pool.alloc().unwrap(), PageFlags::USER_RO);
        assert!(!pte.is_writable());
        pte.set_writable(true);
        assert!(pte.is_writable());
        assert_eq!(pte.flags(), PageFlags::USER_RW);
    }
}
