//! User Virtual Address Types
//!
//! Type-safe wrapper for addresses in the 32-bit user address space.
//!
//! # Layout
//! ```text
//! 0xFFFF_FFFF ┌──────────────────────┐
//!             │   kernel (no user)   │
//! PHYS_BASE   ├──────────────────────┤ <- initial stack pointer
//!             │   initial stack page │
//!             ├──────────────────────┤
//!             │         ...          │
//!             │   ELF segments       │
//! 0x0000_1000 ├──────────────────────┤
//!             │   page 0 (never      │
//!             │   mapped)            │
//! 0x0000_0000 └──────────────────────┘
//! ```

use core::fmt;

/// Page size (4 KiB)
pub const PAGE_SIZE: usize = 4096;
/// Page size mask
pub const PAGE_MASK: u32 = PAGE_SIZE as u32 - 1;
/// Bits to shift for page number
pub const PAGE_SHIFT: u32 = 12;

/// First kernel address. Everything strictly below is user space.
pub const PHYS_BASE: u32 = 0xC000_0000;

/// Size of a user machine word and of a user pointer.
pub const WORD_SIZE: u32 = 4;

/// A virtual address in a process's address space.
///
/// Carries no guarantee of being mapped; that is decided by the
/// owning [`AddressSpace`](super::AddressSpace).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[repr(transparent)]
pub struct VirtAddr(u32);

impl VirtAddr {
    /// The null user pointer.
    pub const NULL: Self = Self(0);

    /// Create a new virtual address.
    #[inline]
    pub const fn new(addr: u32) -> Self {
        Self(addr)
    }

    /// Get the raw address value.
    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    /// Check if the address is page-aligned.
    #[inline]
    pub const fn is_aligned(self) -> bool {
        self.0 & PAGE_MASK == 0
    }

    /// Align the address down to the nearest page boundary.
    #[inline]
    pub const fn align_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Get the page offset (lowest 12 bits).
    #[inline]
    pub const fn page_offset(self) -> usize {
        (self.0 & PAGE_MASK) as usize
    }

    /// Get the virtual page number.
    #[inline]
    pub const fn page_number(self) -> u32 {
        self.0 >> PAGE_SHIFT
    }

    /// Add an offset, returning `None` on 32-bit wrap-around.
    #[inline]
    pub const fn checked_add(self, offset: u32) -> Option<Self> {
        match self.0.checked_add(offset) {
            Some(addr) => Some(Self(addr)),
            None => None,
        }
    }

    /// Check if this is a user address (below [`PHYS_BASE`]).
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 < PHYS_BASE
    }

    /// Check if this is a kernel address.
    #[inline]
    pub const fn is_kernel(self) -> bool {
        !self.is_user()
    }
}

impl From<u32> for VirtAddr {
    fn from(addr: u32) -> Self {
        Self(addr)
    }
}

impl fmt::Debug for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VirtAddr({:#010x})", self.0)
    }
}

impl fmt::Display for VirtAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// Round `value` up to a multiple of the page size.
#[inline]
pub const fn page_round_up(value: u32) -> u32 {
    (value + PAGE_MASK) & !PAGE_MASK
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_boundary() {
        assert!(VirtAddr::new(PHYS_BASE - 1).is_user());
        assert!(VirtAddr::new(PHYS_BASE).is_kernel());
        assert!(VirtAddr::NULL.is_user());
    }

    #[test]
    fn test_page_alignment() {
        let addr = VirtAddr::new(0x0804_8123);
        assert!(!addr.is_aligned());
        assert_eq!(addr.align_down().as_u32(), 0x0804_8000);
        assert_eq!(addr.page_offset(), 0x123);
        assert_eq!(page_round_up(0x1001), 0x2000);
        assert_eq!(page_round_up(0x2000), 0x2000);
    }

    #[test]
    fn test_checked_add_wraps() {
        assert_eq!(VirtAddr::new(u32::MAX - 1).checked_add(4), None);
        assert_eq!(
            VirtAddr::new(0x1000).checked_add(4),
            Some(VirtAddr::new(0x1004))
        );
    }
}
