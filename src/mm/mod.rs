//! Memory management for user processes
//!
//! Provides:
//! - User virtual address types and layout constants
//! - The bounded pool of user frames
//! - Per-process address spaces (page directory + entries)
//! - Kernel heap allocation (feature `kernel-heap`)
//!
//! # Security Principles
//! - All mappings are bounds-checked against the user/kernel split
//! - Memory initialization is guaranteed (frames are zeroed)
//! - Page 0 is never mapped by the loader

mod address;
#[cfg(all(feature = "kernel-heap", not(test)))]
mod allocator;
mod frame;
mod mapper;
mod paging;

pub use address::{page_round_up, VirtAddr, PAGE_MASK, PAGE_SHIFT, PAGE_SIZE, PHYS_BASE, WORD_SIZE};
#[cfg(all(feature = "kernel-heap", not(test)))]
pub use allocator::{heap_free, init_heap};
pub use frame::{FramePool, PhysFrame};
pub use mapper::AddressSpace;
pub use paging::{MappingError, PageFlags, PageTableEntry};
