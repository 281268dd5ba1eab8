//! Kernel heap
//!
//! Freestanding builds (feature `kernel-heap`) back `alloc` with a
//! linked-list heap. Lifecycle records, descriptor tables and command-line
//! copies are all carved from it.
//!
//! The heap must be handed its region before the first [`crate::Kernel`]
//! is created.

use linked_list_allocator::LockedHeap;

#[global_allocator]
static HEAP: LockedHeap = LockedHeap::empty();

/// Hand `[start, start + size)` to the kernel heap.
///
/// # Safety
/// Call exactly once, before any allocation. The region must be valid,
/// writable and not used for anything else.
pub unsafe fn init_heap(start: *mut u8, size: usize) {
    // SAFETY: the caller gives up the region for good.
    unsafe {
        HEAP.lock().init(start, size);
    }
    log::info!("kernel heap: {} KiB at {:p}", size / 1024, start);
}

/// Bytes still free in the kernel heap.
pub fn heap_free() -> usize {
    HEAP.lock().free()
}
