//! User Frame Pool
//!
//! A bounded set of physical pages for user segments and stacks, tracked
//! one bit per 4 KiB frame (set = in use).
//!
//! Frames come back zeroed and return to the pool when their
//! [`PhysFrame`] is dropped. Freeing a frame twice is a kernel bug and
//! panics.

use alloc::boxed::Box;
use alloc::sync::Arc;
use alloc::vec;
use alloc::vec::Vec;

use spin::Mutex;

use super::address::PAGE_SIZE;

/// Pool state.
struct FramePoolInner {
    /// Bitmap tracking allocated frames (1 = allocated, 0 = free).
    bitmap: Vec<u8>,
    /// Number of free frames remaining.
    free_count: usize,
    /// Total frames under management.
    total_frames: usize,
}

impl FramePoolInner {
    fn new(total_frames: usize) -> Self {
        Self {
            bitmap: vec![0; total_frames.div_ceil(8)],
            free_count: total_frames,
            total_frames,
        }
    }

    #[inline]
    fn set_bit(&mut self, frame: usize, allocated: bool) {
        let byte_idx = frame / 8;
        let bit_idx = frame % 8;

        if allocated {
            self.bitmap[byte_idx] |= 1 << bit_idx;
        } else {
            self.bitmap[byte_idx] &= !(1 << bit_idx);
        }
    }

    #[inline]
    fn is_allocated(&self, frame: usize) -> bool {
        if frame >= self.total_frames {
            return true; // Out of range = allocated
        }
        (self.bitmap[frame / 8] >> (frame % 8)) & 1 == 1
    }

    fn alloc(&mut self) -> Option<usize> {
        if self.free_count == 0 {
            return None;
        }

        for (byte_idx, byte) in self.bitmap.iter().enumerate() {
            if *byte == 0xFF {
                continue;
            }
            for bit_idx in 0..8 {
                let frame = byte_idx * 8 + bit_idx;
                if frame >= self.total_frames {
                    break;
                }
                if !self.is_allocated(frame) {
                    self.set_bit(frame, true);
                    self.free_count -= 1;
                    return Some(frame);
                }
            }
        }

        None
    }

    fn free(&mut self, frame: usize) {
        if frame >= self.total_frames {
            panic!("Attempted to free frame outside managed range: {}", frame);
        }
        if !self.is_allocated(frame) {
            panic!("Double free detected for frame: {}", frame);
        }
        self.set_bit(frame, false);
        self.free_count += 1;
    }
}

/// The pool of physical pages available to user processes.
///
/// Shared between the loader (segment and stack pages) and every
/// [`PhysFrame`] handed out, which returns itself on drop.
pub struct FramePool {
    inner: Mutex<FramePoolInner>,
}

impl FramePool {
    /// Create a pool managing `total_frames` user pages.
    pub fn new(total_frames: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(FramePoolInner::new(total_frames)),
        })
    }

    /// Allocate a single zeroed frame.
    ///
    /// Returns `None` if no frames are available.
    pub fn alloc(self: &Arc<Self>) -> Option<PhysFrame> {
        let index = self.inner.lock().alloc()?;
        let data: Box<[u8; PAGE_SIZE]> = match vec![0u8; PAGE_SIZE].into_boxed_slice().try_into() {
            Ok(data) => data,
            Err(_) => unreachable!("page buffer has PAGE_SIZE bytes"),
        };
        Some(PhysFrame {
            index,
            data,
            pool: Arc::clone(self),
        })
    }

    /// Get the number of free frames remaining.
    pub fn free_frames(&self) -> usize {
        self.inner.lock().free_count
    }

    /// Total frames under management.
    pub fn total_frames(&self) -> usize {
        self.inner.lock().total_frames
    }

    fn free(&self, index: usize) {
        self.inner.lock().free(index);
    }
}

/// A RAII guard for a physical frame that automatically frees it on drop.
///
/// This provides automatic cleanup even in error paths: a half-built
/// address space simply drops its frames back into the pool.
pub struct PhysFrame {
    index: usize,
    data: Box<[u8; PAGE_SIZE]>,
    pool: Arc<FramePool>,
}

impl PhysFrame {
    /// Frame number within its pool.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Page contents.
    #[inline]
    pub fn bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.data
    }

    /// Mutable page contents.
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8; PAGE_SIZE] {
        &mut self.data
    }
}

impl core::fmt::Debug for PhysFrame {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "PhysFrame({})", self.index)
    }
}

impl Drop for PhysFrame {
    fn drop(&mut self) {
        self.pool.free(self.index);
    }
}
