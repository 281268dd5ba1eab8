//! Kernel Semaphore
//!
//! A counting semaphore whose `down` blocks by yielding to the scheduler
//! until a unit is available. Used for the one-shot handshakes between a
//! parent and a child process.
//!
//! # Usage
//! ```text
//! let sema = Semaphore::new(0);
//! // child thread:  sema.up();
//! // parent thread: sema.down(scheduler);  // returns once the child signalled
//! ```

use core::sync::atomic::{AtomicUsize, Ordering};

use crate::sched::Scheduler;

/// Counting semaphore.
#[derive(Debug, Default)]
pub struct Semaphore {
    count: AtomicUsize,
}

impl Semaphore {
    /// Create a semaphore holding `initial` units.
    pub const fn new(initial: usize) -> Self {
        Self {
            count: AtomicUsize::new(initial),
        }
    }

    /// Current count.
    #[inline]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::Acquire)
    }

    /// Take one unit without blocking.
    ///
    /// Returns `false` if the count was zero.
    pub fn try_down(&self) -> bool {
        self.count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1))
            .is_ok()
    }

    /// Take one unit, yielding the CPU until one is available.
    pub fn down(&self, scheduler: &dyn Scheduler) {
        while !self.try_down() {
            scheduler.yield_now();
        }
    }

    /// Release one unit.
    pub fn up(&self) {
        self.count.fetch_add(1, Ordering::AcqRel);
    }
}
