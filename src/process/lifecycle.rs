//! Parent/Child Lifecycle Records
//!
//! One [`LifecycleRecord`] exists per parent→child edge. It is the only
//! object shared between two processes: the parent keeps it in its child
//! list, the child keeps it as its own record.
//!
//! # Protocol
//! - Creation: the child reports load success through `mark_loaded`; the
//!   parent blocks in `wait_loaded` until then.
//! - Exit: the child publishes its final status under the guard. If the
//!   parent is still around it signals `exited` and leaves the record for
//!   the parent's `wait`; otherwise it lets go of it right there.
//! - Parent exit: under each child's guard, a still-alive child is flagged
//!   `parent_exited` so it knows nobody will wait for it.
//!
//! Both handles are `Arc`s, so the record is released exactly once, by
//! whichever side lets go last. Every live record is counted by a
//! [`RecordCounter`] so tests can check that none outlive both owners.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicUsize, Ordering};

use spin::Mutex;

use super::{ExitStatus, ProcessId};
use crate::sched::Scheduler;
use crate::sync::Semaphore;

/// Counts lifecycle records that have not been released yet.
#[derive(Debug, Clone, Default)]
pub struct RecordCounter(Arc<AtomicUsize>);

impl RecordCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records currently alive.
    pub fn live(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    fn acquire(&self) -> Self {
        self.0.fetch_add(1, Ordering::AcqRel);
        self.clone()
    }
}

/// Status fields protected by the record's guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordState {
    pub status: ExitStatus,
    pub parent_exited: bool,
    pub loaded: bool,
}

/// Shared state of one parent→child relationship.
pub struct LifecycleRecord {
    pid: ProcessId,
    state: Mutex<RecordState>,
    loaded: Semaphore,
    exited: Semaphore,
    counter: RecordCounter,
}

impl LifecycleRecord {
    pub fn new(pid: ProcessId, counter: &RecordCounter) -> Arc<Self> {
        Arc::new(Self {
            pid,
            state: Mutex::new(RecordState {
                status: ExitStatus::Alive,
                parent_exited: false,
                loaded: false,
            }),
            loaded: Semaphore::new(0),
            exited: Semaphore::new(0),
            counter: counter.acquire(),
        })
    }

    /// Id of the child this record describes.
    #[inline]
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    /// Snapshot of the guarded fields.
    pub fn state(&self) -> RecordState {
        *self.state.lock()
    }

    /// Child side: report the outcome of loading and wake the parent.
    pub fn mark_loaded(&self, success: bool) {
        self.state.lock().loaded = success;
        self.loaded.up();
    }

    /// Parent side: block until the child reported its load outcome.
    pub fn wait_loaded(&self, scheduler: &dyn Scheduler) -> bool {
        self.loaded.down(scheduler);
        self.state.lock().loaded
    }

    /// Child side: publish the final status.
    ///
    /// A still-alive status becomes [`ExitStatus::Killed`]. `announce` runs
    /// under the guard with the published code. Returns `true` when the
    /// parent has already exited, in which case the caller's handle is the
    /// last one.
    pub fn publish_exit(&self, status: ExitStatus, announce: impl FnOnce(i32)) -> bool {
        let mut state = self.state.lock();
        state.status = status.finalized();
        announce(state.status.code());
        if state.parent_exited {
            true
        } else {
            self.exited.up();
            false
        }
    }

    /// Parent side: block until the child exited and return its code.
    pub fn wait_exit(&self, scheduler: &dyn Scheduler) -> i32 {
        self.exited.down(scheduler);
        self.state.lock().status.code()
    }

    /// Parent side, at parent exit: flag a still-alive child as orphaned.
    ///
    /// Returns `true` if the child was still alive.
    pub fn orphan(&self) -> bool {
        let mut state = self.state.lock();
        if state.status.is_alive() {
            state.parent_exited = true;
            true
        } else {
            false
        }
    }
}

impl Drop for LifecycleRecord {
    fn drop(&mut self) {
        self.counter.0.fetch_sub(1, Ordering::AcqRel);
    }
}

impl core::fmt::Debug for LifecycleRecord {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("LifecycleRecord")
            .field("pid", &self.pid)
            .field("state", &self.state())
            .finish()
    }
}
