//! Scheduler collaborator
//!
//! The thread scheduler and context switch live outside this crate. The
//! process layer needs three things from it: start a kernel thread, give
//! up the CPU while blocked, and switch the active page tables.

use alloc::boxed::Box;

use crate::mm::AddressSpace;

/// Body of a new kernel thread.
pub type ThreadBody = Box<dyn FnOnce() + Send + 'static>;

/// Failure to create a kernel thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadCreateError;

impl core::fmt::Display for ThreadCreateError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "cannot create kernel thread")
    }
}

/// Thread scheduler interface.
pub trait Scheduler: Send + Sync {
    /// Start a new schedulable thread running `body`.
    ///
    /// The thread may run, and even finish, before this returns.
    fn spawn(&self, name: &str, body: ThreadBody) -> Result<(), ThreadCreateError>;

    /// Give up the CPU to another ready thread.
    fn yield_now(&self);

    /// Load `space` into the MMU, or the kernel-only tables for `None`.
    fn activate(&self, space: Option<&AddressSpace>) {
        let _ = space;
    }
}
