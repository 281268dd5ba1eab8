//! PantherOS user programs
//!
//! The boundary between the kernel and user processes:
//!
//! - ELF32 executables loaded into per-process address spaces
//! - `argc`/`argv` laid out on the initial user stack
//! - Parent/child lifecycle: `exec` handshake, `wait`/`exit`, orphans
//! - System call gateway with user-memory validation and descriptors
//!
//! # Collaborators
//! The scheduler, file system, console, keyboard, and power control live
//! outside this crate and are reached through the traits in [`sched`],
//! [`fs`] and [`drivers`]. User code is driven through [`trap::UserMode`].
//!
//! # Security Features
//! - Every user pointer is checked against the caller's page tables
//! - Page 0 and kernel addresses are never mapped for user code
//! - Executables are write-denied while running
//! - Lifecycle records are released exactly once

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_op_in_unsafe_fn)]

pub extern crate alloc;

#[doc(hidden)]
pub use alloc as __alloc;

pub mod config;
pub mod drivers;
pub mod fs;
pub mod kernel;
pub mod loader;
pub mod mm;
pub mod process;
pub mod sched;
pub mod sync;
pub mod syscall;
pub mod trap;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use kernel::{Collaborators, Kernel, SpawnError, WaitError};
pub use process::{ExitStatus, Fd, Process, ProcessId};
pub use trap::{IntrFrame, Terminated, UserMode, UserSession};
