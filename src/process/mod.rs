//! User Processes
//!
//! A [`Process`] is the kernel-side state of one user program: its address
//! space, open files, executable, and the lifecycle records linking it to
//! its parent and children. Only the thread running the process touches
//! it, so none of this is locked.

pub mod fd;
pub mod lifecycle;

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

pub use fd::{Fd, FdTable};
pub use lifecycle::{LifecycleRecord, RecordCounter, RecordState};

use crate::config::NAME_MAX;
use crate::fs::File;
use crate::loader::stack::tokenize;
use crate::mm::AddressSpace;

/// Process identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(transparent)]
pub struct ProcessId(pub i32);

impl ProcessId {
    /// The initial kernel process.
    pub const INIT: Self = Self(1);

    /// Value returned to user code for a failed `exec`.
    pub const ERROR: Self = Self(-1);
}

impl core::fmt::Display for ProcessId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Final status of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Still running
    Alive,
    /// Called `exit` with this code
    Code(i32),
    /// Terminated by the kernel
    Killed,
}

impl ExitStatus {
    /// Code seen by the parent. Killed (and alive) map to -1.
    pub const fn code(self) -> i32 {
        match self {
            Self::Code(c) => c,
            Self::Alive | Self::Killed => -1,
        }
    }

    #[inline]
    pub const fn is_alive(self) -> bool {
        matches!(self, Self::Alive)
    }

    /// Status to publish when the process ends.
    pub const fn finalized(self) -> Self {
        match self {
            Self::Alive => Self::Killed,
            other => other,
        }
    }
}

/// Process name: the first token of `cmdline`, cut to `NAME_MAX` bytes.
pub fn process_name(cmdline: &str) -> Option<String> {
    let first = tokenize(cmdline).next()?;
    let mut end = first.len().min(NAME_MAX);
    while !first.is_char_boundary(end) {
        end -= 1;
    }
    Some(String::from(&first[..end]))
}

/// Kernel-side state of a user process.
pub struct Process {
    pid: ProcessId,
    name: String,
    pub(crate) space: Option<AddressSpace>,
    pub(crate) files: FdTable,
    pub(crate) record: Option<Arc<LifecycleRecord>>,
    pub(crate) children: Vec<Arc<LifecycleRecord>>,
    pub(crate) executable: Option<Box<dyn File>>,
    exit_status: ExitStatus,
}

impl Process {
    pub fn new(
        pid: ProcessId,
        name: String,
        record: Option<Arc<LifecycleRecord>>,
        max_open_files: usize,
    ) -> Self {
        Self {
            pid,
            name,
            space: None,
            files: FdTable::new(max_open_files),
            record,
            children: Vec::new(),
            executable: None,
            exit_status: ExitStatus::Alive,
        }
    }

    #[inline]
    pub fn pid(&self) -> ProcessId {
        self.pid
    }

    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address_space(&self) -> Option<&AddressSpace> {
        self.space.as_ref()
    }

    pub fn address_space_mut(&mut self) -> Option<&mut AddressSpace> {
        self.space.as_mut()
    }

    pub fn files_mut(&mut self) -> &mut FdTable {
        &mut self.files
    }

    #[inline]
    pub fn exit_status(&self) -> ExitStatus {
        self.exit_status
    }

    pub fn set_exit_status(&mut self, status: ExitStatus) {
        self.exit_status = status;
    }

    /// Ids of children still tracked (not yet waited for).
    pub fn children(&self) -> impl Iterator<Item = ProcessId> + '_ {
        self.children.iter().map(|r| r.pid())
    }

    /// Attach a freshly loaded image.
    pub(crate) fn install_image(&mut self, space: AddressSpace, executable: Box<dyn File>) {
        self.space = Some(space);
        self.executable = Some(executable);
    }

    /// Forget the child record for `pid`, returning it.
    pub(crate) fn take_child(&mut self, pid: ProcessId) -> Option<Arc<LifecycleRecord>> {
        let idx = self.children.iter().position(|r| r.pid() == pid)?;
        Some(self.children.remove(idx))
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(name: &str) -> Self {
        Self::new(
            ProcessId(100),
            String::from(name),
            None,
            crate::config::MAX_OPEN_FILES,
        )
    }
}

impl core::fmt::Debug for Process {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("name", &self.name)
            .field("status", &self.exit_status)
            .field("files", &self.files)
            .field("children", &self.children.len())
            .finish()
    }
}
