//! Process Lifecycle
//!
//! The [`Kernel`] ties the collaborators together and implements the
//! parent/child protocol:
//!
//! - `spawn` starts a thread that loads the program, and blocks the parent
//!   until the load outcome is known
//! - `wait` blocks until a direct child exits and returns its status once
//! - `on_exit` publishes the final status, orphans live children, and
//!   releases everything the process owned
//!
//! # Exit order
//! 1. Re-allow writes to the executable and close it
//! 2. Publish the status and print `"<name>: exit(<code>)"`
//! 3. Orphan or release the children's records
//! 4. Close all descriptors
//! 5. Clear the address-space slot, activate kernel-only tables, then
//!    destroy the address space

use alloc::boxed::Box;
use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::sync::atomic::{AtomicI32, Ordering};

use log::{debug, info, warn};

use crate::config::Config;
use crate::cprintln;
use crate::drivers::{Console, Keyboard, Power};
use crate::fs::{FileSystem, FsLock};
use crate::loader::{self, stack::tokenize};
use crate::mm::FramePool;
use crate::process::{process_name, LifecycleRecord, Process, ProcessId, RecordCounter};
use crate::sched::{Scheduler, ThreadCreateError};
use crate::trap::{IntrFrame, UserMode, UserSession};

/// Why `spawn` failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnError {
    /// Command line longer than the configured maximum
    CommandTooLong,
    /// No program name in the command line
    EmptyCommand,
    /// The scheduler could not start a thread
    Thread(ThreadCreateError),
    /// The child reported a load failure
    LoadFailed,
}

impl core::fmt::Display for SpawnError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::CommandTooLong => write!(f, "command line too long"),
            Self::EmptyCommand => write!(f, "empty command line"),
            Self::Thread(e) => write!(f, "{}", e),
            Self::LoadFailed => write!(f, "load failed"),
        }
    }
}

impl From<ThreadCreateError> for SpawnError {
    fn from(e: ThreadCreateError) -> Self {
        Self::Thread(e)
    }
}

/// Why `wait` failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// Not a direct child, or already waited for
    NotChild,
}

impl core::fmt::Display for WaitError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::NotChild => write!(f, "not a child awaiting collection"),
        }
    }
}

/// External services the process layer runs on.
pub struct Collaborators {
    pub fs: Arc<dyn FileSystem>,
    pub scheduler: Arc<dyn Scheduler>,
    pub console: Arc<dyn Console>,
    pub keyboard: Arc<dyn Keyboard>,
    pub power: Arc<dyn Power>,
    pub user_mode: Arc<dyn UserMode>,
}

/// The user-process layer.
pub struct Kernel {
    config: Config,
    fs: FsLock,
    frames: Arc<FramePool>,
    scheduler: Arc<dyn Scheduler>,
    console: Arc<dyn Console>,
    keyboard: Arc<dyn Keyboard>,
    power: Arc<dyn Power>,
    user_mode: Arc<dyn UserMode>,
    next_pid: AtomicI32,
    records: RecordCounter,
}

impl Kernel {
    pub fn new(config: Config, frames: Arc<FramePool>, with: Collaborators) -> Arc<Self> {
        info!(
            "process layer: {} user frames, cmdline <= {}, {} files/process",
            frames.total_frames(),
            config.max_cmdline,
            config.max_open_files
        );
        Arc::new(Self {
            config,
            fs: FsLock::new(with.fs),
            frames,
            scheduler: with.scheduler,
            console: with.console,
            keyboard: with.keyboard,
            power: with.power,
            user_mode: with.user_mode,
            next_pid: AtomicI32::new(ProcessId::INIT.0 + 1),
            records: RecordCounter::new(),
        })
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    #[inline]
    pub fn fs(&self) -> &FsLock {
        &self.fs
    }

    #[inline]
    pub fn frames(&self) -> &Arc<FramePool> {
        &self.frames
    }

    #[inline]
    pub fn console(&self) -> &dyn Console {
        &*self.console
    }

    #[inline]
    pub fn keyboard(&self) -> &dyn Keyboard {
        &*self.keyboard
    }

    #[inline]
    pub fn power(&self) -> &dyn Power {
        &*self.power
    }

    /// Lifecycle records not yet released.
    pub fn live_records(&self) -> usize {
        self.records.live()
    }

    /// The initial process. It has no parent and no user address space.
    pub fn init_process(&self) -> Process {
        Process::new(
            ProcessId::INIT,
            String::from("main"),
            None,
            self.config.max_open_files,
        )
    }

    fn allocate_pid(&self) -> ProcessId {
        ProcessId(self.next_pid.fetch_add(1, Ordering::Relaxed))
    }

    /// Start `cmdline` as a child of `parent` and wait until it loaded.
    ///
    /// Holds the global file-system lock from before the child thread
    /// starts until the load outcome is known, so the loader's open,
    /// reads and `deny_write` are serialized with every other file
    /// operation.
    pub fn spawn(self: &Arc<Self>, parent: &mut Process, cmdline: &str) -> Result<ProcessId, SpawnError> {
        if cmdline.len() > self.config.max_cmdline {
            return Err(SpawnError::CommandTooLong);
        }
        let name = process_name(cmdline).ok_or(SpawnError::EmptyCommand)?;
        let _fs = self.fs.lock();

        let pid = self.allocate_pid();
        let record = LifecycleRecord::new(pid, &self.records);
        parent.children.push(Arc::clone(&record));

        let kernel = Arc::clone(self);
        let child_record = Arc::clone(&record);
        let cmdline = String::from(cmdline);
        let body = Box::new(move || kernel.start_process(pid, cmdline, child_record));
        if let Err(e) = self.scheduler.spawn(&name, body) {
            warn!("{}: cannot start thread for {}", parent.name(), name);
            parent.take_child(pid);
            return Err(e.into());
        }

        if !record.wait_loaded(&*self.scheduler) {
            parent.take_child(pid);
            return Err(SpawnError::LoadFailed);
        }
        debug!("{}: spawned {} as pid {}", parent.name(), name, pid);
        Ok(pid)
    }

    /// Wait for child `pid` to exit and collect its status.
    ///
    /// Fails without blocking if `pid` is not a child still awaiting
    /// collection.
    pub fn wait(&self, parent: &mut Process, pid: ProcessId) -> Result<i32, WaitError> {
        let record = parent
            .children
            .iter()
            .find(|r| r.pid() == pid)
            .cloned()
            .ok_or(WaitError::NotChild)?;
        let code = record.wait_exit(&*self.scheduler);
        parent.take_child(pid);
        debug!("{}: collected pid {}: {}", parent.name(), pid, code);
        Ok(code)
    }

    /// Release `process`. Runs exactly once per process.
    pub fn on_exit(&self, mut process: Process) {
        let status = process.exit_status().finalized();
        process.set_exit_status(status);

        if let Some(mut executable) = process.executable.take() {
            executable.allow_write();
        }

        if let Some(record) = process.record.take() {
            let name = process.name();
            let console = self.console();
            let orphaned = record.publish_exit(status, |code| {
                cprintln!(console, "{}: exit({})", name, code);
            });
            if orphaned {
                debug!("{}: parent gone, releasing record", name);
            }
        }

        for child in core::mem::take(&mut process.children) {
            if child.orphan() {
                debug!("{}: orphaned pid {}", process.name(), child.pid());
            }
        }

        process.files.close_all();

        let space = process.space.take();
        self.scheduler.activate(None);
        drop(space);
    }

    /// Body of a freshly spawned process thread.
    fn start_process(self: Arc<Self>, pid: ProcessId, cmdline: String, record: Arc<LifecycleRecord>) {
        let args: Vec<&str> = tokenize(&cmdline).collect();
        let name = process_name(&cmdline).unwrap_or_default();
        let mut process = Process::new(
            pid,
            name,
            Some(Arc::clone(&record)),
            self.config.max_open_files,
        );

        let loaded = loader::load(
            &self.fs,
            &self.frames,
            &args,
            self.config.max_args,
            &mut process,
        );
        record.mark_loaded(loaded.is_ok());
        drop(record);

        match loaded {
            Ok(image) => {
                self.scheduler.activate(process.address_space());
                let frame = IntrFrame::new(image.entry, image.stack_pointer);
                let mut session = UserSession::new(&self, &mut process, frame);
                if self.user_mode.run(&mut session).is_ok() {
                    debug!("{}: returned without exit", process.name());
                }
            }
            Err(e) => warn!("{}: load failed: {}", process.name(), e),
        }

        self.on_exit(process);
    }
}

impl core::fmt::Debug for Kernel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Kernel")
            .field("config", &self.config)
            .field("free_frames", &self.frames.free_frames())
            .field("live_records", &self.records.live())
            .finish()
    }
}
