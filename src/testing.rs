//! Host-side fixtures for unit tests.
//!
//! In-memory stand-ins for the collaborators the process layer runs on,
//! plus an ELF32 image builder and a [`Harness`] wiring everything into a
//! [`Kernel`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use spin::Mutex;

use crate::config::Config;
use crate::drivers::{Console, Keyboard, Power};
use crate::fs::{File, FileSystem};
use crate::kernel::{Collaborators, Kernel};
use crate::loader::elf::{
    SegmentFlags, Elf32Header, Elf32ProgramHeader, EM_386, ET_EXEC, EV_CURRENT, PT_LOAD,
};
use crate::mm::{AddressSpace, FramePool, PAGE_SIZE};
use crate::sched::{Scheduler, ThreadBody, ThreadCreateError};
use crate::trap::{Terminated, UserMode, UserSession};

// ---------------------------------------------------------------------------
// File system

struct Inode {
    data: Mutex<Vec<u8>>,
    deny_count: AtomicUsize,
}

impl Inode {
    fn new(data: Vec<u8>) -> Arc<Self> {
        Arc::new(Self {
            data: Mutex::new(data),
            deny_count: AtomicUsize::new(0),
        })
    }
}

/// Flat in-memory file system.
#[derive(Default)]
pub struct MemFs {
    files: Mutex<BTreeMap<String, Arc<Inode>>>,
}

impl MemFs {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Create or replace `name` with `data`.
    pub fn insert(&self, name: &str, data: Vec<u8>) {
        self.files.lock().insert(name.into(), Inode::new(data));
    }

    pub fn contents(&self, name: &str) -> Option<Vec<u8>> {
        let inode = self.files.lock().get(name).cloned()?;
        let data = inode.data.lock().clone();
        Some(data)
    }

    pub fn is_write_denied(&self, name: &str) -> bool {
        self.files
            .lock()
            .get(name)
            .map_or(false, |i| i.deny_count.load(Ordering::Acquire) > 0)
    }

    pub fn exists(&self, name: &str) -> bool {
        self.files.lock().contains_key(name)
    }
}

impl FileSystem for MemFs {
    fn open(&self, name: &str) -> Option<Box<dyn File>> {
        let inode = self.files.lock().get(name).cloned()?;
        Some(Box::new(MemFile {
            inode,
            pos: 0,
            denied: false,
        }))
    }

    fn create(&self, name: &str, initial_size: u32) -> bool {
        let mut files = self.files.lock();
        if name.is_empty() || files.contains_key(name) {
            return false;
        }
        files.insert(name.into(), Inode::new(vec![0; initial_size as usize]));
        true
    }

    fn remove(&self, name: &str) -> bool {
        self.files.lock().remove(name).is_some()
    }
}

/// An open [`MemFs`] file. Closing re-allows writes it denied.
pub struct MemFile {
    inode: Arc<Inode>,
    pos: u32,
    denied: bool,
}

impl MemFile {
    /// A handle on an anonymous file outside any file system.
    pub fn detached(data: Vec<u8>) -> Self {
        Self {
            inode: Inode::new(data),
            pos: 0,
            denied: false,
        }
    }
}

impl File for MemFile {
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let data = self.inode.data.lock();
        let start = (self.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        buf[..n].copy_from_slice(&data[start..start + n]);
        self.pos += n as u32;
        n
    }

    fn write(&mut self, buf: &[u8]) -> usize {
        if self.inode.deny_count.load(Ordering::Acquire) > 0 {
            return 0;
        }
        let mut data = self.inode.data.lock();
        let start = (self.pos as usize).min(data.len());
        let n = buf.len().min(data.len() - start);
        data[start..start + n].copy_from_slice(&buf[..n]);
        self.pos += n as u32;
        n
    }

    fn seek(&mut self, pos: u32) {
        self.pos = pos;
    }

    fn tell(&self) -> u32 {
        self.pos
    }

    fn length(&self) -> u32 {
        self.inode.data.lock().len() as u32
    }

    fn deny_write(&mut self) {
        if !self.denied {
            self.denied = true;
            self.inode.deny_count.fetch_add(1, Ordering::AcqRel);
        }
    }

    fn allow_write(&mut self) {
        if self.denied {
            self.denied = false;
            self.inode.deny_count.fetch_sub(1, Ordering::AcqRel);
        }
    }
}

impl Drop for MemFile {
    fn drop(&mut self) {
        self.allow_write();
    }
}

// ---------------------------------------------------------------------------
// Devices

/// Console that records every `putbuf` call.
#[derive(Default)]
pub struct TestConsole {
    calls: Mutex<Vec<Vec<u8>>>,
}

impl TestConsole {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Vec<u8>> {
        self.calls.lock().clone()
    }

    pub fn output(&self) -> String {
        let bytes: Vec<u8> = self.calls.lock().concat();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

impl Console for TestConsole {
    fn putbuf(&self, bytes: &[u8]) {
        self.calls.lock().push(bytes.to_vec());
    }
}

/// Keyboard replaying a fixed script, then NULs.
#[derive(Default)]
pub struct ScriptedKeyboard {
    keys: Mutex<VecDeque<u8>>,
}

impl ScriptedKeyboard {
    pub fn new(keys: &[u8]) -> Arc<Self> {
        Arc::new(Self {
            keys: Mutex::new(keys.iter().copied().collect()),
        })
    }

    pub fn push(&self, keys: &[u8]) {
        self.keys.lock().extend(keys.iter().copied());
    }
}

impl Keyboard for ScriptedKeyboard {
    fn getc(&self) -> u8 {
        self.keys.lock().pop_front().unwrap_or(0)
    }
}

#[derive(Default)]
pub struct TestPower {
    off: AtomicBool,
}

impl TestPower {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn is_off(&self) -> bool {
        self.off.load(Ordering::Acquire)
    }
}

impl Power for TestPower {
    fn power_off(&self) {
        self.off.store(true, Ordering::Release);
    }
}

// ---------------------------------------------------------------------------
// Scheduler

/// Runs every kernel thread on its own host thread.
#[derive(Default)]
pub struct ThreadScheduler {
    handles: Mutex<Vec<JoinHandle<()>>>,
    activations: Mutex<Vec<Option<usize>>>,
    refuse_spawn: AtomicBool,
}

impl ThreadScheduler {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every later `spawn` fail.
    pub fn refuse_spawns(&self) {
        self.refuse_spawn.store(true, Ordering::Release);
    }

    /// Page directories activated so far (`None` for kernel-only tables).
    pub fn activations(&self) -> Vec<Option<usize>> {
        self.activations.lock().clone()
    }

    /// Join every thread started so far, including ones they start.
    pub fn join_all(&self) {
        loop {
            let handles = std::mem::take(&mut *self.handles.lock());
            if handles.is_empty() {
                return;
            }
            for h in handles {
                h.join().expect("kernel thread panicked");
            }
        }
    }
}

impl Scheduler for ThreadScheduler {
    fn spawn(&self, name: &str, body: ThreadBody) -> Result<(), ThreadCreateError> {
        if self.refuse_spawn.load(Ordering::Acquire) {
            return Err(ThreadCreateError);
        }
        let handle = std::thread::Builder::new()
            .name(name.into())
            .spawn(body)
            .map_err(|_| ThreadCreateError)?;
        self.handles.lock().push(handle);
        Ok(())
    }

    fn yield_now(&self) {
        std::thread::yield_now();
    }

    fn activate(&self, space: Option<&AddressSpace>) {
        self.activations.lock().push(space.map(AddressSpace::root));
    }
}

// ---------------------------------------------------------------------------
// User programs

/// User code of a test program.
pub type ProgramFn = dyn Fn(&mut UserSession<'_>) -> Result<(), Terminated> + Send + Sync;

/// Runs the registered closure for the process name.
#[derive(Default)]
pub struct Programs {
    table: Mutex<BTreeMap<String, Arc<ProgramFn>>>,
}

impl UserMode for Programs {
    fn run(&self, session: &mut UserSession<'_>) -> Result<(), Terminated> {
        let program = self.table.lock().get(session.name()).cloned();
        match program {
            Some(program) => program(session),
            None => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// ELF images

enum Phdr {
    Data {
        vaddr: u32,
        data: Vec<u8>,
        mem_size: u32,
        flags: SegmentFlags,
    },
    Raw(Elf32ProgramHeader),
}

/// Builds ELF32 executables.
///
/// Segment data is placed at file offsets congruent to the segment's
/// virtual address modulo the page size, after the headers.
pub struct ElfBuilder {
    entry: u32,
    phdrs: Vec<Phdr>,
}

impl ElfBuilder {
    pub fn new(entry: u32) -> Self {
        Self {
            entry,
            phdrs: Vec::new(),
        }
    }

    /// A `PT_LOAD` segment carrying `data`, `mem_size` bytes in memory.
    pub fn segment(mut self, vaddr: u32, data: &[u8], mem_size: u32, writable: bool) -> Self {
        let mut flags = SegmentFlags::READ;
        flags |= if writable {
            SegmentFlags::WRITE
        } else {
            SegmentFlags::EXECUTE
        };
        self.phdrs.push(Phdr::Data {
            vaddr,
            data: data.to_vec(),
            mem_size,
            flags,
        });
        self
    }

    /// A program header taken as is.
    pub fn raw_phdr(mut self, p_type: u32, offset: u32, vaddr: u32, filesz: u32, memsz: u32) -> Self {
        self.phdrs.push(Phdr::Raw(Elf32ProgramHeader {
            p_type,
            p_offset: offset,
            p_vaddr: vaddr,
            p_paddr: 0,
            p_filesz: filesz,
            p_memsz: memsz,
            p_flags: SegmentFlags::READ.bits(),
            p_align: PAGE_SIZE as u32,
        }));
        self
    }

    pub fn build(self) -> Vec<u8> {
        let phoff = Elf32Header::SIZE;
        let headers_end = phoff + self.phdrs.len() * Elf32ProgramHeader::SIZE;
        let mut out = vec![0u8; headers_end];

        let mut ident = [0u8; 16];
        ident[..7].copy_from_slice(&crate::loader::elf::ELF_IDENT);
        out[0..16].copy_from_slice(&ident);
        out[16..18].copy_from_slice(&ET_EXEC.to_le_bytes());
        out[18..20].copy_from_slice(&EM_386.to_le_bytes());
        out[20..24].copy_from_slice(&EV_CURRENT.to_le_bytes());
        out[24..28].copy_from_slice(&self.entry.to_le_bytes());
        out[28..32].copy_from_slice(&(phoff as u32).to_le_bytes());
        out[40..42].copy_from_slice(&(Elf32Header::SIZE as u16).to_le_bytes());
        out[42..44].copy_from_slice(&(Elf32ProgramHeader::SIZE as u16).to_le_bytes());
        out[44..46].copy_from_slice(&(self.phdrs.len() as u16).to_le_bytes());

        for (i, phdr) in self.phdrs.into_iter().enumerate() {
            let ph = match phdr {
                Phdr::Raw(ph) => ph,
                Phdr::Data {
                    vaddr,
                    data,
                    mem_size,
                    flags,
                } => {
                    let page_start = (out.len() + PAGE_SIZE - 1) & !(PAGE_SIZE - 1);
                    let offset = page_start + (vaddr as usize & (PAGE_SIZE - 1));
                    out.resize(offset, 0);
                    out.extend_from_slice(&data);
                    Elf32ProgramHeader {
                        p_type: PT_LOAD,
                        p_offset: offset as u32,
                        p_vaddr: vaddr,
                        p_paddr: vaddr,
                        p_filesz: data.len() as u32,
                        p_memsz: mem_size,
                        p_flags: flags.bits(),
                        p_align: PAGE_SIZE as u32,
                    }
                }
            };
            let at = phoff + i * Elf32ProgramHeader::SIZE;
            let fields = [
                ph.p_type,
                ph.p_offset,
                ph.p_vaddr,
                ph.p_paddr,
                ph.p_filesz,
                ph.p_memsz,
                ph.p_flags,
                ph.p_align,
            ];
            for (j, field) in fields.iter().enumerate() {
                out[at + j * 4..at + j * 4 + 4].copy_from_slice(&field.to_le_bytes());
            }
        }
        out
    }
}

/// A small valid executable.
pub fn tiny_elf() -> Vec<u8> {
    ElfBuilder::new(0x0804_8000)
        .segment(0x0804_8000, &[0x90, 0x90, 0xcc], 3, false)
        .segment(0x0804_9000, b"data", 0x100, true)
        .build()
}

// ---------------------------------------------------------------------------
// Harness

/// A [`Kernel`] wired to in-memory collaborators.
pub struct Harness {
    pub kernel: Arc<Kernel>,
    pub fs: Arc<MemFs>,
    pub console: Arc<TestConsole>,
    pub keyboard: Arc<ScriptedKeyboard>,
    pub power: Arc<TestPower>,
    pub scheduler: Arc<ThreadScheduler>,
    pub frames: Arc<FramePool>,
    programs: Arc<Programs>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(Config::default(), 256)
    }

    pub fn with_config(config: Config, frames: usize) -> Self {
        let fs = MemFs::new();
        let console = TestConsole::new();
        let keyboard = ScriptedKeyboard::new(&[]);
        let power = TestPower::new();
        let scheduler = ThreadScheduler::new();
        let programs = Arc::new(Programs::default());
        let frames = FramePool::new(frames);
        let kernel = Kernel::new(
            config,
            Arc::clone(&frames),
            Collaborators {
                fs: fs.clone(),
                scheduler: scheduler.clone(),
                console: console.clone(),
                keyboard: keyboard.clone(),
                power: power.clone(),
                user_mode: programs.clone(),
            },
        );
        Self {
            kernel,
            fs,
            console,
            keyboard,
            power,
            scheduler,
            frames,
            programs,
        }
    }

    /// Install executable `name` whose user code is `body`.
    pub fn program<F>(&self, name: &str, body: F)
    where
        F: Fn(&mut UserSession<'_>) -> Result<(), Terminated> + Send + Sync + 'static,
    {
        self.fs.insert(name, tiny_elf());
        self.programs.table.lock().insert(name.into(), Arc::new(body));
    }

    /// Wait for every process thread to finish.
    pub fn join(&self) {
        self.scheduler.join_all();
    }

    /// Console lines printed so far.
    pub fn lines(&self) -> Vec<String> {
        self.console.output().lines().map(String::from).collect()
    }
}
