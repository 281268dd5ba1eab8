//! User/Kernel Transitions
//!
//! User code runs on its process thread through a [`UserMode`]
//! implementation and enters the kernel in exactly two ways:
//!
//! - `int 0x30` system calls, via [`UserSession::trap`]
//! - protection faults, via [`UserSession::fault`]
//!
//! # Register state
//! Only the parts of the interrupt frame the process layer touches are
//! modelled: the instruction pointer, the stack pointer, and `eax` for
//! return values.
//!
//! # Termination
//! A trap that ends the process returns `Err(Terminated)`. The user-mode
//! driver must propagate it and return; the process thread then runs the
//! exit path exactly once.

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;

use log::warn;

use crate::kernel::Kernel;
use crate::mm::{VirtAddr, PAGE_SIZE, WORD_SIZE};
use crate::process::{ExitStatus, Process, ProcessId};
use crate::syscall::{self, validate};

/// Saved user register state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IntrFrame {
    pub eip: u32,
    pub esp: u32,
    pub eax: u32,
}

impl IntrFrame {
    /// Frame for the first user instruction.
    pub fn new(entry: VirtAddr, stack_pointer: VirtAddr) -> Self {
        Self {
            eip: entry.as_u32(),
            esp: stack_pointer.as_u32(),
            eax: 0,
        }
    }
}

/// The process has been terminated and must not run further user code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Terminated;

impl core::fmt::Display for Terminated {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "process terminated")
    }
}

/// Executes user code for a loaded process.
pub trait UserMode: Send + Sync {
    /// Run until the program ends.
    ///
    /// Returning `Ok` means user code stopped without calling `exit`; the
    /// process is then reported as killed.
    fn run(&self, session: &mut UserSession<'_>) -> Result<(), Terminated>;
}

/// A running process as seen from user mode.
pub struct UserSession<'a> {
    kernel: &'a Arc<Kernel>,
    process: &'a mut Process,
    frame: IntrFrame,
}

impl<'a> UserSession<'a> {
    pub fn new(kernel: &'a Arc<Kernel>, process: &'a mut Process, frame: IntrFrame) -> Self {
        Self {
            kernel,
            process,
            frame,
        }
    }

    #[inline]
    pub fn pid(&self) -> ProcessId {
        self.process.pid()
    }

    #[inline]
    pub fn name(&self) -> &str {
        self.process.name()
    }

    #[inline]
    pub fn frame(&self) -> &IntrFrame {
        &self.frame
    }

    #[inline]
    pub fn frame_mut(&mut self) -> &mut IntrFrame {
        &mut self.frame
    }

    /// Enter the kernel through the system call gate.
    pub fn trap(&mut self) -> Result<(), Terminated> {
        syscall::dispatch(self.kernel, self.process, &mut self.frame)
    }

    /// A user access to `addr` faulted.
    pub fn fault(&mut self, addr: VirtAddr) -> Result<(), Terminated> {
        Err(self.kill(addr))
    }

    fn kill(&mut self, addr: VirtAddr) -> Terminated {
        warn!(
            "{}: page fault at {} (eip {:#010x})",
            self.process.name(),
            addr,
            self.frame.eip
        );
        self.process.set_exit_status(ExitStatus::Killed);
        Terminated
    }

    /// Load a user word the way an instruction would, faulting if unmapped.
    pub fn peek_u32(&mut self, addr: VirtAddr) -> Result<u32, Terminated> {
        let mut word = [0u8; WORD_SIZE as usize];
        self.peek(addr, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }

    /// Copy user memory at `addr` into `buf`.
    pub fn peek(&mut self, addr: VirtAddr, buf: &mut [u8]) -> Result<(), Terminated> {
        match validate::copy_in(self.process, addr.as_u32(), buf.len()) {
            Ok(bytes) => {
                buf.copy_from_slice(&bytes);
                Ok(())
            }
            Err(_) => self.fault(addr),
        }
    }

    /// Store `bytes` at `addr`. Faults on unmapped or read-only pages.
    pub fn poke(&mut self, addr: VirtAddr, bytes: &[u8]) -> Result<(), Terminated> {
        match validate::copy_out(self.process, addr.as_u32(), bytes) {
            Ok(()) => Ok(()),
            Err(_) => self.fault(addr),
        }
    }

    /// Push `bytes` on the user stack, word-aligned, returning their address.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<VirtAddr, Terminated> {
        let len = (bytes.len() as u32 + WORD_SIZE - 1) & !(WORD_SIZE - 1);
        let sp = match self.frame.esp.checked_sub(len) {
            Some(sp) => VirtAddr::new(sp),
            None => return Err(self.kill(VirtAddr::NULL)),
        };
        self.poke(sp, bytes)?;
        self.frame.esp = sp.as_u32();
        Ok(sp)
    }

    /// Push a NUL-terminated string on the user stack.
    pub fn push_str(&mut self, s: &str) -> Result<VirtAddr, Terminated> {
        let mut bytes = Vec::with_capacity(s.len() + 1);
        bytes.extend_from_slice(s.as_bytes());
        bytes.push(0);
        self.push_bytes(&bytes)
    }

    /// Issue system call `number` with `args`, as user code would.
    ///
    /// Pushes the call frame below the current stack pointer, traps, pops
    /// it again and returns `eax`.
    pub fn syscall(&mut self, number: u32, args: &[u32]) -> Result<u32, Terminated> {
        let saved = self.frame.esp;
        let mut words = Vec::with_capacity((args.len() + 1) * WORD_SIZE as usize);
        words.extend_from_slice(&number.to_le_bytes());
        for arg in args {
            words.extend_from_slice(&arg.to_le_bytes());
        }
        self.push_bytes(&words)?;
        self.trap()?;
        self.frame.esp = saved;
        Ok(self.frame.eax)
    }

    /// The `argv` strings laid out on the initial stack.
    ///
    /// Only meaningful while the stack pointer is still where the loader
    /// left it.
    pub fn initial_args(&mut self) -> Result<Vec<String>, Terminated> {
        let sp = self.frame.esp;
        let argc = self.peek_u32(VirtAddr::new(sp.wrapping_add(WORD_SIZE)))?;
        let argv = self.peek_u32(VirtAddr::new(sp.wrapping_add(2 * WORD_SIZE)))?;
        let mut args = Vec::new();
        for i in 0..argc {
            let ptr = self.peek_u32(VirtAddr::new(argv.wrapping_add(i * WORD_SIZE)))?;
            match validate::copy_in_cstr(self.process, ptr, PAGE_SIZE) {
                Ok(Some(bytes)) => args.push(String::from_utf8_lossy(&bytes).into_owned()),
                _ => return Err(self.kill(VirtAddr::new(ptr))),
            }
        }
        Ok(args)
    }
}
