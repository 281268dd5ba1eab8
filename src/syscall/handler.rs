//! System Call Handler
//!
//! Fetches the call number and argument words from the user stack,
//! decodes them into a [`Syscall`] and runs it against the calling process.
//!
//! # Security Considerations
//! - The number word and each argument slot are validated before reading
//! - Unknown call numbers terminate the caller
//! - Buffers are validated in full before any byte is transferred

use alloc::string::String;
use alloc::sync::Arc;

use log::{debug, trace, warn};

use super::validate::{self, Fault};
use super::{Syscall, SyscallNumber};
use crate::drivers::console::putbuf_chunked;
use crate::kernel::Kernel;
use crate::mm::WORD_SIZE;
use crate::process::{ExitStatus, Fd, Process, ProcessId};
use crate::trap::{IntrFrame, Terminated};

/// Why a call ends the calling process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Abort {
    /// Bad user memory
    Fault(Fault),
    /// `seek`/`tell` on a descriptor the process does not own
    BadDescriptor(Fd),
    /// Unknown call number
    BadCall(u32),
    /// `exit` or `halt`
    Exit(ExitStatus),
}

impl From<Fault> for Abort {
    fn from(f: Fault) -> Self {
        Self::Fault(f)
    }
}

/// Handle one system call trap from `process`.
///
/// Returns `Err(Terminated)` when the call ended the process; its exit
/// status has been set and the exit path must run next.
pub fn dispatch(
    kernel: &Arc<Kernel>,
    process: &mut Process,
    frame: &mut IntrFrame,
) -> Result<(), Terminated> {
    let outcome = decode(process, frame.esp).and_then(|call| {
        trace!("{}: {:?}", process.name(), call);
        execute(kernel, process, call).map(|ret| (call, ret))
    });
    let abort = match outcome {
        Ok((call, ret)) => {
            if call.returns_value() {
                frame.eax = ret as u32;
            }
            return Ok(());
        }
        Err(abort) => abort,
    };

    let status = match abort {
        Abort::Exit(status) => status,
        Abort::Fault(f) => {
            warn!("{}: killed: {}", process.name(), f);
            ExitStatus::Killed
        }
        Abort::BadDescriptor(fd) => {
            warn!("{}: killed: bad {}", process.name(), fd);
            ExitStatus::Killed
        }
        Abort::BadCall(nr) => {
            warn!("{}: killed: unknown system call {}", process.name(), nr);
            ExitStatus::Killed
        }
    };
    process.set_exit_status(status);
    Err(Terminated)
}

/// Read and validate the call number and its argument words at `esp`.
fn decode(process: &Process, esp: u32) -> Result<Syscall, Abort> {
    let raw = validate::read_word(process, esp)?;
    let nr = SyscallNumber::from_u32(raw).ok_or(Abort::BadCall(raw))?;

    let mut args = [0u32; 3];
    for (i, slot) in args.iter_mut().enumerate().take(nr.arity()) {
        let addr = esp
            .checked_add((i as u32 + 1) * WORD_SIZE)
            .ok_or(Fault::KernelAddress(esp))?;
        *slot = validate::read_word(process, addr)?;
    }
    Ok(Syscall::decode(nr, args))
}

fn execute(kernel: &Arc<Kernel>, process: &mut Process, call: Syscall) -> Result<i32, Abort> {
    match call {
        Syscall::Halt => sys_halt(kernel),
        Syscall::Exit { status } => Err(Abort::Exit(ExitStatus::Code(status))),
        Syscall::Exec { cmdline } => sys_exec(kernel, process, cmdline),
        Syscall::Wait { pid } => Ok(sys_wait(kernel, process, pid)),
        Syscall::Create { name, initial_size } => sys_create(kernel, process, name, initial_size),
        Syscall::Remove { name } => sys_remove(kernel, process, name),
        Syscall::Open { name } => sys_open(kernel, process, name),
        Syscall::Filesize { fd } => Ok(sys_filesize(process, fd)),
        Syscall::Read { fd, buf, size } => sys_read(kernel, process, fd, buf, size),
        Syscall::Write { fd, buf, size } => sys_write(kernel, process, fd, buf, size),
        Syscall::Seek { fd, pos } => sys_seek(process, fd, pos).map(|()| 0),
        Syscall::Tell { fd } => sys_tell(process, fd),
        Syscall::Close { fd } => {
            sys_close(process, fd);
            Ok(0)
        }
    }
}

fn bool_result(ok: bool) -> i32 {
    ok as i32
}

/// Copy a file or command name from user memory.
///
/// `Ok(None)` when it is longer than `max` bytes or not UTF-8.
fn user_string(process: &Process, addr: u32, max: usize) -> Result<Option<String>, Abort> {
    let bytes = match validate::copy_in_cstr(process, addr, max.saturating_add(1))? {
        Some(bytes) => bytes,
        None => return Ok(None),
    };
    Ok(String::from_utf8(bytes).ok())
}

fn sys_halt(kernel: &Kernel) -> Result<i32, Abort> {
    debug!("halt");
    kernel.power().power_off();
    Err(Abort::Exit(ExitStatus::Killed))
}

fn sys_exec(kernel: &Arc<Kernel>, process: &mut Process, cmdline: u32) -> Result<i32, Abort> {
    let Some(cmd) = user_string(process, cmdline, kernel.config().max_cmdline)? else {
        return Ok(ProcessId::ERROR.0);
    };
    Ok(match kernel.spawn(process, &cmd) {
        Ok(pid) => pid.0,
        Err(e) => {
            debug!("{}: exec \"{}\": {}", process.name(), cmd, e);
            ProcessId::ERROR.0
        }
    })
}

fn sys_wait(kernel: &Kernel, process: &mut Process, pid: ProcessId) -> i32 {
    kernel.wait(process, pid).unwrap_or(-1)
}

fn sys_create(kernel: &Kernel, process: &Process, name: u32, size: u32) -> Result<i32, Abort> {
    let Some(name) = user_string(process, name, kernel.config().max_path)? else {
        return Ok(0);
    };
    Ok(bool_result(kernel.fs().lock().create(&name, size)))
}

fn sys_remove(kernel: &Kernel, process: &Process, name: u32) -> Result<i32, Abort> {
    let Some(name) = user_string(process, name, kernel.config().max_path)? else {
        return Ok(0);
    };
    Ok(bool_result(kernel.fs().lock().remove(&name)))
}

fn sys_open(kernel: &Kernel, process: &mut Process, name: u32) -> Result<i32, Abort> {
    let Some(name) = user_string(process, name, kernel.config().max_path)? else {
        return Ok(-1);
    };
    let Some(file) = kernel.fs().lock().open(&name) else {
        return Ok(-1);
    };
    Ok(process.files_mut().insert(file).map_or(-1, |fd| fd.0))
}

fn sys_filesize(process: &mut Process, fd: Fd) -> i32 {
    process
        .files_mut()
        .get_mut(fd)
        .map_or(-1, |file| file.length() as i32)
}

fn sys_read(
    kernel: &Kernel,
    process: &mut Process,
    fd: Fd,
    buf: u32,
    size: u32,
) -> Result<i32, Abort> {
    validate::check_writable(process, buf, size as usize)?;

    if fd == Fd::STDIN {
        let keyboard = kernel.keyboard();
        let mut data = alloc::vec![0u8; size as usize];
        for byte in data.iter_mut() {
            *byte = keyboard.getc();
        }
        validate::copy_out(process, buf, &data)?;
        return Ok(size as i32);
    }
    if fd == Fd::STDOUT {
        return Ok(-1);
    }

    let mut data = alloc::vec![0u8; size as usize];
    let n = match process.files_mut().get_mut(fd) {
        Some(file) => file.read(&mut data),
        None => return Ok(-1),
    };
    validate::copy_out(process, buf, &data[..n])?;
    Ok(n as i32)
}

fn sys_write(
    kernel: &Kernel,
    process: &mut Process,
    fd: Fd,
    buf: u32,
    size: u32,
) -> Result<i32, Abort> {
    let data = validate::copy_in(process, buf, size as usize)?;

    if fd == Fd::STDOUT {
        putbuf_chunked(kernel.console(), &data, kernel.config().console_chunk);
        return Ok(size as i32);
    }
    if fd == Fd::STDIN {
        return Ok(-1);
    }

    Ok(process
        .files_mut()
        .get_mut(fd)
        .map_or(-1, |file| file.write(&data) as i32))
}

fn sys_seek(process: &mut Process, fd: Fd, pos: u32) -> Result<(), Abort> {
    match process.files_mut().get_mut(fd) {
        Some(file) if !fd.is_standard() => {
            file.seek(pos);
            Ok(())
        }
        _ => Err(Abort::BadDescriptor(fd)),
    }
}

fn sys_tell(process: &mut Process, fd: Fd) -> Result<i32, Abort> {
    match process.files_mut().get_mut(fd) {
        Some(file) if !fd.is_standard() => Ok(file.tell() as i32),
        _ => Err(Abort::BadDescriptor(fd)),
    }
}

fn sys_close(process: &mut Process, fd: Fd) {
    if fd.is_standard() {
        return;
    }
    if process.files_mut().remove(fd).is_none() {
        trace!("{}: close of unknown {}", process.name(), fd);
    }
}
