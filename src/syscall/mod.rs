//! System Call Interface
//!
//! User code traps with the call number and its arguments as consecutive
//! 32-bit words at the user stack pointer. Results come back in `eax`.
//!
//! # Security Model
//! - Closed set of calls; any other number kills the caller
//! - The number and every argument slot are validated before being read
//! - Every user pointer is checked against the caller's page tables before
//!   the kernel touches it; a bad pointer kills the caller with -1
//!
//! # Calls
//! | nr | call                      | result |
//! |----|---------------------------|--------|
//! | 0  | halt()                    |        |
//! | 1  | exit(status)              |        |
//! | 2  | exec(cmdline)             | pid    |
//! | 3  | wait(pid)                 | status |
//! | 4  | create(name, size)        | bool   |
//! | 5  | remove(name)              | bool   |
//! | 6  | open(name)                | fd     |
//! | 7  | filesize(fd)              | bytes  |
//! | 8  | read(fd, buf, size)       | bytes  |
//! | 9  | write(fd, buf, size)      | bytes  |
//! | 10 | seek(fd, pos)             |        |
//! | 11 | tell(fd)                  | pos    |
//! | 12 | close(fd)                 |        |

mod handler;
pub mod validate;

pub use handler::dispatch;
pub use validate::Fault;

use crate::process::{Fd, ProcessId};

/// System call numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum SyscallNumber {
    Halt = 0,
    Exit = 1,
    Exec = 2,
    Wait = 3,
    Create = 4,
    Remove = 5,
    Open = 6,
    Filesize = 7,
    Read = 8,
    Write = 9,
    Seek = 10,
    Tell = 11,
    Close = 12,
}

impl SyscallNumber {
    pub const fn from_u32(nr: u32) -> Option<Self> {
        Some(match nr {
            0 => Self::Halt,
            1 => Self::Exit,
            2 => Self::Exec,
            3 => Self::Wait,
            4 => Self::Create,
            5 => Self::Remove,
            6 => Self::Open,
            7 => Self::Filesize,
            8 => Self::Read,
            9 => Self::Write,
            10 => Self::Seek,
            11 => Self::Tell,
            12 => Self::Close,
            _ => return None,
        })
    }

    /// Number of argument words following the call number.
    pub const fn arity(self) -> usize {
        match self {
            Self::Halt => 0,
            Self::Create | Self::Seek => 2,
            Self::Read | Self::Write => 3,
            _ => 1,
        }
    }
}

/// A decoded system call with typed arguments. Pointers stay raw user
/// addresses until the handler validates them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Syscall {
    Halt,
    Exit { status: i32 },
    Exec { cmdline: u32 },
    Wait { pid: ProcessId },
    Create { name: u32, initial_size: u32 },
    Remove { name: u32 },
    Open { name: u32 },
    Filesize { fd: Fd },
    Read { fd: Fd, buf: u32, size: u32 },
    Write { fd: Fd, buf: u32, size: u32 },
    Seek { fd: Fd, pos: u32 },
    Tell { fd: Fd },
    Close { fd: Fd },
}

impl Syscall {
    /// Build the call from its argument words; slots past the arity are ignored.
    pub fn decode(nr: SyscallNumber, args: [u32; 3]) -> Self {
        let [a0, a1, a2] = args;
        let fd = Fd(a0 as i32);
        match nr {
            SyscallNumber::Halt => Self::Halt,
            SyscallNumber::Exit => Self::Exit { status: a0 as i32 },
            SyscallNumber::Exec => Self::Exec { cmdline: a0 },
            SyscallNumber::Wait => Self::Wait {
                pid: ProcessId(a0 as i32),
            },
            SyscallNumber::Create => Self::Create {
                name: a0,
                initial_size: a1,
            },
            SyscallNumber::Remove => Self::Remove { name: a0 },
            SyscallNumber::Open => Self::Open { name: a0 },
            SyscallNumber::Filesize => Self::Filesize { fd },
            SyscallNumber::Read => Self::Read {
                fd,
                buf: a1,
                size: a2,
            },
            SyscallNumber::Write => Self::Write {
                fd,
                buf: a1,
                size: a2,
            },
            SyscallNumber::Seek => Self::Seek { fd, pos: a1 },
            SyscallNumber::Tell => Self::Tell { fd },
            SyscallNumber::Close => Self::Close { fd },
        }
    }

    /// Whether the call leaves a result in `eax`.
    pub const fn returns_value(&self) -> bool {
        !matches!(
            self,
            Self::Halt | Self::Exit { .. } | Self::Seek { .. } | Self::Close { .. }
        )
    }
}
