//! User Memory Validation
//!
//! Every user-supplied address is checked before the kernel touches it.
//!
//! # Security Principles
//! - Addresses at or above `PHYS_BASE` belong to the kernel and are refused
//! - Every page a range touches must be mapped in the caller's page tables
//! - Destinations the kernel writes into must be mapped writable
//! - Data is copied in or out; the kernel never keeps a view of user pages
//!
//! A failed check is a [`Fault`]; the gateway turns it into termination of
//! the calling process.

use alloc::vec::Vec;

use crate::mm::{AddressSpace, VirtAddr, PAGE_SIZE, PHYS_BASE, WORD_SIZE};
use crate::process::Process;

/// A user-memory access that must not be performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// The range reaches kernel space or wraps around
    KernelAddress(u32),
    /// A page of the range is not mapped
    Unmapped(u32),
    /// A page the kernel would write to is read-only
    ReadOnly(u32),
    /// The caller has no user address space
    NoAddressSpace,
}

impl core::fmt::Display for Fault {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::KernelAddress(a) => write!(f, "kernel address {:#010x}", a),
            Self::Unmapped(a) => write!(f, "unmapped address {:#010x}", a),
            Self::ReadOnly(a) => write!(f, "read-only address {:#010x}", a),
            Self::NoAddressSpace => write!(f, "no user address space"),
        }
    }
}

fn space_of(process: &Process) -> Result<&AddressSpace, Fault> {
    process.address_space().ok_or(Fault::NoAddressSpace)
}

/// Check `[addr, addr + len)` and call `page_ok` for each page it touches.
fn check_pages(
    space: &AddressSpace,
    addr: u32,
    len: usize,
    mut page_ok: impl FnMut(VirtAddr) -> Result<(), Fault>,
) -> Result<(), Fault> {
    if len == 0 {
        return Ok(());
    }
    let last = u32::try_from(len - 1)
        .ok()
        .and_then(|extra| addr.checked_add(extra))
        .ok_or(Fault::KernelAddress(addr))?;
    if last >= PHYS_BASE {
        return Err(Fault::KernelAddress(addr.max(PHYS_BASE)));
    }

    let mut page = VirtAddr::new(addr).align_down();
    let last_page = VirtAddr::new(last).align_down();
    loop {
        if !space.is_mapped(page) {
            return Err(Fault::Unmapped(page.as_u32().max(addr)));
        }
        page_ok(page)?;
        if page == last_page {
            return Ok(());
        }
        page = VirtAddr::new(page.as_u32() + PAGE_SIZE as u32);
    }
}

/// Check that the kernel may read `len` bytes at `addr`.
pub fn check_readable(process: &Process, addr: u32, len: usize) -> Result<(), Fault> {
    check_pages(space_of(process)?, addr, len, |_| Ok(()))
}

/// Check that the kernel may write `len` bytes at `addr`.
pub fn check_writable(process: &Process, addr: u32, len: usize) -> Result<(), Fault> {
    let space = space_of(process)?;
    check_pages(space, addr, len, |page| {
        if space.is_writable(page) {
            Ok(())
        } else {
            Err(Fault::ReadOnly(page.as_u32().max(addr)))
        }
    })
}

/// Read one argument word.
pub fn read_word(process: &Process, addr: u32) -> Result<u32, Fault> {
    check_readable(process, addr, WORD_SIZE as usize)?;
    space_of(process)?
        .read_u32(VirtAddr::new(addr))
        .map_err(|_| Fault::Unmapped(addr))
}

/// Copy `len` user bytes at `addr` into a kernel buffer.
pub fn copy_in(process: &Process, addr: u32, len: usize) -> Result<Vec<u8>, Fault> {
    check_readable(process, addr, len)?;
    let mut buf = alloc::vec![0u8; len];
    if len > 0 {
        space_of(process)?
            .read(VirtAddr::new(addr), &mut buf)
            .map_err(|_| Fault::Unmapped(addr))?;
    }
    Ok(buf)
}

/// Copy `bytes` to user memory at `addr`.
pub fn copy_out(process: &mut Process, addr: u32, bytes: &[u8]) -> Result<(), Fault> {
    check_writable(process, addr, bytes.len())?;
    if bytes.is_empty() {
        return Ok(());
    }
    process
        .address_space_mut()
        .ok_or(Fault::NoAddressSpace)?
        .write(VirtAddr::new(addr), bytes)
        .map_err(|_| Fault::Unmapped(addr))
}

/// Copy a NUL-terminated user string, without the terminator.
///
/// The terminator must appear within the first `limit` bytes; otherwise
/// returns `Ok(None)`. Faults on the first bad byte before that.
pub fn copy_in_cstr(process: &Process, addr: u32, limit: usize) -> Result<Option<Vec<u8>>, Fault> {
    let space = space_of(process)?;
    let mut out = Vec::new();
    let mut at = addr;
    for _ in 0..limit {
        if at >= PHYS_BASE {
            return Err(Fault::KernelAddress(at));
        }
        let mut byte = [0u8];
        space
            .read(VirtAddr::new(at), &mut byte)
            .map_err(|_| Fault::Unmapped(at))?;
        if byte[0] == 0 {
            return Ok(Some(out));
        }
        out.push(byte[0]);
        at = at.checked_add(1).ok_or(Fault::KernelAddress(at))?;
    }
    Ok(None)
}
