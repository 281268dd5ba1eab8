//! Initial User Stack
//!
//! Lays out `argc`/`argv` on the freshly mapped stack page, growing down
//! from the page top:
//!
//! ```text
//! PHYS_BASE ┌──────────────────────────┐
//!           │ "prog\0"                 │  argv[0] string (highest)
//!           │ "a\0"                    │
//!           │ "bb\0"                   │  argv[argc-1] string
//!           │ padding to 4 bytes       │
//!           │ NULL                     │  argv[argc]
//!           │ &"bb"                    │  argv[argc-1]
//!           │ ...                      │
//!           │ &"prog"                  │  argv[0]
//!           │ argv                     │
//!           │ argc                     │
//! sp  ───>  │ 0 (fake return address)  │
//!           └──────────────────────────┘
//! ```
//!
//! Every write is bounds-checked against the page; nothing is written
//! through raw pointers.

use alloc::vec::Vec;

use crate::mm::{VirtAddr, PAGE_SIZE, WORD_SIZE};

/// The arguments did not fit on the stack page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackOverflow;

impl core::fmt::Display for StackOverflow {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "arguments overflow the stack page")
    }
}

/// Split a command line into arguments (runs of spaces separate them).
pub fn tokenize(cmdline: &str) -> impl Iterator<Item = &str> {
    cmdline.split(' ').filter(|tok| !tok.is_empty())
}

/// Downward-growing writer over one stack page.
pub struct StackBuilder<'a> {
    page: &'a mut [u8; PAGE_SIZE],
    /// User address of `page[0]`.
    base: VirtAddr,
    /// Offset of the lowest written byte.
    top: usize,
}

impl<'a> StackBuilder<'a> {
    /// Start an empty stack whose top is the end of `page`.
    pub fn new(page: &'a mut [u8; PAGE_SIZE], base: VirtAddr) -> Self {
        Self {
            page,
            base,
            top: PAGE_SIZE,
        }
    }

    /// Current stack pointer.
    pub fn sp(&self) -> VirtAddr {
        // top <= PAGE_SIZE, so this cannot wrap for a page-aligned base
        VirtAddr::new(self.base.as_u32() + self.top as u32)
    }

    fn reserve(&mut self, len: usize) -> Result<&mut [u8], StackOverflow> {
        self.top = self.top.checked_sub(len).ok_or(StackOverflow)?;
        Ok(&mut self.page[self.top..self.top + len])
    }

    /// Push raw bytes, returning their user address.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<VirtAddr, StackOverflow> {
        self.reserve(bytes.len())?.copy_from_slice(bytes);
        Ok(self.sp())
    }

    /// Push a NUL-terminated copy of `s`, returning its user address.
    pub fn push_cstr(&mut self, s: &str) -> Result<VirtAddr, StackOverflow> {
        let dst = self.reserve(s.len() + 1)?;
        let (text, nul) = dst.split_at_mut(s.len());
        text.copy_from_slice(s.as_bytes());
        nul[0] = 0;
        Ok(self.sp())
    }

    /// Push one little-endian machine word.
    pub fn push_word(&mut self, word: u32) -> Result<VirtAddr, StackOverflow> {
        self.push_bytes(&word.to_le_bytes())
    }

    /// Move the stack pointer down to a multiple of `align`, zero-filling.
    pub fn align(&mut self, align: usize) -> Result<(), StackOverflow> {
        let pad = self.top % align;
        self.reserve(pad)?.fill(0);
        Ok(())
    }
}

/// Lay out `args` as the program's `argc`/`argv` and return the initial
/// stack pointer (pointing at the fake return address).
pub fn build_args(
    page: &mut [u8; PAGE_SIZE],
    base: VirtAddr,
    args: &[&str],
) -> Result<VirtAddr, StackOverflow> {
    let mut stack = StackBuilder::new(page, base);

    let mut argv = Vec::with_capacity(args.len());
    for arg in args {
        argv.push(stack.push_cstr(arg)?);
    }

    stack.align(WORD_SIZE as usize)?;
    stack.push_word(0)?;
    for addr in argv.iter().rev() {
        stack.push_word(addr.as_u32())?;
    }

    let argv_start = stack.sp();
    stack.push_word(argv_start.as_u32())?;
    stack.push_word(args.len() as u32)?;
    stack.push_word(0)?;

    Ok(stack.sp())
}
