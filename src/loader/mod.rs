//! Executable Loader
//!
//! Turns an ELF32 executable into a ready-to-run address space:
//!
//! 1. Create an address space
//! 2. Open the executable
//! 3. Read and validate the ELF header
//! 4. Walk the program headers, validating and installing each `PT_LOAD`
//! 5. Map a zeroed stack page below `PHYS_BASE` and lay out `argv` on it
//! 6. Report the entry point
//!
//! On failure everything built so far (frames, address space, open file)
//! is released by drop. On success the executable stays open and
//! write-denied on the process until it exits.

pub mod elf;
pub mod segment;
pub mod stack;

use alloc::sync::Arc;

use log::{debug, warn};

use self::elf::{Elf32Header, Elf32ProgramHeader, ElfError, SegmentKind};
use self::stack::StackOverflow;
use crate::fs::{File, FsLock};
use crate::mm::{AddressSpace, FramePool, MappingError, VirtAddr, PAGE_SIZE, PHYS_BASE};
use crate::process::Process;

/// Loader failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadError {
    /// No user frame left (directory, segment, or stack page)
    OutOfMemory,
    /// The executable does not exist
    OpenFailed,
    /// Malformed or unsupported executable
    Elf(ElfError),
    /// The file ended before the bytes a header or segment promised
    ShortRead,
    /// Page table update refused
    Mapping(MappingError),
    /// Argument count at or above the configured limit
    TooManyArgs,
    /// Arguments do not fit on the stack page
    StackOverflow,
}

impl core::fmt::Display for LoadError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::OutOfMemory => write!(f, "out of user frames"),
            Self::OpenFailed => write!(f, "open failed"),
            Self::Elf(e) => write!(f, "error loading executable: {}", e),
            Self::ShortRead => write!(f, "short read"),
            Self::Mapping(e) => write!(f, "mapping failed: {}", e),
            Self::TooManyArgs => write!(f, "too many arguments"),
            Self::StackOverflow => write!(f, "arguments overflow the stack"),
        }
    }
}

impl From<ElfError> for LoadError {
    fn from(e: ElfError) -> Self {
        Self::Elf(e)
    }
}

impl From<MappingError> for LoadError {
    fn from(e: MappingError) -> Self {
        match e {
            MappingError::OutOfMemory => Self::OutOfMemory,
            other => Self::Mapping(other),
        }
    }
}

impl From<StackOverflow> for LoadError {
    fn from(_: StackOverflow) -> Self {
        Self::StackOverflow
    }
}

/// Where user execution starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadedImage {
    pub entry: VirtAddr,
    pub stack_pointer: VirtAddr,
}

/// User address of the initial stack page.
pub const STACK_PAGE: VirtAddr = VirtAddr::new(PHYS_BASE - PAGE_SIZE as u32);

/// Load `args[0]` with arguments `args` into `process`.
///
/// On success the process owns the new address space and the open,
/// write-denied executable.
pub fn load(
    fs: &FsLock,
    pool: &Arc<FramePool>,
    args: &[&str],
    max_args: usize,
    process: &mut Process,
) -> Result<LoadedImage, LoadError> {
    let name = args.first().copied().unwrap_or("");
    if args.len() >= max_args {
        warn!("load: {}: {} arguments", name, args.len());
        return Err(LoadError::TooManyArgs);
    }

    let mut space = AddressSpace::create(pool)?;

    let mut file = fs.open_unlocked(name).ok_or_else(|| {
        warn!("load: {}: open failed", name);
        LoadError::OpenFailed
    })?;

    let header = read_header(&mut *file).map_err(|e| {
        warn!("load: {}: error loading executable ({})", name, e);
        e
    })?;

    let mut file_ofs = header.e_phoff;
    for _ in 0..header.e_phnum {
        if file_ofs > file.length() {
            return Err(ElfError::InvalidPhoff.into());
        }
        file.seek(file_ofs);
        let mut raw = [0u8; Elf32ProgramHeader::SIZE];
        if file.read(&mut raw) != raw.len() {
            return Err(LoadError::ShortRead);
        }
        file_ofs = file_ofs.saturating_add(Elf32ProgramHeader::SIZE as u32);

        let phdr = Elf32ProgramHeader::parse(&raw)?;
        match phdr.kind() {
            SegmentKind::Ignore => {}
            SegmentKind::Reject => {
                warn!("load: {}: dynamic linking requested", name);
                return Err(ElfError::DynamicLinking.into());
            }
            SegmentKind::Load => {
                let seg = phdr.validate(file.length()).map_err(|e| {
                    warn!("load: {}: bad segment at {:#x}: {}", name, phdr.p_vaddr, e);
                    e
                })?;
                segment::load_segment(&mut *file, &mut space, &seg)?;
            }
        }
    }

    let stack_pointer = setup_stack(&mut space, args)?;
    let entry = VirtAddr::new(header.e_entry);

    file.deny_write();
    debug!(
        "load: {}: entry {} sp {} ({} pages)",
        name,
        entry,
        stack_pointer,
        space.mapped_pages()
    );
    process.install_image(space, file);

    Ok(LoadedImage {
        entry,
        stack_pointer,
    })
}

fn read_header(file: &mut dyn File) -> Result<Elf32Header, LoadError> {
    let mut raw = [0u8; Elf32Header::SIZE];
    if file.read(&mut raw) != raw.len() {
        return Err(ElfError::TooSmall.into());
    }
    let header = Elf32Header::parse(&raw)?;
    header.validate()?;
    Ok(header)
}

/// Map one zeroed page at the top of user space holding `argv`.
fn setup_stack(space: &mut AddressSpace, args: &[&str]) -> Result<VirtAddr, LoadError> {
    let mut frame = space.pool().alloc().ok_or(LoadError::OutOfMemory)?;
    let sp = stack::build_args(frame.bytes_mut(), STACK_PAGE, args)?;
    space.map_page(STACK_PAGE, frame, true)?;
    Ok(sp)
}
