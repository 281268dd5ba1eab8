//! ELF32 Parser
//!
//! Decodes and validates the executable header and program headers of
//! 32-bit i386 executables.

use bitflags::bitflags;

use crate::mm::{VirtAddr, PAGE_MASK, PAGE_SIZE};

/// Identification prefix: magic, 32-bit class, little endian, version 1.
pub const ELF_IDENT: [u8; 7] = [0x7F, b'E', b'L', b'F', 1, 1, 1];

/// ELF type: executable
pub const ET_EXEC: u16 = 2;

/// Machine type: i386
pub const EM_386: u16 = 3;

/// Current ELF version
pub const EV_CURRENT: u32 = 1;

/// Upper bound on program headers, bounding the parse loop.
pub const MAX_PHNUM: u16 = 1024;

pub const PT_NULL: u32 = 0;
pub const PT_LOAD: u32 = 1;
pub const PT_DYNAMIC: u32 = 2;
pub const PT_INTERP: u32 = 3;
pub const PT_NOTE: u32 = 4;
pub const PT_SHLIB: u32 = 5;
pub const PT_PHDR: u32 = 6;
pub const PT_STACK: u32 = 0x6474_E551;

bitflags! {
    /// Segment permissions (`p_flags`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SegmentFlags: u32 {
        const EXECUTE = 1;
        const WRITE = 2;
        const READ = 4;
    }
}

/// ELF32 file header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32Header {
    pub e_ident: [u8; 16],
    pub e_type: u16,
    pub e_machine: u16,
    pub e_version: u32,
    pub e_entry: u32,
    pub e_phoff: u32,
    pub e_shoff: u32,
    pub e_flags: u32,
    pub e_ehsize: u16,
    pub e_phentsize: u16,
    pub e_phnum: u16,
    pub e_shentsize: u16,
    pub e_shnum: u16,
    pub e_shstrndx: u16,
}

/// ELF32 program header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Elf32ProgramHeader {
    pub p_type: u32,
    pub p_offset: u32,
    pub p_vaddr: u32,
    pub p_paddr: u32,
    pub p_filesz: u32,
    pub p_memsz: u32,
    pub p_flags: u32,
    pub p_align: u32,
}

/// ELF loading errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElfError {
    /// File shorter than a header
    TooSmall,
    /// Wrong magic, class, encoding, or identification version
    InvalidIdent,
    /// Not an executable
    InvalidType,
    /// Not an i386 image
    InvalidMachine,
    /// Wrong object file version
    InvalidVersion,
    /// Program header entry size does not match the structure
    InvalidPhentsize,
    /// Too many program headers
    InvalidPhnum,
    /// Program header table points outside the file
    InvalidPhoff,
    /// Dynamic linking requested
    DynamicLinking,
    /// File and virtual page offsets differ
    MisalignedSegment,
    /// Segment file offset beyond end of file
    SegmentOutOfBounds,
    /// `p_memsz < p_filesz`
    InvalidMemSize,
    /// `p_memsz == 0`
    EmptySegment,
    /// Segment leaves user space, wraps, or touches page 0
    InvalidAddress,
}

impl core::fmt::Display for ElfError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::TooSmall => write!(f, "truncated header"),
            Self::InvalidIdent => write!(f, "bad identification"),
            Self::InvalidType => write!(f, "not an executable"),
            Self::InvalidMachine => write!(f, "not an i386 image"),
            Self::InvalidVersion => write!(f, "bad version"),
            Self::InvalidPhentsize => write!(f, "bad program header size"),
            Self::InvalidPhnum => write!(f, "too many program headers"),
            Self::InvalidPhoff => write!(f, "program header outside file"),
            Self::DynamicLinking => write!(f, "dynamic linking not supported"),
            Self::MisalignedSegment => write!(f, "segment file/memory offsets differ"),
            Self::SegmentOutOfBounds => write!(f, "segment offset beyond file"),
            Self::InvalidMemSize => write!(f, "segment memsz < filesz"),
            Self::EmptySegment => write!(f, "empty segment"),
            Self::InvalidAddress => write!(f, "segment outside user space"),
        }
    }
}

fn u16_at(b: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([b[at], b[at + 1]])
}

fn u32_at(b: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([b[at], b[at + 1], b[at + 2], b[at + 3]])
}

impl Elf32Header {
    /// On-disk size.
    pub const SIZE: usize = 52;

    /// Decode a header. No validation beyond length.
    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        if data.len() < Self::SIZE {
            return Err(ElfError::TooSmall);
        }
        let mut e_ident = [0u8; 16];
        e_ident.copy_from_slice(&data[..16]);
        Ok(Self {
            e_ident,
            e_type: u16_at(data, 16),
            e_machine: u16_at(data, 18),
            e_version: u32_at(data, 20),
            e_entry: u32_at(data, 24),
            e_phoff: u32_at(data, 28),
            e_shoff: u32_at(data, 32),
            e_flags: u32_at(data, 36),
            e_ehsize: u16_at(data, 40),
            e_phentsize: u16_at(data, 42),
            e_phnum: u16_at(data, 44),
            e_shentsize: u16_at(data, 46),
            e_shnum: u16_at(data, 48),
            e_shstrndx: u16_at(data, 50),
        })
    }

    /// Check that this is a loadable i386 executable.
    pub fn validate(&self) -> Result<(), ElfError> {
        if self.e_ident[..ELF_IDENT.len()] != ELF_IDENT {
            return Err(ElfError::InvalidIdent);
        }
        if self.e_type != ET_EXEC {
            return Err(ElfError::InvalidType);
        }
        if self.e_machine != EM_386 {
            return Err(ElfError::InvalidMachine);
        }
        if self.e_version != EV_CURRENT {
            return Err(ElfError::InvalidVersion);
        }
        if usize::from(self.e_phentsize) != Elf32ProgramHeader::SIZE {
            return Err(ElfError::InvalidPhentsize);
        }
        if self.e_phnum > MAX_PHNUM {
            return Err(ElfError::InvalidPhnum);
        }
        Ok(())
    }
}

/// What the loader does with a program header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentKind {
    /// Map it.
    Load,
    /// Skip it.
    Ignore,
    /// Refuse the whole executable.
    Reject,
}

impl Elf32ProgramHeader {
    /// On-disk size.
    pub const SIZE: usize = 32;

    pub fn parse(data: &[u8]) -> Result<Self, ElfError> {
        if data.len() < Self::SIZE {
            return Err(ElfError::TooSmall);
        }
        Ok(Self {
            p_type: u32_at(data, 0),
            p_offset: u32_at(data, 4),
            p_vaddr: u32_at(data, 8),
            p_paddr: u32_at(data, 12),
            p_filesz: u32_at(data, 16),
            p_memsz: u32_at(data, 20),
            p_flags: u32_at(data, 24),
            p_align: u32_at(data, 28),
        })
    }

    pub fn kind(&self) -> SegmentKind {
        match self.p_type {
            PT_LOAD => SegmentKind::Load,
            PT_DYNAMIC | PT_INTERP | PT_SHLIB => SegmentKind::Reject,
            PT_NULL | PT_NOTE | PT_PHDR | PT_STACK => SegmentKind::Ignore,
            _ => SegmentKind::Ignore,
        }
    }

    /// Validate a loadable segment against a file of `file_len` bytes.
    pub fn validate(&self, file_len: u32) -> Result<ElfSegment, ElfError> {
        if self.p_offset & PAGE_MASK != self.p_vaddr & PAGE_MASK {
            return Err(ElfError::MisalignedSegment);
        }
        if self.p_offset > file_len {
            return Err(ElfError::SegmentOutOfBounds);
        }
        if self.p_memsz < self.p_filesz {
            return Err(ElfError::InvalidMemSize);
        }
        if self.p_memsz == 0 {
            return Err(ElfError::EmptySegment);
        }

        let start = VirtAddr::new(self.p_vaddr);
        let end = start
            .checked_add(self.p_memsz)
            .ok_or(ElfError::InvalidAddress)?;
        if !start.is_user() || !end.is_user() {
            return Err(ElfError::InvalidAddress);
        }
        // Page 0 stays unmapped so a null user pointer never resolves.
        if (self.p_vaddr as usize) < PAGE_SIZE {
            return Err(ElfError::InvalidAddress);
        }

        Ok(ElfSegment {
            offset: self.p_offset,
            vaddr: start,
            file_size: self.p_filesz,
            mem_size: self.p_memsz,
            flags: SegmentFlags::from_bits_truncate(self.p_flags),
        })
    }
}

/// A validated loadable segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ElfSegment {
    pub offset: u32,
    pub vaddr: VirtAddr,
    pub file_size: u32,
    pub mem_size: u32,
    pub flags: SegmentFlags,
}

impl ElfSegment {
    #[inline]
    pub fn is_writable(&self) -> bool {
        self.flags.contains(SegmentFlags::WRITE)
    }
}
