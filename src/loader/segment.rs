//! ELF Segment Memory Loader
//!
//! Installs a validated segment into a process address space, one page
//! at a time in ascending address order:
//!
//! 1. Pages covering `[page_offset, page_offset + filesz)` are read from
//!    the file, starting at the page-aligned file offset; the rest of each
//!    such page is zeroed.
//! 2. Remaining pages up to `memsz` are zero-filled without touching the
//!    file.
//!
//! Two segments may share a boundary page. The second one reuses the
//! existing frame and can only upgrade it to writable.

use log::trace;

use super::elf::ElfSegment;
use super::LoadError;
use crate::fs::File;
use crate::mm::{page_round_up, AddressSpace, VirtAddr, PAGE_SIZE};

/// Bytes to read from the file and bytes to zero, both counted from the
/// start of the segment's first page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentPlan {
    pub file_page: u32,
    pub mem_page: VirtAddr,
    pub read_bytes: u32,
    pub zero_bytes: u32,
    pub writable: bool,
}

impl SegmentPlan {
    pub fn new(seg: &ElfSegment) -> Self {
        let page_offset = seg.vaddr.page_offset() as u32;
        let (read_bytes, zero_bytes) = if seg.file_size > 0 {
            let read = page_offset + seg.file_size;
            (read, page_round_up(page_offset + seg.mem_size) - read)
        } else {
            (0, page_round_up(page_offset + seg.mem_size))
        };
        Self {
            file_page: seg.offset & !crate::mm::PAGE_MASK,
            mem_page: seg.vaddr.align_down(),
            read_bytes,
            zero_bytes,
            writable: seg.is_writable(),
        }
    }

    /// Number of pages this segment touches.
    pub fn pages(&self) -> usize {
        (self.read_bytes + self.zero_bytes) as usize / PAGE_SIZE
    }
}

/// Map and fill every page of `seg`.
pub fn load_segment(
    file: &mut dyn File,
    space: &mut AddressSpace,
    seg: &ElfSegment,
) -> Result<(), LoadError> {
    let plan = SegmentPlan::new(seg);
    trace!(
        "segment {} (+{} read, +{} zero, writable={})",
        plan.mem_page,
        plan.read_bytes,
        plan.zero_bytes,
        plan.writable
    );

    file.seek(plan.file_page);
    let mut read_left = plan.read_bytes as usize;
    let mut upage = plan.mem_page;

    for _ in 0..plan.pages() {
        let page_read = read_left.min(PAGE_SIZE);

        if !space.is_mapped(upage) {
            let frame = space.pool().alloc().ok_or(LoadError::OutOfMemory)?;
            space.map_page(upage, frame, plan.writable)?;
        } else if plan.writable && !space.is_writable(upage) {
            space.set_writable(upage, true)?;
        }

        let entry = space.entry_mut(upage).ok_or(LoadError::Mapping(
            crate::mm::MappingError::NotMapped,
        ))?;
        let bytes = entry.frame_mut().bytes_mut();
        if file.read(&mut bytes[..page_read]) != page_read {
            return Err(LoadError::ShortRead);
        }
        bytes[page_read..].fill(0);

        read_left -= page_read;
        upage = match upage.checked_add(PAGE_SIZE as u32) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::elf::SegmentFlags;
    use crate::mm::FramePool;
    use crate::testing::MemFile;

    fn seg(offset: u32, vaddr: u32, filesz: u32, memsz: u32, writable: bool) -> ElfSegment {
        let mut flags = SegmentFlags::READ;
        if writable {
            flags |= SegmentFlags::WRITE;
        }
        ElfSegment {
            offset,
            vaddr: VirtAddr::new(vaddr),
            file_size: filesz,
            mem_size: memsz,
            flags,
        }
    }

    #[test]
    fn test_plan_with_bss() {
        let plan = SegmentPlan::new(&seg(0x1100, 0x0804_9100, 0x200, 0x1800, true));
        assert_eq!(plan.file_page, 0x1000);
        assert_eq!(plan.mem_page, VirtAddr::new(0x0804_9000));
        assert_eq!(plan.read_bytes, 0x300);
        assert_eq!(plan.zero_bytes, 0x2000 - 0x300);
        assert_eq!(plan.pages(), 2);
    }

    #[test]
    fn test_plan_all_zero() {
        let plan = SegmentPlan::new(&seg(0, 0x0805_0010, 0, 0x10, true));
        assert_eq!(plan.read_bytes, 0);
        assert_eq!(plan.zero_bytes, 0x1000);
    }

    #[test]
    fn test_load_copies_and_zeroes() {
        let mut data = vec![0u8; 0x2000];
        data[0x1000..0x1010].copy_from_slice(&[7; 16]);
        let mut file = MemFile::detached(data);
        let pool = FramePool::new(8);
        let mut space = AddressSpace::create(&pool).unwrap();

        load_segment(&mut file, &mut space, &seg(0x1000, 0x0804_8000, 0x10, 0x1800, false))
            .unwrap();

        assert_eq!(space.mapped_pages(), 2);
        let mut buf = [0u8; 17];
        space.read(VirtAddr::new(0x0804_8000), &mut buf).unwrap();
        assert_eq!(&buf[..16], &[7; 16]);
        assert_eq!(buf[16], 0);
        assert!(!space.is_writable(VirtAddr::new(0x0804_9000)));
    }

    #[test]
    fn test_shared_page_upgrades_to_writable() {
        let mut file = MemFile::detached(vec![1u8; 0x3000]);
        let pool = FramePool::new(8);
        let mut space = AddressSpace::create(&pool).unwrap();

        load_segment(&mut file, &mut space, &seg(0x1000, 0x0804_8000, 0x800, 0x800, false))
            .unwrap();
        load_segment(&mut file, &mut space, &seg(0x1800, 0x0804_8800, 0x100, 0x100, true))
            .unwrap();
        assert_eq!(space.mapped_pages(), 1);
        assert!(space.is_writable(VirtAddr::new(0x0804_8000)));

        // A later read-only segment never downgrades.
        load_segment(&mut file, &mut space, &seg(0x1000, 0x0804_8000, 0x10, 0x10, false))
            .unwrap();
        assert!(space.is_writable(VirtAddr::new(0x0804_8000)));
    }

    #[test]
    fn test_short_read_fails() {
        let mut file = MemFile::detached(vec![0u8; 0x1100]);
        let pool = FramePool::new(8);
        let mut space = AddressSpace::create(&pool).unwrap();
        let err = load_segment(&mut file, &mut space, &seg(0x1000, 0x0804_8000, 0x800, 0x800, false));
        assert_eq!(err, Err(LoadError::ShortRead));
    }

    #[test]
    fn test_out_of_frames() {
        let mut file = MemFile::detached(vec![0u8; 0x4000]);
        let pool = FramePool::new(2);
        let mut space = AddressSpace::create(&pool).unwrap();
        let err = load_segment(&mut file, &mut space, &seg(0, 0x0804_8000, 0, 0x3000, true));
        assert_eq!(err, Err(LoadError::OutOfMemory));
    }
}
