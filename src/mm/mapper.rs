//! Process Address Space
//!
//! High-level API for managing a process's user mappings.
//! This module provides safe wrappers for page table manipulation.
//!
//! # Security Properties
//! - All mappings require explicit flags
//! - Kernel addresses cannot be mapped with user permissions
//! - The mapper validates all inputs before modifying page tables
//! - Dropping the address space returns every frame to the pool

use alloc::collections::BTreeMap;
use alloc::sync::Arc;

use super::address::{VirtAddr, PAGE_SIZE};
use super::frame::{FramePool, PhysFrame};
use super::paging::{MappingError, PageFlags, PageTableEntry};

/// A process's page directory: user page number to entry.
pub struct AddressSpace {
    /// Frame backing the directory itself.
    directory: PhysFrame,
    entries: BTreeMap<u32, PageTableEntry>,
    pool: Arc<FramePool>,
}

impl AddressSpace {
    /// Create an empty address space.
    ///
    /// Fails with [`MappingError::OutOfMemory`] if no frame is left for
    /// the directory.
    pub fn create(pool: &Arc<FramePool>) -> Result<Self, MappingError> {
        let directory = pool.alloc().ok_or(MappingError::OutOfMemory)?;
        Ok(Self {
            directory,
            entries: BTreeMap::new(),
            pool: Arc::clone(pool),
        })
    }

    /// The pool this space draws its frames from.
    pub fn pool(&self) -> &Arc<FramePool> {
        &self.pool
    }

    /// Frame number of the directory, as loaded into the MMU.
    pub fn root(&self) -> usize {
        self.directory.index()
    }

    /// Number of user pages currently mapped.
    pub fn mapped_pages(&self) -> usize {
        self.entries.len()
    }

    /// Map a single page.
    ///
    /// # Arguments
    /// * `upage` - Page-aligned user address
    /// * `frame` - Frame to install; released again if mapping fails
    /// * `writable` - Whether user code may write the page
    pub fn map_page(
        &mut self,
        upage: VirtAddr,
        frame: PhysFrame,
        writable: bool,
    ) -> Result<(), MappingError> {
        if !upage.is_aligned() {
            return Err(MappingError::MisalignedAddress);
        }
        if !upage.is_user() {
            return Err(MappingError::InvalidPermissions);
        }
        if self.entries.contains_key(&upage.page_number()) {
            return Err(MappingError::AlreadyMapped);
        }

        self.entries.insert(
            upage.page_number(),
            PageTableEntry::page(frame, PageFlags::user(writable)),
        );
        Ok(())
    }

    /// Look up the entry covering `addr`.
    #[inline]
    pub fn entry(&self, addr: VirtAddr) -> Option<&PageTableEntry> {
        if !addr.is_user() {
            return None;
        }
        self.entries.get(&addr.page_number())
    }

    /// Look up the entry covering `addr`, mutably.
    #[inline]
    pub fn entry_mut(&mut self, addr: VirtAddr) -> Option<&mut PageTableEntry> {
        if !addr.is_user() {
            return None;
        }
        self.entries.get_mut(&addr.page_number())
    }

    /// Check whether the page containing `addr` is mapped.
    #[inline]
    pub fn is_mapped(&self, addr: VirtAddr) -> bool {
        self.entry(addr).is_some()
    }

    /// Check whether the page containing `addr` is mapped writable.
    #[inline]
    pub fn is_writable(&self, addr: VirtAddr) -> bool {
        self.entry(addr).is_some_and(PageTableEntry::is_writable)
    }

    /// Change the writability of a mapped page.
    pub fn set_writable(&mut self, upage: VirtAddr, writable: bool) -> Result<(), MappingError> {
        let entry = self.entry_mut(upage).ok_or(MappingError::NotMapped)?;
        entry.set_writable(writable);
        Ok(())
    }

    /// Copy bytes out of the space, crossing pages as needed.
    ///
    /// Fails with [`MappingError::NotMapped`] on the first unmapped page;
    /// `buf` may be partially filled in that case.
    pub fn read(&self, addr: VirtAddr, buf: &mut [u8]) -> Result<(), MappingError> {
        let mut done = 0;
        while done < buf.len() {
            let cur = offset_addr(addr, done)?;
            let entry = self.entry(cur).ok_or(MappingError::NotMapped)?;
            let ofs = cur.page_offset();
            let n = (PAGE_SIZE - ofs).min(buf.len() - done);
            buf[done..done + n].copy_from_slice(&entry.frame().bytes()[ofs..ofs + n]);
            done += n;
        }
        Ok(())
    }

    /// Copy bytes into the space, crossing pages as needed.
    ///
    /// Writes regardless of the page's user writability; callers that act
    /// on behalf of user code check that first.
    pub fn write(&mut self, addr: VirtAddr, bytes: &[u8]) -> Result<(), MappingError> {
        let mut done = 0;
        while done < bytes.len() {
            let cur = offset_addr(addr, done)?;
            let entry = self.entry_mut(cur).ok_or(MappingError::NotMapped)?;
            let ofs = cur.page_offset();
            let n = (PAGE_SIZE - ofs).min(bytes.len() - done);
            entry.frame_mut().bytes_mut()[ofs..ofs + n].copy_from_slice(&bytes[done..done + n]);
            done += n;
        }
        Ok(())
    }

    /// Read a little-endian user word.
    pub fn read_u32(&self, addr: VirtAddr) -> Result<u32, MappingError> {
        let mut word = [0u8; 4];
        self.read(addr, &mut word)?;
        Ok(u32::from_le_bytes(word))
    }
}

fn offset_addr(base: VirtAddr, offset: usize) -> Result<VirtAddr, MappingError> {
    u32::try_from(offset)
        .ok()
        .and_then(|ofs| base.checked_add(ofs))
        .ok_or(MappingError::NotMapped)
}

impl core::fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AddressSpace")
            .field("root", &self.directory.index())
            .field("pages", &self.entries.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mm::PHYS_BASE;

    fn space(frames: usize) -> AddressSpace {
        AddressSpace::create(&FramePool::new(frames)).unwrap()
    }

    #[test]
    fn test_create_needs_a_frame() {
        let pool = FramePool::new(0);
        assert_eq!(
            AddressSpace::create(&pool).unwrap_err(),
            MappingError::OutOfMemory
        );
    }

    #[test]
    fn test_map_rejects_bad_addresses() {
        let mut s = space(4);
        let frame = s.pool().alloc().unwrap();
        assert_eq!(
            s.map_page(VirtAddr::new(0x1234), frame, false),
            Err(MappingError::MisalignedAddress)
        );
        let frame = s.pool().alloc().unwrap();
        assert_eq!(
            s.map_page(VirtAddr::new(PHYS_BASE), frame, false),
            Err(MappingError::InvalidPermissions)
        );
        // Both rejected frames went back to the pool.
        assert_eq!(s.pool().free_frames(), 3);
    }

    #[test]
    fn test_double_map_fails() {
        let mut s = space(4);
        let upage = VirtAddr::new(0x1000);
        let frame = s.pool().alloc().unwrap();
        s.map_page(upage, frame, false).unwrap();
        let frame = s.pool().alloc().unwrap();
        assert_eq!(s.map_page(upage, frame, true), Err(MappingError::AlreadyMapped));
        assert!(!s.is_writable(upage));
    }

    #[test]
    fn test_cross_page_copy() {
        let mut s = space(4);
        for page in [0x1000, 0x2000] {
            let frame = s.pool().alloc().unwrap();
            s.map_page(VirtAddr::new(page), frame, true).unwrap();
        }
        let addr = VirtAddr::new(0x1FFE);
        s.write(addr, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        s.read(addr, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
        assert_eq!(s.read_u32(addr).unwrap(), 0x0403_0201);
        assert_eq!(
            s.read(VirtAddr::new(0x2FFE), &mut buf),
            Err(MappingError::NotMapped)
        );
    }

    #[test]
    fn test_drop_releases_frames() {
        let pool = FramePool::new(4);
        let mut s = AddressSpace::create(&pool).unwrap();
        let frame = pool.alloc().unwrap();
        s.map_page(VirtAddr::new(0x1000), frame, true).unwrap();
        assert_eq!(pool.free_frames(), 2);
        drop(s);
        assert_eq!(pool.free_frames(), 4);
    }
}
