//! # Memory-mapped files
//!
//! `mmap` maps a region of a regular file into the address space of a
//! process. No page is read at mapping time: the mapping registers one
//! uninitialized page per page of the region, and each page reads its part of
//! the file when it is first touched. The last page of a region that does not
//! end on a page boundary reads only the remaining bytes and zero-fills the
//! rest.
//!
//! Modifications go back to the file. Whenever a file-backed page leaves
//! memory, either because the frame manager evicts it or because it is
//! unmapped, its dirty bit is consulted and, if set, the bytes of the page that
//! came from the file are written back to where they came from. A page that
//! was never written is dropped without any I/O.
//!
//! ## Mapping groups
//!
//! The pages created by a single `mmap` form an [`MmapGroup`]. Every member
//! refers to the group, which owns the group's own open handle on the file,
//! reopened from the caller's handle. The group can therefore be unmapped
//! from the address of any of its members, and the caller may close its
//! handle right after `mmap` returns. The group's handle is closed exactly
//! once, when the group is unmapped or its process exits.

use crate::{
    Pid, Vm,
    anon::SwapTable,
    page::{Backing, Page, PageMarker, PageOperations, VmType},
    uninit::{PageInitializer, UninitPage},
};
use alloc::{collections::BTreeMap, sync::Arc};
use swapvm_kernel::{
    KernelError,
    addressing::{KERNEL_BASE, PAGE_SIZE, Va},
    fs::File,
    mm::page_table::PageTable,
    sync::SpinLock,
};

/// The pages created by a single `mmap`.
pub struct MmapGroup {
    start: Va,
    page_count: usize,
    file: SpinLock<File>,
}

impl MmapGroup {
    /// Address of the first page of the group.
    pub fn start(&self) -> Va {
        self.start
    }

    /// Number of pages in the group.
    pub fn page_count(&self) -> usize {
        self.page_count
    }

    /// Iterates over the address of every page of the group.
    pub fn pages(&self) -> impl Iterator<Item = Va> {
        self.start.pages(self.page_count * PAGE_SIZE)
    }

    fn reopen(&self) -> Self {
        Self {
            start: self.start,
            page_count: self.page_count,
            file: SpinLock::new(self.file.lock().reopen()),
        }
    }

    fn close(self) {
        self.file.into_inner().close()
    }
}

/// Payload of a file-backed page.
///
/// Only `mmap` and fork create file pages, so every page of a group lies
/// inside the group's range and `munmap` reaches all of them.
///
/// ```compile_fail
/// fn stray_member(page: &swapvm::file::FilePage) -> swapvm::file::FilePage {
///     page.clone()
/// }
/// ```
pub struct FilePage {
    group: Arc<MmapGroup>,
    offset: usize,
    read_bytes: usize,
    zero_bytes: usize,
    is_first_page: bool,
    pages_remaining: usize,
}

impl FilePage {
    /// The mapping group the page belongs to.
    pub fn group(&self) -> &Arc<MmapGroup> {
        &self.group
    }

    /// Offset in the file of the first byte of the page.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of bytes read from the file.
    pub fn read_bytes(&self) -> usize {
        self.read_bytes
    }

    /// Number of bytes zero-filled after the bytes read from the file.
    pub fn zero_bytes(&self) -> usize {
        self.zero_bytes
    }

    /// Whether the page is the first one of its group.
    pub fn is_first_page(&self) -> bool {
        self.is_first_page
    }

    /// Number of pages of the group that follow this page.
    pub fn pages_remaining(&self) -> usize {
        self.pages_remaining
    }

    pub(crate) fn duplicate(&self, groups: &mut BTreeMap<Va, Arc<MmapGroup>>) -> Self {
        let group = groups
            .entry(self.group.start)
            .or_insert_with(|| Arc::new(self.group.reopen()))
            .clone();
        Self {
            group,
            offset: self.offset,
            read_bytes: self.read_bytes,
            zero_bytes: self.zero_bytes,
            is_first_page: self.is_first_page,
            pages_remaining: self.pages_remaining,
        }
    }

    /// Write the page back to the file if it is dirty.
    fn write_back(
        &self,
        va: Va,
        kva: &[u8; PAGE_SIZE],
        page_table: &mut PageTable,
    ) -> Result<(), KernelError> {
        if !page_table.is_dirty(va) {
            return Ok(());
        }
        let mut file = self.group.file.lock();
        file.seek(self.offset);
        let written = file.write(&kva[..self.read_bytes])?;
        assert_eq!(
            written, self.read_bytes,
            "{:?}: short write back at offset {:#x}",
            va, self.offset
        );
        page_table.set_dirty(va, false);
        debug!(
            "{:?}: wrote {} bytes back at offset {:#x}",
            va, written, self.offset
        );
        Ok(())
    }
}

impl PageOperations for FilePage {
    fn vm_type(&self) -> VmType {
        VmType::File
    }

    fn swap_in(
        &mut self,
        va: Va,
        kva: &mut [u8; PAGE_SIZE],
        _swap: &SwapTable,
    ) -> Result<(), KernelError> {
        let mut file = self.group.file.lock();
        file.seek(self.offset);
        let read = file.read(&mut kva[..self.read_bytes])?;
        assert_eq!(
            read, self.read_bytes,
            "{:?}: file truncated under the mapping at offset {:#x}",
            va, self.offset
        );
        kva[self.read_bytes..].fill(0);
        Ok(())
    }

    fn swap_out(
        &mut self,
        va: Va,
        kva: &[u8; PAGE_SIZE],
        page_table: &mut PageTable,
        _swap: &SwapTable,
    ) -> Result<(), KernelError> {
        self.write_back(va, kva, page_table)
    }

    fn destroy(
        &mut self,
        va: Va,
        kva: Option<&[u8; PAGE_SIZE]>,
        page_table: &mut PageTable,
        _swap: &SwapTable,
    ) {
        if let Some(kva) = kva {
            if let Err(e) = self.write_back(va, kva, page_table) {
                panic!("{:?}: write back failed on unmap: {:?}", va, e);
            }
        }
    }
}

impl Vm {
    /// Maps `length` bytes of `file` starting at `offset` at `addr` in the
    /// address space of `pid`.
    ///
    /// The mapping covers `min(length, file size - offset)` bytes, rounded up
    /// to whole pages. It fails as a whole if any of those pages is already
    /// mapped, leaving the address space untouched.
    ///
    /// # Returns
    /// - `Ok(addr)` on success.
    /// - `Err(KernelError::InvalidArgument)` if `addr` is not page aligned,
    ///   the mapping would cover no byte of the file, or would reach kernel
    ///   addresses.
    /// - `Err(KernelError::FileExist)` if the region overlaps a mapped page.
    pub fn mmap(
        &mut self,
        pid: Pid,
        addr: Va,
        length: usize,
        writable: bool,
        file: &File,
        offset: usize,
    ) -> Result<Va, KernelError> {
        let read_len = length.min(file.len().saturating_sub(offset));
        if read_len == 0 || !addr.is_page_aligned() || !addr.is_user() {
            return Err(KernelError::InvalidArgument);
        }
        let page_count = read_len.div_ceil(PAGE_SIZE);
        match addr.checked_add(page_count * PAGE_SIZE) {
            Some(end) if end.into_usize() <= KERNEL_BASE => (),
            _ => return Err(KernelError::InvalidArgument),
        }

        let mm = self.mm_mut(pid)?;
        if let Some(va) = addr
            .pages(page_count * PAGE_SIZE)
            .find(|va| mm.spt.find(*va).is_some())
        {
            warn!("mmap at {:?} overlaps the page at {:?}", addr, va);
            return Err(KernelError::FileExist);
        }

        let group = Arc::new(MmapGroup {
            start: addr,
            page_count,
            file: SpinLock::new(file.reopen()),
        });
        let mut remaining = read_len;
        for (i, va) in group.pages().enumerate() {
            let read_bytes = remaining.min(PAGE_SIZE);
            remaining -= read_bytes;
            let payload = FilePage {
                group: group.clone(),
                offset: offset + i * PAGE_SIZE,
                read_bytes,
                zero_bytes: PAGE_SIZE - read_bytes,
                is_first_page: i == 0,
                pages_remaining: page_count - 1 - i,
            };
            let page = Page::new(
                va,
                writable,
                PageMarker::Normal,
                Backing::Uninit(UninitPage::new(PageInitializer::File(payload))),
            );
            if let Err(e) = mm.spt.insert(page) {
                group.pages().take(i).for_each(|va| {
                    mm.spt.remove(va);
                });
                return Err(e);
            }
        }
        debug!(
            "{:?}: mmap {:?}..{:?} ({} bytes of file at {:#x})",
            pid,
            addr,
            addr + page_count * PAGE_SIZE,
            read_len,
            offset
        );
        Ok(addr)
    }

    /// Unmaps the mapping group that contains `addr`.
    ///
    /// Every page of the group is written back if dirty and removed, and the
    /// group's handle on the file is closed.
    ///
    /// # Returns
    /// - `Ok(())` on success.
    /// - `Err(KernelError::InvalidArgument)` if `addr` is not in a file
    ///   mapping.
    pub fn munmap(&mut self, pid: Pid, addr: Va) -> Result<(), KernelError> {
        let Vm {
            frames,
            swap,
            spaces,
            ..
        } = self;
        let mm = spaces.get_mut(&pid).ok_or(KernelError::NoSuchEntry)?;
        let group = mm
            .spt
            .find(addr)
            .and_then(Page::mmap_group)
            .cloned()
            .ok_or(KernelError::InvalidArgument)?;
        for va in group.pages() {
            let Some(page) = mm.spt.remove(va) else {
                panic!("{:?}: page of the mapping at {:?} is missing", va, group.start);
            };
            page.destroy(&mut mm.page_table, frames, swap);
        }
        debug!("{:?}: munmap {:?} ({} pages)", pid, group.start, group.page_count);
        match Arc::try_unwrap(group) {
            Ok(group) => group.close(),
            Err(group) => panic!("mapping at {:?} still referenced after munmap", group.start),
        }
        Ok(())
    }
}
