//! # Loading a program image
//!
//! A program is not read into memory when it is loaded. Every page of every
//! loadable segment is registered as an uninitialized anonymous page whose
//! [`MmLoader`] knows which bytes of the executable it holds; the bytes are
//! read on the first access to the page. From then on the page is an
//! ordinary anonymous page: it is evicted to swap, never written back to the
//! executable.
//!
//! The stack is the exception. Its first page is claimed right away by
//! [`Vm::setup_stack`], since the process touches it before executing its
//! first instruction.

use crate::{
    Pid, Vm,
    page::PageMarker,
    uninit::PageInitializer,
};
use alloc::sync::Arc;
use swapvm_kernel::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    fs::RegularFile,
};

/// A trait for loading the contents of a virtual memory page on demand.
///
/// The loader is invoked when an uninitialized anonymous page is first
/// claimed. The frame it is handed is already zero-filled.
pub trait MmLoader
where
    Self: Send + Sync,
{
    /// Fill `kva` with the initial contents of the page at `addr`.
    fn load(&self, addr: Va, kva: &mut [u8; PAGE_SIZE]) -> Result<(), KernelError>;
}

/// Loads one page of a segment from an executable.
pub struct SegmentLoader {
    file: RegularFile,
    offset: usize,
    read_bytes: usize,
}

impl MmLoader for SegmentLoader {
    fn load(&self, addr: Va, kva: &mut [u8; PAGE_SIZE]) -> Result<(), KernelError> {
        let read = self.file.read(self.offset, &mut kva[..self.read_bytes])?;
        if read != self.read_bytes {
            warn!(
                "{:?}: executable ends at {:#x}, expected {} bytes",
                addr,
                self.offset + read,
                self.read_bytes
            );
            return Err(KernelError::IOError);
        }
        Ok(())
    }
}

/// A loadable segment of an executable.
#[derive(Debug, Clone, Copy)]
pub struct Segment {
    /// Offset of the segment in the file. Must be page aligned.
    pub offset: usize,
    /// Address the segment is loaded at. Must be page aligned.
    pub vaddr: Va,
    /// Number of bytes read from the file.
    pub read_bytes: usize,
    /// Number of zero bytes following the bytes read from the file.
    pub zero_bytes: usize,
    /// Whether the segment is writable.
    pub writable: bool,
}

impl Vm {
    /// Registers the pages of `segment` of `file` in the address space of
    /// `pid`. Nothing is read until a page is first accessed.
    ///
    /// # Returns
    /// - `Ok(())` on success.
    /// - `Err(KernelError::InvalidArgument)` if the segment is not page
    ///   aligned.
    /// - `Err(KernelError::FileExist)` if a page of the segment is already
    ///   registered. Pages registered before it are left in place; the
    ///   caller abandons the whole address space in that case.
    pub fn load_segment(
        &mut self,
        pid: Pid,
        file: &RegularFile,
        segment: &Segment,
    ) -> Result<(), KernelError> {
        let Segment {
            mut offset,
            vaddr,
            mut read_bytes,
            mut zero_bytes,
            writable,
        } = *segment;
        if (read_bytes + zero_bytes) % PAGE_SIZE != 0
            || !vaddr.is_page_aligned()
            || offset % PAGE_SIZE != 0
        {
            return Err(KernelError::InvalidArgument);
        }

        let mut upage = vaddr;
        while read_bytes > 0 || zero_bytes > 0 {
            let page_read_bytes = read_bytes.min(PAGE_SIZE);
            let page_zero_bytes = PAGE_SIZE - page_read_bytes;

            let init = if page_read_bytes == 0 {
                PageInitializer::zeroed()
            } else {
                PageInitializer::with_loader(Arc::new(SegmentLoader {
                    file: file.clone(),
                    offset,
                    read_bytes: page_read_bytes,
                }))
            };
            self.alloc_page_with_initializer(pid, upage, writable, PageMarker::Normal, init)?;

            offset += page_read_bytes;
            read_bytes -= page_read_bytes;
            zero_bytes -= page_zero_bytes;
            upage += PAGE_SIZE;
        }
        Ok(())
    }

    /// Creates the first page of the user stack of `pid`, right below
    /// [`USER_STACK`], and claims it immediately.
    ///
    /// Returns the initial stack pointer.
    ///
    /// [`USER_STACK`]: swapvm_kernel::addressing::USER_STACK
    pub fn setup_stack(&mut self, pid: Pid) -> Result<Va, KernelError> {
        let stack_bottom = Va::USER_STACK - PAGE_SIZE;
        self.alloc_page_with_initializer(
            pid,
            stack_bottom,
            true,
            PageMarker::Stack,
            PageInitializer::zeroed(),
        )?;
        self.claim_page(pid, stack_bottom)?;
        self.mm_mut(pid)?.user_rsp = Va::USER_STACK;
        Ok(Va::USER_STACK)
    }
}
