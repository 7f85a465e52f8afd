//! Access to user memory.
//!
//! [`Vm::read_user`] and [`Vm::write_user`] access the memory of a process
//! the way its own code would: each byte is translated through the page
//! table, which sets the accessed and dirty bits, and a translation that
//! fails raises a page fault that is resolved before the access is retried.
//! A fault that cannot be resolved aborts the access with the handler's
//! error.

use crate::{Pid, Vm, fault::PageFaultReason};
use core::ops::Range;
use swapvm_kernel::{
    KernelError,
    addressing::{PAGE_SIZE, Pa, Va},
};

impl Vm {
    fn translate(&mut self, pid: Pid, va: Va, is_write: bool) -> Result<Pa, KernelError> {
        let mm = self.mm_mut(pid)?;
        let ec = match mm.page_table.access(va, is_write) {
            Ok(pa) => return Ok(pa),
            Err(ec) => ec,
        };
        let reason = PageFaultReason::new(ec, va, mm.user_rsp);
        self.handle_page_fault(pid, &reason)?;
        self.mm_mut(pid)?
            .page_table
            .access(va, is_write)
            .map_err(|_| KernelError::BadAddress)
    }

    /// Walk `len` bytes of user memory at `addr` one page-bounded chunk at a
    /// time, handing each chunk's frame and range to `f`.
    fn for_each_chunk(
        &mut self,
        pid: Pid,
        addr: Va,
        len: usize,
        is_write: bool,
        mut f: impl FnMut(&mut [u8; PAGE_SIZE], Range<usize>, Range<usize>),
    ) -> Result<(), KernelError> {
        let mut done = 0;
        while done < len {
            let va = addr.checked_add(done).ok_or(KernelError::BadAddress)?;
            let chunk = (PAGE_SIZE - va.offset()).min(len - done);
            let pa = self.translate(pid, va, is_write)?;
            let frame = self.frames.memory_mut().frame_mut(pa.page_down());
            f(frame, pa.offset()..pa.offset() + chunk, done..done + chunk);
            done += chunk;
        }
        Ok(())
    }

    /// Copies `buf.len()` bytes of user memory at `addr` into `buf`.
    pub fn read_user(&mut self, pid: Pid, addr: Va, buf: &mut [u8]) -> Result<(), KernelError> {
        self.for_each_chunk(pid, addr, buf.len(), false, |frame, src, dst| {
            buf[dst].copy_from_slice(&frame[src])
        })
    }

    /// Copies `data` into user memory at `addr`.
    pub fn write_user(&mut self, pid: Pid, addr: Va, data: &[u8]) -> Result<(), KernelError> {
        self.for_each_chunk(pid, addr, data.len(), true, |frame, dst, src| {
            frame[dst].copy_from_slice(&data[src])
        })
    }

    /// Check whether a given memory range is accessible by `pid`.
    ///
    /// See [`MmStruct::access_ok`]. An unknown process can access nothing.
    ///
    /// [`MmStruct::access_ok`]: crate::mm_struct::MmStruct::access_ok
    pub fn access_ok(&self, pid: Pid, addr: Range<Va>, is_write: bool) -> bool {
        self.mm(pid).is_ok_and(|mm| mm.access_ok(addr, is_write))
    }
}
