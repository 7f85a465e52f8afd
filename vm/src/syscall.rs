//! # Memory mapping system calls
//!
//! The system call layer validates the arguments of `mmap` and `munmap`
//! before the virtual memory subsystem sees them, and turns the outcome into
//! the value returned to user space: the mapped address or `0` on success, a
//! negated errno (see [`KernelError::into_usize`]) on failure. A bad request
//! never harms the kernel.

use crate::{Pid, Vm};
use swapvm_kernel::{
    KernelError,
    addressing::{KERNEL_BASE, PAGE_SIZE, Va},
    fs::File,
};

impl Vm {
    /// `mmap(addr, length, writable, fd, offset)`.
    ///
    /// `file` is the open file the descriptor refers to, if any.
    ///
    /// # Returns
    /// - The mapped address on success.
    /// - `KernelError::BadFileDescriptor` if there is no file.
    /// - `KernelError::InvalidArgument` if `addr` is null, unaligned or not a
    ///   user address, `length` is zero or reaches kernel addresses, `offset`
    ///   is unaligned or beyond the end of the file, or the file is empty.
    /// - Any error of [`Vm::mmap`].
    pub fn sys_mmap(
        &mut self,
        pid: Pid,
        addr: usize,
        length: usize,
        writable: bool,
        file: Option<&File>,
        offset: usize,
    ) -> usize {
        let result = (|| -> Result<Va, KernelError> {
            let file = file.ok_or(KernelError::BadFileDescriptor)?;
            let addr = Va::new(addr)
                .filter(|va| va.is_user() && va.is_page_aligned())
                .ok_or(KernelError::InvalidArgument)?;
            if length == 0
                || length >= KERNEL_BASE
                || addr.into_usize() + length > KERNEL_BASE
                || offset % PAGE_SIZE != 0
                || file.is_empty()
                || offset >= file.len()
            {
                return Err(KernelError::InvalidArgument);
            }
            self.mmap(pid, addr, length, writable, file, offset)
        })();
        match result {
            Ok(va) => va.into_usize(),
            Err(e) => {
                warn!("{:?}: mmap({:#x}, {:#x}) failed: {:?}", pid, addr, length, e);
                e.into_usize()
            }
        }
    }

    /// `munmap(addr)`.
    ///
    /// # Returns
    /// - `0` on success.
    /// - `KernelError::InvalidArgument` if `addr` is not a user address inside
    ///   a file mapping.
    pub fn sys_munmap(&mut self, pid: Pid, addr: usize) -> usize {
        let result = Va::new(addr)
            .filter(|va| va.is_user())
            .ok_or(KernelError::InvalidArgument)
            .and_then(|va| self.munmap(pid, va));
        match result {
            Ok(()) => 0,
            Err(e) => e.into_usize(),
        }
    }
}
