//! # Page fault handling
//!
//! Every access to a page that is not resident, and every write to a page
//! mapped read-only, ends up in [`Vm::handle_page_fault`]. The handler
//! decides whether the access is legal and, if so, makes it succeed on
//! retry:
//!
//! 1. A user-mode access to a kernel address is illegal.
//! 2. If the supplemental page table has a page for the address, the access
//!    is legal unless it writes a read-only page. The page is claimed.
//! 3. Otherwise the access is legal only if it is a user write that grows
//!    the stack: it must land in the stack window below [`USER_STACK`], and
//!    no further below the stack pointer than a push may probe. The stack
//!    then grows to cover the address.
//!
//! Anything else is reported as an error, and the caller terminates the
//! process.
//!
//! [`USER_STACK`]: swapvm_kernel::addressing::USER_STACK

use crate::{Pid, Vm, page::PageMarker, uninit::PageInitializer};
use swapvm_kernel::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    task::PFErrorCode,
};

/// Represents the reason for a page fault in a virtual memory system.
///
/// This struct is used to capture various details about a page fault,
/// including the faulting address, the type of access that caused the fault
/// (read or write), and the user stack pointer at the time of the fault.
#[derive(Debug, Clone, Copy)]
pub struct PageFaultReason {
    /// The address that caused the page fault.
    pub fault_addr: Va,

    /// Indicates whether the fault was due to a write access.
    pub is_write_access: bool,

    /// Indicates whether the page that caused the fault is present in memory.
    ///
    /// A value of `true` means that the page is mapped and the fault was
    /// caused by a protection violation. A value of `false` means the page
    /// is not mapped (e.g., it was never touched or has been evicted).
    pub is_present: bool,

    /// Indicates whether the access originated in user mode.
    pub is_user: bool,

    /// The user stack pointer.
    ///
    /// For a fault raised in user mode this is the `rsp` of the interrupt
    /// frame; for a fault raised while the kernel accesses user memory, the
    /// stack pointer saved on entry to the kernel.
    pub user_rsp: Va,
}

impl PageFaultReason {
    /// Probe the cause of page fault into a [`PageFaultReason`].
    ///
    /// This function decodes a hardware-provided [`PFErrorCode`],
    /// generated by the CPU when a page fault occurs, into a structured
    /// [`PageFaultReason`] that the kernel can interpret.
    pub fn new(ec: PFErrorCode, cr2: Va, user_rsp: Va) -> Self {
        PageFaultReason {
            fault_addr: cr2,
            is_write_access: ec.contains(PFErrorCode::WRITE_ACCESS),
            is_present: ec.contains(PFErrorCode::PRESENT),
            is_user: ec.contains(PFErrorCode::USER),
            user_rsp,
        }
    }

    /// Returns `true` if the fault is a write to a present page, i.e. a
    /// write-protection violation.
    #[inline]
    pub fn is_write_protection_fault(&self) -> bool {
        self.is_present && self.is_write_access
    }
}

impl Vm {
    /// Handles a page fault of process `pid`.
    ///
    /// # Returns
    /// - `Ok(())` if the faulting access can be retried.
    /// - `Err(KernelError::InvalidAccess)` if the access touches kernel memory
    ///   from user mode or writes a read-only page.
    /// - `Err(KernelError::BadAddress)` if nothing is mapped at the address
    ///   and the access does not grow the stack.
    /// - `Err(KernelError::NoMemory)` or `Err(KernelError::NoSpace)` if the
    ///   page could not be brought in.
    pub fn handle_page_fault(&mut self, pid: Pid, reason: &PageFaultReason) -> Result<(), KernelError> {
        let addr = reason.fault_addr;
        if reason.is_user && addr.is_kernel() {
            warn!("{:?}: user access to kernel address {:?}", pid, addr);
            return Err(KernelError::InvalidAccess);
        }

        let page = self
            .mm(pid)?
            .spt
            .find(addr)
            .map(|page| (page.va(), page.writable(), page.is_resident()));
        match page {
            Some((va, writable, _)) if reason.is_write_access && !writable => {
                warn!("{:?}: write to read-only page {:?}", pid, va);
                Err(KernelError::InvalidAccess)
            }
            Some((_, _, true)) => Ok(()),
            Some(_) => self.claim_page(pid, addr),
            None if self.is_stack_growth(reason) => self.stack_growth(pid, addr),
            None => {
                warn!(
                    "{:?}: {} at unmapped {:?}",
                    pid,
                    if reason.is_write_access { "write" } else { "read" },
                    addr
                );
                Err(KernelError::BadAddress)
            }
        }
    }

    fn is_stack_growth(&self, reason: &PageFaultReason) -> bool {
        let addr = reason.fault_addr.into_usize();
        let top = Va::USER_STACK.into_usize();
        let bottom = top.saturating_sub(self.config.stack_limit);
        let lowest_probe = reason
            .user_rsp
            .into_usize()
            .saturating_sub(self.config.stack_slack);
        reason.is_user
            && reason.is_write_access
            && bottom < addr
            && addr < top
            && lowest_probe <= addr
    }

    /// Grow the stack of `pid` down to the page containing `addr`.
    ///
    /// Pages are created from the faulting page upward until the first page
    /// that is already mapped, so the stack never has holes. Each new page is
    /// zero-filled and claimed immediately.
    fn stack_growth(&mut self, pid: Pid, addr: Va) -> Result<(), KernelError> {
        let mut va = addr.page_down();
        let mut grown = 0;
        while va < Va::USER_STACK && self.mm(pid)?.spt.find(va).is_none() {
            self.alloc_page_with_initializer(
                pid,
                va,
                true,
                PageMarker::Stack,
                PageInitializer::zeroed(),
            )?;
            self.claim_page(pid, va)?;
            va += PAGE_SIZE;
            grown += 1;
        }
        debug!(
            "{:?}: stack grown by {} pages down to {:?}",
            pid,
            grown,
            addr.page_down()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_code() {
        let addr = Va::new(0x1234).unwrap();
        let reason = PageFaultReason::new(
            PFErrorCode::USER | PFErrorCode::WRITE_ACCESS | PFErrorCode::PRESENT,
            addr,
            Va::USER_STACK,
        );
        assert!(reason.is_user);
        assert!(reason.is_write_protection_fault());
        assert_eq!(reason.fault_addr, addr);

        let reason = PageFaultReason::new(PFErrorCode::empty(), addr, Va::USER_STACK);
        assert!(!reason.is_user);
        assert!(!reason.is_write_access);
        assert!(!reason.is_write_protection_fault());
    }
}
