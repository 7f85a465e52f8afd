//! # Memory state of a process
//!
//! The [`MmStruct`] gathers what the virtual memory subsystem knows about
//! one process, similar to the Linux kernel's `struct mm_struct`:
//! - the [`PageTable`], which translates the resident pages, and
//! - the [`SupplementalPageTable`], which describes every page, resident or
//!   not.
//!
//! It also records the user stack pointer saved on the last entry to the
//! kernel. A fault raised while the kernel touches user memory on behalf of
//! the process decides on stack growth with that value, since the kernel's
//! own `rsp` says nothing about the user stack.
//!
//! ## Validating user input
//!
//! The kernel must never crash because of an address a user program handed
//! to it. [`MmStruct::access_ok`] checks a user range against the layout
//! of the process before the kernel touches it.

use crate::spt::SupplementalPageTable;
use core::ops::Range;
use swapvm_kernel::{
    addressing::Va,
    mm::page_table::PageTable,
};

/// The memory state of a process.
pub struct MmStruct {
    /// Translations of the resident pages.
    pub page_table: PageTable,
    /// Every page of the process.
    pub spt: SupplementalPageTable,
    /// User stack pointer saved on the last entry to the kernel.
    pub user_rsp: Va,
}

impl Default for MmStruct {
    fn default() -> Self {
        Self::new()
    }
}

impl MmStruct {
    /// Creates an empty address space.
    pub fn new() -> Self {
        Self {
            page_table: PageTable::new(),
            spt: SupplementalPageTable::new(),
            user_rsp: Va::USER_STACK,
        }
    }

    /// Check whether a given memory range is accessible by the process.
    ///
    /// The range is accessible if it lies entirely in user space and every
    /// page it touches is registered, and writable when `is_write` is set.
    /// This does not bring any page in.
    ///
    /// # Returns
    /// - `true` if the memory range is valid.
    /// - `false` if the memory range is invalid or inaccessible.
    pub fn access_ok(&self, addr: Range<Va>, is_write: bool) -> bool {
        if addr.start > addr.end || !addr.start.is_user() {
            return false;
        }
        let len = addr.end - addr.start;
        if len > 0 && (addr.end - 1).is_kernel() {
            return false;
        }
        addr.start.pages(len).all(|va| {
            self.spt
                .find(va)
                .is_some_and(|page| !is_write || page.writable())
        })
    }
}
