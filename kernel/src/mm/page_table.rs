//! Page table of a user process.
//!
//! The [`PageTable`] is the MMU as far as the paging core is concerned: it
//! translates a user virtual page to a physical frame and records the
//! hardware-maintained *accessed* and *dirty* bits of every translation.
//!
//! The paging core never inspects entries directly. It uses the narrow
//! interface below:
//! - [`PageTable::map`] / [`PageTable::unmap`] install and remove a
//!   translation.
//! - [`PageTable::is_dirty`] / [`PageTable::set_dirty`] and
//!   [`PageTable::is_accessed`] / [`PageTable::set_accessed`] query and reset
//!   the hardware bits.
//! - [`PageTable::access`] performs what the CPU does on a memory access:
//!   translate, check permissions, and set the accessed (and, on write, dirty)
//!   bit, or report the fault with a [`PFErrorCode`].

use crate::{
    KernelError,
    addressing::{PAGE_MASK, Pa, Va},
    task::PFErrorCode,
};
use alloc::collections::BTreeMap;

/// Error that can occur while mapping or unmapping a page.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum PageTableMappingError {
    /// Unaligned address.
    ///
    /// This error is returned when an address does not meet the required
    /// alignment for the page table operation.
    Unaligned,

    /// Not exist.
    ///
    /// This error is returned when an attempt is made to access or modify a
    /// page table entry that does not exist.
    NotExist,

    /// Duplicated mapping.
    ///
    /// This error is returned when an attempt is made to create a duplicate
    /// mapping for an address that already has an existing mapping.
    Duplicated,

    /// Invalid permission.
    ///
    /// This error is returned when an attempt is made to map a user page at a
    /// kernel address.
    InvalidPermission,
}

impl From<PageTableMappingError> for KernelError {
    fn from(e: PageTableMappingError) -> Self {
        match e {
            PageTableMappingError::Unaligned => KernelError::InvalidArgument,
            PageTableMappingError::NotExist => KernelError::BadAddress,
            PageTableMappingError::Duplicated => KernelError::FileExist,
            PageTableMappingError::InvalidPermission => KernelError::InvalidAccess,
        }
    }
}

bitflags::bitflags! {
    /// Possible memory permissions for a page.
    pub struct Permission: usize {
        /// Page is readable.
        const READ = 1 << 0;
        /// Page is writable.
        const WRITE = 1 << 1;
        /// Page is executable.
        const EXECUTABLE = 1 << 2;
        /// Page can be referred by user application.
        const USER = 1 << 3;
    }
}

bitflags::bitflags! {
    /// Flags of a page table entry.
    ///
    /// The bit positions follow the x86_64 PTE layout.
    pub struct PteFlags: usize {
        /// Present; must be 1 to map a 4-KByte page.
        const P = 1 << 0;
        /// Read/write; if 0, writes are not allowed.
        const RW = 1 << 1;
        /// User/supervisor; if 0, user-mode accesses are not allowed.
        const US = 1 << 2;
        /// Accessed; set by the hardware on any access.
        const A = 1 << 5;
        /// Dirty; set by the hardware on a write.
        const D = 1 << 6;
    }
}

/// A page table entry: the frame address with [`PteFlags`] in the low bits.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Pte(pub usize);

impl Pte {
    /// Physical address of the mapped frame, if the entry is present.
    pub fn pa(&self) -> Option<Pa> {
        if self.flags().contains(PteFlags::P) {
            Pa::new(self.0 & !PAGE_MASK)
        } else {
            None
        }
    }

    /// Flags of the entry.
    pub fn flags(&self) -> PteFlags {
        PteFlags::from_bits_truncate(self.0 & PAGE_MASK)
    }

    fn set_flags(&mut self, flags: PteFlags) {
        self.0 = (self.0 & !PAGE_MASK) | flags.bits();
    }
}

impl core::fmt::Debug for Pte {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Pte({:?}, {:?})", self.pa(), self.flags())
    }
}

/// Translation table of one user address space.
#[derive(Default)]
pub struct PageTable {
    entries: BTreeMap<Va, Pte>,
}

impl PageTable {
    /// Create an empty page table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Map `pa` at the user address `va` with permission `perm`.
    ///
    /// # Returns
    /// - `Ok(())` if the mapping was installed.
    /// - `Err(PageTableMappingError)` if either address is unaligned, `va` is
    ///   a kernel address, or `va` is already mapped.
    pub fn map(&mut self, va: Va, pa: Pa, perm: Permission) -> Result<(), PageTableMappingError> {
        if va.offset() != 0 || pa.offset() != 0 {
            return Err(PageTableMappingError::Unaligned);
        }
        if va.is_kernel() {
            return Err(PageTableMappingError::InvalidPermission);
        }
        if self.entries.contains_key(&va) {
            return Err(PageTableMappingError::Duplicated);
        }
        let mut flags = PteFlags::P | PteFlags::US;
        if perm.contains(Permission::WRITE) {
            flags |= PteFlags::RW;
        }
        self.entries.insert(va, Pte(pa.into_usize() | flags.bits()));
        Ok(())
    }

    /// Remove the mapping of `va`, returning the frame it pointed to.
    pub fn unmap(&mut self, va: Va) -> Result<Pa, PageTableMappingError> {
        if va.offset() != 0 {
            return Err(PageTableMappingError::Unaligned);
        }
        self.entries
            .remove(&va)
            .and_then(|pte| pte.pa())
            .ok_or(PageTableMappingError::NotExist)
    }

    /// Find the entry that translates `va`.
    pub fn walk(&self, va: Va) -> Result<&Pte, PageTableMappingError> {
        self.entries
            .get(&va.page_down())
            .ok_or(PageTableMappingError::NotExist)
    }

    fn update(&mut self, va: Va, f: impl FnOnce(&mut PteFlags)) {
        if let Some(pte) = self.entries.get_mut(&va.page_down()) {
            let mut flags = pte.flags();
            f(&mut flags);
            pte.set_flags(flags);
        }
    }

    /// Returns `true` if the page at `va` was written since its dirty bit was
    /// last cleared. An unmapped page is never dirty.
    pub fn is_dirty(&self, va: Va) -> bool {
        self.walk(va)
            .map(|pte| pte.flags().contains(PteFlags::D))
            .unwrap_or(false)
    }

    /// Set or clear the dirty bit of the page at `va`.
    pub fn set_dirty(&mut self, va: Va, dirty: bool) {
        self.update(va, |flags| flags.set(PteFlags::D, dirty))
    }

    /// Returns `true` if the page at `va` was accessed since its accessed bit
    /// was last cleared. An unmapped page is never accessed.
    pub fn is_accessed(&self, va: Va) -> bool {
        self.walk(va)
            .map(|pte| pte.flags().contains(PteFlags::A))
            .unwrap_or(false)
    }

    /// Set or clear the accessed bit of the page at `va`.
    pub fn set_accessed(&mut self, va: Va, accessed: bool) {
        self.update(va, |flags| flags.set(PteFlags::A, accessed))
    }

    /// Translate a user access to `va` the way the CPU does.
    ///
    /// On success the accessed bit is set (and the dirty bit as well for a
    /// write) and the physical address of the byte is returned. Otherwise the
    /// error code of the page fault the CPU would raise is returned.
    pub fn access(&mut self, va: Va, is_write: bool) -> Result<Pa, PFErrorCode> {
        let mut ec = PFErrorCode::USER;
        if is_write {
            ec |= PFErrorCode::WRITE_ACCESS;
        }
        let Some(pte) = self.entries.get_mut(&va.page_down()) else {
            return Err(ec);
        };
        let mut flags = pte.flags();
        if is_write && !flags.contains(PteFlags::RW) {
            return Err(ec | PFErrorCode::PRESENT);
        }
        flags |= PteFlags::A;
        if is_write {
            flags |= PteFlags::D;
        }
        pte.set_flags(flags);
        pte.pa()
            .map(|pa| pa + va.offset())
            .ok_or(ec)
    }

    /// Number of installed translations.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no translation is installed.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn va(addr: usize) -> Va {
        Va::new(addr).unwrap()
    }

    fn pa(addr: usize) -> Pa {
        Pa::new(addr).unwrap()
    }

    #[test]
    fn map_rejects_bad_requests() {
        let mut pt = PageTable::new();
        assert_eq!(
            pt.map(va(0x1001), pa(0x20_0000), Permission::READ),
            Err(PageTableMappingError::Unaligned)
        );
        assert_eq!(
            pt.map(va(crate::addressing::KERNEL_BASE), pa(0x20_0000), Permission::READ),
            Err(PageTableMappingError::InvalidPermission)
        );
        pt.map(va(0x1000), pa(0x20_0000), Permission::READ).unwrap();
        assert_eq!(
            pt.map(va(0x1000), pa(0x20_1000), Permission::READ),
            Err(PageTableMappingError::Duplicated)
        );
        assert_eq!(pt.unmap(va(0x2000)), Err(PageTableMappingError::NotExist));
        assert_eq!(pt.unmap(va(0x1000)), Ok(pa(0x20_0000)));
        assert!(pt.is_empty());
    }

    #[test]
    fn access_sets_hardware_bits() {
        let mut pt = PageTable::new();
        pt.map(va(0x1000), pa(0x20_0000), Permission::READ | Permission::WRITE)
            .unwrap();
        assert!(!pt.is_accessed(va(0x1000)));
        assert_eq!(pt.access(va(0x1234), false), Ok(pa(0x20_0234)));
        assert!(pt.is_accessed(va(0x1000)));
        assert!(!pt.is_dirty(va(0x1000)));
        pt.access(va(0x1fff), true).unwrap();
        assert!(pt.is_dirty(va(0x1000)));
        pt.set_dirty(va(0x1000), false);
        pt.set_accessed(va(0x1000), false);
        assert!(!pt.is_dirty(va(0x1000)));
        assert!(!pt.is_accessed(va(0x1000)));
        assert_eq!(pt.walk(va(0x1000)).unwrap().pa(), Some(pa(0x20_0000)));
    }

    #[test]
    fn access_reports_faults() {
        let mut pt = PageTable::new();
        pt.map(va(0x1000), pa(0x20_0000), Permission::READ).unwrap();
        assert_eq!(
            pt.access(va(0x1000), true),
            Err(PFErrorCode::USER | PFErrorCode::WRITE_ACCESS | PFErrorCode::PRESENT)
        );
        assert!(!pt.is_dirty(va(0x1000)));
        assert_eq!(pt.access(va(0x3000), false), Err(PFErrorCode::USER));
    }
}
