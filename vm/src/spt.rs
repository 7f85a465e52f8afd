//! Supplemental page table.
//!
//! The page table only knows about resident pages. The supplemental page
//! table knows about every page of a process: the ones in memory, the ones
//! evicted to swap or to their file, and the ones that were never touched.
//! The page-fault handler consults it to decide whether a faulting address is
//! legal and how to bring the page in.

use crate::page::Page;
use alloc::collections::{BTreeMap, btree_map::Entry};
use swapvm_kernel::{KernelError, addressing::Va};

/// Per-process map from page-aligned virtual address to [`Page`].
#[derive(Default)]
pub struct SupplementalPageTable {
    pages: BTreeMap<Va, Page>,
}

impl SupplementalPageTable {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Find the page containing `addr`.
    pub fn find(&self, addr: Va) -> Option<&Page> {
        self.pages.get(&addr.page_down())
    }

    /// Find the page containing `addr`, mutably.
    pub fn find_mut(&mut self, addr: Va) -> Option<&mut Page> {
        self.pages.get_mut(&addr.page_down())
    }

    /// Register `page`.
    ///
    /// # Returns
    /// - `Ok(())` if the page was registered.
    /// - `Err(KernelError::FileExist)` if a page is already registered at the
    ///   same address. `page` is dropped.
    pub fn insert(&mut self, page: Page) -> Result<(), KernelError> {
        match self.pages.entry(page.va()) {
            Entry::Occupied(_) => Err(KernelError::FileExist),
            Entry::Vacant(entry) => {
                entry.insert(page);
                Ok(())
            }
        }
    }

    /// Unregister the page containing `addr` and hand it to the caller, who
    /// is responsible for destroying it.
    pub fn remove(&mut self, addr: Va) -> Option<Page> {
        self.pages.remove(&addr.page_down())
    }

    /// Iterates over the pages in address order.
    pub fn iter(&self) -> impl Iterator<Item = &Page> {
        self.pages.values()
    }

    /// Unregister every page, in address order.
    pub fn drain(&mut self) -> impl Iterator<Item = Page> {
        core::mem::take(&mut self.pages).into_values()
    }

    /// Number of registered pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Returns `true` if no page is registered.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }
}
