//! Uninitialized pages.
//!
//! Every page starts its life uninitialized: allocating a page only records
//! how to produce its contents. The first claim runs the initializer in the
//! freshly attached frame and the page then becomes the kind the initializer
//! names.

use crate::{
    anon::{AnonPage, SwapTable},
    file::{FilePage, MmapGroup},
    loader::MmLoader,
    page::{Backing, PageOperations, VmType},
};
use alloc::{collections::BTreeMap, sync::Arc};
use swapvm_kernel::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    mm::page_table::PageTable,
};

/// How to produce the first contents of a page.
pub enum PageInitializer {
    /// Becomes an anonymous page. The frame is zero-filled, then handed to
    /// the loader, if any.
    Anon {
        /// Supplies the initial contents.
        loader: Option<Arc<dyn MmLoader>>,
    },
    /// Becomes a file-backed page.
    File(FilePage),
}

impl PageInitializer {
    /// A zero-filled anonymous page.
    pub fn zeroed() -> Self {
        PageInitializer::Anon { loader: None }
    }

    /// An anonymous page whose contents come from `loader`.
    pub fn with_loader(loader: Arc<dyn MmLoader>) -> Self {
        PageInitializer::Anon {
            loader: Some(loader),
        }
    }
}

/// Payload of a page that was never touched.
pub struct UninitPage {
    init: PageInitializer,
}

impl UninitPage {
    /// Wraps `init` into an uninitialized page payload.
    pub fn new(init: PageInitializer) -> Self {
        Self { init }
    }

    /// The file region the page will be loaded from, for file-backed pages.
    pub fn file(&self) -> Option<&FilePage> {
        match &self.init {
            PageInitializer::File(file) => Some(file),
            PageInitializer::Anon { .. } => None,
        }
    }

    pub(crate) fn into_backing(self) -> Backing {
        match self.init {
            PageInitializer::Anon { .. } => Backing::Anon(AnonPage::new()),
            PageInitializer::File(file) => Backing::File(file),
        }
    }

    pub(crate) fn duplicate(&self, groups: &mut BTreeMap<Va, Arc<MmapGroup>>) -> Self {
        match &self.init {
            PageInitializer::Anon { loader } => Self::new(PageInitializer::Anon {
                loader: loader.clone(),
            }),
            PageInitializer::File(file) => Self::new(PageInitializer::File(file.duplicate(groups))),
        }
    }
}

impl PageOperations for UninitPage {
    fn vm_type(&self) -> VmType {
        match self.init {
            PageInitializer::Anon { .. } => VmType::Anon,
            PageInitializer::File(_) => VmType::File,
        }
    }

    fn swap_in(
        &mut self,
        va: Va,
        kva: &mut [u8; PAGE_SIZE],
        swap: &SwapTable,
    ) -> Result<(), KernelError> {
        match &mut self.init {
            PageInitializer::Anon { loader } => {
                kva.fill(0);
                match loader {
                    Some(loader) => loader.load(va, kva),
                    None => Ok(()),
                }
            }
            PageInitializer::File(file) => file.swap_in(va, kva, swap),
        }
    }

    fn swap_out(
        &mut self,
        va: Va,
        _kva: &[u8; PAGE_SIZE],
        _page_table: &mut PageTable,
        _swap: &SwapTable,
    ) -> Result<(), KernelError> {
        unreachable!("{:?}: uninitialized page is never resident", va)
    }

    fn destroy(
        &mut self,
        _va: Va,
        _kva: Option<&[u8; PAGE_SIZE]>,
        _page_table: &mut PageTable,
        _swap: &SwapTable,
    ) {
    }
}
