//! # Pages
//!
//! A [`Page`] is the unit of virtual memory tracking: one page-aligned virtual
//! address of one process, whether or not any physical memory currently backs
//! it. Where the contents come from, and where they go on eviction, depends
//! on the page's [`Backing`]:
//!
//! - [`Backing::Uninit`]: never touched. Its [`UninitPage`] records how the
//!   page must be initialized on first access and what it becomes afterwards.
//! - [`Backing::Anon`]: an [`AnonPage`], evicted to the swap device.
//! - [`Backing::File`]: a [`FilePage`], written back to its file when dirty.
//!
//! Each variant implements [`PageOperations`]. [`Page`] wraps the variant with
//! the bookkeeping every kind shares: owning the [`Frame`] while resident,
//! installing and removing the translation, and turning an uninitialized page
//! into its concrete kind on first swap-in.

use crate::{
    anon::{AnonPage, SwapTable},
    file::{FilePage, MmapGroup},
    frame::{Frame, FrameTable},
    uninit::{PageInitializer, UninitPage},
};
use alloc::{collections::BTreeMap, sync::Arc};
use swapvm_kernel::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    mm::{
        PhysicalMemory,
        page_table::{PageTable, Permission},
    },
};

/// Kind of a page once it is initialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VmType {
    /// Swap-backed page.
    Anon,
    /// Page backed by a region of a regular file.
    File,
}

/// Auxiliary tag attached to a page at allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PageMarker {
    /// No tag.
    #[default]
    Normal,
    /// The page belongs to the user stack.
    Stack,
}

/// Operations every kind of page implements.
pub trait PageOperations {
    /// Kind of the page once it is initialized.
    fn vm_type(&self) -> VmType;

    /// Fill `kva`, the frame just attached to the page at `va`, with the
    /// page's contents.
    fn swap_in(&mut self, va: Va, kva: &mut [u8; PAGE_SIZE], swap: &SwapTable)
    -> Result<(), KernelError>;

    /// Save the contents of `kva` to the page's backing store before the
    /// frame is taken away.
    ///
    /// The translation of `va` is still installed in `page_table`, so its
    /// dirty bit can be consulted.
    fn swap_out(
        &mut self,
        va: Va,
        kva: &[u8; PAGE_SIZE],
        page_table: &mut PageTable,
        swap: &SwapTable,
    ) -> Result<(), KernelError>;

    /// Release every resource held by the page. `kva` is the page's frame if
    /// it is resident.
    fn destroy(
        &mut self,
        va: Va,
        kva: Option<&[u8; PAGE_SIZE]>,
        page_table: &mut PageTable,
        swap: &SwapTable,
    );
}

/// Backing store of a page.
pub enum Backing {
    /// Not initialized yet.
    Uninit(UninitPage),
    /// Anonymous page.
    Anon(AnonPage),
    /// File-backed page.
    File(FilePage),
}

impl Backing {
    fn initialized(self) -> Self {
        match self {
            Backing::Uninit(uninit) => uninit.into_backing(),
            backing => backing,
        }
    }

    fn ops(&mut self) -> &mut dyn PageOperations {
        match self {
            Backing::Uninit(page) => page,
            Backing::Anon(page) => page,
            Backing::File(page) => page,
        }
    }

    fn vm_type(&self) -> VmType {
        match self {
            Backing::Uninit(page) => page.vm_type(),
            Backing::Anon(page) => page.vm_type(),
            Backing::File(page) => page.vm_type(),
        }
    }
}

/// A virtual page of a process.
pub struct Page {
    va: Va,
    writable: bool,
    marker: PageMarker,
    backing: Backing,
    frame: Option<Frame>,
}

impl Page {
    /// Creates a non-resident page at `va` with the given backing.
    pub fn new(va: Va, writable: bool, marker: PageMarker, backing: Backing) -> Self {
        Self {
            va: va.page_down(),
            writable,
            marker,
            backing,
            frame: None,
        }
    }

    /// The page-aligned virtual address of the page.
    pub fn va(&self) -> Va {
        self.va
    }

    /// Whether user code may write the page.
    pub fn writable(&self) -> bool {
        self.writable
    }

    /// The tag given at allocation.
    pub fn marker(&self) -> PageMarker {
        self.marker
    }

    /// The kind of the page, as it is or as it will be once initialized.
    pub fn vm_type(&self) -> VmType {
        self.backing.vm_type()
    }

    /// The page's backing store.
    pub fn backing(&self) -> &Backing {
        &self.backing
    }

    /// Returns `true` if the page has not been touched yet.
    pub fn is_uninit(&self) -> bool {
        matches!(self.backing, Backing::Uninit(_))
    }

    /// The frame holding the page, if it is resident.
    pub fn frame(&self) -> Option<&Frame> {
        self.frame.as_ref()
    }

    /// Returns `true` if the page occupies a frame.
    pub fn is_resident(&self) -> bool {
        self.frame.is_some()
    }

    /// The file region behind a file-backed page.
    pub fn file_page(&self) -> Option<&FilePage> {
        match &self.backing {
            Backing::File(file) => Some(file),
            Backing::Uninit(uninit) => uninit.file(),
            Backing::Anon(_) => None,
        }
    }

    /// The mapping group of a file-backed page.
    pub fn mmap_group(&self) -> Option<&Arc<MmapGroup>> {
        self.file_page().map(FilePage::group)
    }

    /// Permission of the page's translation.
    pub fn permission(&self) -> Permission {
        if self.writable {
            Permission::USER | Permission::READ | Permission::WRITE
        } else {
            Permission::USER | Permission::READ
        }
    }

    pub(crate) fn attach(&mut self, frame: Frame) {
        assert!(
            self.frame.is_none(),
            "{:?} is already resident in {:?}",
            self.va,
            self.frame
        );
        self.frame = Some(frame);
    }

    pub(crate) fn detach(&mut self) -> Option<Frame> {
        self.frame.take()
    }

    /// Populate the attached frame, initializing the page on first access.
    pub(crate) fn swap_in(
        &mut self,
        memory: &mut PhysicalMemory,
        swap: &SwapTable,
    ) -> Result<(), KernelError> {
        let Some(pa) = self.frame.as_ref().map(Frame::pa) else {
            panic!("{:?} swapped in without a frame", self.va);
        };
        self.backing.ops().swap_in(self.va, memory.frame_mut(pa), swap)?;
        if self.is_uninit() {
            let backing = core::mem::replace(&mut self.backing, Backing::Anon(AnonPage::new()));
            self.backing = backing.initialized();
        }
        Ok(())
    }

    /// Save the page's contents and take its frame away.
    ///
    /// On success the translation is removed and the freed frame is returned.
    /// On failure the page stays resident.
    pub(crate) fn swap_out(
        &mut self,
        page_table: &mut PageTable,
        memory: &PhysicalMemory,
        swap: &SwapTable,
    ) -> Result<Frame, KernelError> {
        let Some(frame) = self.frame.take() else {
            panic!("{:?} swapped out while not resident", self.va);
        };
        let result = self
            .backing
            .ops()
            .swap_out(self.va, memory.frame(frame.pa()), page_table, swap);
        if let Err(e) = result {
            self.frame = Some(frame);
            return Err(e);
        }
        if let Err(e) = page_table.unmap(self.va) {
            panic!("{:?} resident but not mapped: {:?}", self.va, e);
        }
        Ok(frame)
    }

    /// Destroy the page, releasing its frame and backing resources. A
    /// resident page's frame is zeroed before it goes back to the pool.
    pub(crate) fn destroy(
        mut self,
        page_table: &mut PageTable,
        frames: &mut FrameTable,
        swap: &SwapTable,
    ) {
        let va = self.va;
        match self.frame.take() {
            Some(frame) => {
                let kva = frames.memory().frame(frame.pa());
                self.backing.ops().destroy(va, Some(kva), page_table, swap);
                if let Err(e) = page_table.unmap(va) {
                    panic!("{:?} resident but not mapped: {:?}", va, e);
                }
                frames.memory_mut().frame_mut(frame.pa()).fill(0);
                frames.release(frame);
            }
            None => self.backing.ops().destroy(va, None, page_table, swap),
        }
    }

    /// Duplicate a page that can be reproduced without copying its contents.
    ///
    /// Uninitialized pages are duplicated with their initializer, and
    /// file-backed pages become uninitialized pages of the same region of the
    /// file, reopened once per mapping group through `groups`. Anonymous
    /// pages hold contents that exist nowhere else, so `None` is returned and
    /// the caller must copy them.
    pub(crate) fn duplicate(&self, groups: &mut BTreeMap<Va, Arc<MmapGroup>>) -> Option<Page> {
        let backing = match &self.backing {
            Backing::Uninit(uninit) => Backing::Uninit(uninit.duplicate(groups)),
            Backing::File(file) => {
                Backing::Uninit(UninitPage::new(PageInitializer::File(file.duplicate(groups))))
            }
            Backing::Anon(_) => return None,
        };
        Some(Page::new(self.va, self.writable, self.marker, backing))
    }
}

impl core::fmt::Debug for Page {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Page")
            .field("va", &self.va)
            .field("writable", &self.writable)
            .field("type", &self.vm_type())
            .field("uninit", &self.is_uninit())
            .field("frame", &self.frame)
            .finish()
    }
}
