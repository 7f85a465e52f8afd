//! # swapvm: demand-paged virtual memory
//!
//! This crate implements the virtual memory subsystem of a small kernel:
//! user processes see a private address space whose pages are brought into
//! physical memory on demand, and evicted to backing store when physical
//! memory runs out.
//!
//! ## Overview
//!
//! - [`page`]: the [`Page`], one virtual page of a process, and the
//!   [`PageOperations`] every kind of page implements.
//! - [`uninit`], [`anon`], [`file`]: the kinds of pages. A page is
//!   uninitialized until first touched, then becomes an anonymous page backed
//!   by the swap device, or a page backed by a region of a file.
//! - [`spt`]: the supplemental page table, which describes every page of a
//!   process whether resident or not.
//! - [`frame`]: the frame table and the clock eviction policy.
//! - [`fault`]: the page fault handler, including stack growth.
//! - [`loader`]: lazy loading of program segments and the initial stack.
//! - [`uaccess`], [`syscall`]: user memory access and the `mmap`/`munmap`
//!   system calls.
//!
//! The state shared by every process (the frame table, the victim list and
//! the swap slots) is owned by a [`Vm`], together with the [`MmStruct`] of
//! every process. Nothing is global: several [`Vm`]s can live side by side.
//!
//! ## Example
//!
//! ```
//! use swapvm::{Vm, VmConfig};
//! use swapvm_kernel::{addressing::Va, dev::MemoryDisk, mm::PhysicalMemory};
//!
//! let mut vm = Vm::new(PhysicalMemory::new(1), MemoryDisk::new(64), VmConfig::default());
//! let pid = vm.create_mm();
//! let (a, b) = (Va::new(0x1000_0000).unwrap(), Va::new(0x1000_1000).unwrap());
//! vm.alloc_page(pid, a, true).unwrap();
//! vm.alloc_page(pid, b, true).unwrap();
//!
//! vm.write_user(pid, a, b"hello").unwrap();
//! // Only one frame: touching `b` evicts `a` to swap.
//! vm.write_user(pid, b, b"world").unwrap();
//! assert_eq!(vm.used_swap_slots(), 1);
//!
//! let mut buf = [0; 5];
//! vm.read_user(pid, a, &mut buf).unwrap();
//! assert_eq!(&buf, b"hello");
//! vm.exit_mm(pid);
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(rustdoc::broken_intra_doc_links)]

extern crate alloc;
#[macro_use]
extern crate log;

pub mod anon;
pub mod config;
pub mod fault;
pub mod file;
pub mod frame;
pub mod loader;
pub mod mm_struct;
pub mod page;
pub mod spt;
pub mod syscall;
pub mod uaccess;
pub mod uninit;

use alloc::{boxed::Box, collections::BTreeMap, vec::Vec};
use anon::SwapTable;
pub use config::VmConfig;
pub use fault::PageFaultReason;
use frame::{FrameOwner, FrameTable};
pub use mm_struct::MmStruct;
use page::Backing;
pub use page::{Page, PageMarker, PageOperations, VmType};
use swapvm_kernel::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    dev::BlockDevice,
    mm::PhysicalMemory,
};
pub use uninit::PageInitializer;
use uninit::UninitPage;

/// Identifier of a process, i.e. of an address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub usize);

/// The virtual memory subsystem.
pub struct Vm {
    config: VmConfig,
    frames: FrameTable,
    swap: SwapTable,
    spaces: BTreeMap<Pid, MmStruct>,
    next_pid: usize,
}

impl Vm {
    /// Starts the subsystem on top of the frame pool `memory` and the swap
    /// device `swap_disk`.
    pub fn new(
        memory: PhysicalMemory,
        swap_disk: impl BlockDevice + 'static,
        config: VmConfig,
    ) -> Self {
        info!(
            "vm: {} frames, stack limit {:#x}",
            memory.capacity(),
            config.stack_limit
        );
        Self {
            swap: SwapTable::new(swap_disk, &config),
            frames: FrameTable::new(memory),
            spaces: BTreeMap::new(),
            next_pid: 1,
            config,
        }
    }

    /// The configuration the subsystem was started with.
    pub fn config(&self) -> &VmConfig {
        &self.config
    }

    /// Creates an empty address space and returns its identifier.
    pub fn create_mm(&mut self) -> Pid {
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        self.spaces.insert(pid, MmStruct::new());
        info!("{:?}: address space created", pid);
        pid
    }

    /// The memory state of `pid`.
    pub fn mm(&self, pid: Pid) -> Result<&MmStruct, KernelError> {
        self.spaces.get(&pid).ok_or(KernelError::NoSuchEntry)
    }

    /// The memory state of `pid`, mutably.
    pub fn mm_mut(&mut self, pid: Pid) -> Result<&mut MmStruct, KernelError> {
        self.spaces.get_mut(&pid).ok_or(KernelError::NoSuchEntry)
    }

    /// Find the page of `pid` containing `va`.
    pub fn find_page(&self, pid: Pid, va: Va) -> Option<&Page> {
        self.spaces.get(&pid)?.spt.find(va)
    }

    /// Creates an address space holding a copy of the one of `parent`.
    ///
    /// Pages that were never touched are duplicated with their initializer,
    /// and file-backed pages are mapped again from the same files, so the
    /// child loads them on its own. Anonymous pages are copied right away;
    /// the child owns a private copy of their contents.
    ///
    /// If any page cannot be duplicated, the partial copy is torn down and
    /// the error is returned.
    pub fn fork_mm(&mut self, parent: Pid) -> Result<Pid, KernelError> {
        self.mm(parent)?;
        let child = self.create_mm();
        match self.copy_spt(child, parent) {
            Ok(()) => {
                self.mm_mut(child)?.user_rsp = self.mm(parent)?.user_rsp;
                info!("{:?}: forked from {:?}", child, parent);
                Ok(child)
            }
            Err(e) => {
                warn!("{:?}: fork from {:?} failed: {:?}", child, parent, e);
                self.exit_mm(child);
                Err(e)
            }
        }
    }

    fn copy_spt(&mut self, dst: Pid, src: Pid) -> Result<(), KernelError> {
        let pages: Vec<Va> = self.mm(src)?.spt.iter().map(Page::va).collect();
        let mut groups = BTreeMap::new();
        for va in pages {
            let page = self
                .find_page(src, va)
                .ok_or(KernelError::BadAddress)?;
            match page.duplicate(&mut groups) {
                Some(page) => self.mm_mut(dst)?.spt.insert(page)?,
                None => self.copy_anon_page(dst, src, va)?,
            }
        }
        Ok(())
    }

    fn copy_anon_page(&mut self, dst: Pid, src: Pid, va: Va) -> Result<(), KernelError> {
        // The parent's page may sit in swap; bring it in to read it.
        self.claim_page(src, va)?;
        let (writable, marker, pa) = {
            let page = self.find_page(src, va).ok_or(KernelError::BadAddress)?;
            let pa = page.frame().map(|frame| frame.pa());
            (page.writable(), page.marker(), pa.ok_or(KernelError::BadAddress)?)
        };
        let contents: Box<[u8; PAGE_SIZE]> = Box::new(*self.frames.memory().frame(pa));

        self.alloc_page_with_initializer(dst, va, writable, marker, PageInitializer::zeroed())?;
        self.claim_page(dst, va)?;
        let pa = self
            .find_page(dst, va)
            .and_then(Page::frame)
            .map(|frame| frame.pa())
            .ok_or(KernelError::BadAddress)?;
        self.frames.memory_mut().frame_mut(pa).copy_from_slice(&contents[..]);
        Ok(())
    }

    /// Destroys the address space of `pid`.
    ///
    /// Every page is destroyed: dirty file-backed pages are written back,
    /// frames return to the pool, and swap slots are freed.
    pub fn exit_mm(&mut self, pid: Pid) {
        let Some(mut mm) = self.spaces.remove(&pid) else {
            return;
        };
        let count = mm.spt.len();
        let MmStruct {
            page_table, spt, ..
        } = &mut mm;
        for page in spt.drain() {
            page.destroy(page_table, &mut self.frames, &self.swap);
        }
        debug_assert!(page_table.is_empty());
        info!("{:?}: address space destroyed ({} pages)", pid, count);
    }

    /// Registers a zero-filled anonymous page at `va` for `pid`.
    pub fn alloc_page(&mut self, pid: Pid, va: Va, writable: bool) -> Result<(), KernelError> {
        self.alloc_page_with_initializer(
            pid,
            va,
            writable,
            PageMarker::Normal,
            PageInitializer::zeroed(),
        )
    }

    /// Registers an uninitialized page at `va` for `pid`, initialized by
    /// `init` on first access.
    ///
    /// # Returns
    /// - `Ok(())` if the page was registered.
    /// - `Err(KernelError::FileExist)` if a page already exists at `va`.
    /// - `Err(KernelError::InvalidAccess)` if `va` is not a user address.
    pub fn alloc_page_with_initializer(
        &mut self,
        pid: Pid,
        va: Va,
        writable: bool,
        marker: PageMarker,
        init: PageInitializer,
    ) -> Result<(), KernelError> {
        if !va.is_user() {
            return Err(KernelError::InvalidAccess);
        }
        let page = Page::new(va, writable, marker, Backing::Uninit(UninitPage::new(init)));
        self.mm_mut(pid)?.spt.insert(page)
    }

    /// Makes the page of `pid` containing `va` resident.
    ///
    /// A frame is taken from the pool, evicting another page if needed, the
    /// translation is installed, and the page's contents are brought in. A
    /// page that is already resident is left alone.
    pub fn claim_page(&mut self, pid: Pid, va: Va) -> Result<(), KernelError> {
        let va = va.page_down();
        match self.find_page(pid, va) {
            Some(page) if page.is_resident() => return Ok(()),
            Some(_) => (),
            None => return Err(KernelError::BadAddress),
        }

        let frame = self.get_frame()?;
        let Vm {
            frames,
            swap,
            spaces,
            ..
        } = self;
        let Some(MmStruct {
            page_table, spt, ..
        }) = spaces.get_mut(&pid)
        else {
            frames.release(frame);
            return Err(KernelError::NoSuchEntry);
        };
        let Some(page) = spt.find_mut(va) else {
            frames.release(frame);
            return Err(KernelError::BadAddress);
        };
        if let Err(e) = page_table.map(va, frame.pa(), page.permission()) {
            frames.release(frame);
            return Err(e.into());
        }
        frames.link(&frame, FrameOwner { pid, va });
        let pa = frame.pa();
        page.attach(frame);
        if let Err(e) = page.swap_in(frames.memory_mut(), swap) {
            warn!("{:?}: failed to bring {:?} in: {:?}", pid, va, e);
            let _ = page_table.unmap(va);
            if let Some(frame) = page.detach() {
                frames.release(frame);
            }
            return Err(e);
        }
        debug!("{:?}: claimed {:?} in {:?}", pid, va, pa);
        Ok(())
    }

    /// The kind of the page of `pid` containing `va` and its marker. An
    /// uninitialized page reports the kind it will become.
    pub fn page_get_type(&self, pid: Pid, va: Va) -> Option<(VmType, PageMarker)> {
        self.find_page(pid, va)
            .map(|page| (page.vm_type(), page.marker()))
    }

    /// Number of frames left in the pool.
    pub fn free_frames(&self) -> usize {
        self.frames.memory().free_count()
    }

    /// Number of resident pages across every process.
    pub fn resident_pages(&self) -> usize {
        self.frames.resident()
    }

    /// Number of swap slots holding a page.
    pub fn used_swap_slots(&self) -> usize {
        self.swap.used_slots()
    }

    /// The frame table.
    pub fn frames(&self) -> &FrameTable {
        &self.frames
    }

    /// The swap table.
    pub fn swap(&self) -> &SwapTable {
        &self.swap
    }
}
