//! # Anonymous pages
//!
//! An anonymous page has no file behind it: its contents live only in memory
//! until the frame manager evicts it, at which point they are written to the
//! swap device. The swap device is carved into *slots*, each exactly one page
//! (`PAGE_SIZE / SECTOR_SIZE` consecutive sectors). Which slots are occupied is
//! tracked by the [`SwapBitmap`], shared by every process and protected by a
//! [`SpinLock`].
//!
//! An [`AnonPage`] remembers the slot that holds its image while it is swapped
//! out. Swapping the page back in reads the slot and frees it, so an
//! anonymous page occupies either a frame or a slot, never both.

use crate::{
    VmConfig,
    page::{PageOperations, VmType},
};
use alloc::{boxed::Box, vec, vec::Vec};
use swapvm_kernel::{
    KernelError,
    addressing::{PAGE_SIZE, Va},
    dev::{BlockDevice, SECTOR_SIZE, Sector},
    mm::page_table::PageTable,
    sync::SpinLock,
};

/// Allocation state of the swap slots.
///
/// Each bit corresponds to one slot. A bit value of `1` indicates that the
/// slot holds the image of a swapped-out page, while `0` means the slot is
/// free.
pub struct SwapBitmap {
    bits: Vec<u64>,
    len: usize,
}

impl SwapBitmap {
    /// Creates a bitmap of `len` free slots.
    pub fn new(len: usize) -> Self {
        Self {
            bits: vec![0; len.div_ceil(64)],
            len,
        }
    }

    /// Number of slots tracked by the bitmap.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns `true` if the bitmap tracks no slot at all.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Checks whether the slot at `pos` is occupied.
    pub fn is_allocated(&self, pos: usize) -> bool {
        let (pos, off) = (pos / 64, pos % 64);
        self.bits.get(pos).is_some_and(|word| word & (1 << off) != 0)
    }

    /// Finds the first free slot, marks it occupied and returns it.
    ///
    /// Returns `None` if every slot is occupied.
    pub fn scan_and_flip(&mut self) -> Option<usize> {
        let (idx, word) = self
            .bits
            .iter_mut()
            .enumerate()
            .find(|(_, word)| **word != u64::MAX)?;
        let off = word.trailing_ones() as usize;
        let pos = idx * 64 + off;
        if pos >= self.len {
            return None;
        }
        *word |= 1 << off;
        Some(pos)
    }

    /// Marks the slot at `pos` free.
    ///
    /// # Returns
    /// - `true` if the slot was occupied.
    /// - `false` if the slot was already free (no change).
    pub fn deallocate(&mut self, pos: usize) -> bool {
        let (pos, off) = (pos / 64, pos % 64);
        match self.bits.get_mut(pos) {
            Some(word) if *word & (1 << off) != 0 => {
                *word &= !(1 << off);
                true
            }
            _ => false,
        }
    }

    /// Number of occupied slots.
    pub fn count_allocated(&self) -> usize {
        self.bits.iter().map(|word| word.count_ones() as usize).sum()
    }
}

/// The swap device and the occupancy of its slots.
pub struct SwapTable {
    disk: Box<dyn BlockDevice>,
    slots: SpinLock<SwapBitmap>,
    first_sector: Sector,
    sectors_per_page: usize,
}

impl SwapTable {
    /// Carves `disk` into swap slots as described by `config`.
    pub fn new(disk: impl BlockDevice + 'static, config: &VmConfig) -> Self {
        let slots = config.swap_slots(disk.sector_count());
        info!(
            "swap: {} slots on a device of {} sectors",
            slots,
            disk.sector_count()
        );
        Self {
            disk: Box::new(disk),
            slots: SpinLock::new(SwapBitmap::new(slots)),
            first_sector: Sector(config.swap_reserved_sectors),
            sectors_per_page: config.sectors_per_page(),
        }
    }

    /// Total number of swap slots.
    pub fn slot_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Number of slots currently holding a page image.
    pub fn used_slots(&self) -> usize {
        self.slots.lock().count_allocated()
    }

    /// Returns `true` if `slot` holds a page image.
    pub fn is_occupied(&self, slot: usize) -> bool {
        self.slots.lock().is_allocated(slot)
    }

    fn sectors(&self, slot: usize) -> impl Iterator<Item = Sector> {
        let base = self.first_sector + slot * self.sectors_per_page;
        (0..self.sectors_per_page).map(move |i| base + i)
    }

    /// Writes `kva` into a free slot and returns the slot.
    ///
    /// # Returns
    /// - `Ok(slot)` on success.
    /// - `Err(KernelError::NoSpace)` if every slot is occupied.
    /// - `Err(KernelError::IOError)` if the device rejected the write. The slot
    ///   is released again in that case.
    pub fn swap_out(&self, kva: &[u8; PAGE_SIZE]) -> Result<usize, KernelError> {
        // Hold the lock only for the scan; the write below may block.
        let slot = self
            .slots
            .lock()
            .scan_and_flip()
            .ok_or(KernelError::NoSpace)?;
        let result = self
            .sectors(slot)
            .zip(kva.chunks_exact(SECTOR_SIZE))
            .try_for_each(|(sector, chunk)| {
                let mut buf = [0; SECTOR_SIZE];
                buf.copy_from_slice(chunk);
                self.disk.write_sector(sector, &buf)
            });
        match result {
            Ok(()) => {
                debug!("swap: slot {} occupied", slot);
                Ok(slot)
            }
            Err(e) => {
                self.release(slot);
                Err(e)
            }
        }
    }

    /// Reads the image in `slot` into `kva` and frees the slot.
    ///
    /// # Panics
    /// Panics if `slot` is not occupied.
    pub fn swap_in(&self, slot: usize, kva: &mut [u8; PAGE_SIZE]) -> Result<(), KernelError> {
        assert!(
            self.is_occupied(slot),
            "swap slot {} read while it holds no page",
            slot
        );
        for (sector, chunk) in self.sectors(slot).zip(kva.chunks_exact_mut(SECTOR_SIZE)) {
            let mut buf = [0; SECTOR_SIZE];
            self.disk.read_sector(sector, &mut buf)?;
            chunk.copy_from_slice(&buf);
        }
        self.release(slot);
        Ok(())
    }

    /// Frees `slot` without reading it.
    pub fn release(&self, slot: usize) {
        let freed = self.slots.lock().deallocate(slot);
        debug_assert!(freed, "swap slot {} released twice", slot);
        debug!("swap: slot {} freed", slot);
    }
}

/// Payload of an anonymous page.
#[derive(Debug, Default)]
pub struct AnonPage {
    slot: Option<usize>,
}

impl AnonPage {
    /// A resident anonymous page that has never been swapped out.
    pub fn new() -> Self {
        Self::default()
    }

    /// The swap slot holding the page's image, if it is swapped out.
    pub fn slot(&self) -> Option<usize> {
        self.slot
    }
}

impl PageOperations for AnonPage {
    fn vm_type(&self) -> VmType {
        VmType::Anon
    }

    fn swap_in(
        &mut self,
        va: Va,
        kva: &mut [u8; PAGE_SIZE],
        swap: &SwapTable,
    ) -> Result<(), KernelError> {
        let Some(slot) = self.slot else {
            panic!("{:?}: anonymous page swapped in without a swap slot", va);
        };
        swap.swap_in(slot, kva)?;
        self.slot = None;
        Ok(())
    }

    fn swap_out(
        &mut self,
        va: Va,
        kva: &[u8; PAGE_SIZE],
        _page_table: &mut PageTable,
        swap: &SwapTable,
    ) -> Result<(), KernelError> {
        let slot = swap.swap_out(kva)?;
        debug!("{:?}: swapped out to slot {}", va, slot);
        self.slot = Some(slot);
        Ok(())
    }

    fn destroy(
        &mut self,
        _va: Va,
        _kva: Option<&[u8; PAGE_SIZE]>,
        _page_table: &mut PageTable,
        swap: &SwapTable,
    ) {
        if let Some(slot) = self.slot.take() {
            swap.release(slot);
        }
    }
}
