//! Block devices.
//!
//! A block device is an array of fixed-size sectors. The swap device is the
//! only block device the paging core talks to: one swap slot spans
//! `PAGE_SIZE / SECTOR_SIZE` consecutive sectors.

use crate::{KernelError, sync::SpinLock};
use alloc::{sync::Arc, vec, vec::Vec};

/// Size of a sector in bytes.
pub const SECTOR_SIZE: usize = 512;

/// A sector number on a block device.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, Eq, PartialEq, Ord, PartialOrd)]
pub struct Sector(pub usize);

impl Sector {
    /// Get offset that represented by the sector.
    #[inline]
    pub fn into_offset(self) -> usize {
        self.0 * SECTOR_SIZE
    }

    /// Cast into usize.
    #[inline]
    pub fn into_usize(self) -> usize {
        self.0
    }
}

impl core::ops::Add<usize> for Sector {
    type Output = Self;

    fn add(self, rhs: usize) -> Self {
        Self(self.0 + rhs)
    }
}

/// A device that reads and writes whole sectors.
pub trait BlockDevice
where
    Self: Send + Sync,
{
    /// Number of sectors on the device.
    fn sector_count(&self) -> usize;

    /// Read 512 bytes from disk starting from sector.
    fn read_sector(&self, sector: Sector, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), KernelError>;

    /// Write 512 bytes to disk starting from sector.
    fn write_sector(&self, sector: Sector, buf: &[u8; SECTOR_SIZE]) -> Result<(), KernelError>;
}

/// A block device backed by memory.
///
/// Cloning a [`MemoryDisk`] yields another handle to the same sectors, so a
/// test can hand one handle to the kernel and keep one to inspect the device.
#[derive(Clone)]
pub struct MemoryDisk {
    sectors: Arc<SpinLock<Vec<[u8; SECTOR_SIZE]>>>,
}

impl MemoryDisk {
    /// Create a zero-filled disk of `sector_count` sectors.
    pub fn new(sector_count: usize) -> Self {
        Self {
            sectors: Arc::new(SpinLock::new(vec![[0; SECTOR_SIZE]; sector_count])),
        }
    }
}

impl BlockDevice for MemoryDisk {
    fn sector_count(&self) -> usize {
        self.sectors.lock().len()
    }

    fn read_sector(&self, sector: Sector, buf: &mut [u8; SECTOR_SIZE]) -> Result<(), KernelError> {
        let sectors = self.sectors.lock();
        let src = sectors.get(sector.into_usize()).ok_or(KernelError::IOError)?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_sector(&self, sector: Sector, buf: &[u8; SECTOR_SIZE]) -> Result<(), KernelError> {
        let mut sectors = self.sectors.lock();
        let dst = sectors
            .get_mut(sector.into_usize())
            .ok_or(KernelError::IOError)?;
        dst.copy_from_slice(buf);
        Ok(())
    }
}
