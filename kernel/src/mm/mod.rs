//! Memory Management.
//!
//! This module implements the pool of physical frames that user pages are
//! loaned. The core abstraction is the [`PhysicalMemory`], which hands out
//! one frame at a time as a physical address ([`Pa`]) and takes it back on
//! release. Frame contents are reached through the pool with
//! [`PhysicalMemory::frame`] and [`PhysicalMemory::frame_mut`].
//!
//! The pool is small and fixed-size: running out of frames is
//! the normal trigger for eviction, not an error.
pub mod page_table;

use crate::addressing::{PAGE_SHIFT, PAGE_SIZE, Pa};
use alloc::{boxed::Box, vec::Vec};

/// Physical address of the first frame in the pool.
pub const USER_POOL_BASE: usize = 0x20_0000;

/// A fixed-size pool of physical frames.
pub struct PhysicalMemory {
    frames: Vec<Box<[u8; PAGE_SIZE]>>,
    in_use: Vec<bool>,
    free: Vec<usize>,
}

impl PhysicalMemory {
    /// Creates a pool of `nframes` frames.
    pub fn new(nframes: usize) -> Self {
        Self {
            frames: (0..nframes).map(|_| Box::new([0; PAGE_SIZE])).collect(),
            in_use: alloc::vec![false; nframes],
            // Hand out the lowest frame first.
            free: (0..nframes).rev().collect(),
        }
    }

    fn index_of(&self, pa: Pa) -> usize {
        let idx = pa
            .into_usize()
            .checked_sub(USER_POOL_BASE)
            .map(|off| off >> PAGE_SHIFT)
            .filter(|idx| *idx < self.frames.len() && pa.offset() == 0);
        match idx {
            Some(idx) => idx,
            None => panic!("{:?} does not belong to the frame pool", pa),
        }
    }

    /// Takes one frame out of the pool.
    ///
    /// # Returns
    /// - `Some(Pa)`: the frame's physical address. Its contents are whatever
    ///   the previous user left.
    /// - `None`: the pool is exhausted.
    pub fn acquire(&mut self) -> Option<Pa> {
        let idx = self.free.pop()?;
        self.in_use[idx] = true;
        Pa::new(USER_POOL_BASE + (idx << PAGE_SHIFT))
    }

    /// Returns a frame to the pool.
    ///
    /// # Panics
    /// Panics if the frame is not currently acquired.
    pub fn release(&mut self, pa: Pa) {
        let idx = self.index_of(pa);
        assert!(self.in_use[idx], "double free of {:?}", pa);
        self.in_use[idx] = false;
        self.free.push(idx);
    }

    /// Get a reference to the contents of the frame at `pa`.
    pub fn frame(&self, pa: Pa) -> &[u8; PAGE_SIZE] {
        let idx = self.index_of(pa);
        &self.frames[idx]
    }

    /// Get a mutable reference to the contents of the frame at `pa`.
    pub fn frame_mut(&mut self, pa: Pa) -> &mut [u8; PAGE_SIZE] {
        let idx = self.index_of(pa);
        &mut self.frames[idx]
    }

    /// Number of frames that can still be acquired.
    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Total number of frames in the pool.
    pub fn capacity(&self) -> usize {
        self.frames.len()
    }
}
