//! # Frame management
//!
//! User pages are loaned physical frames from a fixed-size pool. When the
//! pool runs dry, a resident page is chosen as a victim, its contents are
//! saved to its backing store, and its frame is handed to the new page.
//!
//! The [`FrameTable`] tracks, for every frame on loan, the page that owns it
//! (a `(Pid, Va)` back-reference), and keeps the resident frames on a victim
//! list in the order they were claimed.
//!
//! ## Victim selection
//!
//! Victims are chosen with the clock (second-chance) algorithm. Starting from
//! the front of the victim list, a frame whose page was accessed since the
//! last sweep gets its accessed bit cleared and is skipped; the first frame
//! whose page was not accessed is the victim. The sweep wraps around at the
//! end of the list, and terminates within two passes as the first pass clears
//! every bit it looks at. The accessed bit is always read from the page table
//! of the process that owns the frame.

use crate::{Pid, Vm, mm_struct::MmStruct};
use alloc::collections::{BTreeMap, VecDeque};
use swapvm_kernel::{
    KernelError,
    addressing::{Pa, Va},
    mm::PhysicalMemory,
};

/// A physical frame on loan to a page.
///
/// A [`Frame`] cannot be cloned: whoever holds it owns the frame, and giving
/// it back to the [`FrameTable`] consumes it.
#[derive(Debug, PartialEq, Eq)]
pub struct Frame {
    pa: Pa,
}

impl Frame {
    /// Physical address of the frame.
    pub fn pa(&self) -> Pa {
        self.pa
    }
}

/// Back-reference from a frame to the page occupying it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameOwner {
    /// Process owning the page.
    pub pid: Pid,
    /// Address of the page.
    pub va: Va,
}

/// The physical frame pool together with the owner of every frame on loan.
pub struct FrameTable {
    memory: PhysicalMemory,
    owners: BTreeMap<Pa, FrameOwner>,
    victims: VecDeque<Pa>,
}

impl FrameTable {
    /// Manages the frames of `memory`.
    pub fn new(memory: PhysicalMemory) -> Self {
        Self {
            memory,
            owners: BTreeMap::new(),
            victims: VecDeque::new(),
        }
    }

    /// The frame pool.
    pub fn memory(&self) -> &PhysicalMemory {
        &self.memory
    }

    /// The frame pool, mutably.
    pub fn memory_mut(&mut self) -> &mut PhysicalMemory {
        &mut self.memory
    }

    /// Takes a free frame from the pool, without evicting.
    pub fn acquire(&mut self) -> Option<Frame> {
        self.memory.acquire().map(|pa| Frame { pa })
    }

    /// Record that `owner` now occupies `frame`, and append the frame to the
    /// victim list.
    ///
    /// # Panics
    /// Panics if the frame already has an owner.
    pub fn link(&mut self, frame: &Frame, owner: FrameOwner) {
        if let Some(prev) = self.owners.insert(frame.pa, owner) {
            panic!(
                "{:?} handed to {:?} while owned by {:?}",
                frame.pa, owner, prev
            );
        }
        debug_assert!(!self.victims.contains(&frame.pa));
        self.victims.push_back(frame.pa);
    }

    /// Forget the owner of `frame`, dropping it from the victim list.
    pub fn unlink(&mut self, frame: &Frame) -> Option<FrameOwner> {
        self.victims.retain(|pa| *pa != frame.pa);
        self.owners.remove(&frame.pa)
    }

    /// Gives `frame` back to the pool.
    pub fn release(&mut self, frame: Frame) {
        self.unlink(&frame);
        self.memory.release(frame.pa);
    }

    /// The page occupying the frame at `pa`.
    pub fn owner(&self, pa: Pa) -> Option<FrameOwner> {
        self.owners.get(&pa).copied()
    }

    /// Number of frames on loan.
    pub fn resident(&self) -> usize {
        self.owners.len()
    }

    /// Frames in victim list order.
    pub fn victims(&self) -> impl Iterator<Item = (Pa, FrameOwner)> + '_ {
        self.victims.iter().map(|pa| (*pa, self.owners[pa]))
    }

    /// Choose a victim with the clock algorithm and take it off the victim
    /// list. Its owner is kept until the frame is unlinked.
    ///
    /// `test_and_clear_accessed` reports whether the owner's page was accessed
    /// and clears the bit.
    pub fn select_victim(
        &mut self,
        mut test_and_clear_accessed: impl FnMut(FrameOwner) -> bool,
    ) -> Option<(Pa, FrameOwner)> {
        let len = self.victims.len();
        let idx = (0..len)
            .cycle()
            .take(2 * len)
            .find(|idx| !test_and_clear_accessed(self.owners[&self.victims[*idx]]))
            .unwrap_or(0);
        let pa = self.victims.remove(idx)?;
        Some((pa, self.owners[&pa]))
    }

    fn requeue(&mut self, pa: Pa) {
        self.victims.push_back(pa);
    }
}

impl Vm {
    /// Get a frame, evicting a resident page if the pool is exhausted.
    ///
    /// # Returns
    /// - `Ok(Frame)`: a frame no page occupies.
    /// - `Err(KernelError::NoMemory)`: no page can be evicted.
    /// - `Err(e)`: the victim could not be saved to its backing store.
    pub(crate) fn get_frame(&mut self) -> Result<Frame, KernelError> {
        match self.frames.acquire() {
            Some(frame) => Ok(frame),
            None => self.evict_frame(),
        }
    }

    /// Evict a victim and return its frame.
    ///
    /// The evicted page stays in its supplemental page table, so the next
    /// access to it faults and claims it again.
    pub(crate) fn evict_frame(&mut self) -> Result<Frame, KernelError> {
        let Vm {
            frames,
            swap,
            spaces,
            ..
        } = self;
        let (pa, owner) = frames
            .select_victim(|owner| match spaces.get_mut(&owner.pid) {
                Some(mm) if mm.page_table.is_accessed(owner.va) => {
                    mm.page_table.set_accessed(owner.va, false);
                    true
                }
                _ => false,
            })
            .ok_or(KernelError::NoMemory)?;
        let Some(MmStruct {
            page_table, spt, ..
        }) = spaces.get_mut(&owner.pid)
        else {
            panic!("{:?} owned by {:?}, which has exited", pa, owner);
        };
        let Some(page) = spt.find_mut(owner.va) else {
            panic!("{:?} owned by {:?}, which has no such page", pa, owner);
        };
        match page.swap_out(page_table, &frames.memory, swap) {
            Ok(frame) => {
                debug_assert_eq!(frame.pa, pa);
                let prev = frames.unlink(&frame);
                debug_assert_eq!(prev, Some(owner));
                debug!("evict: {:?} of {:?} from {:?}", owner.va, owner.pid, pa);
                Ok(frame)
            }
            Err(e) => {
                warn!("evict: {:?} of {:?} failed: {:?}", owner.va, owner.pid, e);
                frames.requeue(pa);
                Err(e)
            }
        }
    }
}
