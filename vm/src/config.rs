//! Tunables of the virtual memory subsystem.

use swapvm_kernel::{addressing::PAGE_SIZE, dev::SECTOR_SIZE};

/// Configuration of a [`Vm`].
///
/// The defaults reproduce the classic layout: a user stack that may grow up
/// to 1 MiB below [`USER_STACK`], pushes that probe up to 32 bytes below
/// `rsp`, and a swap device whose every sector is available for swap slots.
///
/// ```
/// use swapvm::VmConfig;
///
/// let config = VmConfig::default()
///     .stack_limit(2 << 20)
///     .swap_reserved_sectors(16);
/// assert_eq!(config.swap_slots(8 + 16 + 64), 9);
/// ```
///
/// [`Vm`]: crate::Vm
/// [`USER_STACK`]: swapvm_kernel::addressing::USER_STACK
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VmConfig {
    pub(crate) stack_limit: usize,
    pub(crate) stack_slack: usize,
    pub(crate) swap_reserved_sectors: usize,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            stack_limit: 1 << 20,
            stack_slack: 32,
            swap_reserved_sectors: 0,
        }
    }
}

impl VmConfig {
    /// Maximum size of the user stack, in bytes.
    pub fn stack_limit(mut self, bytes: usize) -> Self {
        self.stack_limit = bytes;
        self
    }

    /// How far below `rsp` a write may land and still grow the stack.
    pub fn stack_slack(mut self, bytes: usize) -> Self {
        self.stack_slack = bytes;
        self
    }

    /// Number of leading sectors of the swap device that hold boot or
    /// metadata blocks and must not be used for swap slots.
    pub fn swap_reserved_sectors(mut self, sectors: usize) -> Self {
        self.swap_reserved_sectors = sectors;
        self
    }

    /// Number of sectors that hold one page.
    pub const fn sectors_per_page(&self) -> usize {
        PAGE_SIZE / SECTOR_SIZE
    }

    /// Number of swap slots on a device of `sector_count` sectors.
    pub fn swap_slots(&self, sector_count: usize) -> usize {
        sector_count.saturating_sub(self.swap_reserved_sectors) / self.sectors_per_page()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slot_count_excludes_reserved_sectors() {
        let config = VmConfig::default();
        assert_eq!(config.sectors_per_page(), 8);
        assert_eq!(config.swap_slots(64), 8);
        assert_eq!(config.swap_slots(67), 8);
        let config = config.swap_reserved_sectors(10);
        assert_eq!(config.swap_slots(64), 6);
        assert_eq!(config.swap_slots(4), 0);
    }
}
