//! Physical and Virtual Memory Addressing Schemes.
//!
//! This module provides abstractions for virtual address and physical
//! address. A user process sees its own virtual address space below
//! [`KERNEL_BASE`]; every address at or above it belongs to the kernel and
//! must never be touched from user mode.
//!
//! The module defines two address types: [`Va`] for virtual address and
//! [`Pa`] for physical address. Both support the arithmetic the paging code
//! needs (adding a byte count, subtracting two addresses, masking), and
//! rounding to a page boundary.
//!
//! ## Example Usage:
//!
//! ```
//! use swapvm_kernel::addressing::{PAGE_SIZE, Va};
//!
//! let va = Va::new(0x1234_5678).unwrap();
//! assert_eq!(va.page_down().into_usize(), 0x1234_5000);
//! assert_eq!((va.page_down() + PAGE_SIZE).into_usize(), 0x1234_6000);
//! ```

/// The size of a single page in memory, in bytes.
///
/// This constant represents the size of a memory page, which is 4 KiB.
/// Both virtual pages and physical frames are exactly this large, and one
/// swap slot holds exactly one page.
pub const PAGE_SIZE: usize = 0x1000;

/// The shift amount to get the page index from a given address.
///
/// This value corresponds to the log2 of the page size.
pub const PAGE_SHIFT: usize = 12;

/// A mask for extracting the offset within a page from a given address.
pub const PAGE_MASK: usize = 0xfff;

/// The first kernel virtual address.
///
/// Every address below this is a user address. Faults on addresses at or
/// above it that originate from user mode are always illegal.
pub const KERNEL_BASE: usize = 0x80_0400_0000;

/// The top of the user stack.
///
/// The user stack grows downward from this address. The first stack page
/// occupies `USER_STACK - PAGE_SIZE .. USER_STACK`.
pub const USER_STACK: usize = 0x4748_0000;

/// Represents a physical address.
///
/// The `Pa` (Physical Address) struct is a wrapper around the `usize` type,
/// which represents the address of a frame handed out by the physical
/// frame pool.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Pa(usize);

impl Pa {
    /// The physical address `0`.
    pub const ZERO: Self = Self(0);

    /// Creates a new physical address if the address is valid.
    ///
    /// The address must be less than `0xffff_0000_0000_0000`.
    #[inline]
    pub const fn new(addr: usize) -> Option<Self> {
        if addr < 0xffff_0000_0000_0000 {
            Some(Self(addr))
        } else {
            None
        }
    }

    /// Cast the physical address into a raw `usize`.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Align down the physical address to the page boundary.
    pub const fn page_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Extracts the page offset from the physical address.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }
}

/// Represents a virtual address.
///
/// The [`Va`] (Virtual Address) struct represents an address in the virtual
/// memory space of a process or of the kernel.
///
/// This abstraction provides utility methods for validation, alignment, and
/// address manipulation, ensuring safe and consistent handling of virtual
/// addresses.
#[repr(transparent)]
#[derive(Clone, Copy, Eq, PartialEq, PartialOrd, Ord, Hash)]
pub struct Va(usize);

impl Va {
    /// The top of the user stack, [`USER_STACK`].
    pub const USER_STACK: Self = Self(USER_STACK);

    /// Creates a new virtual address if the address is canonical.
    ///
    /// # Returns
    /// - `Some(Va)`: If the address is within the valid virtual memory range.
    /// - `None`: If the address is not canonical.
    ///
    /// # Example
    /// ```
    /// use swapvm_kernel::addressing::Va;
    ///
    /// assert!(Va::new(0xFFFF_8000_1234_5678).is_some());
    /// assert!(Va::new(0xFFFF_7000_1234_5678).is_none());
    /// ```
    #[inline(always)]
    pub const fn new(addr: usize) -> Option<Self> {
        match addr & 0xffff_8000_0000_0000 {
            m if m == 0xffff_8000_0000_0000 || m == 0 => Some(Self(addr)),
            _ => None,
        }
    }

    /// Returns the raw `usize` representation of the virtual address.
    #[inline]
    pub const fn into_usize(self) -> usize {
        self.0
    }

    /// Aligns the virtual address down to the nearest page boundary.
    #[inline]
    pub const fn page_down(self) -> Self {
        Self(self.0 & !PAGE_MASK)
    }

    /// Aligns the virtual address up to the nearest page boundary.
    #[inline]
    pub const fn page_up(self) -> Self {
        Self((self.0 + PAGE_MASK) & !PAGE_MASK)
    }

    /// Extracts the offset within the memory page from the virtual address.
    #[inline]
    pub const fn offset(self) -> usize {
        self.0 & PAGE_MASK
    }

    /// Returns `true` if the address is page-aligned.
    #[inline]
    pub const fn is_page_aligned(self) -> bool {
        self.offset() == 0
    }

    /// Returns `true` if the address belongs to the kernel half of the address
    /// space.
    #[inline]
    pub const fn is_kernel(self) -> bool {
        self.0 >= KERNEL_BASE
    }

    /// Returns `true` if the address is a (non-null) user address.
    #[inline]
    pub const fn is_user(self) -> bool {
        self.0 != 0 && self.0 < KERNEL_BASE
    }

    /// Adds `count` bytes, returning `None` on overflow.
    #[inline]
    pub const fn checked_add(self, count: usize) -> Option<Self> {
        match self.0.checked_add(count) {
            Some(v) => Self::new(v),
            None => None,
        }
    }

    /// Iterates over the page-aligned addresses of every page that `len`
    /// bytes starting at `self` touch.
    pub fn pages(self, len: usize) -> impl Iterator<Item = Va> {
        let start = self.page_down().0;
        let end = if len == 0 {
            start
        } else {
            (self.0 + len + PAGE_MASK) & !PAGE_MASK
        };
        (start..end).step_by(PAGE_SIZE).map(Va)
    }
}

macro_rules! impl_arith {
    ($t: ty) => {
        impl core::ops::Add<usize> for $t {
            type Output = Self;

            fn add(self, other: usize) -> Self::Output {
                Self(self.0 + other)
            }
        }
        impl core::ops::AddAssign<usize> for $t {
            fn add_assign(&mut self, other: usize) {
                self.0 = self.0 + other
            }
        }
        impl core::ops::Sub<usize> for $t {
            type Output = Self;

            fn sub(self, other: usize) -> Self::Output {
                Self(self.0 - other)
            }
        }
        impl core::ops::Sub<Self> for $t {
            type Output = usize;

            fn sub(self, other: Self) -> Self::Output {
                self.0 - other.0
            }
        }
        impl core::ops::SubAssign<usize> for $t {
            fn sub_assign(&mut self, other: usize) {
                self.0 = self.0 - other
            }
        }
        impl core::ops::BitAnd<usize> for $t {
            type Output = Self;

            fn bitand(self, other: usize) -> Self {
                Self(self.0 & other)
            }
        }
    };
}

impl_arith!(Va);
impl_arith!(Pa);

impl core::fmt::Debug for Va {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Va(0x{:x})", self.0)
    }
}
impl core::fmt::Display for Va {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Va(0x{:x})", self.0)
    }
}
impl core::fmt::Debug for Pa {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Pa(0x{:x})", self.0)
    }
}
impl core::fmt::Display for Pa {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "Pa(0x{:x})", self.0)
    }
}
