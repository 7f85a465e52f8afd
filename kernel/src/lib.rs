//! # swapvm kernel primitives
//!
//! This crate provides the kernel services that the virtual-memory core is
//! built upon. Each module corresponds to one collaborator of the paging
//! code:
//!
//! - [`addressing`]: virtual and physical addresses, page geometry, and the
//!   user/kernel split.
//! - [`mm`]: the pool of physical frames, and the [`PageTable`] that plays the
//!   role of the MMU.
//! - [`fs`]: regular files and open file handles, used by file-backed pages.
//! - [`dev`]: sector-addressed block devices, used as the swap device.
//! - [`sync`]: the spinlock that protects state shared between processes.
//! - [`task`]: the page-fault error code reported by the CPU.
//!
//! All of them run on the host as well as inside a kernel: the crate only
//! depends on `core` and `alloc`, and the "hardware" (frames, page table bits,
//! disks) is modeled in memory so that the paging policy on top can be
//! exercised deterministically.
//!
//! [`PageTable`]: mm::page_table::PageTable

#![cfg_attr(not(test), no_std)]
#![deny(rustdoc::broken_intra_doc_links)]

extern crate alloc;

pub mod addressing;
pub mod dev;
pub mod fs;
pub mod mm;
pub mod sync;
pub mod task;

/// Represents errors that can occur in the kernel.
///
/// Each variant corresponds to a POSIX errno value, so that system calls can
/// hand the error back to user space with [`KernelError::into_usize`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum KernelError {
    /// Operation is not permitted. (EPERM)
    #[error("operation not permitted")]
    OperationNotPermitted,
    /// No such file or directory. (ENOENT)
    #[error("no such entry")]
    NoSuchEntry,
    /// IO Error. (EIO)
    #[error("I/O error")]
    IOError,
    /// BAD file descriptor. (EBADF)
    #[error("bad file descriptor")]
    BadFileDescriptor,
    /// Out of memory. (ENOMEM)
    #[error("out of memory")]
    NoMemory,
    /// Permission denied. (EACCES)
    #[error("permission denied")]
    InvalidAccess,
    /// Bad address. (EFAULT)
    #[error("bad address")]
    BadAddress,
    /// Entry exists. (EEXIST)
    #[error("entry exists")]
    FileExist,
    /// Invalid arguement. (EINVAL)
    #[error("invalid argument")]
    InvalidArgument,
    /// No space left on device. (ENOSPC)
    #[error("no space left on device")]
    NoSpace,
    /// Operation is not supported. (ENOTSUPP)
    #[error("operation not supported")]
    NotSupportedOperation,
}

impl KernelError {
    /// Converts the [`KernelError`] enum into a corresponding `usize` error
    /// code. The result is cast to `usize` for use as a return value in
    /// system calls.
    pub fn into_usize(self) -> usize {
        (match self {
            KernelError::OperationNotPermitted => -1isize,
            KernelError::NoSuchEntry => -2,
            KernelError::IOError => -5,
            KernelError::BadFileDescriptor => -9,
            KernelError::NoMemory => -12,
            KernelError::InvalidAccess => -13,
            KernelError::BadAddress => -14,
            KernelError::FileExist => -17,
            KernelError::InvalidArgument => -22,
            KernelError::NoSpace => -28,
            KernelError::NotSupportedOperation => -524,
        }) as usize
    }
}

/// The given `isize` does not indicate an [`KernelError`].
#[derive(Debug, Eq, PartialEq)]
pub struct TryFromError {
    e: isize,
}

impl TryFrom<isize> for KernelError {
    type Error = TryFromError;

    fn try_from(value: isize) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::OperationNotPermitted),
            -2 => Ok(Self::NoSuchEntry),
            -5 => Ok(Self::IOError),
            -9 => Ok(Self::BadFileDescriptor),
            -12 => Ok(Self::NoMemory),
            -13 => Ok(Self::InvalidAccess),
            -14 => Ok(Self::BadAddress),
            -17 => Ok(Self::FileExist),
            -22 => Ok(Self::InvalidArgument),
            -28 => Ok(Self::NoSpace),
            -524 => Ok(Self::NotSupportedOperation),
            e => Err(TryFromError { e }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::KernelError;

    #[test]
    fn errno_round_trip() {
        for e in [
            KernelError::NoMemory,
            KernelError::BadAddress,
            KernelError::InvalidArgument,
            KernelError::NoSpace,
        ] {
            assert_eq!(KernelError::try_from(e.into_usize() as isize), Ok(e));
        }
        assert!(KernelError::try_from(-4095).is_err());
    }
}
