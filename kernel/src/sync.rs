//! Synchronization primitives.
//!
//! The paging core runs on the thread that owns the faulting process, so most
//! of its state is reached through `&mut`. The few structures that are
//! shared by every process (the swap slot table) are protected by a
//! [`SpinLock`]. Hold the lock only for the bit scan and flip; never across
//! device I/O.

pub use spin::{Mutex as SpinLock, MutexGuard as SpinLockGuard};
