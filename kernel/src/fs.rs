//! Filesystem abstraction.
//!
//! File-backed pages read their contents from, and write their modifications
//! back to, a regular file. This module provides the two levels of handle
//! they need:
//!
//! - [`RegularFile`]: a reference-counted handle to the file itself (the
//!   inode). All I/O through it is positional.
//! - [`File`]: an *open* handle with its own cursor, the equivalent of an
//!   entry in a file descriptor table. Opening and closing are counted on the
//!   [`RegularFile`], so callers can observe how many handles are live.
//!   Closing consumes the handle, so a handle cannot be closed twice.

/// Defines traits for file system operations.
pub mod traits {
    use crate::KernelError;

    /// Trait representing a regular file in the filesystem.
    ///
    /// A regular file contains user data and supports positional read and
    /// write operations.
    pub trait RegularFile
    where
        Self: Send + Sync,
    {
        /// Returns the size of the file in bytes.
        fn size(&self) -> usize;

        /// Reads data from the file at `position` into `buf`.
        ///
        /// # Returns
        /// - `Ok(usize)`: The number of bytes read, which is short only when
        ///   the end of the file is reached.
        /// - `Err(KernelError)`: An error occured while the read operation.
        fn read(&self, position: usize, buf: &mut [u8]) -> Result<usize, KernelError>;

        /// Writes `buf` into the file at `position`.
        ///
        /// If the write position is beyond the current file size, the file is
        /// extended to the minimum size required to reflect the update.
        ///
        /// # Returns
        /// - `Ok(usize)`: The number of bytes written.
        /// - `Err(KernelError)`: If the operation fails.
        fn write(&self, position: usize, buf: &[u8]) -> Result<usize, KernelError>;
    }
}

use crate::{KernelError, sync::SpinLock};
use alloc::{boxed::Box, sync::Arc, vec::Vec};
use core::sync::atomic::{AtomicUsize, Ordering};

struct Inode {
    ops: Box<dyn traits::RegularFile>,
    handles: AtomicUsize,
}

/// A handle to a regular file.
///
/// This struct provides a reference-counted handle to a file that supports
/// reading and writing operations at the kernel level.
#[derive(Clone)]
pub struct RegularFile(Arc<Inode>);

impl RegularFile {
    /// Creates a new [`RegularFile`] handle from a given implementation of
    /// [`traits::RegularFile`].
    pub fn new(r: impl traits::RegularFile + 'static) -> Self {
        Self(Arc::new(Inode {
            ops: Box::new(r),
            handles: AtomicUsize::new(0),
        }))
    }

    /// Returns the size of the file in bytes.
    #[inline]
    pub fn size(&self) -> usize {
        self.0.ops.size()
    }

    /// Reads data from the file at `position` into `buf`.
    #[inline]
    pub fn read(&self, position: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        self.0.ops.read(position, buf)
    }

    /// Writes data from `buf` into the file at `position`.
    #[inline]
    pub fn write(&self, position: usize, buf: &[u8]) -> Result<usize, KernelError> {
        self.0.ops.write(position, buf)
    }

    /// Number of open [`File`] handles on this file.
    pub fn open_handles(&self) -> usize {
        self.0.handles.load(Ordering::SeqCst)
    }

    /// Returns `true` if both handles refer to the same file.
    pub fn same_file(&self, other: &RegularFile) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// An open handle to a regular file.
///
/// Each [`File`] carries its own cursor. [`File::reopen`] yields an
/// independent handle on the same file, whose lifetime is unrelated to the
/// original one. Dropping a [`File`] closes it.
pub struct File {
    file: RegularFile,
    position: usize,
}

impl File {
    /// Opens a new handle on `file` with the cursor at the beginning.
    pub fn open(file: &RegularFile) -> Self {
        file.0.handles.fetch_add(1, Ordering::SeqCst);
        Self {
            file: file.clone(),
            position: 0,
        }
    }

    /// Opens another handle on the same file.
    pub fn reopen(&self) -> Self {
        Self::open(&self.file)
    }

    /// Closes the handle.
    pub fn close(self) {}

    /// The file this handle refers to.
    pub fn inode(&self) -> &RegularFile {
        &self.file
    }

    /// Returns the size of the file in bytes.
    pub fn len(&self) -> usize {
        self.file.size()
    }

    /// Returns `true` if the file is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Moves the cursor to `position`.
    pub fn seek(&mut self, position: usize) {
        self.position = position;
    }

    /// Returns the cursor position.
    pub fn tell(&self) -> usize {
        self.position
    }

    /// Reads into `buf` from the cursor, advancing it by the bytes read.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize, KernelError> {
        let read = self.file.read(self.position, buf)?;
        self.position += read;
        Ok(read)
    }

    /// Writes `buf` at the cursor, advancing it by the bytes written.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize, KernelError> {
        let written = self.file.write(self.position, buf)?;
        self.position += written;
        Ok(written)
    }
}

impl Drop for File {
    fn drop(&mut self) {
        let prev = self.file.0.handles.fetch_sub(1, Ordering::SeqCst);
        debug_assert_ne!(prev, 0, "file handle closed more often than opened");
    }
}

/// A regular file whose contents live in memory.
///
/// Cloning a [`MemoryFile`] yields another view of the same contents, so a
/// test can keep one to inspect what the kernel wrote.
#[derive(Clone, Default)]
pub struct MemoryFile {
    data: Arc<SpinLock<Vec<u8>>>,
    writes: Arc<AtomicUsize>,
}

impl MemoryFile {
    /// Creates a file holding `contents`.
    pub fn new(contents: &[u8]) -> Self {
        Self {
            data: Arc::new(SpinLock::new(contents.to_vec())),
            writes: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Returns a copy of the current contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    /// Number of write operations performed on the file.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl traits::RegularFile for MemoryFile {
    fn size(&self) -> usize {
        self.data.lock().len()
    }

    fn read(&self, position: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
        let data = self.data.lock();
        let end = data.len().min(position.saturating_add(buf.len()));
        let len = end.saturating_sub(position);
        if len > 0 {
            buf[..len].copy_from_slice(&data[position..end]);
        }
        Ok(len)
    }

    fn write(&self, position: usize, buf: &[u8]) -> Result<usize, KernelError> {
        let mut data = self.data.lock();
        let end = position
            .checked_add(buf.len())
            .ok_or(KernelError::InvalidArgument)?;
        if data.len() < end {
            data.resize(end, 0);
        }
        data[position..end].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(buf.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn handles_are_counted() {
        let file = RegularFile::new(MemoryFile::new(b"hello"));
        let a = File::open(&file);
        let b = a.reopen();
        assert_eq!(file.open_handles(), 2);
        a.close();
        assert_eq!(file.open_handles(), 1);
        drop(b);
        assert_eq!(file.open_handles(), 0);
    }

    #[test]
    fn cursor_moves_with_io() {
        let backing = MemoryFile::new(b"0123456789");
        let file = RegularFile::new(backing.clone());
        let mut handle = File::open(&file);
        handle.seek(8);
        let mut buf = [0; 4];
        assert_eq!(handle.read(&mut buf), Ok(2));
        assert_eq!(&buf[..2], b"89");
        assert_eq!(handle.tell(), 10);
        assert_eq!(handle.write(b"ab"), Ok(2));
        assert_eq!(backing.contents(), b"0123456789ab");
        assert_eq!(backing.write_count(), 1);
    }
}
