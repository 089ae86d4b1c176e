//! User space buffers handed to file operations.
//!
//! A syscall names a buffer and a byte count. The count is what the caller
//! asks for; the slice is the memory that is actually mapped for it. Copying
//! past the mapped part is a fault, the same way `copy_to_user` and
//! `copy_from_user` fail on an unmapped page.

use alloc::vec::Vec;

use crate::error::{linux_err::EFAULT, KernelResult as Result};

/// A reader over a user buffer, handed to `write` implementations.
///
/// Used to incrementally read from the user slice.
pub struct UserSlicePtrReader<'a> {
    data: &'a [u8],
    length: usize,
}

impl<'a> UserSlicePtrReader<'a> {
    /// Constructs a reader for `length` bytes backed by the mapped `data`.
    ///
    /// `length` may exceed `data.len()`; reads that reach past the mapped
    /// bytes fail with [`EFAULT`].
    pub fn new(data: &'a [u8], length: usize) -> Self {
        UserSlicePtrReader { data, length }
    }

    /// Returns the number of bytes left to be read from this. Note that even
    /// reading less than this number of bytes may return an Error().
    pub fn len(&self) -> usize {
        self.length
    }

    /// Returns `true` if `self.len()` is 0.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Skip the provided number of bytes.
    ///
    /// Returns an error if skipping more than the length of the buffer.
    pub fn skip(&mut self, num_skip: usize) -> Result {
        // Update `self.length` first since that's the fallible part of this operation.
        self.length = self.length.checked_sub(num_skip).ok_or(EFAULT)?;
        self.data = self.data.get(num_skip..).unwrap_or_default();
        Ok(())
    }

    /// Reads raw data from the user slice into a kernel buffer.
    ///
    /// Fails with [`EFAULT`] if the read reaches unmapped bytes, or if the read
    /// goes out of bounds of this reader. Nothing is copied on failure.
    pub fn read_slice(&mut self, out: &mut [u8]) -> Result {
        let len = out.len();
        if len > self.length || len > self.data.len() {
            return Err(EFAULT);
        }
        out.copy_from_slice(&self.data[..len]);
        self.data = &self.data[len..];
        self.length -= len;
        Ok(())
    }

    /// Read all data remaining in the user slice and return it in a `Vec`.
    ///
    /// Returns EFAULT if the address does not currently point to
    /// mapped, readable memory.
    pub fn read_all(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        data.try_reserve_exact(self.length)?;
        data.resize(self.length, 0);
        self.read_slice(&mut data)?;
        Ok(data)
    }
}

/// A writer over a user buffer, handed to `read` implementations.
pub struct UserSlicePtrWriter<'a> {
    data: &'a mut [u8],
    length: usize,
}

impl<'a> UserSlicePtrWriter<'a> {
    /// Constructs a writer for `length` bytes backed by the mapped `data`.
    pub fn new(data: &'a mut [u8], length: usize) -> Self {
        UserSlicePtrWriter { data, length }
    }

    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Writes `data` into the user slice.
    ///
    /// Returns EFAULT if the destination is not mapped for the whole of
    /// `data`, or `data` is larger than the user slice. Nothing is written in
    /// that case.
    pub fn write_slice(&mut self, data: &[u8]) -> Result {
        let len = data.len();
        if len > self.length || len > self.data.len() {
            return Err(EFAULT);
        }
        let dst = core::mem::take(&mut self.data);
        let (head, tail) = dst.split_at_mut(len);
        head.copy_from_slice(data);
        self.data = tail;
        self.length -= len;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reader_advances() {
        let src = *b"abcdef";
        let mut reader = UserSlicePtrReader::new(&src, 6);
        let mut out = [0u8; 2];
        reader.read_slice(&mut out).unwrap();
        assert_eq!(&out, b"ab");
        reader.skip(1).unwrap();
        assert_eq!(reader.len(), 3);
        assert_eq!(reader.read_all().unwrap(), b"def");
        assert!(reader.is_empty());
    }

    #[test]
    fn reader_faults_past_mapped_bytes() {
        let src = [1u8; 4];
        let mut reader = UserSlicePtrReader::new(&src, 10);
        let mut out = [0u8; 8];
        assert_eq!(reader.read_slice(&mut out), Err(EFAULT));
        assert_eq!(out, [0u8; 8]);
        assert_eq!(reader.len(), 10);
    }

    #[test]
    fn reader_faults_past_length() {
        let src = [1u8; 4];
        let mut reader = UserSlicePtrReader::new(&src, 2);
        let mut out = [0u8; 3];
        assert_eq!(reader.read_slice(&mut out), Err(EFAULT));
        assert_eq!(reader.skip(3), Err(EFAULT));
    }

    #[test]
    fn writer_advances_and_faults() {
        let mut dst = [0u8; 4];
        {
            let mut writer = UserSlicePtrWriter::new(&mut dst, 8);
            writer.write_slice(b"ab").unwrap();
            writer.write_slice(b"c").unwrap();
            assert_eq!(writer.len(), 5);
            assert_eq!(writer.write_slice(b"de"), Err(EFAULT));
        }
        assert_eq!(&dst, b"abc\0");
    }
}
