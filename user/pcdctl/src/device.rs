//! What a command needs from an open pcd node: read, write and a raw `lseek`.

use std::{
    fs::File,
    io::{self, Read, Write},
    os::fd::AsRawFd,
};

use kernel::fs::FileHandle;

pub trait PcdDevice: Read + Write {
    /// `lseek(2)` with the whence passed through untouched, so the driver
    /// sees `SEEK_DATA` and `SEEK_HOLE` too.
    fn lseek(&mut self, offset: i64, whence: i32) -> io::Result<u64>;
}

impl PcdDevice for File {
    fn lseek(&mut self, offset: i64, whence: i32) -> io::Result<u64> {
        let offset = libc::off_t::try_from(offset)
            .map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))?;
        // SAFETY: the fd is owned by `self` and stays open for the call.
        let pos = unsafe { libc::lseek(self.as_raw_fd(), offset, whence) };
        if pos < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(pos as u64)
    }
}

impl PcdDevice for FileHandle {
    fn lseek(&mut self, offset: i64, whence: i32) -> io::Result<u64> {
        Ok(self.llseek(offset, whence)?)
    }
}
