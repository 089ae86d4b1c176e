//! The user side of an open file: the syscall surface over a device node.

use alloc::boxed::Box;
use core::fmt;

use crate::{
    buf::{UserSlicePtrReader, UserSlicePtrWriter},
    error::{linux_err::*, KernelResult as Result},
    module::ModuleRef,
    Kernel,
};

use super::file_operations::{File, OpenFile, SeekFrom};

bitflags::bitflags! {
    /// `open(2)` flags understood by the VFS layer.
    ///
    /// An empty set is `O_RDONLY`. Only the access mode is acted on;
    /// `O_APPEND` and `O_NONBLOCK` are accepted and kept in [`File::flags`]
    /// for drivers to look at, and a plain character device ignores them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FileFlags: u32 {
        const O_WRONLY = 0o1;
        const O_RDWR = 0o2;
        const O_APPEND = 0o2000;
        const O_NONBLOCK = 0o4000;
    }
}

impl FileFlags {
    pub const O_RDONLY: FileFlags = FileFlags::empty();
    pub const O_ACCMODE: FileFlags = FileFlags::O_WRONLY.union(FileFlags::O_RDWR);

    /// `FMODE_READ`
    pub fn readable(self) -> bool {
        !self.contains(FileFlags::O_WRONLY)
    }

    /// `FMODE_WRITE`
    pub fn writable(self) -> bool {
        self.intersects(FileFlags::O_ACCMODE)
    }
}

/// An open file description.
///
/// Dropping it is `close(2)`: the driver's `release` runs and the owning
/// module is unpinned.
pub struct FileHandle {
    file: File,
    ops: Option<Box<dyn OpenFile>>,
    _owner: Option<ModuleRef>,
}

impl FileHandle {
    /// The current file position.
    pub fn pos(&self) -> u64 {
        self.file.pos
    }

    pub fn flags(&self) -> FileFlags {
        self.file.flags
    }

    fn ops(&self) -> Result<&dyn OpenFile> {
        self.ops.as_deref().ok_or(EBADF)
    }

    /// `read(fd, buf, buf.len())`.
    pub fn read(&mut self, buf: &mut [u8]) -> Result<usize> {
        let count = buf.len();
        self.read_raw(buf, count)
    }

    /// `read(fd, buf, count)` where only `buf` is mapped; a driver copying
    /// past it gets `EFAULT`.
    pub fn read_raw(&mut self, buf: &mut [u8], count: usize) -> Result<usize> {
        if !self.file.flags.readable() {
            return Err(EBADF);
        }
        let mut writer = UserSlicePtrWriter::new(buf, count);
        let mut pos = self.file.pos;
        let n = self.ops()?.read(&self.file, &mut writer, &mut pos)?;
        self.file.pos = pos;
        Ok(n)
    }

    /// `write(fd, buf, buf.len())`.
    pub fn write(&mut self, buf: &[u8]) -> Result<usize> {
        self.write_raw(buf, buf.len())
    }

    /// `write(fd, buf, count)` where only `buf` is mapped.
    pub fn write_raw(&mut self, buf: &[u8], count: usize) -> Result<usize> {
        if !self.file.flags.writable() {
            return Err(EBADF);
        }
        let mut reader = UserSlicePtrReader::new(buf, count);
        let mut pos = self.file.pos;
        let n = self.ops()?.write(&self.file, &mut reader, &mut pos)?;
        self.file.pos = pos;
        Ok(n)
    }

    /// `lseek(fd, offset, whence)`.
    pub fn llseek(&mut self, offset: i64, whence: i32) -> Result<u64> {
        self.seek(SeekFrom::from_whence(offset, whence)?)
    }

    pub fn seek(&mut self, from: SeekFrom) -> Result<u64> {
        let pos = self.ops()?.seek(&self.file, from)?;
        self.file.pos = pos;
        Ok(pos)
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        if let Some(ops) = self.ops.take() {
            ops.release(&self.file);
        }
    }
}

impl fmt::Debug for FileHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileHandle").field("file", &self.file).finish()
    }
}

impl Kernel {
    /// `open(2)` on a devtmpfs node such as `/dev/pcd`.
    ///
    /// Fails with `ENOENT` if there is no such node and `ENXIO` if the node's
    /// device number has no cdev behind it or its module is being unloaded.
    pub fn open(&self, path: &str, flags: FileFlags) -> Result<FileHandle> {
        if flags.contains(FileFlags::O_ACCMODE) {
            return Err(EINVAL);
        }
        let dev = self.lookup_devnode(path).ok_or(ENOENT)?;
        let cdev = self.lookup_cdev(dev).ok_or(ENXIO)?;
        let owner = match cdev.owner() {
            Some(module) => Some(module.try_get().ok_or(ENXIO)?),
            None => None,
        };
        let file = File {
            pos: 0,
            flags,
            dev,
        };
        let ops = cdev.open(&file)?;
        Ok(FileHandle {
            file,
            ops: Some(ops),
            _owner: owner,
        })
    }
}

#[cfg(feature = "std")]
mod io {
    use super::*;

    impl std::io::Read for FileHandle {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            Ok(FileHandle::read(self, buf)?)
        }
    }

    impl std::io::Write for FileHandle {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            Ok(FileHandle::write(self, buf)?)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl std::io::Seek for FileHandle {
        fn seek(&mut self, pos: std::io::SeekFrom) -> std::io::Result<u64> {
            let from = match pos {
                std::io::SeekFrom::Start(offset) => SeekFrom::Set(i64::try_from(offset)
                    .map_err(|_| std::io::Error::from(EINVAL))?),
                std::io::SeekFrom::Current(offset) => SeekFrom::Cur(offset),
                std::io::SeekFrom::End(offset) => SeekFrom::End(offset),
            };
            Ok(FileHandle::seek(self, from)?)
        }
    }
}
