//! The driver side of `struct file_operations`.
//!
//! A driver implements [`FileOperations`] and fills in the entries it
//! supports; entries left as `None` behave like NULL pointers in the C table.

use alloc::boxed::Box;

use crate::{
    buf::{UserSlicePtrReader, UserSlicePtrWriter},
    chrdev::DevT,
    error::{linux_err::*, KernelResult},
    module::ThisModule,
};

use super::file::FileFlags;

pub const SEEK_SET: i32 = 0;
pub const SEEK_CUR: i32 = 1;
pub const SEEK_END: i32 = 2;
pub const SEEK_DATA: i32 = 3;
pub const SEEK_HOLE: i32 = 4;
pub const SEEK_MAX: i32 = SEEK_HOLE;

/// Where an `llseek` is relative to, with the raw signed offset.
///
/// Unlike `std::io::SeekFrom` the offsets are not range-checked here; that is
/// up to the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekFrom {
    /// `SEEK_SET`
    Set(i64),
    /// `SEEK_CUR`
    Cur(i64),
    /// `SEEK_END`
    End(i64),
    /// `SEEK_DATA`
    Data(i64),
    /// `SEEK_HOLE`
    Hole(i64),
}

impl SeekFrom {
    /// Decodes the `whence` argument of `lseek(2)`.
    ///
    /// Values above `SEEK_MAX` are rejected with `EINVAL` before any driver
    /// sees them.
    pub fn from_whence(offset: i64, whence: i32) -> KernelResult<SeekFrom> {
        match whence {
            SEEK_SET => Ok(SeekFrom::Set(offset)),
            SEEK_CUR => Ok(SeekFrom::Cur(offset)),
            SEEK_END => Ok(SeekFrom::End(offset)),
            SEEK_DATA => Ok(SeekFrom::Data(offset)),
            SEEK_HOLE => Ok(SeekFrom::Hole(offset)),
            _ => Err(EINVAL),
        }
    }
}

/// The kernel's view of an open file, as passed to driver callbacks.
#[derive(Debug)]
pub struct File {
    pub(crate) pos: u64,
    pub(crate) flags: FileFlags,
    pub(crate) dev: DevT,
}

impl File {
    /// The current file position, `f_pos`.
    pub fn pos(&self) -> u64 {
        self.pos
    }

    pub fn flags(&self) -> FileFlags {
        self.flags
    }

    /// The device number the file was opened through.
    pub fn dev(&self) -> DevT {
        self.dev
    }
}

/// `read`: fill the writer, starting at `*offset`, and advance `*offset` by
/// the number of bytes produced. Returns that number.
pub type ReadFn<T> = Option<
    fn(&T, &File, &mut UserSlicePtrWriter<'_>, &mut u64) -> KernelResult<usize>,
>;

/// `write`: consume the reader, starting at `*offset`, and advance `*offset`
/// by the number of bytes consumed. Returns that number.
pub type WriteFn<T> = Option<
    fn(&T, &File, &mut UserSlicePtrReader<'_>, &mut u64) -> KernelResult<usize>,
>;

/// `llseek`: compute the new position from `file.pos()` and the request.
pub type SeekFn<T> = Option<fn(&T, &File, SeekFrom) -> KernelResult<u64>>;

/// Corresponds to the kernel's `struct file_operations`.
///
/// One value of `Self` is created per open file by [`FileOperations::open`]
/// and consumed by [`FileOperations::release`].
pub trait FileOperations: Send + Sync + Sized + 'static {
    /// Data shared by every open of the device, handed over at `cdev_init`.
    type OpenData: Send + Sync + 'static;

    /// Creates per-file state. Called for every `open(2)`.
    fn open(data: &Self::OpenData, file: &File) -> KernelResult<Self>;

    /// Cleans up after the last reference to the file is gone.
    fn release(self, _file: &File) {}

    const READ: ReadFn<Self> = None;
    const WRITE: WriteFn<Self> = None;
    const SEEK: SeekFn<Self> = None;
}

/// Type-erased operations table stored in the cdev map.
pub(crate) trait CdevOps: Send + Sync {
    fn open(&self, file: &File) -> KernelResult<Box<dyn OpenFile>>;
    fn owner(&self) -> Option<&ThisModule>;
}

/// Type-erased per-file state.
pub(crate) trait OpenFile: Send + Sync {
    fn read(&self, file: &File, w: &mut UserSlicePtrWriter<'_>, pos: &mut u64)
        -> KernelResult<usize>;
    fn write(&self, file: &File, r: &mut UserSlicePtrReader<'_>, pos: &mut u64)
        -> KernelResult<usize>;
    fn seek(&self, file: &File, from: SeekFrom) -> KernelResult<u64>;
    fn release(self: Box<Self>, file: &File);
}

pub(crate) struct Registered<T: FileOperations> {
    data: T::OpenData,
    owner: Option<ThisModule>,
}

impl<T: FileOperations> Registered<T> {
    pub(crate) fn new(data: T::OpenData, owner: Option<ThisModule>) -> Self {
        Registered { data, owner }
    }
}

impl<T: FileOperations> CdevOps for Registered<T> {
    fn open(&self, file: &File) -> KernelResult<Box<dyn OpenFile>> {
        let inner = T::open(&self.data, file)?;
        Ok(Box::new(Opened::<T>(inner)))
    }

    fn owner(&self) -> Option<&ThisModule> {
        self.owner.as_ref()
    }
}

struct Opened<T: FileOperations>(T);

impl<T: FileOperations> OpenFile for Opened<T> {
    fn read(
        &self,
        file: &File,
        w: &mut UserSlicePtrWriter<'_>,
        pos: &mut u64,
    ) -> KernelResult<usize> {
        match T::READ {
            Some(read) => read(&self.0, file, w, pos),
            None => Err(EINVAL),
        }
    }

    fn write(
        &self,
        file: &File,
        r: &mut UserSlicePtrReader<'_>,
        pos: &mut u64,
    ) -> KernelResult<usize> {
        match T::WRITE {
            Some(write) => write(&self.0, file, r, pos),
            None => Err(EINVAL),
        }
    }

    fn seek(&self, file: &File, from: SeekFrom) -> KernelResult<u64> {
        match T::SEEK {
            Some(seek) => seek(&self.0, file, from),
            None => Err(ESPIPE),
        }
    }

    fn release(self: Box<Self>, file: &File) {
        let Opened(inner) = *self;
        inner.release(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whence_decoding() {
        assert_eq!(SeekFrom::from_whence(5, SEEK_SET), Ok(SeekFrom::Set(5)));
        assert_eq!(SeekFrom::from_whence(-5, SEEK_CUR), Ok(SeekFrom::Cur(-5)));
        assert_eq!(SeekFrom::from_whence(-1, SEEK_END), Ok(SeekFrom::End(-1)));
        assert_eq!(SeekFrom::from_whence(0, SEEK_HOLE), Ok(SeekFrom::Hole(0)));
        assert_eq!(SeekFrom::from_whence(0, 5), Err(EINVAL));
        assert_eq!(SeekFrom::from_whence(0, -1), Err(EINVAL));
    }
}
