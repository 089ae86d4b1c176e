//! Files and the VFS dispatch into character device drivers.
//!
//! C header: [`include/linux/fs.h`](../../../../include/linux/fs.h)

pub mod file;
pub mod file_operations;

pub use file::{FileFlags, FileHandle};
pub use file_operations::{
    File, FileOperations, ReadFn, SeekFn, SeekFrom, WriteFn, SEEK_CUR, SEEK_DATA, SEEK_END,
    SEEK_HOLE, SEEK_MAX, SEEK_SET,
};
