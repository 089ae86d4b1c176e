//! File operations of the pcd device.

use alloc::sync::Arc;

use kernel::{
    buf::{UserSlicePtrReader, UserSlicePtrWriter},
    error::KernelResult,
    fs::{File, FileOperations, ReadFn, SeekFn, SeekFrom, WriteFn},
};
use log::{error, info};
use spin::Mutex;

use crate::buffer::DeviceBuffer;

/// Memory shared by every open of one pcd device.
pub type SharedBuffer = Arc<Mutex<DeviceBuffer>>;

/// Per-open state. The file position itself is kept by the VFS.
pub struct PcdFile {
    buffer: SharedBuffer,
}

impl FileOperations for PcdFile {
    type OpenData = SharedBuffer;

    fn open(data: &SharedBuffer, _file: &File) -> KernelResult<Self> {
        info!("pcd_open: open was successful");
        Ok(PcdFile {
            buffer: data.clone(),
        })
    }

    fn release(self, _file: &File) {
        info!("pcd_release: release was successful");
    }

    const SEEK: SeekFn<Self> = Some(
        |this: &Self, file: &File, from: SeekFrom| -> KernelResult<u64> {
            info!("pcd_llseek: requested {:?}", from);
            info!("pcd_llseek: current file position = {}", file.pos());
            let pos = this.buffer.lock().seek(file.pos(), from)?;
            info!("pcd_llseek: new file position = {}", pos);
            Ok(pos)
        },
    );

    const READ: ReadFn<Self> = Some(
        |this: &Self,
         _file: &File,
         buf: &mut UserSlicePtrWriter,
         offset: &mut u64|
         -> KernelResult<usize> {
            info!("pcd_read: read requested for {} bytes", buf.len());
            info!("pcd_read: current file position = {}", offset);
            let count = this.buffer.lock().read(offset, buf).inspect_err(|e| {
                error!("pcd_read: copy to user failed: {:?}", e);
            })?;
            info!("pcd_read: number of bytes successfully read = {}", count);
            info!("pcd_read: updated file position = {}", offset);
            Ok(count)
        },
    );

    const WRITE: WriteFn<Self> = Some(
        |this: &Self,
         _file: &File,
         buf: &mut UserSlicePtrReader,
         offset: &mut u64|
         -> KernelResult<usize> {
            info!("pcd_write: write requested for {} bytes", buf.len());
            info!("pcd_write: current file position = {}", offset);
            let count = this.buffer.lock().write(offset, buf).inspect_err(|e| {
                error!("pcd_write: write failed: {:?}", e);
            })?;
            info!("pcd_write: number of bytes successfully written = {}", count);
            info!("pcd_write: updated file position = {}", offset);
            Ok(count)
        },
    );
}
