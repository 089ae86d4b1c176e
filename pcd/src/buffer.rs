//! The device memory and the bounds arithmetic around it.
//!
//! Positions live in `[0, DEV_MEM_SIZE]`; `DEV_MEM_SIZE` itself is the valid
//! "at end" position. No operation touches bytes outside `[0, DEV_MEM_SIZE)`.

use kernel::{
    buf::{UserSlicePtrReader, UserSlicePtrWriter},
    code::{EINVAL, ENOMEM},
    error::KernelResult,
    fs::SeekFrom,
};

/// Capacity of the device in bytes.
pub const DEV_MEM_SIZE: usize = 512;

/// The device's backing memory, zeroed when created.
pub struct DeviceBuffer {
    data: [u8; DEV_MEM_SIZE],
}

impl Default for DeviceBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceBuffer {
    pub const fn new() -> Self {
        DeviceBuffer {
            data: [0; DEV_MEM_SIZE],
        }
    }

    pub const fn capacity(&self) -> usize {
        DEV_MEM_SIZE
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Computes the position a seek from `current` lands on.
    ///
    /// Fails with `EINVAL` if the target is outside `[0, DEV_MEM_SIZE]` or the
    /// whence is anything but set, current or end.
    pub fn seek(&self, current: u64, from: SeekFrom) -> KernelResult<u64> {
        let cap = DEV_MEM_SIZE as i64;
        let target = match from {
            SeekFrom::Set(offset) => Some(offset),
            SeekFrom::Cur(offset) => i64::try_from(current)
                .ok()
                .and_then(|c| c.checked_add(offset)),
            SeekFrom::End(offset) => cap.checked_add(offset),
            SeekFrom::Data(_) | SeekFrom::Hole(_) => None,
        };
        match target {
            Some(pos) if (0..=cap).contains(&pos) => Ok(pos as u64),
            _ => Err(EINVAL),
        }
    }

    /// Copies up to `writer.len()` bytes starting at `*pos` out to the user,
    /// clamped at the end of the device, and advances `*pos`.
    ///
    /// Returns 0 at the end of the device. `*pos` is left alone if the copy
    /// faults.
    pub fn read(&self, pos: &mut u64, writer: &mut UserSlicePtrWriter<'_>) -> KernelResult<usize> {
        let start = clamp_pos(*pos);
        let count = writer.len().min(DEV_MEM_SIZE - start);
        writer.write_slice(&self.data[start..start + count])?;
        *pos = (start + count) as u64;
        Ok(count)
    }

    /// Copies up to `reader.len()` bytes from the user into the device at
    /// `*pos`, clamped at the end of the device, and advances `*pos`.
    ///
    /// Fails with `ENOMEM` when nothing fits, which includes every write at
    /// the end of the device and every zero-length write. Nothing is written
    /// if the copy faults.
    pub fn write(
        &mut self,
        pos: &mut u64,
        reader: &mut UserSlicePtrReader<'_>,
    ) -> KernelResult<usize> {
        let start = clamp_pos(*pos);
        let count = reader.len().min(DEV_MEM_SIZE - start);
        if count == 0 {
            return Err(ENOMEM);
        }
        reader.read_slice(&mut self.data[start..start + count])?;
        *pos = (start + count) as u64;
        Ok(count)
    }
}

fn clamp_pos(pos: u64) -> usize {
    usize::try_from(pos).map_or(DEV_MEM_SIZE, |p| p.min(DEV_MEM_SIZE))
}
