use std::io::{self, Write};

use clap::{Subcommand, ValueEnum};
use kernel::fs::{SEEK_CUR, SEEK_DATA, SEEK_END, SEEK_HOLE, SEEK_SET};
use pcd::DEV_MEM_SIZE;

use crate::device::PcdDevice;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Whence {
    Set,
    Cur,
    End,
    Data,
    Hole,
}

impl Whence {
    pub fn raw(self) -> i32 {
        match self {
            Whence::Set => SEEK_SET,
            Whence::Cur => SEEK_CUR,
            Whence::End => SEEK_END,
            Whence::Data => SEEK_DATA,
            Whence::Hole => SEEK_HOLE,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Read bytes from the device
    Read {
        #[arg(short, long, default_value_t = 0)]
        /// Absolute position to read from
        offset: i64,
        #[arg(short, long, default_value_t = DEV_MEM_SIZE)]
        /// Number of bytes to request
        count: usize,
        #[arg(long)]
        /// Print the bytes as hex instead of text
        hex: bool,
    },
    /// Write bytes to the device
    Write {
        #[arg(short, long, default_value_t = 0)]
        /// Absolute position to write at
        offset: i64,
        /// The bytes to write
        data: String,
    },
    /// Move the file position and print where it landed
    Seek {
        #[arg(short, long, allow_hyphen_values = true)]
        offset: i64,
        #[arg(short, long, value_enum, default_value_t = Whence::Set)]
        whence: Whence,
    },
    /// Hex dump of the whole device memory
    Dump,
    /// Show the device number of the node
    Info,
}

/// Runs one of the I/O commands against `dev`. `Info` is answered by the
/// caller, which knows where the sysfs attributes live.
pub fn run<D: PcdDevice, W: Write>(cmd: &Commands, dev: &mut D, out: &mut W) -> io::Result<()> {
    match cmd {
        Commands::Read { offset, count, hex } => {
            dev.lseek(*offset, SEEK_SET)?;
            let mut buf = vec![0u8; *count];
            let n = dev.read(&mut buf)?;
            writeln!(out, "read {} bytes at {}", n, offset)?;
            if *hex {
                hexdump(out, *offset as usize, &buf[..n])?;
            } else {
                writeln!(out, "{}", String::from_utf8_lossy(&buf[..n]))?;
            }
        }
        Commands::Write { offset, data } => {
            dev.lseek(*offset, SEEK_SET)?;
            let n = dev.write(data.as_bytes())?;
            writeln!(out, "wrote {} of {} bytes at {}", n, data.len(), offset)?;
        }
        Commands::Seek { offset, whence } => {
            let pos = dev.lseek(*offset, whence.raw())?;
            writeln!(out, "position {}", pos)?;
        }
        Commands::Dump => {
            dev.lseek(0, SEEK_SET)?;
            let mut data = Vec::with_capacity(DEV_MEM_SIZE);
            let mut chunk = [0u8; DEV_MEM_SIZE];
            loop {
                let n = dev.read(&mut chunk)?;
                if n == 0 {
                    break;
                }
                data.extend_from_slice(&chunk[..n]);
            }
            hexdump(out, 0, &data)?;
        }
        Commands::Info => {}
    }
    Ok(())
}

fn hexdump<W: Write>(out: &mut W, base: usize, data: &[u8]) -> io::Result<()> {
    for (i, line) in data.chunks(16).enumerate() {
        write!(out, "{:08x} ", base + i * 16)?;
        for b in line {
            write!(out, " {:02x}", b)?;
        }
        writeln!(out)?;
    }
    Ok(())
}
