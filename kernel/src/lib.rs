//! A user-space model of the kernel services a character device driver
//! consumes: device number regions, cdevs, device classes with their sysfs
//! and devtmpfs entries, VFS dispatch of file operations, and loadable
//! modules.
//!
//! Everything hangs off a [`Kernel`] value instead of global tables, so a
//! process can run several independent kernels side by side.
#![cfg_attr(not(any(test, feature = "std")), no_std)]
extern crate alloc;

pub mod buf;
pub mod chrdev;
pub mod device;
pub mod error;
pub mod fs;
pub mod logger;
pub mod module;
pub mod printk;
mod system;

pub use error::linux_err as code;
pub use module::{Module, ModuleInfo, ThisModule};
pub use system::Kernel;
