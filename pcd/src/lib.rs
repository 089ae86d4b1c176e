//! pcd: a pseudo character device backed by 512 bytes of memory.
//!
//! Loading the module allocates one device number, binds the file operations
//! to it and publishes `/dev/pcd` through the `pcd_class` device class. User
//! space can then seek, read and write the memory like a small file.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod buffer;
pub mod file;

use alloc::{
    string::{String, ToString},
    sync::Arc,
};

use kernel::{
    chrdev::{Cdev, ChrdevRegion},
    device::{Class, Device},
    error::KernelResult,
    module, Kernel, Module, ThisModule,
};
use log::{error, info};
use spin::Mutex;

pub use buffer::{DeviceBuffer, DEV_MEM_SIZE};
pub use file::{PcdFile, SharedBuffer};

pub const DEFAULT_REGION_NAME: &str = "pcd_devices";
pub const DEFAULT_CLASS_NAME: &str = "pcd_class";
pub const DEFAULT_DEVICE_NAME: &str = "pcd";

/// Names the module registers under, taken from its load parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcdConfig {
    pub region_name: String,
    pub class_name: String,
    pub device_name: String,
}

impl Default for PcdConfig {
    fn default() -> Self {
        PcdConfig {
            region_name: DEFAULT_REGION_NAME.to_string(),
            class_name: DEFAULT_CLASS_NAME.to_string(),
            device_name: DEFAULT_DEVICE_NAME.to_string(),
        }
    }
}

impl PcdConfig {
    pub fn from_module(module: &ThisModule) -> Self {
        let param = |key: &str, default: &str| module.param(key).unwrap_or(default).to_string();
        PcdConfig {
            region_name: param("region_name", DEFAULT_REGION_NAME),
            class_name: param("class_name", DEFAULT_CLASS_NAME),
            device_name: param("device_name", DEFAULT_DEVICE_NAME),
        }
    }
}

/// The loaded driver.
///
/// Fields drop in declaration order, which is the reverse of registration:
/// device, class, cdev, then the device number region.
pub struct PcdDriver {
    device: Device,
    _class: Class,
    _cdev: Cdev,
    _region: ChrdevRegion,
    _buffer: SharedBuffer,
}

impl PcdDriver {
    fn register(
        kernel: &Arc<Kernel>,
        module: &ThisModule,
        config: &PcdConfig,
    ) -> KernelResult<Self> {
        let buffer: SharedBuffer = Arc::new(Mutex::new(DeviceBuffer::new()));

        // 1. Dynamically allocate a device number.
        let region = ChrdevRegion::alloc(kernel, 0, 1, &config.region_name)
            .inspect_err(|e| error!("Cdev alloc failed: {:?}", e))?;
        let dev = region.first();
        info!(
            "Device number <major>:<minor> = {}:{}",
            dev.major(),
            dev.minor()
        );

        // 2. and 3. Bind the file operations and add the cdev to the VFS.
        let mut cdev = Cdev::new::<PcdFile>(buffer.clone(), Some(module));
        cdev.add(kernel, dev, 1)
            .inspect_err(|e| error!("Cdev add failed: {:?}", e))?;

        // 4. Create the device class under /sys/class.
        let class = Class::create(kernel, &config.class_name)
            .inspect_err(|e| error!("Class creation failed: {:?}", e))?;

        // 5. Populate sysfs with the device, which also creates the node.
        let device = class
            .device_create(dev, &config.device_name)
            .inspect_err(|e| error!("Device creation failed: {:?}", e))?;

        Ok(PcdDriver {
            device,
            _class: class,
            _cdev: cdev,
            _region: region,
            _buffer: buffer,
        })
    }
}

impl Module for PcdDriver {
    fn init(kernel: &Arc<Kernel>, module: &ThisModule) -> KernelResult<Self> {
        let config = PcdConfig::from_module(module);
        let driver = Self::register(kernel, module, &config)
            .inspect_err(|_| error!("Module insertion failed"))?;
        info!(
            "Module initialization SUCCESSFUL, device node {}",
            driver.device.devnode()
        );
        Ok(driver)
    }
}

impl Drop for PcdDriver {
    fn drop(&mut self) {
        info!("Module unload: removing {}", self.device.devnode());
    }
}

module! {
    type: PcdDriver,
    name: "pcd",
    description: "Simple char device driver",
    license: "GPL",
    params: ["region_name", "class_name", "device_name"],
}
