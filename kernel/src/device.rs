//! Device classes, class devices and the nodes they publish.
//!
//! `class_create` makes `/sys/class/<class>`; `device_create` adds
//! `/sys/class/<class>/<name>` and the devtmpfs node `/dev/<name>` that user
//! space opens.
//!
//! C header: [`include/linux/device.h`](../../../../include/linux/device.h)

use alloc::{
    collections::BTreeMap,
    format,
    string::{String, ToString},
    sync::{Arc, Weak},
    vec::Vec,
};

use crate::{
    chrdev::DevT,
    error::{linux_err::*, KernelResult as Result},
    pr_warn, Kernel,
};

const SYSFS_CLASS: &str = "/sys/class/";
const DEVTMPFS: &str = "/dev/";

#[derive(Default)]
struct ClassDir {
    devices: BTreeMap<String, DevT>,
}

pub(crate) struct SysfsTable {
    classes: BTreeMap<String, ClassDir>,
    devtmpfs: BTreeMap<String, DevT>,
}

impl SysfsTable {
    pub(crate) fn new() -> Self {
        SysfsTable {
            classes: BTreeMap::new(),
            devtmpfs: BTreeMap::new(),
        }
    }
}

fn check_name(name: &str) -> Result {
    if name.is_empty() || name.contains('/') || name == "." || name == ".." {
        return Err(EINVAL);
    }
    Ok(())
}

/// A device class, `struct class`.
///
/// Destroyed (`class_destroy`) when dropped.
pub struct Class {
    kernel: Weak<Kernel>,
    name: String,
}

impl Class {
    /// Equivalent to `class_create`.
    pub fn create(kernel: &Arc<Kernel>, name: &str) -> Result<Class> {
        check_name(name)?;
        let mut sysfs = kernel.sysfs.lock();
        if sysfs.classes.contains_key(name) {
            return Err(EEXIST);
        }
        sysfs.classes.insert(name.to_string(), ClassDir::default());
        Ok(Class {
            kernel: Arc::downgrade(kernel),
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Equivalent to `device_create`: registers `dev` under this class and
    /// publishes `/dev/<name>`.
    pub fn device_create(&self, dev: DevT, name: &str) -> Result<Device> {
        check_name(name)?;
        let kernel = self.kernel.upgrade().ok_or(ENODEV)?;
        let mut sysfs = kernel.sysfs.lock();
        if sysfs.devtmpfs.contains_key(name) {
            return Err(EEXIST);
        }
        let class = sysfs.classes.get_mut(&self.name).ok_or(ENODEV)?;
        if class.devices.contains_key(name) {
            return Err(EEXIST);
        }
        class.devices.insert(name.to_string(), dev);
        sysfs.devtmpfs.insert(name.to_string(), dev);
        Ok(Device {
            kernel: self.kernel.clone(),
            class: self.name.clone(),
            name: name.to_string(),
            dev,
        })
    }
}

impl Drop for Class {
    fn drop(&mut self) {
        let Some(kernel) = self.kernel.upgrade() else {
            return;
        };
        let mut sysfs = kernel.sysfs.lock();
        if let Some(class) = sysfs.classes.remove(&self.name) {
            for name in class.devices.keys() {
                pr_warn!(
                    "class '{}': device '{}' still registered at class_destroy",
                    self.name,
                    name
                );
                sysfs.devtmpfs.remove(name);
            }
        }
    }
}

/// A class device, `struct device` created through [`Class::device_create`].
///
/// Dropping it is `device_destroy`.
pub struct Device {
    kernel: Weak<Kernel>,
    class: String,
    name: String,
    dev: DevT,
}

impl Device {
    pub fn devt(&self) -> DevT {
        self.dev
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Path of the devtmpfs node, e.g. `/dev/pcd`.
    pub fn devnode(&self) -> String {
        format!("{}{}", DEVTMPFS, self.name)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        let Some(kernel) = self.kernel.upgrade() else {
            return;
        };
        let mut sysfs = kernel.sysfs.lock();
        if let Some(class) = sysfs.classes.get_mut(&self.class) {
            class.devices.remove(&self.name);
        }
        if sysfs.devtmpfs.get(&self.name) == Some(&self.dev) {
            sysfs.devtmpfs.remove(&self.name);
        }
    }
}

impl Kernel {
    pub(crate) fn lookup_devnode(&self, path: &str) -> Option<DevT> {
        let name = path.strip_prefix(DEVTMPFS)?;
        self.sysfs.lock().devtmpfs.get(name).copied()
    }

    /// Lists devtmpfs nodes as `(path, dev)` pairs.
    pub fn list_dev(&self) -> Vec<(String, DevT)> {
        self.sysfs
            .lock()
            .devtmpfs
            .iter()
            .map(|(name, dev)| (format!("{}{}", DEVTMPFS, name), *dev))
            .collect()
    }

    /// Lists the entries of `/sys/class` or `/sys/class/<class>`.
    pub fn list_sysfs(&self, path: &str) -> Result<Vec<String>> {
        let sysfs = self.sysfs.lock();
        let rest = path.trim_end_matches('/');
        if rest == SYSFS_CLASS.trim_end_matches('/') {
            return Ok(sysfs.classes.keys().cloned().collect());
        }
        let class = rest.strip_prefix(SYSFS_CLASS).ok_or(ENOENT)?;
        let dir = sysfs.classes.get(class).ok_or(ENOENT)?;
        Ok(dir.devices.keys().cloned().collect())
    }

    /// Reads a class device attribute: `dev` or `uevent`.
    pub fn read_sysfs(&self, path: &str) -> Result<String> {
        let rest = path.strip_prefix(SYSFS_CLASS).ok_or(ENOENT)?;
        let mut parts = rest.split('/');
        let (Some(class), Some(device), Some(attr), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(ENOENT);
        };
        let sysfs = self.sysfs.lock();
        let dev = sysfs
            .classes
            .get(class)
            .and_then(|c| c.devices.get(device))
            .ok_or(ENOENT)?;
        match attr {
            "dev" => Ok(format!("{}\n", dev)),
            "uevent" => Ok(format!(
                "MAJOR={}\nMINOR={}\nDEVNAME={}\n",
                dev.major(),
                dev.minor(),
                device
            )),
            _ => Err(ENOENT),
        }
    }
}
