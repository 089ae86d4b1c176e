//! The kernel instance the model's subsystems hang off.
//!
//! Every table that is a process-wide global in the real kernel (char device
//! majors, the cdev map, sysfs classes, devtmpfs nodes, loaded modules) lives
//! in one [`Kernel`] value, so independent instances can coexist.

use alloc::{sync::Arc, vec::Vec};

use spin::Mutex;

use crate::{chrdev::ChrdevTable, device::SysfsTable, module::ModuleTable};

pub struct Kernel {
    pub(crate) chrdevs: Mutex<ChrdevTable>,
    pub(crate) sysfs: Mutex<SysfsTable>,
    pub(crate) modules: Mutex<ModuleTable>,
}

impl Kernel {
    /// Boots an empty kernel: no majors, classes, nodes or modules.
    pub fn new() -> Arc<Kernel> {
        crate::logger::init_logger();
        Arc::new(Kernel {
            chrdevs: Mutex::new(ChrdevTable::new()),
            sysfs: Mutex::new(SysfsTable::new()),
            modules: Mutex::new(ModuleTable::new()),
        })
    }
}

impl Drop for Kernel {
    fn drop(&mut self) {
        // Unload in reverse load order.
        let instances: Vec<_> = self.modules.get_mut().drain_instances();
        for instance in instances.into_iter().rev() {
            drop(instance);
        }
    }
}
