//! Character device numbers, regions and the cdev map.
//!
//! C headers: [`include/linux/cdev.h`](../../../../include/linux/cdev.h),
//! [`include/linux/kdev_t.h`](../../../../include/linux/kdev_t.h)

use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    sync::{Arc, Weak},
    vec::Vec,
};
use core::{
    fmt::{self, Write},
    ops::Range,
};

use crate::{
    error::{linux_err::*, KernelResult as Result},
    fs::file_operations::{CdevOps, FileOperations, Registered},
    module::ThisModule,
    pr_err, Kernel,
};

pub const MINORBITS: u32 = 20;
pub const MINORMASK: u32 = (1 << MINORBITS) - 1;
pub const CHRDEV_MAJOR_MAX: u32 = 512;

// Dynamic majors are handed out top-down from these two ranges, see
// fs/char_dev.c.
const CHRDEV_MAJOR_HASH_SIZE: u32 = 255;
const CHRDEV_MAJOR_DYN_END: u32 = 234;
const CHRDEV_MAJOR_DYN_EXT_START: u32 = 511;
const CHRDEV_MAJOR_DYN_EXT_END: u32 = 384;

/// A device number, `MAJOR:MINOR` packed as the kernel's `dev_t`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DevT(u32);

impl DevT {
    /// Equivalent to `MKDEV(major, minor)`.
    pub const fn new(major: u32, minor: u32) -> DevT {
        DevT((major << MINORBITS) | (minor & MINORMASK))
    }

    pub const fn from_raw(raw: u32) -> DevT {
        DevT(raw)
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub const fn major(self) -> u32 {
        self.0 >> MINORBITS
    }

    pub const fn minor(self) -> u32 {
        self.0 & MINORMASK
    }
}

impl fmt::Display for DevT {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major(), self.minor())
    }
}

impl fmt::Debug for DevT {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DevT({}:{})", self.major(), self.minor())
    }
}

struct CharDeviceRegion {
    major: u32,
    baseminor: u32,
    minorct: u32,
    name: String,
}

impl CharDeviceRegion {
    fn overlaps(&self, major: u32, baseminor: u32, minorct: u32) -> bool {
        self.major == major
            && baseminor < self.baseminor + self.minorct
            && self.baseminor < baseminor + minorct
    }
}

pub(crate) struct ChrdevTable {
    regions: Vec<CharDeviceRegion>,
    cdevs: BTreeMap<DevT, Arc<dyn CdevOps>>,
}

impl ChrdevTable {
    pub(crate) fn new() -> Self {
        ChrdevTable {
            regions: Vec::new(),
            cdevs: BTreeMap::new(),
        }
    }

    fn major_in_use(&self, major: u32) -> bool {
        self.regions.iter().any(|r| r.major == major)
    }

    fn find_dynamic_major(&self) -> Result<u32> {
        (CHRDEV_MAJOR_DYN_END..CHRDEV_MAJOR_HASH_SIZE)
            .rev()
            .chain((CHRDEV_MAJOR_DYN_EXT_END..=CHRDEV_MAJOR_DYN_EXT_START).rev())
            .find(|major| !self.major_in_use(*major))
            .ok_or(EBUSY)
    }

    /// Registers a single major/minor range; `major == 0` picks a dynamic one.
    fn register(&mut self, major: u32, baseminor: u32, minorct: u32, name: &str) -> Result<u32> {
        if major >= CHRDEV_MAJOR_MAX {
            pr_err!(
                "CHRDEV \"{}\" major requested ({}) is greater than the maximum ({})",
                name,
                major,
                CHRDEV_MAJOR_MAX - 1
            );
            return Err(EINVAL);
        }
        if minorct == 0 || baseminor > MINORMASK || minorct > MINORMASK + 1 - baseminor {
            pr_err!(
                "CHRDEV \"{}\" minor range requested ({}-{}) is out of range of maximum range ({}-{}) for a single major",
                name,
                baseminor,
                baseminor as u64 + minorct as u64,
                0,
                MINORMASK
            );
            return Err(EINVAL);
        }
        let major = match major {
            0 => self.find_dynamic_major().inspect_err(|_| {
                pr_err!("CHRDEV \"{}\" dynamic allocation region is full", name);
            })?,
            major => major,
        };
        if self
            .regions
            .iter()
            .any(|r| r.overlaps(major, baseminor, minorct))
        {
            return Err(EBUSY);
        }
        self.regions.push(CharDeviceRegion {
            major,
            baseminor,
            minorct,
            name: name.to_string(),
        });
        Ok(major)
    }

    fn unregister(&mut self, major: u32, baseminor: u32, minorct: u32) {
        if let Some(idx) = self
            .regions
            .iter()
            .position(|r| r.major == major && r.baseminor == baseminor && r.minorct == minorct)
        {
            self.regions.remove(idx);
        }
    }
}

/// Splits `[from, from + count)` at major boundaries.
fn major_chunks(from: DevT, count: u32) -> Result<Vec<(DevT, u32)>> {
    let to = from.raw().checked_add(count).ok_or(EINVAL)?;
    let mut chunks = Vec::new();
    let mut n = from.raw();
    while n < to {
        let next_major = (u64::from(DevT::from_raw(n).major()) + 1) << MINORBITS;
        let next = next_major.min(u64::from(to)) as u32;
        chunks.push((DevT::from_raw(n), next - n));
        n = next;
    }
    Ok(chunks)
}

impl Kernel {
    /// Equivalent to `alloc_chrdev_region`.
    pub(crate) fn alloc_chrdev_region(&self, baseminor: u32, count: u32, name: &str) -> Result<DevT> {
        let major = self.chrdevs.lock().register(0, baseminor, count, name)?;
        Ok(DevT::new(major, baseminor))
    }

    /// Equivalent to `register_chrdev_region`. Ranges spanning several majors
    /// are registered per major and rolled back as a whole on failure.
    pub(crate) fn register_chrdev_region(&self, from: DevT, count: u32, name: &str) -> Result {
        if count == 0 {
            return Err(EINVAL);
        }
        let chunks = major_chunks(from, count)?;
        let mut table = self.chrdevs.lock();
        for (done, (dev, n)) in chunks.iter().enumerate() {
            if let Err(e) = table.register(dev.major(), dev.minor(), *n, name) {
                for (dev, n) in &chunks[..done] {
                    table.unregister(dev.major(), dev.minor(), *n);
                }
                return Err(e);
            }
        }
        Ok(())
    }

    /// Equivalent to `unregister_chrdev_region`.
    pub(crate) fn unregister_chrdev_region(&self, from: DevT, count: u32) {
        let Ok(chunks) = major_chunks(from, count) else {
            return;
        };
        let mut table = self.chrdevs.lock();
        for (dev, n) in chunks {
            table.unregister(dev.major(), dev.minor(), n);
        }
    }

    pub(crate) fn lookup_cdev(&self, dev: DevT) -> Option<Arc<dyn CdevOps>> {
        self.chrdevs.lock().cdevs.get(&dev).cloned()
    }

    /// Renders the character device half of `/proc/devices`.
    pub fn proc_devices(&self) -> String {
        let table = self.chrdevs.lock();
        let mut regions: Vec<_> = table.regions.iter().collect();
        regions.sort_by_key(|r| (r.major, r.baseminor));
        let mut out = String::from("Character devices:\n");
        for r in regions {
            let _ = writeln!(out, "{:>3} {}", r.major, r.name);
        }
        out
    }
}

/// A registered range of device numbers.
///
/// The range is unregistered when this is dropped.
pub struct ChrdevRegion {
    kernel: Weak<Kernel>,
    first: DevT,
    count: u32,
}

impl ChrdevRegion {
    /// Allocates `count` minors under a free dynamic major.
    pub fn alloc(kernel: &Arc<Kernel>, baseminor: u32, count: u32, name: &str) -> Result<Self> {
        let first = kernel.alloc_chrdev_region(baseminor, count, name)?;
        Ok(ChrdevRegion {
            kernel: Arc::downgrade(kernel),
            first,
            count,
        })
    }

    /// Claims the fixed range starting at `first`.
    pub fn register(kernel: &Arc<Kernel>, first: DevT, count: u32, name: &str) -> Result<Self> {
        kernel.register_chrdev_region(first, count, name)?;
        Ok(ChrdevRegion {
            kernel: Arc::downgrade(kernel),
            first,
            count,
        })
    }

    pub fn first(&self) -> DevT {
        self.first
    }
}

impl Drop for ChrdevRegion {
    fn drop(&mut self) {
        if let Some(kernel) = self.kernel.upgrade() {
            kernel.unregister_chrdev_region(self.first, self.count);
        }
    }
}

/// A character device: file operations bound to device numbers.
///
/// Dropping a `Cdev` that was added is `cdev_del`. Files already open through
/// it keep working until they are closed.
pub struct Cdev {
    ops: Arc<dyn CdevOps>,
    added: Option<(Weak<Kernel>, DevT, u32)>,
}

impl Cdev {
    /// Equivalent to `cdev_init`: binds `T`'s operations and the data handed
    /// to every `open`. `owner` is pinned while files are open.
    pub fn new<T: FileOperations>(data: T::OpenData, owner: Option<&ThisModule>) -> Cdev {
        Cdev {
            ops: Arc::new(Registered::<T>::new(data, owner.cloned())),
            added: None,
        }
    }

    /// Equivalent to `cdev_add`: makes the device live for `count` numbers
    /// starting at `dev`.
    pub fn add(&mut self, kernel: &Arc<Kernel>, dev: DevT, count: u32) -> Result {
        if self.added.is_some() {
            return Err(EBUSY);
        }
        let devs: Vec<DevT> = (dev.raw()..dev.raw().checked_add(count).ok_or(EINVAL)?)
            .map(DevT::from_raw)
            .collect();
        if devs.is_empty() {
            return Err(EINVAL);
        }
        let mut table = kernel.chrdevs.lock();
        if devs.iter().any(|d| table.cdevs.contains_key(d)) {
            return Err(EBUSY);
        }
        for d in devs {
            table.cdevs.insert(d, self.ops.clone());
        }
        self.added = Some((Arc::downgrade(kernel), dev, count));
        Ok(())
    }

    /// The first device number this cdev was added under.
    pub fn dev(&self) -> Option<DevT> {
        self.added.as_ref().map(|(_, dev, _)| *dev)
    }
}

impl Drop for Cdev {
    fn drop(&mut self) {
        let Some((kernel, _, _)) = self.added.take() else {
            return;
        };
        let Some(kernel) = kernel.upgrade() else {
            return;
        };
        let ours = Arc::as_ptr(&self.ops) as *const ();
        kernel
            .chrdevs
            .lock()
            .cdevs
            .retain(|_, ops| Arc::as_ptr(ops) as *const () != ours);
    }
}

/// Creates a [`Builder`] for a dynamically allocated region named `name`
/// covering `minors`.
pub fn builder(kernel: &Arc<Kernel>, name: &str, minors: Range<u32>) -> Result<Builder> {
    if minors.is_empty() {
        return Err(EINVAL);
    }
    Ok(Builder {
        kernel: kernel.clone(),
        name: name.to_string(),
        minors,
        owner: None,
        cdevs: Vec::new(),
    })
}

/// Collects the devices of a [`Registration`] before any of them goes live.
pub struct Builder {
    kernel: Arc<Kernel>,
    name: String,
    minors: Range<u32>,
    owner: Option<ThisModule>,
    cdevs: Vec<Cdev>,
}

impl Builder {
    /// Pins `module` while files of devices registered after this call are
    /// open.
    pub fn owner(mut self, module: &ThisModule) -> Self {
        self.owner = Some(module.clone());
        self
    }

    /// Adds a device served by `T`. Devices get consecutive minors in the
    /// order they are registered.
    pub fn register_device<T: FileOperations>(mut self, data: T::OpenData) -> Self {
        self.cdevs.push(Cdev::new::<T>(data, self.owner.as_ref()));
        self
    }

    pub fn build(self) -> Result<Registration> {
        let count = self.minors.end - self.minors.start;
        if self.cdevs.len() > count as usize {
            pr_err!(
                "CHRDEV \"{}\": {} devices for {} minors",
                self.name,
                self.cdevs.len(),
                count
            );
            return Err(EINVAL);
        }
        let region = ChrdevRegion::alloc(&self.kernel, self.minors.start, count, &self.name)?;
        let mut cdevs = self.cdevs;
        let major = region.first().major();
        for (minor, cdev) in (self.minors.start..).zip(cdevs.iter_mut()) {
            cdev.add(&self.kernel, DevT::new(major, minor), 1)?;
        }
        Ok(Registration {
            cdevs,
            region,
        })
    }
}

/// A region plus the cdevs living in it.
///
/// Dropping it deletes the cdevs, then releases the region.
pub struct Registration {
    cdevs: Vec<Cdev>,
    region: ChrdevRegion,
}

impl Registration {
    pub fn first(&self) -> DevT {
        self.region.first()
    }

    /// Device number of the `index`-th registered device.
    pub fn dev(&self, index: usize) -> Option<DevT> {
        self.cdevs.get(index).and_then(Cdev::dev)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::file_operations::File;

    struct Nop;

    impl FileOperations for Nop {
        type OpenData = ();

        fn open(_data: &(), _file: &File) -> Result<Self> {
            Ok(Nop)
        }
    }

    #[test]
    fn devt_packing() {
        let dev = DevT::new(254, 3);
        assert_eq!(dev.major(), 254);
        assert_eq!(dev.minor(), 3);
        assert_eq!(dev.raw(), (254 << 20) | 3);
        assert_eq!(alloc::format!("{}", dev), "254:3");
    }

    #[test]
    fn dynamic_majors_count_down() {
        let kernel = Kernel::new();
        let a = ChrdevRegion::alloc(&kernel, 0, 1, "a").unwrap();
        let b = ChrdevRegion::alloc(&kernel, 0, 4, "b").unwrap();
        assert_eq!(a.first(), DevT::new(254, 0));
        assert_eq!(b.first(), DevT::new(253, 0));
        drop(a);
        let c = ChrdevRegion::alloc(&kernel, 2, 1, "c").unwrap();
        assert_eq!(c.first(), DevT::new(254, 2));
    }

    #[test]
    fn dynamic_majors_spill_into_extended_range() {
        let kernel = Kernel::new();
        let mut regions = Vec::new();
        for _ in CHRDEV_MAJOR_DYN_END..CHRDEV_MAJOR_HASH_SIZE {
            regions.push(ChrdevRegion::alloc(&kernel, 0, 1, "fill").unwrap());
        }
        let next = ChrdevRegion::alloc(&kernel, 0, 1, "ext").unwrap();
        assert_eq!(next.first().major(), CHRDEV_MAJOR_DYN_EXT_START);
    }

    #[test]
    fn region_validation() {
        let kernel = Kernel::new();
        assert_eq!(
            ChrdevRegion::alloc(&kernel, 0, 0, "zero").err(),
            Some(EINVAL)
        );
        assert_eq!(
            ChrdevRegion::alloc(&kernel, MINORMASK, 2, "wide").err(),
            Some(EINVAL)
        );
        assert_eq!(
            ChrdevRegion::register(&kernel, DevT::new(600, 0), 1, "big").err(),
            Some(EINVAL)
        );
    }

    #[test]
    fn static_regions_conflict() {
        let kernel = Kernel::new();
        let _a = ChrdevRegion::register(&kernel, DevT::new(42, 0), 4, "a").unwrap();
        assert_eq!(
            ChrdevRegion::register(&kernel, DevT::new(42, 3), 2, "b").err(),
            Some(EBUSY)
        );
        let _c = ChrdevRegion::register(&kernel, DevT::new(42, 4), 2, "c").unwrap();
    }

    #[test]
    fn static_region_spanning_majors_rolls_back() {
        let kernel = Kernel::new();
        let _blocker = ChrdevRegion::register(&kernel, DevT::new(61, 0), 1, "blocker").unwrap();
        let start = DevT::new(60, MINORMASK - 1);
        assert_eq!(
            ChrdevRegion::register(&kernel, start, 4, "span").err(),
            Some(EBUSY)
        );
        // Major 60 was released again.
        let _ok = ChrdevRegion::register(&kernel, start, 2, "again").unwrap();
    }

    #[test]
    fn proc_devices_lists_regions() {
        let kernel = Kernel::new();
        let region = ChrdevRegion::alloc(&kernel, 0, 1, "pcd_devices").unwrap();
        assert_eq!(kernel.proc_devices(), "Character devices:\n254 pcd_devices\n");
        drop(region);
        assert_eq!(kernel.proc_devices(), "Character devices:\n");
    }

    #[test]
    fn cdev_add_and_del() {
        let kernel = Kernel::new();
        let dev = DevT::new(100, 0);
        let mut cdev = Cdev::new::<Nop>((), None);
        cdev.add(&kernel, dev, 2).unwrap();
        assert_eq!(cdev.dev(), Some(dev));
        assert!(kernel.lookup_cdev(DevT::new(100, 1)).is_some());
        assert_eq!(cdev.add(&kernel, dev, 1), Err(EBUSY));

        let mut other = Cdev::new::<Nop>((), None);
        assert_eq!(other.add(&kernel, DevT::new(100, 1), 1), Err(EBUSY));
        assert_eq!(other.add(&kernel, DevT::new(100, 2), 0), Err(EINVAL));

        drop(cdev);
        assert!(kernel.lookup_cdev(dev).is_none());
        other.add(&kernel, dev, 1).unwrap();
    }

    #[test]
    fn registration_builder() {
        let kernel = Kernel::new();
        let reg = builder(&kernel, "chrdev-tests", 0..3)
            .unwrap()
            .register_device::<Nop>(())
            .register_device::<Nop>(())
            .build()
            .unwrap();
        let major = reg.first().major();
        assert_eq!(reg.dev(1), Some(DevT::new(major, 1)));
        assert_eq!(reg.dev(2), None);
        assert!(kernel.lookup_cdev(DevT::new(major, 0)).is_some());
        assert!(kernel.lookup_cdev(DevT::new(major, 2)).is_none());
        drop(reg);
        assert!(kernel.lookup_cdev(DevT::new(major, 0)).is_none());
        assert_eq!(kernel.proc_devices(), "Character devices:\n");
    }

    #[test]
    fn registration_needs_enough_minors() {
        let kernel = Kernel::new();
        assert!(builder(&kernel, "none", 0..0).is_err());
        let too_many = builder(&kernel, "one", 0..1)
            .unwrap()
            .register_device::<Nop>(())
            .register_device::<Nop>(())
            .build();
        assert_eq!(too_many.err(), Some(EINVAL));
        assert_eq!(kernel.proc_devices(), "Character devices:\n");
    }
}
