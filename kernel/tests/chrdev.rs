use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use kernel::{
    buf::{UserSlicePtrReader, UserSlicePtrWriter},
    chrdev::{self, DevT, Registration},
    code::*,
    device::{Class, Device},
    error::KernelResult,
    fs::{self, File, FileFlags},
    module, Kernel, Module, ThisModule,
};

struct CycleFile;

impl fs::FileOperations for CycleFile {
    type OpenData = ();

    fn open(_data: &(), _file: &File) -> KernelResult<Self> {
        Ok(CycleFile)
    }

    const READ: fs::ReadFn<Self> = Some(
        |_this: &Self,
         _file: &File,
         buf: &mut UserSlicePtrWriter,
         offset: &mut u64|
         -> KernelResult<usize> {
            let n = buf.len();
            for c in b"123456789"
                .iter()
                .cycle()
                .skip((*offset % 9) as _)
                .take(n)
            {
                buf.write_slice(&[*c])?;
            }
            *offset += n as u64;
            Ok(n)
        },
    );
}

struct SeekFile;

impl fs::FileOperations for SeekFile {
    type OpenData = ();

    fn open(_data: &(), _file: &File) -> KernelResult<Self> {
        Ok(SeekFile)
    }

    const SEEK: fs::SeekFn<Self> = Some(
        |_this: &Self, _file: &File, _offset: fs::SeekFrom| -> KernelResult<u64> { Ok(1234) },
    );
}

struct WriteFile {
    written: Arc<AtomicUsize>,
}

impl fs::FileOperations for WriteFile {
    type OpenData = Arc<AtomicUsize>;

    fn open(data: &Arc<AtomicUsize>, _file: &File) -> KernelResult<Self> {
        Ok(WriteFile {
            written: data.clone(),
        })
    }

    const READ: fs::ReadFn<Self> = Some(
        |this: &Self,
         _file: &File,
         buf: &mut UserSlicePtrWriter,
         _offset: &mut u64|
         -> KernelResult<usize> {
            let val = this.written.load(Ordering::SeqCst).to_string();
            buf.write_slice(val.as_bytes())?;
            Ok(val.len())
        },
    );

    const WRITE: fs::WriteFn<Self> = Some(
        |this: &Self,
         _file: &File,
         buf: &mut UserSlicePtrReader,
         _offset: &mut u64|
         -> KernelResult<usize> {
            let data = buf.read_all()?;
            this.written.fetch_add(data.len(), Ordering::SeqCst);
            Ok(data.len())
        },
    );
}

struct ChrdevTestModule {
    _nodes: Vec<Device>,
    _class: Class,
    _registration: Registration,
}

impl Module for ChrdevTestModule {
    fn init(kernel: &Arc<Kernel>, module: &ThisModule) -> KernelResult<Self> {
        let registration = chrdev::builder(kernel, "chrdev-tests", 0..3)?
            .owner(module)
            .register_device::<CycleFile>(())
            .register_device::<SeekFile>(())
            .register_device::<WriteFile>(Arc::new(AtomicUsize::new(0)))
            .build()?;
        let class = Class::create(kernel, "chrdev-tests")?;
        let mut nodes = Vec::new();
        for (i, name) in ["cycle", "seek", "write"].iter().enumerate() {
            let dev = registration.dev(i).ok_or(ENODEV)?;
            nodes.push(class.device_create(dev, name)?);
        }
        Ok(ChrdevTestModule {
            _nodes: nodes,
            _class: class,
            _registration: registration,
        })
    }
}

module! {
    type: ChrdevTestModule,
    name: "ChrdevTestModule",
    author: "Rust for Linux Contributors",
    description: "A module for testing character devices",
    license: "GPL",
}

fn boot() -> Arc<Kernel> {
    let kernel = Kernel::new();
    kernel.insmod::<ChrdevTestModule>("").unwrap();
    kernel
}

#[test]
fn cycle_file_reads_and_advances() {
    let kernel = boot();
    let mut f = kernel.open("/dev/cycle", FileFlags::O_RDONLY).unwrap();
    let mut buf = [0u8; 12];
    assert_eq!(f.read(&mut buf), Ok(12));
    assert_eq!(&buf, b"123456789123");
    assert_eq!(f.pos(), 12);
    let mut buf = [0u8; 3];
    f.read(&mut buf).unwrap();
    assert_eq!(&buf, b"456");
}

#[test]
fn missing_entries_follow_the_vfs() {
    let kernel = boot();
    let mut cycle = kernel.open("/dev/cycle", FileFlags::O_RDWR).unwrap();
    assert_eq!(cycle.write(b"x"), Err(EINVAL));
    assert_eq!(cycle.llseek(0, fs::SEEK_SET), Err(ESPIPE));

    let mut seek = kernel.open("/dev/seek", FileFlags::O_RDWR).unwrap();
    assert_eq!(seek.llseek(0, fs::SEEK_END), Ok(1234));
    assert_eq!(seek.pos(), 1234);
    let mut buf = [0u8; 1];
    assert_eq!(seek.read(&mut buf), Err(EINVAL));
}

#[test]
fn write_file_counts_across_opens() {
    let kernel = boot();
    let mut w = kernel.open("/dev/write", FileFlags::O_WRONLY).unwrap();
    assert_eq!(w.write(b"hello"), Ok(5));
    drop(w);
    let mut r = kernel.open("/dev/write", FileFlags::O_RDONLY).unwrap();
    let mut buf = [0u8; 8];
    let n = r.read(&mut buf).unwrap();
    assert_eq!(&buf[..n], b"5");
}

#[test]
fn open_errors() {
    let kernel = boot();
    assert_eq!(
        kernel.open("/dev/missing", FileFlags::O_RDONLY).err(),
        Some(ENOENT)
    );

    // A node whose number has no cdev behind it.
    let class = Class::create(&kernel, "orphans").unwrap();
    let _node = class.device_create(DevT::new(7, 7), "orphan").unwrap();
    assert_eq!(
        kernel.open("/dev/orphan", FileFlags::O_RDONLY).err(),
        Some(ENXIO)
    );
}

#[test]
fn open_files_keep_the_module_loaded() {
    let kernel = boot();
    let f = kernel.open("/dev/seek", FileFlags::O_RDONLY).unwrap();
    assert_eq!(kernel.rmmod("ChrdevTestModule"), Err(EBUSY));
    drop(f);
    assert_eq!(kernel.rmmod("ChrdevTestModule"), Ok(()));
    assert!(kernel.list_dev().is_empty());
}

#[test]
fn registration_numbers_are_consecutive() {
    let kernel = Kernel::new();
    kernel.insmod::<ChrdevTestModule>("").unwrap();
    let nodes = kernel.list_dev();
    let cycle = nodes.iter().find(|(p, _)| p == "/dev/cycle").unwrap().1;
    let write = nodes.iter().find(|(p, _)| p == "/dev/write").unwrap().1;
    assert_eq!(cycle.major(), write.major());
    assert_eq!(write.minor(), cycle.minor() + 2);
    assert_eq!(
        kernel.read_sysfs("/sys/class/chrdev-tests/seek/dev").unwrap(),
        format!("{}:1\n", cycle.major())
    );
}
