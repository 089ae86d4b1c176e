use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    os::unix::fs::FileTypeExt,
    path::Path,
    process::ExitCode,
    sync::Arc,
};

use clap::Parser;
use command::{run, Commands};
use kernel::{
    fs::{FileFlags, FileHandle},
    printk::dmesg,
    Kernel,
};
use pcd::{PcdDriver, DEFAULT_CLASS_NAME};

mod command;
mod device;

#[derive(Parser)]
#[command(version, about = "Poke at the pcd pseudo character device", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "PATH", default_value = "/dev/pcd")]
    /// The device node to operate on
    device: String,
    #[arg(short, long)]
    /// Run against an in-process kernel with the pcd module loaded
    emulate: bool,
    #[arg(short, long)]
    /// Print the kernel log after an emulated run
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

fn node_name(path: &str) -> &str {
    Path::new(path)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(path)
}

fn run_real(cli: &Cli, out: &mut impl Write) -> io::Result<()> {
    let name = node_name(&cli.device);
    if let Commands::Info = cli.command {
        let meta = fs::metadata(&cli.device)?;
        let attr = format!("/sys/class/{}/{}/dev", DEFAULT_CLASS_NAME, name);
        let dev = fs::read_to_string(&attr)?;
        writeln!(out, "{}: char device {}", cli.device, meta.file_type().is_char_device())?;
        write!(out, "dev {}", dev)?;
        return Ok(());
    }
    let mut file: File = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&cli.device)?;
    run(&cli.command, &mut file, out)
}

fn run_emulated(cli: &Cli, out: &mut impl Write) -> io::Result<()> {
    let name = node_name(&cli.device);
    let kernel: Arc<Kernel> = Kernel::new();
    kernel.insmod::<PcdDriver>(&format!("device_name={}", name))?;
    let path = format!("/dev/{}", name);
    if let Commands::Info = cli.command {
        let attr = format!("/sys/class/{}/{}/dev", DEFAULT_CLASS_NAME, name);
        write!(out, "{}: dev {}", path, kernel.read_sysfs(&attr)?)?;
        write!(out, "{}", kernel.proc_devices())?;
        return Ok(());
    }
    let mut handle: FileHandle = kernel.open(&path, FileFlags::O_RDWR)?;
    let result = run(&cli.command, &mut handle, out);
    drop(handle);
    kernel.rmmod("pcd")?;
    if cli.verbose {
        for record in dmesg() {
            writeln!(out, "{}", record)?;
        }
    }
    result
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let mut out = io::stdout().lock();
    let result = if cli.emulate {
        run_emulated(&cli, &mut out)
    } else {
        run_real(&cli, &mut out)
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pcdctl: {}: {}", cli.device, e);
            ExitCode::FAILURE
        }
    }
}
