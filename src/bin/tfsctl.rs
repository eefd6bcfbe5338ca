use clap::{Parser, Subcommand};
use log::{error, info, warn};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::{Arc, Barrier};
use std::thread;
use tfs::{Config, FileSystem, OpenFlags, Result, BLOCK_SIZE};

#[derive(Parser)]
#[command(name = "tfsctl", version, about = "Drive an in-memory tfs instance")]
struct Cli {
    /// Spin iterations emulating storage latency [default: $TFS_DELAY or 5000]
    #[arg(long, global = true)]
    delay: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Load a host file into a fresh instance, then copy it back out
    Copy {
        source: PathBuf,
        dest: PathBuf,
        /// Name of the file inside tfs
        #[arg(long, default_value = "/f1")]
        name: String,
    },
    /// Write distinct files from concurrent threads and verify them
    Stress {
        #[arg(long, default_value_t = 4)]
        threads: usize,
        #[arg(long, default_value_t = 20480)]
        bytes: usize,
    },
}

fn copy(fs: &FileSystem, source: PathBuf, dest: PathBuf, name: &str) -> Result<()> {
    let content = std::fs::read(&source)?;
    let handle = fs.open(name, OpenFlags::CREATE | OpenFlags::TRUNCATE)?;
    let mut written = 0;
    while written < content.len() {
        let n = fs.write(handle, &content[written..])?;
        if n == 0 {
            break;
        }
        written += n;
    }
    fs.close(handle)?;
    if written < content.len() {
        warn!(
            "{}: only {written} of {} bytes fit in {name}",
            source.display(),
            content.len()
        );
    }

    fs.copy_to_external(name, &dest)?;
    info!("{} -> {name} -> {}", source.display(), dest.display());
    Ok(())
}

fn fill(thread: usize) -> u8 {
    b'a' + (thread % 26) as u8
}

fn stress_one(fs: &FileSystem, thread: usize, bytes: usize) -> Result<bool> {
    let path = format!("/t{thread}");
    let handle = fs.open(&path, OpenFlags::CREATE)?;
    let chunk = [fill(thread); BLOCK_SIZE];
    let mut written = 0;
    while written < bytes {
        let n = fs.write(handle, &chunk[..BLOCK_SIZE.min(bytes - written)])?;
        if n == 0 {
            break;
        }
        written += n;
    }

    fs.seek(handle, 0)?;
    let mut buf = [0u8; BLOCK_SIZE];
    let mut read = 0;
    let mut intact = true;
    loop {
        let n = fs.read(handle, &mut buf)?;
        if n == 0 {
            break;
        }
        intact &= buf[..n].iter().all(|&b| b == fill(thread));
        read += n;
    }
    fs.close(handle)?;
    Ok(intact && read == written && written == bytes)
}

/// Number of threads whose file did not read back intact.
fn stress(fs: Arc<FileSystem>, threads: usize, bytes: usize) -> Result<usize> {
    let barrier = Arc::new(Barrier::new(threads));
    let workers: Vec<_> = (0..threads)
        .map(|thread| {
            let fs = Arc::clone(&fs);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                stress_one(&fs, thread, bytes)
            })
        })
        .collect();

    let mut failed = 0;
    for (thread, worker) in workers.into_iter().enumerate() {
        match worker.join() {
            Ok(Ok(true)) => {}
            Ok(Ok(false)) => {
                error!("thread {thread}: content mismatch");
                failed += 1;
            }
            Ok(Err(e)) => {
                error!("thread {thread}: {e}");
                failed += 1;
            }
            Err(_) => {
                error!("thread {thread} panicked");
                failed += 1;
            }
        }
    }

    let stats = fs.statfs()?;
    println!(
        "{threads} threads x {bytes} bytes: {} ok, {failed} failed; {} free blocks, {} free inodes",
        threads - failed,
        stats.free_blocks,
        stats.free_inodes
    );
    for (name, inumber) in fs.read_dir()? {
        let stat = fs.stat(&format!("/{name}"))?;
        println!("{inumber:>4} {:>8} /{name}", stat.size);
    }
    Ok(failed)
}

fn run(cli: Cli) -> Result<ExitCode> {
    let mut config = Config::from_env();
    if let Some(delay) = cli.delay {
        config.delay = delay;
    }
    let fs = Arc::new(FileSystem::init(config)?);

    let code = match cli.command {
        Command::Copy { source, dest, name } => {
            copy(&fs, source, dest, &name)?;
            ExitCode::SUCCESS
        }
        Command::Stress { threads, bytes } => match stress(Arc::clone(&fs), threads, bytes)? {
            0 => ExitCode::SUCCESS,
            _ => ExitCode::FAILURE,
        },
    };

    if let Ok(fs) = Arc::try_unwrap(fs) {
        fs.destroy()?;
    }
    Ok(code)
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();
    match run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("tfsctl: {e}");
            ExitCode::FAILURE
        }
    }
}
