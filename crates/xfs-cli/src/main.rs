#![forbid(unsafe_code)]

use anyhow::{Context, Result, bail};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::time::SystemTime;
use xfs::{FileType, FsOps, InodeAttr, OpenFs, OpenOptions};

/// Bytes requested per read when streaming a file.
const CHUNK: u32 = 1 << 20;

// ── CLI definition ──────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(name = "xfs-inspect", about = "Read-only inspector for XFS images")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Args)]
struct ImageArgs {
    /// Path to the filesystem image or block device.
    image: PathBuf,
    /// Skip superblock and metadata checksum validation.
    #[arg(long)]
    skip_validation: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Show superblock geometry and space usage.
    Inspect {
        #[command(flatten)]
        image: ImageArgs,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// List a directory.
    Ls {
        #[command(flatten)]
        image: ImageArgs,
        /// Absolute path inside the filesystem.
        #[arg(default_value = "/")]
        path: String,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Show inode attributes for a path.
    Stat {
        #[command(flatten)]
        image: ImageArgs,
        /// Absolute path inside the filesystem.
        path: String,
        /// Output in JSON format.
        #[arg(long)]
        json: bool,
    },
    /// Write a file's contents (or a symlink's target) to stdout.
    Cat {
        #[command(flatten)]
        image: ImageArgs,
        /// Absolute path inside the filesystem.
        path: String,
    },
}

// ── Serializable outputs ────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct InspectOutput {
    volume_name: String,
    format_version: u8,
    block_size: u32,
    sector_size: u16,
    inode_size: u16,
    ag_count: u32,
    ag_blocks: u32,
    dir_block_size: u32,
    has_ftype: bool,
    root_ino: u64,
    total_bytes: u64,
    free_bytes: u64,
    used_bytes: u64,
}

#[derive(Debug, Serialize)]
struct LsEntry {
    ino: u64,
    kind: FileType,
    name: String,
}

#[derive(Debug, Serialize)]
struct LsOutput {
    path: String,
    format: &'static str,
    entries: Vec<LsEntry>,
}

#[derive(Debug, Serialize)]
struct StatOutput {
    path: String,
    data_fork: &'static str,
    #[serde(flatten)]
    attr: InodeAttr,
}

// ── Main ────────────────────────────────────────────────────────────────────

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error:#}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Inspect { image, json } => inspect(&open(&image)?, json),
        Command::Ls { image, path, json } => ls(&open(&image)?, &path, json),
        Command::Stat { image, path, json } => stat(&open(&image)?, &path, json),
        Command::Cat { image, path } => cat(&open(&image)?, &path),
    }
}

fn open(args: &ImageArgs) -> Result<OpenFs> {
    let options = OpenOptions {
        skip_validation: args.skip_validation,
        ..OpenOptions::default()
    };
    OpenFs::open_with_options(&args.image, &options)
        .with_context(|| format!("failed to open XFS image: {}", args.image.display()))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("serialize output")?
    );
    Ok(())
}

fn inspect(fs: &OpenFs, json: bool) -> Result<()> {
    let sb = fs.superblock();
    let geo = fs.geometry();
    let output = InspectOutput {
        volume_name: fs.volume_name().to_owned(),
        format_version: if fs.is_v5() { 5 } else { 4 },
        block_size: geo.block_size,
        sector_size: geo.sector_size,
        inode_size: geo.inode_size,
        ag_count: geo.ag_count,
        ag_blocks: geo.ag_blocks,
        dir_block_size: geo.dir_block_size,
        has_ftype: geo.has_ftype,
        root_ino: sb.root_ino,
        total_bytes: fs.total_space(),
        free_bytes: fs.free_space(),
        used_bytes: fs.usable_space(),
    };

    if json {
        return print_json(&output);
    }
    println!("XFS Inspector");
    println!("volume_name: {}", output.volume_name);
    println!("format_version: v{}", output.format_version);
    println!("block_size: {}", output.block_size);
    println!("sector_size: {}", output.sector_size);
    println!("inode_size: {}", output.inode_size);
    println!("ag_count: {}", output.ag_count);
    println!("ag_blocks: {}", output.ag_blocks);
    println!("dir_block_size: {}", output.dir_block_size);
    println!("ftype: {}", output.has_ftype);
    println!("root_ino: {}", output.root_ino);
    println!("total_bytes: {}", output.total_bytes);
    println!("free_bytes: {}", output.free_bytes);
    println!("used_bytes: {}", output.used_bytes);
    Ok(())
}

fn ls(fs: &OpenFs, path: &str, json: bool) -> Result<()> {
    let (ino, dir) = fs
        .resolve_path(path)
        .with_context(|| format!("cannot resolve {path}"))?;
    let format = fs.directory_format(&dir)?.name();
    let mut entries = Vec::new();
    for entry in fs.read_dir(ino)? {
        let entry = entry.with_context(|| format!("reading directory {path}"))?;
        entries.push(LsEntry {
            ino: entry.ino.0,
            kind: entry.kind,
            name: entry.name_str(),
        });
    }

    if json {
        return print_json(&LsOutput {
            path: path.to_owned(),
            format,
            entries,
        });
    }
    for entry in &entries {
        println!("{:>12} {:<4} {}", entry.ino, kind_tag(entry.kind), entry.name);
    }
    Ok(())
}

fn stat(fs: &OpenFs, path: &str, json: bool) -> Result<()> {
    let (ino, inode) = fs
        .resolve_path(path)
        .with_context(|| format!("cannot resolve {path}"))?;
    let attr = fs.getattr(ino)?;
    let output = StatOutput {
        path: path.to_owned(),
        data_fork: inode.data_fork.format_name(),
        attr,
    };

    if json {
        return print_json(&output);
    }
    let attr = &output.attr;
    println!("path: {}", output.path);
    println!("inode: {}", attr.ino);
    println!("type: {:?}", attr.kind);
    println!("data_fork: {}", output.data_fork);
    println!("size: {}", attr.size);
    println!("blocks: {}", attr.blocks);
    println!("mode: {:04o}", attr.perm);
    println!("links: {}", attr.nlink);
    println!("uid: {} gid: {}", attr.uid, attr.gid);
    println!("atime: {}", epoch_secs(attr.atime));
    println!("mtime: {}", epoch_secs(attr.mtime));
    println!("ctime: {}", epoch_secs(attr.ctime));
    if fs.is_v5() {
        println!("crtime: {}", epoch_secs(attr.crtime));
    }
    Ok(())
}

fn cat(fs: &OpenFs, path: &str) -> Result<()> {
    let (ino, inode) = fs
        .resolve_path(path)
        .with_context(|| format!("cannot resolve {path}"))?;
    let mut out = std::io::stdout().lock();
    if inode.is_symlink() {
        out.write_all(&fs.read_symlink(&inode)?)?;
        out.write_all(b"\n")?;
        return Ok(());
    }
    if !inode.is_regular() {
        bail!("{path} is not a regular file");
    }

    let mut offset = 0_u64;
    while offset < inode.size {
        let data = fs
            .read(ino, offset, CHUNK)
            .with_context(|| format!("reading {path} at offset {offset}"))?;
        if data.is_empty() {
            break;
        }
        out.write_all(&data)?;
        offset += data.len() as u64;
    }
    out.flush()?;
    Ok(())
}

fn kind_tag(kind: FileType) -> &'static str {
    match kind {
        FileType::RegularFile => "file",
        FileType::Directory => "dir",
        FileType::Symlink => "link",
        FileType::BlockDevice => "blk",
        FileType::CharDevice => "chr",
        FileType::Fifo => "fifo",
        FileType::Socket => "sock",
    }
}

fn epoch_secs(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}
