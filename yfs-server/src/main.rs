//! Serves a YFS disk image to requests read from stdin, one per line.
//!
//! ```text
//! $ yfs-server disk.img --format <<EOF
//! mkdir /a
//! create /a/f
//! write 3 0 hello
//! shutdown
//! EOF
//! ```

mod script;

use std::fs::OpenOptions;
use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use tracing_subscriber::EnvFilter;
use yfs::io::{FileBlockEmulator, FileBlockEmulatorBuilder};
use yfs::layout::BLOCK_SIZE;
use yfs::server::Server;
use yfs::{FormatOptions, Yfs};

use crate::script::ScriptTransport;

#[derive(Parser)]
struct Args {
    /// Disk image holding the file system
    image: PathBuf,

    /// Lay down a fresh file system first, erasing the image
    #[arg(long)]
    format: bool,

    /// Total blocks when formatting
    #[arg(long, default_value_t = 1024)]
    blocks: u32,

    /// Inodes when formatting
    #[arg(long, default_value_t = 128)]
    inodes: u32,
}

fn format_image(args: &Args) -> Result<Yfs<FileBlockEmulator>> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .open(&args.image)
        .with_context(|| format!("cannot open {}", args.image.display()))?;
    let dev = FileBlockEmulatorBuilder::from(file)
        .with_block_count(args.blocks as usize)
        .build()?;
    let options = FormatOptions::new()
        .with_blocks(args.blocks)
        .with_inodes(args.inodes);
    Ok(Yfs::format(dev, options)?)
}

fn mount_image(args: &Args) -> Result<Yfs<FileBlockEmulator>> {
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .open(&args.image)
        .with_context(|| format!("cannot open {}", args.image.display()))?;
    let len = file
        .metadata()
        .with_context(|| format!("cannot stat {}", args.image.display()))?
        .len();
    let dev = FileBlockEmulatorBuilder::from(file)
        .with_block_count(len as usize / BLOCK_SIZE)
        .clear_medium(false)
        .build()
        .with_context(|| format!("{} holds no whole block", args.image.display()))?;
    Yfs::mount(dev).with_context(|| format!("cannot mount {}", args.image.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(io::stderr)
        .init();

    let args = Args::parse();
    let fs = if args.format {
        format_image(&args)?
    } else {
        mount_image(&args)?
    };
    info!(
        "serving {} ({} blocks)",
        args.image.display(),
        fs.store().header().num_blocks()
    );

    let mut transport = ScriptTransport::new(io::stdin().lock(), io::stdout().lock());
    Server::new(fs).serve(&mut transport)?;
    Ok(())
}
