use std::io;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;

use ntfslite::{FileDisk, Image, NodeManager, Shell, Volume};

#[derive(Parser, Debug)]
#[command(name = "ntfslite", version)]
#[command(about = "Single-file NTFS-inspired filesystem with an interactive shell")]
struct Cli {
    /// Path of the partition image file. A missing file starts unformatted.
    image: PathBuf,

    /// Signature written into the boot record by the `format` command.
    #[arg(long, default_value = "ntfs")]
    signature: String,

    /// Description written into the boot record by the `format` command.
    #[arg(long, default_value = "ntfslite partition")]
    description: String,

    /// Worker threads used by the `check` command.
    #[arg(long, default_value_t = 4)]
    check_workers: usize,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    let disk = FileDisk::open(&cli.image)
        .with_context(|| format!("cannot open partition file {}", cli.image.display()))?;
    let image = Image::open(disk)
        .with_context(|| format!("cannot read partition file {}", cli.image.display()))?;

    let volume = Volume::new(NodeManager::new(image));
    let mut shell = Shell::new(volume, cli.signature, cli.description, cli.check_workers);

    let stdin = io::stdin();
    let stdout = io::stdout();
    shell.run(&mut stdin.lock(), &mut stdout.lock())?;
    Ok(())
}
