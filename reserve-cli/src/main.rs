use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use reserve_core::container::MARKER_LEN;
use reserve_core::locate::{population_files, population_index};
use reserve_core::{DecompressedContainer, ReserveError, Result};

#[derive(Debug, Parser)]
#[command(name = "reserve-edit", version, about = "Inspect and repack reserve population containers")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Print header sizes and payload details of a container.
    Info { file: PathBuf },
    /// Write the inflated payload (without the marker) to a file.
    Unpack {
        file: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Recompress an edited payload using the header and marker of an
    /// existing container.
    Pack {
        payload: PathBuf,
        #[arg(long, value_name = "CONTAINER")]
        template: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Check that a container survives a decompress/recompress cycle.
    Verify { file: PathBuf },
    /// List population containers below a directory.
    Scan { dir: PathBuf },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    if let Err(err) = run(args.command) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(command: Command) -> Result<()> {
    match command {
        Command::Info { file } => info_cmd(&file),
        Command::Unpack { file, output } => unpack_cmd(&file, &output),
        Command::Pack {
            payload,
            template,
            output,
        } => pack_cmd(&payload, &template, &output),
        Command::Verify { file } => verify_cmd(&file),
        Command::Scan { dir } => {
            for path in population_files(&dir)? {
                let size = fs::metadata(&path)?.len();
                let index = population_index(&path).unwrap_or_default();
                println!("{index:>3}  {size:>10}  {}", path.display());
            }
            Ok(())
        }
    }
}

fn info_cmd(file: &Path) -> Result<()> {
    let container = DecompressedContainer::read_file(file)?;
    let [first, second] = container.decompressed_size_fields();
    println!("file:            {}", file.display());
    println!("size fields:     {first} / {second}");
    println!("inflated length: {}", MARKER_LEN + container.data.len());
    println!("marker:          {:02x?}", container.marker);
    println!("payload length:  {}", container.data.len());
    if let Some(version) = container.data.get(4..8) {
        let version = u32::from_le_bytes([version[0], version[1], version[2], version[3]]);
        println!("payload version: {version}");
    }
    Ok(())
}

fn unpack_cmd(file: &Path, output: &Path) -> Result<()> {
    let container = DecompressedContainer::read_file(file)?;
    fs::write(output, &container.data)?;
    info!(bytes = container.data.len(), path = %output.display(), "payload written");
    Ok(())
}

fn pack_cmd(payload: &Path, template: &Path, output: &Path) -> Result<()> {
    let template = DecompressedContainer::read_file(template)?;
    let container = template.with_payload(fs::read(payload)?);
    container.write_file(output)?;
    info!(path = %output.display(), bytes = container.data.len(), "container written");
    Ok(())
}

fn verify_cmd(file: &Path) -> Result<()> {
    let raw = fs::read(file)?;
    let container = DecompressedContainer::decompress(&raw)?;
    let repacked = DecompressedContainer::decompress(&container.recompress()?)?;
    if repacked.file_header != container.file_header
        || repacked.marker != container.marker
        || repacked.data != container.data
    {
        return Err(ReserveError::Schema(format!(
            "{} does not survive a recompress cycle",
            file.display()
        )));
    }
    let [first, _] = container.decompressed_size_fields();
    if first as usize != MARKER_LEN + container.data.len() {
        println!(
            "warning: header records {first} inflated bytes, stream holds {}",
            MARKER_LEN + container.data.len()
        );
    }
    println!("ok: {}", file.display());
    Ok(())
}
