use std::fs::File;
use std::io::{BufReader, Write};
use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use p3s::format::stream::ByteStream;
use p3s::format::{
    CHUNK_ID_PALETTE, CHUNK_ID_PALETTE_ID, CHUNK_ID_PALETTE_LEGACY, CHUNK_ID_PREVIEW,
    CHUNK_ID_SHAPE, COMPRESSION_METHOD_COUNT, MAGIC_BYTES,
};

/// Dump the chunk table of a .3zh file without inflating anything.
#[derive(Parser)]
#[command(name = "p3s-inspect", about = "Inspect P3S (.3zh) containers")]
struct Cli {
    /// File to inspect
    file: PathBuf,
    /// Extract the preview payload to this path
    #[arg(long)]
    preview_out: Option<PathBuf>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(error) => {
            eprintln!("p3s-inspect: {error}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(out) = &cli.preview_out {
        let reader = BufReader::new(File::open(&cli.file)?);
        match p3s::get_preview(reader)? {
            Some(bytes) => {
                File::create(out)?.write_all(&bytes)?;
                println!("wrote {} preview bytes to {}", bytes.len(), out.display());
            }
            None => println!("no preview chunk in {}", cli.file.display()),
        }
        return Ok(());
    }

    let reader = BufReader::new(File::open(&cli.file)?);
    let mut stream = ByteStream::new(reader)?;

    let magic = stream.read_exact_vec(MAGIC_BYTES.len())?;
    if magic != MAGIC_BYTES {
        return Err("not a P3S container (bad magic)".into());
    }
    let version = stream.read_u32()?;
    let algo = stream.read_u8()?;
    let total_size = stream.read_u32()?;
    let algo_name = match algo {
        0 => "none",
        1 => "zip",
        _ => "?",
    };
    println!("version {version}, compression {algo_name}, chunk region {total_size} bytes");
    if version != 6 || algo >= COMPRESSION_METHOD_COUNT {
        return Err("header not readable by this tool".into());
    }

    let chunks_end = stream.position()? + u64::from(total_size);
    while stream.position()? < chunks_end {
        let id = stream.read_u8()?;
        match id {
            CHUNK_ID_SHAPE | CHUNK_ID_PALETTE | CHUNK_ID_PALETTE_LEGACY | CHUNK_ID_PALETTE_ID => {
                let stored = stream.read_u32()?;
                let compressed = stream.read_u8()?;
                let uncompressed = stream.read_u32()?;
                stream.skip(u64::from(stored))?;
                println!(
                    "  {:>2} {:<16} stored {stored}, uncompressed {uncompressed}{}",
                    id,
                    chunk_name(id),
                    if compressed != 0 { ", zlib" } else { "" },
                );
            }
            _ => {
                let size = stream.read_u32()?;
                stream.skip(u64::from(size))?;
                println!("  {:>2} {:<16} {size} bytes (raw)", id, chunk_name(id));
            }
        }
    }
    Ok(())
}

fn chunk_name(id: u8) -> &'static str {
    match id {
        CHUNK_ID_PREVIEW => "PREVIEW",
        CHUNK_ID_PALETTE_LEGACY => "PALETTE_LEGACY",
        CHUNK_ID_SHAPE => "SHAPE",
        CHUNK_ID_PALETTE_ID => "PALETTE_ID",
        CHUNK_ID_PALETTE => "PALETTE",
        _ => "(unknown)",
    }
}
