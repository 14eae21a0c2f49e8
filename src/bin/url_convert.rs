//! url-convert - flat URL list to record document
//!
//! Reads one `host/path` per line and prints the `{"urls": [...]}` document
//! accepted by `url-lookup --url-config-path`.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use url_lookup::convert::{convert_list, ConvertOptions};

/// Convert a flat URL list into URL lookup records
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// File with one host/path per line
    file: PathBuf,

    /// Port appended to every host
    #[arg(long, default_value = "80")]
    port: u16,

    /// Category assigned to every record
    #[arg(long, default_value = "bad-site")]
    category: String,

    /// Mark every record as safe
    #[arg(long)]
    safe: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let input = std::fs::read_to_string(&args.file)
        .with_context(|| format!("Failed to read {}", args.file.display()))?;

    let options = ConvertOptions {
        port: args.port,
        category: args.category,
        safe: args.safe,
    };
    let records = convert_list(&input, &options);

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer(&mut stdout, &records).context("Failed to write records")?;
    stdout.flush().context("Failed to flush output")?;
    Ok(())
}
