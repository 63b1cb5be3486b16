//! Main entry point for the zipkit CLI application.
//!
//! `unzip` runs through the same bridge a host application uses, so its
//! progress output and error reporting match what hosts receive.

use anyhow::{Context, Result, bail};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use zipkit::cli::{Cli, Command, ListArgs, UnzipArgs, ZipArgs};
use zipkit::crypto::{AesStrength, EncryptionMethod};
use zipkit::path::normalize;
use zipkit::zip::CompressionMethod;
use zipkit::{ArchiveParameters, BridgeEvent, CompressionLevel, ZipBridge, ZipReader, ZipWriter};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    match &cli.command {
        Command::Unzip(args) => unzip(args, &cli).await,
        Command::Zip(args) => zip(args, &cli).await,
        Command::List(args) => list_files(args).await,
    }
}

/// Log to stderr; `RUST_LOG` overrides the default level.
fn init_logging(cli: &Cli) {
    let default_level = if cli.is_very_quiet() { "error" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn unzip(args: &UnzipArgs, cli: &Cli) -> Result<()> {
    let bridge = ZipBridge::default();
    let mut handle = bridge.unzip(&args.archive, &args.extract_dir, &args.password);

    while let Some(event) = handle.next_event().await {
        match event {
            BridgeEvent::Progress(p) => {
                if !cli.is_quiet() {
                    eprint!("\r  {} / {}", format_size(p.loaded), format_size(p.total));
                }
            }
            BridgeEvent::Success => {
                if !cli.is_quiet() {
                    eprintln!("\n  extracted to {}", normalize(&args.extract_dir));
                }
                return Ok(());
            }
            BridgeEvent::Error(err) => {
                if !cli.is_quiet() {
                    eprintln!();
                }
                bail!(err);
            }
        }
    }

    bail!("unzip ended without a result")
}

async fn zip(args: &ZipArgs, cli: &Cli) -> Result<()> {
    let method = if args.store {
        CompressionMethod::Stored
    } else {
        CompressionMethod::Deflate
    };
    let level = args
        .level
        .map(CompressionLevel::Level)
        .unwrap_or(CompressionLevel::Maximum);

    let mut params = ArchiveParameters::new()
        .compression_method(method)
        .compression_level(level)
        .include_root_folder(args.include_root);

    if let Some(password) = &args.password {
        let encryption = if args.legacy_zipcrypto {
            EncryptionMethod::ZipCrypto
        } else {
            let strength = match args.aes {
                128 => AesStrength::Aes128,
                192 => AesStrength::Aes192,
                _ => AesStrength::Aes256,
            };
            EncryptionMethod::Aes(strength)
        };
        params = params
            .encrypt_files(true)
            .encryption_method(encryption)
            .password(password.clone());
    }

    let source = normalize(&args.source);
    let archive = normalize(&args.archive);

    let mut writer = ZipWriter::create(&archive, params)
        .await
        .with_context(|| format!("cannot create {archive}"))?;
    let quiet = cli.is_quiet();
    let mut report = |p: zipkit::ProgressState| {
        if !quiet {
            eprint!("\r  {} / {}", format_size(p.loaded()), format_size(p.total()));
        }
    };
    writer
        .add_folder_with(&source, &mut report, &zipkit::CancellationToken::new())
        .await
        .with_context(|| format!("cannot archive {source}"))?;
    writer.finalize().await?;

    if !quiet {
        eprintln!(
            "\n  wrote {} ({} entries)",
            archive,
            writer.entries().len()
        );
    }
    Ok(())
}

/// List files in the ZIP archive.
///
/// Supports two output formats:
/// - Simple format: just file names, one per line
/// - Verbose format (`-v`): Detailed table with size, compression ratio, and timestamps
async fn list_files(args: &ListArgs) -> Result<()> {
    let archive = ZipReader::open(normalize(&args.archive)).await?;
    let entries = archive.entries();

    if args.verbose {
        println!(
            "{:>10}  {:>10}  {:>5}  {:>10}  {:>5}  {:>3}  Name",
            "Length", "Size", "Cmpr", "Date", "Time", "Enc"
        );
        println!("{}", "-".repeat(75));
    }

    let mut total_uncompressed = 0u64;
    let mut total_compressed = 0u64;
    let mut file_count = 0usize;

    for entry in entries {
        if !args.verbose {
            println!("{}", entry.file_name);
            continue;
        }

        let (year, month, day) = entry.mod_date();
        let (hour, minute, _second) = entry.mod_time();
        let enc = if entry.is_encrypted() { "*" } else { "" };

        println!(
            "{:>10}  {:>10}  {}  {:04}-{:02}-{:02}  {:02}:{:02}  {:>3}  {}",
            entry.uncompressed_size,
            entry.compressed_size,
            ratio(entry.compressed_size, entry.uncompressed_size),
            year,
            month,
            day,
            hour,
            minute,
            enc,
            entry.file_name
        );

        if !entry.is_directory {
            total_uncompressed += entry.uncompressed_size;
            total_compressed += entry.compressed_size;
            file_count += 1;
        }
    }

    if args.verbose {
        println!("{}", "-".repeat(75));
        println!(
            "{:>10}  {:>10}  {}  {:>26}  {} files",
            total_uncompressed,
            total_compressed,
            ratio(total_compressed, total_uncompressed),
            "",
            file_count
        );
    }

    Ok(())
}

/// Space saved as a percentage; encrypted or incompressible data can be
/// larger than its source, which shows as 0%.
fn ratio(compressed: u64, uncompressed: u64) -> String {
    if uncompressed == 0 || compressed >= uncompressed {
        return "  0%".to_string();
    }
    format!("{:>4}%", 100 - (compressed * 100 / uncompressed))
}

/// Format a byte size in human-readable form.
fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}
