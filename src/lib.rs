//! # zipkit
//!
//! A ZIP archive reader and writer with DEFLATE compression and password
//! protection.
//!
//! The library reads and writes standard ZIP archives, streams entries to and
//! from disk in fixed-size chunks, and can run whole extract/archive jobs in
//! the background while reporting progress through [`bridge::ZipBridge`].
//!
//! ## Features
//!
//! - Extract ZIP files to a directory tree, rejecting entries that would land
//!   outside it
//! - Create archives from a directory tree or individual files
//! - Support for ZIP64 format (archives larger than 4GB) when reading
//! - Support for STORED (uncompressed) and DEFLATE compression methods
//! - WinZip AES encryption (128/192/256-bit) and legacy ZipCrypto
//!
//! ## Example
//!
//! ```no_run
//! use zipkit::{ArchiveParameters, ZipReader, ZipWriter};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let params = ArchiveParameters::new()
//!         .encrypt_files(true)
//!         .password("secret")
//!         .include_root_folder(false);
//!     let mut writer = ZipWriter::create("docs.zip", params).await?;
//!     writer.add_folder("docs").await?;
//!     writer.finalize().await?;
//!
//!     let mut archive = ZipReader::open("docs.zip").await?;
//!     for entry in archive.entries() {
//!         println!("{}", entry.file_name);
//!     }
//!     archive.set_password("secret");
//!     archive.extract_all("out").await?;
//!
//!     Ok(())
//! }
//! ```

pub mod bridge;
pub mod cli;
pub mod crypto;
pub mod error;
pub mod io;
pub mod path;
pub mod progress;
pub mod zip;

pub use bridge::{BridgeError, BridgeEvent, FileUriResolver, OperationHandle, PathMapper, UriResolver, ZipBridge};
pub use cli::Cli;
pub use error::{Error, ErrorKind, Result};
pub use io::{LocalFileReader, ReadAt};
pub use progress::{CancellationToken, ProgressEvent, ProgressState};
pub use zip::{ArchiveParameters, CompressionLevel, EntryDescriptor, ZipReader, ZipWriter};
