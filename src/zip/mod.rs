//! ZIP archive reading, extraction and creation.
//!
//! ## Architecture
//!
//! - [`structures`]: Data structures representing ZIP format elements (EOCD, file headers, etc.)
//! - [`parser`]: Low-level parsing of ZIP structures from raw bytes
//! - `codec`: per-entry payload pipeline (decrypt, inflate, CRC and the reverse)
//! - [`ZipReader`]: opens an archive and extracts its entries
//! - [`ZipWriter`]: builds a new archive from files and directory trees
//!
//! ## ZIP Format Overview
//!
//! A ZIP file consists of:
//! 1. Local file headers and compressed data for each file
//! 2. Central Directory with metadata for all files
//! 3. End of Central Directory (EOCD) record at the end
//!
//! Reading starts from the EOCD at the end of the file, then the Central
//! Directory, so listing never touches entry payloads.
//!
//! ## Supported Features
//!
//! - Standard ZIP format (PKZIP APPNOTE 6.3.x compatible)
//! - ZIP64 extensions on the read side; ZIP64 end records when writing
//!   archives with more than 65535 entries or a central directory past 4 GiB
//! - STORED and DEFLATE compression methods
//! - WinZip AES (AE-1 and AE-2) and traditional PKWARE encryption
//!
//! ## Limitations
//!
//! - No multi-disk archive support
//! - No BZIP2, LZMA, or other compression methods
//! - Entries over 4 GiB cannot be written

mod codec;
mod params;
pub mod parser;
mod reader;
pub mod structures;
mod writer;

pub use params::{ArchiveParameters, CompressionLevel};
pub use parser::ZipParser;
pub use reader::ZipReader;
pub(crate) use reader::ensure_directory;
pub use structures::*;
pub use writer::ZipWriter;
