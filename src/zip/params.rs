use std::fmt;

use flate2::Compression;

use crate::crypto::EncryptionMethod;
use crate::error::{Error, Result};

use super::structures::CompressionMethod;

/// DEFLATE effort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompressionLevel {
    Fastest,
    #[default]
    Normal,
    Maximum,
    /// Explicit zlib level, clamped to 0..=9
    Level(u8),
}

impl CompressionLevel {
    pub fn to_flate2(self) -> Compression {
        match self {
            CompressionLevel::Fastest => Compression::fast(),
            CompressionLevel::Normal => Compression::default(),
            CompressionLevel::Maximum => Compression::best(),
            CompressionLevel::Level(level) => Compression::new(level.min(9) as u32),
        }
    }
}

/// Write-side configuration for one archive.
///
/// Built once with the chained setters, then handed to
/// [`ZipWriter::create`](super::ZipWriter::create).
#[derive(Clone)]
pub struct ArchiveParameters {
    compression_method: CompressionMethod,
    compression_level: CompressionLevel,
    encrypt_files: bool,
    encryption_method: EncryptionMethod,
    password: Option<String>,
    include_root_folder: bool,
}

impl Default for ArchiveParameters {
    fn default() -> Self {
        Self {
            compression_method: CompressionMethod::Deflate,
            compression_level: CompressionLevel::default(),
            encrypt_files: false,
            encryption_method: EncryptionMethod::default(),
            password: None,
            include_root_folder: true,
        }
    }
}

impl ArchiveParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compression_method(mut self, method: CompressionMethod) -> Self {
        self.compression_method = method;
        self
    }

    pub fn compression_level(mut self, level: CompressionLevel) -> Self {
        self.compression_level = level;
        self
    }

    pub fn encrypt_files(mut self, encrypt: bool) -> Self {
        self.encrypt_files = encrypt;
        self
    }

    pub fn encryption_method(mut self, method: EncryptionMethod) -> Self {
        self.encryption_method = method;
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn include_root_folder(mut self, include: bool) -> Self {
        self.include_root_folder = include;
        self
    }

    pub fn get_compression_method(&self) -> CompressionMethod {
        self.compression_method
    }

    pub fn get_compression_level(&self) -> CompressionLevel {
        self.compression_level
    }

    pub fn is_encrypting(&self) -> bool {
        self.encrypt_files
    }

    pub fn get_encryption_method(&self) -> EncryptionMethod {
        self.encryption_method
    }

    pub fn get_password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    pub fn includes_root_folder(&self) -> bool {
        self.include_root_folder
    }

    /// Reject combinations the writer cannot honor.
    pub fn validate(&self) -> Result<()> {
        if let CompressionMethod::Unknown(m) = self.compression_method {
            return Err(Error::format(format!("cannot write compression method {m}")));
        }
        if self.encrypt_files && self.password.as_deref().is_none_or(str::is_empty) {
            return Err(Error::bad_password(
                "a non-empty password is required to encrypt entries",
            ));
        }
        Ok(())
    }
}

impl fmt::Debug for ArchiveParameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArchiveParameters")
            .field("compression_method", &self.compression_method)
            .field("compression_level", &self.compression_level)
            .field("encrypt_files", &self.encrypt_files)
            .field("encryption_method", &self.encryption_method)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("include_root_folder", &self.include_root_folder)
            .finish()
    }
}
