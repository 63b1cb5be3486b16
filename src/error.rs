//! Error types for archive reading, writing and bridge operations.

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// Machine-readable error category, forwarded to bridge consumers alongside
/// the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ErrorKind {
    #[serde(rename = "NotFoundError")]
    NotFound,
    #[serde(rename = "DirectoryCreationError")]
    DirectoryCreation,
    #[serde(rename = "FormatError")]
    Format,
    #[serde(rename = "BadPasswordError")]
    BadPassword,
    #[serde(rename = "IOError")]
    Io,
    #[serde(rename = "ClosedHandleError")]
    ClosedHandle,
    #[serde(rename = "UnsafePathError")]
    UnsafePath,
    #[serde(rename = "CancelledError")]
    Cancelled,
}

/// Errors produced by the archive engine.
#[derive(Debug, Error)]
pub enum Error {
    /// The source archive does not exist.
    #[error("Zip file does not exist")]
    NotFound { path: PathBuf },

    /// A named entry is not present in the archive.
    #[error("entry not found in archive: {0}")]
    EntryNotFound(String),

    /// The destination directory is missing and cannot be created.
    #[error("Could not create output directory")]
    DirectoryCreation {
        path: PathBuf,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Missing, corrupt or truncated archive structure.
    #[error("invalid ZIP archive: {0}")]
    Format(String),

    /// Password missing for an encrypted entry, or verification failed.
    #[error("wrong or missing password: {0}")]
    BadPassword(String),

    /// Read or write failure while streaming.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// An operation was attempted on a finalized archive.
    #[error("archive handle is already closed")]
    ClosedHandle,

    /// The entry name would resolve outside the extraction root.
    #[error("entry path escapes the destination directory: {entry}")]
    UnsafeEntryPath { entry: String },

    /// The operation was cancelled between two entries.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn format(msg: impl Into<String>) -> Self {
        Error::Format(msg.into())
    }

    pub fn bad_password(msg: impl Into<String>) -> Self {
        Error::BadPassword(msg.into())
    }

    /// Category of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::NotFound { .. } | Error::EntryNotFound(_) => ErrorKind::NotFound,
            Error::DirectoryCreation { .. } => ErrorKind::DirectoryCreation,
            Error::Format(_) => ErrorKind::Format,
            Error::BadPassword(_) => ErrorKind::BadPassword,
            Error::Io(_) => ErrorKind::Io,
            Error::ClosedHandle => ErrorKind::ClosedHandle,
            Error::UnsafeEntryPath { .. } => ErrorKind::UnsafePath,
            Error::Cancelled => ErrorKind::Cancelled,
        }
    }
}

/// Result type for archive operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_keep_bridge_wording() {
        let err = Error::NotFound {
            path: PathBuf::from("/tmp/missing.zip"),
        };
        assert_eq!(err.to_string(), "Zip file does not exist");
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let err = Error::DirectoryCreation {
            path: PathBuf::from("/proc/nope"),
            source: None,
        };
        assert_eq!(err.to_string(), "Could not create output directory");
    }

    #[test]
    fn io_errors_convert() {
        let err: Error = std::io::Error::other("disk full").into();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[test]
    fn kind_serializes_to_taxonomy_name() {
        let json = serde_json::to_string(&ErrorKind::BadPassword).unwrap();
        assert_eq!(json, "\"BadPasswordError\"");
    }
}
