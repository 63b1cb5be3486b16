//! Host bridge: runs unzip/zip operations on background tasks and reports
//! progress, success or failure as events.
//!
//! Locations arrive as strings that may carry a `file:` scheme. They are
//! turned into local paths through the [`UriResolver`] and [`PathMapper`]
//! given to [`ZipBridge`]; [`FileUriResolver`] covers plain paths and
//! `file://` URIs.
//!
//! Every operation ends with exactly one [`BridgeEvent::Success`] or
//! [`BridgeEvent::Error`]. Any number of [`BridgeEvent::Progress`] events
//! may come before it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::crypto::{AesStrength, EncryptionMethod};
use crate::error::{Error, ErrorKind, Result};
use crate::path::normalize;
use crate::progress::{CancellationToken, ProgressEvent, ProgressState};
use crate::zip::{
    ArchiveParameters, CompressionLevel, CompressionMethod, ZipReader, ZipWriter, ensure_directory,
};

/// Turns a host location into its canonical string form.
pub trait UriResolver: Send + Sync {
    fn resolve(&self, uri: &str) -> String;
}

/// Maps a canonical location onto the local filesystem.
///
/// `None` means the location has no local file behind it.
pub trait PathMapper: Send + Sync {
    fn map_to_path(&self, uri: &str) -> Option<PathBuf>;
}

/// Resolver for plain paths and `file:` URIs.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileUriResolver;

impl UriResolver for FileUriResolver {
    fn resolve(&self, uri: &str) -> String {
        normalize(uri)
    }
}

impl PathMapper for FileUriResolver {
    fn map_to_path(&self, uri: &str) -> Option<PathBuf> {
        let path = normalize(uri);
        if path.is_empty() {
            return None;
        }
        Some(PathBuf::from(path))
    }
}

/// Failure reported to the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeError {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&Error> for BridgeError {
    fn from(err: &Error) -> Self {
        BridgeError {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for BridgeError {}

/// Event delivered to the host for one operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BridgeEvent {
    Progress(ProgressEvent),
    Success,
    Error(BridgeError),
}

impl BridgeEvent {
    /// Whether the host should keep listening after this event.
    pub fn keep_callback(&self) -> bool {
        matches!(self, BridgeEvent::Progress(_))
    }

    pub fn is_terminal(&self) -> bool {
        !self.keep_callback()
    }
}

/// Caller side of a running operation.
pub struct OperationHandle {
    events: mpsc::UnboundedReceiver<BridgeEvent>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl OperationHandle {
    /// Next event, or `None` once the terminal event has been consumed.
    pub async fn next_event(&mut self) -> Option<BridgeEvent> {
        self.events.recv().await
    }

    /// Ask the operation to stop before its next entry.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Drain all events and return the outcome.
    pub async fn wait(mut self) -> std::result::Result<(), BridgeError> {
        let mut outcome = None;
        while let Some(event) = self.events.recv().await {
            match event {
                BridgeEvent::Progress(_) => {}
                BridgeEvent::Success => outcome = Some(Ok(())),
                BridgeEvent::Error(err) => outcome = Some(Err(err)),
            }
        }
        let _ = self.task.await;

        outcome.unwrap_or_else(|| {
            Err(BridgeError {
                kind: ErrorKind::Io,
                message: "operation ended without a result".to_string(),
            })
        })
    }
}

/// Entry point for host requests.
#[derive(Clone)]
pub struct ZipBridge {
    resolver: Arc<dyn UriResolver>,
    mapper: Arc<dyn PathMapper>,
}

impl Default for ZipBridge {
    fn default() -> Self {
        Self::new(Arc::new(FileUriResolver), Arc::new(FileUriResolver))
    }
}

impl ZipBridge {
    pub fn new(resolver: Arc<dyn UriResolver>, mapper: Arc<dyn PathMapper>) -> Self {
        Self { resolver, mapper }
    }

    /// Extract the archive at `source` into `output`.
    ///
    /// An empty `password` means none; it is only applied when the archive
    /// has encrypted entries.
    pub fn unzip(&self, source: &str, output: &str, password: &str) -> OperationHandle {
        let bridge = self.clone();
        let (source, output, password) = (source.to_string(), output.to_string(), password.to_string());
        self.spawn("unzipping", move |events, cancel| async move {
            bridge
                .run_unzip(&source, &output, &password, &events, &cancel)
                .await
        })
    }

    /// Archive the contents of `source_dir` into `destination`.
    ///
    /// Uses DEFLATE at maximum level, AES-256 when `password` is non-empty,
    /// and leaves the source folder's own name out of member paths.
    pub fn zip(&self, source_dir: &str, destination: &str, password: &str) -> OperationHandle {
        let bridge = self.clone();
        let (source_dir, destination, password) = (
            source_dir.to_string(),
            destination.to_string(),
            password.to_string(),
        );
        self.spawn("zipping", move |events, cancel| async move {
            bridge
                .run_zip(&source_dir, &destination, &password, &events, &cancel)
                .await
        })
    }

    fn spawn<F, Fut>(&self, action: &'static str, op: F) -> OperationHandle
    where
        F: FnOnce(mpsc::UnboundedSender<BridgeEvent>, CancellationToken) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let fut = op(tx.clone(), cancel.clone());

        let task = tokio::spawn(async move {
            let terminal = match fut.await {
                Ok(()) => BridgeEvent::Success,
                Err(err) => {
                    error!(
                        target: "zipkit::bridge",
                        kind = ?err.kind(),
                        error = %err,
                        "An error occurred while {action}."
                    );
                    BridgeEvent::Error(BridgeError::from(&err))
                }
            };
            let _ = tx.send(terminal);
        });

        OperationHandle {
            events: rx,
            cancel,
            task,
        }
    }

    fn local_path(&self, location: &str) -> Option<PathBuf> {
        self.mapper.map_to_path(&self.resolver.resolve(location))
    }

    async fn run_unzip(
        &self,
        source: &str,
        output: &str,
        password: &str,
        events: &mpsc::UnboundedSender<BridgeEvent>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let archive_path = match self.local_path(source) {
            Some(path) if is_file(&path).await => path,
            _ => {
                return Err(Error::NotFound {
                    path: PathBuf::from(source),
                });
            }
        };
        let output_dir = self.local_path(output).ok_or_else(|| Error::DirectoryCreation {
            path: PathBuf::from(output),
            source: None,
        })?;
        ensure_directory(&output_dir).await?;

        let mut archive = ZipReader::open(&archive_path).await?;
        if !password.is_empty() && archive.is_encrypted() {
            archive.set_password(password);
        }

        info!(
            archive = %archive_path.display(),
            output = %output_dir.display(),
            "unzip started"
        );
        let mut report = |state: ProgressState| {
            let _ = events.send(BridgeEvent::Progress(state.event()));
        };
        let mut progress = archive
            .extract_all_with(&output_dir, &mut report, cancel)
            .await?;

        progress.complete();
        report(progress);
        info!(archive = %archive_path.display(), bytes = progress.total(), "unzip finished");
        Ok(())
    }

    async fn run_zip(
        &self,
        source_dir: &str,
        destination: &str,
        password: &str,
        events: &mpsc::UnboundedSender<BridgeEvent>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let source_path = self.local_path(source_dir).ok_or_else(|| Error::NotFound {
            path: PathBuf::from(source_dir),
        })?;
        let archive_path = self.local_path(destination).ok_or_else(|| Error::DirectoryCreation {
            path: PathBuf::from(destination),
            source: None,
        })?;
        if let Some(parent) = archive_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_directory(parent).await?;
        }

        let mut params = ArchiveParameters::new()
            .compression_method(CompressionMethod::Deflate)
            .compression_level(CompressionLevel::Maximum)
            .include_root_folder(false);
        if !password.is_empty() {
            params = params
                .encrypt_files(true)
                .encryption_method(EncryptionMethod::Aes(AesStrength::Aes256))
                .password(password);
        }

        info!(
            source = %source_path.display(),
            archive = %archive_path.display(),
            "zip started"
        );
        let mut writer = ZipWriter::create(&archive_path, params).await?;
        let mut report = |state: ProgressState| {
            let _ = events.send(BridgeEvent::Progress(state.event()));
        };
        let progress = writer
            .add_folder_with(&source_path, &mut report, cancel)
            .await?;
        writer.finalize().await?;

        report(progress);
        info!(archive = %archive_path.display(), bytes = progress.total(), "zip finished");
        Ok(())
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_resolver_strips_scheme() {
        let resolver = FileUriResolver;
        assert_eq!(resolver.resolve("file:///data//docs.zip"), "/data/docs.zip");
        assert_eq!(
            resolver.map_to_path("file:///tmp/out"),
            Some(PathBuf::from("/tmp/out"))
        );
        assert_eq!(resolver.map_to_path(""), None);
    }

    #[test]
    fn only_progress_keeps_callback() {
        assert!(BridgeEvent::Progress(ProgressEvent { loaded: 1, total: 2 }).keep_callback());
        assert!(BridgeEvent::Success.is_terminal());
        let err = BridgeEvent::Error(BridgeError::from(&Error::Cancelled));
        assert!(!err.keep_callback());
    }

    #[test]
    fn bridge_error_serializes_kind_name() {
        let err = BridgeError::from(&Error::NotFound {
            path: PathBuf::from("x.zip"),
        });
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(
            json,
            r#"{"kind":"NotFoundError","message":"Zip file does not exist"}"#
        );
    }

    #[tokio::test]
    async fn missing_archive_reports_not_found_once() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("missing.zip");
        let output = dir.path().join("out");

        let bridge = ZipBridge::default();
        let mut handle = bridge.unzip(
            source.to_str().unwrap(),
            output.to_str().unwrap(),
            "",
        );

        let event = handle.next_event().await.unwrap();
        match event {
            BridgeEvent::Error(err) => {
                assert_eq!(err.kind, ErrorKind::NotFound);
                assert_eq!(err.message, "Zip file does not exist");
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert!(handle.next_event().await.is_none());
        assert!(!output.exists());
    }

    struct NoLocalPaths;

    impl PathMapper for NoLocalPaths {
        fn map_to_path(&self, _uri: &str) -> Option<PathBuf> {
            None
        }
    }

    #[tokio::test]
    async fn unmapped_source_is_not_found() {
        let bridge = ZipBridge::new(Arc::new(FileUriResolver), Arc::new(NoLocalPaths));
        let err = bridge
            .unzip("content://media/1", "/tmp/out", "")
            .wait()
            .await
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }
}
