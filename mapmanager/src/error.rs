//! Error types for the map manager.
//!
//! Every failure in this crate is a [`ManagerError`]. None of them are fatal:
//! the manager reports them through its return values and the
//! [`ManagerEvent::Error`](crate::events::ManagerEvent::Error) channel, and
//! keeps whatever state was committed before the failure.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result type for manager operations.
pub type ManagerResult<T> = Result<T, ManagerError>;

/// Broad failure categories used by callers to decide how to react.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Storage root missing, not a directory, or not writable.
    StorageUnavailable,
    /// The ownership registry could not be opened.
    RegistryUnavailable,
    /// A catalog, URL or requested-set document was rejected.
    CatalogParse,
    /// Operation invoked without the state it needs.
    Precondition,
    /// Network, timeout, HTTP or integrity failure of a transfer.
    DownloadFailure,
    /// The registry refused to record an installed file.
    RegistryWrite,
    /// Deletion token did not match the current list of unneeded files.
    GcPreconditionMismatch,
    /// Local filesystem I/O failure.
    Io,
}

/// Errors that can occur during map manager operations.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// The storage root cannot be used.
    #[error("storage unavailable at {}: {reason}", path.display())]
    StorageUnavailable { path: PathBuf, reason: String },

    /// The registry backing store is not open.
    #[error("file registry unavailable: {0}")]
    RegistryUnavailable(String),

    /// A JSON document was malformed or failed validation.
    #[error("failed to parse {document}: {reason}")]
    CatalogParse { document: String, reason: String },

    /// Operation requires prior state that is missing.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A download session is already running.
    #[error("a download is already in progress")]
    AlreadyDownloading,

    /// Dataset id not present in the catalog.
    #[error("unknown dataset: {0}")]
    UnknownDataset(String),

    /// Transfer failed.
    #[error("failed to download {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    /// Transfer stalled and was abandoned by the downloader.
    #[error("download of {url} timed out")]
    Timeout { url: String },

    /// Downloaded bytes do not match the published checksum.
    #[error("checksum mismatch for {filename}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        filename: String,
        expected: String,
        actual: String,
    },

    /// Registry write failed after the file reached the disk.
    #[error("failed to register {}: {reason}", path.display())]
    RegistryWrite { path: PathBuf, reason: String },

    /// File list passed for deletion differs from the current listing.
    #[error("list of unneeded files changed since it was computed")]
    GcPreconditionMismatch,

    /// Failed to read a file or directory.
    #[error("failed to read {}: {source}", path.display())]
    ReadFailed { path: PathBuf, source: io::Error },

    /// Failed to write a file or directory.
    #[error("failed to write {}: {source}", path.display())]
    WriteFailed { path: PathBuf, source: io::Error },

    /// Failed to create a directory.
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDirFailed { path: PathBuf, source: io::Error },
}

impl ManagerError {
    /// Map the error onto its reporting category.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::StorageUnavailable { .. } => ErrorKind::StorageUnavailable,
            Self::RegistryUnavailable(_) => ErrorKind::RegistryUnavailable,
            Self::CatalogParse { .. } => ErrorKind::CatalogParse,
            Self::Precondition(_) | Self::AlreadyDownloading | Self::UnknownDataset(_) => {
                ErrorKind::Precondition
            }
            Self::DownloadFailed { .. } | Self::Timeout { .. } | Self::ChecksumMismatch { .. } => {
                ErrorKind::DownloadFailure
            }
            Self::RegistryWrite { .. } => ErrorKind::RegistryWrite,
            Self::GcPreconditionMismatch => ErrorKind::GcPreconditionMismatch,
            Self::ReadFailed { .. } | Self::WriteFailed { .. } | Self::CreateDirFailed { .. } => {
                ErrorKind::Io
            }
        }
    }

    /// Whether this error ends a download session.
    ///
    /// Registry writes are treated exactly like transfer failures.
    pub fn aborts_queue(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::DownloadFailure | ErrorKind::RegistryWrite | ErrorKind::Io
        )
    }

    pub(crate) fn parse(document: impl Into<String>, reason: impl ToString) -> Self {
        Self::CatalogParse {
            document: document.into(),
            reason: reason.to_string(),
        }
    }
}
