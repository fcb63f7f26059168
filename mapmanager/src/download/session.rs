//! Download session state.
//!
//! A [`Session`] exists only inside [`SessionState::Active`], and the only
//! way to create one is [`SessionState::begin`], which refuses while a
//! session is already active. "At most one session" is therefore a property
//! of the types rather than a convention callers must follow.

use std::path::PathBuf;

use serde::Serialize;

use super::traits::{FetchHandle, Ticket};
use crate::catalog::{DatasetId, Descriptor};
use crate::error::{ManagerError, ManagerResult};
use crate::storage::{partial_path, StorageLayout};

/// What a session downloads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DownloadKind {
    /// Dataset files resolved from the requested set.
    Countries,
    /// The `url.json` document.
    ServerUrlRefresh,
    /// The provided catalog document.
    CatalogRefresh,
}

impl std::fmt::Display for DownloadKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Countries => "countries",
            Self::ServerUrlRefresh => "server-url",
            Self::CatalogRefresh => "catalog",
        })
    }
}

/// One file of a session queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueItem {
    /// Dataset the file belongs to. `None` for the manager's own documents.
    pub dataset_id: Option<DatasetId>,
    pub url: String,
    /// Final location once committed.
    pub destination: PathBuf,
    pub expected_size: u64,
    /// Version recorded in the registry.
    pub version: String,
    pub sha256: Option<String>,
}

impl QueueItem {
    /// Item installing a catalog dataset.
    pub fn dataset(descriptor: &Descriptor, base_url: &str, layout: &StorageLayout) -> Self {
        Self {
            dataset_id: Some(descriptor.id.clone()),
            url: descriptor.download_url(base_url),
            destination: layout.full_path(&descriptor.path),
            expected_size: descriptor.size_bytes,
            version: descriptor.version.clone(),
            sha256: descriptor.sha256.clone(),
        }
    }

    /// Item fetching one of the manager's JSON documents.
    pub fn document(url: impl Into<String>, destination: PathBuf) -> Self {
        Self {
            dataset_id: None,
            url: url.into(),
            destination,
            expected_size: 0,
            version: String::new(),
            sha256: None,
        }
    }

    /// Where the downloader writes before the item is committed.
    pub fn staging_path(&self) -> PathBuf {
        partial_path(&self.destination)
    }
}

/// Aggregate progress of the active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DownloadProgress {
    pub kind: DownloadKind,
    /// Bytes received across the whole session.
    pub downloaded: u64,
    /// Bytes written to disk across the whole session.
    pub written: u64,
    /// Sum of expected sizes of the queue.
    pub total: u64,
    /// Zero-based index of the current item.
    pub item_index: usize,
    pub item_count: usize,
    pub current: Option<DatasetId>,
}

/// The single active download session.
#[derive(Debug)]
pub struct Session {
    kind: DownloadKind,
    items: Vec<QueueItem>,
    position: usize,
    ticket: Ticket,
    handle: Option<FetchHandle>,
    total: u64,
    done_downloaded: u64,
    done_written: u64,
    item_downloaded: u64,
    item_written: u64,
    reported: (u64, u64),
}

impl Session {
    pub fn kind(&self) -> DownloadKind {
        self.kind
    }

    pub fn ticket(&self) -> Ticket {
        self.ticket
    }

    /// Item currently being transferred.
    pub fn current(&self) -> Option<&QueueItem> {
        self.items.get(self.position)
    }

    /// Items after the current one.
    pub fn remaining(&self) -> &[QueueItem] {
        self.items.get(self.position + 1..).unwrap_or(&[])
    }

    pub(super) fn attach(&mut self, ticket: Ticket, handle: FetchHandle) {
        self.ticket = ticket;
        self.handle = Some(handle);
    }

    pub(super) fn cancel_transfer(&self) {
        if let Some(handle) = &self.handle {
            handle.cancel();
        }
    }

    /// Record per-item counters. Counters never move backwards.
    pub(super) fn record(&mut self, downloaded: u64, written: u64) {
        self.item_downloaded = self.item_downloaded.max(downloaded);
        self.item_written = self.item_written.max(written);
    }

    /// Close the current item and move to the next. Returns `false` when
    /// the queue is exhausted.
    pub(super) fn advance(&mut self) -> bool {
        self.done_downloaded += self.item_downloaded;
        self.done_written += self.item_written;
        self.item_downloaded = 0;
        self.item_written = 0;
        self.handle = None;
        self.position += 1;
        self.position < self.items.len()
    }

    pub fn progress(&self) -> DownloadProgress {
        DownloadProgress {
            kind: self.kind,
            downloaded: self.done_downloaded + self.item_downloaded,
            written: self.done_written + self.item_written,
            total: self.total,
            item_index: self.position.min(self.items.len().saturating_sub(1)),
            item_count: self.items.len(),
            current: self.current().and_then(|item| item.dataset_id.clone()),
        }
    }

    /// Progress if either counter moved by at least `step` since the last
    /// report, or unconditionally when `force` is set.
    pub(super) fn take_progress(&mut self, step: u64, force: bool) -> Option<DownloadProgress> {
        let progress = self.progress();
        let (downloaded, written) = self.reported;
        let moved = progress.downloaded.saturating_sub(downloaded) >= step
            || progress.written.saturating_sub(written) >= step;
        if !(force || moved) {
            return None;
        }
        self.reported = (progress.downloaded, progress.written);
        Some(progress)
    }
}

/// Orchestrator state: idle or exactly one active session.
#[derive(Debug, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Active(Session),
}

impl SessionState {
    /// Start a session over a non-empty queue.
    ///
    /// Fails with [`ManagerError::AlreadyDownloading`] when a session is
    /// active and with [`ManagerError::Precondition`] for an empty queue.
    pub fn begin(&mut self, kind: DownloadKind, items: Vec<QueueItem>) -> ManagerResult<&mut Session> {
        if self.is_active() {
            return Err(ManagerError::AlreadyDownloading);
        }
        if items.is_empty() {
            return Err(ManagerError::Precondition("empty download queue".to_string()));
        }

        let total = items.iter().map(|item| item.expected_size).sum();
        *self = Self::Active(Session {
            kind,
            items,
            position: 0,
            ticket: 0,
            handle: None,
            total,
            done_downloaded: 0,
            done_written: 0,
            item_downloaded: 0,
            item_written: 0,
            reported: (0, 0),
        });
        match self {
            Self::Active(session) => Ok(session),
            Self::Idle => Err(ManagerError::Precondition("session not started".to_string())),
        }
    }

    /// Drop the active session, returning it.
    pub fn end(&mut self) -> Option<Session> {
        match std::mem::take(self) {
            Self::Active(session) => Some(session),
            Self::Idle => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active(_))
    }

    pub fn session(&self) -> Option<&Session> {
        match self {
            Self::Active(session) => Some(session),
            Self::Idle => None,
        }
    }

    pub fn session_mut(&mut self) -> Option<&mut Session> {
        match self {
            Self::Active(session) => Some(session),
            Self::Idle => None,
        }
    }
}
