//! Typed notifications published by the manager.
//!
//! Subscribers get a `tokio::sync::broadcast` receiver. Publishing never
//! blocks and never fails: with no subscribers the event is dropped, and a
//! subscriber that falls behind sees `RecvError::Lagged`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Serialize;
use tokio::sync::broadcast;

use crate::catalog::DatasetKind;
use crate::download::DownloadProgress;
use crate::updates::UpdateInfo;

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Paths of compatible installed data, grouped by kind.
///
/// This is what the mapping and geocoding libraries are pointed at.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ActiveData {
    pub files: BTreeMap<DatasetKind, Vec<PathBuf>>,
}

impl ActiveData {
    pub fn paths(&self, kind: DatasetKind) -> &[PathBuf] {
        self.files.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn is_empty(&self) -> bool {
        self.files.values().all(Vec::is_empty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManagerEvent {
    StorageAvailabilityChanged(bool),
    DownloadingChanged(bool),
    DownloadProgress(DownloadProgress),
    /// Whether anything in the requested closure needs a download.
    MissingChanged(bool),
    MissingInfoChanged(String),
    /// The requested set changed.
    SubscriptionChanged,
    /// Installed data changed: a dataset was committed or files deleted.
    AvailabilityChanged,
    ActiveDataChanged(ActiveData),
    UpdatesFound(Vec<UpdateInfo>),
    Error(String),
}

/// Broadcast channel for [`ManagerEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ManagerEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.sender.subscribe()
    }

    pub fn publish(&self, event: ManagerEvent) {
        if let ManagerEvent::Error(message) = &event {
            tracing::warn!(%message, "manager error");
        } else {
            tracing::trace!(?event, "publishing event");
        }
        let _ = self.sender.send(event);
    }
}
