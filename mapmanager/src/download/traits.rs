//! The Downloader collaborator.
//!
//! A [`Downloader`] fetches one URL into one file and reports back through
//! a channel. For every request it sends zero or more
//! [`FetchEvent::Progress`] events followed by exactly one terminal event:
//! [`Completed`](FetchEvent::Completed), [`Failed`](FetchEvent::Failed) or
//! [`TimedOut`](FetchEvent::TimedOut). A cancelled request sends nothing
//! further and removes whatever it wrote.

use std::path::PathBuf;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Identifies one submitted request so stale events can be discarded.
pub type Ticket = u64;

/// Channel on which a downloader reports.
pub type FetchEventSender = mpsc::UnboundedSender<FetchEvent>;

/// One file to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub ticket: Ticket,
    pub url: String,
    /// File to create. Parent directories are created as needed.
    pub destination: PathBuf,
}

/// Notification from a downloader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchEvent {
    /// Cumulative counters for the request.
    Progress {
        ticket: Ticket,
        downloaded: u64,
        written: u64,
    },
    /// The whole body is on disk at `path`.
    Completed { ticket: Ticket, path: PathBuf },
    /// Transfer failed. `code` is the HTTP status when there was one.
    Failed {
        ticket: Ticket,
        code: Option<u16>,
        message: String,
    },
    /// The transfer stalled for longer than the downloader allows.
    TimedOut { ticket: Ticket },
}

impl FetchEvent {
    /// Ticket of the request this event belongs to.
    pub fn ticket(&self) -> Ticket {
        match self {
            Self::Progress { ticket, .. }
            | Self::Completed { ticket, .. }
            | Self::Failed { ticket, .. }
            | Self::TimedOut { ticket } => *ticket,
        }
    }

    /// Whether no further events follow for this ticket.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Progress { .. })
    }
}

/// Handle to an in-flight request.
#[derive(Debug, Clone)]
pub struct FetchHandle {
    cancel: CancellationToken,
}

impl FetchHandle {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    /// Handle for a request that is already finished.
    pub fn detached() -> Self {
        Self {
            cancel: CancellationToken::new(),
        }
    }

    /// Ask the downloader to abandon the request.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Fetches files asynchronously.
///
/// Implementations must not block: the call returns once the request is
/// submitted and all reporting happens through `events`.
pub trait Downloader: Send + Sync {
    fn fetch(&self, request: FetchRequest, events: FetchEventSender) -> FetchHandle;
}
