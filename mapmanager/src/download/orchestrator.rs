//! Sequential download orchestrator.
//!
//! Drives one session at a time through a [`Downloader`]:
//!
//! ```text
//!            start(kind, queue)
//!   Idle ─────────────────────────► Active(item 0)
//!    ▲                                   │ Completed → commit ok
//!    │                                   ▼
//!    ├──── last item committed ──── Active(item n)
//!    ├──── Failed / TimedOut / commit error  (rest of queue dropped)
//!    └──── cancel()                          (current transfer abandoned)
//! ```
//!
//! The orchestrator does not know how an item is installed. On a completed
//! transfer it hands the staged file to an [`ItemCommitter`], and a commit
//! error ends the session exactly like a transfer failure. Items committed
//! earlier in the session stay installed.
//!
//! Every submitted request carries a fresh ticket. Events with any other
//! ticket belong to an abandoned transfer and are ignored.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::mpsc;

use super::session::{DownloadKind, DownloadProgress, QueueItem, SessionState};
use super::traits::{Downloader, FetchEvent, FetchEventSender, FetchRequest, Ticket};
use crate::catalog::DatasetId;
use crate::error::{ManagerError, ManagerResult};

/// Default minimum byte advance between progress reports (1 MiB).
pub const DEFAULT_PROGRESS_STEP: u64 = 1024 * 1024;

/// Installs a transferred file.
pub trait ItemCommitter {
    /// Move `staged` into place for `item` and record it.
    ///
    /// Any error aborts the session. The staged file is removed by the
    /// orchestrator if it is still present afterwards.
    fn commit(&mut self, kind: DownloadKind, item: &QueueItem, staged: &Path) -> ManagerResult<()>;
}

/// How a session ended.
#[derive(Debug)]
pub enum SessionOutcome {
    /// Every item was committed.
    Completed,
    /// The session stopped at the first failing item.
    Failed {
        failed: QueueItem,
        error: ManagerError,
        /// Items dropped without being attempted.
        skipped: usize,
    },
    /// Stopped by [`Orchestrator::cancel`].
    Cancelled,
}

/// Observable result of handling one downloader event.
#[derive(Debug)]
pub enum SessionUpdate {
    Progress(DownloadProgress),
    /// An item was committed.
    Installed {
        kind: DownloadKind,
        dataset_id: Option<DatasetId>,
    },
    /// The session is over and the orchestrator is idle.
    Finished {
        kind: DownloadKind,
        outcome: SessionOutcome,
    },
}

/// Owns the session state and the downloader's event channel.
pub struct Orchestrator {
    downloader: Arc<dyn Downloader>,
    state: SessionState,
    events_tx: FetchEventSender,
    events_rx: mpsc::UnboundedReceiver<FetchEvent>,
    next_ticket: Ticket,
    progress_step: u64,
}

impl Orchestrator {
    pub fn new(downloader: Arc<dyn Downloader>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            downloader,
            state: SessionState::Idle,
            events_tx,
            events_rx,
            next_ticket: 1,
            progress_step: DEFAULT_PROGRESS_STEP,
        }
    }

    /// Set the progress reporting granularity in bytes.
    pub fn with_progress_step(mut self, step: u64) -> Self {
        self.progress_step = step.max(1);
        self
    }

    pub fn set_progress_step(&mut self, step: u64) {
        self.progress_step = step.max(1);
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Kind of the active session.
    pub fn active_kind(&self) -> Option<DownloadKind> {
        self.state.session().map(|session| session.kind())
    }

    /// Progress of the active session.
    pub fn progress(&self) -> Option<DownloadProgress> {
        self.state.session().map(|session| session.progress())
    }

    /// Start a session.
    ///
    /// Returns `Ok(false)` without changing state when `queue` is empty,
    /// and `Ok(true)` once the first item has been submitted.
    pub fn start(&mut self, kind: DownloadKind, queue: Vec<QueueItem>) -> ManagerResult<bool> {
        if self.state.is_active() {
            return Err(ManagerError::AlreadyDownloading);
        }
        if queue.is_empty() {
            tracing::debug!(%kind, "nothing to download");
            return Ok(false);
        }

        let count = queue.len();
        let total: u64 = queue.iter().map(|item| item.expected_size).sum();
        self.state.begin(kind, queue)?;
        tracing::info!(%kind, items = count, total_bytes = total, "download session started");
        self.submit_current();
        Ok(true)
    }

    /// Abandon the current transfer and drop the rest of the queue.
    ///
    /// Returns `None` when idle.
    pub fn cancel(&mut self) -> Option<SessionUpdate> {
        let session = self.state.end()?;
        session.cancel_transfer();
        if let Some(item) = session.current() {
            remove_staged(&item.staging_path());
        }
        tracing::info!(
            kind = %session.kind(),
            skipped = session.remaining().len(),
            "download session cancelled"
        );
        Some(SessionUpdate::Finished {
            kind: session.kind(),
            outcome: SessionOutcome::Cancelled,
        })
    }

    /// Wait for the next downloader event. Returns `None` when idle.
    pub async fn next_event(&mut self) -> Option<FetchEvent> {
        if !self.state.is_active() {
            return None;
        }
        // The orchestrator holds a sender, so the channel never closes.
        self.events_rx.recv().await
    }

    /// Apply one downloader event to the session.
    pub fn handle_event(
        &mut self,
        event: FetchEvent,
        committer: &mut dyn ItemCommitter,
    ) -> Vec<SessionUpdate> {
        let step = self.progress_step;
        let Some(session) = self.state.session_mut() else {
            return Vec::new();
        };
        if event.ticket() != session.ticket() {
            tracing::trace!(ticket = event.ticket(), "ignoring stale download event");
            return Vec::new();
        }

        match event {
            FetchEvent::Progress {
                downloaded,
                written,
                ..
            } => {
                session.record(downloaded, written);
                session
                    .take_progress(step, false)
                    .map(SessionUpdate::Progress)
                    .into_iter()
                    .collect()
            }
            FetchEvent::Completed { path, .. } => self.complete_current(&path, committer),
            FetchEvent::Failed { code, message, .. } => {
                let url = self.current_url();
                let reason = match code {
                    Some(code) => format!("HTTP {}: {}", code, message),
                    None => message,
                };
                self.fail(ManagerError::DownloadFailed { url, reason })
            }
            FetchEvent::TimedOut { .. } => {
                let url = self.current_url();
                self.fail(ManagerError::Timeout { url })
            }
        }
    }

    fn complete_current(&mut self, staged: &Path, committer: &mut dyn ItemCommitter) -> Vec<SessionUpdate> {
        let step = self.progress_step;
        let Some(session) = self.state.session_mut() else {
            return Vec::new();
        };
        let kind = session.kind();
        let Some(item) = session.current().cloned() else {
            return Vec::new();
        };

        if let Err(error) = committer.commit(kind, &item, staged) {
            remove_staged(staged);
            return self.fail(error);
        }
        tracing::info!(
            %kind,
            dataset = item.dataset_id.as_ref().map(|id| id.as_str()).unwrap_or("-"),
            path = %item.destination.display(),
            "download committed"
        );

        let mut updates = vec![SessionUpdate::Installed {
            kind,
            dataset_id: item.dataset_id.clone(),
        }];
        let more = session.advance();
        if let Some(progress) = session.take_progress(step, true) {
            updates.push(SessionUpdate::Progress(progress));
        }

        if more {
            self.submit_current();
        } else {
            self.state.end();
            tracing::info!(%kind, "download session completed");
            updates.push(SessionUpdate::Finished {
                kind,
                outcome: SessionOutcome::Completed,
            });
        }
        updates
    }

    /// End the session on the current item's failure.
    fn fail(&mut self, error: ManagerError) -> Vec<SessionUpdate> {
        let Some(session) = self.state.end() else {
            return Vec::new();
        };
        let kind = session.kind();
        let skipped = session.remaining().len();
        tracing::warn!(%kind, error = %error, skipped, "download session aborted");

        let outcome = match session.current().cloned() {
            Some(failed) => {
                remove_staged(&failed.staging_path());
                SessionOutcome::Failed {
                    failed,
                    error,
                    skipped,
                }
            }
            None => SessionOutcome::Cancelled,
        };
        vec![SessionUpdate::Finished { kind, outcome }]
    }

    fn submit_current(&mut self) {
        let ticket = self.next_ticket;
        self.next_ticket += 1;
        let Some(session) = self.state.session_mut() else {
            return;
        };
        let Some(item) = session.current() else {
            return;
        };

        let request = FetchRequest {
            ticket,
            url: item.url.clone(),
            destination: item.staging_path(),
        };
        tracing::debug!(
            ticket,
            url = %request.url,
            item = session.progress().item_index,
            "submitting download"
        );
        let handle = self.downloader.fetch(request, self.events_tx.clone());
        session.attach(ticket, handle);
    }

    fn current_url(&self) -> String {
        self.state
            .session()
            .and_then(|session| session.current())
            .map(|item| item.url.clone())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("state", &self.state)
            .field("next_ticket", &self.next_ticket)
            .field("progress_step", &self.progress_step)
            .finish()
    }
}

fn remove_staged(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove staged file");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use tempfile::TempDir;

    use crate::download::traits::FetchHandle;

    /// Writes a fixed body or fails, chosen per URL, without a network.
    #[derive(Default)]
    struct ScriptedDownloader {
        failures: HashMap<String, Option<u16>>,
        requests: Mutex<Vec<FetchRequest>>,
    }

    impl ScriptedDownloader {
        fn failing(url: &str, code: Option<u16>) -> Self {
            let mut failures = HashMap::new();
            failures.insert(url.to_string(), code);
            Self {
                failures,
                requests: Mutex::new(Vec::new()),
            }
        }
    }

    impl Downloader for ScriptedDownloader {
        fn fetch(&self, request: FetchRequest, events: FetchEventSender) -> FetchHandle {
            self.requests.lock().unwrap().push(request.clone());
            let ticket = request.ticket;
            match self.failures.get(&request.url) {
                Some(Some(code)) => {
                    events
                        .send(FetchEvent::Failed {
                            ticket,
                            code: Some(*code),
                            message: "scripted".to_string(),
                        })
                        .unwrap();
                }
                Some(None) => events.send(FetchEvent::TimedOut { ticket }).unwrap(),
                None => {
                    std::fs::create_dir_all(request.destination.parent().unwrap()).unwrap();
                    std::fs::write(&request.destination, request.url.as_bytes()).unwrap();
                    let len = request.url.len() as u64;
                    events
                        .send(FetchEvent::Progress {
                            ticket,
                            downloaded: len,
                            written: len,
                        })
                        .unwrap();
                    events
                        .send(FetchEvent::Completed {
                            ticket,
                            path: request.destination,
                        })
                        .unwrap();
                }
            }
            FetchHandle::detached()
        }
    }

    /// Renames staged files into place and remembers what it installed.
    #[derive(Default)]
    struct RecordingCommitter {
        installed: Vec<PathBuf>,
        refuse: Option<PathBuf>,
    }

    impl ItemCommitter for RecordingCommitter {
        fn commit(&mut self, _kind: DownloadKind, item: &QueueItem, staged: &Path) -> ManagerResult<()> {
            if self.refuse.as_deref() == Some(item.destination.as_path()) {
                return Err(ManagerError::RegistryWrite {
                    path: item.destination.clone(),
                    reason: "disk I/O error".to_string(),
                });
            }
            std::fs::rename(staged, &item.destination).unwrap();
            self.installed.push(item.destination.clone());
            Ok(())
        }
    }

    fn queue(root: &Path, names: &[&str]) -> Vec<QueueItem> {
        names
            .iter()
            .map(|name| QueueItem {
                dataset_id: Some(DatasetId::new(format!("territory/{}", name))),
                url: format!("http://example.com/{}", name),
                destination: root.join(format!("{}.dat", name)),
                expected_size: 10,
                version: "1".to_string(),
                sha256: None,
            })
            .collect()
    }

    async fn drain(
        orchestrator: &mut Orchestrator,
        committer: &mut RecordingCommitter,
    ) -> Vec<SessionUpdate> {
        let mut updates = Vec::new();
        while let Some(event) = orchestrator.next_event().await {
            updates.extend(orchestrator.handle_event(event, committer));
        }
        updates
    }

    fn finished(updates: &[SessionUpdate]) -> &SessionOutcome {
        updates
            .iter()
            .find_map(|update| match update {
                SessionUpdate::Finished { outcome, .. } => Some(outcome),
                _ => None,
            })
            .expect("session did not finish")
    }

    #[tokio::test]
    async fn test_empty_queue_is_noop() {
        let mut orchestrator = Orchestrator::new(Arc::new(ScriptedDownloader::default()));
        assert!(!orchestrator.start(DownloadKind::Countries, Vec::new()).unwrap());
        assert!(!orchestrator.is_active());
        assert!(orchestrator.next_event().await.is_none());
    }

    #[tokio::test]
    async fn test_queue_drains_in_order() {
        let temp = TempDir::new().unwrap();
        let downloader = Arc::new(ScriptedDownloader::default());
        let mut orchestrator = Orchestrator::new(downloader.clone()).with_progress_step(1);
        let mut committer = RecordingCommitter::default();

        orchestrator
            .start(DownloadKind::Countries, queue(temp.path(), &["a", "b", "c"]))
            .unwrap();
        let updates = drain(&mut orchestrator, &mut committer).await;

        assert!(matches!(finished(&updates), SessionOutcome::Completed));
        assert_eq!(
            committer.installed,
            vec![
                temp.path().join("a.dat"),
                temp.path().join("b.dat"),
                temp.path().join("c.dat")
            ]
        );
        let staged: Vec<_> = downloader
            .requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.destination.clone())
            .collect();
        assert_eq!(staged[0], temp.path().join("a.dat.part"));
        assert!(!orchestrator.is_active());
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_queue() {
        let temp = TempDir::new().unwrap();
        let downloader = Arc::new(ScriptedDownloader::failing("http://example.com/b", Some(500)));
        let mut orchestrator = Orchestrator::new(downloader.clone());
        let mut committer = RecordingCommitter::default();

        orchestrator
            .start(DownloadKind::Countries, queue(temp.path(), &["a", "b", "c"]))
            .unwrap();
        let updates = drain(&mut orchestrator, &mut committer).await;

        match finished(&updates) {
            SessionOutcome::Failed {
                failed,
                error,
                skipped,
            } => {
                assert_eq!(failed.url, "http://example.com/b");
                assert!(error.to_string().contains("HTTP 500"));
                assert_eq!(*skipped, 1);
            }
            other => panic!("expected failure, got {:?}", other),
        }
        assert_eq!(committer.installed, vec![temp.path().join("a.dat")]);
        assert_eq!(downloader.requests.lock().unwrap().len(), 2);
        assert!(!orchestrator.is_active());
    }

    #[tokio::test]
    async fn test_timeout_is_failure() {
        let temp = TempDir::new().unwrap();
        let downloader = Arc::new(ScriptedDownloader::failing("http://example.com/a", None));
        let mut orchestrator = Orchestrator::new(downloader);
        let mut committer = RecordingCommitter::default();

        orchestrator
            .start(DownloadKind::Countries, queue(temp.path(), &["a", "b"]))
            .unwrap();
        let updates = drain(&mut orchestrator, &mut committer).await;

        assert!(matches!(
            finished(&updates),
            SessionOutcome::Failed {
                error: ManagerError::Timeout { .. },
                ..
            }
        ));
        assert!(committer.installed.is_empty());
    }

    #[tokio::test]
    async fn test_commit_error_aborts_and_removes_staged() {
        let temp = TempDir::new().unwrap();
        let mut orchestrator = Orchestrator::new(Arc::new(ScriptedDownloader::default()));
        let mut committer = RecordingCommitter {
            refuse: Some(temp.path().join("b.dat")),
            ..Default::default()
        };

        orchestrator
            .start(DownloadKind::Countries, queue(temp.path(), &["a", "b", "c"]))
            .unwrap();
        let updates = drain(&mut orchestrator, &mut committer).await;

        assert!(matches!(
            finished(&updates),
            SessionOutcome::Failed {
                error: ManagerError::RegistryWrite { .. },
                skipped: 1,
                ..
            }
        ));
        assert_eq!(committer.installed, vec![temp.path().join("a.dat")]);
        assert!(!temp.path().join("b.dat.part").exists());
        assert!(!temp.path().join("c.dat.part").exists());
    }

    #[tokio::test]
    async fn test_second_start_rejected_while_active() {
        let temp = TempDir::new().unwrap();
        let mut orchestrator = Orchestrator::new(Arc::new(ScriptedDownloader::default()));
        orchestrator
            .start(DownloadKind::Countries, queue(temp.path(), &["a"]))
            .unwrap();

        let second = orchestrator.start(DownloadKind::CatalogRefresh, queue(temp.path(), &["b"]));
        assert!(matches!(second, Err(ManagerError::AlreadyDownloading)));
        assert_eq!(orchestrator.active_kind(), Some(DownloadKind::Countries));
    }

    #[tokio::test]
    async fn test_cancel_ignores_late_events() {
        let temp = TempDir::new().unwrap();
        let mut orchestrator = Orchestrator::new(Arc::new(ScriptedDownloader::default()));
        let mut committer = RecordingCommitter::default();
        orchestrator
            .start(DownloadKind::Countries, queue(temp.path(), &["a", "b"]))
            .unwrap();

        let update = orchestrator.cancel().unwrap();
        assert!(matches!(
            update,
            SessionUpdate::Finished {
                outcome: SessionOutcome::Cancelled,
                ..
            }
        ));
        assert!(!orchestrator.is_active());
        assert!(!temp.path().join("a.dat.part").exists());

        // A new session must not pick up the abandoned transfer's events.
        orchestrator
            .start(DownloadKind::Countries, queue(temp.path(), &["c"]))
            .unwrap();
        let updates = drain(&mut orchestrator, &mut committer).await;
        assert!(matches!(finished(&updates), SessionOutcome::Completed));
        assert_eq!(committer.installed, vec![temp.path().join("c.dat")]);
        assert!(orchestrator.cancel().is_none());
    }

    #[tokio::test]
    async fn test_progress_reported_at_item_boundaries() {
        let temp = TempDir::new().unwrap();
        let mut orchestrator =
            Orchestrator::new(Arc::new(ScriptedDownloader::default())).with_progress_step(u64::MAX);
        let mut committer = RecordingCommitter::default();

        orchestrator
            .start(DownloadKind::Countries, queue(temp.path(), &["a", "b"]))
            .unwrap();
        let updates = drain(&mut orchestrator, &mut committer).await;

        let progress: Vec<u64> = updates
            .iter()
            .filter_map(|update| match update {
                SessionUpdate::Progress(p) => Some(p.downloaded),
                _ => None,
            })
            .collect();
        assert_eq!(progress.len(), 2);
        assert!(progress[0] < progress[1]);
    }
}
