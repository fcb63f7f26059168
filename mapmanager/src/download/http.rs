//! HTTP implementation of the [`Downloader`] collaborator.
//!
//! Each request runs on its own tokio task. The body is streamed chunk by
//! chunk into the destination file; every chunk read is bounded by the
//! stall timeout, so a server that stops sending is reported as
//! [`FetchEvent::TimedOut`] instead of hanging the session.
//!
//! Transfers always start from scratch. On any failure or cancellation the
//! partially written file is removed.

use std::path::Path;
use std::time::Duration;

use reqwest::Client;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::traits::{Downloader, FetchEvent, FetchEventSender, FetchHandle, FetchRequest, Ticket};

/// Default stall timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Downloads over HTTP(S) with `reqwest`.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
    timeout: Duration,
}

impl Default for HttpDownloader {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }
}

impl HttpDownloader {
    /// Create a downloader that gives up after `timeout` without data.
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .connect_timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "failed to configure HTTP client, using defaults");
                Client::new()
            });
        Self { client, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Downloader for HttpDownloader {
    fn fetch(&self, request: FetchRequest, events: FetchEventSender) -> FetchHandle {
        let cancel = CancellationToken::new();
        let transfer = Transfer {
            client: self.client.clone(),
            timeout: self.timeout,
            cancel: cancel.clone(),
            events,
        };
        tokio::spawn(transfer.run(request));
        FetchHandle::new(cancel)
    }
}

/// Why a transfer did not complete.
enum Stop {
    Failed { code: Option<u16>, message: String },
    TimedOut,
    Cancelled,
}

struct Transfer {
    client: Client,
    timeout: Duration,
    cancel: CancellationToken,
    events: FetchEventSender,
}

impl Transfer {
    async fn run(self, request: FetchRequest) {
        let ticket = request.ticket;
        tracing::debug!(ticket, url = %request.url, dest = %request.destination.display(), "fetch started");

        let event = match self.transfer(&request).await {
            Ok(()) => {
                tracing::debug!(ticket, url = %request.url, "fetch completed");
                FetchEvent::Completed {
                    ticket,
                    path: request.destination.clone(),
                }
            }
            // The canceller owns cleanup of the staging file; a new session may
            // already be writing to the same path.
            Err(Stop::Cancelled) => {
                tracing::debug!(ticket, url = %request.url, "fetch cancelled");
                return;
            }
            Err(Stop::TimedOut) => {
                remove_partial(&request.destination).await;
                tracing::warn!(ticket, url = %request.url, "fetch timed out");
                FetchEvent::TimedOut { ticket }
            }
            Err(Stop::Failed { code, message }) => {
                remove_partial(&request.destination).await;
                tracing::warn!(ticket, url = %request.url, code, %message, "fetch failed");
                FetchEvent::Failed {
                    ticket,
                    code,
                    message,
                }
            }
        };
        // The receiver is gone only when the manager was dropped.
        let _ = self.events.send(event);
    }

    async fn transfer(&self, request: &FetchRequest) -> Result<(), Stop> {
        let mut response = self
            .bounded(self.client.get(&request.url).send())
            .await?
            .map_err(|e| Stop::Failed {
                code: e.status().map(|s| s.as_u16()),
                message: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Stop::Failed {
                code: Some(status.as_u16()),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_string(),
            });
        }

        if let Some(parent) = request.destination.parent() {
            fs::create_dir_all(parent).await.map_err(io_failure)?;
        }
        let mut file = File::create(&request.destination)
            .await
            .map_err(io_failure)?;

        let mut downloaded = 0u64;
        let mut written = 0u64;
        loop {
            let chunk = self
                .bounded(response.chunk())
                .await?
                .map_err(|e| Stop::Failed {
                    code: None,
                    message: e.to_string(),
                })?;
            let Some(chunk) = chunk else {
                break;
            };

            downloaded += chunk.len() as u64;
            file.write_all(&chunk).await.map_err(io_failure)?;
            written += chunk.len() as u64;
            self.progress(request.ticket, downloaded, written);
        }

        file.flush().await.map_err(io_failure)?;
        file.sync_all().await.map_err(io_failure)?;
        Ok(())
    }

    /// Await `future` unless the transfer is cancelled or stalls.
    async fn bounded<T>(&self, future: impl std::future::Future<Output = T>) -> Result<T, Stop> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Stop::Cancelled),
            result = tokio::time::timeout(self.timeout, future) => result.map_err(|_| Stop::TimedOut),
        }
    }

    fn progress(&self, ticket: Ticket, downloaded: u64, written: u64) {
        let _ = self.events.send(FetchEvent::Progress {
            ticket,
            downloaded,
            written,
        });
    }
}

fn io_failure(e: std::io::Error) -> Stop {
    Stop::Failed {
        code: None,
        message: e.to_string(),
    }
}

async fn remove_partial(path: &Path) {
    if let Err(e) = fs::remove_file(path).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %path.display(), error = %e, "failed to remove partial download");
        }
    }
}
