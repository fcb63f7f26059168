//! Download pipeline.
//!
//! - [`traits`]: the [`Downloader`] collaborator and its event protocol
//! - [`http`]: `reqwest`-backed downloader
//! - [`checksum`]: SHA-256 verification of staged files
//! - [`session`]: queue items, the single-session state and progress counters
//! - [`orchestrator`]: the sequential, fail-fast session driver

pub mod checksum;
pub mod http;
pub mod orchestrator;
pub mod session;
pub mod traits;

pub use checksum::{file_sha256, verify_sha256};
pub use http::{HttpDownloader, DEFAULT_TIMEOUT_SECS};
pub use orchestrator::{ItemCommitter, Orchestrator, SessionOutcome, SessionUpdate, DEFAULT_PROGRESS_STEP};
pub use session::{DownloadKind, DownloadProgress, QueueItem, Session, SessionState};
pub use traits::{Downloader, FetchEvent, FetchEventSender, FetchHandle, FetchRequest, Ticket};
