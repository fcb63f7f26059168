//! Refresh, download and updates commands.
//!
//! All three start a session on the manager and then drive its event loop
//! until the session ends, rendering progress. Ctrl-C stops the current
//! transfer; items installed so far are kept.

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use mapmanager::storage::format_size;
use mapmanager::{ManagerEvent, ManagerResult, MapManager};
use tokio::sync::broadcast::error::TryRecvError;
use tokio::sync::{broadcast, mpsc};

use crate::error::CliError;
use crate::runner::CliRunner;

/// How a driven session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SessionEnd {
    NothingToDo,
    Finished,
    Interrupted,
}

/// Drives manager sessions and owns the Ctrl-C channel.
struct SessionDriver {
    interrupts: mpsc::UnboundedReceiver<()>,
}

impl SessionDriver {
    fn new() -> Result<Self, CliError> {
        let (tx, interrupts) = mpsc::unbounded_channel();
        ctrlc::set_handler(move || {
            let _ = tx.send(());
        })
        .map_err(|e| CliError::Config(format!("Failed to set signal handler: {}", e)))?;
        Ok(Self { interrupts })
    }

    /// Start a session with `start` and process events until it is over.
    ///
    /// A chained session (catalog after `url.json`) is driven to its end as
    /// well.
    async fn drive<F>(&mut self, manager: &mut MapManager, start: F) -> Result<SessionEnd, CliError>
    where
        F: FnOnce(&mut MapManager) -> ManagerResult<bool>,
    {
        let mut events = manager.subscribe();
        if !start(manager)? {
            return Ok(SessionEnd::NothingToDo);
        }

        let bar = progress_bar();
        let mut renderer = Renderer::new(&bar);
        let mut interrupted = false;

        loop {
            tokio::select! {
                more = manager.process_next_event() => {
                    if !more {
                        break;
                    }
                }
                Some(()) = self.interrupts.recv() => interrupted = true,
            }
            // The manager is only touched outside the select.
            if interrupted {
                bar.println(format!("{}", style("Stopping download...").yellow()));
                manager.stop_download();
            }
            renderer.drain(&mut events);
            if interrupted {
                break;
            }
        }
        renderer.drain(&mut events);
        bar.finish_and_clear();

        if interrupted {
            println!("{}", style("Download stopped. Installed items are kept.").yellow());
            return Ok(SessionEnd::Interrupted);
        }
        match renderer.failure {
            Some(message) => Err(CliError::DownloadFailed(message)),
            None => Ok(SessionEnd::Finished),
        }
    }
}

fn progress_bar() -> ProgressBar {
    let bar = ProgressBar::new(0);
    let template = "{spinner:.green} [{bar:40.cyan/blue}] {bytes}/{total_bytes} {msg}";
    let bar_style = ProgressStyle::with_template(template)
        .map(|style| style.progress_chars("=> "))
        .unwrap_or_else(|_| ProgressStyle::default_bar());
    bar.set_style(bar_style);
    bar
}

/// Applies manager events to the progress bar.
struct Renderer<'a> {
    bar: &'a ProgressBar,
    session_started: bool,
    failure: Option<String>,
}

impl<'a> Renderer<'a> {
    fn new(bar: &'a ProgressBar) -> Self {
        Self {
            bar,
            session_started: false,
            failure: None,
        }
    }

    fn drain(&mut self, events: &mut broadcast::Receiver<ManagerEvent>) {
        loop {
            match events.try_recv() {
                Ok(event) => self.render(event),
                Err(TryRecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "progress renderer lagged");
                }
                Err(_) => break,
            }
        }
    }

    fn render(&mut self, event: ManagerEvent) {
        match event {
            ManagerEvent::DownloadingChanged(true) => self.session_started = true,
            ManagerEvent::DownloadProgress(progress) => {
                let length = progress.total.max(progress.written);
                self.bar.set_length(length);
                self.bar.set_position(progress.written);
                let current = progress
                    .current
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| progress.kind.to_string());
                self.bar.set_message(format!(
                    "[{}/{}] {}",
                    (progress.item_index + 1).min(progress.item_count),
                    progress.item_count,
                    current
                ));
            }
            // Errors published before the session starts are advisory.
            ManagerEvent::Error(message) if !self.session_started => {
                self.bar
                    .println(format!("{} {}", style("Warning:").yellow(), message));
            }
            ManagerEvent::Error(message) => {
                self.bar.println(format!("{} {}", style("✗").red(), message));
                self.failure = Some(message);
            }
            _ => {}
        }
    }
}

/// Fetch `url.json` and the catalog.
pub async fn run_refresh(runner: &mut CliRunner) -> Result<(), CliError> {
    let mut driver = SessionDriver::new()?;
    let manager = runner.manager_mut();
    driver.drive(manager, MapManager::refresh_catalog).await?;

    match manager.catalog() {
        Some(catalog) => println!(
            "{} Catalog updated: {} datasets from {}",
            style("✓").green(),
            catalog.len(),
            manager.base_url()
        ),
        None => println!("{}", style("No catalog available.").yellow()),
    }
    Ok(())
}

/// Download everything missing for the requested set.
pub async fn run_download(runner: &mut CliRunner) -> Result<(), CliError> {
    let mut driver = SessionDriver::new()?;
    let manager = runner.manager_mut();

    if manager.missing() {
        println!("Downloading:");
        for line in manager.missing_info().lines() {
            println!("  {}", line);
        }
        println!();
    }

    match driver.drive(manager, MapManager::get_missing).await? {
        SessionEnd::NothingToDo => println!("Nothing to download, all requested data is installed."),
        SessionEnd::Finished => println!("{} All requested data is installed.", style("✓").green()),
        SessionEnd::Interrupted => {}
    }
    Ok(())
}

/// Check the catalog for newer versions and optionally install them.
pub async fn run_updates(runner: &mut CliRunner, install: bool) -> Result<(), CliError> {
    let mut driver = SessionDriver::new()?;
    let manager = runner.manager_mut();

    if driver.drive(manager, MapManager::check_for_updates).await? == SessionEnd::Interrupted {
        return Ok(());
    }

    let updates = manager.updates().to_vec();
    if updates.is_empty() {
        println!("{} Everything is up to date.", style("✓").green());
        return Ok(());
    }

    println!("Updates available:");
    for update in &updates {
        let delta = if update.size_delta >= 0 {
            format!("+{}", format_size(update.size_delta as u64))
        } else {
            format!("-{}", format_size(update.size_delta.unsigned_abs()))
        };
        println!(
            "  {:<32} {} → {}  ({})",
            update.name, update.old_version, update.new_version, delta
        );
    }

    if !install {
        println!();
        println!("Run 'mapmanager updates --install' to install them.");
        return Ok(());
    }

    println!();
    if driver.drive(manager, MapManager::get_updates).await? == SessionEnd::Finished {
        println!("{} Updates installed.", style("✓").green());
    }
    Ok(())
}
