//! CLI runner for common setup.
//!
//! Loads the configuration, initializes logging and builds the
//! [`MapManager`] every command works on.

use std::path::{Path, PathBuf};

use mapmanager::config::{config_file_path, ConfigFile};
use mapmanager::logging::{default_log_dir, default_log_file, init_logging_full, LoggingGuard};
use mapmanager::MapManager;
use tracing::info;

use crate::error::CliError;

/// Options shared by every command.
#[derive(Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Alternative `config.ini`.
    pub config: Option<PathBuf>,
    /// Storage root overriding the configured one.
    pub root: Option<PathBuf>,
    /// Mirror log output on stderr.
    pub verbose: bool,
}

/// Runner that owns the manager for the lifetime of one command.
pub struct CliRunner {
    #[allow(dead_code)]
    logging_guard: LoggingGuard,
    config_path: PathBuf,
    manager: MapManager,
}

impl CliRunner {
    /// Load config, initialize logging and create the manager.
    ///
    /// Must be called from within the tokio runtime: the HTTP downloader
    /// spawns its transfers there.
    pub fn new(options: &GlobalOptions) -> Result<Self, CliError> {
        let config_path = options.config.clone().unwrap_or_else(config_file_path);
        let config = ConfigFile::load_from(&config_path)?;

        let logging_guard = init_logging_full(&default_log_dir(), default_log_file(), options.verbose)
            .map_err(|e| CliError::LoggingInit(e.to_string()))?;

        let mut manager_config = config.manager_config();
        if let Some(root) = &options.root {
            manager_config = manager_config.with_storage_root(root.clone());
        }

        let manager = MapManager::new(manager_config);
        Ok(Self {
            logging_guard,
            config_path,
            manager,
        })
    }

    pub fn manager(&self) -> &MapManager {
        &self.manager
    }

    pub fn manager_mut(&mut self) -> &mut MapManager {
        &mut self.manager
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    /// Log startup information for a command.
    pub fn log_startup(&self, command: &str) {
        info!("MapManager v{}", mapmanager::VERSION);
        info!(
            command,
            root = %self.manager.config().storage_root.display(),
            "MapManager CLI started"
        );
    }
}
