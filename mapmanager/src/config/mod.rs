//! Configuration.
//!
//! [`ConfigFile`] is the persisted settings store (`config.ini`);
//! [`ManagerConfig`] is the runtime configuration the manager is built from.

mod file;
mod parser;
mod writer;

pub use file::{
    config_directory, config_file_path, ConfigFile, ConfigFileError, DistributionSettings,
    DownloadSettings, FeatureSettings, StorageSettings, DEFAULT_DISTRIBUTION_URL,
    DEFAULT_DOWNLOAD_TIMEOUT_SECS,
};

use std::path::PathBuf;
use std::time::Duration;

use crate::download::DEFAULT_PROGRESS_STEP;
use crate::features::FeatureSet;

/// Runtime configuration of the map manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Managed storage root. Empty when not configured.
    pub storage_root: PathBuf,

    /// Selected optional features.
    pub features: FeatureSet,

    /// Where `url.json` is fetched from.
    pub default_distribution_url: String,

    /// Stall timeout handed to the HTTP downloader.
    pub timeout: Duration,

    /// Minimum byte advance between progress events.
    pub progress_step: u64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::new(),
            features: FeatureSet::default(),
            default_distribution_url: DEFAULT_DISTRIBUTION_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_DOWNLOAD_TIMEOUT_SECS),
            progress_step: DEFAULT_PROGRESS_STEP,
        }
    }
}

impl ManagerConfig {
    /// Create a configuration for the given storage root.
    pub fn new(storage_root: impl Into<PathBuf>) -> Self {
        Self {
            storage_root: storage_root.into(),
            ..Default::default()
        }
    }

    /// Set the storage root.
    pub fn with_storage_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.storage_root = root.into();
        self
    }

    /// Set the feature selection.
    pub fn with_features(mut self, features: FeatureSet) -> Self {
        self.features = features;
        self
    }

    /// Set the distribution URL.
    pub fn with_distribution_url(mut self, url: impl Into<String>) -> Self {
        self.default_distribution_url = url.into();
        self
    }

    /// Set the download stall timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the progress reporting step in bytes.
    pub fn with_progress_step(mut self, step: u64) -> Self {
        self.progress_step = step;
        self
    }

    /// Whether a storage root has been chosen.
    pub fn has_storage_root(&self) -> bool {
        !self.storage_root.as_os_str().is_empty()
    }
}
