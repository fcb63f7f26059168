//! Settings store backed by `config.ini`.
//!
//! Loads and saves user preferences. Parsing lives in [`super::parser`] and
//! serialization in [`super::writer`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use thiserror::Error;

use super::ManagerConfig;
use crate::features::FeatureSet;

/// Distribution point used until `url.json` says otherwise.
pub const DEFAULT_DISTRIBUTION_URL: &str = "https://data.example.org/maps";

/// Default stall timeout for downloads, in seconds.
pub const DEFAULT_DOWNLOAD_TIMEOUT_SECS: u64 = crate::download::DEFAULT_TIMEOUT_SECS;

/// Configuration file errors.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    /// Failed to read or parse the file
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] ini::Error),

    /// Failed to write the file
    #[error("Failed to write config file: {0}")]
    WriteError(String),

    /// A key holds a value that cannot be used
    #[error("Invalid configuration: {section}.{key} = '{value}' - {reason}")]
    InvalidValue {
        section: String,
        key: String,
        value: String,
        reason: String,
    },

    /// Failed to create the config directory
    #[error("Failed to create config directory: {0}")]
    DirectoryError(std::io::Error),
}

/// `[storage]`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageSettings {
    /// Managed storage root. Unset until the user picks one.
    pub root: Option<PathBuf>,
}

/// `[features]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureSettings {
    pub address_search: bool,
}

impl Default for FeatureSettings {
    fn default() -> Self {
        Self {
            address_search: FeatureSet::default().address_search,
        }
    }
}

/// `[distribution]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistributionSettings {
    pub url: String,
}

impl Default for DistributionSettings {
    fn default() -> Self {
        Self {
            url: DEFAULT_DISTRIBUTION_URL.to_string(),
        }
    }
}

/// `[download]`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSettings {
    /// Seconds without data before a transfer is abandoned.
    pub timeout: u64,
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_DOWNLOAD_TIMEOUT_SECS,
        }
    }
}

/// Contents of `config.ini`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    pub storage: StorageSettings,
    pub features: FeatureSettings,
    pub distribution: DistributionSettings,
    pub download: DownloadSettings,
}

impl ConfigFile {
    /// Load configuration from the default path.
    pub fn load() -> Result<Self, ConfigFileError> {
        Self::load_from(&config_file_path())
    }

    /// Load configuration from a specific path.
    ///
    /// If the file doesn't exist, returns defaults.
    pub fn load_from(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let ini = Ini::load_from_file(path)?;
        super::parser::parse_ini(&ini)
    }

    /// Save configuration to the default path.
    pub fn save(&self) -> Result<(), ConfigFileError> {
        self.save_to(&config_file_path())
    }

    /// Save configuration to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigFileError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(ConfigFileError::DirectoryError)?;
        }

        let content = super::writer::to_config_string(self);
        std::fs::write(path, content).map_err(|e| ConfigFileError::WriteError(e.to_string()))
    }

    /// Runtime configuration for [`MapManager`](crate::manager::MapManager).
    pub fn manager_config(&self) -> ManagerConfig {
        let mut config = ManagerConfig::default()
            .with_features(FeatureSet {
                address_search: self.features.address_search,
            })
            .with_distribution_url(self.distribution.url.clone())
            .with_timeout(Duration::from_secs(self.download.timeout));
        if let Some(root) = &self.storage.root {
            config = config.with_storage_root(root.clone());
        }
        config
    }
}

/// Directory holding `config.ini`.
pub fn config_directory() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("mapmanager")
}

/// Path to `config.ini`.
pub fn config_file_path() -> PathBuf {
    config_directory().join("config.ini")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConfigFile::default();

        assert!(config.storage.root.is_none());
        assert!(config.features.address_search);
        assert_eq!(config.distribution.url, DEFAULT_DISTRIBUTION_URL);
        assert_eq!(config.download.timeout, DEFAULT_DOWNLOAD_TIMEOUT_SECS);
    }

    #[test]
    fn test_load_nonexistent_returns_defaults() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config = ConfigFile::load_from(&temp_dir.path().join("nonexistent.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("nested/config.ini");

        let mut config = ConfigFile::default();
        config.storage.root = Some(PathBuf::from("/srv/maps"));
        config.features.address_search = false;
        config.distribution.url = "https://mirror.example.net/osm".to_string();
        config.download.timeout = 15;
        config.save_to(&path).unwrap();

        assert_eq!(ConfigFile::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_manager_config_from_file() {
        let mut config = ConfigFile::default();
        config.storage.root = Some(PathBuf::from("/srv/maps"));
        config.download.timeout = 5;

        let manager = config.manager_config();
        assert_eq!(manager.storage_root, PathBuf::from("/srv/maps"));
        assert_eq!(manager.timeout, Duration::from_secs(5));
        assert!(manager.features.address_search);
    }
}
