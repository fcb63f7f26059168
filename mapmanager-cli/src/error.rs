//! CLI error handling with user-friendly messages.
//!
//! Centralizes error handling for the CLI, providing consistent formatting
//! and the exit code.

use std::fmt;
use std::process;

use mapmanager::config::ConfigFileError;
use mapmanager::{ErrorKind, ManagerError};

/// CLI-specific errors with user-friendly messages.
#[derive(Debug)]
pub enum CliError {
    /// Failed to initialize logging
    LoggingInit(String),
    /// Configuration error
    Config(String),
    /// Operation rejected or failed inside the manager
    Manager(ManagerError),
    /// Terminal interaction failed
    Prompt(String),
    /// A download session ended in failure
    DownloadFailed(String),
}

impl CliError {
    /// Exit the process with an appropriate error message and code.
    pub fn exit(&self) -> ! {
        eprintln!("{} {}", console::style("Error:").red().bold(), self);

        match self {
            CliError::Manager(e) if e.kind() == ErrorKind::StorageUnavailable => {
                eprintln!();
                eprintln!("Set the storage directory with --root or in config.ini:");
                eprintln!("  [storage]");
                eprintln!("  root = /path/to/Maps");
            }
            CliError::Manager(ManagerError::Precondition(message))
                if message.contains("catalog") =>
            {
                eprintln!();
                eprintln!("Fetch the catalog first: mapmanager refresh");
            }
            _ => {}
        }

        process::exit(1)
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::LoggingInit(msg) => write!(f, "Failed to initialize logging: {}", msg),
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::Manager(e) => write!(f, "{}", e),
            CliError::Prompt(msg) => write!(f, "Prompt failed: {}", msg),
            CliError::DownloadFailed(msg) => write!(f, "Download failed: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::Manager(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ManagerError> for CliError {
    fn from(e: ManagerError) -> Self {
        CliError::Manager(e)
    }
}

impl From<ConfigFileError> for CliError {
    fn from(e: ConfigFileError) -> Self {
        CliError::Config(e.to_string())
    }
}

impl From<dialoguer::Error> for CliError {
    fn from(e: dialoguer::Error) -> Self {
        CliError::Prompt(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_wraps_manager_error() {
        let err = CliError::from(ManagerError::AlreadyDownloading);
        assert_eq!(err.to_string(), "a download is already in progress");
    }

    #[test]
    fn test_config_error_conversion() {
        let err = CliError::from(ConfigFileError::WriteError("disk full".to_string()));
        assert!(matches!(err, CliError::Config(ref msg) if msg.contains("disk full")));
    }
}
