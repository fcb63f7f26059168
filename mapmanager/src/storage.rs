//! Managed storage root: layout, availability checks and directory walks.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};

use sysinfo::Disks;

use crate::error::{ManagerError, ManagerResult};

/// Distribution base URL document.
pub const FNAME_SERVER_URL: &str = "url.json";
/// Provided catalog document.
pub const FNAME_CATALOG: &str = "countries_provided.json";
/// Requested set document.
pub const FNAME_REQUESTED: &str = "countries_requested.json";
/// Ownership registry database.
pub const FNAME_REGISTRY: &str = "files.sqlite";

/// Suffix of files still being written by the downloader.
pub const PARTIAL_SUFFIX: &str = ".part";

const WRITE_PROBE: &str = ".mapmanager-write-probe";

/// Paths of the manager's own documents under a storage root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageLayout {
    root: PathBuf,
}

impl StorageLayout {
    /// Layout rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn server_url(&self) -> PathBuf {
        self.root.join(FNAME_SERVER_URL)
    }

    pub fn catalog(&self) -> PathBuf {
        self.root.join(FNAME_CATALOG)
    }

    pub fn requested(&self) -> PathBuf {
        self.root.join(FNAME_REQUESTED)
    }

    pub fn registry(&self) -> PathBuf {
        self.root.join(FNAME_REGISTRY)
    }

    /// Absolute path for a path relative to the root.
    pub fn full_path(&self, relative: &str) -> PathBuf {
        self.root.join(relative)
    }

    /// Whether `path` is one of the manager's own documents.
    ///
    /// These are never garbage collected. SQLite side files are included.
    pub fn is_reserved(&self, path: &Path) -> bool {
        if path.parent() != Some(self.root.as_path()) {
            return false;
        }
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(is_reserved_name)
    }

    /// Verify the root exists, is a directory and accepts writes.
    pub fn check_available(&self) -> ManagerResult<()> {
        let unavailable = |reason: &str| ManagerError::StorageUnavailable {
            path: self.root.clone(),
            reason: reason.to_string(),
        };

        if self.root.as_os_str().is_empty() {
            return Err(unavailable("storage root is not configured"));
        }
        let metadata = fs::metadata(&self.root).map_err(|_| unavailable("directory does not exist"))?;
        if !metadata.is_dir() {
            return Err(unavailable("not a directory"));
        }

        let probe = self.root.join(WRITE_PROBE);
        OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&probe)
            .map_err(|e| unavailable(&format!("not writable: {}", e)))?;
        fs::remove_file(&probe).ok();
        Ok(())
    }
}

/// Whether `name`, directly under the storage root, belongs to the manager.
pub fn is_reserved_name(name: &str) -> bool {
    matches!(
        name,
        FNAME_SERVER_URL | FNAME_CATALOG | FNAME_REQUESTED | FNAME_REGISTRY | WRITE_PROBE
    ) || name
        .strip_prefix(FNAME_REGISTRY)
        .is_some_and(|suffix| matches!(suffix, "-journal" | "-wal" | "-shm"))
}

/// Path of the partial file the downloader writes for `destination`.
pub fn partial_path(destination: &Path) -> PathBuf {
    let mut name = destination.as_os_str().to_owned();
    name.push(PARTIAL_SUFFIX);
    PathBuf::from(name)
}

/// Free bytes on the volume holding `path`, when it can be determined.
///
/// Picks the disk with the longest mount point that prefixes `path`.
pub fn available_space(path: &Path) -> Option<u64> {
    let path = path.canonicalize().ok()?;
    let disks = Disks::new_with_refreshed_list();
    disks
        .list()
        .iter()
        .filter(|disk| path.starts_with(disk.mount_point()))
        .max_by_key(|disk| disk.mount_point().as_os_str().len())
        .map(|disk| disk.available_space())
}

/// Every regular file below `root`, recursively, with its size.
///
/// Symlinks are reported as files and never followed.
pub fn walk_files(root: &Path) -> ManagerResult<Vec<(PathBuf, u64)>> {
    let mut files = Vec::new();
    walk_into(root, &mut files)?;
    files.sort();
    Ok(files)
}

fn walk_into(dir: &Path, files: &mut Vec<(PathBuf, u64)>) -> ManagerResult<()> {
    let entries = fs::read_dir(dir).map_err(|e| ManagerError::ReadFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;

    for entry in entries {
        let entry = entry.map_err(|e| ManagerError::ReadFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        let file_type = entry.file_type().map_err(|e| ManagerError::ReadFailed {
            path: path.clone(),
            source: e,
        })?;

        if file_type.is_dir() {
            walk_into(&path, files)?;
        } else {
            let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
            files.push((path, size));
        }
    }
    Ok(())
}

/// Format a size in bytes as a human-readable string.
pub fn format_size(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = 1024 * KB;
    const GB: u64 = 1024 * MB;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Remove empty directories from `start` upwards, never touching `root`.
pub fn prune_empty_dirs(start: &Path, root: &Path) {
    let mut current = Some(start);
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        if fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}
