//! Garbage collection of files nobody needs.
//!
//! A file under the storage root is *needed* when the registry attributes
//! it to a dataset in the closure of the requested set. Every other file,
//! registered or not, is unneeded. The manager's own documents are never
//! listed.
//!
//! Deletion is two-phase. [`list_unneeded`] produces a list that the caller
//! hands back to [`delete_unneeded`] verbatim; the manager checks that the
//! list still matches a fresh listing before anything is removed.

use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::PathBuf;

use serde::Serialize;

use crate::catalog::DatasetId;
use crate::error::{ManagerError, ManagerResult};
use crate::registry::Registry;
use crate::storage::{self, StorageLayout};

/// Result of listing unneeded files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnneededFiles {
    pub files: Vec<PathBuf>,
    /// Sum of file sizes, or `-1` when listing is unavailable.
    pub total_bytes: i64,
}

impl UnneededFiles {
    /// Listing refused: a download is running or cleanup is unsafe.
    pub fn unavailable() -> Self {
        Self {
            files: Vec::new(),
            total_bytes: -1,
        }
    }

    pub fn is_available(&self) -> bool {
        self.total_bytes >= 0
    }
}

/// Outcome of a deletion pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeletionReport {
    pub deleted: Vec<PathBuf>,
    /// First file that could not be removed, with the reason.
    pub failed: Option<(PathBuf, String)>,
    /// Files not attempted after the failure.
    pub remaining: Vec<PathBuf>,
}

impl DeletionReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_none()
    }
}

/// List files under the root that no needed dataset owns.
///
/// Fails with [`ManagerError::RegistryUnavailable`] when the registry is not
/// open: without it every file would look unneeded.
pub fn list_unneeded(
    layout: &StorageLayout,
    registry: &Registry,
    needed: &BTreeSet<DatasetId>,
) -> ManagerResult<UnneededFiles> {
    let owners: HashMap<PathBuf, DatasetId> = registry
        .entries()?
        .into_iter()
        .map(|entry| (entry.path, entry.dataset_id))
        .collect();

    let mut files = Vec::new();
    let mut total_bytes = 0i64;
    for (path, size) in storage::walk_files(layout.root())? {
        if layout.is_reserved(&path) {
            continue;
        }
        let is_needed = owners
            .get(&path)
            .map(|owner| needed.contains(owner))
            .unwrap_or(false);
        if !is_needed {
            total_bytes += size as i64;
            files.push(path);
        }
    }

    tracing::debug!(files = files.len(), total_bytes, "listed unneeded files");
    Ok(UnneededFiles { files, total_bytes })
}

/// Delete `files` in order, stopping at the first failure.
///
/// Deleted paths are dropped from the registry and directories emptied by
/// the deletion are pruned up to, but excluding, the storage root. A file
/// whose registry entry cannot be dropped is reported as the failure.
pub fn delete_unneeded(layout: &StorageLayout, registry: &mut Registry, files: &[PathBuf]) -> DeletionReport {
    let mut report = DeletionReport::default();

    for (index, path) in files.iter().enumerate() {
        if !path.starts_with(layout.root()) || layout.is_reserved(path) {
            report.failed = Some((path.clone(), "outside managed storage".to_string()));
            report.remaining = files[index + 1..].to_vec();
            break;
        }
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to delete unneeded file");
                report.failed = Some((path.clone(), e.to_string()));
                report.remaining = files[index + 1..].to_vec();
                break;
            }
        }

        if let Err(e) = registry.remove(path) {
            tracing::warn!(path = %path.display(), error = %e, "failed to drop registry entry");
            report.failed = Some((path.clone(), format!("file deleted, registry entry kept: {}", e)));
            report.remaining = files[index + 1..].to_vec();
            break;
        }
        if let Some(parent) = path.parent() {
            storage::prune_empty_dirs(parent, layout.root());
        }
        report.deleted.push(path.clone());
    }

    tracing::info!(
        deleted = report.deleted.len(),
        failed = report.failed.is_some(),
        remaining = report.remaining.len(),
        "unneeded files deleted"
    );
    report
}

/// Check a caller-supplied list against the stored token and a fresh listing.
pub fn verify_token(
    requested: &[PathBuf],
    token: Option<&[PathBuf]>,
    fresh: &UnneededFiles,
) -> ManagerResult<()> {
    match token {
        Some(token) if token == requested && fresh.files.as_slice() == requested => Ok(()),
        _ => Err(ManagerError::GcPreconditionMismatch),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, StorageLayout, Registry) {
        let temp = TempDir::new().unwrap();
        let layout = StorageLayout::new(temp.path());
        let registry = Registry::open(&layout.registry());
        (temp, layout, registry)
    }

    fn write(layout: &StorageLayout, relative: &str, len: usize) -> PathBuf {
        let path = layout.full_path(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, vec![1u8; len]).unwrap();
        path
    }

    #[test]
    fn test_unregistered_and_unrequested_files_listed() {
        let (_temp, layout, mut registry) = setup();
        let estonia = write(&layout, "territory/estonia.dat", 10);
        let latvia = write(&layout, "territory/latvia.dat", 20);
        let stray = write(&layout, "stray.bin", 5);
        write(&layout, "countries_requested.json", 3);
        registry
            .register(&estonia, &DatasetId::new("territory/estonia"), "1")
            .unwrap();
        registry
            .register(&latvia, &DatasetId::new("territory/latvia"), "1")
            .unwrap();

        let needed: BTreeSet<_> = [DatasetId::new("territory/estonia")].into_iter().collect();
        let listing = list_unneeded(&layout, &registry, &needed).unwrap();

        assert_eq!(listing.files, vec![stray, latvia]);
        assert_eq!(listing.total_bytes, 25);
    }

    #[test]
    fn test_unavailable_registry_refuses() {
        let (_temp, layout, _) = setup();
        let registry = Registry::unavailable("test");
        assert!(matches!(
            list_unneeded(&layout, &registry, &BTreeSet::new()),
            Err(ManagerError::RegistryUnavailable(_))
        ));
    }

    #[test]
    fn test_delete_removes_entries_and_prunes_dirs() {
        let (_temp, layout, mut registry) = setup();
        let latvia = write(&layout, "territory/deep/latvia.dat", 20);
        registry
            .register(&latvia, &DatasetId::new("territory/latvia"), "1")
            .unwrap();

        let report = delete_unneeded(&layout, &mut registry, &[latvia.clone()]);

        assert!(report.is_complete());
        assert_eq!(report.deleted, vec![latvia.clone()]);
        assert!(!latvia.exists());
        assert!(registry.entry(&latvia).unwrap().is_none());
        assert!(!layout.full_path("territory").exists());
        assert!(layout.root().exists());
    }

    #[test]
    fn test_delete_stops_at_first_failure() {
        let (_temp, layout, mut registry) = setup();
        let first = write(&layout, "a.dat", 1);
        let outside = PathBuf::from("/definitely/not/managed.dat");
        let last = write(&layout, "c.dat", 1);

        let report = delete_unneeded(&layout, &mut registry, &[first.clone(), outside.clone(), last.clone()]);

        assert_eq!(report.deleted, vec![first]);
        assert_eq!(report.failed.as_ref().map(|(p, _)| p), Some(&outside));
        assert_eq!(report.remaining, vec![last.clone()]);
        assert!(last.exists());
    }

    #[test]
    fn test_registry_failure_reported() {
        let (_temp, layout, _) = setup();
        let mut registry = Registry::unavailable("test");
        let first = write(&layout, "a.dat", 1);
        let second = write(&layout, "b.dat", 1);

        let report = delete_unneeded(&layout, &mut registry, &[first.clone(), second.clone()]);

        assert!(report.deleted.is_empty());
        let (path, reason) = report.failed.unwrap();
        assert_eq!(path, first);
        assert!(reason.contains("registry entry kept"));
        assert_eq!(report.remaining, vec![second.clone()]);
        assert!(second.exists());
    }

    #[test]
    fn test_verify_token() {
        let files = vec![PathBuf::from("/maps/a")];
        let fresh = UnneededFiles {
            files: files.clone(),
            total_bytes: 1,
        };
        assert!(verify_token(&files, Some(&files), &fresh).is_ok());
        assert!(verify_token(&files, None, &fresh).is_err());

        let changed = UnneededFiles {
            files: Vec::new(),
            total_bytes: 0,
        };
        assert!(matches!(
            verify_token(&files, Some(&files), &changed),
            Err(ManagerError::GcPreconditionMismatch)
        ));
    }
}
