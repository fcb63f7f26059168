//! Ownership registry of installed files.
//!
//! The registry is the single source of truth for "which dataset wrote this
//! file". It is a SQLite table (`files.sqlite`) keyed by absolute path:
//!
//! ```text
//! files(path TEXT PRIMARY KEY, dataset_id TEXT, version TEXT, installed_at TEXT)
//! ```
//!
//! Entries are upserted when an install commits and removed only by an
//! explicit deletion. A file under the storage root without an entry is
//! eligible for garbage collection.
//!
//! Opening the store may fail. The registry then stays *unavailable*:
//! lookups return nothing, writes fail with
//! [`ManagerError::RegistryWrite`], and the garbage collector refuses to
//! run.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use crate::catalog::DatasetId;
use crate::error::{ManagerError, ManagerResult};

/// Schema version stored in `PRAGMA user_version`.
const REGISTRY_SCHEMA_VERSION: i64 = 1;

/// One installed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryEntry {
    /// Absolute path of the file.
    pub path: PathBuf,
    /// Dataset that produced the file.
    pub dataset_id: DatasetId,
    /// Version tag of that dataset at install time.
    pub version: String,
    /// When the install committed.
    pub installed_at: DateTime<Utc>,
}

/// Persisted path → dataset table.
pub struct Registry {
    conn: Option<Connection>,
    location: PathBuf,
    open_error: Option<String>,
}

impl Registry {
    /// Open (or create) the registry database.
    ///
    /// Never fails: an unopenable store yields an unavailable registry and
    /// logs a warning.
    pub fn open(path: &Path) -> Self {
        match Self::try_open(path) {
            Ok(conn) => {
                tracing::debug!(path = %path.display(), "file registry opened");
                Self {
                    conn: Some(conn),
                    location: path.to_path_buf(),
                    open_error: None,
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "file registry unavailable, cleanup disabled");
                Self {
                    conn: None,
                    location: path.to_path_buf(),
                    open_error: Some(e.to_string()),
                }
            }
        }
    }

    /// Registry that is permanently unavailable.
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            conn: None,
            location: PathBuf::new(),
            open_error: Some(reason.into()),
        }
    }

    fn try_open(path: &Path) -> rusqlite::Result<Connection> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=DELETE;
            PRAGMA synchronous=FULL;
            CREATE TABLE IF NOT EXISTS files (
              path TEXT PRIMARY KEY,
              dataset_id TEXT NOT NULL,
              version TEXT NOT NULL,
              installed_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_files_dataset ON files(dataset_id);
            ",
        )?;
        conn.execute_batch(&format!("PRAGMA user_version={};", REGISTRY_SCHEMA_VERSION))?;
        Ok(conn)
    }

    /// Whether the backing store is open.
    pub fn is_available(&self) -> bool {
        self.conn.is_some()
    }

    /// Location of the database file.
    pub fn location(&self) -> &Path {
        &self.location
    }

    fn conn(&self) -> ManagerResult<&Connection> {
        self.conn.as_ref().ok_or_else(|| {
            ManagerError::RegistryUnavailable(
                self.open_error
                    .clone()
                    .unwrap_or_else(|| "not opened".to_string()),
            )
        })
    }

    /// Record that `path` now holds `version` of `dataset_id`.
    ///
    /// In the same transaction, entries of the same dataset at other paths
    /// are dropped: the new file supersedes them, so they only leave the
    /// registry once the replacement is recorded.
    pub fn register(&mut self, path: &Path, dataset_id: &DatasetId, version: &str) -> ManagerResult<()> {
        let write_error = |reason: String| ManagerError::RegistryWrite {
            path: path.to_path_buf(),
            reason,
        };
        let conn = self
            .conn
            .as_mut()
            .ok_or_else(|| write_error("registry unavailable".to_string()))?;

        let path_text = path_key(path);
        let tx = conn.transaction().map_err(|e| write_error(e.to_string()))?;
        tx.execute(
            "INSERT INTO files (path, dataset_id, version, installed_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(path) DO UPDATE SET
               dataset_id = excluded.dataset_id,
               version = excluded.version,
               installed_at = excluded.installed_at",
            params![path_text, dataset_id.as_str(), version, Utc::now().to_rfc3339()],
        )
        .map_err(|e| write_error(e.to_string()))?;
        let superseded = tx
            .execute(
                "DELETE FROM files WHERE dataset_id = ?1 AND path <> ?2",
                params![dataset_id.as_str(), path_text],
            )
            .map_err(|e| write_error(e.to_string()))?;
        tx.commit().map_err(|e| write_error(e.to_string()))?;

        tracing::debug!(
            path = %path.display(),
            dataset = %dataset_id,
            version,
            superseded,
            "registered file"
        );
        Ok(())
    }

    /// Entries belonging to a dataset. Empty when unavailable.
    pub fn lookup(&self, dataset_id: &DatasetId) -> Vec<RegistryEntry> {
        let Ok(conn) = self.conn() else {
            return Vec::new();
        };
        let result = conn
            .prepare_cached(
                "SELECT path, dataset_id, version, installed_at FROM files WHERE dataset_id = ?1 ORDER BY path",
            )
            .and_then(|mut stmt| {
                let entries = stmt
                    .query_map(params![dataset_id.as_str()], row_to_entry)?
                    .collect::<rusqlite::Result<Vec<_>>>();
                entries
            });
        match result {
            Ok(entries) => entries,
            Err(e) => {
                tracing::warn!(dataset = %dataset_id, error = %e, "registry lookup failed");
                Vec::new()
            }
        }
    }

    /// Entry for a single path, if registered.
    pub fn entry(&self, path: &Path) -> ManagerResult<Option<RegistryEntry>> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT path, dataset_id, version, installed_at FROM files WHERE path = ?1",
            params![path_key(path)],
            row_to_entry,
        )
        .optional()
        .map_err(|e| ManagerError::RegistryUnavailable(e.to_string()))
    }

    /// Every entry in path order.
    pub fn entries(&self) -> ManagerResult<Vec<RegistryEntry>> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare("SELECT path, dataset_id, version, installed_at FROM files ORDER BY path")
            .map_err(|e| ManagerError::RegistryUnavailable(e.to_string()))?;
        let rows = stmt
            .query_map([], row_to_entry)
            .and_then(|rows| rows.collect::<rusqlite::Result<Vec<_>>>())
            .map_err(|e| ManagerError::RegistryUnavailable(e.to_string()))?;
        Ok(rows)
    }

    /// Every registered path.
    pub fn all_paths(&self) -> ManagerResult<BTreeSet<PathBuf>> {
        Ok(self.entries()?.into_iter().map(|e| e.path).collect())
    }

    /// Forget a path. Removing an unknown path is not an error.
    pub fn remove(&mut self, path: &Path) -> ManagerResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM files WHERE path = ?1",
            params![path_key(path)],
        )
        .map_err(|e| ManagerError::RegistryWrite {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("location", &self.location)
            .field("available", &self.is_available())
            .finish()
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<RegistryEntry> {
    let path: String = row.get(0)?;
    let dataset_id: String = row.get(1)?;
    let version: String = row.get(2)?;
    let installed_at: String = row.get(3)?;
    let installed_at = DateTime::parse_from_rfc3339(&installed_at)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;
    Ok(RegistryEntry {
        path: PathBuf::from(path),
        dataset_id: DatasetId::new(dataset_id),
        version,
        installed_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, Registry) {
        let temp = TempDir::new().unwrap();
        let registry = Registry::open(&temp.path().join("files.sqlite"));
        (temp, registry)
    }

    #[test]
    fn test_register_and_lookup() {
        let (temp, mut registry) = open_temp();
        let path = temp.path().join("territory/estonia.osm");
        let id = DatasetId::new("territory/estonia");

        registry.register(&path, &id, "3").unwrap();

        let entries = registry.lookup(&id);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].path, path);
        assert_eq!(entries[0].version, "3");
    }

    #[test]
    fn test_register_upserts_same_path() {
        let (temp, mut registry) = open_temp();
        let path = temp.path().join("a.dat");
        let id = DatasetId::new("territory/a");

        registry.register(&path, &id, "1").unwrap();
        registry.register(&path, &id, "2").unwrap();

        let entries = registry.entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].version, "2");
    }

    #[test]
    fn test_register_supersedes_other_paths_of_dataset() {
        let (temp, mut registry) = open_temp();
        let old = temp.path().join("old.dat");
        let new = temp.path().join("new.dat");
        let id = DatasetId::new("territory/a");

        registry.register(&old, &id, "1").unwrap();
        registry.register(&new, &id, "2").unwrap();

        let paths = registry.all_paths().unwrap();
        assert!(paths.contains(&new));
        assert!(!paths.contains(&old));
    }

    #[test]
    fn test_remove_and_entry() {
        let (temp, mut registry) = open_temp();
        let path = temp.path().join("a.dat");
        registry
            .register(&path, &DatasetId::new("territory/a"), "1")
            .unwrap();

        assert!(registry.entry(&path).unwrap().is_some());
        registry.remove(&path).unwrap();
        assert!(registry.entry(&path).unwrap().is_none());
        registry.remove(&path).unwrap();
    }

    #[test]
    fn test_persists_across_reopen() {
        let temp = TempDir::new().unwrap();
        let db = temp.path().join("files.sqlite");
        let path = temp.path().join("a.dat");
        {
            let mut registry = Registry::open(&db);
            registry
                .register(&path, &DatasetId::new("territory/a"), "1")
                .unwrap();
        }
        let registry = Registry::open(&db);
        assert_eq!(registry.all_paths().unwrap().len(), 1);
    }

    #[test]
    fn test_unavailable_registry() {
        let temp = TempDir::new().unwrap();
        // A directory cannot be opened as a database file.
        let mut registry = Registry::open(temp.path());

        assert!(!registry.is_available());
        assert!(registry.lookup(&DatasetId::new("territory/a")).is_empty());
        assert!(matches!(
            registry.all_paths(),
            Err(ManagerError::RegistryUnavailable(_))
        ));
        assert!(matches!(
            registry.register(&temp.path().join("a"), &DatasetId::new("territory/a"), "1"),
            Err(ManagerError::RegistryWrite { .. })
        ));
    }
}
