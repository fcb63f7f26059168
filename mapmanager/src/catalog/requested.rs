//! The user's requested set of datasets.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::descriptor::DatasetId;
use super::CATALOG_FORMAT;
use crate::error::{ManagerError, ManagerResult};

const REQUESTED_DOCUMENT: &str = "countries_requested.json";

/// Datasets the user wants installed.
///
/// Independent of what is actually on disk. Mutated only by
/// [`add`](Self::add) and [`remove`](Self::remove).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedSet {
    format: u32,
    datasets: BTreeSet<DatasetId>,
}

impl RequestedSet {
    /// Create an empty requested set.
    pub fn new() -> Self {
        Self {
            format: CATALOG_FORMAT,
            datasets: BTreeSet::new(),
        }
    }

    /// Parse a `countries_requested.json` document.
    pub fn from_slice(bytes: &[u8]) -> ManagerResult<Self> {
        let set: RequestedSet = serde_json::from_slice(bytes)
            .map_err(|e| ManagerError::parse(REQUESTED_DOCUMENT, e))?;
        if set.format != CATALOG_FORMAT {
            return Err(ManagerError::parse(
                REQUESTED_DOCUMENT,
                format!("unsupported format {}", set.format),
            ));
        }
        Ok(set)
    }

    /// Load from disk. A missing file yields an empty set.
    pub fn load(path: &Path) -> ManagerResult<Self> {
        match fs::read(path) {
            Ok(bytes) => Self::from_slice(&bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(ManagerError::ReadFailed {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Persist atomically: write a sibling temp file, then rename over.
    pub fn save(&self, path: &Path) -> ManagerResult<()> {
        let bytes =
            serde_json::to_vec_pretty(self).map_err(|e| ManagerError::parse(REQUESTED_DOCUMENT, e))?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes).map_err(|e| ManagerError::WriteFailed {
            path: tmp.clone(),
            source: e,
        })?;
        fs::rename(&tmp, path).map_err(|e| ManagerError::WriteFailed {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Add an id. Returns `true` when the set changed.
    pub fn add(&mut self, id: DatasetId) -> bool {
        self.datasets.insert(id)
    }

    /// Remove an id. Returns `true` when the set changed.
    pub fn remove(&mut self, id: &DatasetId) -> bool {
        self.datasets.remove(id)
    }

    /// Whether the id is requested.
    pub fn contains(&self, id: &DatasetId) -> bool {
        self.datasets.contains(id)
    }

    /// Requested ids in id order.
    pub fn iter(&self) -> impl Iterator<Item = &DatasetId> {
        self.datasets.iter()
    }

    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

impl Default for RequestedSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FromIterator<DatasetId> for RequestedSet {
    fn from_iter<T: IntoIterator<Item = DatasetId>>(iter: T) -> Self {
        Self {
            format: CATALOG_FORMAT,
            datasets: iter.into_iter().collect(),
        }
    }
}
