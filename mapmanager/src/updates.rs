//! Update detection.
//!
//! Compares what is installed for the requested datasets (and everything
//! they pull in) against a freshly fetched catalog. Updates are only
//! reported; installing them is a normal missing-data download, since an
//! outdated dataset counts as missing.

use serde::Serialize;

use crate::catalog::{Catalog, DatasetId};
use crate::error::{ManagerError, ManagerResult};
use crate::registry::Registry;

/// An installed dataset whose catalog version changed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateInfo {
    pub id: DatasetId,
    pub name: String,
    pub old_version: String,
    pub new_version: String,
    /// Catalog size minus the size currently on disk.
    pub size_delta: i64,
}

/// Diff installed versions of `ids` against `catalog`.
///
/// Datasets that are not installed, or that the catalog no longer
/// describes, are not updates.
pub fn find_updates(ids: &[DatasetId], catalog: &Catalog, registry: &Registry) -> Vec<UpdateInfo> {
    let mut updates = Vec::new();
    for id in ids {
        let Some(descriptor) = catalog.get(id) else {
            continue;
        };
        let entries: Vec<_> = registry
            .lookup(id)
            .into_iter()
            .filter(|entry| entry.path.is_file())
            .collect();
        let Some(installed) = entries.first() else {
            continue;
        };
        if entries.iter().any(|entry| entry.version == descriptor.version) {
            continue;
        }

        let on_disk: u64 = entries
            .iter()
            .filter_map(|entry| entry.path.metadata().ok())
            .map(|metadata| metadata.len())
            .sum();
        let size_delta = descriptor.size_bytes as i64 - on_disk as i64;

        tracing::info!(
            dataset = %id,
            old_version = %installed.version,
            new_version = %descriptor.version,
            size_delta,
            "update available"
        );
        updates.push(UpdateInfo {
            id: id.clone(),
            name: descriptor.display_name.clone(),
            old_version: installed.version.clone(),
            new_version: descriptor.version.clone(),
            size_delta,
        });
    }
    updates
}

/// Render an update list as a JSON array.
pub fn updates_json(updates: &[UpdateInfo]) -> ManagerResult<String> {
    serde_json::to_string(updates).map_err(|e| ManagerError::parse("updates", e))
}
