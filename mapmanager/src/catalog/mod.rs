//! Remote catalog model.
//!
//! The catalog (`countries_provided.json`) lists every dataset the
//! distribution point offers. It is parsed into typed [`Descriptor`]s and
//! validated as a whole: a document that fails any check is rejected with
//! [`ManagerError::CatalogParse`] and never partially applied.
//!
//! The distribution base URL lives in its own tiny document (`url.json`)
//! so that a mirror change does not require a client update.
//!
//! # Example
//!
//! ```
//! use mapmanager::catalog::Catalog;
//!
//! let catalog = Catalog::from_slice(br#"{
//!     "format": 1,
//!     "datasets": [
//!         {"id": "territory/estonia", "kind": "territory", "name": "Estonia",
//!          "size": 1024, "version": 3, "path": "territory/estonia.osm"}
//!     ]
//! }"#).unwrap();
//!
//! let territories = catalog.list_territories();
//! assert_eq!(territories[0].display_name, "Estonia");
//! ```

mod descriptor;
mod requested;

pub use descriptor::{join_url, DatasetId, DatasetKind, Descriptor};
pub use requested::RequestedSet;

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ManagerError, ManagerResult};
use crate::storage::{self, PARTIAL_SUFFIX};

/// Catalog document format understood by this version.
pub const CATALOG_FORMAT: u32 = 1;

const CATALOG_DOCUMENT: &str = "countries_provided.json";
const SERVER_URL_DOCUMENT: &str = "url.json";

#[derive(Debug, Serialize, Deserialize)]
struct CatalogDocument {
    format: u32,
    datasets: Vec<Descriptor>,
}

/// In-memory catalog of provided datasets.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    datasets: BTreeMap<DatasetId, Descriptor>,
    /// All ids sorted by display name, case-insensitive, ties by id.
    display_order: Vec<DatasetId>,
}

/// Row returned by [`Catalog::list_territories`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TerritoryListing {
    pub id: DatasetId,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(rename = "size")]
    pub size_bytes: u64,
}

impl Catalog {
    /// Parse and validate a catalog document.
    pub fn from_slice(bytes: &[u8]) -> ManagerResult<Self> {
        let document: CatalogDocument =
            serde_json::from_slice(bytes).map_err(|e| ManagerError::parse(CATALOG_DOCUMENT, e))?;

        if document.format != CATALOG_FORMAT {
            return Err(ManagerError::parse(
                CATALOG_DOCUMENT,
                format!("unsupported format {}", document.format),
            ));
        }

        Self::from_descriptors(document.datasets)
    }

    /// Build a catalog from descriptors, applying the same validation as
    /// [`Catalog::from_slice`].
    pub fn from_descriptors(descriptors: Vec<Descriptor>) -> ManagerResult<Self> {
        let mut datasets = BTreeMap::new();
        let mut paths = BTreeSet::new();

        for descriptor in descriptors {
            if descriptor.id.as_str().is_empty() {
                return Err(ManagerError::parse(CATALOG_DOCUMENT, "empty dataset id"));
            }
            if !descriptor::is_safe_relative_path(&descriptor.path) {
                return Err(ManagerError::parse(
                    CATALOG_DOCUMENT,
                    format!("invalid path '{}' for {}", descriptor.path, descriptor.id),
                ));
            }
            let path: PathBuf = Path::new(&descriptor.path).components().collect();
            if is_manager_file(&path) {
                return Err(ManagerError::parse(
                    CATALOG_DOCUMENT,
                    format!("{} would overwrite '{}'", descriptor.id, descriptor.path),
                ));
            }
            if !paths.insert(path) {
                return Err(ManagerError::parse(
                    CATALOG_DOCUMENT,
                    format!("path '{}' used by more than one dataset", descriptor.path),
                ));
            }
            let id = descriptor.id.clone();
            if datasets.insert(id.clone(), descriptor).is_some() {
                return Err(ManagerError::parse(
                    CATALOG_DOCUMENT,
                    format!("duplicate dataset id {}", id),
                ));
            }
        }

        // Component order puts every path directly before the paths nested under it.
        let sorted: Vec<&PathBuf> = paths.iter().collect();
        if let Some(pair) = sorted.windows(2).find(|pair| pair[1].starts_with(pair[0])) {
            return Err(ManagerError::parse(
                CATALOG_DOCUMENT,
                format!(
                    "path '{}' is a directory of '{}'",
                    pair[0].display(),
                    pair[1].display()
                ),
            ));
        }

        for descriptor in datasets.values() {
            if let Some(missing) = descriptor
                .depends_on
                .iter()
                .find(|dep| !datasets.contains_key(*dep))
            {
                return Err(ManagerError::parse(
                    CATALOG_DOCUMENT,
                    format!("{} depends on unknown dataset {}", descriptor.id, missing),
                ));
            }
        }

        let mut display_order: Vec<DatasetId> = datasets.keys().cloned().collect();
        display_order.sort_by(|a, b| display_cmp(&datasets[a], &datasets[b]));

        Ok(Self {
            datasets,
            display_order,
        })
    }

    /// Serialize back to the on-disk document form.
    pub fn to_json(&self) -> ManagerResult<Vec<u8>> {
        let document = CatalogDocument {
            format: CATALOG_FORMAT,
            datasets: self.datasets.values().cloned().collect(),
        };
        serde_json::to_vec_pretty(&document).map_err(|e| ManagerError::parse(CATALOG_DOCUMENT, e))
    }

    /// Look up a descriptor by id.
    pub fn find_by_id(&self, id: &DatasetId) -> ManagerResult<&Descriptor> {
        self.datasets
            .get(id)
            .ok_or_else(|| ManagerError::UnknownDataset(id.to_string()))
    }

    /// Look up a descriptor by id, returning `None` when absent.
    pub fn get(&self, id: &DatasetId) -> Option<&Descriptor> {
        self.datasets.get(id)
    }

    /// Whether the catalog provides the given id.
    pub fn contains(&self, id: &DatasetId) -> bool {
        self.datasets.contains_key(id)
    }

    /// Territories in display order: name case-insensitive, ties by id.
    pub fn list_territories(&self) -> Vec<TerritoryListing> {
        self.ordered()
            .filter(|d| d.kind == DatasetKind::Territory)
            .map(|d| TerritoryListing {
                id: d.id.clone(),
                display_name: d.display_name.clone(),
                size_bytes: d.size_bytes,
            })
            .collect()
    }

    /// All descriptors in display order.
    pub fn ordered(&self) -> impl Iterator<Item = &Descriptor> {
        self.display_order.iter().map(|id| &self.datasets[id])
    }

    /// Position of `id` in display order, used to break ordering ties.
    pub fn display_rank(&self, id: &DatasetId) -> usize {
        self.display_order
            .iter()
            .position(|candidate| candidate == id)
            .unwrap_or(usize::MAX)
    }

    /// Number of datasets in the catalog.
    pub fn len(&self) -> usize {
        self.datasets.len()
    }

    /// Whether the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.datasets.is_empty()
    }
}

/// Paths the manager writes itself: its documents at the root and staged downloads.
fn is_manager_file(path: &Path) -> bool {
    let at_root = path.components().count() == 1;
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or_default();
    (at_root && storage::is_reserved_name(name)) || name.ends_with(PARTIAL_SUFFIX)
}

fn display_cmp(a: &Descriptor, b: &Descriptor) -> Ordering {
    a.display_name
        .to_lowercase()
        .cmp(&b.display_name.to_lowercase())
        .then_with(|| a.id.cmp(&b.id))
}

/// The `url.json` document naming the distribution base URL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerUrl {
    pub url: String,
}

impl ServerUrl {
    /// Parse and validate a `url.json` document.
    pub fn from_slice(bytes: &[u8]) -> ManagerResult<Self> {
        let doc: ServerUrl = serde_json::from_slice(bytes)
            .map_err(|e| ManagerError::parse(SERVER_URL_DOCUMENT, e))?;
        let trimmed = doc.url.trim();
        if !(trimmed.starts_with("http://") || trimmed.starts_with("https://")) {
            return Err(ManagerError::parse(
                SERVER_URL_DOCUMENT,
                format!("not an http(s) URL: '{}'", doc.url),
            ));
        }
        Ok(Self {
            url: trimmed.trim_end_matches('/').to_string(),
        })
    }
}
