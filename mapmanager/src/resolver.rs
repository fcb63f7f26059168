//! Availability status and missing-data resolution.
//!
//! A dataset is *present* when the registry has an entry for it whose file
//! exists on disk. A present dataset is *compatible* when one of those
//! entries carries the catalog's current version (or the catalog no longer
//! describes the dataset). Incompatible data is scheduled for download
//! exactly like absent data; the stale files stay registered until the new
//! version is registered over them.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use serde::Serialize;

use crate::catalog::{Catalog, DatasetId, DatasetKind, RequestedSet};
use crate::download::QueueItem;
use crate::features::FeatureGraph;
use crate::registry::Registry;
use crate::storage::{format_size, StorageLayout};

/// Derived presence of a dataset. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Availability {
    Absent,
    PresentCompatible,
    PresentIncompatible,
}

impl Availability {
    /// Whether the dataset has to be downloaded.
    pub fn needs_download(self) -> bool {
        !matches!(self, Self::PresentCompatible)
    }

    pub fn is_present(self) -> bool {
        !matches!(self, Self::Absent)
    }
}

/// Result of a resolver run.
#[derive(Debug, Clone, Default)]
pub struct Resolution {
    /// Files to fetch, dependencies first.
    pub queue: Vec<QueueItem>,
    /// Sum of expected sizes of the queue.
    pub total_bytes: u64,
    /// Human-readable per-territory breakdown of what is missing.
    pub summary: String,
}

impl Resolution {
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Ids of the queued datasets in queue order.
    pub fn dataset_ids(&self) -> impl Iterator<Item = &DatasetId> {
        self.queue.iter().filter_map(|item| item.dataset_id.as_ref())
    }
}

/// Computes what is missing from a snapshot of catalog, registry and disk.
pub struct Resolver<'a> {
    catalog: &'a Catalog,
    registry: &'a Registry,
    graph: &'a FeatureGraph,
    layout: &'a StorageLayout,
}

impl<'a> Resolver<'a> {
    pub fn new(
        catalog: &'a Catalog,
        registry: &'a Registry,
        graph: &'a FeatureGraph,
        layout: &'a StorageLayout,
    ) -> Self {
        Self {
            catalog,
            registry,
            graph,
            layout,
        }
    }

    /// Availability of one dataset.
    pub fn availability(&self, id: &DatasetId) -> Availability {
        availability(id, Some(self.catalog), self.registry)
    }

    /// Closure of `roots` in dependency-first order.
    pub fn closure<'r>(&self, roots: impl IntoIterator<Item = &'r DatasetId>) -> Vec<DatasetId> {
        self.graph.closure(roots, self.catalog)
    }

    /// Datasets of the requested closure that need a download, in order.
    pub fn missing_ids(&self, requested: &RequestedSet) -> Vec<DatasetId> {
        self.closure(requested.iter())
            .into_iter()
            .filter(|id| self.availability(id).needs_download())
            .collect()
    }

    /// Build the download queue for the requested set.
    pub fn resolve(&self, requested: &RequestedSet, base_url: &str) -> Resolution {
        let missing = self.missing_ids(requested);
        let queue: Vec<QueueItem> = missing
            .iter()
            .filter_map(|id| self.catalog.get(id))
            .map(|descriptor| QueueItem::dataset(descriptor, base_url, self.layout))
            .collect();
        let total_bytes = queue.iter().map(|item| item.expected_size).sum();

        tracing::debug!(
            requested = requested.len(),
            missing = queue.len(),
            total_bytes,
            "resolved missing data"
        );

        Resolution {
            queue,
            total_bytes,
            summary: self.summary(requested, &missing),
        }
    }

    /// One line per missing dataset, grouped under the requested dataset
    /// that pulls it in: `"<requested> / <dataset>: <size>"`.
    fn summary(&self, requested: &RequestedSet, missing: &[DatasetId]) -> String {
        let missing: BTreeSet<&DatasetId> = missing.iter().collect();
        let mut roots: Vec<&DatasetId> = requested.iter().filter(|id| self.catalog.contains(id)).collect();
        roots.sort_by_key(|id| self.catalog.display_rank(id));

        let mut summary = String::new();
        for root in roots {
            let Some(root_descriptor) = self.catalog.get(root) else {
                continue;
            };
            for id in self.closure([root]) {
                if !missing.contains(&id) {
                    continue;
                }
                let Some(descriptor) = self.catalog.get(&id) else {
                    continue;
                };
                let name = if descriptor.kind == DatasetKind::Territory {
                    descriptor.kind.label().to_string()
                } else {
                    descriptor.display_name.clone()
                };
                let _ = writeln!(
                    summary,
                    "{} / {}: {}",
                    root_descriptor.display_name,
                    name,
                    format_size(descriptor.size_bytes)
                );
            }
        }
        summary
    }
}

/// Availability of `id` against an optional catalog.
///
/// Without a catalog, or for ids the catalog does not describe, present
/// data counts as compatible.
pub fn availability(id: &DatasetId, catalog: Option<&Catalog>, registry: &Registry) -> Availability {
    let entries: Vec<_> = registry
        .lookup(id)
        .into_iter()
        .filter(|entry| entry.path.is_file())
        .collect();
    if entries.is_empty() {
        return Availability::Absent;
    }

    match catalog.and_then(|catalog| catalog.get(id)) {
        Some(descriptor) if !entries.iter().any(|entry| entry.version == descriptor.version) => {
            Availability::PresentIncompatible
        }
        _ => Availability::PresentCompatible,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::{baltic_catalog, descriptor};
    use crate::features::FeatureSet;
    use std::fs;
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        layout: StorageLayout,
        registry: Registry,
        catalog: Catalog,
        graph: FeatureGraph,
    }

    impl Fixture {
        fn new(catalog: Catalog, features: FeatureSet) -> Self {
            let temp = TempDir::new().unwrap();
            let layout = StorageLayout::new(temp.path());
            let registry = Registry::open(&layout.registry());
            Self {
                _temp: temp,
                layout,
                registry,
                catalog,
                graph: FeatureGraph::new(features),
            }
        }

        fn install(&mut self, id: &str, version: &str) {
            let id = DatasetId::new(id);
            let path = self.layout.full_path(&self.catalog.get(&id).unwrap().path);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(&path, b"data").unwrap();
            self.registry.register(&path, &id, version).unwrap();
        }

        fn resolver(&self) -> Resolver<'_> {
            Resolver::new(&self.catalog, &self.registry, &self.graph, &self.layout)
        }
    }

    fn requested(ids: &[&str]) -> RequestedSet {
        ids.iter().map(|id| DatasetId::new(*id)).collect()
    }

    #[test]
    fn test_single_territory_without_features() {
        let catalog = Catalog::from_descriptors(vec![descriptor(
            "territory/estonia",
            DatasetKind::Territory,
            "Estonia",
            100,
        )])
        .unwrap();
        let fixture = Fixture::new(catalog, FeatureSet { address_search: false });

        let resolution = fixture
            .resolver()
            .resolve(&requested(&["territory/estonia"]), "http://maps.example.org");

        assert_eq!(resolution.queue.len(), 1);
        assert_eq!(resolution.queue[0].url, "http://maps.example.org/territory/estonia.dat");
        assert_eq!(
            resolution.queue[0].destination,
            fixture.layout.full_path("territory/estonia.dat")
        );
        assert_eq!(resolution.total_bytes, 100);
    }

    #[test]
    fn test_closure_queued_dependency_first_once() {
        let fixture = Fixture::new(baltic_catalog(), FeatureSet::default());

        let resolution = fixture.resolver().resolve(
            &requested(&["territory/estonia", "territory/latvia"]),
            "http://x",
        );
        let ids: Vec<&str> = resolution.dataset_ids().map(|id| id.as_str()).collect();

        assert_eq!(ids.len(), 6);
        assert_eq!(ids[0], "postal/global");
        let position = |id: &str| ids.iter().position(|i| *i == id).unwrap();
        assert!(position("postal/et") < position("territory/estonia"));
        assert!(position("postal/ru") < position("territory/estonia"));
        assert!(position("postal/lv") < position("territory/latvia"));
        assert_eq!(resolution.total_bytes, 100 + 200 + 1000 + 10 + 20 + 30);
    }

    #[test]
    fn test_present_compatible_not_queued() {
        let mut fixture = Fixture::new(baltic_catalog(), FeatureSet::default());
        fixture.install("postal/global", "1");

        let resolver = fixture.resolver();
        assert_eq!(
            resolver.availability(&DatasetId::new("postal/global")),
            Availability::PresentCompatible
        );
        let ids: Vec<_> = resolver
            .resolve(&requested(&["territory/estonia"]), "http://x")
            .dataset_ids()
            .cloned()
            .collect();
        assert!(!ids.contains(&DatasetId::new("postal/global")));
        assert_eq!(ids.len(), 3);
    }

    #[test]
    fn test_version_skew_is_incompatible_and_queued() {
        let mut catalog_entries = vec![descriptor(
            "territory/estonia",
            DatasetKind::Territory,
            "Estonia",
            100,
        )];
        catalog_entries[0].version = "2".to_string();
        let catalog = Catalog::from_descriptors(catalog_entries).unwrap();
        let mut fixture = Fixture::new(catalog, FeatureSet { address_search: false });
        fixture.install("territory/estonia", "1");

        let resolver = fixture.resolver();
        let estonia = DatasetId::new("territory/estonia");
        assert_eq!(resolver.availability(&estonia), Availability::PresentIncompatible);

        let resolution = resolver.resolve(&requested(&["territory/estonia"]), "http://x");
        assert_eq!(resolution.dataset_ids().collect::<Vec<_>>(), vec![&estonia]);
        assert_eq!(resolution.queue[0].version, "2");
    }

    #[test]
    fn test_registered_but_deleted_file_is_absent() {
        let mut fixture = Fixture::new(baltic_catalog(), FeatureSet::default());
        fixture.install("postal/global", "1");
        fs::remove_file(fixture.layout.full_path("postal/global.dat")).unwrap();

        assert_eq!(
            fixture.resolver().availability(&DatasetId::new("postal/global")),
            Availability::Absent
        );
    }

    #[test]
    fn test_unknown_to_catalog_counts_compatible() {
        let temp = TempDir::new().unwrap();
        let mut registry = Registry::open(&temp.path().join("files.sqlite"));
        let path = temp.path().join("old.dat");
        fs::write(&path, b"x").unwrap();
        let id = DatasetId::new("territory/retired");
        registry.register(&path, &id, "9").unwrap();

        assert_eq!(
            availability(&id, Some(&baltic_catalog()), &registry),
            Availability::PresentCompatible
        );
        assert_eq!(availability(&id, None, &registry), Availability::PresentCompatible);
    }

    #[test]
    fn test_summary_groups_by_requested_territory() {
        let fixture = Fixture::new(baltic_catalog(), FeatureSet::default());
        let resolution = fixture
            .resolver()
            .resolve(&requested(&["territory/estonia"]), "http://x");

        let lines: Vec<&str> = resolution.summary.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines.iter().all(|line| line.starts_with("Estonia / ")));
        assert!(lines.contains(&"Estonia / Map data: 100 bytes"));
        assert!(lines.contains(&"Estonia / Estonian: 10 bytes"));
    }

    #[test]
    fn test_nothing_missing_is_empty() {
        let fixture = Fixture::new(baltic_catalog(), FeatureSet::default());
        let resolution = fixture.resolver().resolve(&RequestedSet::new(), "http://x");
        assert!(resolution.is_empty());
        assert_eq!(resolution.total_bytes, 0);
        assert!(resolution.summary.is_empty());
    }
}
