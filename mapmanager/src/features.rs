//! Installable features and the dependency edges between datasets.
//!
//! A requested territory always needs its own map data. Optional features
//! add further datasets: address search needs the global address-parser
//! model (`postal/global`) plus the country language models of the
//! languages spoken in the territory. The languages come from a static
//! table keyed by territory slug.
//!
//! Each [`Feature`] is a pure function from a dataset id to the ids it
//! needs. [`FeatureGraph`] combines the enabled features with the explicit
//! `depends_on` edges published in the catalog and expands requests into
//! their closure.
//!
//! ```text
//! territory/estonia ──► postal/et ──► postal/global
//!        │          └─► postal/ru ──► postal/global
//!        └────────────► postal/global
//! ```

use std::collections::{BTreeSet, HashSet};

use crate::catalog::{Catalog, DatasetId, DatasetKind};

/// Id of the global address-parser model.
pub const POSTAL_GLOBAL_ID: &str = "postal/global";

/// Prefix of country language model ids (`postal/<language>`).
pub const POSTAL_COUNTRY_PREFIX: &str = "postal/";

/// Languages used for address parsing, keyed by territory slug.
const LANGUAGES_BY_TERRITORY: &[(&str, &[&str])] = &[
    ("austria", &["de"]),
    ("belarus", &["be", "ru"]),
    ("belgium", &["nl", "fr", "de"]),
    ("canada", &["en", "fr"]),
    ("denmark", &["da"]),
    ("estonia", &["et", "ru"]),
    ("finland", &["fi", "sv"]),
    ("france", &["fr"]),
    ("germany", &["de"]),
    ("ireland", &["en", "ga"]),
    ("italy", &["it"]),
    ("latvia", &["lv", "ru"]),
    ("lithuania", &["lt"]),
    ("luxembourg", &["lb", "fr", "de"]),
    ("netherlands", &["nl"]),
    ("norway", &["nb", "nn"]),
    ("poland", &["pl"]),
    ("portugal", &["pt"]),
    ("russia", &["ru"]),
    ("spain", &["es", "ca", "eu", "gl"]),
    ("sweden", &["sv"]),
    ("switzerland", &["de", "fr", "it", "rm"]),
    ("ukraine", &["uk", "ru"]),
    ("united-kingdom", &["en"]),
    ("united-states", &["en", "es"]),
];

/// Look up the address-parsing languages of a territory slug.
pub fn territory_languages(slug: &str) -> &'static [&'static str] {
    LANGUAGES_BY_TERRITORY
        .iter()
        .find(|(territory, _)| territory.eq_ignore_ascii_case(slug))
        .map(|(_, languages)| *languages)
        .unwrap_or(&[])
}

/// Which optional features the user selected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeatureSet {
    /// Install address-search models for requested territories.
    pub address_search: bool,
}

impl Default for FeatureSet {
    fn default() -> Self {
        Self {
            address_search: true,
        }
    }
}

/// A feature contributes dependency edges for the datasets it covers.
pub trait Feature: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Datasets `id` needs because of this feature.
    ///
    /// Must be pure; ids the catalog does not provide are never returned.
    fn dependencies(&self, id: &DatasetId, catalog: &Catalog) -> BTreeSet<DatasetId>;
}

/// Territory map data. Needs nothing beyond the territory itself.
#[derive(Debug, Default)]
pub struct MapDataFeature;

impl Feature for MapDataFeature {
    fn name(&self) -> &'static str {
        "map-data"
    }

    fn dependencies(&self, _id: &DatasetId, _catalog: &Catalog) -> BTreeSet<DatasetId> {
        BTreeSet::new()
    }
}

/// Address search for territories.
#[derive(Debug, Default)]
pub struct AddressSearchFeature;

impl Feature for AddressSearchFeature {
    fn name(&self) -> &'static str {
        "address-search"
    }

    fn dependencies(&self, id: &DatasetId, catalog: &Catalog) -> BTreeSet<DatasetId> {
        let mut deps = BTreeSet::new();
        let Some(descriptor) = catalog.get(id) else {
            return deps;
        };

        let global = DatasetId::new(POSTAL_GLOBAL_ID);
        match descriptor.kind {
            DatasetKind::Territory => {
                deps.insert(global);
                for language in territory_languages(id.slug()) {
                    deps.insert(DatasetId::new(format!("{}{}", POSTAL_COUNTRY_PREFIX, language)));
                }
            }
            DatasetKind::CountryLanguageModel => {
                deps.insert(global);
            }
            DatasetKind::GlobalLanguageModel => {}
        }

        deps.retain(|dep| dep != id && catalog.contains(dep));
        deps
    }
}

/// Dependency graph over catalog datasets for a selection of features.
pub struct FeatureGraph {
    features: Vec<Box<dyn Feature>>,
}

impl FeatureGraph {
    /// Build the graph for the selected features.
    pub fn new(selection: FeatureSet) -> Self {
        let mut features: Vec<Box<dyn Feature>> = vec![Box::new(MapDataFeature)];
        if selection.address_search {
            features.push(Box::new(AddressSearchFeature));
        }
        Self { features }
    }

    /// Build the graph from an explicit feature list.
    pub fn with_features(features: Vec<Box<dyn Feature>>) -> Self {
        Self { features }
    }

    /// Direct dependencies of `id`: catalog edges plus feature edges.
    pub fn dependencies(&self, id: &DatasetId, catalog: &Catalog) -> BTreeSet<DatasetId> {
        let mut deps: BTreeSet<DatasetId> = catalog
            .get(id)
            .map(|d| d.depends_on.clone())
            .unwrap_or_default();
        for feature in &self.features {
            deps.extend(feature.dependencies(id, catalog));
        }
        deps.remove(id);
        deps
    }

    /// Expand `roots` into their transitive closure in dependency-first
    /// order. Each dataset appears once even when shared.
    ///
    /// Roots are visited in catalog display order, and so are the
    /// dependencies of each node, which makes the result deterministic.
    /// Roots the catalog does not provide are skipped.
    pub fn closure<'a>(
        &self,
        roots: impl IntoIterator<Item = &'a DatasetId>,
        catalog: &Catalog,
    ) -> Vec<DatasetId> {
        let mut roots: Vec<&DatasetId> = roots.into_iter().filter(|id| catalog.contains(id)).collect();
        roots.sort_by_key(|id| catalog.display_rank(id));

        let mut order = Vec::new();
        let mut visited = HashSet::new();
        for root in roots {
            self.visit(root, catalog, &mut visited, &mut order);
        }
        order
    }

    fn visit(
        &self,
        id: &DatasetId,
        catalog: &Catalog,
        visited: &mut HashSet<DatasetId>,
        order: &mut Vec<DatasetId>,
    ) {
        // Marked before descending so a malformed cyclic catalog terminates.
        if !visited.insert(id.clone()) {
            return;
        }

        let mut deps: Vec<DatasetId> = self.dependencies(id, catalog).into_iter().collect();
        deps.sort_by_key(|dep| catalog.display_rank(dep));
        for dep in &deps {
            self.visit(dep, catalog, visited, order);
        }
        order.push(id.clone());
    }
}

impl Default for FeatureGraph {
    fn default() -> Self {
        Self::new(FeatureSet::default())
    }
}

impl std::fmt::Debug for FeatureGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.features.iter().map(|feature| feature.name()))
            .finish()
    }
}
