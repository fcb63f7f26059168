//! Dataset identity types.
//!
//! A [`Descriptor`] describes one installable unit as published in the
//! remote catalog. Descriptors are immutable for the lifetime of a loaded
//! catalog; a catalog refresh replaces them wholesale.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Component, Path};

use serde::{Deserialize, Deserializer, Serialize};

/// Stable, hierarchical dataset identifier such as `territory/estonia`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatasetId(String);

impl DatasetId {
    /// Create a dataset id from any string-like value.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The first path segment (`territory` for `territory/estonia`).
    pub fn group(&self) -> &str {
        self.0.split('/').next().unwrap_or_default()
    }

    /// The last path segment (`estonia` for `territory/estonia`).
    pub fn slug(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or_default()
    }
}

impl fmt::Display for DatasetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DatasetId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for DatasetId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Kind of installable data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DatasetKind {
    /// Map data for a territory.
    Territory,
    /// Language model shared by all countries (`postal/global`).
    GlobalLanguageModel,
    /// Address-parsing model for one country or language.
    CountryLanguageModel,
}

impl DatasetKind {
    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Territory => "Map data",
            Self::GlobalLanguageModel => "Address parser (global)",
            Self::CountryLanguageModel => "Address parser (country)",
        }
    }
}

impl fmt::Display for DatasetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Territory => "territory",
            Self::GlobalLanguageModel => "global-language-model",
            Self::CountryLanguageModel => "country-language-model",
        };
        f.write_str(name)
    }
}

/// One installable dataset as published in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Stable identifier.
    pub id: DatasetId,
    /// What kind of data this is.
    pub kind: DatasetKind,
    /// Display name.
    #[serde(rename = "name")]
    pub display_name: String,
    /// Published size of the file in bytes.
    #[serde(rename = "size")]
    pub size_bytes: u64,
    /// Opaque version tag; compared for equality only.
    #[serde(deserialize_with = "deserialize_version")]
    pub version: String,
    /// Install location relative to the storage root.
    pub path: String,
    /// Explicit download URL. When absent the file is fetched from the
    /// distribution base URL joined with `path`.
    #[serde(default)]
    pub url: Option<String>,
    /// Optional SHA-256 of the file (lowercase hex).
    #[serde(default)]
    pub sha256: Option<String>,
    /// Datasets that must be installed alongside this one.
    #[serde(default)]
    pub depends_on: BTreeSet<DatasetId>,
}

impl Descriptor {
    /// Resolve the URL to fetch this dataset from.
    pub fn download_url(&self, base_url: &str) -> String {
        match &self.url {
            Some(url) => url.clone(),
            None => join_url(base_url, &self.path),
        }
    }
}

/// Join a base URL and a relative path with exactly one separator.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

/// Check that a catalog path stays inside the storage root.
pub(crate) fn is_safe_relative_path(path: &str) -> bool {
    if path.is_empty() {
        return false;
    }
    Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_)))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum VersionRepr {
    Text(String),
    Number(u64),
}

fn deserialize_version<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match VersionRepr::deserialize(deserializer)? {
        VersionRepr::Text(s) => s,
        VersionRepr::Number(n) => n.to_string(),
    })
}
