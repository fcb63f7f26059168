//! The map manager.
//!
//! [`MapManager`] is the one owned object through which the application
//! touches offline data. It owns the registry, the requested set, the
//! loaded documents and the download orchestrator, and mutates them only
//! from `&mut self`. Downloads run on the downloader's own tasks; their
//! events come back through [`MapManager::process_next_event`], which the
//! application drives from its event loop.
//!
//! ```text
//! add_dataset ──► requested set ──► scan ──► MissingChanged
//! get_missing ──► resolver ──► orchestrator ──► downloader
//!                                   ▲                │
//!                                   └─ process_next_event ◄─ FetchEvent
//! list_unneeded ──► token ──► delete_unneeded (token re-verified)
//! ```

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::broadcast;

use crate::catalog::{join_url, Catalog, DatasetId, RequestedSet, ServerUrl};
use crate::config::ManagerConfig;
use crate::download::{
    verify_sha256, DownloadKind, DownloadProgress, Downloader, HttpDownloader, ItemCommitter,
    Orchestrator, QueueItem, SessionOutcome, SessionUpdate,
};
use crate::error::{ManagerError, ManagerResult};
use crate::events::{ActiveData, EventBus, ManagerEvent};
use crate::features::FeatureGraph;
use crate::gc::{self, DeletionReport, UnneededFiles};
use crate::registry::{Registry, RegistryEntry};
use crate::resolver::{self, Availability, Resolver};
use crate::storage::{self, format_size, StorageLayout, FNAME_CATALOG, FNAME_SERVER_URL};
use crate::updates::{self, UpdateInfo};

/// Work to start once the running session completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FollowUp {
    /// Fetch the catalog from the refreshed distribution URL.
    FetchCatalog,
    /// Diff installed versions against the refreshed catalog.
    CheckUpdates,
}

/// Documents fetched from the distribution point.
#[derive(Debug, Default)]
struct Documents {
    catalog: Option<Catalog>,
    server_url: Option<ServerUrl>,
}

/// Commits finished transfers into storage, the registry and the
/// in-memory documents.
struct Installer<'a> {
    registry: &'a mut Registry,
    documents: &'a mut Documents,
}

impl ItemCommitter for Installer<'_> {
    fn commit(&mut self, kind: DownloadKind, item: &QueueItem, staged: &Path) -> ManagerResult<()> {
        match kind {
            DownloadKind::Countries => {
                let dataset_id = item.dataset_id.as_ref().ok_or_else(|| {
                    ManagerError::Precondition(format!("{} has no dataset id", item.url))
                })?;
                if let Some(expected) = &item.sha256 {
                    verify_sha256(staged, expected)?;
                }
                move_into_place(staged, &item.destination)?;
                self.registry
                    .register(&item.destination, dataset_id, &item.version)
            }
            DownloadKind::ServerUrlRefresh => {
                let server_url = ServerUrl::from_slice(&read_file(staged)?)?;
                move_into_place(staged, &item.destination)?;
                tracing::info!(url = %server_url.url, "distribution URL updated");
                self.documents.server_url = Some(server_url);
                Ok(())
            }
            DownloadKind::CatalogRefresh => {
                let catalog = Catalog::from_slice(&read_file(staged)?)?;
                move_into_place(staged, &item.destination)?;
                tracing::info!(datasets = catalog.len(), "catalog updated");
                self.documents.catalog = Some(catalog);
                Ok(())
            }
        }
    }
}

/// Owner of all offline-data state.
pub struct MapManager {
    config: ManagerConfig,
    layout: StorageLayout,
    storage_available: bool,
    graph: FeatureGraph,
    registry: Registry,
    requested: RequestedSet,
    documents: Documents,
    orchestrator: Orchestrator,
    http_downloader: bool,
    events: EventBus,
    follow_up: Option<FollowUp>,
    downloading: bool,
    missing: bool,
    missing_info: String,
    updates: Vec<UpdateInfo>,
    gc_token: Option<Vec<PathBuf>>,
    free_space: fn(&Path) -> Option<u64>,
}

impl MapManager {
    /// Create a manager that downloads over HTTP.
    pub fn new(config: ManagerConfig) -> Self {
        let downloader = Arc::new(HttpDownloader::new(config.timeout));
        let mut manager = Self::with_downloader(config, downloader);
        manager.http_downloader = true;
        manager
    }

    /// Create a manager with a custom [`Downloader`].
    pub fn with_downloader(config: ManagerConfig, downloader: Arc<dyn Downloader>) -> Self {
        let orchestrator = Orchestrator::new(downloader).with_progress_step(config.progress_step);
        let mut manager = Self {
            layout: StorageLayout::new(config.storage_root.clone()),
            graph: FeatureGraph::new(config.features),
            config,
            storage_available: false,
            registry: Registry::unavailable("storage not checked"),
            requested: RequestedSet::new(),
            documents: Documents::default(),
            orchestrator,
            http_downloader: false,
            events: EventBus::new(),
            follow_up: None,
            downloading: false,
            missing: false,
            missing_info: String::new(),
            updates: Vec::new(),
            gc_token: None,
            free_space: storage::available_space,
        };
        manager.reload();
        manager
    }

    /// Replace how free space on the storage volume is measured.
    pub fn with_free_space_probe(mut self, probe: fn(&Path) -> Option<u64>) -> Self {
        self.free_space = probe;
        self
    }

    /// Re-apply settings: storage root, features, URLs and timeouts.
    ///
    /// Refused while a download is running.
    pub fn apply_config(&mut self, config: ManagerConfig) -> ManagerResult<()> {
        if self.orchestrator.is_active() {
            return Err(ManagerError::AlreadyDownloading);
        }
        if self.http_downloader && config.timeout != self.config.timeout {
            self.orchestrator = Orchestrator::new(Arc::new(HttpDownloader::new(config.timeout)));
        }
        self.orchestrator.set_progress_step(config.progress_step);
        self.layout = StorageLayout::new(config.storage_root.clone());
        self.graph = FeatureGraph::new(config.features);
        self.config = config;
        tracing::info!(root = %self.layout.root().display(), "configuration applied");
        self.reload();
        Ok(())
    }

    /// Check storage and load every persisted document, then scan.
    fn reload(&mut self) {
        self.gc_token = None;
        self.documents = Documents::default();
        self.requested = RequestedSet::new();
        self.registry = Registry::unavailable("storage unavailable");

        self.check_storage_available();
        if self.storage_available {
            self.registry = Registry::open(&self.layout.registry());
            self.requested = match RequestedSet::load(&self.layout.requested()) {
                Ok(requested) => requested,
                Err(e) => {
                    self.report(&e);
                    RequestedSet::new()
                }
            };
            self.documents.server_url = self.load_document(&self.layout.server_url(), ServerUrl::from_slice);
            self.documents.catalog = self.load_document(&self.layout.catalog(), Catalog::from_slice);
        }
        self.scan();
    }

    fn load_document<T>(&self, path: &Path, parse: fn(&[u8]) -> ManagerResult<T>) -> Option<T> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                self.report(&ManagerError::ReadFailed {
                    path: path.to_path_buf(),
                    source: e,
                });
                return None;
            }
        };
        match parse(&bytes) {
            Ok(document) => Some(document),
            Err(e) => {
                self.report(&e);
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Storage
    // ------------------------------------------------------------------

    /// Re-check the storage root. Publishes a change of availability.
    pub fn check_storage_available(&mut self) -> bool {
        let available = match self.layout.check_available() {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(error = %e, "storage unavailable");
                false
            }
        };
        if available != self.storage_available {
            self.storage_available = available;
            self.events
                .publish(ManagerEvent::StorageAvailabilityChanged(available));
        }
        available
    }

    pub fn storage_available(&self) -> bool {
        self.storage_available
    }

    fn ensure_storage(&self) -> ManagerResult<()> {
        if self.storage_available {
            Ok(())
        } else {
            Err(ManagerError::StorageUnavailable {
                path: self.layout.root().to_path_buf(),
                reason: "storage root is not configured or not usable".to_string(),
            })
        }
    }

    /// Absolute path for a path relative to the storage root.
    pub fn full_path(&self, relative: &str) -> PathBuf {
        self.layout.full_path(relative)
    }

    // ------------------------------------------------------------------
    // Scan
    // ------------------------------------------------------------------

    /// Reconcile requested set, catalog, registry and disk.
    ///
    /// Publishes missing-data changes and the current active data.
    pub fn scan(&mut self) {
        let (missing, info, active) = match (&self.documents.catalog, self.storage_available) {
            (Some(catalog), true) => {
                let resolver = Resolver::new(catalog, &self.registry, &self.graph, &self.layout);
                let resolution = resolver.resolve(&self.requested, self.base_url());
                let mut active = ActiveData::default();
                for id in resolver.closure(self.requested.iter()) {
                    if resolver.availability(&id) != Availability::PresentCompatible {
                        continue;
                    }
                    let Some(descriptor) = catalog.get(&id) else {
                        continue;
                    };
                    let paths = self
                        .registry
                        .lookup(&id)
                        .into_iter()
                        .map(|entry| entry.path)
                        .filter(|path| path.is_file());
                    active.files.entry(descriptor.kind).or_default().extend(paths);
                }
                (!resolution.is_empty(), resolution.summary, active)
            }
            _ => (false, String::new(), ActiveData::default()),
        };

        tracing::debug!(missing, "scan complete");
        if missing != self.missing {
            self.missing = missing;
            self.events.publish(ManagerEvent::MissingChanged(missing));
        }
        if info != self.missing_info {
            self.missing_info = info.clone();
            self.events.publish(ManagerEvent::MissingInfoChanged(info));
        }
        self.events.publish(ManagerEvent::ActiveDataChanged(active));
    }

    /// Whether anything requested needs a download.
    pub fn missing(&self) -> bool {
        self.missing
    }

    /// Human-readable breakdown of missing data.
    pub fn missing_info(&self) -> &str {
        &self.missing_info
    }

    // ------------------------------------------------------------------
    // Catalog and requested set
    // ------------------------------------------------------------------

    pub fn catalog(&self) -> Option<&Catalog> {
        self.documents.catalog.as_ref()
    }

    pub fn requested(&self) -> &RequestedSet {
        &self.requested
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Distribution base URL: `url.json` if loaded, else the configured one.
    pub fn base_url(&self) -> &str {
        self.documents
            .server_url
            .as_ref()
            .map(|doc| doc.url.as_str())
            .unwrap_or(&self.config.default_distribution_url)
    }

    /// Territories offered by the catalog, as a JSON array in display order.
    pub fn list_provided(&self) -> String {
        let listing = self
            .catalog()
            .map(|catalog| catalog.list_territories())
            .unwrap_or_default();
        serde_json::to_value(listing)
            .unwrap_or_else(|_| Value::Array(Vec::new()))
            .to_string()
    }

    /// Requested datasets as a JSON array in display order.
    pub fn list_requested(&self) -> String {
        let mut ids: Vec<&DatasetId> = self.requested.iter().collect();
        if let Some(catalog) = self.catalog() {
            ids.sort_by_key(|id| catalog.display_rank(id));
        }
        Value::Array(ids.into_iter().map(|id| self.summary_json(id)).collect()).to_string()
    }

    /// Installed datasets as a JSON array in display order.
    pub fn list_available(&self) -> String {
        let Some(catalog) = self.catalog() else {
            return "[]".to_string();
        };
        let present: Vec<Value> = catalog
            .ordered()
            .filter(|descriptor| self.availability(&descriptor.id).is_present())
            .map(|descriptor| self.summary_json(&descriptor.id))
            .collect();
        Value::Array(present).to_string()
    }

    fn summary_json(&self, id: &DatasetId) -> Value {
        let descriptor = self.catalog().and_then(|catalog| catalog.get(id));
        json!({
            "id": id,
            "name": descriptor.map(|d| d.display_name.as_str()).unwrap_or(id.as_str()),
            "size": descriptor.map(|d| d.size_bytes).unwrap_or(0),
            "status": self.availability(id),
        })
    }

    /// Add a dataset to the requested set.
    ///
    /// Returns `false` when it was already requested.
    pub fn add_dataset(&mut self, id: &DatasetId) -> ManagerResult<bool> {
        self.ensure_storage()?;
        if let Some(catalog) = self.catalog() {
            catalog.find_by_id(id)?;
        }
        if !self.requested.add(id.clone()) {
            return Ok(false);
        }
        self.persist_requested(id, true)
    }

    /// Remove a dataset from the requested set. Its files stay on disk until
    /// garbage collected.
    pub fn remove_dataset(&mut self, id: &DatasetId) -> ManagerResult<bool> {
        self.ensure_storage()?;
        if !self.requested.remove(id) {
            return Ok(false);
        }
        self.persist_requested(id, false)
    }

    fn persist_requested(&mut self, id: &DatasetId, added: bool) -> ManagerResult<bool> {
        if let Err(e) = self.requested.save(&self.layout.requested()) {
            // Keep memory and disk in agreement.
            if added {
                self.requested.remove(id);
            } else {
                self.requested.add(id.clone());
            }
            self.report(&e);
            return Err(e);
        }
        tracing::info!(dataset = %id, added, "requested set changed");
        self.events.publish(ManagerEvent::SubscriptionChanged);
        self.scan();
        Ok(true)
    }

    pub fn is_requested(&self, id: &DatasetId) -> bool {
        self.requested.contains(id)
    }

    /// Availability of a single dataset.
    pub fn availability(&self, id: &DatasetId) -> Availability {
        resolver::availability(id, self.catalog(), &self.registry)
    }

    /// Whether the dataset and everything it needs are installed, in any
    /// version.
    pub fn is_available(&self, id: &DatasetId) -> bool {
        self.closure_of(id)
            .iter()
            .all(|dep| self.availability(dep).is_present())
    }

    /// Whether no installed part of the dataset's closure is outdated.
    pub fn is_compatible(&self, id: &DatasetId) -> bool {
        self.closure_of(id)
            .iter()
            .all(|dep| self.availability(dep) != Availability::PresentIncompatible)
    }

    fn closure_of(&self, id: &DatasetId) -> Vec<DatasetId> {
        match self.catalog() {
            Some(catalog) if catalog.contains(id) => self.graph.closure([id], catalog),
            _ => vec![id.clone()],
        }
    }

    /// Registry entry for a file, if the manager installed it.
    pub fn is_registered(&self, path: &Path) -> Option<RegistryEntry> {
        self.registry.entry(path).ok().flatten()
    }

    /// Everything known about a dataset, as a JSON object.
    pub fn dataset_details(&self, id: &DatasetId) -> ManagerResult<String> {
        let catalog = self
            .catalog()
            .ok_or_else(|| ManagerError::Precondition("catalog not loaded".to_string()))?;
        let descriptor = catalog.find_by_id(id)?;
        let closure = self.graph.closure([id], catalog);
        let closure_size: u64 = closure
            .iter()
            .filter_map(|dep| catalog.get(dep))
            .map(|d| d.size_bytes)
            .sum();

        let files: Vec<Value> = self
            .registry
            .lookup(id)
            .into_iter()
            .map(|entry| {
                json!({
                    "path": entry.path,
                    "version": entry.version,
                    "installed_at": entry.installed_at.to_rfc3339(),
                    "exists": entry.path.is_file(),
                })
            })
            .collect();
        let dependencies: Vec<Value> = closure
            .iter()
            .filter(|dep| *dep != id)
            .map(|dep| self.summary_json(dep))
            .collect();

        Ok(json!({
            "id": descriptor.id,
            "name": descriptor.display_name,
            "kind": descriptor.kind,
            "size": descriptor.size_bytes,
            "version": descriptor.version,
            "closure_size": closure_size,
            "requested": self.is_requested(id),
            "status": self.availability(id),
            "files": files,
            "dependencies": dependencies,
        })
        .to_string())
    }

    // ------------------------------------------------------------------
    // Downloads
    // ------------------------------------------------------------------

    /// Download everything missing for the requested set.
    ///
    /// Returns `false` when nothing is missing.
    pub fn get_missing(&mut self) -> ManagerResult<bool> {
        self.ensure_storage()?;
        if self.orchestrator.is_active() {
            return Err(ManagerError::AlreadyDownloading);
        }
        let catalog = self
            .catalog()
            .ok_or_else(|| ManagerError::Precondition("catalog not loaded".to_string()))?;
        let resolution = Resolver::new(catalog, &self.registry, &self.graph, &self.layout)
            .resolve(&self.requested, self.base_url());

        if let Some(free) = (self.free_space)(self.layout.root()) {
            if free < resolution.total_bytes {
                self.events.publish(ManagerEvent::Error(format!(
                    "Not enough free space: {} needed, {} available",
                    format_size(resolution.total_bytes),
                    format_size(free)
                )));
            }
        }

        self.start_session(DownloadKind::Countries, resolution.queue, None)
    }

    /// Install available updates. Outdated data counts as missing.
    pub fn get_updates(&mut self) -> ManagerResult<bool> {
        self.get_missing()
    }

    /// Fetch `url.json` and then the catalog from the resulting base URL.
    pub fn refresh_catalog(&mut self) -> ManagerResult<bool> {
        self.ensure_storage()?;
        let url = join_url(&self.config.default_distribution_url, FNAME_SERVER_URL);
        let item = QueueItem::document(url, self.layout.server_url());
        self.start_session(
            DownloadKind::ServerUrlRefresh,
            vec![item],
            Some(FollowUp::FetchCatalog),
        )
    }

    /// Fetch a fresh catalog and report datasets with a new version.
    pub fn check_for_updates(&mut self) -> ManagerResult<bool> {
        if !self.config.has_storage_root() || !self.storage_available {
            return Err(ManagerError::Precondition(
                "cannot check for updates: storage is not configured".to_string(),
            ));
        }
        if self.requested.is_empty() {
            return Err(ManagerError::Precondition(
                "cannot check for updates: no datasets requested".to_string(),
            ));
        }
        self.start_catalog_refresh(Some(FollowUp::CheckUpdates))
    }

    fn start_catalog_refresh(&mut self, follow_up: Option<FollowUp>) -> ManagerResult<bool> {
        let url = join_url(self.base_url(), FNAME_CATALOG);
        let item = QueueItem::document(url, self.layout.catalog());
        self.start_session(DownloadKind::CatalogRefresh, vec![item], follow_up)
    }

    fn start_session(
        &mut self,
        kind: DownloadKind,
        queue: Vec<QueueItem>,
        follow_up: Option<FollowUp>,
    ) -> ManagerResult<bool> {
        let started = self.orchestrator.start(kind, queue)?;
        if started {
            self.gc_token = None;
            self.follow_up = follow_up;
            self.set_downloading(true);
        } else {
            self.set_downloading(false);
        }
        Ok(started)
    }

    /// Last update check result as a JSON array.
    pub fn updates_found(&self) -> String {
        updates::updates_json(&self.updates).unwrap_or_else(|_| "[]".to_string())
    }

    pub fn updates(&self) -> &[UpdateInfo] {
        &self.updates
    }

    /// Stop the running download. Items already installed are kept.
    pub fn stop_download(&mut self) -> bool {
        match self.orchestrator.cancel() {
            Some(update) => {
                self.apply_update(update);
                true
            }
            None => false,
        }
    }

    pub fn downloading(&self) -> bool {
        self.orchestrator.is_active()
    }

    pub fn progress(&self) -> Option<DownloadProgress> {
        self.orchestrator.progress()
    }

    /// Wait for and apply the next downloader event.
    ///
    /// Returns `false` immediately when no download is running.
    pub async fn process_next_event(&mut self) -> bool {
        let Some(event) = self.orchestrator.next_event().await else {
            return false;
        };
        let mut installer = Installer {
            registry: &mut self.registry,
            documents: &mut self.documents,
        };
        let updates = self.orchestrator.handle_event(event, &mut installer);
        for update in updates {
            self.apply_update(update);
        }
        true
    }

    /// Process events until no download is running, chained sessions
    /// included.
    pub async fn run_until_idle(&mut self) {
        while self.process_next_event().await {}
    }

    fn apply_update(&mut self, update: SessionUpdate) {
        match update {
            SessionUpdate::Progress(progress) => {
                self.events.publish(ManagerEvent::DownloadProgress(progress));
            }
            SessionUpdate::Installed { kind, .. } => {
                if kind == DownloadKind::Countries {
                    self.events.publish(ManagerEvent::AvailabilityChanged);
                }
            }
            SessionUpdate::Finished { kind, outcome } => self.finish_session(kind, outcome),
        }
    }

    fn finish_session(&mut self, kind: DownloadKind, outcome: SessionOutcome) {
        let follow_up = self.follow_up.take();
        let mut chained = false;

        match outcome {
            SessionOutcome::Completed => match follow_up {
                Some(FollowUp::FetchCatalog) => match self.start_catalog_refresh(None) {
                    Ok(started) => chained = started,
                    Err(e) => self.report(&e),
                },
                Some(FollowUp::CheckUpdates) => self.diff_updates(),
                None => {}
            },
            SessionOutcome::Failed { failed, error, skipped } => {
                tracing::warn!(%kind, url = %failed.url, skipped, "download failed");
                self.report(&error);
            }
            SessionOutcome::Cancelled => {
                tracing::info!(%kind, "download stopped");
            }
        }

        if !chained {
            self.set_downloading(false);
        }
        self.scan();
    }

    fn diff_updates(&mut self) {
        let Some(catalog) = self.documents.catalog.as_ref() else {
            return;
        };
        let ids = self.graph.closure(self.requested.iter(), catalog);
        self.updates = updates::find_updates(&ids, catalog, &self.registry);
        tracing::info!(updates = self.updates.len(), "update check finished");
        self.events
            .publish(ManagerEvent::UpdatesFound(self.updates.clone()));
    }

    fn set_downloading(&mut self, downloading: bool) {
        if downloading != self.downloading {
            self.downloading = downloading;
            self.events
                .publish(ManagerEvent::DownloadingChanged(downloading));
        }
    }

    // ------------------------------------------------------------------
    // Garbage collection
    // ------------------------------------------------------------------

    /// Files no requested dataset needs.
    ///
    /// Unavailable (`total_bytes == -1`) while downloading, without a
    /// catalog, or when the registry could not be opened. The returned list
    /// is remembered and must be passed back unchanged to
    /// [`delete_unneeded`](Self::delete_unneeded).
    pub fn list_unneeded(&mut self) -> UnneededFiles {
        match self.unneeded_listing() {
            Ok(listing) => {
                self.gc_token = Some(listing.files.clone());
                listing
            }
            Err(e) => {
                tracing::info!(reason = %e, "unneeded file listing unavailable");
                self.gc_token = None;
                UnneededFiles::unavailable()
            }
        }
    }

    /// Delete files previously returned by [`list_unneeded`](Self::list_unneeded).
    ///
    /// Nothing is deleted unless `files` equals both the remembered listing
    /// and a listing computed now.
    pub fn delete_unneeded(&mut self, files: &[PathBuf]) -> ManagerResult<DeletionReport> {
        let token = self.gc_token.take();
        let fresh = self.unneeded_listing()?;
        if let Err(e) = gc::verify_token(files, token.as_deref(), &fresh) {
            tracing::warn!(files = files.len(), "unneeded file list is stale, nothing deleted");
            return Err(e);
        }

        let report = gc::delete_unneeded(&self.layout, &mut self.registry, files);
        if let Some((path, reason)) = &report.failed {
            self.events.publish(ManagerEvent::Error(format!(
                "Failed to delete {}: {}",
                path.display(),
                reason
            )));
        }
        if !report.deleted.is_empty() {
            self.events.publish(ManagerEvent::AvailabilityChanged);
        }
        self.scan();
        Ok(report)
    }

    fn unneeded_listing(&self) -> ManagerResult<UnneededFiles> {
        self.ensure_storage()?;
        if self.orchestrator.is_active() {
            return Err(ManagerError::AlreadyDownloading);
        }
        let catalog = self
            .catalog()
            .ok_or_else(|| ManagerError::Precondition("catalog not loaded".to_string()))?;
        let needed: BTreeSet<DatasetId> = self
            .graph
            .closure(self.requested.iter(), catalog)
            .into_iter()
            .collect();
        gc::list_unneeded(&self.layout, &self.registry, &needed)
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    pub fn subscribe(&self) -> broadcast::Receiver<ManagerEvent> {
        self.events.subscribe()
    }

    fn report(&self, error: &ManagerError) {
        self.events.publish(ManagerEvent::Error(error.to_string()));
    }
}

impl std::fmt::Debug for MapManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MapManager")
            .field("root", &self.layout.root())
            .field("storage_available", &self.storage_available)
            .field("requested", &self.requested.len())
            .field("catalog", &self.catalog().map(Catalog::len))
            .field("downloading", &self.orchestrator.active_kind())
            .finish()
    }
}

fn read_file(path: &Path) -> ManagerResult<Vec<u8>> {
    fs::read(path).map_err(|e| ManagerError::ReadFailed {
        path: path.to_path_buf(),
        source: e,
    })
}

fn move_into_place(staged: &Path, destination: &Path) -> ManagerResult<()> {
    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent).map_err(|e| ManagerError::CreateDirFailed {
            path: parent.to_path_buf(),
            source: e,
        })?;
    }
    fs::rename(staged, destination).map_err(|e| ManagerError::WriteFailed {
        path: destination.to_path_buf(),
        source: e,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::fixtures::baltic_catalog;
    use crate::download::{FetchEvent, FetchEventSender, FetchHandle, FetchRequest};
    use crate::features::FeatureSet;
    use tempfile::TempDir;

    /// Serves the baltic catalog and writes placeholder bytes for datasets.
    struct StaticDownloader {
        catalog: Vec<u8>,
    }

    impl Downloader for StaticDownloader {
        fn fetch(&self, request: FetchRequest, events: FetchEventSender) -> FetchHandle {
            let body: Vec<u8> = if request.url.ends_with(FNAME_CATALOG) {
                self.catalog.clone()
            } else if request.url.ends_with(FNAME_SERVER_URL) {
                br#"{"url": "http://mirror.test"}"#.to_vec()
            } else {
                b"dataset".to_vec()
            };
            std::fs::create_dir_all(request.destination.parent().unwrap()).unwrap();
            std::fs::write(&request.destination, &body).unwrap();
            events
                .send(FetchEvent::Completed {
                    ticket: request.ticket,
                    path: request.destination,
                })
                .unwrap();
            FetchHandle::detached()
        }
    }

    fn manager(temp: &TempDir, features: FeatureSet) -> MapManager {
        let downloader = StaticDownloader {
            catalog: baltic_catalog().to_json().unwrap(),
        };
        MapManager::with_downloader(
            ManagerConfig::new(temp.path())
                .with_features(features)
                .with_distribution_url("http://dist.test"),
            Arc::new(downloader),
        )
    }

    #[tokio::test]
    async fn test_storage_unavailable_blocks_operations() {
        let temp = TempDir::new().unwrap();
        let mut manager = MapManager::with_downloader(
            ManagerConfig::new(temp.path().join("missing")),
            Arc::new(StaticDownloader { catalog: Vec::new() }),
        );

        assert!(!manager.storage_available());
        assert!(matches!(
            manager.add_dataset(&DatasetId::new("territory/estonia")),
            Err(ManagerError::StorageUnavailable { .. })
        ));
        assert!(!manager.list_unneeded().is_available());
    }

    #[tokio::test]
    async fn test_refresh_chain_fetches_url_then_catalog() {
        let temp = TempDir::new().unwrap();
        let mut manager = manager(&temp, FeatureSet::default());
        let mut events = manager.subscribe();

        assert!(manager.refresh_catalog().unwrap());
        manager.run_until_idle().await;

        assert_eq!(manager.base_url(), "http://mirror.test");
        assert_eq!(manager.catalog().unwrap().len(), 6);
        assert!(temp.path().join(FNAME_CATALOG).exists());
        assert!(!manager.downloading());

        let mut downloading = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ManagerEvent::DownloadingChanged(value) = event {
                downloading.push(value);
            }
        }
        assert_eq!(downloading, vec![true, false]);
    }

    #[tokio::test]
    async fn test_check_for_updates_preconditions() {
        let temp = TempDir::new().unwrap();
        let mut manager = manager(&temp, FeatureSet::default());

        match manager.check_for_updates() {
            Err(ManagerError::Precondition(message)) => assert!(message.contains("no datasets")),
            other => panic!("unexpected {:?}", other),
        }

        let mut unconfigured = MapManager::with_downloader(
            ManagerConfig::default(),
            Arc::new(StaticDownloader { catalog: Vec::new() }),
        );
        match unconfigured.check_for_updates() {
            Err(ManagerError::Precondition(message)) => assert!(message.contains("storage")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_add_unknown_dataset_rejected_with_catalog() {
        let temp = TempDir::new().unwrap();
        let mut manager = manager(&temp, FeatureSet::default());
        manager.refresh_catalog().unwrap();
        manager.run_until_idle().await;

        assert!(matches!(
            manager.add_dataset(&DatasetId::new("territory/atlantis")),
            Err(ManagerError::UnknownDataset(_))
        ));
        assert!(manager.add_dataset(&DatasetId::new("territory/estonia")).unwrap());
        assert!(!manager.add_dataset(&DatasetId::new("territory/estonia")).unwrap());
        assert!(manager.missing());
        assert!(manager.missing_info().starts_with("Estonia / "));
    }

    #[tokio::test]
    async fn test_get_missing_installs_closure() {
        let temp = TempDir::new().unwrap();
        let mut manager = manager(&temp, FeatureSet::default());
        manager.refresh_catalog().unwrap();
        manager.run_until_idle().await;
        let estonia = DatasetId::new("territory/estonia");
        manager.add_dataset(&estonia).unwrap();

        assert!(manager.get_missing().unwrap());
        assert!(matches!(manager.get_missing(), Err(ManagerError::AlreadyDownloading)));
        manager.run_until_idle().await;

        assert!(!manager.missing());
        assert!(manager.is_available(&estonia));
        assert!(manager.is_compatible(&estonia));
        let path = manager.full_path("territory/estonia.dat");
        assert_eq!(
            manager.is_registered(&path).map(|entry| entry.dataset_id),
            Some(estonia.clone())
        );
        assert!(!manager.get_missing().unwrap());

        let details: Value = serde_json::from_str(&manager.dataset_details(&estonia).unwrap()).unwrap();
        assert_eq!(details["status"], "present-compatible");
        assert_eq!(details["requested"], true);
        assert_eq!(details["dependencies"].as_array().unwrap().len(), 3);
        assert_eq!(details["closure_size"], 100 + 1000 + 10 + 20);
    }

    #[tokio::test]
    async fn test_list_json_shapes() {
        let temp = TempDir::new().unwrap();
        let mut manager = manager(&temp, FeatureSet { address_search: false });
        assert_eq!(manager.list_provided(), "[]");

        manager.refresh_catalog().unwrap();
        manager.run_until_idle().await;
        manager.add_dataset(&DatasetId::new("territory/latvia")).unwrap();

        let provided: Value = serde_json::from_str(&manager.list_provided()).unwrap();
        assert_eq!(provided[0]["id"], "territory/estonia");
        assert_eq!(provided[1]["name"], "Latvia");

        let requested: Value = serde_json::from_str(&manager.list_requested()).unwrap();
        assert_eq!(requested[0]["status"], "absent");

        assert_eq!(manager.list_available(), "[]");
    }
}
