//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tempfile::TempDir;

use mapmanager::download::{Downloader, FetchEvent, FetchEventSender, FetchHandle, FetchRequest};
use mapmanager::{FeatureSet, ManagerConfig, ManagerEvent, MapManager};

/// Base URL every test manager is configured with.
pub const DIST_URL: &str = "http://dist.test";

/// How the scripted downloader answers one URL.
#[derive(Debug, Clone)]
pub enum Reply {
    Body(Vec<u8>),
    Fail(u16),
    Timeout,
}

/// In-memory downloader that answers from a URL table.
///
/// Each fetch completes synchronously: the body is written to the staging
/// path, then one progress event and the terminal event are queued. Unknown
/// URLs answer 404.
#[derive(Clone, Default)]
pub struct ScriptedDownloader {
    replies: Arc<Mutex<HashMap<String, Reply>>>,
    fetched: Arc<Mutex<Vec<String>>>,
}

impl ScriptedDownloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(&self, url: impl Into<String>, reply: Reply) {
        self.replies.lock().unwrap().insert(url.into(), reply);
    }

    pub fn serve(&self, url: impl Into<String>, body: impl Into<Vec<u8>>) {
        self.reply(url, Reply::Body(body.into()));
    }

    /// URLs requested so far, in order.
    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().unwrap().clone()
    }
}

impl Downloader for ScriptedDownloader {
    fn fetch(&self, request: FetchRequest, events: FetchEventSender) -> FetchHandle {
        self.fetched.lock().unwrap().push(request.url.clone());
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(&request.url)
            .cloned()
            .unwrap_or(Reply::Fail(404));

        let ticket = request.ticket;
        let event = match reply {
            Reply::Body(body) => {
                fs::create_dir_all(request.destination.parent().unwrap()).unwrap();
                fs::write(&request.destination, &body).unwrap();
                let len = body.len() as u64;
                events
                    .send(FetchEvent::Progress {
                        ticket,
                        downloaded: len,
                        written: len,
                    })
                    .unwrap();
                FetchEvent::Completed {
                    ticket,
                    path: request.destination,
                }
            }
            Reply::Fail(code) => FetchEvent::Failed {
                ticket,
                code: Some(code),
                message: "scripted failure".to_string(),
            },
            Reply::Timeout => FetchEvent::TimedOut { ticket },
        };
        events.send(event).unwrap();
        FetchHandle::detached()
    }
}

/// One catalog row: id, kind, display name, size, version.
pub type Row<'a> = (&'a str, &'a str, &'a str, u64, &'a str);

/// Build a `countries_provided.json` document. Each dataset installs to
/// `<id>.osm`.
pub fn catalog_json(rows: &[Row<'_>]) -> Vec<u8> {
    let datasets: Vec<_> = rows
        .iter()
        .map(|(id, kind, name, size, version)| {
            json!({
                "id": id,
                "kind": kind,
                "name": name,
                "size": size,
                "version": version,
                "path": format!("{}.osm", id),
            })
        })
        .collect();
    serde_json::to_vec(&json!({ "format": 1, "datasets": datasets })).unwrap()
}

/// Download URL of a dataset from [`catalog_json`].
pub fn dataset_url(id: &str) -> String {
    format!("{}/{}.osm", DIST_URL, id)
}

/// Catalog URL on the default distribution point.
pub fn catalog_url() -> String {
    format!("{}/countries_provided.json", DIST_URL)
}

/// A storage root with a catalog already in place.
pub fn storage_with_catalog(rows: &[Row<'_>]) -> TempDir {
    let temp = TempDir::new().unwrap();
    fs::write(temp.path().join("countries_provided.json"), catalog_json(rows)).unwrap();
    temp
}

/// Manager over `root` without the address-search feature.
pub fn map_manager(root: &Path, downloader: &ScriptedDownloader) -> MapManager {
    let config = ManagerConfig::new(root)
        .with_features(FeatureSet {
            address_search: false,
        })
        .with_distribution_url(DIST_URL);
    MapManager::with_downloader(config, Arc::new(downloader.clone()))
}

/// Drain every event currently queued on a receiver.
pub fn drain(events: &mut tokio::sync::broadcast::Receiver<ManagerEvent>) -> Vec<ManagerEvent> {
    let mut drained = Vec::new();
    while let Ok(event) = events.try_recv() {
        drained.push(event);
    }
    drained
}
