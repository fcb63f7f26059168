//! MapManager - offline map data management
//!
//! This library keeps a directory of offline map data (territory maps,
//! geocoder data and address-parser language models) in line with what the
//! user asked for: it resolves dataset dependencies, downloads what is
//! missing, records which file belongs to which dataset, detects updates
//! and removes data nothing needs any more.
//!
//! # High-Level API
//!
//! [`MapManager`] is the single object an application talks to:
//!
//! ```ignore
//! use mapmanager::{DatasetId, ManagerConfig, MapManager};
//!
//! let mut manager = MapManager::new(ManagerConfig::new("/home/user/Maps"));
//! let mut events = manager.subscribe();
//!
//! manager.refresh_catalog()?;
//! manager.run_until_idle().await;
//!
//! manager.add_dataset(&DatasetId::new("territory/estonia"))?;
//! manager.get_missing()?;
//! manager.run_until_idle().await;
//! ```

pub mod catalog;
pub mod config;
pub mod download;
pub mod error;
pub mod events;
pub mod features;
pub mod gc;
pub mod logging;
pub mod manager;
pub mod registry;
pub mod resolver;
pub mod storage;
pub mod updates;

pub use catalog::{Catalog, DatasetId, DatasetKind, Descriptor, RequestedSet};
pub use config::{ConfigFile, ManagerConfig};
pub use error::{ErrorKind, ManagerError, ManagerResult};
pub use events::{ActiveData, ManagerEvent};
pub use features::FeatureSet;
pub use manager::MapManager;
pub use resolver::Availability;

/// Version of the MapManager library and CLI.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
