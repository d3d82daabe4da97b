//! randimg - an installable random-image page with offline support.
//!
//! The page controller fetches one payload from a public API, renders it,
//! and falls back to the last successful payload when offline. The offline
//! cache worker answers same-origin requests stale-while-revalidate from a
//! versioned cache generation.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use randimg::{
//!     FileKeyValueStore, HostSignal, PageConfig, PageSession, ReqwestFetcher,
//!     ServiceWorkerContainer, SnapshotStore, TerminalRegion,
//! };
//!
//! # async fn example() -> randimg::Result<()> {
//! let config = PageConfig::default();
//! let snapshots = SnapshotStore::new(
//!     Arc::new(FileKeyValueStore::new("/tmp/randimg")),
//!     config.snapshot_key.clone(),
//! );
//! let registrar = Arc::new(ServiceWorkerContainer::new(&config.origin)?);
//! let session = PageSession::start(
//!     config,
//!     Arc::new(ReqwestFetcher::new()?),
//!     snapshots,
//!     Arc::new(TerminalRegion),
//!     registrar,
//! );
//!
//! session.dispatch(HostSignal::ContentLoaded).await;
//! session.dispatch(HostSignal::Load).await;
//! # Ok(())
//! # }
//! ```

#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod config;
pub mod error;
pub mod page;
pub mod render;
#[cfg(feature = "server")]
pub mod server;
pub mod snapshot;
pub mod worker;

// Re-export main types for convenience
pub use config::{AppConfig, PageConfig, PathConfig, ServerConfig, WorkerConfig};
pub use error::{Error, Result};
pub use page::{
    Fetcher, HostSignal, InstallOutcome, InstallPrompt, InstallState, PageSession, ReqwestFetcher,
};
pub use render::{ContentRegion, MemoryRegion, TerminalRegion, View};
pub use snapshot::{FileKeyValueStore, KeyValueStore, MemoryKeyValueStore, Snapshot, SnapshotStore};
pub use worker::{
    CacheStorage, FetchDisposition, FileCacheStorage, MemoryCacheStorage, Network,
    OfflineCacheWorker, Request, Response, ReqwestNetwork, ServiceWorkerContainer,
    WorkerRegistrar, WorkerState,
};
