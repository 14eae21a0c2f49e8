//! URL Lookup - URL safety lookup service
//!
//! Answers "is this URL safe?" over HTTP from a bounded, sharded in-memory
//! cache. Cold shards are spilled to per-shard JSON files and reloaded on
//! the next lookup that needs them.
//!
//! # Architecture
//!
//! ```text
//! Config Dir ──▶ Config Watcher ──┐
//!                                 ▼
//! HTTP GET ────▶ Lookup Service ─▶ Cache Engine ◀──▶ Cache Dir (bucket<N>.json)
//! ```
//!
//! # Modules
//!
//! - [`cache`] - Sharded cache engine, eviction and shard persistence
//! - [`convert`] - Flat URL list to record document conversion
//! - [`error`] - Error types
//! - [`server`] - HTTP lookup service with health and metrics endpoints
//! - [`watcher`] - Hot reload of written configuration files

pub mod cache;
pub mod convert;
pub mod error;
pub mod server;
pub mod watcher;

// Re-export commonly used types
pub use cache::{CacheEngine, CacheStats, EngineConfig, LoadReport, UrlInfo, UrlKey};
pub use error::{Error, Result};
pub use server::{LookupService, ServerConfig};
pub use watcher::{ConfigWatcher, WatcherConfig};
