//! smaa-loader - cached SMAA lookup texture loader
//!
//! Generates the SMAA search and area textures on an isolated worker thread,
//! caches the encoded result, and reports progress to caller-supplied trackers.

pub mod config;
pub mod db;
pub mod images;
pub mod loader;
pub mod progress;
pub mod worker;

use std::sync::Arc;

use anyhow::Result;
use tracing::info;

pub use config::{CacheBackend, CacheConfig, CacheMode, Config};
pub use images::{CachePolicy, GeneratedImagePair, ImageResource};
pub use loader::{CachedDualImageLoader, LoadError, LoadedImagePair};
pub use progress::{Completion, LoadingManager, ProgressTracker};

/// Build a loader running the built-in generator program, as configured
pub async fn loader_from_config(config: &Config) -> Result<CachedDualImageLoader> {
    let cache = config.cache_policy().await?;
    info!("Texture cache policy: {:?}", cache);

    let spawner = Arc::new(worker::LuaWorkerSpawner::new(config.worker.clone()));
    Ok(CachedDualImageLoader::new(cache, spawner))
}
