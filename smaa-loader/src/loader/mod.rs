//! Cached loader for the SMAA search and area textures
//!
//! Serves both textures from the persistent cache when possible, otherwise
//! generates them on a worker thread. Progress is reported to two trackers:
//! the caller's long-lived one and a tracker scoped to each `load` call. Only
//! the call-scoped tracker decides when `load` returns.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::images::{
    read_cached_pair, CachePolicy, GeneratedImagePair, GenerationChannel, GenerationError,
    ImageResource,
};
use crate::progress::{LoadingManager, ProgressTracker};
use crate::worker::WorkerSpawner;

/// Tracker unit name of the search texture
pub const SEARCH: &str = "search";
/// Tracker unit name of the area texture
pub const AREA: &str = "area";

/// Errors surfaced by [`CachedDualImageLoader::load`]
#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("failed to decode textures: {}", failed.join(", "))]
    Decode { failed: Vec<String> },
}

/// The two image resources handed to the caller
#[derive(Debug, Clone)]
pub struct LoadedImagePair {
    pub search: ImageResource,
    pub area: ImageResource,
}

impl LoadedImagePair {
    fn new() -> Self {
        Self {
            search: ImageResource::new(SEARCH),
            area: ImageResource::new(AREA),
        }
    }
}

/// Loads the SMAA lookup textures, from cache or from a worker
pub struct CachedDualImageLoader {
    cache_disabled: bool,
    external: Arc<dyn ProgressTracker>,
    cache: CachePolicy,
    generator: GenerationChannel,
    internal_observer: Option<Arc<dyn ProgressTracker>>,
}

impl std::fmt::Debug for CachedDualImageLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedDualImageLoader")
            .field("cache_disabled", &self.cache_disabled)
            .field("cache", &self.cache)
            .finish()
    }
}

impl CachedDualImageLoader {
    /// Create a loader reporting to a fresh tracker of its own
    pub fn new(cache: CachePolicy, spawner: Arc<dyn WorkerSpawner>) -> Self {
        Self {
            cache_disabled: false,
            external: LoadingManager::shared(),
            generator: GenerationChannel::new(spawner, cache.clone()),
            cache,
            internal_observer: None,
        }
    }

    /// Report progress to a caller-owned tracker
    pub fn with_tracker(mut self, tracker: Arc<dyn ProgressTracker>) -> Self {
        self.external = tracker;
        self
    }

    pub fn tracker(&self) -> &Arc<dyn ProgressTracker> {
        &self.external
    }

    pub fn cache_disabled(&self) -> bool {
        self.cache_disabled
    }

    /// Bypass the cache for reads and writes
    pub fn set_cache_disabled(&mut self, disabled: bool) {
        self.cache_disabled = disabled;
    }

    /// Mirror the per-call tracker's transitions to `observer` (diagnostics)
    pub fn set_internal_observer(&mut self, observer: Option<Arc<dyn ProgressTracker>>) {
        self.internal_observer = observer;
    }

    /// Load both textures
    pub async fn load(&self) -> Result<LoadedImagePair, LoadError> {
        self.load_with(|_| {}, |_| {}).await
    }

    /// Load both textures, invoking `on_load` or `on_error` before returning
    pub async fn load_with<L, E>(&self, on_load: L, on_error: E) -> Result<LoadedImagePair, LoadError>
    where
        L: FnOnce(&LoadedImagePair),
        E: FnOnce(&LoadError),
    {
        let internal = Arc::new(match &self.internal_observer {
            Some(observer) => LoadingManager::new().with_observer(observer.clone()),
            None => LoadingManager::new(),
        });

        for name in [SEARCH, AREA] {
            self.external.start(name);
        }
        for name in [SEARCH, AREA] {
            internal.start(name);
        }

        let result = LoadedImagePair::new();

        let pair = match self.acquire().await {
            Ok(pair) => pair,
            Err(e) => {
                // The call-scoped tracker is dropped with its starts unmatched
                warn!("SMAA texture load failed: {}", e);
                for name in [SEARCH, AREA] {
                    self.external.error(name);
                }
                on_error(&e);
                return Err(e);
            }
        };

        for (image, name) in [(&result.search, SEARCH), (&result.area, AREA)] {
            let external = self.external.clone();
            let tracker = internal.clone();
            image.once_load(move |_| {
                external.end(name);
                tracker.end(name);
            });

            let external = self.external.clone();
            let tracker = internal.clone();
            image.once_error(move |_, e| {
                warn!("SMAA {} texture failed to decode: {}", name, e);
                external.error(name);
                tracker.error(name);
            });
        }

        result.search.set_source(pair.search);
        result.area.set_source(pair.area);

        let completion = internal.wait().await;
        if completion.is_success() {
            debug!("SMAA textures ready");
            on_load(&result);
            Ok(result)
        } else {
            let e = LoadError::Decode {
                failed: completion.failed,
            };
            on_error(&e);
            Err(e)
        }
    }

    /// Cached pair if both entries exist, otherwise a freshly generated one
    async fn acquire(&self) -> Result<GeneratedImagePair, LoadError> {
        if !self.cache_disabled {
            if let Some(store) = self.cache.reader() {
                match read_cached_pair(store.as_ref()).await {
                    Ok(Some(pair)) => {
                        info!("SMAA textures served from cache");
                        return Ok(pair);
                    }
                    Ok(None) => debug!("SMAA texture cache miss"),
                    Err(e) => warn!("SMAA texture cache unreadable, regenerating: {}", e),
                }
            }
        }

        Ok(self.generator.generate(!self.cache_disabled).await?)
    }
}
