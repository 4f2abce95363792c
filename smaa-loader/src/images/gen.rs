//! Lookup texture generation on a worker thread
//!
//! One call, one worker:
//! 1. Spawn a fresh compute unit and send it the trigger
//! 2. Take the first response only
//! 3. Release the worker, whatever the outcome
//! 4. Encode both buffers and optionally persist them

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use super::store::{write_cached_pair, CachePolicy, GeneratedImagePair};
use super::ImageDataError;
use crate::worker::{RawImagePair, WorkerError, WorkerEvent, WorkerHandle, WorkerRequest, WorkerSpawner};

/// Errors that can occur while generating the lookup textures
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("failed to spawn worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error("worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("worker exited without a response")]
    Disconnected,

    #[error("failed to encode {image} texture: {source}")]
    Encode {
        image: &'static str,
        #[source]
        source: ImageDataError,
    },
}

/// Produces encoded lookup textures by offloading to a worker
#[derive(Clone)]
pub struct GenerationChannel {
    spawner: Arc<dyn WorkerSpawner>,
    cache: CachePolicy,
}

impl std::fmt::Debug for GenerationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GenerationChannel")
            .field("cache", &self.cache)
            .finish()
    }
}

impl GenerationChannel {
    pub fn new(spawner: Arc<dyn WorkerSpawner>, cache: CachePolicy) -> Self {
        Self { spawner, cache }
    }

    /// Generate both textures, persisting them when `use_cache` is set and
    /// the cache policy allows writes
    pub async fn generate(&self, use_cache: bool) -> Result<GeneratedImagePair, GenerationError> {
        let mut worker = self.spawner.spawn().map_err(GenerationError::Spawn)?;
        let worker_id = worker.id();

        // Released here on success and error alike; Drop covers early returns
        // and a cancelled future.
        let response = Self::exchange(&mut worker).await;
        worker.terminate();
        let raw = response?;

        debug!(worker = %worker_id, "encoding generated textures");
        let pair = Self::encode(&raw)?;

        if use_cache {
            if let Some(store) = self.cache.writer() {
                write_cached_pair(store.as_ref(), &pair).await;
            }
        }

        info!(worker = %worker_id, "generated SMAA lookup textures");
        Ok(pair)
    }

    /// Send the trigger and consume exactly one response
    async fn exchange(worker: &mut WorkerHandle) -> Result<RawImagePair, GenerationError> {
        // A worker that died while booting has already queued its error event
        if let Err(e) = worker.post(WorkerRequest::Generate) {
            debug!(worker = %worker.id(), "trigger not delivered: {}", e);
        }

        match worker.next_event().await {
            Some(WorkerEvent::Message(raw)) => Ok(raw),
            Some(WorkerEvent::Error(e)) => Err(GenerationError::Worker(e)),
            None => Err(GenerationError::Disconnected),
        }
    }

    fn encode(raw: &RawImagePair) -> Result<GeneratedImagePair, GenerationError> {
        let search = raw
            .search
            .to_data_url()
            .map_err(|source| GenerationError::Encode {
                image: "search",
                source,
            })?;
        let area = raw
            .area
            .to_data_url()
            .map_err(|source| GenerationError::Encode {
                image: "area",
                source,
            })?;

        Ok(GeneratedImagePair { search, area })
    }
}
