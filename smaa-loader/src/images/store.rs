//! Persistent key/value cache for encoded lookup textures
//!
//! The cache is advisory: a missing store, a missing key or a failing backend
//! all degrade to a cache miss. A pair is only served when both keys exist.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlx::SqlitePool;
use thiserror::Error;
use tracing::{debug, warn};

/// Cache key of the encoded search texture
pub const SEARCH_KEY: &str = "smaa-search";
/// Cache key of the encoded area texture
pub const AREA_KEY: &str = "smaa-area";

/// The two encoded textures, always produced together
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedImagePair {
    pub search: String,
    pub area: String,
}

/// Failure talking to a cache backend
#[derive(Debug, Error)]
pub enum CacheAccessError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("cache unavailable: {message}")]
    Unavailable { message: String },
}

/// Key to string storage backing the texture cache
#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheAccessError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheAccessError>;

    async fn remove(&self, key: &str) -> Result<(), CacheAccessError>;
}

/// Process-local store
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap in Arc for sharing
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheAccessError> {
        Ok(self.entries.read().get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheAccessError> {
        self.entries
            .write()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheAccessError> {
        self.entries.write().remove(key);
        Ok(())
    }
}

/// SQLite-backed store using the `asset_cache` table
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Create a store on a pool whose schema has been migrated
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CacheStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheAccessError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM asset_cache WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheAccessError> {
        let updated_at = chrono::Utc::now().to_rfc3339();

        sqlx::query(
            "INSERT INTO asset_cache (key, value, updated_at) VALUES (?, ?, ?) ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(&updated_at)
        .execute(&self.pool)
        .await?;

        debug!("Stored cache entry {} ({} bytes)", key, value.len());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), CacheAccessError> {
        sqlx::query("DELETE FROM asset_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// How the loader may use a cache store
#[derive(Clone, Default)]
pub enum CachePolicy {
    /// Never read or write
    #[default]
    None,
    /// Serve hits, never persist fresh results
    ReadThrough(Arc<dyn CacheStore>),
    /// Serve hits and persist fresh results
    ReadWrite(Arc<dyn CacheStore>),
}

impl fmt::Debug for CachePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CachePolicy::None => f.write_str("None"),
            CachePolicy::ReadThrough(_) => f.write_str("ReadThrough"),
            CachePolicy::ReadWrite(_) => f.write_str("ReadWrite"),
        }
    }
}

impl CachePolicy {
    /// Store to consult before generating
    pub fn reader(&self) -> Option<&Arc<dyn CacheStore>> {
        match self {
            CachePolicy::None => None,
            CachePolicy::ReadThrough(store) | CachePolicy::ReadWrite(store) => Some(store),
        }
    }

    /// Store that receives freshly generated pairs
    pub fn writer(&self) -> Option<&Arc<dyn CacheStore>> {
        match self {
            CachePolicy::ReadWrite(store) => Some(store),
            _ => None,
        }
    }
}

/// Read both entries; a partial hit is a miss
pub async fn read_cached_pair(
    store: &dyn CacheStore,
) -> Result<Option<GeneratedImagePair>, CacheAccessError> {
    let search = store.get(SEARCH_KEY).await?;
    let area = store.get(AREA_KEY).await?;

    match (search, area) {
        (Some(search), Some(area)) => Ok(Some(GeneratedImagePair { search, area })),
        (None, None) => Ok(None),
        _ => {
            debug!("partial cache entry ignored");
            Ok(None)
        }
    }
}

/// Persist both entries. Failures are logged and otherwise ignored.
pub async fn write_cached_pair(store: &dyn CacheStore, pair: &GeneratedImagePair) {
    for (key, value) in [(SEARCH_KEY, &pair.search), (AREA_KEY, &pair.area)] {
        if let Err(e) = store.set(key, value).await {
            warn!("Failed to cache {}: {}", key, e);
        }
    }
}
