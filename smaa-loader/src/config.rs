//! Loader configuration
//!
//! Layered with figment: built-in defaults, then an optional TOML file, then
//! `SMAA_`-prefixed environment variables (`SMAA_CACHE__MODE=none`).

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::db::Database;
use crate::images::{CachePolicy, CacheStore, MemoryStore, SqliteStore};
use crate::worker::SandboxLimits;

/// How generated textures interact with the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheMode {
    None,
    ReadThrough,
    #[default]
    ReadWrite,
}

/// Where cached textures live
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CacheBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub mode: CacheMode,
    pub backend: CacheBackend,
    /// SQLite file; in-memory database when unset
    pub db_path: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache: CacheConfig,
    pub worker: SandboxLimits,
}

impl Config {
    /// Load defaults, then `path` if given, then the environment
    pub fn load(path: Option<&Path>) -> Result<Self, figment::Error> {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed("SMAA_").split("__")).extract()
    }

    /// Open the configured store and wrap it in the configured policy
    pub async fn cache_policy(&self) -> Result<CachePolicy> {
        if self.cache.mode == CacheMode::None {
            return Ok(CachePolicy::None);
        }

        let store: Arc<dyn CacheStore> = match self.cache.backend {
            CacheBackend::Memory => MemoryStore::shared(),
            CacheBackend::Sqlite => {
                let db = Database::new(self.cache.db_path.as_deref()).await?;
                info!(
                    "Texture cache at {}",
                    self.cache.db_path.as_deref().unwrap_or(":memory:")
                );
                Arc::new(SqliteStore::new(db.pool().clone()))
            }
        };

        Ok(match self.cache.mode {
            CacheMode::ReadThrough => CachePolicy::ReadThrough(store),
            _ => CachePolicy::ReadWrite(store),
        })
    }
}
