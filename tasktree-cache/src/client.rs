//! Process-wide cache client.

use std::sync::Arc;

use tasktree_core::{now_unix_millis, CacheConfig, StoreError, UnixMillis};

use crate::context::RequestCache;
use crate::store::{CacheStore, RedisCacheStore};

/// Per-request options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestOptions {
    /// Every lookup misses. Sets and touches still accumulate.
    pub skip_cache: bool,
    /// Request start in unix millis; defaults to now.
    pub start_ms: Option<UnixMillis>,
}

/// Holds the store handle and configuration, built once at process start
/// and cloned into every request.
#[derive(Clone)]
pub struct CacheClient {
    store: Arc<dyn CacheStore>,
    config: Arc<CacheConfig>,
}

impl CacheClient {
    pub fn new(store: Arc<dyn CacheStore>, config: CacheConfig) -> Self {
        Self {
            store,
            config: Arc::new(config),
        }
    }

    /// Build a Redis-backed client.
    pub fn from_config(config: CacheConfig) -> Result<Self, StoreError> {
        let store = RedisCacheStore::from_config(&config)?;
        tracing::info!(
            enabled = config.enabled,
            master_epoch = %config.master_epoch,
            pool_size = config.pool_size,
            eviction = ?config.eviction,
            "Cache client initialized"
        );
        Ok(Self::new(Arc::new(store), config))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    /// Open a request cache stamped with the current time.
    pub fn begin_request(&self) -> RequestCache {
        self.begin_request_with(RequestOptions::default())
    }

    pub fn begin_request_with(&self, options: RequestOptions) -> RequestCache {
        RequestCache::new(
            Arc::clone(&self.store),
            Arc::clone(&self.config),
            options.start_ms.unwrap_or_else(now_unix_millis),
            options.skip_cache,
        )
    }
}

impl std::fmt::Debug for CacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheClient")
            .field("backend", &self.store.backend_name())
            .field("config", &self.config)
            .finish()
    }
}
