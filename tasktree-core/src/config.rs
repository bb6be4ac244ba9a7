//! Cache configuration
//!
//! Loaded once at process start and injected into the cache client. Values
//! come from environment variables with defaults suitable for local
//! development.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Retention policy for value records.
///
/// DLM keys are never given an expiry under any policy: an expired DLM key
/// would resolve to 0 and could resurrect a record cached at snapshot 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EvictionPolicy {
    /// Nothing is expired by the application. Growth is bounded by the
    /// store's own eviction (e.g. Redis `maxmemory-policy allkeys-lru`).
    #[default]
    StoreManaged,
    /// Every value record is written with this time-to-live.
    ValueTtl(Duration),
}

/// Configuration for the request cache and its backing store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// Global switch. When false every read misses and nothing is written.
    pub enabled: bool,
    /// Namespace token folded into every storage key. Changing it orphans
    /// every existing record at once.
    pub master_epoch: String,
    /// Redis URL holding both the DLM and value keyspaces.
    pub store_url: String,
    /// Maximum pooled connections.
    pub pool_size: usize,
    /// Upper bound for a single store round trip.
    pub store_timeout: Duration,
    /// Consecutive non-transient store errors tolerated before the request's
    /// breaker trips. Transient errors trip it immediately.
    pub max_store_errors: u32,
    /// Value record retention.
    pub eviction: EvictionPolicy,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            master_epoch: "0".to_string(),
            store_url: "redis://127.0.0.1:6379/0".to_string(),
            pool_size: 300,
            store_timeout: Duration::from_millis(500),
            max_store_errors: 3,
            eviction: EvictionPolicy::StoreManaged,
        }
    }
}

impl CacheConfig {
    /// Create a new cache config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create CacheConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TASKTREE_CACHE_ENABLED`: "true" or "false" (default: true)
    /// - `TASKTREE_CACHE_MASTER_EPOCH`: namespace token (default: "0")
    /// - `TASKTREE_CACHE_REDIS_URL`: store URL (default: redis://127.0.0.1:6379/0)
    /// - `TASKTREE_CACHE_POOL_SIZE`: max connections (default: 300)
    /// - `TASKTREE_CACHE_STORE_TIMEOUT_MS`: per call timeout (default: 500)
    /// - `TASKTREE_CACHE_MAX_STORE_ERRORS`: breaker threshold (default: 3)
    /// - `TASKTREE_CACHE_VALUE_TTL_SECS`: value TTL, unset = store managed
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let enabled = std::env::var("TASKTREE_CACHE_ENABLED")
            .ok()
            .map(|s| s.to_lowercase() != "false")
            .unwrap_or(defaults.enabled);

        let master_epoch = std::env::var("TASKTREE_CACHE_MASTER_EPOCH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or(defaults.master_epoch);

        let store_url = std::env::var("TASKTREE_CACHE_REDIS_URL").unwrap_or(defaults.store_url);

        let pool_size = std::env::var("TASKTREE_CACHE_POOL_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.pool_size);

        let store_timeout = std::env::var("TASKTREE_CACHE_STORE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_millis)
            .unwrap_or(defaults.store_timeout);

        let max_store_errors = std::env::var("TASKTREE_CACHE_MAX_STORE_ERRORS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_store_errors);

        let eviction = std::env::var("TASKTREE_CACHE_VALUE_TTL_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .filter(|secs| *secs > 0)
            .map(|secs| EvictionPolicy::ValueTtl(Duration::from_secs(secs)))
            .unwrap_or(defaults.eviction);

        Self {
            enabled,
            master_epoch,
            store_url,
            pool_size,
            store_timeout,
            max_store_errors,
            eviction,
        }
    }

    /// Reject settings the cache cannot operate with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.master_epoch.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "master_epoch".to_string(),
            });
        }
        if self.store_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "store_timeout".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.pool_size == 0 {
            return Err(ConfigError::InvalidValue {
                field: "pool_size".to_string(),
                value: "0".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if let EvictionPolicy::ValueTtl(ttl) = self.eviction {
            if ttl.as_secs() == 0 {
                return Err(ConfigError::InvalidValue {
                    field: "eviction".to_string(),
                    value: format!("{:?}", ttl),
                    reason: "value TTL must be at least one second".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Enable or disable caching.
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Set the master epoch.
    pub fn with_master_epoch(mut self, epoch: impl Into<String>) -> Self {
        self.master_epoch = epoch.into();
        self
    }

    /// Set the store URL.
    pub fn with_store_url(mut self, url: impl Into<String>) -> Self {
        self.store_url = url.into();
        self
    }

    /// Set the per call store timeout.
    pub fn with_store_timeout(mut self, timeout: Duration) -> Self {
        self.store_timeout = timeout;
        self
    }

    /// Set the breaker threshold for non-transient errors.
    pub fn with_max_store_errors(mut self, max: u32) -> Self {
        self.max_store_errors = max;
        self
    }

    /// Set the value eviction policy.
    pub fn with_eviction(mut self, eviction: EvictionPolicy) -> Self {
        self.eviction = eviction;
        self
    }
}
