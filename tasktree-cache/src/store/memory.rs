//! In-memory backend for tests and local development.
//!
//! Mirrors the Redis command semantics (MSET is last-writer-wins on DLM
//! values) and counts every call so tests can assert round trips. Failures
//! and latency can be injected.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tasktree_core::{EvictionPolicy, StoreError, UnixMillis};
use tokio::sync::{Mutex, RwLock};

use super::{CacheStore, CommitBatch};
use crate::dlm::DlmKey;

#[derive(Debug, Default)]
struct Keyspaces {
    dlms: HashMap<DlmKey, UnixMillis>,
    values: HashMap<String, Vec<u8>>,
    value_ttls: HashMap<String, Duration>,
}

#[derive(Debug, Default)]
struct Faults {
    /// Calls left to fail; `None` fails forever once `error` is set.
    remaining: Option<u32>,
    error: Option<StoreError>,
    latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct Counters {
    get_calls: AtomicU64,
    mget_calls: AtomicU64,
    mget_keys: AtomicU64,
    commit_calls: AtomicU64,
}

/// In-memory cache store.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCacheStore {
    data: Arc<RwLock<Keyspaces>>,
    faults: Arc<Mutex<Faults>>,
    counters: Arc<Counters>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Fault injection
    // ------------------------------------------------------------------

    /// Fail the next `count` calls with `error`.
    pub async fn fail_next(&self, count: u32, error: StoreError) {
        let mut faults = self.faults.lock().await;
        faults.remaining = Some(count);
        faults.error = Some(error);
    }

    /// Fail every call with `error` until [`InMemoryCacheStore::heal`].
    pub async fn fail_always(&self, error: StoreError) {
        let mut faults = self.faults.lock().await;
        faults.remaining = None;
        faults.error = Some(error);
    }

    /// Delay every call by `latency`.
    pub async fn set_latency(&self, latency: Duration) {
        self.faults.lock().await.latency = Some(latency);
    }

    /// Clear injected failures and latency.
    pub async fn heal(&self) {
        *self.faults.lock().await = Faults::default();
    }

    async fn before_call(&self) -> Result<(), StoreError> {
        let (latency, failure) = {
            let mut faults = self.faults.lock().await;
            let failure = match (faults.error.clone(), faults.remaining) {
                (Some(error), None) => Some(error),
                (Some(error), Some(n)) if n > 0 => {
                    faults.remaining = Some(n - 1);
                    if n == 1 {
                        faults.error = None;
                    }
                    Some(error)
                }
                _ => None,
            };
            (faults.latency, failure)
        };
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        match failure {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn get_calls(&self) -> u64 {
        self.counters.get_calls.load(Ordering::Relaxed)
    }

    pub fn mget_calls(&self) -> u64 {
        self.counters.mget_calls.load(Ordering::Relaxed)
    }

    /// Total DLM keys requested across every MGET.
    pub fn mget_keys(&self) -> u64 {
        self.counters.mget_keys.load(Ordering::Relaxed)
    }

    pub fn commit_calls(&self) -> u64 {
        self.counters.commit_calls.load(Ordering::Relaxed)
    }

    /// Stored timestamp of a DLM key, `None` if never bumped.
    pub async fn dlm_value(&self, key: &DlmKey) -> Option<UnixMillis> {
        self.data.read().await.dlms.get(key).copied()
    }

    pub async fn value_count(&self) -> usize {
        self.data.read().await.values.len()
    }

    pub async fn value_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.read().await.values.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// TTL a value record was written with, if any.
    pub async fn value_ttl(&self, key: &str) -> Option<Duration> {
        self.data.read().await.value_ttls.get(key).copied()
    }

    // ------------------------------------------------------------------
    // Seeding
    // ------------------------------------------------------------------

    /// Set a DLM timestamp directly, as another process's commit would.
    pub async fn seed_dlm(&self, key: DlmKey, at: UnixMillis) {
        self.data.write().await.dlms.insert(key, at);
    }

    /// Write raw bytes under a storage key.
    pub async fn put_raw(&self, key: impl Into<String>, value: Vec<u8>) {
        self.data.write().await.values.insert(key.into(), value);
    }
}

#[async_trait]
impl CacheStore for InMemoryCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.counters.get_calls.fetch_add(1, Ordering::Relaxed);
        self.before_call().await?;
        Ok(self.data.read().await.values.get(key).cloned())
    }

    async fn mget_dlms(&self, keys: &[DlmKey]) -> Result<Vec<UnixMillis>, StoreError> {
        self.counters.mget_calls.fetch_add(1, Ordering::Relaxed);
        self.counters
            .mget_keys
            .fetch_add(keys.len() as u64, Ordering::Relaxed);
        self.before_call().await?;
        let data = self.data.read().await;
        Ok(keys
            .iter()
            .map(|key| data.dlms.get(key).copied().unwrap_or(0))
            .collect())
    }

    async fn commit(&self, batch: &CommitBatch) -> Result<(), StoreError> {
        self.counters.commit_calls.fetch_add(1, Ordering::Relaxed);
        self.before_call().await?;
        let mut data = self.data.write().await;
        for key in &batch.bumps {
            data.dlms.insert(key.clone(), batch.at);
        }
        for (key, value) in &batch.writes {
            data.values.insert(key.clone(), value.clone());
            match batch.eviction {
                EvictionPolicy::ValueTtl(ttl) => {
                    data.value_ttls.insert(key.clone(), ttl);
                }
                EvictionPolicy::StoreManaged => {
                    data.value_ttls.remove(key);
                }
            }
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
