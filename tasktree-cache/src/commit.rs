//! Commit phase.
//!
//! Drains a request cache exactly once: every pending bump is set to the
//! request start timestamp and every staged value is written, in one batch.
//!
//! Stamping bumps with the request start rather than "now" is what keeps
//! the protocol safe. Any value computed from data read after this mutation
//! began was resolved at a snapshot older than the bump, so once the bump
//! lands no later lookup can reach it. Values cached before the mutation
//! began stay valid until the commit lands.
//!
//! Commit failures are logged and reported, never raised: the mutation
//! already succeeded in the shard.

use std::sync::atomic::Ordering;

use serde::Serialize;
use tasktree_core::{CacheError, StoreError};

use crate::context::RequestCache;
use crate::stats::{CacheStats, QueryInfo};
use crate::store::CommitBatch;

/// Outcome of [`RequestCache::commit`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitReport {
    /// DLM keys bumped.
    pub bumped: usize,
    /// Value records written.
    pub written: usize,
    /// Whether a batch was sent and the store accepted it.
    pub applied: bool,
    #[serde(skip)]
    pub error: Option<StoreError>,
    pub stats: CacheStats,
    pub queries: Vec<QueryInfo>,
}

impl CommitReport {
    /// Nothing was pending.
    pub fn is_noop(&self) -> bool {
        self.bumped == 0 && self.written == 0
    }

    /// Total time spent in store calls during the request.
    pub fn store_time_ms(&self) -> u64 {
        self.queries.iter().map(|q| q.duration_ms).sum()
    }
}

impl RequestCache {
    /// Flush pending bumps and staged writes.
    ///
    /// Call exactly once, after the handler body and before the response is
    /// sent. A second call returns [`CacheError::AlreadyCommitted`]. The
    /// batch is attempted even when the breaker tripped: a lost bump would
    /// let readers keep serving data this request invalidated.
    pub async fn commit(&self) -> Result<CommitReport, CacheError> {
        if self.inner.committed.swap(true, Ordering::AcqRel) {
            return Err(CacheError::AlreadyCommitted);
        }

        let batch = {
            let mut state = self.inner.state.lock().await;
            CommitBatch {
                bumps: std::mem::take(&mut state.pending_bumps),
                at: self.inner.request_start_ms,
                writes: std::mem::take(&mut state.pending_writes),
                eviction: self.inner.config.eviction,
            }
        };

        let bumped = batch.bumps.len();
        let written = batch.writes.len();
        let mut applied = false;
        let mut error = None;

        if !batch.is_empty() {
            let store = &self.inner.store;
            match self.call("MSET", batch.key_count(), store.commit(&batch)).await {
                Ok(()) => {
                    applied = true;
                    tracing::debug!(
                        bumped,
                        written,
                        at = batch.at,
                        "Cache commit applied"
                    );
                }
                Err(e) => {
                    tracing::error!(
                        bumped,
                        written,
                        at = batch.at,
                        error = %e,
                        "Cache commit failed, invalidations not recorded"
                    );
                    error = Some(e);
                }
            }
        }

        let state = self.inner.state.lock().await;
        Ok(CommitReport {
            bumped,
            written,
            applied,
            error,
            stats: state.stats.clone(),
            queries: state.query_log.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CacheClient, RequestOptions};
    use crate::dlm::{DlmKey, DlmTag};
    use crate::key::{DependencyKeys, ReadKey, WriteKey};
    use crate::store::InMemoryCacheStore;
    use std::sync::Arc;
    use std::time::Duration;
    use tasktree_core::{CacheConfig, EvictionPolicy};
    use uuid::Uuid;

    fn setup(config: CacheConfig) -> (InMemoryCacheStore, CacheClient) {
        let store = InMemoryCacheStore::new();
        let client = CacheClient::new(Arc::new(store.clone()), config);
        (store, client)
    }

    fn at(start_ms: i64) -> RequestOptions {
        RequestOptions {
            skip_cache: false,
            start_ms: Some(start_ms),
        }
    }

    #[tokio::test]
    async fn test_empty_commit_is_noop() {
        let (store, client) = setup(CacheConfig::default());
        let report = client.begin_request().commit().await.unwrap();
        assert!(report.is_noop());
        assert!(!report.applied);
        assert_eq!(store.commit_calls(), 0);
    }

    #[tokio::test]
    async fn test_second_commit_rejected() {
        let (_, client) = setup(CacheConfig::default());
        let cache = client.begin_request();
        cache.commit().await.unwrap();
        assert_eq!(cache.commit().await, Err(CacheError::AlreadyCommitted));
        assert!(cache.is_committed());
    }

    #[tokio::test]
    async fn test_bumps_use_request_start_not_now() {
        let (store, client) = setup(CacheConfig::default());
        let account = Uuid::now_v7();
        let cache = client.begin_request_with(at(1_000));

        cache.touch(&WriteKey::new().account(account)).await;
        let report = cache.commit().await.unwrap();

        assert!(report.applied);
        assert_eq!(report.bumped, 1);
        assert_eq!(
            store.dlm_value(&DlmKey::new(DlmTag::Account, &[account])).await,
            Some(1_000)
        );
    }

    #[tokio::test]
    async fn test_bumps_and_writes_share_one_round_trip() {
        let (store, client) = setup(CacheConfig::default());
        let account = Uuid::now_v7();
        let cache = client.begin_request();

        let key = ReadKey::new("account.get", (0, account)).account(account);
        cache.set(&"acme", &key).await;
        cache.touch(&WriteKey::new().account_projects_set(account)).await;
        let report = cache.commit().await.unwrap();

        assert_eq!(store.commit_calls(), 1);
        assert_eq!((report.bumped, report.written), (1, 1));
        let mset: Vec<_> = report.queries.iter().filter(|q| q.command == "MSET").collect();
        assert_eq!(mset.len(), 1);
        assert_eq!(mset[0].key_count, 2);
    }

    #[tokio::test]
    async fn test_commit_failure_is_reported_not_raised() {
        let (store, client) = setup(CacheConfig::default());
        let cache = client.begin_request();
        cache.touch(&WriteKey::new().account(Uuid::now_v7())).await;
        store.fail_next(1, StoreError::unavailable("down")).await;

        let report = cache.commit().await.unwrap();
        assert!(!report.applied);
        assert_eq!(report.error, Some(StoreError::unavailable("down")));
    }

    #[tokio::test]
    async fn test_commit_attempted_after_breaker_trips() {
        let (store, client) = setup(CacheConfig::default());
        let account = Uuid::now_v7();
        let cache = client.begin_request();

        store.fail_next(1, StoreError::unavailable("blip")).await;
        let key = ReadKey::new("account.get", (0, account)).account(account);
        assert!(cache.get::<String>(&key).await.is_none());
        assert!(cache.breaker_tripped());

        cache.touch(&WriteKey::new().account(account)).await;
        let report = cache.commit().await.unwrap();
        assert!(report.applied);
        assert!(report.stats.breaker_tripped);
        assert!(store
            .dlm_value(&DlmKey::new(DlmTag::Account, &[account]))
            .await
            .is_some());
    }

    #[tokio::test]
    async fn test_value_ttl_applies_to_values_only() {
        let ttl = Duration::from_secs(600);
        let (store, client) =
            setup(CacheConfig::default().with_eviction(EvictionPolicy::ValueTtl(ttl)));
        let account = Uuid::now_v7();
        let cache = client.begin_request();
        let key = ReadKey::new("account.get", (0, account)).account(account);
        cache.set(&"acme", &key).await;
        cache.commit().await.unwrap();

        let keys = store.value_keys().await;
        assert_eq!(keys.len(), 1);
        assert_eq!(store.value_ttl(&keys[0]).await, Some(ttl));
    }
}
