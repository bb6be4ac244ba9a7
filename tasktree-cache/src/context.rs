//! Request-scoped cache context.
//!
//! One [`RequestCache`] is opened per inbound request. It memoizes resolved
//! DLM timestamps, stages value writes and accumulates DLM bumps until the
//! commit phase drains it once at request end.
//!
//! Every store problem is absorbed here: lookups fail open to a miss, sets
//! and touches never fail. A transient store error (timeout, connectivity)
//! trips the per-request breaker immediately; other errors trip it after
//! `max_store_errors` in a row. Once tripped, lookups and sets skip the store
//! for the rest of the request.
//!
//! Resolution is memoized at first use, so there is no read-your-writes
//! within a request: a lookup after a touch of overlapping keys still sees
//! the pre-touch snapshot.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tasktree_core::{now_unix_millis, CacheConfig, StoreError, TouchedRow, UnixMillis};
use tokio::sync::Mutex;

use crate::audit;
use crate::dlm::DlmKey;
use crate::key::{DependencyKeys, ReadKey, WriteKey};
use crate::snapshot::Snapshot;
use crate::stats::{CacheStats, QueryInfo};
use crate::storage_key;
use crate::store::CacheStore;

#[derive(Debug, Default)]
pub(crate) struct State {
    pub(crate) resolved: HashMap<DlmKey, UnixMillis>,
    pub(crate) pending_bumps: BTreeSet<DlmKey>,
    pub(crate) pending_writes: BTreeMap<String, Vec<u8>>,
    pub(crate) query_log: Vec<QueryInfo>,
    pub(crate) stats: CacheStats,
}

pub(crate) struct Inner {
    pub(crate) store: Arc<dyn CacheStore>,
    pub(crate) config: Arc<CacheConfig>,
    pub(crate) request_start_ms: UnixMillis,
    pub(crate) skip_cache: bool,
    pub(crate) breaker: AtomicBool,
    pub(crate) consecutive_errors: AtomicU32,
    pub(crate) committed: AtomicBool,
    pub(crate) state: Mutex<State>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if self.committed.load(Ordering::Acquire) {
            return;
        }
        let state = self.state.get_mut();
        if !state.pending_bumps.is_empty() || !state.pending_writes.is_empty() {
            tracing::error!(
                pending_bumps = state.pending_bumps.len(),
                pending_writes = state.pending_writes.len(),
                request_start_ms = self.request_start_ms,
                "Request cache dropped without commit, pending invalidations lost"
            );
        }
    }
}

/// The per-request cache accumulator. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct RequestCache {
    pub(crate) inner: Arc<Inner>,
}

impl RequestCache {
    pub(crate) fn new(
        store: Arc<dyn CacheStore>,
        config: Arc<CacheConfig>,
        request_start_ms: UnixMillis,
        skip_cache: bool,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                config,
                request_start_ms,
                skip_cache,
                breaker: AtomicBool::new(false),
                consecutive_errors: AtomicU32::new(0),
                committed: AtomicBool::new(false),
                state: Mutex::new(State::default()),
            }),
        }
    }

    // ------------------------------------------------------------------
    // Read path
    // ------------------------------------------------------------------

    /// Look up a cached result. `None` is a miss for any reason.
    pub async fn get<T: DeserializeOwned>(&self, key: &ReadKey) -> Option<T> {
        if !self.lookup_allowed(key) {
            self.inner.state.lock().await.stats.skipped += 1;
            return None;
        }

        let Some(storage_key) = self.storage_key(key).await else {
            self.inner.state.lock().await.stats.misses += 1;
            return None;
        };

        let raw = match self.call("GET", 1, self.inner.store.get(&storage_key)).await {
            Ok(Some(raw)) if !raw.is_empty() => raw,
            Ok(_) | Err(_) => {
                self.inner.state.lock().await.stats.misses += 1;
                return None;
            }
        };

        match serde_json::from_slice::<T>(&raw) {
            Ok(value) => {
                self.inner.state.lock().await.stats.hits += 1;
                tracing::trace!(identity = key.identity(), "Cache hit");
                Some(value)
            }
            Err(e) => {
                tracing::warn!(
                    identity = key.identity(),
                    error = %e,
                    "Cached payload failed to deserialize, treating as miss"
                );
                self.inner.state.lock().await.stats.misses += 1;
                None
            }
        }
    }

    // ------------------------------------------------------------------
    // Write path
    // ------------------------------------------------------------------

    /// Stage `value` under `key` for the commit phase. Never writes
    /// immediately.
    pub async fn set<T: Serialize + ?Sized>(&self, value: &T, key: &ReadKey) {
        if !self.inner.config.enabled || self.breaker_tripped() || !key.is_cacheable() {
            return;
        }

        let Some(storage_key) = self.storage_key(key).await else {
            return;
        };

        let payload = match serde_json::to_vec(value) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::warn!(
                    identity = key.identity(),
                    error = %e,
                    "Value failed to serialize, not caching"
                );
                return;
            }
        };

        let mut state = self.inner.state.lock().await;
        state.pending_writes.insert(storage_key, payload);
        state.stats.staged_writes += 1;
    }

    /// Record the keys a mutation must bump. In-memory only.
    pub async fn touch(&self, key: &WriteKey) {
        if !self.inner.config.enabled || key.is_empty() {
            return;
        }
        let mut state = self.inner.state.lock().await;
        state
            .pending_bumps
            .extend(key.dlm_keys().iter().cloned());
    }

    /// [`RequestCache::touch`] after checking `key` covers every row the
    /// shard reported as changed.
    ///
    /// Panics on a violation in debug builds. With the `dependency-audit`
    /// feature in release builds, violations are logged instead.
    pub async fn touch_audited(&self, key: &WriteKey, touched: &[TouchedRow]) {
        if audit::audit_enabled() {
            let violations = audit::verify_write(key, touched);
            for violation in &violations {
                tracing::error!(violation = %violation, "Write descriptor misses invalidation keys");
            }
            if cfg!(debug_assertions) && !violations.is_empty() {
                panic!(
                    "write descriptor misses invalidation keys: {}",
                    violations
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join("; ")
                );
            }
        }
        self.touch(key).await;
    }

    /// Look up `key`; on a miss run `compute`, stage its result and return it.
    /// Errors from `compute` propagate untouched and nothing is staged.
    pub async fn get_or_compute<T, E, F, Fut>(&self, key: &ReadKey, compute: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = compute().await?;
        self.set(&value, key).await;
        Ok(value)
    }

    // ------------------------------------------------------------------
    // Inspection
    // ------------------------------------------------------------------

    pub fn request_start_ms(&self) -> UnixMillis {
        self.inner.request_start_ms
    }

    pub fn skip_cache(&self) -> bool {
        self.inner.skip_cache
    }

    pub fn breaker_tripped(&self) -> bool {
        self.inner.breaker.load(Ordering::Acquire)
    }

    pub fn is_committed(&self) -> bool {
        self.inner.committed.load(Ordering::Acquire)
    }

    pub async fn stats(&self) -> CacheStats {
        self.inner.state.lock().await.stats.clone()
    }

    pub async fn query_log(&self) -> Vec<QueryInfo> {
        self.inner.state.lock().await.query_log.clone()
    }

    pub async fn pending_bumps(&self) -> BTreeSet<DlmKey> {
        self.inner.state.lock().await.pending_bumps.clone()
    }

    pub async fn pending_write_count(&self) -> usize {
        self.inner.state.lock().await.pending_writes.len()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn lookup_allowed(&self, key: &ReadKey) -> bool {
        self.inner.config.enabled
            && !self.inner.skip_cache
            && !self.breaker_tripped()
            && key.is_cacheable()
    }

    /// Resolve the snapshot and encode the storage key. `None` when either
    /// step failed; the failure is already logged.
    async fn storage_key(&self, key: &ReadKey) -> Option<String> {
        let snapshot = self.resolve_snapshot(key.dlm_keys()).await.ok()?;
        match storage_key::encode(&self.inner.config.master_epoch, key, snapshot) {
            Ok(encoded) => Some(encoded),
            Err(e) => {
                tracing::warn!(identity = key.identity(), error = %e, "Storage key encoding failed");
                None
            }
        }
    }

    /// Max DLM timestamp across `keys`, fetching only keys this request has
    /// not resolved yet, in one round trip.
    async fn resolve_snapshot(&self, keys: &BTreeSet<DlmKey>) -> Result<Snapshot, StoreError> {
        let missing: Vec<DlmKey> = {
            let state = self.inner.state.lock().await;
            keys.iter()
                .filter(|key| !state.resolved.contains_key(*key))
                .cloned()
                .collect()
        };

        if !missing.is_empty() {
            let values = self
                .call("MGET", missing.len(), self.inner.store.mget_dlms(&missing))
                .await?;
            let mut state = self.inner.state.lock().await;
            for (key, value) in missing.into_iter().zip(values) {
                // First resolution wins for the rest of the request.
                state.resolved.entry(key).or_insert(value);
            }
        }

        let state = self.inner.state.lock().await;
        Ok(Snapshot::from_timestamps(
            keys.iter()
                .map(|key| state.resolved.get(key).copied().unwrap_or(0)),
        ))
    }

    /// Run one store call under the configured timeout, log it to the query
    /// log and feed the breaker.
    pub(crate) async fn call<T, Fut>(
        &self,
        command: &'static str,
        key_count: usize,
        call: Fut,
    ) -> Result<T, StoreError>
    where
        Fut: Future<Output = Result<T, StoreError>>,
    {
        let timeout = self.inner.config.store_timeout;
        let started_at_ms = now_unix_millis();
        let started = Instant::now();

        let result = match tokio::time::timeout(timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(StoreError::timeout(
                command,
                u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            )),
        };

        let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        {
            let mut state = self.inner.state.lock().await;
            state.query_log.push(QueryInfo {
                command,
                key_count,
                started_at_ms,
                duration_ms,
                ok: result.is_ok(),
            });
            if result.is_err() {
                state.stats.store_errors += 1;
            }
        }

        match &result {
            Ok(_) => self.inner.consecutive_errors.store(0, Ordering::Release),
            Err(e) => self.record_store_error(command, e).await,
        }
        result
    }

    async fn record_store_error(&self, command: &'static str, error: &StoreError) {
        let errors = self.inner.consecutive_errors.fetch_add(1, Ordering::AcqRel) + 1;
        let threshold = self.inner.config.max_store_errors.max(1);

        if !error.is_transient() && errors < threshold {
            tracing::warn!(
                command,
                error = %error,
                consecutive_errors = errors,
                "Cache store call failed"
            );
            return;
        }

        if !self.inner.breaker.swap(true, Ordering::AcqRel) {
            self.inner.state.lock().await.stats.breaker_tripped = true;
            tracing::warn!(
                command,
                error = %error,
                consecutive_errors = errors,
                transient = error.is_transient(),
                "Cache store failing, bypassing cache for the rest of the request"
            );
        }
    }
}

impl std::fmt::Debug for RequestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestCache")
            .field("request_start_ms", &self.inner.request_start_ms)
            .field("skip_cache", &self.inner.skip_cache)
            .field("breaker_tripped", &self.breaker_tripped())
            .field("committed", &self.is_committed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{CacheClient, RequestOptions};
    use crate::store::InMemoryCacheStore;
    use serde::Deserialize;
    use std::time::Duration;
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Member {
        id: Uuid,
        role: u8,
        name: String,
    }

    fn setup(config: CacheConfig) -> (InMemoryCacheStore, CacheClient) {
        let store = InMemoryCacheStore::new();
        let client = CacheClient::new(Arc::new(store.clone()), config);
        (store, client)
    }

    fn members_key(account: Uuid) -> ReadKey {
        ReadKey::new("account.get_members", (0, account)).account_members_set(account)
    }

    fn member(name: &str) -> Member {
        Member {
            id: Uuid::now_v7(),
            role: 1,
            name: name.to_string(),
        }
    }

    #[tokio::test]
    async fn test_set_then_get_within_request_hits_after_commit() {
        let (_, client) = setup(CacheConfig::default());
        let account = Uuid::now_v7();
        let value = vec![member("ada"), member("lin")];

        let writer = client.begin_request();
        assert!(writer.get::<Vec<Member>>(&members_key(account)).await.is_none());
        writer.set(&value, &members_key(account)).await;
        writer.commit().await.unwrap();

        let reader = client.begin_request();
        let cached: Option<Vec<Member>> = reader.get(&members_key(account)).await;
        assert_eq!(cached, Some(value));
        assert_eq!(reader.stats().await.hits, 1);
        reader.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_set_is_staged_not_written() {
        let (store, client) = setup(CacheConfig::default());
        let cache = client.begin_request();
        cache.set(&member("ada"), &members_key(Uuid::now_v7())).await;

        assert_eq!(store.value_count().await, 0);
        assert_eq!(store.commit_calls(), 0);
        assert_eq!(cache.pending_write_count().await, 1);
        cache.commit().await.unwrap();
        assert_eq!(store.value_count().await, 1);
    }

    #[tokio::test]
    async fn test_memoizes_dlm_resolution() {
        let (store, client) = setup(CacheConfig::default());
        let account = Uuid::now_v7();
        let cache = client.begin_request();

        cache.get::<Vec<Member>>(&members_key(account)).await;
        cache.get::<Vec<Member>>(&members_key(account)).await;
        cache.set(&vec![member("x")], &members_key(account)).await;

        assert_eq!(store.mget_calls(), 1);
        assert_eq!(store.mget_keys(), 2);

        // Only the new key is fetched for an overlapping set.
        let member_key = ReadKey::new("account.get_member", (0, account))
            .account_members_set(account)
            .account(account);
        cache.get::<Member>(&member_key).await;
        assert_eq!(store.mget_calls(), 2);
        assert_eq!(store.mget_keys(), 3);
        cache.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_memo_is_not_refreshed_within_request() {
        let (store, client) = setup(CacheConfig::default());
        let account = Uuid::now_v7();
        let key = members_key(account);

        let cache = client.begin_request();
        cache.get::<Vec<Member>>(&key).await;
        // Another process bumps the set mid-request.
        store
            .seed_dlm(DlmKey::new(crate::dlm::DlmTag::AccountMembersSet, &[account]), 99)
            .await;
        cache.get::<Vec<Member>>(&key).await;
        assert_eq!(store.mget_calls(), 1);
        cache.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_disabled_cache_never_touches_store() {
        let (store, client) = setup(CacheConfig::default().with_enabled(false));
        let account = Uuid::now_v7();
        let cache = client.begin_request();

        assert!(cache.get::<Vec<Member>>(&members_key(account)).await.is_none());
        cache.set(&vec![member("x")], &members_key(account)).await;
        cache.touch(&WriteKey::new().account_member(account, Uuid::now_v7())).await;
        let report = cache.commit().await.unwrap();

        assert_eq!(store.mget_calls() + store.get_calls() + store.commit_calls(), 0);
        assert!(report.is_noop());
        assert_eq!(cache.stats().await.skipped, 1);
    }

    #[tokio::test]
    async fn test_key_without_dependencies_misses_without_io() {
        let (store, client) = setup(CacheConfig::default());
        let cache = client.begin_request();
        let key = ReadKey::new("account.count", ());
        assert!(cache.get::<u64>(&key).await.is_none());
        cache.set(&7u64, &key).await;
        assert_eq!(store.mget_calls(), 0);
        assert_eq!(cache.pending_write_count().await, 0);
        cache.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_skip_cache_misses_but_still_stages() {
        let (store, client) = setup(CacheConfig::default());
        let account = Uuid::now_v7();

        let seed = client.begin_request();
        seed.set(&vec![member("x")], &members_key(account)).await;
        seed.commit().await.unwrap();

        let cache = client.begin_request_with(RequestOptions {
            skip_cache: true,
            start_ms: None,
        });
        assert!(cache.get::<Vec<Member>>(&members_key(account)).await.is_none());
        assert_eq!(store.get_calls(), 0);

        cache.set(&vec![member("y")], &members_key(account)).await;
        cache.touch(&WriteKey::new().account(account)).await;
        let report = cache.commit().await.unwrap();
        assert_eq!(report.bumped, 1);
        assert_eq!(report.written, 1);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_a_miss() {
        let (store, client) = setup(CacheConfig::default());
        let account = Uuid::now_v7();
        let key = members_key(account);
        let encoded = storage_key::encode("0", &key, Snapshot::ZERO).unwrap();
        store.put_raw(encoded, b"{not json".to_vec()).await;

        let cache = client.begin_request();
        assert!(cache.get::<Vec<Member>>(&key).await.is_none());
        let stats = cache.stats().await;
        assert_eq!(stats.misses, 1);
        assert!(!stats.breaker_tripped);
        cache.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_transient_error_trips_breaker_immediately() {
        let (store, client) = setup(CacheConfig::default());
        let account = Uuid::now_v7();
        store.fail_next(1, StoreError::unavailable("connection refused")).await;

        let cache = client.begin_request();
        assert!(cache.get::<Vec<Member>>(&members_key(account)).await.is_none());
        assert!(cache.breaker_tripped());

        // The store has recovered but this request no longer asks it.
        assert!(cache.get::<Vec<Member>>(&members_key(account)).await.is_none());
        cache.set(&vec![member("x")], &members_key(account)).await;
        assert_eq!(store.mget_calls(), 1);
        assert_eq!(store.get_calls(), 0);
        assert_eq!(cache.pending_write_count().await, 0);

        let stats = cache.stats().await;
        assert!(stats.breaker_tripped);
        assert_eq!(stats.skipped, 1);
        cache.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_non_transient_errors_trip_after_threshold() {
        let (store, client) = setup(CacheConfig::default().with_max_store_errors(3));
        store.fail_always(StoreError::command("MGET", "WRONGTYPE")).await;
        let cache = client.begin_request();

        for i in 0..2 {
            let account = Uuid::now_v7();
            assert!(cache.get::<Vec<Member>>(&members_key(account)).await.is_none());
            assert!(!cache.breaker_tripped(), "tripped early at {}", i);
        }
        assert!(cache.get::<Vec<Member>>(&members_key(Uuid::now_v7())).await.is_none());
        assert!(cache.breaker_tripped());
        assert_eq!(store.mget_calls(), 3);
        assert_eq!(cache.stats().await.store_errors, 3);
        store.heal().await;
        cache.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_success_resets_error_streak() {
        let (store, client) = setup(CacheConfig::default().with_max_store_errors(2));
        let cache = client.begin_request();

        store.fail_next(1, StoreError::command("MGET", "WRONGTYPE")).await;
        cache.get::<Vec<Member>>(&members_key(Uuid::now_v7())).await;
        cache.get::<Vec<Member>>(&members_key(Uuid::now_v7())).await;
        store.fail_next(1, StoreError::command("MGET", "WRONGTYPE")).await;
        cache.get::<Vec<Member>>(&members_key(Uuid::now_v7())).await;

        assert!(!cache.breaker_tripped());
        cache.commit().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out_and_trips() {
        let config = CacheConfig::default().with_store_timeout(Duration::from_millis(50));
        let (store, client) = setup(config);
        store.set_latency(Duration::from_secs(5)).await;

        let cache = client.begin_request();
        assert!(cache.get::<Vec<Member>>(&members_key(Uuid::now_v7())).await.is_none());
        assert!(cache.breaker_tripped());

        let log = cache.query_log().await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].command, "MGET");
        assert!(!log[0].ok);
        store.heal().await;
        cache.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_touch_accumulates_without_io() {
        let (store, client) = setup(CacheConfig::default());
        let (account, member_id) = (Uuid::now_v7(), Uuid::now_v7());
        let cache = client.begin_request();

        cache.touch(&WriteKey::new().account_member(account, member_id)).await;
        cache.touch(&WriteKey::new().account_member(account, member_id)).await;

        assert_eq!(cache.pending_bumps().await.len(), 2);
        assert_eq!(store.commit_calls() + store.mget_calls(), 0);
        cache.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_or_compute() {
        let (_, client) = setup(CacheConfig::default());
        let account = Uuid::now_v7();
        let key = members_key(account);

        let cache = client.begin_request();
        let computed: Result<Vec<Member>, String> = cache
            .get_or_compute(&key, || async { Ok(vec![member("ada")]) })
            .await;
        let computed = computed.unwrap();
        cache.commit().await.unwrap();

        let cache = client.begin_request();
        let cached: Result<Vec<Member>, String> = cache
            .get_or_compute(&key, || async { Err("shard should not be queried".to_string()) })
            .await;
        assert_eq!(cached.unwrap(), computed);
        cache.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_get_or_compute_propagates_source_errors() {
        let (_, client) = setup(CacheConfig::default());
        let cache = client.begin_request();
        let result: Result<Vec<Member>, String> = cache
            .get_or_compute(&members_key(Uuid::now_v7()), || async {
                Err("shard 3 unavailable".to_string())
            })
            .await;
        assert_eq!(result, Err("shard 3 unavailable".to_string()));
        assert_eq!(cache.pending_write_count().await, 0);
        cache.commit().await.unwrap();
    }

    #[cfg(debug_assertions)]
    #[tokio::test]
    #[should_panic(expected = "misses invalidation keys")]
    async fn test_touch_audited_panics_on_missing_bubble_up() {
        let (_, client) = setup(CacheConfig::default());
        let (account, member_id) = (Uuid::now_v7(), Uuid::now_v7());
        let cache = client.begin_request();
        let mut key = WriteKey::new();
        key.insert_key(DlmKey::new(
            crate::dlm::DlmTag::AccountMember,
            &[account, member_id],
        ));
        cache
            .touch_audited(
                &key,
                &[TouchedRow::AccountMember {
                    account,
                    member: member_id,
                }],
            )
            .await;
    }

    #[tokio::test]
    async fn test_touch_audited_accepts_complete_declaration() {
        let (_, client) = setup(CacheConfig::default());
        let (account, member_id) = (Uuid::now_v7(), Uuid::now_v7());
        let cache = client.begin_request();
        cache
            .touch_audited(
                &WriteKey::new().account_member(account, member_id),
                &[TouchedRow::AccountMember {
                    account,
                    member: member_id,
                }],
            )
            .await;
        assert_eq!(cache.pending_bumps().await.len(), 2);
        cache.commit().await.unwrap();
    }
}
