//! Per-request statistics and query log.

use serde::Serialize;
use tasktree_core::UnixMillis;

/// Statistics about one request's cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Number of cache hits.
    pub hits: u64,
    /// Number of lookups that reached the store and missed (absent record,
    /// store error or malformed payload).
    pub misses: u64,
    /// Lookups answered as a miss without touching the store: caching
    /// disabled, bypass requested, breaker tripped or uncacheable key.
    pub skipped: u64,
    /// Values staged for the commit phase.
    pub staged_writes: u64,
    /// Store errors observed during the request.
    pub store_errors: u64,
    /// Whether the breaker tripped during the request.
    pub breaker_tripped: bool,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0) over lookups that reached the store.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// One store round trip.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryInfo {
    /// `GET`, `MGET` or `MSET`.
    pub command: &'static str,
    /// Keys read or written by the call.
    pub key_count: usize,
    pub started_at_ms: UnixMillis,
    pub duration_ms: u64,
    pub ok: bool,
}
