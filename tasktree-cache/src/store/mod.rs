//! Backing store for the DLM and value keyspaces.
//!
//! Both keyspaces live in one store so the commit phase can apply bumps and
//! value writes in a single batch. The request cache is the only caller; it
//! applies timeouts and breaker accounting around every method.

mod memory;
mod redis;

pub use self::memory::InMemoryCacheStore;
pub use self::redis::RedisCacheStore;

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use tasktree_core::{EvictionPolicy, StoreError, UnixMillis};

use crate::dlm::DlmKey;

/// Everything one request commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitBatch {
    /// DLM keys to bump.
    pub bumps: BTreeSet<DlmKey>,
    /// Timestamp every bump is set to: the request start, not "now".
    pub at: UnixMillis,
    /// Encoded storage key to serialized value.
    pub writes: BTreeMap<String, Vec<u8>>,
    /// Retention applied to `writes`. Never applied to bumps.
    pub eviction: EvictionPolicy,
}

impl CommitBatch {
    pub fn is_empty(&self) -> bool {
        self.bumps.is_empty() && self.writes.is_empty()
    }

    /// Number of keys the batch writes.
    pub fn key_count(&self) -> usize {
        self.bumps.len() + self.writes.len()
    }
}

/// The command surface the request cache needs: point GET, batched DLM
/// multi-GET, batched multi-SET.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Point read of a value record.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Fetch DLM timestamps in one round trip, in input order. Keys that were
    /// never bumped resolve to 0.
    async fn mget_dlms(&self, keys: &[DlmKey]) -> Result<Vec<UnixMillis>, StoreError>;

    /// Apply a commit batch in one round trip.
    async fn commit(&self, batch: &CommitBatch) -> Result<(), StoreError>;

    /// Backend name for logs.
    fn backend_name(&self) -> &'static str;
}

/// Parse a stored DLM value. Missing keys are 0.
pub(crate) fn parse_dlm(key: &DlmKey, raw: Option<&[u8]>) -> Result<UnixMillis, StoreError> {
    let Some(raw) = raw else {
        return Ok(0);
    };
    std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.trim().parse::<UnixMillis>().ok())
        .ok_or_else(|| StoreError::Malformed {
            key: key.to_string(),
            reason: format!("not an integer timestamp: {:?}", String::from_utf8_lossy(raw)),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_parse_dlm() {
        let key = DlmKey::account_master(Uuid::nil());
        assert_eq!(parse_dlm(&key, None).unwrap(), 0);
        assert_eq!(parse_dlm(&key, Some(b"1700000000000")).unwrap(), 1_700_000_000_000);
        assert!(matches!(
            parse_dlm(&key, Some(b"soon")),
            Err(StoreError::Malformed { .. })
        ));
    }

    #[test]
    fn test_batch_counts() {
        let mut batch = CommitBatch {
            bumps: BTreeSet::new(),
            at: 10,
            writes: BTreeMap::new(),
            eviction: EvictionPolicy::StoreManaged,
        };
        assert!(batch.is_empty());
        batch.bumps.insert(DlmKey::account_master(Uuid::nil()));
        batch.writes.insert("k".to_string(), b"v".to_vec());
        assert!(!batch.is_empty());
        assert_eq!(batch.key_count(), 2);
    }
}
