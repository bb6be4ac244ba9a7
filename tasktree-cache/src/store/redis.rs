//! Redis backend.
//!
//! DLM values are stored as decimal unix-millis strings; value records as
//! raw JSON bytes under their storage key. Under `StoreManaged` eviction the
//! whole commit is one `MSET`; under `ValueTtl` the bumps go in an `MSET`
//! and each value in a `SET .. PX`, all inside one `MULTI` pipeline.

use async_trait::async_trait;
use deadpool_redis::{Config, Connection, Pool, PoolConfig, Runtime};
use ::redis::{ErrorKind, RedisError};
use tasktree_core::{CacheConfig, EvictionPolicy, StoreError, UnixMillis};

use super::{parse_dlm, CacheStore, CommitBatch};
use crate::dlm::DlmKey;

/// Cache store over a pooled Redis connection.
#[derive(Clone)]
pub struct RedisCacheStore {
    pool: Pool,
}

impl RedisCacheStore {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build the pool from configuration. Does not connect.
    pub fn from_config(config: &CacheConfig) -> Result<Self, StoreError> {
        let mut cfg = Config::from_url(config.store_url.clone());
        cfg.pool = Some(PoolConfig::new(config.pool_size));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::unavailable(format!("Failed to create pool: {}", e)))?;
        Ok(Self::new(pool))
    }

    async fn connection(&self) -> Result<Connection, StoreError> {
        self.pool
            .get()
            .await
            .map_err(|e| StoreError::unavailable(format!("Redis connection failed: {}", e)))
    }
}

impl std::fmt::Debug for RedisCacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = self.pool.status();
        f.debug_struct("RedisCacheStore")
            .field("max_size", &status.max_size)
            .field("size", &status.size)
            .finish()
    }
}

/// Connectivity failures are transient; everything else is a command error.
fn map_redis_error(command: &str, error: RedisError) -> StoreError {
    if error.kind() == ErrorKind::IoError
        || error.is_timeout()
        || error.is_connection_dropped()
        || error.is_connection_refusal()
    {
        StoreError::unavailable(format!("{} failed: {}", command, error))
    } else {
        StoreError::command(command, error.to_string())
    }
}

#[async_trait]
impl CacheStore for RedisCacheStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let mut conn = self.connection().await?;
        ::redis::cmd("GET")
            .arg(key)
            .query_async::<Option<Vec<u8>>>(&mut conn)
            .await
            .map_err(|e| map_redis_error("GET", e))
    }

    async fn mget_dlms(&self, keys: &[DlmKey]) -> Result<Vec<UnixMillis>, StoreError> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.connection().await?;
        let mut cmd = ::redis::cmd("MGET");
        for key in keys {
            cmd.arg(key.as_str());
        }
        let raw: Vec<Option<Vec<u8>>> = cmd
            .query_async(&mut conn)
            .await
            .map_err(|e| map_redis_error("MGET", e))?;

        if raw.len() != keys.len() {
            return Err(StoreError::command(
                "MGET",
                format!("expected {} values, got {}", keys.len(), raw.len()),
            ));
        }
        keys.iter()
            .zip(raw.iter())
            .map(|(key, value)| parse_dlm(key, value.as_deref()))
            .collect()
    }

    async fn commit(&self, batch: &CommitBatch) -> Result<(), StoreError> {
        if batch.is_empty() {
            return Ok(());
        }

        let mut pipe = ::redis::pipe();
        pipe.atomic();

        let mut mset = ::redis::cmd("MSET");
        let mut mset_args = 0usize;
        for key in &batch.bumps {
            mset.arg(key.as_str()).arg(batch.at);
            mset_args += 1;
        }

        match batch.eviction {
            EvictionPolicy::StoreManaged => {
                for (key, value) in &batch.writes {
                    mset.arg(key).arg(value.as_slice());
                    mset_args += 1;
                }
                pipe.add_command(mset).ignore();
            }
            EvictionPolicy::ValueTtl(ttl) => {
                if mset_args > 0 {
                    pipe.add_command(mset).ignore();
                }
                let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX);
                for (key, value) in &batch.writes {
                    pipe.cmd("SET")
                        .arg(key)
                        .arg(value.as_slice())
                        .arg("PX")
                        .arg(ttl_ms)
                        .ignore();
                }
            }
        }

        let mut conn = self.connection().await?;
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| map_redis_error("MSET", e))
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
