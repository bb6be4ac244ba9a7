//! Error types for TaskTree operations

use thiserror::Error;

/// Errors raised by a cache backing store (DLM and value keyspaces).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store call timed out after {timeout_ms}ms: {command}")]
    Timeout { command: String, timeout_ms: u64 },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Store command {command} failed: {reason}")]
    Command { command: String, reason: String },

    #[error("Malformed store payload for {key}: {reason}")]
    Malformed { key: String, reason: String },
}

impl StoreError {
    /// Timeouts and connectivity failures. These trip the per-request breaker
    /// on first occurrence.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Unavailable { .. })
    }

    pub fn timeout(command: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            command: command.into(),
            timeout_ms,
        }
    }

    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
        }
    }

    pub fn command(command: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Command {
            command: command.into(),
            reason: reason.into(),
        }
    }
}

/// Request cache errors. Only contract misuse surfaces here; store problems
/// are absorbed by the cache and never reach request handlers.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CacheError {
    #[error("Request cache was already committed")]
    AlreadyCommitted,

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization failed for {identity}: {reason}")]
    Serialization { identity: String, reason: String },
}

/// Errors from the sharded relational store. Propagated untouched.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShardError {
    #[error("No rows on shard {shard}")]
    NotFound { shard: u32 },

    #[error("Query failed on shard {shard}: {reason}")]
    Query { shard: u32, reason: String },

    #[error("Shard {shard} unavailable: {reason}")]
    Unavailable { shard: u32, reason: String },

    #[error("Unexpected row shape: {reason}")]
    Decode { reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Inter-region private RPC verification failures.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PrivateRpcError {
    #[error("Missing private request parameter: {param}")]
    MissingParam { param: String },

    #[error("Private request timestamp is malformed: {value}")]
    MalformedTimestamp { value: String },

    #[error("Private request sent {age_ms}ms ago exceeds the {window_ms}ms window")]
    Expired { age_ms: i64, window_ms: i64 },

    #[error("Private request signature does not match")]
    BadSignature,

    #[error("Private request signature was already used")]
    Replayed,

    #[error("Replay guard failed: {0}")]
    Guard(#[from] StoreError),
}

/// Master error type for all TaskTree errors.
#[derive(Debug, Clone, Error)]
pub enum TaskTreeError {
    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Shard error: {0}")]
    Shard(#[from] ShardError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Private RPC error: {0}")]
    PrivateRpc(#[from] PrivateRpcError),
}

/// Result type alias for TaskTree operations.
pub type TaskTreeResult<T> = Result<T, TaskTreeError>;

// =============================================================================
// TESTS
// =============================================================================
