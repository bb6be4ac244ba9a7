//! TaskTree Core - shared types
//!
//! Identifiers, the error taxonomy, configuration and the shard port used by
//! every other crate in the workspace. This crate holds no cache logic.

pub mod config;
pub mod error;
pub mod identity;
pub mod shard;

pub use config::{CacheConfig, EvictionPolicy};
pub use error::{
    CacheError, ConfigError, PrivateRpcError, ShardError, StoreError, TaskTreeError,
    TaskTreeResult,
};
pub use identity::{
    new_entity_id, now_unix_millis, AccountId, EntityId, MemberId, ProjectId, ShardId, TaskId,
    TimeLogId, Timestamp, UnixMillis,
};
pub use shard::{ExecOutcome, Row, ShardStore, SqlArg, TouchedRow};
