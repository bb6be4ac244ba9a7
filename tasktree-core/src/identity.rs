//! Identity types for TaskTree entities

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Entity identifier using UUIDv7 for timestamp-sortable IDs.
pub type EntityId = Uuid;

/// Account (tenant) identifier. Accounts own shards of the tree store.
pub type AccountId = EntityId;

/// Project identifier. A project row is also the root task of its tree.
pub type ProjectId = EntityId;

/// Task identifier.
pub type TaskId = EntityId;

/// Member identifier (a user's membership in an account or project).
pub type MemberId = EntityId;

/// Time log identifier.
pub type TimeLogId = EntityId;

/// Index of a relational shard holding one region's tenant data.
pub type ShardId = u32;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Milliseconds since the unix epoch. DLM values are stored in this unit.
pub type UnixMillis = i64;

/// Generate a new UUIDv7 EntityId (timestamp-sortable).
pub fn new_entity_id() -> EntityId {
    Uuid::now_v7()
}

/// Current wall clock time in unix milliseconds.
pub fn now_unix_millis() -> UnixMillis {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_entity_ids_are_distinct() {
        let a = new_entity_id();
        let b = new_entity_id();
        assert_ne!(a, b);
    }

    #[test]
    fn test_now_unix_millis_is_monotonic_enough() {
        let first = now_unix_millis();
        let second = now_unix_millis();
        assert!(second >= first);
        // Sanity: after 2020-01-01.
        assert!(first > 1_577_836_800_000);
    }
}
