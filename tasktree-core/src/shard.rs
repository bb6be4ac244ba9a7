//! Sharded relational store port.
//!
//! The tree store is partitioned into shards addressed by the caller. Its
//! mutation semantics live in stored procedures; this crate only sees rows
//! in, rows out. The cache layer never talks to a shard itself.

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ShardError;
use crate::identity::{AccountId, MemberId, ProjectId, ShardId, TaskId, TimeLogId};

/// A single result row, column name to value.
pub type Row = Map<String, Value>;

/// A positional query argument.
pub type SqlArg = Value;

/// A row a mutation actually changed, as reported by the shard.
///
/// Stored procedures report these so callers can cross-check the
/// invalidation scope they declared against what really changed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TouchedRow {
    Account {
        account: AccountId,
    },
    AccountMember {
        account: AccountId,
        member: MemberId,
    },
    Project {
        account: AccountId,
        project: ProjectId,
    },
    ProjectMember {
        account: AccountId,
        project: ProjectId,
        member: MemberId,
    },
    /// A task row whose own columns or aggregates changed.
    Task {
        account: AccountId,
        project: ProjectId,
        task: TaskId,
    },
    /// A task whose child list changed (insert, move, delete of a child).
    TaskChildren {
        account: AccountId,
        project: ProjectId,
        parent: TaskId,
    },
    TimeLog {
        account: AccountId,
        project: ProjectId,
        time_log: TimeLogId,
        task: Option<TaskId>,
        member: Option<MemberId>,
    },
}

/// Result of a mutating shard call.
///
/// `touched` lists the rows the mutation changed beyond those the caller
/// names itself. It may be empty even when `rows_affected` is not.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutcome {
    pub rows_affected: u64,
    pub touched: Vec<TouchedRow>,
}

impl ExecOutcome {
    /// Tasks whose rows or child lists changed, in report order.
    pub fn touched_tasks(&self) -> Vec<TaskId> {
        let mut tasks = Vec::new();
        for row in &self.touched {
            let id = match row {
                TouchedRow::Task { task, .. } => *task,
                TouchedRow::TaskChildren { parent, .. } => *parent,
                _ => continue,
            };
            if !tasks.contains(&id) {
                tasks.push(id);
            }
        }
        tasks
    }
}

/// The sharded relational store.
#[async_trait]
pub trait ShardStore: Send + Sync {
    /// Number of shards available in this region.
    fn shard_count(&self) -> usize;

    /// Run a read query and return its rows.
    async fn query(
        &self,
        shard: ShardId,
        sql: &str,
        args: &[SqlArg],
    ) -> Result<Vec<Row>, ShardError>;

    /// Run a mutation (usually a stored procedure call).
    async fn exec(
        &self,
        shard: ShardId,
        sql: &str,
        args: &[SqlArg],
    ) -> Result<ExecOutcome, ShardError>;
}

/// Decode rows into typed records.
pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, ShardError> {
    rows.into_iter()
        .map(|row| {
            serde_json::from_value(Value::Object(row)).map_err(|e| ShardError::Decode {
                reason: e.to_string(),
            })
        })
        .collect()
}

/// Decode exactly one row, mapping an empty result to `NotFound`.
pub fn decode_one<T: DeserializeOwned>(shard: ShardId, rows: Vec<Row>) -> Result<T, ShardError> {
    let row = rows
        .into_iter()
        .next()
        .ok_or(ShardError::NotFound { shard })?;
    serde_json::from_value(Value::Object(row)).map_err(|e| ShardError::Decode {
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[derive(Debug, Deserialize, PartialEq)]
    struct RoleRow {
        role: u8,
    }

    fn row(role: u8) -> Row {
        let mut row = Row::new();
        row.insert("role".to_string(), Value::from(role));
        row
    }

    #[test]
    fn test_decode_rows() {
        let decoded: Vec<RoleRow> = decode_rows(vec![row(0), row(2)]).unwrap();
        assert_eq!(decoded, vec![RoleRow { role: 0 }, RoleRow { role: 2 }]);
    }

    #[test]
    fn test_decode_one_empty_is_not_found() {
        let result: Result<RoleRow, _> = decode_one(3, vec![]);
        assert_eq!(result, Err(ShardError::NotFound { shard: 3 }));
    }

    #[test]
    fn test_decode_bad_shape() {
        let mut bad = Row::new();
        bad.insert("role".to_string(), Value::from("owner"));
        let result: Result<RoleRow, _> = decode_one(0, vec![bad]);
        assert!(matches!(result, Err(ShardError::Decode { .. })));
    }

    #[test]
    fn test_touched_tasks_dedups_in_order() {
        let account = Uuid::now_v7();
        let project = Uuid::now_v7();
        let task = Uuid::now_v7();
        let outcome = ExecOutcome {
            rows_affected: 3,
            touched: vec![
                TouchedRow::TaskChildren {
                    account,
                    project,
                    parent: project,
                },
                TouchedRow::Task {
                    account,
                    project,
                    task,
                },
                TouchedRow::Task {
                    account,
                    project,
                    task: project,
                },
                TouchedRow::Account { account },
            ],
        };
        assert_eq!(outcome.touched_tasks(), vec![project, task]);
    }
}
