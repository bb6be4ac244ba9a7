//! TaskTree Test Utilities
//!
//! Shared test infrastructure for the TaskTree workspace:
//! - A scripted in-memory shard store with call recording
//! - Proptest generators for ids, touched rows and DSL operations
//! - Fixtures for id sets, rows and in-memory cache clients
//! - Assertions over write descriptors and cache statistics

pub use tasktree_cache::{
    CacheClient, CacheStats, DependencyKeys, DlmKey, DlmTag, InMemoryCacheStore, ReadKey,
    RequestCache, RequestOptions, WriteKey,
};
pub use tasktree_core::{
    AccountId, CacheConfig, ExecOutcome, MemberId, ProjectId, Row, ShardError, ShardId,
    ShardStore, SqlArg, TaskId, TimeLogId, TouchedRow, UnixMillis,
};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use uuid::Uuid;

// ============================================================================
// SCRIPTED SHARD
// ============================================================================

/// Whether a recorded call was a read or a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Query,
    Exec,
}

/// One call the shard received.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardCall {
    pub kind: CallKind,
    pub shard: ShardId,
    pub sql: String,
    pub args: Vec<SqlArg>,
}

#[derive(Debug, Clone)]
enum Reply {
    Rows(Vec<Row>),
    Outcome(ExecOutcome),
    Fail(ShardError),
}

#[derive(Debug)]
struct Rule {
    kind: CallKind,
    fragment: String,
    reply: Reply,
    /// `None` repeats forever.
    remaining: Option<usize>,
}

#[derive(Debug, Default)]
struct Script {
    rules: VecDeque<Rule>,
    calls: Vec<ShardCall>,
}

/// A [`ShardStore`] answering from scripted rules.
///
/// Rules match on a SQL fragment; the first live match wins. Unmatched
/// queries return no rows and unmatched mutations change nothing.
#[derive(Debug, Clone)]
pub struct ScriptedShard {
    shard_count: usize,
    script: Arc<Mutex<Script>>,
}

impl Default for ScriptedShard {
    fn default() -> Self {
        Self::new(1)
    }
}

impl ScriptedShard {
    pub fn new(shard_count: usize) -> Self {
        Self {
            shard_count,
            script: Arc::new(Mutex::new(Script::default())),
        }
    }

    fn script(&self) -> MutexGuard<'_, Script> {
        // A panicking test poisons the lock; the script is still usable.
        self.script.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, kind: CallKind, fragment: &str, reply: Reply, remaining: Option<usize>) {
        self.script().rules.push_back(Rule {
            kind,
            fragment: fragment.to_string(),
            reply,
            remaining,
        });
    }

    /// Answer every query containing `fragment` with `rows`.
    pub fn on_query(&self, fragment: &str, rows: Vec<Row>) -> &Self {
        self.push(CallKind::Query, fragment, Reply::Rows(rows), None);
        self
    }

    /// Answer the next query containing `fragment` with `rows`, once.
    pub fn on_query_once(&self, fragment: &str, rows: Vec<Row>) -> &Self {
        self.push(CallKind::Query, fragment, Reply::Rows(rows), Some(1));
        self
    }

    /// Answer every mutation containing `fragment` with `outcome`.
    pub fn on_exec(&self, fragment: &str, outcome: ExecOutcome) -> &Self {
        self.push(CallKind::Exec, fragment, Reply::Outcome(outcome), None);
        self
    }

    /// Fail every call of `kind` containing `fragment`.
    pub fn fail(&self, kind: CallKind, fragment: &str, error: ShardError) -> &Self {
        self.push(kind, fragment, Reply::Fail(error), None);
        self
    }

    pub fn calls(&self) -> Vec<ShardCall> {
        self.script().calls.clone()
    }

    pub fn query_count(&self) -> usize {
        self.count(CallKind::Query)
    }

    pub fn exec_count(&self) -> usize {
        self.count(CallKind::Exec)
    }

    fn count(&self, kind: CallKind) -> usize {
        self.script().calls.iter().filter(|c| c.kind == kind).count()
    }

    /// Calls whose SQL contains `fragment`.
    pub fn calls_matching(&self, fragment: &str) -> Vec<ShardCall> {
        self.script()
            .calls
            .iter()
            .filter(|c| c.sql.contains(fragment))
            .cloned()
            .collect()
    }

    fn answer(&self, kind: CallKind, shard: ShardId, sql: &str, args: &[SqlArg]) -> Option<Reply> {
        let mut script = self.script();
        script.calls.push(ShardCall {
            kind,
            shard,
            sql: sql.to_string(),
            args: args.to_vec(),
        });
        let index = script.rules.iter().position(|rule| {
            rule.kind == kind && sql.contains(&rule.fragment) && rule.remaining != Some(0)
        })?;
        let rule = &mut script.rules[index];
        if let Some(remaining) = rule.remaining.as_mut() {
            *remaining -= 1;
        }
        Some(rule.reply.clone())
    }

    fn check_shard(&self, shard: ShardId) -> Result<(), ShardError> {
        if shard as usize >= self.shard_count {
            return Err(ShardError::Unavailable {
                shard,
                reason: "no such shard".to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ShardStore for ScriptedShard {
    fn shard_count(&self) -> usize {
        self.shard_count
    }

    async fn query(
        &self,
        shard: ShardId,
        sql: &str,
        args: &[SqlArg],
    ) -> Result<Vec<Row>, ShardError> {
        self.check_shard(shard)?;
        match self.answer(CallKind::Query, shard, sql, args) {
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Outcome(_)) | None => Ok(Vec::new()),
        }
    }

    async fn exec(
        &self,
        shard: ShardId,
        sql: &str,
        args: &[SqlArg],
    ) -> Result<ExecOutcome, ShardError> {
        self.check_shard(shard)?;
        match self.answer(CallKind::Exec, shard, sql, args) {
            Some(Reply::Outcome(outcome)) => Ok(outcome),
            Some(Reply::Fail(e)) => Err(e),
            Some(Reply::Rows(_)) | None => Ok(ExecOutcome::default()),
        }
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for TaskTree ids and dependency declarations.

    use super::*;
    use proptest::prelude::*;

    /// Generate a random UUID.
    pub fn arb_uuid() -> impl Strategy<Value = Uuid> {
        any::<[u8; 16]>().prop_map(Uuid::from_bytes)
    }

    pub fn arb_shard_id() -> impl Strategy<Value = ShardId> {
        0u32..8
    }

    /// Unix millis between 2020 and 2030.
    pub fn arb_unix_millis() -> impl Strategy<Value = UnixMillis> {
        1_577_836_800_000i64..1_893_456_000_000i64
    }

    /// One dependency-key DSL call within a fixed account and project.
    #[derive(Debug, Clone)]
    pub enum DslOp {
        Account,
        AccountActivities,
        AccountMembersSet,
        AccountMember(MemberId),
        AccountProjectsSet,
        Project,
        ProjectActivities,
        ProjectMembersSet,
        ProjectMember(MemberId),
        Task(TaskId),
        RootTask,
        TaskChildrenSet(TaskId),
        TimeLog(TimeLogId, Option<TaskId>, Option<MemberId>),
        ProjectTimeLogSet,
        TaskTimeLogSet(TaskId),
        ProjectMemberTimeLogSet(MemberId),
    }

    impl DslOp {
        pub fn apply<K: DependencyKeys>(&self, key: K, account: AccountId, project: ProjectId) -> K {
            match *self {
                DslOp::Account => key.account(account),
                DslOp::AccountActivities => key.account_activities(account),
                DslOp::AccountMembersSet => key.account_members_set(account),
                DslOp::AccountMember(m) => key.account_member(account, m),
                DslOp::AccountProjectsSet => key.account_projects_set(account),
                DslOp::Project => key.project(account, project),
                DslOp::ProjectActivities => key.project_activities(account, project),
                DslOp::ProjectMembersSet => key.project_members_set(account, project),
                DslOp::ProjectMember(m) => key.project_member(account, project, m),
                DslOp::Task(t) => key.task(account, project, t),
                DslOp::RootTask => key.task(account, project, project),
                DslOp::TaskChildrenSet(t) => key.task_children_set(account, project, t),
                DslOp::TimeLog(tl, t, m) => key.time_log(account, project, tl, t, m),
                DslOp::ProjectTimeLogSet => key.project_time_log_set(account, project),
                DslOp::TaskTimeLogSet(t) => key.task_time_log_set(account, project, t),
                DslOp::ProjectMemberTimeLogSet(m) => {
                    key.project_member_time_log_set(account, project, m)
                }
            }
        }
    }

    pub fn arb_dsl_op() -> impl Strategy<Value = DslOp> {
        prop_oneof![
            Just(DslOp::Account),
            Just(DslOp::AccountActivities),
            Just(DslOp::AccountMembersSet),
            arb_uuid().prop_map(DslOp::AccountMember),
            Just(DslOp::AccountProjectsSet),
            Just(DslOp::Project),
            Just(DslOp::ProjectActivities),
            Just(DslOp::ProjectMembersSet),
            arb_uuid().prop_map(DslOp::ProjectMember),
            arb_uuid().prop_map(DslOp::Task),
            Just(DslOp::RootTask),
            arb_uuid().prop_map(DslOp::TaskChildrenSet),
            (arb_uuid(), proptest::option::of(arb_uuid()), proptest::option::of(arb_uuid()))
                .prop_map(|(tl, t, m)| DslOp::TimeLog(tl, t, m)),
            Just(DslOp::ProjectTimeLogSet),
            arb_uuid().prop_map(DslOp::TaskTimeLogSet),
            arb_uuid().prop_map(DslOp::ProjectMemberTimeLogSet),
        ]
    }

    /// A row a mutation in `account`/`project` could report as changed.
    pub fn arb_touched_row(
        account: AccountId,
        project: ProjectId,
    ) -> impl Strategy<Value = TouchedRow> {
        prop_oneof![
            Just(TouchedRow::Account { account }),
            arb_uuid().prop_map(move |member| TouchedRow::AccountMember { account, member }),
            Just(TouchedRow::Project { account, project }),
            arb_uuid().prop_map(move |member| TouchedRow::ProjectMember {
                account,
                project,
                member
            }),
            arb_uuid().prop_map(move |task| TouchedRow::Task {
                account,
                project,
                task
            }),
            arb_uuid().prop_map(move |parent| TouchedRow::TaskChildren {
                account,
                project,
                parent
            }),
            (
                arb_uuid(),
                proptest::option::of(arb_uuid()),
                proptest::option::of(arb_uuid())
            )
                .prop_map(move |(time_log, task, member)| TouchedRow::TimeLog {
                    account,
                    project,
                    time_log,
                    task,
                    member,
                }),
        ]
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Ready-made ids, rows and cache clients.

    use super::*;

    /// A consistent set of ids for one account's tree.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TreeIds {
        pub shard: ShardId,
        pub account: AccountId,
        pub project: ProjectId,
        pub task: TaskId,
        pub member: MemberId,
        pub time_log: TimeLogId,
    }

    impl TreeIds {
        pub fn new() -> Self {
            Self {
                shard: 0,
                account: Uuid::now_v7(),
                project: Uuid::now_v7(),
                task: Uuid::now_v7(),
                member: Uuid::now_v7(),
                time_log: Uuid::now_v7(),
            }
        }
    }

    impl Default for TreeIds {
        fn default() -> Self {
            Self::new()
        }
    }

    /// Build a row from a JSON object literal. Non-objects give an empty row.
    pub fn row(value: serde_json::Value) -> Row {
        match value {
            serde_json::Value::Object(map) => map,
            _ => Row::new(),
        }
    }

    /// A mutation outcome reporting `touched`, one affected row each.
    pub fn outcome(touched: Vec<TouchedRow>) -> ExecOutcome {
        ExecOutcome {
            rows_affected: touched.len().max(1) as u64,
            touched,
        }
    }

    /// A client over `store` with default configuration.
    pub fn memory_client(store: &InMemoryCacheStore) -> CacheClient {
        memory_client_with(store, CacheConfig::default())
    }

    pub fn memory_client_with(store: &InMemoryCacheStore, config: CacheConfig) -> CacheClient {
        CacheClient::new(Arc::new(store.clone()), config)
    }

    /// Options for a request that started at `start_ms`.
    pub fn started_at(start_ms: UnixMillis) -> RequestOptions {
        RequestOptions {
            skip_cache: false,
            start_ms: Some(start_ms),
        }
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions for cache behavior.

    use super::*;

    /// Assert `key` declares a DLM key with `tag` over `ids`.
    pub fn assert_declares<K: DependencyKeys>(key: &K, tag: DlmTag, ids: &[Uuid]) {
        let expected = DlmKey::new(tag, ids);
        assert!(
            key.contains(&expected),
            "expected {} in [{}]",
            expected.as_str(),
            key.dlm_keys()
                .iter()
                .map(DlmKey::as_str)
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    /// Assert a request's hit and miss counters.
    pub fn assert_lookups(stats: &CacheStats, hits: u64, misses: u64) {
        assert_eq!(
            (stats.hits, stats.misses),
            (hits, misses),
            "unexpected (hits, misses) in {:?}",
            stats
        );
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_scripted_shard_matches_fragments() {
        let shard = ScriptedShard::new(2);
        shard.on_query("FROM accounts", vec![row(json!({ "enabled": true }))]);
        shard.on_query_once("FROM tasks", vec![row(json!({ "id": 1 }))]);

        let rows = shard.query(0, "SELECT * FROM accounts", &[]).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(shard.query(1, "SELECT * FROM tasks", &[]).await.unwrap().len(), 1);
        assert!(shard.query(1, "SELECT * FROM tasks", &[]).await.unwrap().is_empty());
        assert_eq!(shard.query_count(), 3);
        assert_eq!(shard.calls_matching("FROM tasks").len(), 2);
    }

    #[tokio::test]
    async fn test_scripted_shard_rejects_unknown_shard() {
        let shard = ScriptedShard::new(1);
        let result = shard.exec(4, "CALL deleteTask()", &[]).await;
        assert!(matches!(result, Err(ShardError::Unavailable { shard: 4, .. })));
    }

    #[tokio::test]
    async fn test_scripted_shard_failures_and_defaults() {
        let shard = ScriptedShard::new(1);
        shard.fail(
            CallKind::Exec,
            "moveTask",
            ShardError::Query {
                shard: 0,
                reason: "cycle".to_string(),
            },
        );
        assert!(shard.exec(0, "CALL moveTask(?)", &[]).await.is_err());
        let outcome = shard.exec(0, "CALL setTaskName(?)", &[]).await.unwrap();
        assert_eq!(outcome, ExecOutcome::default());
        assert_eq!(shard.exec_count(), 2);
    }

    #[test]
    fn test_dsl_op_applies_to_both_modes() {
        use generators::DslOp;
        let ids = TreeIds::new();
        let read = DslOp::ProjectMember(ids.member).apply(
            ReadKey::new("test", ()),
            ids.account,
            ids.project,
        );
        let write = DslOp::ProjectMember(ids.member).apply(WriteKey::new(), ids.account, ids.project);
        assertions::assert_declares(&read, DlmTag::ProjectMaster, &[ids.project]);
        assertions::assert_declares(&write, DlmTag::ProjectMembersSet, &[ids.project]);
    }
}
