//! Task tree queries and mutations.
//!
//! Tree-changing stored procedures report every task whose aggregates
//! moved; those feed `combined_task_and_task_children_sets`. Ancestor
//! walks go up the tree and are never cached: invalidation only flows
//! from containers down to their contents.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tasktree_cache::{DependencyKeys, ReadKey, WriteKey};
use tasktree_core::shard::decode_rows;
use tasktree_core::{
    AccountId, ExecOutcome, MemberId, ProjectId, TaskId, Timestamp, TouchedRow,
};

use super::{changed_tasks, page_limit, require_change, ShardCtx};
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub parent: Option<TaskId>,
    pub first_child: Option<TaskId>,
    pub next_sibling: Option<TaskId>,
    pub is_abstract: bool,
    pub name: String,
    pub description: Option<String>,
    pub created_on: Timestamp,
    pub total_remaining_time: u64,
    pub total_logged_time: u64,
    pub minimum_remaining_time: Option<u64>,
    pub child_count: Option<u64>,
    pub descendant_count: Option<u64>,
    pub is_parallel: Option<bool>,
    pub member: Option<MemberId>,
}

impl Task {
    /// Concrete tasks have no children, so their tree aggregates are
    /// meaningless even when the shard fills them in.
    fn normalized(mut self) -> Self {
        if !self.is_abstract {
            self.minimum_remaining_time = None;
            self.child_count = None;
            self.descendant_count = None;
            self.is_parallel = None;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ancestor {
    pub id: TaskId,
    pub name: String,
}

/// Fields for [`create_task`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub id: TaskId,
    pub is_abstract: bool,
    pub name: String,
    pub description: Option<String>,
    pub total_remaining_time: u64,
    pub is_parallel: bool,
    pub member: Option<MemberId>,
}

fn decode_tasks(rows: Vec<tasktree_core::Row>) -> Result<Vec<Task>, ApiError> {
    let tasks: Vec<Task> = decode_rows(rows)?;
    Ok(tasks.into_iter().map(Task::normalized).collect())
}

// ============================================================================
// QUERIES
// ============================================================================

/// Fetch specific tasks. Depends on each listed task row.
pub async fn get_tasks(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    tasks: &[TaskId],
) -> ApiResult<Vec<Task>> {
    if tasks.is_empty() {
        return Ok(Vec::new());
    }
    let key = ReadKey::new("task.get_tasks", (ctx.shard, account, project, tasks))
        .tasks(account, project, tasks);
    ctx.cache
        .get_or_compute(&key, || async {
            let placeholders = vec!["?"; tasks.len()].join(",");
            let sql = format!(
                "SELECT id, parent, firstChild, nextSibling, isAbstract, name, description, createdOn, totalRemainingTime, totalLoggedTime, minimumRemainingTime, childCount, descendantCount, isParallel, member FROM tasks WHERE account=? AND project=? AND id IN ({})",
                placeholders
            );
            let mut args = vec![json!(account), json!(project)];
            args.extend(tasks.iter().map(|t| json!(t)));
            let rows = ctx.shards.query(ctx.shard, &sql, &args).await?;
            decode_tasks(rows)
        })
        .await
}

/// Children of `parent` in sibling order, starting after `from_sibling`.
pub async fn get_child_tasks(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    parent: TaskId,
    from_sibling: Option<TaskId>,
    limit: Option<usize>,
) -> ApiResult<Vec<Task>> {
    let limit = page_limit(limit);
    let key = ReadKey::new(
        "task.get_child_tasks",
        (ctx.shard, account, project, parent, from_sibling, limit),
    )
    .task_children_set(account, project, parent);
    ctx.cache
        .get_or_compute(&key, || async {
            let rows = ctx
                .shards
                .query(
                    ctx.shard,
                    "CALL getChildTasks(?, ?, ?, ?, ?)",
                    &[
                        json!(account),
                        json!(project),
                        json!(parent),
                        json!(from_sibling),
                        json!(limit),
                    ],
                )
                .await?;
            decode_tasks(rows)
        })
        .await
}

/// Ancestors of `child`, nearest first. Uncached.
pub async fn get_ancestor_tasks(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    child: TaskId,
    limit: Option<usize>,
) -> ApiResult<Vec<Ancestor>> {
    let rows = ctx
        .shards
        .query(
            ctx.shard,
            "CALL getAncestorTasks(?, ?, ?, ?)",
            &[
                json!(account),
                json!(project),
                json!(child),
                json!(page_limit(limit)),
            ],
        )
        .await?;
    Ok(decode_rows(rows)?)
}

// ============================================================================
// MUTATIONS
// ============================================================================

pub async fn create_task(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    parent: TaskId,
    next_sibling: Option<TaskId>,
    task: &NewTask,
) -> ApiResult<()> {
    let outcome = ctx
        .shards
        .exec(
            ctx.shard,
            "CALL createTask(?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            &[
                json!(account),
                json!(project),
                json!(parent),
                json!(ctx.me),
                json!(next_sibling),
                json!(task.id),
                json!(task.is_abstract),
                json!(task.name),
                json!(task.description),
                json!(chrono::Utc::now()),
                json!(task.total_remaining_time),
                json!(task.is_parallel),
                json!(task.member),
            ],
        )
        .await?;
    let changed = changed_tasks(&outcome, &[parent])?;
    let mut key = WriteKey::new()
        .project_activities(account, project)
        .task_children_set(account, project, parent)
        .combined_task_and_task_children_sets(account, project, &changed);
    if let Some(member) = task.member {
        key = key.project_member(account, project, member);
    }
    ctx.cache.touch_audited(&key, &outcome.touched).await;
    Ok(())
}

/// Renames also invalidate the parent's child list and the time logs that
/// carry the task name.
pub async fn set_name(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    task: TaskId,
    name: &str,
) -> ApiResult<()> {
    let outcome = ctx
        .shards
        .exec(
            ctx.shard,
            "CALL setTaskName(?, ?, ?, ?, ?)",
            &[
                json!(account),
                json!(project),
                json!(task),
                json!(ctx.me),
                json!(name),
            ],
        )
        .await?;
    let key = WriteKey::new()
        .project_activities(account, project)
        .task(account, project, task);
    let key = with_reported_time_logs(with_reported_parents(key, &outcome), &outcome);
    ctx.cache.touch_audited(&key, &outcome.touched).await;
    Ok(())
}

pub async fn set_description(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    task: TaskId,
    description: Option<&str>,
) -> ApiResult<()> {
    let outcome = ctx
        .shards
        .exec(
            ctx.shard,
            "CALL setTaskDescription(?, ?, ?, ?, ?)",
            &[
                json!(account),
                json!(project),
                json!(task),
                json!(ctx.me),
                json!(description),
            ],
        )
        .await?;
    let key = WriteKey::new()
        .project_activities(account, project)
        .task(account, project, task);
    let key = with_reported_parents(key, &outcome);
    ctx.cache.touch_audited(&key, &outcome.touched).await;
    Ok(())
}

pub async fn set_is_parallel(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    task: TaskId,
    is_parallel: bool,
) -> ApiResult<()> {
    let outcome = ctx
        .shards
        .exec(
            ctx.shard,
            "CALL setTaskIsParallel(?, ?, ?, ?, ?)",
            &[
                json!(account),
                json!(project),
                json!(task),
                json!(ctx.me),
                json!(is_parallel),
            ],
        )
        .await?;
    let changed = changed_tasks(&outcome, &[task])?;
    let key = WriteKey::new()
        .project_activities(account, project)
        .combined_task_and_task_children_sets(account, project, &changed);
    ctx.cache.touch_audited(&key, &outcome.touched).await;
    Ok(())
}

/// Assign or clear the task's member. Both the new and the previous
/// assignee's project member rows change.
pub async fn set_member(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    task: TaskId,
    member: Option<MemberId>,
) -> ApiResult<()> {
    let outcome = ctx
        .shards
        .exec(
            ctx.shard,
            "CALL setTaskMember(?, ?, ?, ?, ?)",
            &[
                json!(account),
                json!(project),
                json!(task),
                json!(ctx.me),
                json!(member),
            ],
        )
        .await?;
    require_change(&outcome)?;
    let mut key = WriteKey::new()
        .project_activities(account, project)
        .task(account, project, task);
    if let Some(member) = member {
        key = key.project_member(account, project, member);
    }
    let key = with_reported_members(with_reported_parents(key, &outcome), &outcome);
    ctx.cache.touch_audited(&key, &outcome.touched).await;
    Ok(())
}

pub async fn move_task(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    task: TaskId,
    new_parent: TaskId,
    new_previous_sibling: Option<TaskId>,
) -> ApiResult<()> {
    let outcome = ctx
        .shards
        .exec(
            ctx.shard,
            "CALL moveTask(?, ?, ?, ?, ?, ?)",
            &[
                json!(account),
                json!(project),
                json!(task),
                json!(new_parent),
                json!(ctx.me),
                json!(new_previous_sibling),
            ],
        )
        .await?;
    let changed = changed_tasks(&outcome, &[task, new_parent])?;
    let key = WriteKey::new()
        .project_activities(account, project)
        .combined_task_and_task_children_sets(account, project, &changed);
    ctx.cache.touch_audited(&key, &outcome.touched).await;
    Ok(())
}

/// Deleting a subtree reports the affected ancestors, the members whose
/// totals changed and the time logs that lost their task.
pub async fn delete_task(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    task: TaskId,
) -> ApiResult<()> {
    let outcome = ctx
        .shards
        .exec(
            ctx.shard,
            "CALL deleteTask(?, ?, ?, ?)",
            &[json!(account), json!(project), json!(task), json!(ctx.me)],
        )
        .await?;
    let changed = changed_tasks(&outcome, &[task])?;
    let key = WriteKey::new()
        .project_activities(account, project)
        .combined_task_and_task_children_sets(account, project, &changed);
    let key = with_reported_time_logs(with_reported_members(key, &outcome), &outcome);
    ctx.cache.touch_audited(&key, &outcome.touched).await;
    Ok(())
}

// ============================================================================
// REPORTED ROWS
// ============================================================================

fn with_reported_parents(key: WriteKey, outcome: &ExecOutcome) -> WriteKey {
    outcome.touched.iter().fold(key, |key, row| match *row {
        TouchedRow::TaskChildren {
            account,
            project,
            parent,
        } => key.task_children_set(account, project, parent),
        _ => key,
    })
}

fn with_reported_members(key: WriteKey, outcome: &ExecOutcome) -> WriteKey {
    outcome.touched.iter().fold(key, |key, row| match *row {
        TouchedRow::ProjectMember {
            account,
            project,
            member,
        } => key.project_member(account, project, member),
        _ => key,
    })
}

fn with_reported_time_logs(key: WriteKey, outcome: &ExecOutcome) -> WriteKey {
    outcome.touched.iter().fold(key, |key, row| match *row {
        TouchedRow::TimeLog {
            account,
            project,
            time_log,
            task,
            member,
        } => key.time_log(account, project, time_log, task, member),
        _ => key,
    })
}
