//! Time log queries and mutations.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tasktree_cache::{DependencyKeys, ReadKey, WriteKey};
use tasktree_core::shard::{decode_one, decode_rows};
use tasktree_core::{AccountId, MemberId, ProjectId, TaskId, TimeLogId, Timestamp};

use super::{changed_tasks, or_not_found, page_limit, require_change, Page, ShardCtx};
use crate::error::{ApiError, ApiResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeLog {
    pub project: ProjectId,
    pub task: TaskId,
    pub id: TimeLogId,
    pub member: MemberId,
    pub logged_on: Timestamp,
    pub task_has_been_deleted: bool,
    pub task_name: String,
    pub duration: u64,
    pub note: Option<String>,
}

/// Filters for [`get_time_logs`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeLogsQuery {
    pub task: Option<TaskId>,
    pub member: Option<MemberId>,
    pub time_log: Option<TimeLogId>,
    #[serde(default)]
    pub sort_asc: bool,
    pub after: Option<TimeLogId>,
    pub limit: Option<usize>,
}

/// Identifies one log and the filtered sets it belongs to.
#[derive(Debug, Clone, Copy)]
pub struct TimeLogRef {
    pub account: AccountId,
    pub project: ProjectId,
    pub task: TaskId,
    pub member: MemberId,
    pub time_log: TimeLogId,
}

impl TimeLogRef {
    /// The log itself, its containing sets and the project activity feed.
    fn write_key(&self) -> WriteKey {
        WriteKey::new()
            .time_log(
                self.account,
                self.project,
                self.time_log,
                Some(self.task),
                Some(self.member),
            )
            .project_activities(self.account, self.project)
    }
}

// ============================================================================
// QUERIES
// ============================================================================

pub async fn get_time_log(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    time_log: TimeLogId,
) -> ApiResult<TimeLog> {
    let key = ReadKey::new("timelog.get_time_log", (ctx.shard, account, project, time_log))
        .time_log(account, project, time_log, None, None);
    ctx.cache
        .get_or_compute(&key, || async {
            let rows = ctx
                .shards
                .query(
                    ctx.shard,
                    "SELECT project, task, id, member, loggedOn, taskHasBeenDeleted, taskName, duration, note FROM timeLogs WHERE account=? AND project=? AND id=?",
                    &[json!(account), json!(project), json!(time_log)],
                )
                .await?;
            decode_one(ctx.shard, rows).map_err(or_not_found("TimeLog", time_log))
        })
        .await
}

/// Filtered listing. The dependency set narrows to the task and member sets
/// when those filters are present and falls back to the project set.
pub async fn get_time_logs(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    query: &TimeLogsQuery,
) -> ApiResult<Page<TimeLog>> {
    if let Some(time_log) = query.time_log {
        let log = get_time_log(ctx, account, project, time_log).await?;
        return Ok(Page {
            items: vec![log],
            more: false,
        });
    }

    let limit = page_limit(query.limit);
    let mut key = ReadKey::new(
        "timelog.get_time_logs",
        (
            ctx.shard,
            account,
            project,
            query.task,
            query.member,
            query.sort_asc,
            query.after,
            limit,
        ),
    );
    if let Some(task) = query.task {
        key = key.task_time_log_set(account, project, task);
    }
    if let Some(member) = query.member {
        key = key.project_member_time_log_set(account, project, member);
    }
    if query.task.is_none() && query.member.is_none() {
        key = key.project_time_log_set(account, project);
    }

    ctx.cache
        .get_or_compute(&key, || async {
            let (cmp, dir) = if query.sort_asc { (">", "ASC") } else { ("<", "DESC") };
            let mut sql = String::from(
                "SELECT project, task, id, member, loggedOn, taskHasBeenDeleted, taskName, duration, note FROM timeLogs WHERE account=? AND project=?",
            );
            let mut args = vec![json!(account), json!(project)];
            if let Some(task) = query.task {
                sql.push_str(" AND task=?");
                args.push(json!(task));
            }
            if let Some(member) = query.member {
                sql.push_str(" AND member=?");
                args.push(json!(member));
            }
            if let Some(after) = query.after {
                sql.push_str(&format!(
                    " AND loggedOn {cmp}= (SELECT loggedOn FROM timeLogs WHERE account=? AND project=? AND id=?) AND id {cmp} ?"
                ));
                args.extend([json!(account), json!(project), json!(after), json!(after)]);
            }
            sql.push_str(&format!(" ORDER BY loggedOn {dir}, id {dir} LIMIT ?"));
            args.push(json!(limit + 1));

            let rows = ctx.shards.query(ctx.shard, &sql, &args).await?;
            Ok::<_, ApiError>(Page::from_overfetch(decode_rows(rows)?, limit))
        })
        .await
}

// ============================================================================
// MUTATIONS
// ============================================================================

/// Changing a duration moves logged-time aggregates up the tree.
pub async fn set_duration(ctx: ShardCtx<'_>, log: TimeLogRef, duration: u64) -> ApiResult<()> {
    let outcome = ctx
        .shards
        .exec(
            ctx.shard,
            "CALL setTimeLogDuration(?, ?, ?, ?, ?)",
            &[
                json!(log.account),
                json!(log.project),
                json!(log.time_log),
                json!(ctx.me),
                json!(duration),
            ],
        )
        .await?;
    let changed = changed_tasks(&outcome, &[log.task])?;
    let key = log
        .write_key()
        .combined_task_and_task_children_sets(log.account, log.project, &changed)
        .project_member(log.account, log.project, log.member);
    ctx.cache.touch_audited(&key, &outcome.touched).await;
    Ok(())
}

pub async fn set_note(ctx: ShardCtx<'_>, log: TimeLogRef, note: Option<&str>) -> ApiResult<()> {
    let outcome = ctx
        .shards
        .exec(
            ctx.shard,
            "CALL setTimeLogNote(?, ?, ?, ?, ?)",
            &[
                json!(log.account),
                json!(log.project),
                json!(log.time_log),
                json!(ctx.me),
                json!(note),
            ],
        )
        .await?;
    require_change(&outcome)?;
    ctx.cache.touch_audited(&log.write_key(), &outcome.touched).await;
    Ok(())
}

pub async fn delete_time_log(ctx: ShardCtx<'_>, log: TimeLogRef) -> ApiResult<()> {
    let outcome = ctx
        .shards
        .exec(
            ctx.shard,
            "CALL deleteTimeLog(?, ?, ?, ?)",
            &[
                json!(log.account),
                json!(log.project),
                json!(log.time_log),
                json!(ctx.me),
            ],
        )
        .await?;
    let changed = changed_tasks(&outcome, &[log.task])?;
    let key = log
        .write_key()
        .combined_task_and_task_children_sets(log.account, log.project, &changed)
        .project_member(log.account, log.project, log.member);
    ctx.cache.touch_audited(&key, &outcome.touched).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tasktree_cache::{DlmKey, DlmTag};
    use uuid::Uuid;

    #[test]
    fn test_time_log_write_key_covers_filtered_sets() {
        let log = TimeLogRef {
            account: Uuid::now_v7(),
            project: Uuid::now_v7(),
            task: Uuid::now_v7(),
            member: Uuid::now_v7(),
            time_log: Uuid::now_v7(),
        };
        let key = log.write_key();
        for expected in [
            DlmKey::new(DlmTag::TimeLog, &[log.time_log]),
            DlmKey::new(DlmTag::ProjectTimeLogSet, &[log.project]),
            DlmKey::new(DlmTag::TaskTimeLogSet, &[log.task]),
            DlmKey::new(DlmTag::ProjectMemberTimeLogSet, &[log.project, log.member]),
            DlmKey::new(DlmTag::ProjectActivities, &[log.project]),
        ] {
            assert!(key.contains(&expected), "missing {}", expected.as_str());
        }
    }

    #[test]
    fn test_time_logs_query_defaults_to_descending() {
        let query: TimeLogsQuery = serde_json::from_value(json!({})).unwrap();
        assert!(!query.sort_asc);
        assert!(query.task.is_none());
    }
}
