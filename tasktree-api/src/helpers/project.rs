//! Project queries and mutations.
//!
//! A project row is also the root task of its tree, so task-level
//! aggregates for the root are read here from the `tasks` table.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tasktree_cache::{DependencyKeys, ReadKey, WriteKey};
use tasktree_core::shard::{decode_one, decode_rows};
use tasktree_core::{AccountId, EntityId, MemberId, ProjectId, Timestamp};

use super::{or_not_found, page_limit, require_change, Page, ShardCtx};
use crate::error::{ApiError, ApiResult};

/// Role of a member within a project. Lower is more privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum ProjectRole {
    Admin,
    Writer,
    Reader,
}

impl TryFrom<u8> for ProjectRole {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ProjectRole::Admin),
            1 => Ok(ProjectRole::Writer),
            2 => Ok(ProjectRole::Reader),
            other => Err(format!("unknown project role {}", other)),
        }
    }
}

impl From<ProjectRole> for u8 {
    fn from(role: ProjectRole) -> Self {
        role as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: ProjectId,
    pub is_archived: bool,
    pub name: String,
    pub description: Option<String>,
    pub created_on: Timestamp,
    pub start_on: Option<Timestamp>,
    pub due_on: Option<Timestamp>,
    pub is_public: bool,
    pub is_parallel: bool,
    pub total_remaining_time: u64,
    pub total_logged_time: u64,
    pub minimum_remaining_time: u64,
    pub child_count: u64,
    pub descendant_count: u64,
}

/// Fields for [`create_project`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub id: ProjectId,
    pub name: String,
    pub description: Option<String>,
    pub start_on: Option<Timestamp>,
    pub due_on: Option<Timestamp>,
    pub is_parallel: bool,
    pub is_public: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMember {
    pub id: MemberId,
    pub is_active: bool,
    pub total_remaining_time: u64,
    pub total_logged_time: u64,
    pub role: ProjectRole,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembersQuery {
    pub role: Option<ProjectRole>,
    pub name_contains: Option<String>,
    pub after: Option<MemberId>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub occurred_on: Timestamp,
    pub item: EntityId,
    pub member: MemberId,
    pub item_type: String,
    pub item_has_been_deleted: bool,
    pub action: String,
    pub item_name: Option<String>,
    pub extra_info: Option<String>,
}

/// Filters for [`get_activities`]. At most one of the time bounds may be set.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivitiesQuery {
    pub item: Option<EntityId>,
    pub member: Option<MemberId>,
    pub occurred_after: Option<Timestamp>,
    pub occurred_before: Option<Timestamp>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
struct ExistsRow {
    exists: bool,
}

// ============================================================================
// QUERIES
// ============================================================================

pub async fn get_project_exists(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
) -> ApiResult<bool> {
    let key = ReadKey::new("project.get_project_exists", (ctx.shard, account, project))
        .project(account, project);
    ctx.cache
        .get_or_compute(&key, || async {
            let rows = ctx
                .shards
                .query(
                    ctx.shard,
                    "SELECT COUNT(*) = 1 `exists` FROM projects WHERE account=? AND id=?",
                    &[json!(account), json!(project)],
                )
                .await?;
            let row: ExistsRow = decode_one(ctx.shard, rows)?;
            Ok::<_, ApiError>(row.exists)
        })
        .await
}

pub async fn get_project(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
) -> ApiResult<Project> {
    let key = ReadKey::new("project.get_project", (ctx.shard, account, project))
        .project(account, project);
    ctx.cache
        .get_or_compute(&key, || async {
            let rows = ctx
                .shards
                .query(
                    ctx.shard,
                    "SELECT p.id, p.isArchived, p.name, p.createdOn, p.startOn, p.dueOn, p.isPublic, t.description, t.totalRemainingTime, t.totalLoggedTime, t.minimumRemainingTime, t.childCount, t.descendantCount, t.isParallel FROM projects p, tasks t WHERE p.account=? AND p.id=? AND t.account=? AND t.project=? AND t.id=?",
                    &[
                        json!(account),
                        json!(project),
                        json!(account),
                        json!(project),
                        json!(project),
                    ],
                )
                .await?;
            decode_one(ctx.shard, rows).map_err(or_not_found("Project", project))
        })
        .await
}

/// Active project members ordered by role then name.
pub async fn get_members(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    query: &MembersQuery,
) -> ApiResult<Page<ProjectMember>> {
    let limit = page_limit(query.limit);
    let key = ReadKey::new(
        "project.get_members",
        (
            ctx.shard,
            account,
            project,
            query.role,
            &query.name_contains,
            query.after,
            limit,
        ),
    )
    .project_members_set(account, project);
    ctx.cache
        .get_or_compute(&key, || async {
            let mut sql = String::from(
                "SELECT p1.id, p1.isActive, p1.totalRemainingTime, p1.totalLoggedTime, p1.role FROM projectMembers p1",
            );
            let mut args = Vec::with_capacity(9);
            if query.after.is_some() {
                sql.push_str(", projectMembers p2");
            }
            sql.push_str(" WHERE p1.account=? AND p1.project=? AND p1.isActive=true");
            args.extend([json!(account), json!(project)]);
            if let Some(after) = query.after {
                sql.push_str(" AND p2.account=? AND p2.project=? AND p2.id=? AND ((p1.name>p2.name AND p1.role=p2.role) OR p1.role>p2.role)");
                args.extend([json!(account), json!(project), json!(after)]);
            }
            if let Some(role) = query.role {
                sql.push_str(" AND p1.role=?");
                args.push(json!(role));
            }
            if let Some(contains) = &query.name_contains {
                sql.push_str(" AND (p1.name LIKE ? OR p1.displayName LIKE ?)");
                let pattern = format!("%{}%", contains.trim());
                args.extend([json!(pattern), json!(pattern)]);
            }
            sql.push_str(" ORDER BY p1.role ASC, p1.name ASC LIMIT ?");
            args.push(json!(limit + 1));

            let rows = ctx.shards.query(ctx.shard, &sql, &args).await?;
            Ok::<_, ApiError>(Page::from_overfetch(decode_rows(rows)?, limit))
        })
        .await
}

pub async fn get_member(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    member: MemberId,
) -> ApiResult<ProjectMember> {
    let key = ReadKey::new("project.get_member", (ctx.shard, account, project, member))
        .project_member(account, project, member);
    ctx.cache
        .get_or_compute(&key, || async {
            let rows = ctx
                .shards
                .query(
                    ctx.shard,
                    "SELECT id, isActive, totalRemainingTime, totalLoggedTime, role FROM projectMembers WHERE account=? AND project=? AND id=?",
                    &[json!(account), json!(project), json!(member)],
                )
                .await?;
            decode_one(ctx.shard, rows).map_err(or_not_found("ProjectMember", member))
        })
        .await
}

pub async fn get_activities(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    query: &ActivitiesQuery,
) -> ApiResult<Vec<Activity>> {
    if query.occurred_after.is_some() && query.occurred_before.is_some() {
        return Err(ApiError::invalid_input(
            "occurredAfter and occurredBefore are mutually exclusive",
        ));
    }
    let limit = page_limit(query.limit);
    let key = ReadKey::new(
        "project.get_activities",
        (
            ctx.shard,
            account,
            project,
            query.item,
            query.member,
            query.occurred_after,
            query.occurred_before,
            limit,
        ),
    )
    .project_activities(account, project);
    ctx.cache
        .get_or_compute(&key, || async {
            let mut sql = String::from(
                "SELECT occurredOn, item, member, itemType, itemHasBeenDeleted, action, itemName, extraInfo FROM projectActivities WHERE account=? AND project=?",
            );
            let mut args = vec![json!(account), json!(project)];
            if let Some(item) = query.item {
                sql.push_str(" AND item=?");
                args.push(json!(item));
            }
            if let Some(member) = query.member {
                sql.push_str(" AND member=?");
                args.push(json!(member));
            }
            match (query.occurred_after, query.occurred_before) {
                (Some(after), _) => {
                    sql.push_str(" AND occurredOn>? ORDER BY occurredOn ASC");
                    args.push(json!(after));
                }
                (None, Some(before)) => {
                    sql.push_str(" AND occurredOn<? ORDER BY occurredOn DESC");
                    args.push(json!(before));
                }
                (None, None) => sql.push_str(" ORDER BY occurredOn DESC"),
            }
            sql.push_str(" LIMIT ?");
            args.push(json!(limit));

            let rows = ctx.shards.query(ctx.shard, &sql, &args).await?;
            Ok::<_, ApiError>(decode_rows(rows)?)
        })
        .await
}

// ============================================================================
// MUTATIONS
// ============================================================================

/// Also bumps the new project's own key so a cached "does not exist"
/// answer cannot outlive the insert.
pub async fn create_project(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: &NewProject,
) -> ApiResult<()> {
    let outcome = ctx
        .shards
        .exec(
            ctx.shard,
            "CALL createProject(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            &[
                json!(account),
                json!(project.id),
                json!(ctx.me),
                json!(project.name),
                json!(project.description),
                json!(chrono::Utc::now()),
                json!(project.start_on),
                json!(project.due_on),
                json!(project.is_parallel),
                json!(project.is_public),
            ],
        )
        .await?;
    let key = WriteKey::new()
        .account_activities(account)
        .account_projects_set(account)
        .project(account, project.id);
    ctx.cache.touch_audited(&key, &outcome.touched).await;
    Ok(())
}

pub async fn set_is_public(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    is_public: bool,
) -> ApiResult<()> {
    let outcome = ctx
        .shards
        .exec(
            ctx.shard,
            "CALL setProjectIsPublic(?, ?, ?, ?)",
            &[json!(account), json!(project), json!(ctx.me), json!(is_public)],
        )
        .await?;
    let key = WriteKey::new()
        .account_activities(account)
        .project(account, project)
        .project_activities(account, project);
    ctx.cache.touch_audited(&key, &outcome.touched).await;
    Ok(())
}

pub async fn set_is_archived(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    is_archived: bool,
) -> ApiResult<()> {
    let outcome = ctx
        .shards
        .exec(
            ctx.shard,
            "CALL setProjectIsArchived(?, ?, ?, ?)",
            &[json!(account), json!(project), json!(ctx.me), json!(is_archived)],
        )
        .await?;
    let key = WriteKey::new()
        .project(account, project)
        .project_activities(account, project);
    ctx.cache.touch_audited(&key, &outcome.touched).await;
    Ok(())
}

/// Bumping the project master orphans every record under the project.
pub async fn delete_project(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
) -> ApiResult<()> {
    let outcome = ctx
        .shards
        .exec(
            ctx.shard,
            "CALL deleteProject(?, ?, ?)",
            &[json!(account), json!(project), json!(ctx.me)],
        )
        .await?;
    let key = WriteKey::new()
        .account_projects_set(account)
        .project_master(account, project)
        .project(account, project);
    ctx.cache.touch_audited(&key, &outcome.touched).await;
    Ok(())
}

pub async fn add_member_or_set_active(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    member: MemberId,
    role: ProjectRole,
) -> ApiResult<()> {
    member_change(
        ctx,
        "CALL addProjectMemberOrSetActive(?, ?, ?, ?, ?)",
        account,
        project,
        member,
        Some(role),
    )
    .await
}

pub async fn set_member_role(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    member: MemberId,
    role: ProjectRole,
) -> ApiResult<()> {
    member_change(
        ctx,
        "CALL setProjectMemberRole(?, ?, ?, ?, ?)",
        account,
        project,
        member,
        Some(role),
    )
    .await
}

pub async fn set_member_inactive(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    member: MemberId,
) -> ApiResult<()> {
    member_change(
        ctx,
        "CALL setProjectMemberInactive(?, ?, ?, ?)",
        account,
        project,
        member,
        None,
    )
    .await
}

async fn member_change(
    ctx: ShardCtx<'_>,
    sql: &str,
    account: AccountId,
    project: ProjectId,
    member: MemberId,
    role: Option<ProjectRole>,
) -> ApiResult<()> {
    let mut args = vec![json!(account), json!(project), json!(ctx.me), json!(member)];
    if let Some(role) = role {
        args.push(json!(role));
    }
    let outcome = ctx.shards.exec(ctx.shard, sql, &args).await?;
    require_change(&outcome)?;
    let key = WriteKey::new()
        .project_member(account, project, member)
        .project_activities(account, project);
    ctx.cache.touch_audited(&key, &outcome.touched).await;
    Ok(())
}
