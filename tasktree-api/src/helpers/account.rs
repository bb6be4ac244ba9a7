//! Account-level queries and mutations.

use serde::{Deserialize, Serialize};
use serde_json::json;
use tasktree_cache::{DependencyKeys, ReadKey, WriteKey};
use tasktree_core::shard::{decode_one, decode_rows};
use tasktree_core::{AccountId, ExecOutcome, MemberId, ProjectId, TouchedRow};

use super::{or_not_found, page_limit, require_change, Page, ShardCtx};
use crate::error::{ApiError, ApiResult};

/// Role of a member within an account. Lower is more privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum AccountRole {
    Owner,
    Admin,
    Member,
}

impl TryFrom<u8> for AccountRole {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(AccountRole::Owner),
            1 => Ok(AccountRole::Admin),
            2 => Ok(AccountRole::Member),
            other => Err(format!("unknown account role {}", other)),
        }
    }
}

impl From<AccountRole> for u8 {
    fn from(role: AccountRole) -> Self {
        role as u8
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountMember {
    pub id: MemberId,
    pub name: String,
    pub display_name: Option<String>,
    pub has_avatar: bool,
    pub is_active: bool,
    pub role: AccountRole,
}

/// Filters for [`get_members`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembersQuery {
    pub role: Option<AccountRole>,
    pub name_contains: Option<String>,
    pub after: Option<MemberId>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RolesRow {
    account_role: Option<AccountRole>,
    project_role: Option<super::project::ProjectRole>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EnabledRow {
    public_projects_enabled: bool,
}

// ============================================================================
// QUERIES
// ============================================================================

/// The member's active account role, if any.
pub async fn get_account_role(
    ctx: ShardCtx<'_>,
    account: AccountId,
    member: MemberId,
) -> ApiResult<Option<AccountRole>> {
    let key = ReadKey::new("account.get_account_role", (ctx.shard, account, member))
        .account_member(account, member);
    ctx.cache
        .get_or_compute(&key, || async {
            let rows = ctx
                .shards
                .query(
                    ctx.shard,
                    "SELECT role accountRole, NULL projectRole FROM accountMembers WHERE account=? AND isActive=true AND id=?",
                    &[json!(account), json!(member)],
                )
                .await?;
            let roles: Vec<RolesRow> = decode_rows(rows)?;
            Ok::<_, ApiError>(roles.into_iter().next().and_then(|r| r.account_role))
        })
        .await
}

/// The member's account and project roles in one lookup. Depends on both
/// the account member and the project member.
pub async fn get_account_and_project_roles(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    member: MemberId,
) -> ApiResult<(Option<AccountRole>, Option<super::project::ProjectRole>)> {
    let key = ReadKey::new(
        "account.get_account_and_project_roles",
        (ctx.shard, account, project, member),
    )
    .account_member(account, member)
    .project_member(account, project, member);
    ctx.cache
        .get_or_compute(&key, || async {
            let rows = ctx
                .shards
                .query(
                    ctx.shard,
                    "SELECT role accountRole, (SELECT role FROM projectMembers WHERE account=? AND isActive=true AND project=? AND id=?) projectRole FROM accountMembers WHERE account=? AND isActive=true AND id=?",
                    &[
                        json!(account),
                        json!(project),
                        json!(member),
                        json!(account),
                        json!(member),
                    ],
                )
                .await?;
            let roles: Vec<RolesRow> = decode_rows(rows)?;
            Ok::<_, ApiError>(
                roles
                    .into_iter()
                    .next()
                    .map(|r| (r.account_role, r.project_role))
                    .unwrap_or((None, None)),
            )
        })
        .await
}

pub async fn get_public_projects_enabled(ctx: ShardCtx<'_>, account: AccountId) -> ApiResult<bool> {
    let key = ReadKey::new("account.get_public_projects_enabled", (ctx.shard, account))
        .account(account);
    ctx.cache
        .get_or_compute(&key, || async {
            let rows = ctx
                .shards
                .query(
                    ctx.shard,
                    "SELECT publicProjectsEnabled FROM accounts WHERE id=?",
                    &[json!(account)],
                )
                .await?;
            let row: EnabledRow = decode_one(ctx.shard, rows)?;
            Ok::<_, ApiError>(row.public_projects_enabled)
        })
        .await
}

pub async fn get_member(
    ctx: ShardCtx<'_>,
    account: AccountId,
    member: MemberId,
) -> ApiResult<AccountMember> {
    let key = ReadKey::new("account.get_member", (ctx.shard, account, member))
        .account_member(account, member);
    ctx.cache
        .get_or_compute(&key, || async {
            let rows = ctx
                .shards
                .query(
                    ctx.shard,
                    "SELECT id, name, displayName, hasAvatar, isActive, role FROM accountMembers WHERE account=? AND id=?",
                    &[json!(account), json!(member)],
                )
                .await?;
            decode_one(ctx.shard, rows).map_err(or_not_found("AccountMember", member))
        })
        .await
}

/// Active members ordered by role then name.
pub async fn get_members(
    ctx: ShardCtx<'_>,
    account: AccountId,
    query: &MembersQuery,
) -> ApiResult<Page<AccountMember>> {
    let limit = page_limit(query.limit);
    let key = ReadKey::new(
        "account.get_members",
        (
            ctx.shard,
            account,
            query.role,
            &query.name_contains,
            query.after,
            limit,
        ),
    )
    .account_members_set(account);
    ctx.cache
        .get_or_compute(&key, || async {
            let mut sql = String::from(
                "SELECT a1.id, a1.name, a1.displayName, a1.hasAvatar, a1.isActive, a1.role FROM accountMembers a1",
            );
            let mut args = Vec::with_capacity(7);
            if query.after.is_some() {
                sql.push_str(", accountMembers a2");
            }
            sql.push_str(" WHERE a1.account=? AND a1.isActive=true");
            args.push(json!(account));
            if let Some(after) = query.after {
                sql.push_str(" AND a2.account=? AND a2.id=? AND ((a1.name>a2.name AND a1.role=a2.role) OR a1.role>a2.role)");
                args.extend([json!(account), json!(after)]);
            }
            if let Some(role) = query.role {
                sql.push_str(" AND a1.role=?");
                args.push(json!(role));
            }
            if let Some(contains) = &query.name_contains {
                sql.push_str(" AND (a1.name LIKE ? OR a1.displayName LIKE ?)");
                let pattern = format!("%{}%", contains.trim());
                args.extend([json!(pattern), json!(pattern)]);
            }
            sql.push_str(" ORDER BY a1.role ASC, a1.name ASC LIMIT ?");
            args.push(json!(limit + 1));

            let rows = ctx.shards.query(ctx.shard, &sql, &args).await?;
            Ok::<_, ApiError>(Page::from_overfetch(decode_rows(rows)?, limit))
        })
        .await
}

// ============================================================================
// MUTATIONS
// ============================================================================

/// Disabling public projects may flip projects to private, so the project
/// listing and every project the shard reports as changed go too.
pub async fn set_public_projects_enabled(
    ctx: ShardCtx<'_>,
    account: AccountId,
    enabled: bool,
) -> ApiResult<()> {
    let outcome = ctx
        .shards
        .exec(
            ctx.shard,
            "CALL setPublicProjectsEnabled(?, ?, ?)",
            &[json!(account), json!(ctx.me), json!(enabled)],
        )
        .await?;
    let mut key = WriteKey::new().account(account).account_activities(account);
    if !enabled {
        key = key.account_projects_set(account);
    }
    let key = with_reported_projects(key, &outcome);
    ctx.cache.touch_audited(&key, &outcome.touched).await;
    Ok(())
}

pub async fn set_member_role(
    ctx: ShardCtx<'_>,
    account: AccountId,
    member: MemberId,
    role: AccountRole,
) -> ApiResult<()> {
    let outcome = ctx
        .shards
        .exec(
            ctx.shard,
            "CALL setAccountMemberRole(?, ?, ?, ?)",
            &[json!(account), json!(ctx.me), json!(member), json!(role)],
        )
        .await?;
    require_change(&outcome)?;
    let key = WriteKey::new()
        .account_member(account, member)
        .account_activities(account);
    ctx.cache.touch_audited(&key, &outcome.touched).await;
    Ok(())
}

fn with_reported_projects(key: WriteKey, outcome: &ExecOutcome) -> WriteKey {
    outcome.touched.iter().fold(key, |key, row| match *row {
        TouchedRow::Project { account, project } => key.project(account, project),
        _ => key,
    })
}
