//! Account routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use tasktree_core::{AccountId, MemberId, ShardId};

use super::Actor;
use crate::error::ApiResult;
use crate::helpers::account::{self, AccountMember, AccountRole, MembersQuery};
use crate::helpers::Page;
use crate::middleware::CacheCtx;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: AccountRole,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetPublicProjectsEnabledRequest {
    pub enabled: bool,
}

/// GET /api/v1/shards/:shard/accounts/:account/members
pub async fn get_members(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account_id)): Path<(ShardId, AccountId)>,
    Query(query): Query<MembersQuery>,
) -> ApiResult<Json<Page<AccountMember>>> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    Ok(Json(account::get_members(ctx, account_id, &query).await?))
}

/// GET /api/v1/shards/:shard/accounts/:account/members/:member
pub async fn get_member(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account_id, member)): Path<(ShardId, AccountId, MemberId)>,
) -> ApiResult<Json<AccountMember>> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    Ok(Json(account::get_member(ctx, account_id, member).await?))
}

/// PUT /api/v1/shards/:shard/accounts/:account/members/:member/role
pub async fn set_member_role(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account_id, member)): Path<(ShardId, AccountId, MemberId)>,
    Json(req): Json<SetRoleRequest>,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    account::set_member_role(ctx, account_id, member, req.role).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/shards/:shard/accounts/:account/public-projects-enabled
pub async fn get_public_projects_enabled(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account_id)): Path<(ShardId, AccountId)>,
) -> ApiResult<Json<bool>> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    Ok(Json(account::get_public_projects_enabled(ctx, account_id).await?))
}

/// PUT /api/v1/shards/:shard/accounts/:account/public-projects-enabled
pub async fn set_public_projects_enabled(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account_id)): Path<(ShardId, AccountId)>,
    Json(req): Json<SetPublicProjectsEnabledRequest>,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    account::set_public_projects_enabled(ctx, account_id, req.enabled).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/shards/:shard/accounts/:account/members", get(get_members))
        .route(
            "/api/v1/shards/:shard/accounts/:account/members/:member",
            get(get_member),
        )
        .route(
            "/api/v1/shards/:shard/accounts/:account/members/:member/role",
            put(set_member_role),
        )
        .route(
            "/api/v1/shards/:shard/accounts/:account/public-projects-enabled",
            get(get_public_projects_enabled).put(set_public_projects_enabled),
        )
}
