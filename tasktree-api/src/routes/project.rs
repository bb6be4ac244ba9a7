//! Project routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use tasktree_core::{AccountId, MemberId, ProjectId, ShardId};

use super::Actor;
use crate::error::ApiResult;
use crate::helpers::project::{
    self, ActivitiesQuery, Activity, MembersQuery, NewProject, Project, ProjectMember, ProjectRole,
};
use crate::helpers::Page;
use crate::middleware::CacheCtx;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AddMemberRequest {
    pub id: MemberId,
    pub role: ProjectRole,
}

#[derive(Debug, Deserialize)]
pub struct SetRoleRequest {
    pub role: ProjectRole,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetFlagRequest {
    pub value: bool,
}

/// POST /api/v1/shards/:shard/accounts/:account/projects
pub async fn create_project(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account)): Path<(ShardId, AccountId)>,
    Json(req): Json<NewProject>,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    project::create_project(ctx, account, &req).await?;
    Ok(StatusCode::CREATED)
}

/// GET /api/v1/shards/:shard/accounts/:account/projects/:project
pub async fn get_project(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project_id)): Path<(ShardId, AccountId, ProjectId)>,
) -> ApiResult<Json<Project>> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    Ok(Json(project::get_project(ctx, account, project_id).await?))
}

/// DELETE /api/v1/shards/:shard/accounts/:account/projects/:project
pub async fn delete_project(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project_id)): Path<(ShardId, AccountId, ProjectId)>,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    project::delete_project(ctx, account, project_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/shards/:shard/accounts/:account/projects/:project/is-public
pub async fn set_is_public(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project_id)): Path<(ShardId, AccountId, ProjectId)>,
    Json(req): Json<SetFlagRequest>,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    project::set_is_public(ctx, account, project_id, req.value).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/shards/:shard/accounts/:account/projects/:project/is-archived
pub async fn set_is_archived(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project_id)): Path<(ShardId, AccountId, ProjectId)>,
    Json(req): Json<SetFlagRequest>,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    project::set_is_archived(ctx, account, project_id, req.value).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/shards/:shard/accounts/:account/projects/:project/members
pub async fn get_members(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project_id)): Path<(ShardId, AccountId, ProjectId)>,
    Query(query): Query<MembersQuery>,
) -> ApiResult<Json<Page<ProjectMember>>> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    Ok(Json(project::get_members(ctx, account, project_id, &query).await?))
}

/// POST /api/v1/shards/:shard/accounts/:account/projects/:project/members
pub async fn add_member(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project_id)): Path<(ShardId, AccountId, ProjectId)>,
    Json(req): Json<AddMemberRequest>,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    project::add_member_or_set_active(ctx, account, project_id, req.id, req.role).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/shards/:shard/accounts/:account/projects/:project/members/:member
pub async fn get_member(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project_id, member)): Path<(ShardId, AccountId, ProjectId, MemberId)>,
) -> ApiResult<Json<ProjectMember>> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    Ok(Json(project::get_member(ctx, account, project_id, member).await?))
}

/// DELETE /api/v1/shards/:shard/accounts/:account/projects/:project/members/:member
pub async fn remove_member(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project_id, member)): Path<(ShardId, AccountId, ProjectId, MemberId)>,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    project::set_member_inactive(ctx, account, project_id, member).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/v1/shards/:shard/accounts/:account/projects/:project/members/:member/role
pub async fn set_member_role(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project_id, member)): Path<(ShardId, AccountId, ProjectId, MemberId)>,
    Json(req): Json<SetRoleRequest>,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    project::set_member_role(ctx, account, project_id, member, req.role).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/shards/:shard/accounts/:account/projects/:project/activities
pub async fn get_activities(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project_id)): Path<(ShardId, AccountId, ProjectId)>,
    Query(query): Query<ActivitiesQuery>,
) -> ApiResult<Json<Vec<Activity>>> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    Ok(Json(project::get_activities(ctx, account, project_id, &query).await?))
}

pub fn create_router() -> Router<AppState> {
    const BASE: &str = "/api/v1/shards/:shard/accounts/:account/projects";
    Router::new()
        .route(BASE, post(create_project))
        .route(&format!("{BASE}/:project"), get(get_project).delete(delete_project))
        .route(&format!("{BASE}/:project/is-public"), put(set_is_public))
        .route(&format!("{BASE}/:project/is-archived"), put(set_is_archived))
        .route(&format!("{BASE}/:project/members"), get(get_members).post(add_member))
        .route(
            &format!("{BASE}/:project/members/:member"),
            get(get_member).delete(remove_member),
        )
        .route(&format!("{BASE}/:project/members/:member/role"), put(set_member_role))
        .route(&format!("{BASE}/:project/activities"), get(get_activities))
}
