//! Task tree routes.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use tasktree_core::{AccountId, MemberId, ProjectId, ShardId, TaskId};

use super::Actor;
use crate::error::ApiResult;
use crate::helpers::task::{self, Ancestor, NewTask, Task};
use crate::middleware::CacheCtx;
use crate::state::AppState;

type TaskPath = Path<(ShardId, AccountId, ProjectId, TaskId)>;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChildrenQuery {
    pub from_sibling: Option<TaskId>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct AncestorsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTaskRequest {
    #[serde(flatten)]
    pub task: NewTask,
    pub next_sibling: Option<TaskId>,
}

#[derive(Debug, Deserialize)]
pub struct SetNameRequest {
    pub name: String,
}

#[derive(Debug, Deserialize)]
pub struct SetDescriptionRequest {
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetIsParallelRequest {
    pub is_parallel: bool,
}

#[derive(Debug, Deserialize)]
pub struct SetMemberRequest {
    pub member: Option<MemberId>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveTaskRequest {
    pub new_parent: TaskId,
    pub new_previous_sibling: Option<TaskId>,
}

#[derive(Debug, Deserialize)]
pub struct GetTasksRequest {
    pub tasks: Vec<TaskId>,
}

/// POST .../projects/:project/tasks/query
pub async fn get_tasks(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project)): Path<(ShardId, AccountId, ProjectId)>,
    Json(req): Json<GetTasksRequest>,
) -> ApiResult<Json<Vec<Task>>> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    Ok(Json(task::get_tasks(ctx, account, project, &req.tasks).await?))
}

/// GET .../tasks/:task/children
pub async fn get_child_tasks(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project, parent)): TaskPath,
    Query(query): Query<ChildrenQuery>,
) -> ApiResult<Json<Vec<Task>>> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    let children =
        task::get_child_tasks(ctx, account, project, parent, query.from_sibling, query.limit)
            .await?;
    Ok(Json(children))
}

/// POST .../tasks/:task/children
pub async fn create_task(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project, parent)): TaskPath,
    Json(req): Json<CreateTaskRequest>,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    task::create_task(ctx, account, project, parent, req.next_sibling, &req.task).await?;
    Ok(StatusCode::CREATED)
}

/// GET .../tasks/:task/ancestors
pub async fn get_ancestor_tasks(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project, child)): TaskPath,
    Query(query): Query<AncestorsQuery>,
) -> ApiResult<Json<Vec<Ancestor>>> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    Ok(Json(
        task::get_ancestor_tasks(ctx, account, project, child, query.limit).await?,
    ))
}

/// PUT .../tasks/:task/name
pub async fn set_name(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project, task_id)): TaskPath,
    Json(req): Json<SetNameRequest>,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    task::set_name(ctx, account, project, task_id, &req.name).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT .../tasks/:task/description
pub async fn set_description(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project, task_id)): TaskPath,
    Json(req): Json<SetDescriptionRequest>,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    task::set_description(ctx, account, project, task_id, req.description.as_deref()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT .../tasks/:task/is-parallel
pub async fn set_is_parallel(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project, task_id)): TaskPath,
    Json(req): Json<SetIsParallelRequest>,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    task::set_is_parallel(ctx, account, project, task_id, req.is_parallel).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT .../tasks/:task/member
pub async fn set_member(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project, task_id)): TaskPath,
    Json(req): Json<SetMemberRequest>,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    task::set_member(ctx, account, project, task_id, req.member).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT .../tasks/:task/parent
pub async fn move_task(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project, task_id)): TaskPath,
    Json(req): Json<MoveTaskRequest>,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    task::move_task(
        ctx,
        account,
        project,
        task_id,
        req.new_parent,
        req.new_previous_sibling,
    )
    .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE .../tasks/:task
pub async fn delete_task(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project, task_id)): TaskPath,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    task::delete_task(ctx, account, project, task_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn create_router() -> Router<AppState> {
    const BASE: &str = "/api/v1/shards/:shard/accounts/:account/projects/:project/tasks";
    Router::new()
        .route(&format!("{BASE}/query"), post(get_tasks))
        .route(&format!("{BASE}/:task"), axum::routing::delete(delete_task))
        .route(
            &format!("{BASE}/:task/children"),
            get(get_child_tasks).post(create_task),
        )
        .route(&format!("{BASE}/:task/ancestors"), get(get_ancestor_tasks))
        .route(&format!("{BASE}/:task/name"), put(set_name))
        .route(&format!("{BASE}/:task/description"), put(set_description))
        .route(&format!("{BASE}/:task/is-parallel"), put(set_is_parallel))
        .route(&format!("{BASE}/:task/member"), put(set_member))
        .route(&format!("{BASE}/:task/parent"), put(move_task))
}
