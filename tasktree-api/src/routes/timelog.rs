//! Time log routes.
//!
//! Mutations look the log up first to learn the task and member whose
//! filtered listings it belongs to.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, put},
    Json, Router,
};
use serde::Deserialize;
use tasktree_core::{AccountId, ProjectId, ShardId, TimeLogId};

use super::Actor;
use crate::error::ApiResult;
use crate::helpers::timelog::{self, TimeLog, TimeLogRef, TimeLogsQuery};
use crate::helpers::{Page, ShardCtx};
use crate::middleware::CacheCtx;
use crate::state::AppState;

type TimeLogPath = Path<(ShardId, AccountId, ProjectId, TimeLogId)>;

#[derive(Debug, Deserialize)]
pub struct SetDurationRequest {
    pub duration: u64,
}

#[derive(Debug, Deserialize)]
pub struct SetNoteRequest {
    pub note: Option<String>,
}

async fn resolve(
    ctx: ShardCtx<'_>,
    account: AccountId,
    project: ProjectId,
    time_log: TimeLogId,
) -> ApiResult<TimeLogRef> {
    let log = timelog::get_time_log(ctx, account, project, time_log).await?;
    Ok(TimeLogRef {
        account,
        project,
        task: log.task,
        member: log.member,
        time_log,
    })
}

/// GET .../projects/:project/time-logs
pub async fn get_time_logs(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project)): Path<(ShardId, AccountId, ProjectId)>,
    Query(query): Query<TimeLogsQuery>,
) -> ApiResult<Json<Page<TimeLog>>> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    Ok(Json(timelog::get_time_logs(ctx, account, project, &query).await?))
}

/// GET .../time-logs/:time_log
pub async fn get_time_log(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project, time_log)): TimeLogPath,
) -> ApiResult<Json<TimeLog>> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    Ok(Json(timelog::get_time_log(ctx, account, project, time_log).await?))
}

/// PUT .../time-logs/:time_log/duration
pub async fn set_duration(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project, time_log)): TimeLogPath,
    Json(req): Json<SetDurationRequest>,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    let log = resolve(ctx, account, project, time_log).await?;
    timelog::set_duration(ctx, log, req.duration).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT .../time-logs/:time_log/note
pub async fn set_note(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project, time_log)): TimeLogPath,
    Json(req): Json<SetNoteRequest>,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    let log = resolve(ctx, account, project, time_log).await?;
    timelog::set_note(ctx, log, req.note.as_deref()).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// DELETE .../time-logs/:time_log
pub async fn delete_time_log(
    State(state): State<AppState>,
    cache: CacheCtx,
    Actor(me): Actor,
    Path((shard, account, project, time_log)): TimeLogPath,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, shard, me)?;
    let log = resolve(ctx, account, project, time_log).await?;
    timelog::delete_time_log(ctx, log).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn create_router() -> Router<AppState> {
    const BASE: &str = "/api/v1/shards/:shard/accounts/:account/projects/:project/time-logs";
    Router::new()
        .route(BASE, get(get_time_logs))
        .route(
            &format!("{BASE}/:time_log"),
            get(get_time_log).delete(delete_time_log),
        )
        .route(&format!("{BASE}/:time_log/duration"), put(set_duration))
        .route(&format!("{BASE}/:time_log/note"), put(set_note))
}
