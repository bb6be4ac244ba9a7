//! Private inter-region routes.
//!
//! Mounted behind [`private_rpc_middleware`](crate::middleware::private_rpc_middleware):
//! by the time a handler runs the call is signed, fresh and unseen.
//! `GET` calls carry their JSON arguments in the `args` parameter, other
//! methods in the body.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tasktree_core::{AccountId, MemberId, ProjectId, ShardId};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::helpers::account::{self, AccountRole};
use crate::helpers::project::{self, ProjectRole};
use crate::middleware::CacheCtx;
use crate::state::AppState;

/// Actor recorded for mutations issued by another region.
pub const SYSTEM_ACTOR: MemberId = Uuid::nil();

#[derive(Debug, Deserialize)]
pub struct ArgsQuery {
    pub args: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberArgs {
    pub shard: ShardId,
    pub account: AccountId,
    pub project: ProjectId,
    pub member: MemberId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolesResponse {
    pub account_role: Option<AccountRole>,
    pub project_role: Option<ProjectRole>,
}

/// GET /private/v1/roles?args=...
pub async fn get_roles(
    State(state): State<AppState>,
    cache: CacheCtx,
    Query(query): Query<ArgsQuery>,
) -> ApiResult<Json<RolesResponse>> {
    let args: MemberArgs = serde_json::from_str(&query.args)?;
    let ctx = state.shard_ctx(&cache, args.shard, SYSTEM_ACTOR)?;
    let (account_role, project_role) =
        account::get_account_and_project_roles(ctx, args.account, args.project, args.member)
            .await?;
    Ok(Json(RolesResponse {
        account_role,
        project_role,
    }))
}

/// POST /private/v1/project-members/deactivate
pub async fn deactivate_project_member(
    State(state): State<AppState>,
    cache: CacheCtx,
    Json(args): Json<MemberArgs>,
) -> ApiResult<StatusCode> {
    let ctx = state.shard_ctx(&cache, args.shard, SYSTEM_ACTOR)?;
    project::set_member_inactive(ctx, args.account, args.project, args.member).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/private/v1/roles", get(get_roles))
        .route(
            "/private/v1/project-members/deactivate",
            post(deactivate_project_member),
        )
}
