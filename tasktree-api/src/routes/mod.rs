//! REST API Routes Module
//!
//! Route handlers organized by entity type. Every `/api/v1` and
//! `/private/v1` route runs inside a request cache context; private routes
//! additionally pass signature and replay checks first.

pub mod account;
pub mod health;
pub mod private;
pub mod project;
pub mod task;
pub mod timelog;

use std::sync::Arc;

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::request::Parts,
    middleware::{from_fn, from_fn_with_state},
    Router,
};
use tasktree_core::{ConfigError, MemberId};
use uuid::Uuid;

use crate::error::ApiError;
use crate::middleware::{
    private_rpc_middleware, request_cache_middleware, PrivateRpcState, ReplayGuard,
};
use crate::state::AppState;
use crate::telemetry::observability_middleware;

/// Header carrying the acting member, set by the session layer in front of
/// this service.
pub const MEMBER_HEADER: &str = "x-tasktree-member";

/// The member performing the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Actor(pub MemberId);

#[async_trait]
impl<S> FromRequestParts<S> for Actor
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let value = parts
            .headers
            .get(MEMBER_HEADER)
            .ok_or_else(|| ApiError::unauthorized("Missing member identity"))?;
        value
            .to_str()
            .ok()
            .and_then(|s| Uuid::parse_str(s).ok())
            .map(Actor)
            .ok_or_else(|| ApiError::invalid_format(MEMBER_HEADER, "UUID"))
    }
}

/// Build the full router.
///
/// Fails when no private RPC secret is configured.
pub fn create_api_router(
    state: AppState,
    replay_guard: Arc<dyn ReplayGuard>,
) -> Result<Router, ConfigError> {
    let secret = state.config.require_private_rpc_secret()?.to_string();
    let private_state = PrivateRpcState::new(secret, state.config.private_rpc_window, replay_guard);
    let cache_state = state.cache_middleware_state();

    let public_routes = Router::new()
        .merge(account::create_router())
        .merge(project::create_router())
        .merge(task::create_router())
        .merge(timelog::create_router())
        .layer(from_fn_with_state(
            cache_state.clone(),
            request_cache_middleware,
        ));

    // Private checks wrap the cache layer so a rejected call opens nothing.
    let private_routes = private::create_router()
        .layer(from_fn_with_state(cache_state, request_cache_middleware))
        .layer(from_fn_with_state(private_state, private_rpc_middleware));

    let router = Router::new()
        .merge(public_routes)
        .merge(private_routes)
        .merge(health::create_router())
        .layer(from_fn(observability_middleware))
        .with_state(state);

    tracing::info!("API router created");
    Ok(router)
}
