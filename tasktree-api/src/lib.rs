//! TaskTree API - HTTP layer over the sharded tree store
//!
//! Axum routers for account, project, task and time log operations. Each
//! request runs inside its own [`RequestCache`](tasktree_cache::RequestCache)
//! opened and committed by [`middleware::request_cache_middleware`];
//! inter-region calls are verified by [`middleware::private_rpc_middleware`].
//!
//! The query and mutation helpers in [`helpers`] carry the cache dependency
//! declarations for every shard call.

pub mod config;
pub mod error;
pub mod helpers;
pub mod middleware;
pub mod routes;
pub mod state;
pub mod telemetry;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult, ErrorCode};
pub use helpers::{Page, ShardCtx};
pub use middleware::{
    private_rpc_middleware, request_cache_middleware, sign, CacheCtx, CacheMiddlewareState,
    InMemoryReplayGuard, PrivateRpcState, RedisReplayGuard, ReplayGuard,
};
pub use routes::{create_api_router, Actor, MEMBER_HEADER};
pub use state::AppState;
pub use telemetry::{init_tracing, TelemetryConfig};
