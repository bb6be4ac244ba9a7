//! Middleware modules for TaskTree API
//!
//! - `cache`: per-request cache context and its commit phase
//! - `private`: signature, freshness and replay checks for inter-region calls
//!
//! # Middleware Order
//!
//! ```ignore
//! Router::new()
//!     .route("/private/v1/...", get(handler))
//!     // Innermost: the handler sees a RequestCache
//!     .layer(middleware::from_fn_with_state(cache_state, request_cache_middleware))
//!     // Private checks run before any cache work is opened
//!     .layer(middleware::from_fn_with_state(private_state, private_rpc_middleware))
//!     // Outermost
//!     .layer(middleware::from_fn(observability_middleware))
//! ```

pub mod cache;
pub mod private;

pub use cache::{request_cache_middleware, CacheCtx, CacheMiddlewareState};
pub use private::{
    check_timestamp, private_rpc_middleware, sign, verify_signature, InMemoryReplayGuard,
    PrivateRpcState, RedisReplayGuard, ReplayGuard, ARGS_PARAM, SIGNATURE_PARAM, TIMESTAMP_PARAM,
};
