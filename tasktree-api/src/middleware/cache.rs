//! Request Cache Middleware for TaskTree API
//!
//! Opens one [`RequestCache`] per request, hands it to the handler through
//! request extensions and drains it once after the handler returns, before
//! the response is sent.
//!
//! The handler and the commit run on a spawned task. A client disconnect
//! drops the middleware future, not the task, so a mutation that already
//! reached the shard always gets its invalidations recorded.
//!
//! # Example
//!
//! ```ignore
//! let app = Router::new()
//!     .route("/api/v1/accounts/:account/members", get(get_members))
//!     .layer(middleware::from_fn_with_state(cache_state, request_cache_middleware));
//!
//! async fn get_members(cache: CacheCtx, ...) -> ApiResult<Json<Vec<Member>>> { ... }
//! ```

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::Arc;

use axum::{
    async_trait,
    extract::{FromRequestParts, Query, Request, State},
    http::request::Parts,
    middleware::Next,
    response::Response,
};
use tasktree_cache::{CacheClient, CommitReport, RequestCache, RequestOptions};
use tasktree_core::CacheError;
use tracing::Instrument;

use crate::error::ApiError;

// ============================================================================
// STATE
// ============================================================================

/// Shared state for the request cache middleware.
#[derive(Clone)]
pub struct CacheMiddlewareState {
    pub client: CacheClient,
    /// Query parameter that bypasses lookups for one request.
    pub skip_cache_param: Arc<str>,
}

impl CacheMiddlewareState {
    pub fn new(client: CacheClient, skip_cache_param: impl Into<Arc<str>>) -> Self {
        Self {
            client,
            skip_cache_param: skip_cache_param.into(),
        }
    }
}

// ============================================================================
// MIDDLEWARE
// ============================================================================

/// Axum middleware wiring the per-request cache and its commit phase.
pub async fn request_cache_middleware(
    State(state): State<CacheMiddlewareState>,
    mut request: Request,
    next: Next,
) -> Response {
    let skip_cache = query_flag(&request, &state.skip_cache_param);
    let cache = state.client.begin_request_with(RequestOptions {
        skip_cache,
        start_ms: None,
    });
    request.extensions_mut().insert(cache.clone());

    let method = request.method().clone();
    let path = request.uri().path().to_string();

    let task = tokio::spawn(
        async move {
            let response = next.run(request).await;
            let commit = cache.commit().await;
            (response, commit)
        }
        .in_current_span(),
    );

    match task.await {
        Ok((response, commit)) => {
            log_commit(&method, &path, response.status().as_u16(), commit);
            response
        }
        Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
        Err(e) => {
            tracing::error!(error = %e, path = %path, "Request task was cancelled");
            axum::response::IntoResponse::into_response(ApiError::internal_error(
                "Request was cancelled",
            ))
        }
    }
}

fn log_commit(
    method: &axum::http::Method,
    path: &str,
    status: u16,
    commit: Result<CommitReport, CacheError>,
) {
    match commit {
        Ok(report) => {
            let stats = &report.stats;
            tracing::debug!(
                method = %method,
                path = %path,
                status,
                hits = stats.hits,
                misses = stats.misses,
                skipped = stats.skipped,
                hit_rate = stats.hit_rate(),
                store_round_trips = report.queries.len(),
                store_time_ms = report.store_time_ms(),
                bumped = report.bumped,
                written = report.written,
                breaker_tripped = stats.breaker_tripped,
                "Request cache summary"
            );
            if let Some(error) = report.error {
                tracing::warn!(
                    method = %method,
                    path = %path,
                    error = %error,
                    bumped = report.bumped,
                    "Request cache commit failed"
                );
            }
        }
        Err(CacheError::AlreadyCommitted) => {
            tracing::warn!(path = %path, "Handler committed the request cache itself");
        }
        Err(e) => {
            tracing::error!(path = %path, error = %e, "Request cache commit errored");
        }
    }
}

/// Truthy values accepted for boolean query flags.
fn is_truthy(value: &str) -> bool {
    matches!(
        value.to_lowercase().as_str(),
        "1" | "y" | "yes" | "t" | "true"
    )
}

fn query_flag(request: &Request, name: &str) -> bool {
    Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .ok()
        .and_then(|Query(params)| params.get(name).map(|v| is_truthy(v)))
        .unwrap_or(false)
}

// ============================================================================
// EXTRACTOR
// ============================================================================

/// Extracts the request's [`RequestCache`].
#[derive(Clone)]
pub struct CacheCtx(pub RequestCache);

impl Deref for CacheCtx {
    type Target = RequestCache;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CacheCtx
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<RequestCache>()
            .cloned()
            .map(CacheCtx)
            .ok_or_else(|| {
                tracing::error!("Request cache missing, ensure request_cache_middleware is installed");
                ApiError::internal_error("Request cache unavailable")
            })
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_truthy() {
        for value in ["1", "y", "YES", "t", "True"] {
            assert!(is_truthy(value), "{} should be truthy", value);
        }
        for value in ["", "0", "no", "false", "on"] {
            assert!(!is_truthy(value), "{} should be falsy", value);
        }
    }

    #[test]
    fn test_query_flag() {
        let request = Request::builder()
            .uri("/api/v1/x?skipCache=yes&args=%7B%7D")
            .body(axum::body::Body::empty())
            .unwrap();
        assert!(query_flag(&request, "skipCache"));
        assert!(!query_flag(&request, "other"));

        let request = Request::builder()
            .uri("/api/v1/x")
            .body(axum::body::Body::empty())
            .unwrap();
        assert!(!query_flag(&request, "skipCache"));
    }
}
