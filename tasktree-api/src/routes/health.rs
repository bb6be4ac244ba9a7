//! Health Check Endpoints
//!
//! - /health/ping - Simple liveness check
//! - /health/live - Process alive check
//! - /health/ready - Cache store reachability
//!
//! The cache is fail-open, so an unreachable store reports `degraded`
//! rather than failing readiness.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::state::AppState;

/// Key probed by the readiness check. Never written.
const PROBE_KEY: &str = "health:probe";

const PROBE_TIMEOUT: Duration = Duration::from_millis(250);

// ============================================================================
// TYPES
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthDetails {
    pub cache: ComponentHealth,
    pub shard_count: usize,
    pub version: String,
    pub uptime_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: HealthStatus,
    pub backend: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ============================================================================
// HANDLERS
// ============================================================================

/// GET /health/ping
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/live
pub async fn liveness() -> impl IntoResponse {
    let response = HealthResponse {
        status: HealthStatus::Healthy,
        message: Some("Process is alive".to_string()),
        details: None,
    };
    (StatusCode::OK, Json(response))
}

/// GET /health/ready
pub async fn readiness(State(state): State<AppState>) -> impl IntoResponse {
    let store = state.cache.store();
    let start = std::time::Instant::now();
    let probe = tokio::time::timeout(PROBE_TIMEOUT, store.get(PROBE_KEY)).await;

    let (status, error) = match probe {
        Ok(Ok(_)) => (HealthStatus::Healthy, None),
        Ok(Err(e)) => (HealthStatus::Degraded, Some(e.to_string())),
        Err(_) => (
            HealthStatus::Degraded,
            Some(format!("probe timed out after {}ms", PROBE_TIMEOUT.as_millis())),
        ),
    };
    let cache = ComponentHealth {
        status,
        backend: store.backend_name().to_string(),
        latency_ms: error
            .is_none()
            .then(|| start.elapsed().as_millis() as u64),
        error,
    };

    let response = HealthResponse {
        status,
        message: None,
        details: Some(HealthDetails {
            cache,
            shard_count: state.shards.shard_count(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: state.start_time.elapsed().as_secs(),
        }),
    };
    (StatusCode::OK, Json(response))
}

// ============================================================================
// ROUTER
// ============================================================================

pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/health/ping", get(ping))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
}
