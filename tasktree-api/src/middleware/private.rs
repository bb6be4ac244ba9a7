//! Private RPC Middleware for TaskTree API
//!
//! Inter-region calls carry three query parameters:
//!
//! - `ts`: the sender's clock in unix millis
//! - `_`: base64url (no padding) HMAC-SHA256 over the call arguments
//!   followed by the `ts` string
//! - `args`: the JSON arguments for `GET`; other methods sign the body
//!
//! A request is accepted once: the signature is claimed in a replay store
//! for the length of the acceptance window, so a captured URL cannot be
//! sent again while its timestamp is still fresh.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    extract::{Query, Request, State},
    http::Method,
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use deadpool_redis::{Config, Pool, Runtime};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tasktree_core::{now_unix_millis, PrivateRpcError, StoreError, UnixMillis};
use tokio::sync::Mutex;

use crate::error::ApiError;

type HmacSha256 = Hmac<Sha256>;

/// Timestamp query parameter.
pub const TIMESTAMP_PARAM: &str = "ts";

/// Signature query parameter.
pub const SIGNATURE_PARAM: &str = "_";

/// Arguments query parameter for `GET` calls.
pub const ARGS_PARAM: &str = "args";

/// Largest body a private call may sign.
pub const MAX_PRIVATE_BODY_BYTES: usize = 1024 * 1024;

// ============================================================================
// SIGNING
// ============================================================================

fn keyed_mac(args: &[u8], ts: &str, secret: &[u8]) -> Result<HmacSha256, PrivateRpcError> {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return Err(PrivateRpcError::BadSignature);
    };
    mac.update(args);
    mac.update(ts.as_bytes());
    Ok(mac)
}

/// Sign a private call. The result goes in the `_` parameter.
pub fn sign(args: &[u8], ts: &str, secret: &[u8]) -> Result<String, PrivateRpcError> {
    let mac = keyed_mac(args, ts, secret)?;
    Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
}

/// Check a signature in constant time.
pub fn verify_signature(
    args: &[u8],
    ts: &str,
    signature: &str,
    secret: &[u8],
) -> Result<(), PrivateRpcError> {
    let provided = URL_SAFE_NO_PAD
        .decode(signature)
        .map_err(|_| PrivateRpcError::BadSignature)?;
    keyed_mac(args, ts, secret)?
        .verify_slice(&provided)
        .map_err(|_| PrivateRpcError::BadSignature)
}

/// Parse `ts` and reject it when it is further than `window` from `now_ms`
/// in either direction.
pub fn check_timestamp(
    ts: &str,
    now_ms: UnixMillis,
    window: Duration,
) -> Result<UnixMillis, PrivateRpcError> {
    let sent: UnixMillis = ts
        .parse()
        .map_err(|_| PrivateRpcError::MalformedTimestamp {
            value: ts.to_string(),
        })?;
    let window_ms = i64::try_from(window.as_millis()).unwrap_or(i64::MAX);
    let age_ms = now_ms.saturating_sub(sent);
    if age_ms.saturating_abs() > window_ms {
        return Err(PrivateRpcError::Expired { age_ms, window_ms });
    }
    Ok(sent)
}

// ============================================================================
// REPLAY GUARD
// ============================================================================

/// Remembers signatures that were already accepted.
#[async_trait]
pub trait ReplayGuard: Send + Sync {
    /// Claim `signature` for `ttl`. Returns `false` when it was already
    /// claimed and has not expired.
    async fn claim(&self, signature: &str, ttl: Duration) -> Result<bool, StoreError>;
}

/// Replay guard backed by a dedicated Redis database.
#[derive(Clone)]
pub struct RedisReplayGuard {
    pool: Pool,
}

impl RedisReplayGuard {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Build the pool from a Redis URL. Does not connect.
    pub fn from_url(url: &str) -> Result<Self, StoreError> {
        let pool = Config::from_url(url)
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| StoreError::unavailable(format!("Failed to create pool: {}", e)))?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl ReplayGuard for RedisReplayGuard {
    async fn claim(&self, signature: &str, ttl: Duration) -> Result<bool, StoreError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|e| StoreError::unavailable(format!("Redis connection failed: {}", e)))?;
        // SET NX EX sets the value and its expiry in one step.
        let reply: Option<String> = ::redis::cmd("SET")
            .arg(format!("replay:{}", signature))
            .arg("")
            .arg("NX")
            .arg("EX")
            .arg(ttl.as_secs().max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::command("SET", e.to_string()))?;
        Ok(reply.is_some())
    }
}

/// Process-local replay guard for tests and single-node development.
#[derive(Debug, Default)]
pub struct InMemoryReplayGuard {
    claims: Mutex<HashMap<String, tokio::time::Instant>>,
}

impl InMemoryReplayGuard {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReplayGuard for InMemoryReplayGuard {
    async fn claim(&self, signature: &str, ttl: Duration) -> Result<bool, StoreError> {
        let now = tokio::time::Instant::now();
        let mut claims = self.claims.lock().await;
        claims.retain(|_, expires_at| *expires_at > now);
        if claims.contains_key(signature) {
            return Ok(false);
        }
        claims.insert(signature.to_string(), now + ttl);
        Ok(true)
    }
}

// ============================================================================
// MIDDLEWARE
// ============================================================================

/// Shared state for the private RPC middleware.
#[derive(Clone)]
pub struct PrivateRpcState {
    secret: Arc<[u8]>,
    window: Duration,
    guard: Arc<dyn ReplayGuard>,
}

impl PrivateRpcState {
    pub fn new(secret: impl AsRef<[u8]>, window: Duration, guard: Arc<dyn ReplayGuard>) -> Self {
        Self {
            secret: Arc::from(secret.as_ref()),
            window,
            guard,
        }
    }

    /// Verify everything except the replay claim.
    fn authenticate(
        &self,
        params: &HashMap<String, String>,
        args: &[u8],
        now_ms: UnixMillis,
    ) -> Result<String, PrivateRpcError> {
        let ts = required(params, TIMESTAMP_PARAM)?;
        let signature = required(params, SIGNATURE_PARAM)?;
        check_timestamp(ts, now_ms, self.window)?;
        verify_signature(args, ts, signature, &self.secret)?;
        Ok(signature.to_string())
    }
}

fn required<'a>(
    params: &'a HashMap<String, String>,
    name: &str,
) -> Result<&'a str, PrivateRpcError> {
    params
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| PrivateRpcError::MissingParam {
            param: name.to_string(),
        })
}

/// Axum middleware guarding private inter-region routes.
pub async fn private_rpc_middleware(
    State(state): State<PrivateRpcState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let params = Query::<HashMap<String, String>>::try_from_uri(request.uri())
        .map(|Query(params)| params)
        .map_err(|_| ApiError::invalid_format("query", "urlencoded parameters"))?;
    let path = request.uri().path().to_string();

    let (request, args) = if request.method() == Method::GET {
        let args = params.get(ARGS_PARAM).cloned().unwrap_or_default().into_bytes();
        (request, args)
    } else {
        let (parts, body) = request.into_parts();
        let bytes = axum::body::to_bytes(body, MAX_PRIVATE_BODY_BYTES)
            .await
            .map_err(|_| ApiError::invalid_input("Private request body too large"))?;
        let args = bytes.to_vec();
        (Request::from_parts(parts, Body::from(bytes)), args)
    };

    let now_ms = now_unix_millis();
    let signature = state
        .authenticate(&params, &args, now_ms)
        .map_err(|e| reject(&path, e))?;

    match state.guard.claim(&signature, state.window).await {
        Ok(true) => {}
        Ok(false) => return Err(reject(&path, PrivateRpcError::Replayed)),
        Err(e) => return Err(reject(&path, PrivateRpcError::Guard(e))),
    }

    Ok(next.run(request).await)
}

fn reject(path: &str, error: PrivateRpcError) -> ApiError {
    tracing::warn!(path = %path, error = %error, "Rejected private request");
    error.into()
}

// ============================================================================
// TESTS
// ============================================================================
