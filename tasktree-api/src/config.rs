//! API Configuration Module
//!
//! Configuration for the private inter-region RPC boundary and the request
//! cache integration. Loaded from environment variables with defaults for
//! development.

use std::time::Duration;

use tasktree_core::ConfigError;

/// Default query parameter that bypasses cache lookups for one request.
pub const DEFAULT_SKIP_CACHE_PARAM: &str = "skipCache";

/// Default acceptance window for private requests.
pub const DEFAULT_PRIVATE_RPC_WINDOW: Duration = Duration::from_secs(60);

// ============================================================================
// API CONFIGURATION
// ============================================================================

/// API configuration.
#[derive(Clone)]
pub struct ApiConfig {
    // ========================================================================
    // Private RPC
    // ========================================================================
    /// Shared secret for signing inter-region calls. Private routes refuse
    /// to start without it.
    pub private_rpc_secret: Option<String>,

    /// Requests older than this are rejected, and signatures are claimed
    /// for this long.
    pub private_rpc_window: Duration,

    /// Redis URL of the dedicated replay-guard store.
    pub replay_store_url: String,

    // ========================================================================
    // Request cache
    // ========================================================================
    /// Query parameter that makes every cache lookup in the request miss.
    pub skip_cache_param: String,
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field(
                "private_rpc_secret",
                &self.private_rpc_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("private_rpc_window", &self.private_rpc_window)
            .field("replay_store_url", &self.replay_store_url)
            .field("skip_cache_param", &self.skip_cache_param)
            .finish()
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            private_rpc_secret: None,
            private_rpc_window: DEFAULT_PRIVATE_RPC_WINDOW,
            replay_store_url: "redis://127.0.0.1:6379/1".to_string(),
            skip_cache_param: DEFAULT_SKIP_CACHE_PARAM.to_string(),
        }
    }
}

impl ApiConfig {
    /// Create ApiConfig from environment variables.
    ///
    /// Environment variables:
    /// - `TASKTREE_PRIVATE_RPC_SECRET`: shared signing secret (no default)
    /// - `TASKTREE_PRIVATE_RPC_WINDOW_SECS`: acceptance window (default: 60)
    /// - `TASKTREE_REPLAY_REDIS_URL`: replay guard store (default: redis://127.0.0.1:6379/1)
    /// - `TASKTREE_SKIP_CACHE_PARAM`: bypass parameter name (default: skipCache)
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let private_rpc_secret = std::env::var("TASKTREE_PRIVATE_RPC_SECRET")
            .ok()
            .filter(|s| !s.is_empty());

        let private_rpc_window = std::env::var("TASKTREE_PRIVATE_RPC_WINDOW_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .map(Duration::from_secs)
            .unwrap_or(defaults.private_rpc_window);

        let replay_store_url =
            std::env::var("TASKTREE_REPLAY_REDIS_URL").unwrap_or(defaults.replay_store_url);

        let skip_cache_param = std::env::var("TASKTREE_SKIP_CACHE_PARAM")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.skip_cache_param);

        Self {
            private_rpc_secret,
            private_rpc_window,
            replay_store_url,
            skip_cache_param,
        }
    }

    /// The signing secret, or an error naming the missing variable.
    pub fn require_private_rpc_secret(&self) -> Result<&str, ConfigError> {
        self.private_rpc_secret
            .as_deref()
            .ok_or_else(|| ConfigError::MissingRequired {
                field: "TASKTREE_PRIVATE_RPC_SECRET".to_string(),
            })
    }

    /// Set the signing secret.
    pub fn with_private_rpc_secret(mut self, secret: impl Into<String>) -> Self {
        self.private_rpc_secret = Some(secret.into());
        self
    }

    /// Set the acceptance window.
    pub fn with_private_rpc_window(mut self, window: Duration) -> Self {
        self.private_rpc_window = window;
        self
    }
}
