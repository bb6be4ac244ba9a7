//! Shared application state for Axum routers.

use std::sync::Arc;

use tasktree_cache::{CacheClient, RequestCache};
use tasktree_core::{MemberId, ShardId, ShardStore};

use crate::config::ApiConfig;
use crate::error::ApiResult;
use crate::helpers::ShardCtx;
use crate::middleware::CacheMiddlewareState;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Process-wide cache client; each request opens its own context.
    pub cache: CacheClient,
    /// The sharded tree store.
    pub shards: Arc<dyn ShardStore>,
    pub config: Arc<ApiConfig>,
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(cache: CacheClient, shards: Arc<dyn ShardStore>, config: ApiConfig) -> Self {
        Self {
            cache,
            shards,
            config: Arc::new(config),
            start_time: std::time::Instant::now(),
        }
    }

    /// Helper context for one shard within the current request.
    pub fn shard_ctx<'a>(
        &'a self,
        cache: &'a RequestCache,
        shard: ShardId,
        me: MemberId,
    ) -> ApiResult<ShardCtx<'a>> {
        ShardCtx::new(cache, self.shards.as_ref(), shard, me)
    }

    pub fn cache_middleware_state(&self) -> CacheMiddlewareState {
        CacheMiddlewareState::new(self.cache.clone(), self.config.skip_cache_param.as_str())
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("cache", &self.cache)
            .field("shard_count", &self.shards.shard_count())
            .field("config", &self.config)
            .finish()
    }
}
