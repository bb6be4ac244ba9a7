//! TaskTree Cache - versioned, request-scoped cache coherence
//!
//! Query helpers describe what a cached result depends on with the
//! dependency key DSL; mutation helpers describe what they invalidate. A
//! per-request [`RequestCache`] resolves DLM snapshots, serves lookups,
//! stages writes and bumps, and the commit phase flushes them once at the
//! end of the request.
//!
//! # Example
//!
//! ```ignore
//! let cache = client.begin_request();
//!
//! let key = ReadKey::new("project.get_members", (shard, account, project))
//!     .project_members_set(account, project);
//! let members: Vec<Member> = match cache.get(&key).await {
//!     Some(members) => members,
//!     None => {
//!         let members = load_members(shard, account, project).await?;
//!         cache.set(&members, &key).await;
//!         members
//!     }
//! };
//!
//! cache.touch(&WriteKey::new().project_member(account, project, member)).await;
//! cache.commit().await?;
//! ```

pub mod audit;
pub mod client;
pub mod commit;
pub mod context;
pub mod dlm;
pub mod key;
pub mod snapshot;
pub mod stats;
pub mod storage_key;
pub mod store;

pub use audit::{verify_write, AuditViolation};
pub use client::{CacheClient, RequestOptions};
pub use commit::CommitReport;
pub use context::RequestCache;
pub use dlm::{DlmKey, DlmTag};
pub use key::{DependencyKeys, ReadKey, WriteKey};
pub use snapshot::Snapshot;
pub use stats::{CacheStats, QueryInfo};
pub use store::{CacheStore, CommitBatch, InMemoryCacheStore, RedisCacheStore};

/// Everything a query or mutation helper needs.
pub mod prelude {
    pub use crate::{DependencyKeys, ReadKey, RequestCache, WriteKey};
}
