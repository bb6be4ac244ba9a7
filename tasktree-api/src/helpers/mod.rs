//! Shard query and mutation helpers.
//!
//! Every read helper describes what its result depends on with a
//! [`ReadKey`](tasktree_cache::ReadKey) and goes through
//! [`RequestCache::get_or_compute`]; every mutation declares what it
//! invalidates with a [`WriteKey`](tasktree_cache::WriteKey) and stages it
//! with [`RequestCache::touch_audited`] against the rows the shard reports.

pub mod account;
pub mod project;
pub mod task;
pub mod timelog;

use serde::{Deserialize, Serialize};
use tasktree_cache::RequestCache;
use tasktree_core::{EntityId, ExecOutcome, MemberId, ShardError, ShardId, ShardStore, TaskId};

use crate::error::{ApiError, ApiResult};

/// Largest page a listing helper returns.
pub const MAX_PAGE_LIMIT: usize = 100;

/// Everything a helper needs for one shard call.
#[derive(Clone, Copy)]
pub struct ShardCtx<'a> {
    pub cache: &'a RequestCache,
    pub shards: &'a dyn ShardStore,
    pub shard: ShardId,
    /// The acting member, recorded by mutations for activity feeds.
    pub me: MemberId,
}

impl<'a> ShardCtx<'a> {
    pub fn new(
        cache: &'a RequestCache,
        shards: &'a dyn ShardStore,
        shard: ShardId,
        me: MemberId,
    ) -> ApiResult<Self> {
        if shard as usize >= shards.shard_count() {
            return Err(ApiError::invalid_input(format!("Unknown shard {}", shard)));
        }
        Ok(Self {
            cache,
            shards,
            shard,
            me,
        })
    }
}

/// One page of a listing, with a flag for whether more rows follow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub more: bool,
}

impl<T> Page<T> {
    /// Build a page from rows fetched with `limit + 1`.
    pub fn from_overfetch(mut rows: Vec<T>, limit: usize) -> Self {
        let more = rows.len() > limit;
        rows.truncate(limit);
        Self { items: rows, more }
    }
}

/// Clamp a requested page size to `1..=MAX_PAGE_LIMIT`.
pub fn page_limit(requested: Option<usize>) -> usize {
    requested.unwrap_or(MAX_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT)
}

/// Map an empty single-row result to a 404 naming the entity.
pub(crate) fn or_not_found(entity: &'static str, id: EntityId) -> impl FnOnce(ShardError) -> ApiError {
    move |e| match e {
        ShardError::NotFound { .. } => ApiError::entity_not_found(entity, id),
        other => other.into(),
    }
}

/// A mutation that must change at least one row.
pub(crate) fn require_change(outcome: &ExecOutcome) -> ApiResult<()> {
    if outcome.rows_affected == 0 {
        return Err(ApiError::state_conflict("No change made"));
    }
    Ok(())
}

/// A tree-changing mutation: returns the tasks whose aggregates moved.
///
/// The tasks the caller already knows were changed are always included, so
/// a landed mutation still invalidates them when the shard reports no task
/// rows.
pub(crate) fn changed_tasks(outcome: &ExecOutcome, known: &[TaskId]) -> ApiResult<Vec<TaskId>> {
    require_change(outcome)?;
    let mut tasks = outcome.touched_tasks();
    if tasks.is_empty() {
        tracing::warn!(
            rows_affected = outcome.rows_affected,
            "tree mutation reported no task rows"
        );
    }
    for task in known {
        if !tasks.contains(task) {
            tasks.push(*task);
        }
    }
    Ok(tasks)
}
