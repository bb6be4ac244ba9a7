//! Property-Based Tests for Cache Coherence
//!
//! **Property 1: Monotonic Invalidation**
//!
//! After a commit bumps a DLM key, every later lookup whose dependency set
//! includes that key resolves a newer snapshot and misses the record cached
//! before the bump.
//!
//! **Property 2: Round Trip**
//!
//! A value staged with `set` and committed is returned deep-equal by the
//! next request's `get` for the same descriptor.
//!
//! The scenario tests at the bottom walk the invalidation paths of the
//! domain end to end over the in-memory store.

use std::sync::Arc;

use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use tasktree_cache::{
    CacheClient, DependencyKeys, InMemoryCacheStore, ReadKey, RequestOptions, WriteKey,
};
use tasktree_core::CacheConfig;
use tokio::runtime::Runtime;
use uuid::Uuid;

// ============================================================================
// TEST CONFIGURATION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct MemberRow {
    id: Uuid,
    role: u8,
    display_name: String,
}

fn client_with(store: &InMemoryCacheStore, epoch: &str) -> CacheClient {
    CacheClient::new(
        Arc::new(store.clone()),
        CacheConfig::default().with_master_epoch(epoch),
    )
}

fn started_at(start_ms: i64) -> RequestOptions {
    RequestOptions {
        skip_cache: false,
        start_ms: Some(start_ms),
    }
}

fn test_runtime() -> Result<Runtime, TestCaseError> {
    Runtime::new().map_err(|e| TestCaseError::fail(format!("Failed to create runtime: {}", e)))
}

fn account_members_key(account: Uuid) -> ReadKey {
    ReadKey::new("account.get_members", (0, account)).account_members_set(account)
}

/// Cache `value` under `key` in its own request.
async fn prime<T: Serialize + Sync>(
    client: &CacheClient,
    start_ms: i64,
    key: &ReadKey,
    value: &T,
) {
    let cache = client.begin_request_with(started_at(start_ms));
    cache.set(value, key).await;
    let report = cache.commit().await.expect("first commit");
    assert!(report.applied);
}

/// Bump `key` in its own request.
async fn bump(client: &CacheClient, start_ms: i64, key: &WriteKey) {
    let cache = client.begin_request_with(started_at(start_ms));
    cache.touch(key).await;
    let report = cache.commit().await.expect("first commit");
    assert!(report.applied);
}

/// Look `key` up in its own request.
async fn lookup<T: for<'de> Deserialize<'de> + Send>(
    client: &CacheClient,
    start_ms: i64,
    key: &ReadKey,
) -> Option<T> {
    let cache = client.begin_request_with(started_at(start_ms));
    let value = cache.get(key).await;
    cache.commit().await.expect("first commit");
    value
}

// ============================================================================
// PROPERTY TEST STRATEGIES
// ============================================================================

fn member_strategy() -> impl Strategy<Value = MemberRow> {
    (any::<u128>(), 0u8..3, "[a-z]{1,12}").prop_map(|(id, role, display_name)| MemberRow {
        id: Uuid::from_u128(id),
        role,
        display_name,
    })
}

// ============================================================================
// PROPERTY TESTS
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    /// **Property 1: Monotonic Invalidation**
    #[test]
    fn prop_bump_invalidates_prior_records(
        members in proptest::collection::vec(member_strategy(), 0..5),
        cached_at in 1i64..1_000_000,
        gap in 1i64..1_000_000,
        bump_member in any::<u128>(),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = InMemoryCacheStore::new();
            let client = client_with(&store, "0");
            let account = Uuid::now_v7();
            let key = account_members_key(account);

            prime(&client, cached_at, &key, &members).await;
            let hit: Option<Vec<MemberRow>> = lookup(&client, cached_at + 1, &key).await;
            prop_assert_eq!(hit.as_ref(), Some(&members));

            let bumped_at = cached_at + gap;
            bump(
                &client,
                bumped_at,
                &WriteKey::new().account_member(account, Uuid::from_u128(bump_member)),
            )
            .await;

            let after: Option<Vec<MemberRow>> = lookup(&client, bumped_at + 1, &key).await;
            prop_assert!(after.is_none());
            Ok(())
        })?;
    }

    /// **Property 2: Round Trip**
    #[test]
    fn prop_set_then_get_round_trips(
        members in proptest::collection::vec(member_strategy(), 0..8),
    ) {
        let rt = test_runtime()?;
        rt.block_on(async {
            let store = InMemoryCacheStore::new();
            let client = client_with(&store, "0");
            let key = account_members_key(Uuid::now_v7());

            prime(&client, 10, &key, &members).await;
            let cached: Option<Vec<MemberRow>> = lookup(&client, 11, &key).await;
            prop_assert_eq!(cached, Some(members));
            Ok(())
        })?;
    }
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn scenario_member_bump_invalidates_member_listing() {
    let store = InMemoryCacheStore::new();
    let client = client_with(&store, "0");
    let account = Uuid::now_v7();
    let key = account_members_key(account);
    let listing = vec!["ada".to_string(), "lin".to_string()];

    prime(&client, 1_000, &key, &listing).await;
    assert_eq!(lookup::<Vec<String>>(&client, 1_500, &key).await, Some(listing));

    bump(&client, 2_000, &WriteKey::new().account_member(account, Uuid::now_v7())).await;
    assert!(lookup::<Vec<String>>(&client, 2_500, &key).await.is_none());

    // Recompute and cache at the new snapshot; the next read hits.
    let recomputed = vec!["ada".to_string(), "lin".to_string(), "sam".to_string()];
    prime(&client, 3_000, &key, &recomputed).await;
    assert_eq!(lookup::<Vec<String>>(&client, 3_500, &key).await, Some(recomputed));
}

#[tokio::test]
async fn scenario_joint_lookup_misses_on_account_level_bump() {
    let store = InMemoryCacheStore::new();
    let client = client_with(&store, "0");
    let (account, project, member) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());
    let key = ReadKey::new("account.get_account_and_project_roles", (0, account, project, member))
        .account_member(account, member)
        .project_member(account, project, member);

    prime(&client, 1_000, &key, &(1u8, Some(2u8))).await;
    assert!(lookup::<(u8, Option<u8>)>(&client, 1_100, &key).await.is_some());

    // Only the account-level key moves; the project member is untouched.
    bump(&client, 2_000, &WriteKey::new().account_member(account, member)).await;
    assert!(lookup::<(u8, Option<u8>)>(&client, 2_100, &key).await.is_none());
}

#[tokio::test]
async fn scenario_master_epoch_change_orphans_everything() {
    let store = InMemoryCacheStore::new();
    let epoch_zero = client_with(&store, "0");
    let epoch_one = client_with(&store, "1");
    let key = account_members_key(Uuid::now_v7());

    prime(&epoch_zero, 1_000, &key, &vec![7u32]).await;
    assert!(lookup::<Vec<u32>>(&epoch_zero, 1_100, &key).await.is_some());

    // Same dependencies, same snapshot, different epoch.
    assert!(lookup::<Vec<u32>>(&epoch_one, 1_200, &key).await.is_none());
    // Nothing was deleted.
    assert_eq!(store.value_count().await, 1);
}

#[tokio::test]
async fn scenario_concurrent_bumps_either_winner_invalidates() {
    for earlier_commits_last in [false, true] {
        let store = InMemoryCacheStore::new();
        let client = client_with(&store, "0");
        let (account, project) = (Uuid::now_v7(), Uuid::now_v7());
        let key = ReadKey::new("project.get", (0, account, project)).project(account, project);
        let touched = WriteKey::new().project(account, project);

        prime(&client, 1_000, &key, &"Roadmap").await;

        let first = client.begin_request_with(started_at(5_000));
        let second = client.begin_request_with(started_at(5_001));
        first.touch(&touched).await;
        second.touch(&touched).await;

        let (a, b) = if earlier_commits_last {
            (second, first)
        } else {
            (first, second)
        };
        let (ra, rb) = tokio::join!(a.commit(), b.commit());
        assert!(ra.expect("commit").applied);
        assert!(rb.expect("commit").applied);

        assert!(
            lookup::<String>(&client, 6_000, &key).await.is_none(),
            "stale hit when earlier_commits_last = {}",
            earlier_commits_last
        );
    }
}

#[tokio::test]
async fn scenario_value_cached_during_mutation_is_unreachable() {
    let store = InMemoryCacheStore::new();
    let client = client_with(&store, "0");
    let account = Uuid::now_v7();
    let key = account_members_key(account);

    // The mutation starts at 2_000 and commits late.
    let writer = client.begin_request_with(started_at(2_000));
    writer.touch(&WriteKey::new().account_members_set(account)).await;

    // A reader starting after the mutation caches the old listing before the
    // commit lands.
    prime(&client, 2_500, &key, &vec!["before".to_string()]).await;

    writer.commit().await.expect("commit");
    assert!(lookup::<Vec<String>>(&client, 3_000, &key).await.is_none());
}
