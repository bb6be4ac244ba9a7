//! Dependency key DSL.
//!
//! Every query or mutation helper declares its cache scope by calling
//! domain-named builder methods instead of listing DLM keys by hand. The
//! containment hierarchy of the domain is encoded here once:
//!
//! ```text
//! account ─┬─ members
//!          ├─ activities
//!          └─ projects ─┬─ members
//!                       ├─ activities
//!                       ├─ time logs
//!                       └─ tasks (project row == root task) ─ children
//! ```
//!
//! Two descriptor types share the builder methods through [`DependencyKeys`]:
//!
//! - [`ReadKey`] also registers the master guards of the entity's scope
//!   (`AccountMaster`, plus `ProjectMaster` for project-scoped keys). It does
//!   not register sibling set keys; those are bumped by whichever write path
//!   changes them.
//! - [`WriteKey`] also registers the containing set of the entity it touches
//!   (touching a project member bumps the project members set) because
//!   membership or aggregates of that set may have changed.
//!
//! Key sets are ordered and deduplicated, so calling the builder methods in
//! any order, any number of times, yields the same descriptor.
//!
//! ```ignore
//! let key = ReadKey::new("project.get_member", (shard, account, project, member))
//!     .project_member(account, project, member);
//! ```

use std::borrow::Cow;
use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;
use tasktree_core::{AccountId, MemberId, ProjectId, TaskId, TimeLogId};

use crate::dlm::{DlmKey, DlmTag};

/// Accumulates DLM keys through domain-named builder methods.
///
/// Implementors decide what the two hooks do; the domain methods are shared.
pub trait DependencyKeys: Sized {
    /// The accumulated key set, sorted.
    fn dlm_keys(&self) -> &BTreeSet<DlmKey>;

    /// Register a key this descriptor depends on in every mode.
    fn insert_key(&mut self, key: DlmKey);

    /// Register a master guard. Only reads depend on masters.
    fn read_guard(&mut self, key: DlmKey);

    /// Register the containing set of a touched entity. Only writes bubble.
    fn write_bubble(&mut self, key: DlmKey);

    /// Whether any key has been registered.
    fn is_empty(&self) -> bool {
        self.dlm_keys().is_empty()
    }

    fn contains(&self, key: &DlmKey) -> bool {
        self.dlm_keys().contains(key)
    }

    // ------------------------------------------------------------------
    // Account scope
    // ------------------------------------------------------------------

    /// Every account-owned read checks this. Bump it to drop the account's
    /// whole cached surface (deletion, region move).
    fn account_master(mut self, account: AccountId) -> Self {
        self.insert_key(DlmKey::account_master(account));
        self
    }

    fn account(mut self, account: AccountId) -> Self {
        self.account_scope(account);
        self.insert_key(DlmKey::new(DlmTag::Account, &[account]));
        self
    }

    fn account_activities(mut self, account: AccountId) -> Self {
        self.account_scope(account);
        self.insert_key(DlmKey::new(DlmTag::AccountActivities, &[account]));
        self
    }

    fn account_members_set(mut self, account: AccountId) -> Self {
        self.account_scope(account);
        self.insert_key(DlmKey::new(DlmTag::AccountMembersSet, &[account]));
        self
    }

    fn account_member(mut self, account: AccountId, member: MemberId) -> Self {
        self.account_scope(account);
        self.write_bubble(DlmKey::new(DlmTag::AccountMembersSet, &[account]));
        self.insert_key(DlmKey::new(DlmTag::AccountMember, &[account, member]));
        self
    }

    fn account_members(self, account: AccountId, members: &[MemberId]) -> Self {
        members
            .iter()
            .fold(self, |key, member| key.account_member(account, *member))
    }

    fn account_projects_set(mut self, account: AccountId) -> Self {
        self.account_scope(account);
        self.insert_key(DlmKey::new(DlmTag::AccountProjectsSet, &[account]));
        self
    }

    // ------------------------------------------------------------------
    // Project scope
    // ------------------------------------------------------------------

    /// Every project-owned read checks this. Bump it on archive/delete.
    fn project_master(mut self, account: AccountId, project: ProjectId) -> Self {
        self.account_scope(account);
        self.write_bubble(DlmKey::new(DlmTag::AccountProjectsSet, &[account]));
        self.insert_key(DlmKey::project_master(project));
        self
    }

    /// The project row. Also the root task: [`DependencyKeys::task`] routes
    /// here when `task == project`.
    fn project(mut self, account: AccountId, project: ProjectId) -> Self {
        self.project_scope(account, project);
        self.write_bubble(DlmKey::new(DlmTag::AccountProjectsSet, &[account]));
        self.insert_key(DlmKey::new(DlmTag::Project, &[project]));
        self
    }

    fn project_activities(mut self, account: AccountId, project: ProjectId) -> Self {
        self.project_scope(account, project);
        self.write_bubble(DlmKey::new(DlmTag::AccountActivities, &[account]));
        self.insert_key(DlmKey::new(DlmTag::ProjectActivities, &[project]));
        self
    }

    fn project_members_set(mut self, account: AccountId, project: ProjectId) -> Self {
        self.project_scope(account, project);
        self.insert_key(DlmKey::new(DlmTag::ProjectMembersSet, &[project]));
        self
    }

    fn project_member(mut self, account: AccountId, project: ProjectId, member: MemberId) -> Self {
        self.project_scope(account, project);
        self.write_bubble(DlmKey::new(DlmTag::ProjectMembersSet, &[project]));
        self.insert_key(DlmKey::new(DlmTag::ProjectMember, &[project, member]));
        self
    }

    fn project_members(self, account: AccountId, project: ProjectId, members: &[MemberId]) -> Self {
        members
            .iter()
            .fold(self, |key, member| key.project_member(account, project, *member))
    }

    // ------------------------------------------------------------------
    // Task tree
    // ------------------------------------------------------------------

    fn task(mut self, account: AccountId, project: ProjectId, task: TaskId) -> Self {
        if task == project {
            return self.project(account, project);
        }
        self.project_scope(account, project);
        self.insert_key(DlmKey::new(DlmTag::Task, &[task]));
        self
    }

    fn tasks(self, account: AccountId, project: ProjectId, tasks: &[TaskId]) -> Self {
        tasks
            .iter()
            .fold(self, |key, task| key.task(account, project, *task))
    }

    /// The ordered child list of `parent`. Writes also bump the parent row,
    /// whose child counts and aggregates follow its children.
    fn task_children_set(mut self, account: AccountId, project: ProjectId, parent: TaskId) -> Self {
        self.project_scope(account, project);
        if parent == project {
            self.write_bubble(DlmKey::new(DlmTag::Project, &[project]));
            self.write_bubble(DlmKey::new(DlmTag::AccountProjectsSet, &[account]));
        } else {
            self.write_bubble(DlmKey::new(DlmTag::Task, &[parent]));
        }
        self.insert_key(DlmKey::new(DlmTag::TaskChildrenSet, &[parent]));
        self
    }

    /// Each task and its child list. Used with the affected-task list a
    /// tree-changing stored procedure reports.
    fn combined_task_and_task_children_sets(
        self,
        account: AccountId,
        project: ProjectId,
        tasks: &[TaskId],
    ) -> Self {
        tasks.iter().fold(self, |key, task| {
            key.task(account, project, *task)
                .task_children_set(account, project, *task)
        })
    }

    // ------------------------------------------------------------------
    // Time logs
    // ------------------------------------------------------------------

    /// A single time log. `task` and `member` name the filtered sets the log
    /// belongs to when the caller knows them.
    fn time_log(
        mut self,
        account: AccountId,
        project: ProjectId,
        time_log: TimeLogId,
        task: Option<TaskId>,
        member: Option<MemberId>,
    ) -> Self {
        self.project_scope(account, project);
        self.write_bubble(DlmKey::new(DlmTag::ProjectTimeLogSet, &[project]));
        if let Some(task) = task {
            self.write_bubble(DlmKey::new(DlmTag::TaskTimeLogSet, &[task]));
        }
        if let Some(member) = member {
            self.write_bubble(DlmKey::new(
                DlmTag::ProjectMemberTimeLogSet,
                &[project, member],
            ));
        }
        self.insert_key(DlmKey::new(DlmTag::TimeLog, &[time_log]));
        self
    }

    fn project_time_log_set(mut self, account: AccountId, project: ProjectId) -> Self {
        self.project_scope(account, project);
        self.insert_key(DlmKey::new(DlmTag::ProjectTimeLogSet, &[project]));
        self
    }

    fn task_time_log_set(mut self, account: AccountId, project: ProjectId, task: TaskId) -> Self {
        self.project_scope(account, project);
        self.insert_key(DlmKey::new(DlmTag::TaskTimeLogSet, &[task]));
        self
    }

    fn project_member_time_log_set(
        mut self,
        account: AccountId,
        project: ProjectId,
        member: MemberId,
    ) -> Self {
        self.project_scope(account, project);
        self.insert_key(DlmKey::new(
            DlmTag::ProjectMemberTimeLogSet,
            &[project, member],
        ));
        self
    }

    // ------------------------------------------------------------------
    // Scope guards
    // ------------------------------------------------------------------

    #[doc(hidden)]
    fn account_scope(&mut self, account: AccountId) {
        self.read_guard(DlmKey::account_master(account));
    }

    #[doc(hidden)]
    fn project_scope(&mut self, account: AccountId, project: ProjectId) {
        self.read_guard(DlmKey::account_master(account));
        self.read_guard(DlmKey::project_master(project));
    }
}

// ============================================================================
// READ DESCRIPTOR
// ============================================================================

/// Describes one cacheable computation: a call-site identity, its argument
/// tuple and the DLM keys its result depends on.
#[derive(Debug, Clone, PartialEq)]
pub struct ReadKey {
    identity: Cow<'static, str>,
    args: Value,
    keys: BTreeSet<DlmKey>,
}

impl ReadKey {
    /// Start a read descriptor.
    ///
    /// `identity` names the call site (`"project.get_members"`); `args` is
    /// every input that changes the result, shard included.
    ///
    /// Panics on an empty identity: two call sites sharing a dependency set
    /// would otherwise collide on the same storage key. Panics when `args`
    /// cannot be encoded: the call site could never hit.
    pub fn new(identity: impl Into<Cow<'static, str>>, args: impl Serialize) -> Self {
        let identity = identity.into();
        assert!(
            !identity.trim().is_empty(),
            "read cache key requires a non-empty call-site identity"
        );
        let args = match serde_json::to_value(&args) {
            Ok(value) => value,
            Err(e) => panic!("read cache key {} has unencodable arguments: {}", identity, e),
        };
        Self {
            identity,
            args,
            keys: BTreeSet::new(),
        }
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Serialized argument tuple.
    pub fn args(&self) -> &Value {
        &self.args
    }

    /// A descriptor with no dependencies never touches the store.
    pub fn is_cacheable(&self) -> bool {
        !self.keys.is_empty()
    }
}

impl DependencyKeys for ReadKey {
    fn dlm_keys(&self) -> &BTreeSet<DlmKey> {
        &self.keys
    }

    fn insert_key(&mut self, key: DlmKey) {
        self.keys.insert(key);
    }

    fn read_guard(&mut self, key: DlmKey) {
        self.keys.insert(key);
    }

    fn write_bubble(&mut self, _key: DlmKey) {}
}

// ============================================================================
// WRITE DESCRIPTOR
// ============================================================================

/// Collects the DLM keys a mutation must bump.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteKey {
    keys: BTreeSet<DlmKey>,
}

impl WriteKey {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consume the descriptor, yielding its keys.
    pub fn into_keys(self) -> BTreeSet<DlmKey> {
        self.keys
    }
}

impl DependencyKeys for WriteKey {
    fn dlm_keys(&self) -> &BTreeSet<DlmKey> {
        &self.keys
    }

    fn insert_key(&mut self, key: DlmKey) {
        self.keys.insert(key);
    }

    fn read_guard(&mut self, _key: DlmKey) {}

    fn write_bubble(&mut self, key: DlmKey) {
        self.keys.insert(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn ids() -> (Uuid, Uuid, Uuid) {
        (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7())
    }

    fn tags<K: DependencyKeys>(key: &K) -> Vec<DlmTag> {
        key.dlm_keys().iter().filter_map(|k| k.tag()).collect()
    }

    #[test]
    fn test_read_member_checks_account_master_only() {
        let (account, member, _) = ids();
        let key = ReadKey::new("account.get_member", (0, account, member))
            .account_member(account, member);

        let mut found = tags(&key);
        found.sort();
        assert_eq!(found, vec![DlmTag::AccountMaster, DlmTag::AccountMember]);
        assert!(!key.contains(&DlmKey::new(DlmTag::AccountMembersSet, &[account])));
    }

    #[test]
    fn test_write_member_bubbles_to_members_set() {
        let (account, member, _) = ids();
        let key = WriteKey::new().account_member(account, member);

        assert!(key.contains(&DlmKey::new(DlmTag::AccountMember, &[account, member])));
        assert!(key.contains(&DlmKey::new(DlmTag::AccountMembersSet, &[account])));
        assert!(!key.contains(&DlmKey::account_master(account)));
    }

    #[test]
    fn test_read_project_member_checks_both_masters() {
        let (account, project, member) = ids();
        let key = ReadKey::new("project.get_member", (0, account, project, member))
            .project_member(account, project, member);

        assert!(key.contains(&DlmKey::account_master(account)));
        assert!(key.contains(&DlmKey::project_master(project)));
        assert!(key.contains(&DlmKey::new(DlmTag::ProjectMember, &[project, member])));
        assert!(!key.contains(&DlmKey::new(DlmTag::ProjectMembersSet, &[project])));
        assert_eq!(key.dlm_keys().len(), 3);
    }

    #[test]
    fn test_write_project_member_bubbles_to_project_members_set() {
        let (account, project, member) = ids();
        let key = WriteKey::new().project_member(account, project, member);
        assert_eq!(key.dlm_keys().len(), 2);
        assert!(key.contains(&DlmKey::new(DlmTag::ProjectMembersSet, &[project])));
    }

    #[test]
    fn test_root_task_routes_to_project() {
        let (account, project, _) = ids();
        let via_task = ReadKey::new("q", ()).task(account, project, project);
        let via_project = ReadKey::new("q", ()).project(account, project);
        assert_eq!(via_task.dlm_keys(), via_project.dlm_keys());
        assert!(!via_task.contains(&DlmKey::new(DlmTag::Task, &[project])));

        let write_task = WriteKey::new().task(account, project, project);
        let write_project = WriteKey::new().project(account, project);
        assert_eq!(write_task, write_project);
    }

    #[test]
    fn test_children_set_write_bumps_parent_row() {
        let (account, project, parent) = ids();
        let key = WriteKey::new().task_children_set(account, project, parent);
        assert!(key.contains(&DlmKey::new(DlmTag::TaskChildrenSet, &[parent])));
        assert!(key.contains(&DlmKey::new(DlmTag::Task, &[parent])));
    }

    #[test]
    fn test_root_children_set_write_bumps_project_and_listing() {
        let (account, project, _) = ids();
        let key = WriteKey::new().task_children_set(account, project, project);
        assert!(key.contains(&DlmKey::new(DlmTag::Project, &[project])));
        assert!(key.contains(&DlmKey::new(DlmTag::AccountProjectsSet, &[account])));
        assert!(!key.contains(&DlmKey::new(DlmTag::Task, &[project])));
    }

    #[test]
    fn test_time_log_write_bubbles_to_known_sets() {
        let (account, project, member) = ids();
        let task = Uuid::now_v7();
        let log = Uuid::now_v7();

        let bare = WriteKey::new().time_log(account, project, log, None, None);
        assert_eq!(bare.dlm_keys().len(), 2);

        let full = WriteKey::new().time_log(account, project, log, Some(task), Some(member));
        assert!(full.contains(&DlmKey::new(DlmTag::ProjectTimeLogSet, &[project])));
        assert!(full.contains(&DlmKey::new(DlmTag::TaskTimeLogSet, &[task])));
        assert!(full.contains(&DlmKey::new(
            DlmTag::ProjectMemberTimeLogSet,
            &[project, member]
        )));
        assert_eq!(full.dlm_keys().len(), 4);
    }

    #[test]
    fn test_project_activities_write_bubbles_to_account_activities() {
        let (account, project, _) = ids();
        let key = WriteKey::new().project_activities(account, project);
        assert!(key.contains(&DlmKey::new(DlmTag::AccountActivities, &[account])));
    }

    #[test]
    fn test_builder_is_idempotent() {
        let (account, project, member) = ids();
        let once = WriteKey::new().project_member(account, project, member);
        let twice = WriteKey::new()
            .project_member(account, project, member)
            .project_member(account, project, member);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_combined_task_sets() {
        let (account, project, task) = ids();
        let key = WriteKey::new().combined_task_and_task_children_sets(
            account,
            project,
            &[project, task],
        );
        assert!(key.contains(&DlmKey::new(DlmTag::Project, &[project])));
        assert!(key.contains(&DlmKey::new(DlmTag::TaskChildrenSet, &[project])));
        assert!(key.contains(&DlmKey::new(DlmTag::Task, &[task])));
        assert!(key.contains(&DlmKey::new(DlmTag::TaskChildrenSet, &[task])));
        assert!(key.contains(&DlmKey::new(DlmTag::AccountProjectsSet, &[account])));
    }

    #[test]
    fn test_empty_read_key_is_not_cacheable() {
        let key = ReadKey::new("account.noop", ());
        assert!(!key.is_cacheable());
        let key = key.account(Uuid::now_v7());
        assert!(key.is_cacheable());
    }

    #[test]
    #[should_panic(expected = "non-empty call-site identity")]
    fn test_empty_identity_panics() {
        ReadKey::new("", ());
    }

    #[test]
    fn test_args_are_captured() {
        let account = Uuid::nil();
        let key = ReadKey::new("account.get", (3, account, Some(10)));
        assert_eq!(
            key.args(),
            &serde_json::json!([3, "00000000-0000-0000-0000-000000000000", 10])
        );
    }

    #[test]
    #[should_panic(expected = "unencodable arguments")]
    fn test_unencodable_args_panic() {
        struct Broken;
        impl Serialize for Broken {
            fn serialize<S: serde::Serializer>(&self, _: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("nope"))
            }
        }
        ReadKey::new("account.broken", Broken);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    #[derive(Debug, Clone)]
    enum Op {
        Account,
        AccountMember(usize),
        AccountProjectsSet,
        Project,
        ProjectMember(usize),
        ProjectActivities,
        Task(usize),
        TaskChildrenSet(usize),
        TimeLog(usize, Option<usize>),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            Just(Op::Account),
            (0..4usize).prop_map(Op::AccountMember),
            Just(Op::AccountProjectsSet),
            Just(Op::Project),
            (0..4usize).prop_map(Op::ProjectMember),
            Just(Op::ProjectActivities),
            (0..4usize).prop_map(Op::Task),
            (0..4usize).prop_map(Op::TaskChildrenSet),
            ((0..4usize), proptest::option::of(0..4usize))
                .prop_map(|(log, member)| Op::TimeLog(log, member)),
        ]
    }

    struct Ids {
        account: Uuid,
        project: Uuid,
        pool: Vec<Uuid>,
    }

    impl Ids {
        fn new() -> Self {
            let project = Uuid::from_u128(0xAB);
            Self {
                account: Uuid::from_u128(0xA),
                project,
                // index 0 is the project itself, to exercise root routing.
                pool: vec![
                    project,
                    Uuid::from_u128(1),
                    Uuid::from_u128(2),
                    Uuid::from_u128(3),
                ],
            }
        }
    }

    fn apply<K: DependencyKeys>(key: K, op: &Op, ids: &Ids) -> K {
        let (a, p) = (ids.account, ids.project);
        match op {
            Op::Account => key.account(a),
            Op::AccountMember(i) => key.account_member(a, ids.pool[*i]),
            Op::AccountProjectsSet => key.account_projects_set(a),
            Op::Project => key.project(a, p),
            Op::ProjectMember(i) => key.project_member(a, p, ids.pool[*i]),
            Op::ProjectActivities => key.project_activities(a, p),
            Op::Task(i) => key.task(a, p, ids.pool[*i]),
            Op::TaskChildrenSet(i) => key.task_children_set(a, p, ids.pool[*i]),
            Op::TimeLog(i, m) => key.time_log(a, p, ids.pool[*i], None, m.map(|m| ids.pool[m])),
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(256))]

        /// Property: builder call order never changes the key set.
        #[test]
        fn prop_read_key_order_independent(
            ops in proptest::collection::vec(op_strategy(), 1..12),
            seed in any::<u64>(),
        ) {
            let ids = Ids::new();
            let mut shuffled = ops.clone();
            // Deterministic rotation + reversal as the permutation.
            let len = shuffled.len();
            shuffled.rotate_left((seed as usize) % len);
            shuffled.reverse();

            let forward = ops.iter().fold(ReadKey::new("q", 1), |k, op| apply(k, op, &ids));
            let permuted = shuffled.iter().fold(ReadKey::new("q", 1), |k, op| apply(k, op, &ids));
            prop_assert_eq!(forward.dlm_keys(), permuted.dlm_keys());

            let forward = ops.iter().fold(WriteKey::new(), |k, op| apply(k, op, &ids));
            let permuted = shuffled.iter().fold(WriteKey::new(), |k, op| apply(k, op, &ids));
            prop_assert_eq!(forward, permuted);
        }

        /// Property: repeating every call leaves the key set unchanged.
        #[test]
        fn prop_builder_idempotent(ops in proptest::collection::vec(op_strategy(), 1..12)) {
            let ids = Ids::new();
            let once = ops.iter().fold(WriteKey::new(), |k, op| apply(k, op, &ids));
            let twice = ops.iter().chain(ops.iter()).fold(WriteKey::new(), |k, op| apply(k, op, &ids));
            prop_assert_eq!(once, twice);
        }

        /// Property: reads always carry the account master guard; writes never do
        /// unless explicitly asked for.
        #[test]
        fn prop_guard_asymmetry(ops in proptest::collection::vec(op_strategy(), 1..12)) {
            let ids = Ids::new();
            let master = DlmKey::account_master(ids.account);
            let read = ops.iter().fold(ReadKey::new("q", 1), |k, op| apply(k, op, &ids));
            let write = ops.iter().fold(WriteKey::new(), |k, op| apply(k, op, &ids));
            prop_assert!(read.contains(&master));
            prop_assert!(!write.contains(&master));
        }
    }
}
