//! Dependency audit for write descriptors.
//!
//! A mutation helper that forgets a bubble-up registration leaves stale
//! records behind with no runtime signal. The audit recomputes, from the
//! rows a shard call reports as changed, the write-mode key set each row
//! requires and reports anything the declared [`WriteKey`] lacks.
//!
//! [`RequestCache::touch_audited`](crate::RequestCache::touch_audited) runs
//! it in debug builds and with the `dependency-audit` feature.

use std::fmt;

use tasktree_core::TouchedRow;

use crate::dlm::DlmKey;
use crate::key::{DependencyKeys, WriteKey};

/// A touched row whose invalidation keys were not all declared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditViolation {
    pub row: TouchedRow,
    pub missing: Vec<DlmKey>,
}

impl fmt::Display for AuditViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let missing: Vec<&str> = self.missing.iter().map(DlmKey::as_str).collect();
        write!(f, "{:?} requires undeclared keys [{}]", self.row, missing.join(", "))
    }
}

/// The write descriptor a single touched row requires.
pub fn required_keys(row: &TouchedRow) -> WriteKey {
    let key = WriteKey::new();
    match *row {
        TouchedRow::Account { account } => key.account(account),
        TouchedRow::AccountMember { account, member } => key.account_member(account, member),
        TouchedRow::Project { account, project } => key.project(account, project),
        TouchedRow::ProjectMember {
            account,
            project,
            member,
        } => key.project_member(account, project, member),
        TouchedRow::Task {
            account,
            project,
            task,
        } => key.task(account, project, task),
        TouchedRow::TaskChildren {
            account,
            project,
            parent,
        } => key.task_children_set(account, project, parent),
        TouchedRow::TimeLog {
            account,
            project,
            time_log,
            task,
            member,
        } => key.time_log(account, project, time_log, task, member),
    }
}

/// Check `declared` covers every row in `touched`.
pub fn verify_write(declared: &WriteKey, touched: &[TouchedRow]) -> Vec<AuditViolation> {
    touched
        .iter()
        .filter_map(|row| {
            let missing: Vec<DlmKey> = required_keys(row)
                .into_keys()
                .into_iter()
                .filter(|key| !declared.contains(key))
                .collect();
            if missing.is_empty() {
                None
            } else {
                Some(AuditViolation {
                    row: row.clone(),
                    missing,
                })
            }
        })
        .collect()
}

/// Whether audited touches are checked in this build.
pub const fn audit_enabled() -> bool {
    cfg!(any(debug_assertions, feature = "dependency-audit"))
}
