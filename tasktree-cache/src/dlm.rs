//! DLM keys: bump-only version tokens, one per invalidation granularity.
//!
//! A DLM key is a type tag followed by the ids of the entity it guards,
//! joined with `:` (e.g. `am:<account>:<member>`). The store maps each key
//! to the unix-millis timestamp of the last committed mutation that touched
//! it. Keys are never deleted; a key that was never bumped resolves to 0.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Separator between the tag and each id.
const SEPARATOR: char = ':';

/// Invalidation granularity of a DLM key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DlmTag {
    /// Global guard for everything an account owns (e.g. account deletion).
    AccountMaster,
    Account,
    AccountActivities,
    AccountMembersSet,
    AccountMember,
    AccountProjectsSet,
    /// Global guard for everything a project owns (archive, delete).
    ProjectMaster,
    Project,
    ProjectActivities,
    ProjectMembersSet,
    ProjectMember,
    Task,
    TaskChildrenSet,
    TimeLog,
    ProjectTimeLogSet,
    TaskTimeLogSet,
    ProjectMemberTimeLogSet,
}

impl DlmTag {
    /// Every tag, for exhaustive tests.
    pub const ALL: [DlmTag; 17] = [
        DlmTag::AccountMaster,
        DlmTag::Account,
        DlmTag::AccountActivities,
        DlmTag::AccountMembersSet,
        DlmTag::AccountMember,
        DlmTag::AccountProjectsSet,
        DlmTag::ProjectMaster,
        DlmTag::Project,
        DlmTag::ProjectActivities,
        DlmTag::ProjectMembersSet,
        DlmTag::ProjectMember,
        DlmTag::Task,
        DlmTag::TaskChildrenSet,
        DlmTag::TimeLog,
        DlmTag::ProjectTimeLogSet,
        DlmTag::TaskTimeLogSet,
        DlmTag::ProjectMemberTimeLogSet,
    ];

    /// Short prefix written into the store key.
    pub fn as_str(&self) -> &'static str {
        match self {
            DlmTag::AccountMaster => "amstr",
            DlmTag::Account => "a",
            DlmTag::AccountActivities => "aa",
            DlmTag::AccountMembersSet => "ams",
            DlmTag::AccountMember => "am",
            DlmTag::AccountProjectsSet => "aps",
            DlmTag::ProjectMaster => "pmstr",
            DlmTag::Project => "p",
            DlmTag::ProjectActivities => "pa",
            DlmTag::ProjectMembersSet => "pms",
            DlmTag::ProjectMember => "pm",
            DlmTag::Task => "t",
            DlmTag::TaskChildrenSet => "tcs",
            DlmTag::TimeLog => "tl",
            DlmTag::ProjectTimeLogSet => "ptls",
            DlmTag::TaskTimeLogSet => "ttls",
            DlmTag::ProjectMemberTimeLogSet => "pmtls",
        }
    }

    /// Inverse of [`DlmTag::as_str`].
    pub fn from_prefix(prefix: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|tag| tag.as_str() == prefix)
    }

    /// Number of ids a key of this tag carries.
    pub fn arity(&self) -> usize {
        match self {
            DlmTag::AccountMember | DlmTag::ProjectMember | DlmTag::ProjectMemberTimeLogSet => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for DlmTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable DLM key.
///
/// Ordering is lexicographic on the rendered key so that a sorted key list
/// is reproducible across processes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DlmKey(String);

impl DlmKey {
    /// Build a key from its tag and the ids of the guarded entity.
    ///
    /// Panics when the number of ids does not match the tag's arity; keys
    /// are only built by the dependency DSL so this is a programming error.
    pub fn new(tag: DlmTag, ids: &[Uuid]) -> Self {
        assert_eq!(
            ids.len(),
            tag.arity(),
            "DLM key {} takes {} id(s)",
            tag,
            tag.arity()
        );
        let mut key = String::with_capacity(tag.as_str().len() + ids.len() * 37);
        key.push_str(tag.as_str());
        for id in ids {
            key.push(SEPARATOR);
            key.push_str(&id.to_string());
        }
        Self(key)
    }

    pub fn account_master(account: Uuid) -> Self {
        Self::new(DlmTag::AccountMaster, &[account])
    }

    pub fn project_master(project: Uuid) -> Self {
        Self::new(DlmTag::ProjectMaster, &[project])
    }

    /// The tag this key was built with.
    pub fn tag(&self) -> Option<DlmTag> {
        let prefix = self.0.split(SEPARATOR).next()?;
        DlmTag::from_prefix(prefix)
    }

    /// The rendered store key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DlmKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for DlmKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_format() {
        let account = Uuid::nil();
        let key = DlmKey::account_master(account);
        assert_eq!(key.as_str(), "amstr:00000000-0000-0000-0000-000000000000");
    }

    #[test]
    fn test_two_id_key_format() {
        let account = Uuid::now_v7();
        let member = Uuid::now_v7();
        let key = DlmKey::new(DlmTag::AccountMember, &[account, member]);
        assert_eq!(key.as_str(), format!("am:{}:{}", account, member));
        assert_eq!(key.tag(), Some(DlmTag::AccountMember));
    }

    #[test]
    #[should_panic(expected = "takes 2 id(s)")]
    fn test_wrong_arity_panics() {
        DlmKey::new(DlmTag::ProjectMember, &[Uuid::nil()]);
    }

    #[test]
    fn test_prefixes_are_unique_and_round_trip() {
        for tag in DlmTag::ALL {
            assert_eq!(DlmTag::from_prefix(tag.as_str()), Some(tag));
            let clashes = DlmTag::ALL
                .iter()
                .filter(|other| other.as_str() == tag.as_str())
                .count();
            assert_eq!(clashes, 1, "prefix {} reused", tag);
        }
    }

    #[test]
    fn test_same_id_different_tag_differs() {
        let id = Uuid::now_v7();
        let project = DlmKey::new(DlmTag::Project, &[id]);
        let task = DlmKey::new(DlmTag::Task, &[id]);
        assert_ne!(project, task);
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let key = DlmKey::account_master(Uuid::nil());
        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "\"amstr:00000000-0000-0000-0000-000000000000\"");
    }
}
