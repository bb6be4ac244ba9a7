//! Generation-tagged storage keys for value records.
//!
//! The storage key is a JSON document of everything a cached result depends
//! on. Its text is used verbatim as the value-store key, so a record is
//! write-once: a new snapshot or a new master epoch is a new location, never
//! an overwrite.
//!
//! # Wire format
//!
//! ```text
//! {"masterKey":"0","key":"project.get_members","dlmKeys":["amstr:..","pm:..:.."],"dlm":1700000000000,"args":[0,".."]}
//! ```
//!
//! Field order is fixed by the struct and `dlmKeys` is sorted, so equal
//! inputs always produce byte-identical keys.

use std::collections::BTreeSet;

use serde::Serialize;
use serde_json::Value;
use tasktree_core::CacheError;

use crate::dlm::DlmKey;
use crate::key::{DependencyKeys, ReadKey};
use crate::snapshot::Snapshot;

#[derive(Debug, Serialize)]
struct StorageKey<'a> {
    #[serde(rename = "masterKey")]
    master_epoch: &'a str,
    #[serde(rename = "key")]
    identity: &'a str,
    #[serde(rename = "dlmKeys")]
    dlm_keys: &'a BTreeSet<DlmKey>,
    #[serde(rename = "dlm")]
    snapshot: Snapshot,
    args: &'a Value,
}

/// Encode the storage key of `key` at `snapshot` under `master_epoch`.
pub fn encode(master_epoch: &str, key: &ReadKey, snapshot: Snapshot) -> Result<String, CacheError> {
    let storage_key = StorageKey {
        master_epoch,
        identity: key.identity(),
        dlm_keys: key.dlm_keys(),
        snapshot,
        args: key.args(),
    };

    serde_json::to_string(&storage_key).map_err(|e| CacheError::Serialization {
        identity: key.identity().to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn member_key(account: Uuid, member: Uuid) -> ReadKey {
        ReadKey::new("account.get_member", (0, account, member)).account_member(account, member)
    }

    #[test]
    fn test_wire_format() {
        let account = Uuid::nil();
        let key = ReadKey::new("account.get", (2, account)).account(account);
        let encoded = encode("0", &key, Snapshot::new(42)).unwrap();
        assert_eq!(
            encoded,
            concat!(
                r#"{"masterKey":"0","key":"account.get","#,
                r#""dlmKeys":["a:00000000-0000-0000-0000-000000000000","#,
                r#""amstr:00000000-0000-0000-0000-000000000000"],"#,
                r#""dlm":42,"args":[2,"00000000-0000-0000-0000-000000000000"]}"#
            )
        );
    }

    #[test]
    fn test_builder_order_does_not_change_key() {
        let (a, p, m) = (Uuid::now_v7(), Uuid::now_v7(), Uuid::now_v7());
        let first = ReadKey::new("joint", (a, p, m))
            .account_member(a, m)
            .project_member(a, p, m);
        let second = ReadKey::new("joint", (a, p, m))
            .project_member(a, p, m)
            .account_member(a, m);
        assert_eq!(
            encode("0", &first, Snapshot::new(9)).unwrap(),
            encode("0", &second, Snapshot::new(9)).unwrap()
        );
    }

    #[test]
    fn test_each_component_changes_key() {
        let (a, m) = (Uuid::now_v7(), Uuid::now_v7());
        let base = encode("0", &member_key(a, m), Snapshot::new(1)).unwrap();

        assert_ne!(base, encode("1", &member_key(a, m), Snapshot::new(1)).unwrap());
        assert_ne!(base, encode("0", &member_key(a, m), Snapshot::new(2)).unwrap());

        let other_identity =
            ReadKey::new("account.get_member_v2", (0, a, m)).account_member(a, m);
        assert_ne!(base, encode("0", &other_identity, Snapshot::new(1)).unwrap());

        let other_args = ReadKey::new("account.get_member", (1, a, m)).account_member(a, m);
        assert_ne!(base, encode("0", &other_args, Snapshot::new(1)).unwrap());

        let other_deps = member_key(a, m).account(a);
        assert_ne!(base, encode("0", &other_deps, Snapshot::new(1)).unwrap());
    }
}
