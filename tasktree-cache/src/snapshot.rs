//! Snapshots of a dependency key set.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tasktree_core::UnixMillis;

/// The newest DLM timestamp across a dependency key set.
///
/// A snapshot is part of the storage key, so any bump of any dependency
/// moves every future lookup to a new, empty storage location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(UnixMillis);

impl Snapshot {
    /// No dependency was ever bumped.
    pub const ZERO: Snapshot = Snapshot(0);

    pub fn new(millis: UnixMillis) -> Self {
        Self(millis)
    }

    /// Fold DLM timestamps into a snapshot. An empty input is [`Snapshot::ZERO`].
    pub fn from_timestamps<I>(timestamps: I) -> Self
    where
        I: IntoIterator<Item = UnixMillis>,
    {
        Self(timestamps.into_iter().fold(0, UnixMillis::max))
    }

    pub fn millis(&self) -> UnixMillis {
        self.0
    }

    /// Check if this snapshot is newer than another.
    pub fn is_newer_than(&self, other: &Snapshot) -> bool {
        self.0 > other.0
    }

    /// Wall-clock time of the last bump, `None` for [`Snapshot::ZERO`].
    pub fn as_datetime(&self) -> Option<DateTime<Utc>> {
        if self.0 == 0 {
            return None;
        }
        DateTime::from_timestamp_millis(self.0)
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: adding a bump never lowers the snapshot, and a bump newer
        /// than every prior timestamp always yields a distinct snapshot.
        #[test]
        fn prop_bump_is_monotonic(
            timestamps in proptest::collection::vec(0i64..1_000_000, 0..16),
            bump in 0i64..2_000_000,
        ) {
            let before = Snapshot::from_timestamps(timestamps.iter().copied());
            let after = Snapshot::from_timestamps(timestamps.iter().copied().chain([bump]));
            prop_assert!(after >= before);
            if bump > before.millis() {
                prop_assert_ne!(after, before);
                prop_assert_eq!(after.millis(), bump);
            }
        }
    }
}
