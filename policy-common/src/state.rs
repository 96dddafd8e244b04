// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Read-only projections of observed appliance state.
//!
//! These are fetched once per reconciliation pass and discarded after the
//! diff engine consumes them; the appliance is the sole source of truth.

use crate::dataset::DatasetName;
use crate::naming::SnapshotName;
use crate::replication::ReplicationSettings;
use crate::tier::Tier;
use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::fmt;

/// Remote identifier of a replication task.
#[derive(
    Clone,
    Copy,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(transparent)]
pub struct TaskId(pub i64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One snapshot observed on the appliance.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotRecord {
    pub dataset: DatasetName,
    /// Raw remote identifier, e.g. `tank/data@auto-hourly-2026-08-25_14:00`.
    pub id: String,
    pub kind: SnapshotKind,
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum SnapshotKind {
    /// The name decodes under the canonical scheme.
    Managed { tier: Tier, created: DateTime<Utc> },
    /// Anything else. Unmanaged snapshots are never touched.
    Unmanaged,
}

impl SnapshotRecord {
    /// Classifies a remote snapshot listing entry by decoding its name.
    pub fn from_remote(dataset: DatasetName, snapshot_name: &str) -> Self {
        let id = format!("{dataset}@{snapshot_name}");
        let kind = match SnapshotName::parse(snapshot_name) {
            Some(name) => SnapshotKind::Managed {
                tier: name.tier(),
                created: name.timestamp(),
            },
            None => SnapshotKind::Unmanaged,
        };
        Self { dataset, id, kind }
    }

    pub fn tier(&self) -> Option<Tier> {
        match self.kind {
            SnapshotKind::Managed { tier, .. } => Some(tier),
            SnapshotKind::Unmanaged => None,
        }
    }

    pub fn created(&self) -> Option<DateTime<Utc>> {
        match self.kind {
            SnapshotKind::Managed { created, .. } => Some(created),
            SnapshotKind::Unmanaged => None,
        }
    }

    pub fn is_managed(&self) -> bool {
        matches!(self.kind, SnapshotKind::Managed { .. })
    }
}

/// One replication task observed on the appliance.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReplicationTaskRecord {
    pub id: TaskId,
    pub settings: ReplicationSettings,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn classifies_managed_and_unmanaged_records() {
        let dataset: DatasetName = "tank/data".parse().unwrap();

        let managed = SnapshotRecord::from_remote(
            dataset.clone(),
            "auto-hourly-2026-08-25_14:00",
        );
        assert_eq!(managed.id, "tank/data@auto-hourly-2026-08-25_14:00");
        assert_eq!(managed.tier(), Some(Tier::Hourly));
        assert_eq!(
            managed.created(),
            Some(Utc.with_ymd_and_hms(2026, 8, 25, 14, 0, 0).unwrap())
        );

        let unmanaged =
            SnapshotRecord::from_remote(dataset, "before-upgrade");
        assert!(!unmanaged.is_managed());
        assert_eq!(unmanaged.tier(), None);
    }
}
