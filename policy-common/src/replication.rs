// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Replication relationships and task settings.

use crate::dataset::DatasetName;
use crate::naming::ReplicationTaskName;
use crate::tier::CronSchedule;
use crate::tier::LifetimeUnit;
use crate::tier::Tier;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeSet;

/// Which side initiates the transfer.
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
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    /// The appliance sends snapshots to the target.
    Push,
    /// The appliance pulls snapshots from a remote source.
    Pull,
}

/// How replicated data moves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ReplicationTransport {
    /// Between pools on the same appliance; no credentials involved.
    Local,
    /// Over SSH, using a keychain credential already known to the appliance.
    Ssh { credential_id: i64 },
}

/// Encryption of the replicated data at the target.
#[derive(
    Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TargetEncryption {
    /// Keep the source dataset's encryption as-is.
    #[default]
    PreserveSource,
    /// Encrypt at the target, inheriting the key from the target's parent.
    Inherit,
    /// Encrypt at the target with an explicit key.
    Key { key: String, format: KeyFormat },
}

#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "UPPERCASE")]
pub enum KeyFormat {
    Hex,
    Passphrase,
}

/// One per-tier retention entry in a pull task's custom retention policy.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifetime {
    pub schedule: CronSchedule,
    pub value: u32,
    pub unit: LifetimeUnit,
}

/// How the target decides which replicated snapshots to keep.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Mirror the source's retention (push tasks).
    Source,
    /// Explicit per-tier lifetimes. The middleware additionally requires the
    /// simple lifetime fields even when the array is present; they are set
    /// from the longest-retention tier.
    Custom {
        lifetimes: Vec<Lifetime>,
        lifetime_value: u32,
        lifetime_unit: LifetimeUnit,
    },
}

/// The full desired (or observed) configuration of one replication task.
///
/// Equality on this type is what decides update-vs-no-op in the diff engine,
/// so every field the engine manages must appear here.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationSettings {
    pub name: String,
    pub direction: Direction,
    pub transport: ReplicationTransport,
    pub source_dataset: DatasetName,
    pub target_dataset: DatasetName,
    pub recursive: bool,
    /// Naming schemas of the tiers this task replicates.
    pub naming_schemas: Vec<String>,
    /// Run schedule, the most frequent replicated tier's cadence.
    pub schedule: Option<CronSchedule>,
    pub retention: RetentionPolicy,
    pub encryption: TargetEncryption,
    pub enabled: bool,
}

/// One desired source/target replication pair.
///
/// Produced by the topology resolver; the remote task identifier is not part
/// of the edge (it is observed state, matched up by the diff engine).
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct ReplicationEdge {
    pub source: DatasetName,
    pub target: DatasetName,
    pub tiers: BTreeSet<Tier>,
    pub direction: Direction,
}

impl ReplicationEdge {
    /// The canonical task name for this edge.
    pub fn task_name(&self) -> ReplicationTaskName {
        ReplicationTaskName::for_source(&self.source)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(source: &str, direction: Direction) -> ReplicationEdge {
        ReplicationEdge {
            source: source.parse().unwrap(),
            target: "backup/data".parse().unwrap(),
            tiers: [Tier::Daily].into_iter().collect(),
            direction,
        }
    }

    #[test]
    fn edges_order_by_source_path() {
        let mut edges = vec![
            edge("tank/vms/web", Direction::Push),
            edge("tank/data", Direction::Pull),
            edge("tank/vms/db", Direction::Push),
        ];
        edges.sort();
        let sources: Vec<&str> =
            edges.iter().map(|e| e.source.as_str()).collect();
        assert_eq!(
            sources,
            vec!["tank/data", "tank/vms/db", "tank/vms/web"]
        );
    }
}
