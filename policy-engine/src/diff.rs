// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Desired-vs-observed diffing into an ordered action list.
//!
//! Ordering discipline: snapshot deletes, then snapshot creates, then
//! replication task deletes, updates, creates. Deletes come before
//! anything that could collide with or reference the deleted resource, and
//! a dataset's snapshot deletions always precede task updates that
//! reference the dataset.

use crate::retention::RetentionPlan;
use chrono::DateTime;
use chrono::Utc;
use policy_common::DatasetName;
use policy_common::ReplicationSettings;
use policy_common::ReplicationTaskRecord;
use policy_common::SnapshotRecord;
use policy_common::TaskId;
use policy_common::Tier;
use std::collections::BTreeMap;
use std::fmt;

/// One reconciliation step. Produced once per pass, consumed exactly once
/// by the convergence executor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconcileAction {
    CreateSnapshot {
        dataset: DatasetName,
        tier: Tier,
        timestamp: DateTime<Utc>,
        recursive: bool,
    },
    DeleteSnapshot {
        record: SnapshotRecord,
    },
    CreateReplicationTask {
        settings: ReplicationSettings,
    },
    UpdateReplicationTask {
        id: TaskId,
        settings: ReplicationSettings,
    },
    DeleteReplicationTask {
        id: TaskId,
        name: String,
    },
}

/// What a failed action blocks. Actions sharing a key after a failure are
/// skipped rather than attempted against state known to be wrong.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DependencyKey {
    Snapshot { dataset: DatasetName, tier: Option<Tier> },
    Task { name: String },
}

impl fmt::Display for DependencyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DependencyKey::Snapshot { dataset, tier: Some(tier) } => {
                write!(f, "snapshot {dataset} {tier}")
            }
            DependencyKey::Snapshot { dataset, tier: None } => {
                write!(f, "snapshot {dataset}")
            }
            DependencyKey::Task { name } => write!(f, "task {name}"),
        }
    }
}

impl ReconcileAction {
    pub fn dependency_key(&self) -> DependencyKey {
        match self {
            ReconcileAction::CreateSnapshot { dataset, tier, .. } => {
                DependencyKey::Snapshot {
                    dataset: dataset.clone(),
                    tier: Some(*tier),
                }
            }
            ReconcileAction::DeleteSnapshot { record } => {
                DependencyKey::Snapshot {
                    dataset: record.dataset.clone(),
                    tier: record.tier(),
                }
            }
            ReconcileAction::CreateReplicationTask { settings }
            | ReconcileAction::UpdateReplicationTask { settings, .. } => {
                DependencyKey::Task { name: settings.name.clone() }
            }
            ReconcileAction::DeleteReplicationTask { name, .. } => {
                DependencyKey::Task { name: name.clone() }
            }
        }
    }

    fn rank(&self) -> u8 {
        match self {
            ReconcileAction::DeleteSnapshot { .. } => 0,
            ReconcileAction::CreateSnapshot { .. } => 1,
            ReconcileAction::DeleteReplicationTask { .. } => 2,
            ReconcileAction::UpdateReplicationTask { .. } => 3,
            ReconcileAction::CreateReplicationTask { .. } => 4,
        }
    }
}

/// Orders a pass's actions under the fixed ordering discipline. The sort is
/// stable, so actions of the same kind keep their emission order.
pub fn order_actions(mut actions: Vec<ReconcileAction>) -> Vec<ReconcileAction> {
    actions.sort_by_key(ReconcileAction::rank);
    actions
}

/// Actions realizing a retention plan for one dataset.
pub fn snapshot_actions(
    dataset: &DatasetName,
    plan: RetentionPlan,
    recursive: bool,
) -> Vec<ReconcileAction> {
    let mut actions: Vec<ReconcileAction> = plan
        .delete
        .into_iter()
        .map(|record| ReconcileAction::DeleteSnapshot { record })
        .collect();
    actions.extend(plan.create.into_iter().map(|(tier, timestamp)| {
        ReconcileAction::CreateSnapshot {
            dataset: dataset.clone(),
            tier,
            timestamp,
            recursive,
        }
    }));
    actions
}

/// The removal path: delete every managed snapshot, touch nothing else.
pub fn snapshot_removal_actions(
    records: Vec<SnapshotRecord>,
) -> Vec<ReconcileAction> {
    records
        .into_iter()
        .filter(SnapshotRecord::is_managed)
        .map(|record| ReconcileAction::DeleteSnapshot { record })
        .collect()
}

/// Name-matched create/update/delete for replication tasks.
///
/// An observed task whose settings already equal the desired settings
/// produces no action at all.
pub fn replication_actions(
    desired: Vec<ReplicationSettings>,
    observed: Vec<ReplicationTaskRecord>,
) -> Vec<ReconcileAction> {
    let mut observed_by_name: BTreeMap<String, ReplicationTaskRecord> =
        observed
            .into_iter()
            .map(|record| (record.settings.name.clone(), record))
            .collect();

    let mut actions = Vec::new();
    for settings in desired {
        match observed_by_name.remove(&settings.name) {
            None => {
                actions.push(ReconcileAction::CreateReplicationTask {
                    settings,
                });
            }
            Some(record) if record.settings == settings => {}
            Some(record) => {
                actions.push(ReconcileAction::UpdateReplicationTask {
                    id: record.id,
                    settings,
                });
            }
        }
    }
    // Anything observed but no longer desired goes away.
    actions.extend(observed_by_name.into_values().map(|record| {
        ReconcileAction::DeleteReplicationTask {
            id: record.id,
            name: record.settings.name,
        }
    }));
    actions
}

/// The removal path for replication: delete every observed managed task.
pub fn replication_removal_actions(
    observed: Vec<ReplicationTaskRecord>,
) -> Vec<ReconcileAction> {
    observed
        .into_iter()
        .map(|record| ReconcileAction::DeleteReplicationTask {
            id: record.id,
            name: record.settings.name,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use policy_common::Direction;
    use policy_common::ReplicationTransport;
    use policy_common::RetentionPolicy;
    use policy_common::SnapshotName;
    use policy_common::TargetEncryption;

    fn dataset() -> DatasetName {
        "tank/data".parse().unwrap()
    }

    fn settings(name: &str, enabled: bool) -> ReplicationSettings {
        ReplicationSettings {
            name: name.to_string(),
            direction: Direction::Push,
            transport: ReplicationTransport::Local,
            source_dataset: dataset(),
            target_dataset: "backup/data".parse().unwrap(),
            recursive: false,
            naming_schemas: vec!["auto-daily-%Y-%m-%d_%H:%M".to_string()],
            schedule: None,
            retention: RetentionPolicy::Source,
            encryption: TargetEncryption::PreserveSource,
            enabled,
        }
    }

    #[test]
    fn ordering_puts_deletes_before_creates_and_task_changes_last() {
        let ts = Utc.with_ymd_and_hms(2026, 8, 25, 14, 0, 0).unwrap();
        let record = SnapshotRecord::from_remote(
            dataset(),
            &SnapshotName::new(Tier::Hourly, ts).to_string(),
        );
        let shuffled = vec![
            ReconcileAction::CreateReplicationTask {
                settings: settings("auto-repl-tank_data", true),
            },
            ReconcileAction::CreateSnapshot {
                dataset: dataset(),
                tier: Tier::Hourly,
                timestamp: ts,
                recursive: false,
            },
            ReconcileAction::UpdateReplicationTask {
                id: TaskId(3),
                settings: settings("auto-repl-tank_other", true),
            },
            ReconcileAction::DeleteSnapshot { record: record.clone() },
            ReconcileAction::DeleteReplicationTask {
                id: TaskId(9),
                name: "auto-repl-tank_gone".to_string(),
            },
        ];

        let ordered = order_actions(shuffled);
        let ranks: Vec<u8> =
            ordered.iter().map(ReconcileAction::rank).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3, 4]);
        // Snapshot deletion lands before the task update that references
        // the dataset.
        assert_matches::assert_matches!(
            ordered[0],
            ReconcileAction::DeleteSnapshot { .. }
        );
    }

    #[test]
    fn replication_diff_matches_by_name() {
        let unchanged = settings("auto-repl-tank_a", true);
        let drifted_desired = settings("auto-repl-tank_b", true);
        let drifted_observed = settings("auto-repl-tank_b", false);
        let fresh = settings("auto-repl-tank_c", true);
        let stale = settings("auto-repl-tank_d", true);

        let actions = replication_actions(
            vec![unchanged.clone(), drifted_desired.clone(), fresh.clone()],
            vec![
                ReplicationTaskRecord {
                    id: TaskId(1),
                    settings: unchanged,
                },
                ReplicationTaskRecord {
                    id: TaskId(2),
                    settings: drifted_observed,
                },
                ReplicationTaskRecord { id: TaskId(4), settings: stale },
            ],
        );

        assert_eq!(
            actions,
            vec![
                ReconcileAction::UpdateReplicationTask {
                    id: TaskId(2),
                    settings: drifted_desired,
                },
                ReconcileAction::CreateReplicationTask { settings: fresh },
                ReconcileAction::DeleteReplicationTask {
                    id: TaskId(4),
                    name: "auto-repl-tank_d".to_string(),
                },
            ]
        );
    }

    #[test]
    fn removal_paths_emit_only_deletes() {
        let records = vec![
            SnapshotRecord::from_remote(
                dataset(),
                "auto-daily-2026-08-25_00:00",
            ),
            SnapshotRecord::from_remote(dataset(), "keep-me"),
        ];
        let actions = snapshot_removal_actions(records);
        assert_eq!(actions.len(), 1);
        assert_matches::assert_matches!(
            &actions[0],
            ReconcileAction::DeleteSnapshot { record }
                if record.id == "tank/data@auto-daily-2026-08-25_00:00"
        );

        let actions = replication_removal_actions(vec![
            ReplicationTaskRecord {
                id: TaskId(5),
                settings: settings("auto-repl-tank_data", true),
            },
        ]);
        assert_eq!(
            actions,
            vec![ReconcileAction::DeleteReplicationTask {
                id: TaskId(5),
                name: "auto-repl-tank_data".to_string(),
            }]
        );
    }
}
