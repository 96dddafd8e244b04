// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tiered retention evaluation. Pure; no I/O.

use chrono::DateTime;
use chrono::Utc;
use policy_common::BoundaryConfig;
use policy_common::SnapshotRecord;
use policy_common::Tier;
use policy_common::TierSpec;

/// What retention wants done for one dataset: snapshots to take now, and
/// snapshots that have aged out.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RetentionPlan {
    pub create: Vec<(Tier, DateTime<Utc>)>,
    pub delete: Vec<SnapshotRecord>,
}

/// Evaluates `tiers` against the observed records for one dataset.
///
/// Tiers are independent: a record only ever counts against the tier its
/// name carries. Tiers observed remotely but absent from (or zeroed in)
/// `tiers` retain nothing, so their managed snapshots are all marked for
/// deletion. Unmanaged records are never marked.
///
/// A create is emitted for an enabled tier only when no existing record
/// falls within the tier's current boundary window, so re-running within
/// the same window cannot duplicate a snapshot.
pub fn evaluate(
    records: &[SnapshotRecord],
    tiers: &TierSpec,
    now: DateTime<Utc>,
    boundaries: &BoundaryConfig,
) -> RetentionPlan {
    let mut plan = RetentionPlan::default();

    for tier in Tier::ALL {
        let mut matching: Vec<&SnapshotRecord> = records
            .iter()
            .filter(|record| record.tier() == Some(tier))
            .collect();
        matching.sort_by_key(|record| std::cmp::Reverse(record.created()));

        let retain = tiers.retain_count(tier) as usize;
        plan.delete
            .extend(matching.iter().skip(retain).map(|record| (*record).clone()));

        if retain == 0 {
            continue;
        }
        let boundary = tier.boundary(now, boundaries);
        let next = tier.next_boundary(boundary);
        let covered = matching.iter().any(|record| {
            record
                .created()
                .map(|created| boundary <= created && created < next)
                .unwrap_or(false)
        });
        if !covered {
            plan.create.push((tier, boundary));
        }
    }

    plan
}
