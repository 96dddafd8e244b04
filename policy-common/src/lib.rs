// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Shared vocabulary for the lifecycle policy engine.
//!
//! These are the types that cross the boundary between the policy engine and
//! the middleware client: dataset names, retention tiers, the canonical
//! naming scheme for policy-managed resources, and the read-only projections
//! of observed appliance state.

pub mod dataset;
pub mod naming;
pub mod replication;
pub mod state;
pub mod tier;

#[cfg(feature = "testing")]
pub mod testing;

pub use dataset::DatasetName;
pub use naming::naming_schema;
pub use naming::ReplicationTaskName;
pub use naming::SnapshotName;
pub use naming::REPLICATION_PREFIX;
pub use naming::SNAPSHOT_PREFIX;
pub use replication::Direction;
pub use replication::KeyFormat;
pub use replication::Lifetime;
pub use replication::ReplicationEdge;
pub use replication::ReplicationSettings;
pub use replication::ReplicationTransport;
pub use replication::RetentionPolicy;
pub use replication::TargetEncryption;
pub use state::ReplicationTaskRecord;
pub use state::SnapshotKind;
pub use state::SnapshotRecord;
pub use state::TaskId;
pub use tier::BoundaryConfig;
pub use tier::CronSchedule;
pub use tier::LifetimeUnit;
pub use tier::Tier;
pub use tier::TierSpec;
pub use tier::WeekStart;
