// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The canonical naming scheme for policy-managed resources.
//!
//! Snapshots are named `auto-<tier>-YYYY-MM-DD_HH:MM`; replication tasks are
//! named `auto-repl-<source>` with slashes replaced by underscores. Only
//! resources whose names decode under this scheme are ever touched by the
//! engine. Decoding fails soft (returns `None`), so snapshots and tasks
//! created by hand are invisible to the engine rather than at risk from it.
//!
//! The timestamp encoding is zero-padded and most-significant-field-first,
//! so for a fixed tier, lexicographic order of encoded names equals
//! chronological order.

use crate::dataset::DatasetName;
use crate::tier::Tier;
use chrono::DateTime;
use chrono::NaiveDateTime;
use chrono::Timelike;
use chrono::Utc;
use std::fmt;

pub const SNAPSHOT_PREFIX: &str = "auto-";
pub const REPLICATION_PREFIX: &str = "auto-repl-";

/// strftime format of the timestamp part, minute precision.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H:%M";

/// The middleware-side naming schema (with strftime placeholders) for a
/// tier's snapshot task payloads.
pub fn naming_schema(tier: Tier) -> String {
    format!("{SNAPSHOT_PREFIX}{tier}-{TIMESTAMP_FORMAT}")
}

/// The decoded canonical name of a policy-managed snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SnapshotName {
    tier: Tier,
    timestamp: DateTime<Utc>,
}

impl SnapshotName {
    /// Builds the name for `tier` at `timestamp`, truncating to minute
    /// precision (the encoding carries no seconds).
    pub fn new(tier: Tier, timestamp: DateTime<Utc>) -> Self {
        let truncated = timestamp
            .with_second(0)
            .and_then(|t| t.with_nanosecond(0))
            .unwrap_or(timestamp);
        Self { tier, timestamp: truncated }
    }

    pub fn tier(&self) -> Tier {
        self.tier
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// Decodes a snapshot name, returning `None` for anything not managed by
    /// the policy engine (wrong prefix, unknown tier, malformed timestamp).
    pub fn parse(name: &str) -> Option<Self> {
        let rest = name.strip_prefix(SNAPSHOT_PREFIX)?;
        let (label, timestamp) = rest.split_once('-')?;
        // "repl" is not a tier, so replication task names fall out here.
        let tier: Tier = label.parse().ok()?;
        let naive =
            NaiveDateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).ok()?;
        Some(Self { tier, timestamp: naive.and_utc() })
    }
}

impl fmt::Display for SnapshotName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{SNAPSHOT_PREFIX}{}-{}",
            self.tier,
            self.timestamp.format(TIMESTAMP_FORMAT)
        )
    }
}

/// The name of a policy-managed replication task.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplicationTaskName(String);

impl ReplicationTaskName {
    /// The canonical task name for a replication whose source is `source`.
    pub fn for_source(source: &DatasetName) -> Self {
        Self(format!("{REPLICATION_PREFIX}{}", source.underscored()))
    }

    /// Accepts a task name only if it is policy-managed.
    pub fn parse(name: &str) -> Option<Self> {
        name.starts_with(REPLICATION_PREFIX)
            .then(|| Self(name.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReplicationTaskName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
