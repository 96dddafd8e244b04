// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Declarative policy requests and their compile-time validation.
//!
//! Validation runs before any remote call; a [`ConfigError`] fails the
//! whole pass with nothing mutated.

use crate::topology::Discovery;
use policy_common::naming_schema;
use policy_common::BoundaryConfig;
use policy_common::DatasetName;
use policy_common::Direction;
use policy_common::Lifetime;
use policy_common::ReplicationSettings;
use policy_common::ReplicationTaskName;
use policy_common::ReplicationTransport;
use policy_common::RetentionPolicy;
use policy_common::TargetEncryption;
use policy_common::TierSpec;
use serde::Deserialize;
use serde::Serialize;

/// Whether the policy's resources should exist.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum State {
    #[default]
    Present,
    /// Removal path: delete every managed resource this policy owns.
    Absent,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("policy for {dataset} enables no tiers")]
    EmptyPolicy { dataset: DatasetName },
    #[error("replication source and target are both {dataset}")]
    SourceIsTarget { dataset: DatasetName },
    #[error("pull replication requires an SSH transport")]
    PullRequiresSsh,
    #[error("sources {first} and {second} both map to target {target}")]
    TargetConflict {
        target: DatasetName,
        first: DatasetName,
        second: DatasetName,
    },
}

/// Tiered snapshot retention policy for one dataset.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotPolicyRequest {
    pub dataset: DatasetName,
    pub tiers: TierSpec,
    /// Snapshot child datasets atomically with the parent.
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub state: State,
}

impl SnapshotPolicyRequest {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.state == State::Present && self.tiers.is_empty() {
            return Err(ConfigError::EmptyPolicy {
                dataset: self.dataset.clone(),
            });
        }
        Ok(())
    }
}

/// Replication policy: mirror `source` to `target` across the given tiers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationPolicyRequest {
    pub source: DatasetName,
    pub target: DatasetName,
    pub tiers: TierSpec,
    pub direction: Direction,
    pub transport: ReplicationTransport,
    #[serde(default)]
    pub discovery: Discovery,
    /// Replicate each source's children along with it.
    #[serde(default)]
    pub recursive: bool,
    #[serde(default)]
    pub encryption: TargetEncryption,
    #[serde(default)]
    pub state: State,
}

impl ReplicationPolicyRequest {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source == self.target {
            return Err(ConfigError::SourceIsTarget {
                dataset: self.source.clone(),
            });
        }
        if self.direction == Direction::Pull
            && self.transport == ReplicationTransport::Local
        {
            return Err(ConfigError::PullRequiresSsh);
        }
        if self.state == State::Present && self.tiers.is_empty() {
            return Err(ConfigError::EmptyPolicy {
                dataset: self.source.clone(),
            });
        }
        Ok(())
    }

    /// Compiles the desired task settings for one resolved source/target
    /// pair.
    ///
    /// Both directions run on the most frequent tier's cadence; an
    /// automatic task with no schedule would never trigger. Push tasks
    /// mirror the source's retention; pull tasks carry explicit per-tier
    /// lifetimes, plus the simple lifetime fields from the
    /// longest-retention tier, which the middleware requires alongside the
    /// array.
    pub fn desired_settings(
        &self,
        source: &DatasetName,
        target: &DatasetName,
        boundaries: &BoundaryConfig,
    ) -> ReplicationSettings {
        let naming_schemas: Vec<String> =
            self.tiers.enabled_tiers().map(naming_schema).collect();
        let schedule = self
            .tiers
            .most_frequent_tier()
            .map(|tier| tier.schedule(boundaries));

        let retention = match self.direction {
            Direction::Push => RetentionPolicy::Source,
            Direction::Pull => {
                let lifetimes = self
                    .tiers
                    .enabled_tiers()
                    .map(|tier| Lifetime {
                        schedule: tier.schedule(boundaries),
                        value: self.tiers.retain_count(tier),
                        unit: tier.lifetime_unit(),
                    })
                    .collect();
                let (lifetime_value, lifetime_unit) =
                    match self.tiers.longest_retention() {
                        Some((tier, count)) => (count, tier.lifetime_unit()),
                        None => (0, policy_common::LifetimeUnit::Hour),
                    };
                RetentionPolicy::Custom {
                    lifetimes,
                    lifetime_value,
                    lifetime_unit,
                }
            }
        };

        ReplicationSettings {
            name: ReplicationTaskName::for_source(source).as_str().to_string(),
            direction: self.direction,
            transport: self.transport.clone(),
            source_dataset: source.clone(),
            target_dataset: target.clone(),
            recursive: self.recursive,
            naming_schemas,
            schedule,
            retention,
            encryption: self.encryption.clone(),
            enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use policy_common::LifetimeUnit;
    use policy_common::Tier;

    fn base_request() -> ReplicationPolicyRequest {
        ReplicationPolicyRequest {
            source: "tank/data".parse().unwrap(),
            target: "backup/data".parse().unwrap(),
            tiers: TierSpec::new()
                .with_tier(Tier::Hourly, 24)
                .with_tier(Tier::Daily, 30),
            direction: Direction::Push,
            transport: ReplicationTransport::Local,
            discovery: Discovery::None,
            recursive: false,
            encryption: TargetEncryption::PreserveSource,
            state: State::Present,
        }
    }

    #[test]
    fn validation_rejects_degenerate_requests() {
        let mut request = base_request();
        request.target = request.source.clone();
        assert_matches!(
            request.validate(),
            Err(ConfigError::SourceIsTarget { .. })
        );

        let mut request = base_request();
        request.direction = Direction::Pull;
        assert_matches!(request.validate(), Err(ConfigError::PullRequiresSsh));

        let mut request = base_request();
        request.tiers = TierSpec::new().with_tier(Tier::Hourly, 0);
        assert_matches!(
            request.validate(),
            Err(ConfigError::EmptyPolicy { .. })
        );

        // An empty tier set is fine when tearing the policy down.
        let mut request = base_request();
        request.tiers = TierSpec::new();
        request.state = State::Absent;
        assert_matches!(request.validate(), Ok(()));
    }

    #[test]
    fn push_settings_bind_to_source_retention() {
        let request = base_request();
        let boundaries = BoundaryConfig::default();
        let settings = request.desired_settings(
            &request.source,
            &request.target,
            &boundaries,
        );
        assert_eq!(settings.name, "auto-repl-tank_data");
        // Push tasks still need a schedule to trigger on; they run on the
        // most frequent tier's cadence.
        assert_eq!(settings.schedule, Some(Tier::Hourly.schedule(&boundaries)));
        assert_eq!(settings.retention, RetentionPolicy::Source);
        assert_eq!(
            settings.naming_schemas,
            vec![
                "auto-hourly-%Y-%m-%d_%H:%M".to_string(),
                "auto-daily-%Y-%m-%d_%H:%M".to_string(),
            ]
        );
        assert!(settings.enabled);
    }

    #[test]
    fn pull_settings_carry_schedule_and_lifetimes() {
        let mut request = base_request();
        request.direction = Direction::Pull;
        request.transport = ReplicationTransport::Ssh { credential_id: 2 };
        let boundaries = BoundaryConfig::default();
        let settings = request.desired_settings(
            &request.source,
            &request.target,
            &boundaries,
        );

        // Hourly is the most frequent enabled tier.
        assert_eq!(settings.schedule, Some(Tier::Hourly.schedule(&boundaries)));
        assert_matches!(
            settings.retention,
            RetentionPolicy::Custom {
                ref lifetimes,
                lifetime_value: 30,
                lifetime_unit: LifetimeUnit::Day,
            } if lifetimes.len() == 2
        );
    }
}
