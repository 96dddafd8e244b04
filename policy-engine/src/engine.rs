// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The engine entry point: one fetch → diff → apply pass per request.

use crate::convergence;
use crate::convergence::PolicyResult;
use crate::diff;
use crate::diff::ReconcileAction;
use crate::request::ConfigError;
use crate::request::ReplicationPolicyRequest;
use crate::request::SnapshotPolicyRequest;
use crate::request::State;
use crate::retention;
use crate::topology;
use crate::topology::Discovery;
use crate::topology::ResolveError;
use chrono::DateTime;
use chrono::Utc;
use middleware_client::FetchError;
use middleware_client::MiddlewareApi;
use policy_common::BoundaryConfig;
use policy_common::ReplicationTaskRecord;
use slog::info;
use slog::o;
use slog::Logger;

/// Pass-level fatal error. Nothing has been mutated when one of these is
/// returned: validation runs before any remote call, and fetch failures
/// abort before the apply phase.
#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to fetch observed state")]
    Fetch(#[source] FetchError),
    #[error("failed to resolve replication topology")]
    Topology(#[source] ResolveError),
}

impl From<ResolveError> for ReconcileError {
    fn from(err: ResolveError) -> Self {
        match err {
            ResolveError::Config(err) => ReconcileError::Config(err),
            ResolveError::Fetch(err) => ReconcileError::Fetch(err),
            err @ ResolveError::InvalidTarget { .. } => {
                ReconcileError::Topology(err)
            }
        }
    }
}

pub struct PolicyEngine<M> {
    api: M,
    boundaries: BoundaryConfig,
    log: Logger,
}

impl<M: MiddlewareApi> PolicyEngine<M> {
    pub fn new(api: M, boundaries: BoundaryConfig, log: &Logger) -> Self {
        Self {
            api,
            boundaries,
            log: log.new(o!("component" => "PolicyEngine")),
        }
    }

    /// Computes the action list for a snapshot policy without applying it
    /// (dry run). Never invokes a write operation.
    pub async fn plan_snapshot_policy(
        &self,
        request: &SnapshotPolicyRequest,
    ) -> Result<Vec<ReconcileAction>, ReconcileError> {
        self.plan_snapshot_policy_at(request, Utc::now()).await
    }

    pub async fn plan_snapshot_policy_at(
        &self,
        request: &SnapshotPolicyRequest,
        now: DateTime<Utc>,
    ) -> Result<Vec<ReconcileAction>, ReconcileError> {
        request.validate()?;
        let records = self
            .api
            .list_snapshots(&request.dataset)
            .await
            .map_err(ReconcileError::Fetch)?;

        let actions = match request.state {
            State::Absent => diff::snapshot_removal_actions(records),
            State::Present => {
                let plan = retention::evaluate(
                    &records,
                    &request.tiers,
                    now,
                    &self.boundaries,
                );
                diff::snapshot_actions(
                    &request.dataset,
                    plan,
                    request.recursive,
                )
            }
        };
        Ok(diff::order_actions(actions))
    }

    /// Runs one full reconciliation pass for a snapshot policy.
    pub async fn reconcile_snapshot_policy(
        &self,
        request: &SnapshotPolicyRequest,
    ) -> Result<PolicyResult, ReconcileError> {
        self.reconcile_snapshot_policy_at(request, Utc::now()).await
    }

    pub async fn reconcile_snapshot_policy_at(
        &self,
        request: &SnapshotPolicyRequest,
        now: DateTime<Utc>,
    ) -> Result<PolicyResult, ReconcileError> {
        let actions = self.plan_snapshot_policy_at(request, now).await?;
        info!(
            self.log, "reconciling snapshot policy";
            "dataset" => request.dataset.as_str(),
            "actions" => actions.len(),
        );
        Ok(convergence::apply(&self.api, actions, &self.log).await)
    }

    /// Computes the action list for a replication policy without applying
    /// it (dry run). Never invokes a write operation.
    pub async fn plan_replication_policy(
        &self,
        request: &ReplicationPolicyRequest,
    ) -> Result<Vec<ReconcileAction>, ReconcileError> {
        request.validate()?;
        let observed = self
            .api
            .list_replication_tasks(&request.source)
            .await
            .map_err(ReconcileError::Fetch)?;
        let observed = scope_tasks(request, observed);

        let actions = match request.state {
            State::Absent => diff::replication_removal_actions(observed),
            State::Present => {
                let edges = topology::resolve(&self.api, request).await?;
                let desired = edges
                    .iter()
                    .map(|edge| {
                        request.desired_settings(
                            &edge.source,
                            &edge.target,
                            &self.boundaries,
                        )
                    })
                    .collect();
                diff::replication_actions(desired, observed)
            }
        };
        Ok(diff::order_actions(actions))
    }

    /// Runs one full reconciliation pass for a replication policy.
    pub async fn reconcile_replication_policy(
        &self,
        request: &ReplicationPolicyRequest,
    ) -> Result<PolicyResult, ReconcileError> {
        let actions = self.plan_replication_policy(request).await?;
        info!(
            self.log, "reconciling replication policy";
            "source" => request.source.as_str(),
            "actions" => actions.len(),
        );
        Ok(convergence::apply(&self.api, actions, &self.log).await)
    }
}

/// Restricts the observed task list to the tasks this request owns. The
/// fetch returns every managed task at or under the source; a policy only
/// owns the ones its discovery mode would produce, so a sibling policy's
/// tasks for descendants are left alone.
fn scope_tasks(
    request: &ReplicationPolicyRequest,
    observed: Vec<ReplicationTaskRecord>,
) -> Vec<ReplicationTaskRecord> {
    observed
        .into_iter()
        .filter(|record| {
            let source = &record.settings.source_dataset;
            match request.discovery {
                Discovery::None => source == &request.source,
                Discovery::Children => {
                    request.source.is_ancestor_of(source)
                        && source.depth() == request.source.depth() + 1
                }
                Discovery::Recursive => {
                    request.source.is_ancestor_of(source)
                }
            }
        })
        .collect()
}
