// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Applies an ordered action list against the middleware.
//!
//! Idempotency: an action whose target is already in the desired form is a
//! no-op success, not an error, so a re-run after a partial failure
//! converges instead of tripping over its own earlier progress. Failures
//! are isolated per action; only actions sharing a dependency key with an
//! already-failed action are skipped.

use crate::diff::DependencyKey;
use crate::diff::ReconcileAction;
use middleware_client::ApplyError;
use middleware_client::MiddlewareApi;
use policy_common::SnapshotName;
use slog::debug;
use slog::info;
use slog::warn;
use slog::Logger;
use slog_error_chain::InlineErrorChain;
use std::collections::BTreeSet;

/// Outcome of one full reconciliation pass, failures included. Never
/// partially constructed.
#[derive(Debug, Default)]
pub struct PolicyResult {
    /// True iff at least one action actually mutated remote state.
    pub changed: bool,
    pub actions_applied: Vec<ReconcileAction>,
    pub actions_failed: Vec<FailedAction>,
}

#[derive(Debug)]
pub struct FailedAction {
    pub action: ReconcileAction,
    pub reason: FailureReason,
}

#[derive(Debug, thiserror::Error)]
pub enum FailureReason {
    #[error("apply failed")]
    Apply(#[source] ApplyError),
    /// The target changed between fetch and apply (e.g. an update hit a
    /// task that no longer exists). Re-running the pass re-observes.
    #[error("observed state is stale")]
    StaleState,
    #[error("skipped: earlier action for {key} failed")]
    DependencyFailed { key: DependencyKey },
}

enum Outcome {
    Applied,
    Noop,
    Failed(FailureReason),
}

/// Applies `actions` in order, returning the full pass outcome.
pub async fn apply<M: MiddlewareApi>(
    api: &M,
    actions: Vec<ReconcileAction>,
    log: &Logger,
) -> PolicyResult {
    let mut result = PolicyResult::default();
    let mut failed_keys: BTreeSet<DependencyKey> = BTreeSet::new();

    for action in actions {
        let key = action.dependency_key();
        if failed_keys.contains(&key) {
            debug!(log, "skipping dependent action"; "key" => %key);
            result.actions_failed.push(FailedAction {
                action,
                reason: FailureReason::DependencyFailed { key },
            });
            continue;
        }

        match execute(api, &action).await {
            Outcome::Applied => {
                result.changed = true;
                result.actions_applied.push(action);
            }
            Outcome::Noop => {
                debug!(log, "action was already satisfied"; "key" => %key);
            }
            Outcome::Failed(reason) => {
                warn!(
                    log, "action failed";
                    "key" => %key,
                    "err" => InlineErrorChain::new(&reason),
                );
                failed_keys.insert(key);
                result.actions_failed.push(FailedAction { action, reason });
            }
        }
    }

    info!(
        log, "reconciliation pass complete";
        "changed" => result.changed,
        "applied" => result.actions_applied.len(),
        "failed" => result.actions_failed.len(),
    );
    result
}

async fn execute<M: MiddlewareApi>(
    api: &M,
    action: &ReconcileAction,
) -> Outcome {
    match action {
        ReconcileAction::CreateSnapshot {
            dataset,
            tier,
            timestamp,
            recursive,
        } => {
            let name = SnapshotName::new(*tier, *timestamp);
            match api.create_snapshot(dataset, &name, *recursive).await {
                Ok(_) => Outcome::Applied,
                // A prior partially-applied pass already took it.
                Err(ApplyError::AlreadyExists) => Outcome::Noop,
                Err(err) => Outcome::Failed(FailureReason::Apply(err)),
            }
        }
        ReconcileAction::DeleteSnapshot { record } => {
            match api.delete_snapshot(&record.id).await {
                Ok(()) => Outcome::Applied,
                // Already gone; the desired end state holds.
                Err(ApplyError::NotFound) => Outcome::Noop,
                Err(err) => Outcome::Failed(FailureReason::Apply(err)),
            }
        }
        ReconcileAction::CreateReplicationTask { settings } => {
            match api.create_replication_task(settings).await {
                Ok(_) => Outcome::Applied,
                Err(ApplyError::AlreadyExists) => Outcome::Noop,
                Err(err) => Outcome::Failed(FailureReason::Apply(err)),
            }
        }
        ReconcileAction::UpdateReplicationTask { id, settings } => {
            match api.update_replication_task(*id, settings).await {
                Ok(()) => Outcome::Applied,
                // The task vanished since the fetch.
                Err(ApplyError::NotFound) => {
                    Outcome::Failed(FailureReason::StaleState)
                }
                Err(err) => Outcome::Failed(FailureReason::Apply(err)),
            }
        }
        ReconcileAction::DeleteReplicationTask { id, .. } => {
            match api.delete_replication_task(*id).await {
                Ok(()) => Outcome::Applied,
                Err(ApplyError::NotFound) => Outcome::Noop,
                Err(err) => Outcome::Failed(FailureReason::Apply(err)),
            }
        }
    }
}
