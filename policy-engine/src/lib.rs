// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Policy reconciliation engine for snapshot retention and replication.
//!
//! One reconciliation pass compiles a declarative policy request into
//! desired state, fetches the observed state through the
//! [`MiddlewareApi`](middleware_client::MiddlewareApi) collaborator,
//! diffs the two into an ordered action list, and applies that list
//! idempotently. The caller decides cadence; passes may be re-run at any
//! time and converge to the same state.

pub mod convergence;
pub mod diff;
pub mod engine;
pub mod request;
pub mod retention;
pub mod topology;

pub use convergence::FailedAction;
pub use convergence::FailureReason;
pub use convergence::PolicyResult;
pub use diff::DependencyKey;
pub use diff::ReconcileAction;
pub use engine::PolicyEngine;
pub use engine::ReconcileError;
pub use request::ConfigError;
pub use request::ReplicationPolicyRequest;
pub use request::SnapshotPolicyRequest;
pub use request::State;
pub use retention::RetentionPlan;
pub use topology::Discovery;
