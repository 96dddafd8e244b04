// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The operations the policy engine needs from the appliance, as a trait.
//!
//! Production uses [`crate::MiddlewareClient`]; the engine's tests use
//! `FakeMiddleware` from [`crate::testing`].

use crate::transport::CallError;
use async_trait::async_trait;
use policy_common::DatasetName;
use policy_common::ReplicationSettings;
use policy_common::ReplicationTaskRecord;
use policy_common::SnapshotName;
use policy_common::SnapshotRecord;
use policy_common::TaskId;

/// Failure while reading observed state. Fetch failures abort the whole
/// reconciliation pass; nothing is applied against state we could not read.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("dataset {0} does not exist")]
    DatasetNotFound(DatasetName),
    #[error("transient failure fetching state")]
    Transient(#[source] CallError),
    #[error("failed to fetch state")]
    Permanent(#[source] CallError),
}

/// Failure while applying a single action. The engine maps `AlreadyExists`
/// and `NotFound` to per-action outcomes rather than treating them as hard
/// failures.
#[derive(Debug, thiserror::Error)]
pub enum ApplyError {
    #[error("resource already exists")]
    AlreadyExists,
    #[error("resource does not exist")]
    NotFound,
    #[error("transient failure applying change")]
    Transient(#[source] CallError),
    #[error("failed to apply change")]
    Permanent(#[source] CallError),
}

#[async_trait]
pub trait MiddlewareApi: Send + Sync {
    /// Lists all snapshots of `dataset` (managed and unmanaged alike).
    async fn list_snapshots(
        &self,
        dataset: &DatasetName,
    ) -> Result<Vec<SnapshotRecord>, FetchError>;

    /// Lists the managed replication tasks whose source is `dataset` or a
    /// descendant of it. Tasks without the managed name prefix are never
    /// returned.
    async fn list_replication_tasks(
        &self,
        dataset: &DatasetName,
    ) -> Result<Vec<ReplicationTaskRecord>, FetchError>;

    /// Lists the datasets nested under `parent`, direct children only
    /// unless `recursive`. Fails with [`FetchError::DatasetNotFound`] if
    /// `parent` itself does not exist.
    async fn list_child_datasets(
        &self,
        parent: &DatasetName,
        recursive: bool,
    ) -> Result<Vec<DatasetName>, FetchError>;

    /// Takes a snapshot, returning its full `dataset@name` identifier.
    async fn create_snapshot(
        &self,
        dataset: &DatasetName,
        name: &SnapshotName,
        recursive: bool,
    ) -> Result<String, ApplyError>;

    /// Destroys the snapshot with the given `dataset@name` identifier.
    async fn delete_snapshot(&self, id: &str) -> Result<(), ApplyError>;

    async fn create_replication_task(
        &self,
        settings: &ReplicationSettings,
    ) -> Result<TaskId, ApplyError>;

    async fn update_replication_task(
        &self,
        id: TaskId,
        settings: &ReplicationSettings,
    ) -> Result<(), ApplyError>;

    async fn delete_replication_task(
        &self,
        id: TaskId,
    ) -> Result<(), ApplyError>;
}
