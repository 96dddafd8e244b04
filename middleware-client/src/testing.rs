// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An in-memory [`MiddlewareApi`] for engine tests.
//!
//! Behaves like a real appliance for the happy paths (duplicate creates are
//! rejected, deletes of missing resources fail with not-found) and supports
//! one-shot injected failures for exercising the engine's error handling.

use crate::api::ApplyError;
use crate::api::FetchError;
use crate::api::MiddlewareApi;
use crate::transport::CallError;
use async_trait::async_trait;
use policy_common::DatasetName;
use policy_common::ReplicationSettings;
use policy_common::ReplicationTaskRecord;
use policy_common::SnapshotName;
use policy_common::SnapshotRecord;
use policy_common::TaskId;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::sync::Mutex;

/// The operations a failure can be injected into.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FakeOp {
    ListSnapshots,
    ListReplicationTasks,
    ListChildDatasets,
    CreateSnapshot,
    DeleteSnapshot,
    CreateReplicationTask,
    UpdateReplicationTask,
    DeleteReplicationTask,
}

impl FakeOp {
    fn is_write(&self) -> bool {
        !matches!(
            self,
            FakeOp::ListSnapshots
                | FakeOp::ListReplicationTasks
                | FakeOp::ListChildDatasets
        )
    }
}

#[derive(Clone, Debug)]
pub enum InjectedError {
    Transient,
    Permanent(String),
    AlreadyExists,
    NotFound,
}

impl InjectedError {
    fn into_apply(self) -> ApplyError {
        match self {
            InjectedError::Transient => {
                ApplyError::Transient(CallError::Timeout)
            }
            InjectedError::Permanent(message) => {
                ApplyError::Permanent(CallError::Rpc {
                    method: "injected".to_string(),
                    code: -1,
                    message,
                })
            }
            InjectedError::AlreadyExists => ApplyError::AlreadyExists,
            InjectedError::NotFound => ApplyError::NotFound,
        }
    }

    fn into_fetch(self) -> FetchError {
        let message = match self {
            InjectedError::Transient => {
                return FetchError::Transient(CallError::Timeout);
            }
            InjectedError::Permanent(message) => message,
            InjectedError::AlreadyExists => "already exists".to_string(),
            InjectedError::NotFound => "does not exist".to_string(),
        };
        FetchError::Permanent(CallError::Rpc {
            method: "injected".to_string(),
            code: -1,
            message,
        })
    }
}

#[derive(Default)]
struct Inner {
    datasets: BTreeSet<DatasetName>,
    snapshots: BTreeMap<String, SnapshotRecord>,
    tasks: BTreeMap<TaskId, ReplicationTaskRecord>,
    next_task_id: i64,
    failures: Vec<(FakeOp, InjectedError)>,
    calls: Vec<FakeOp>,
}

impl Inner {
    fn record(&mut self, op: FakeOp) -> Option<InjectedError> {
        self.calls.push(op);
        let position =
            self.failures.iter().position(|(failed, _)| *failed == op)?;
        Some(self.failures.remove(position).1)
    }
}

#[derive(Default)]
pub struct FakeMiddleware {
    inner: Mutex<Inner>,
}

impl FakeMiddleware {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_dataset(&self, dataset: &DatasetName) {
        self.inner.lock().unwrap().datasets.insert(dataset.clone());
    }

    /// Registers an existing snapshot by its raw name, managed or not.
    pub fn add_snapshot(&self, dataset: &DatasetName, snapshot_name: &str) {
        let record = SnapshotRecord::from_remote(dataset.clone(), snapshot_name);
        self.inner
            .lock()
            .unwrap()
            .snapshots
            .insert(record.id.clone(), record);
    }

    pub fn add_task(&self, settings: ReplicationSettings) -> TaskId {
        let mut inner = self.inner.lock().unwrap();
        inner.next_task_id += 1;
        let id = TaskId(inner.next_task_id);
        inner.tasks.insert(id, ReplicationTaskRecord { id, settings });
        id
    }

    /// Makes the next invocation of `op` fail with `error`. Repeated calls
    /// queue up, one failure per invocation.
    pub fn fail_next(&self, op: FakeOp, error: InjectedError) {
        self.inner.lock().unwrap().failures.push((op, error));
    }

    pub fn snapshots(&self) -> Vec<SnapshotRecord> {
        self.inner.lock().unwrap().snapshots.values().cloned().collect()
    }

    pub fn snapshot_ids(&self) -> Vec<String> {
        self.inner.lock().unwrap().snapshots.keys().cloned().collect()
    }

    pub fn tasks(&self) -> Vec<ReplicationTaskRecord> {
        self.inner.lock().unwrap().tasks.values().cloned().collect()
    }

    pub fn calls(&self) -> Vec<FakeOp> {
        self.inner.lock().unwrap().calls.clone()
    }

    /// Number of mutating operations seen so far.
    pub fn writes(&self) -> usize {
        self.inner
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|op| op.is_write())
            .count()
    }
}

#[async_trait]
impl MiddlewareApi for FakeMiddleware {
    async fn list_snapshots(
        &self,
        dataset: &DatasetName,
    ) -> Result<Vec<SnapshotRecord>, FetchError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.record(FakeOp::ListSnapshots) {
            return Err(error.into_fetch());
        }
        Ok(inner
            .snapshots
            .values()
            .filter(|record| &record.dataset == dataset)
            .cloned()
            .collect())
    }

    async fn list_replication_tasks(
        &self,
        dataset: &DatasetName,
    ) -> Result<Vec<ReplicationTaskRecord>, FetchError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.record(FakeOp::ListReplicationTasks) {
            return Err(error.into_fetch());
        }
        Ok(inner
            .tasks
            .values()
            .filter(|record| {
                let source = &record.settings.source_dataset;
                source == dataset || dataset.is_ancestor_of(source)
            })
            .cloned()
            .collect())
    }

    async fn list_child_datasets(
        &self,
        parent: &DatasetName,
        recursive: bool,
    ) -> Result<Vec<DatasetName>, FetchError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.record(FakeOp::ListChildDatasets) {
            return Err(error.into_fetch());
        }
        if !inner.datasets.contains(parent) {
            return Err(FetchError::DatasetNotFound(parent.clone()));
        }
        Ok(inner
            .datasets
            .iter()
            .filter(|child| parent.is_ancestor_of(child))
            .filter(|child| recursive || child.depth() == parent.depth() + 1)
            .cloned()
            .collect())
    }

    async fn create_snapshot(
        &self,
        dataset: &DatasetName,
        name: &SnapshotName,
        _recursive: bool,
    ) -> Result<String, ApplyError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.record(FakeOp::CreateSnapshot) {
            return Err(error.into_apply());
        }
        let record =
            SnapshotRecord::from_remote(dataset.clone(), &name.to_string());
        let id = record.id.clone();
        if inner.snapshots.contains_key(&id) {
            return Err(ApplyError::AlreadyExists);
        }
        inner.snapshots.insert(id.clone(), record);
        Ok(id)
    }

    async fn delete_snapshot(&self, id: &str) -> Result<(), ApplyError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.record(FakeOp::DeleteSnapshot) {
            return Err(error.into_apply());
        }
        match inner.snapshots.remove(id) {
            Some(_) => Ok(()),
            None => Err(ApplyError::NotFound),
        }
    }

    async fn create_replication_task(
        &self,
        settings: &ReplicationSettings,
    ) -> Result<TaskId, ApplyError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.record(FakeOp::CreateReplicationTask) {
            return Err(error.into_apply());
        }
        if inner
            .tasks
            .values()
            .any(|record| record.settings.name == settings.name)
        {
            return Err(ApplyError::AlreadyExists);
        }
        inner.next_task_id += 1;
        let id = TaskId(inner.next_task_id);
        inner.tasks.insert(
            id,
            ReplicationTaskRecord { id, settings: settings.clone() },
        );
        Ok(id)
    }

    async fn update_replication_task(
        &self,
        id: TaskId,
        settings: &ReplicationSettings,
    ) -> Result<(), ApplyError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.record(FakeOp::UpdateReplicationTask) {
            return Err(error.into_apply());
        }
        match inner.tasks.get_mut(&id) {
            Some(record) => {
                record.settings = settings.clone();
                Ok(())
            }
            None => Err(ApplyError::NotFound),
        }
    }

    async fn delete_replication_task(
        &self,
        id: TaskId,
    ) -> Result<(), ApplyError> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(error) = inner.record(FakeOp::DeleteReplicationTask) {
            return Err(error.into_apply());
        }
        match inner.tasks.remove(&id) {
            Some(_) => Ok(()),
            None => Err(ApplyError::NotFound),
        }
    }
}
