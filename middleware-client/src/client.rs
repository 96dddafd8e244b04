// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Production [`MiddlewareApi`] implementation.
//!
//! Maps the engine's operations onto middleware method calls
//! (`zfs.snapshot.*`, `replication.*`, `pool.dataset.query`) and translates
//! wire rows into the engine's typed records. Rows that do not decode under
//! the managed naming scheme are dropped, never errored on; resources the
//! engine does not own stay invisible to it.

use crate::api::ApplyError;
use crate::api::FetchError;
use crate::api::MiddlewareApi;
use crate::transport::CallError;
use crate::transport::Transport;
use crate::transport::TransportBuildError;
use crate::transport::TransportConfig;
use async_trait::async_trait;
use policy_common::CronSchedule;
use policy_common::DatasetName;
use policy_common::Direction;
use policy_common::KeyFormat;
use policy_common::Lifetime;
use policy_common::LifetimeUnit;
use policy_common::ReplicationSettings;
use policy_common::ReplicationTaskName;
use policy_common::ReplicationTaskRecord;
use policy_common::ReplicationTransport;
use policy_common::RetentionPolicy;
use policy_common::SnapshotName;
use policy_common::SnapshotRecord;
use policy_common::TargetEncryption;
use policy_common::TaskId;
use policy_common::REPLICATION_PREFIX;
use serde::Deserialize;
use serde_json::json;
use serde_json::Value;
use slog::debug;
use slog::o;
use slog::Logger;
use slog_error_chain::InlineErrorChain;
use std::sync::Arc;

pub struct MiddlewareClient {
    transport: Arc<dyn Transport>,
    log: Logger,
}

impl MiddlewareClient {
    pub fn new(
        config: &TransportConfig,
        log: &Logger,
    ) -> Result<Self, TransportBuildError> {
        let log = log.new(o!("component" => "MiddlewareClient"));
        let transport = config.build(&log)?;
        Ok(Self { transport, log })
    }

    /// Constructs a client over an already-built transport (tests).
    pub fn with_transport(transport: Arc<dyn Transport>, log: Logger) -> Self {
        Self { transport, log }
    }

    async fn call<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, CallError> {
        let result = match self.transport.call(method, params).await {
            Ok(result) => result,
            Err(err) => {
                debug!(
                    self.log, "middleware call failed";
                    "method" => method,
                    "err" => InlineErrorChain::new(&err),
                );
                return Err(err);
            }
        };
        Ok(serde_json::from_value(result)?)
    }
}

/// Classifies a call failure for a read operation.
fn fetch_error(err: CallError) -> FetchError {
    if err.is_transient() {
        FetchError::Transient(err)
    } else {
        FetchError::Permanent(err)
    }
}

/// Classifies a call failure for a write operation.
///
/// The middleware does not carry machine-readable error categories over
/// either transport, so duplicate-creation and gone-resource rejections are
/// recognized by their message text.
fn apply_error(err: CallError) -> ApplyError {
    if err.is_transient() {
        return ApplyError::Transient(err);
    }
    if let CallError::Rpc { message, .. } = &err {
        let message = message.to_lowercase();
        if message.contains("already exists") {
            return ApplyError::AlreadyExists;
        }
        if message.contains("does not exist") || message.contains("not found")
        {
            return ApplyError::NotFound;
        }
    }
    ApplyError::Permanent(err)
}

#[derive(Deserialize)]
struct SnapshotRow {
    snapshot_name: String,
}

#[derive(Deserialize)]
struct DatasetRow {
    id: String,
}

#[derive(Deserialize)]
struct IdRow {
    id: i64,
}

#[derive(Deserialize)]
struct LifetimeRow {
    schedule: CronSchedule,
    lifetime_value: u32,
    lifetime_unit: LifetimeUnit,
}

/// One task as `replication.query` reports it. Fields the engine does not
/// manage are simply not listed; serde ignores them.
#[derive(Deserialize)]
struct ReplicationRow {
    id: i64,
    name: String,
    direction: Direction,
    transport: String,
    #[serde(default)]
    ssh_credentials: Option<IdRow>,
    source_datasets: Vec<String>,
    target_dataset: String,
    #[serde(default)]
    recursive: bool,
    #[serde(default)]
    naming_schema: Vec<String>,
    #[serde(default)]
    also_include_naming_schema: Vec<String>,
    #[serde(default)]
    schedule: Option<CronSchedule>,
    retention_policy: String,
    #[serde(default)]
    lifetimes: Vec<LifetimeRow>,
    #[serde(default)]
    lifetime_value: Option<u32>,
    #[serde(default)]
    lifetime_unit: Option<LifetimeUnit>,
    #[serde(default)]
    encryption: bool,
    #[serde(default)]
    encryption_inherit: Option<bool>,
    #[serde(default)]
    encryption_key: Option<String>,
    #[serde(default)]
    encryption_key_format: Option<KeyFormat>,
    enabled: bool,
}

impl ReplicationRow {
    /// Converts a wire row into a typed record. Returns `None` for rows the
    /// engine does not manage or cannot interpret; such tasks are left
    /// untouched.
    fn into_record(self) -> Option<ReplicationTaskRecord> {
        let name = ReplicationTaskName::parse(&self.name)?;
        let source: DatasetName =
            self.source_datasets.first()?.parse().ok()?;
        let target: DatasetName = self.target_dataset.parse().ok()?;

        let transport = match self.transport.as_str() {
            "LOCAL" => ReplicationTransport::Local,
            "SSH" => ReplicationTransport::Ssh {
                credential_id: self.ssh_credentials?.id,
            },
            _ => return None,
        };

        let naming_schemas = match self.direction {
            Direction::Push => self.also_include_naming_schema,
            Direction::Pull => self.naming_schema,
        };

        let retention = match self.retention_policy.as_str() {
            "SOURCE" => RetentionPolicy::Source,
            "CUSTOM" => RetentionPolicy::Custom {
                lifetimes: self
                    .lifetimes
                    .into_iter()
                    .map(|row| Lifetime {
                        schedule: row.schedule,
                        value: row.lifetime_value,
                        unit: row.lifetime_unit,
                    })
                    .collect(),
                lifetime_value: self.lifetime_value?,
                lifetime_unit: self.lifetime_unit?,
            },
            _ => return None,
        };

        let encryption = if !self.encryption {
            TargetEncryption::PreserveSource
        } else if self.encryption_inherit.unwrap_or(false) {
            TargetEncryption::Inherit
        } else {
            TargetEncryption::Key {
                key: self.encryption_key?,
                format: self.encryption_key_format?,
            }
        };

        Some(ReplicationTaskRecord {
            id: TaskId(self.id),
            settings: ReplicationSettings {
                name: name.as_str().to_string(),
                direction: self.direction,
                transport,
                source_dataset: source,
                target_dataset: target,
                recursive: self.recursive,
                naming_schemas,
                schedule: self.schedule,
                retention,
                encryption,
                enabled: self.enabled,
            },
        })
    }
}

/// Builds the `replication.create`/`replication.update` payload for the
/// desired settings. The inverse of [`ReplicationRow::into_record`]: a task
/// created from this payload reads back as equal settings.
fn to_payload(settings: &ReplicationSettings) -> Value {
    let mut map = serde_json::Map::new();
    map.insert("name".to_string(), json!(settings.name));
    map.insert("direction".to_string(), json!(settings.direction));
    map.insert(
        "source_datasets".to_string(),
        json!([settings.source_dataset.as_str()]),
    );
    map.insert(
        "target_dataset".to_string(),
        json!(settings.target_dataset.as_str()),
    );
    map.insert("recursive".to_string(), json!(settings.recursive));
    map.insert("auto".to_string(), json!(true));
    map.insert("readonly".to_string(), json!("SET"));
    map.insert("enabled".to_string(), json!(settings.enabled));

    match &settings.transport {
        ReplicationTransport::Local => {
            map.insert("transport".to_string(), json!("LOCAL"));
        }
        ReplicationTransport::Ssh { credential_id } => {
            map.insert("transport".to_string(), json!("SSH"));
            map.insert("ssh_credentials".to_string(), json!(credential_id));
        }
    }

    // Push tasks ride along with the bound snapshot tasks and declare the
    // managed schemas as extras; pull tasks own the schema list outright.
    let schema_key = match settings.direction {
        Direction::Push => "also_include_naming_schema",
        Direction::Pull => "naming_schema",
    };
    map.insert(schema_key.to_string(), json!(settings.naming_schemas));

    if let Some(schedule) = &settings.schedule {
        map.insert("schedule".to_string(), json!(schedule));
    }

    match &settings.retention {
        RetentionPolicy::Source => {
            map.insert("retention_policy".to_string(), json!("SOURCE"));
        }
        RetentionPolicy::Custom {
            lifetimes,
            lifetime_value,
            lifetime_unit,
        } => {
            map.insert("retention_policy".to_string(), json!("CUSTOM"));
            map.insert(
                "lifetimes".to_string(),
                Value::Array(
                    lifetimes
                        .iter()
                        .map(|lifetime| {
                            json!({
                                "schedule": lifetime.schedule,
                                "lifetime_value": lifetime.value,
                                "lifetime_unit": lifetime.unit,
                            })
                        })
                        .collect(),
                ),
            );
            map.insert("lifetime_value".to_string(), json!(lifetime_value));
            map.insert("lifetime_unit".to_string(), json!(lifetime_unit));
        }
    }

    match &settings.encryption {
        TargetEncryption::PreserveSource => {
            map.insert("encryption".to_string(), json!(false));
        }
        TargetEncryption::Inherit => {
            map.insert("encryption".to_string(), json!(true));
            map.insert("encryption_inherit".to_string(), json!(true));
        }
        TargetEncryption::Key { key, format } => {
            map.insert("encryption".to_string(), json!(true));
            map.insert("encryption_inherit".to_string(), json!(false));
            map.insert("encryption_key".to_string(), json!(key));
            map.insert("encryption_key_format".to_string(), json!(format));
        }
    }

    Value::Object(map)
}

#[async_trait]
impl MiddlewareApi for MiddlewareClient {
    async fn list_snapshots(
        &self,
        dataset: &DatasetName,
    ) -> Result<Vec<SnapshotRecord>, FetchError> {
        let rows: Vec<SnapshotRow> = self
            .call(
                "zfs.snapshot.query",
                vec![json!([["dataset", "=", dataset.as_str()]])],
            )
            .await
            .map_err(fetch_error)?;
        let mut records: Vec<SnapshotRecord> = rows
            .into_iter()
            .map(|row| {
                SnapshotRecord::from_remote(dataset.clone(), &row.snapshot_name)
            })
            .collect();
        records.sort();
        debug!(
            self.log, "listed snapshots";
            "dataset" => dataset.as_str(),
            "count" => records.len(),
        );
        Ok(records)
    }

    async fn list_replication_tasks(
        &self,
        dataset: &DatasetName,
    ) -> Result<Vec<ReplicationTaskRecord>, FetchError> {
        let filter = format!("^{REPLICATION_PREFIX}");
        let rows: Vec<ReplicationRow> = self
            .call("replication.query", vec![json!([["name", "~", filter]])])
            .await
            .map_err(fetch_error)?;
        let mut records: Vec<ReplicationTaskRecord> = rows
            .into_iter()
            .filter_map(ReplicationRow::into_record)
            .filter(|record| {
                let source = &record.settings.source_dataset;
                source == dataset || dataset.is_ancestor_of(source)
            })
            .collect();
        records.sort_by_key(|record| record.id);
        debug!(
            self.log, "listed replication tasks";
            "dataset" => dataset.as_str(),
            "count" => records.len(),
        );
        Ok(records)
    }

    async fn list_child_datasets(
        &self,
        parent: &DatasetName,
        recursive: bool,
    ) -> Result<Vec<DatasetName>, FetchError> {
        // `id ^ prefix` matches nothing when the parent is absent, so its
        // existence is checked explicitly first.
        let existing: Vec<DatasetRow> = self
            .call(
                "pool.dataset.query",
                vec![json!([["id", "=", parent.as_str()]])],
            )
            .await
            .map_err(fetch_error)?;
        if existing.is_empty() {
            return Err(FetchError::DatasetNotFound(parent.clone()));
        }

        let prefix = format!("{}/", parent.as_str());
        let rows: Vec<DatasetRow> = self
            .call("pool.dataset.query", vec![json!([["id", "^", prefix]])])
            .await
            .map_err(fetch_error)?;
        let mut children: Vec<DatasetName> = rows
            .into_iter()
            .filter_map(|row| row.id.parse().ok())
            .filter(|child: &DatasetName| {
                recursive || child.depth() == parent.depth() + 1
            })
            .collect();
        children.sort();
        Ok(children)
    }

    async fn create_snapshot(
        &self,
        dataset: &DatasetName,
        name: &SnapshotName,
        recursive: bool,
    ) -> Result<String, ApplyError> {
        let payload = json!({
            "dataset": dataset.as_str(),
            "name": name.to_string(),
            "recursive": recursive,
        });
        let _: Value = self
            .call("zfs.snapshot.create", vec![payload])
            .await
            .map_err(apply_error)?;
        Ok(format!("{dataset}@{name}"))
    }

    async fn delete_snapshot(&self, id: &str) -> Result<(), ApplyError> {
        let _: Value = self
            .call("zfs.snapshot.delete", vec![json!(id)])
            .await
            .map_err(apply_error)?;
        Ok(())
    }

    async fn create_replication_task(
        &self,
        settings: &ReplicationSettings,
    ) -> Result<TaskId, ApplyError> {
        let row: IdRow = self
            .call("replication.create", vec![to_payload(settings)])
            .await
            .map_err(apply_error)?;
        Ok(TaskId(row.id))
    }

    async fn update_replication_task(
        &self,
        id: TaskId,
        settings: &ReplicationSettings,
    ) -> Result<(), ApplyError> {
        let _: Value = self
            .call(
                "replication.update",
                vec![json!(id.0), to_payload(settings)],
            )
            .await
            .map_err(apply_error)?;
        Ok(())
    }

    async fn delete_replication_task(
        &self,
        id: TaskId,
    ) -> Result<(), ApplyError> {
        let _: Value = self
            .call("replication.delete", vec![json!(id.0)])
            .await
            .map_err(apply_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::FakeExecutor;
    use crate::exec::FakeOutcome;
    use crate::transport::MidcltTransport;
    use assert_matches::assert_matches;
    use policy_common::naming_schema;
    use policy_common::testing::test_logger;
    use policy_common::BoundaryConfig;
    use policy_common::Tier;

    fn push_settings() -> ReplicationSettings {
        ReplicationSettings {
            name: "auto-repl-tank_data".to_string(),
            direction: Direction::Push,
            transport: ReplicationTransport::Local,
            source_dataset: "tank/data".parse().unwrap(),
            target_dataset: "backup/data".parse().unwrap(),
            recursive: false,
            naming_schemas: vec![
                naming_schema(Tier::Hourly),
                naming_schema(Tier::Daily),
            ],
            schedule: Some(Tier::Hourly.schedule(&BoundaryConfig::default())),
            retention: RetentionPolicy::Source,
            encryption: TargetEncryption::PreserveSource,
            enabled: true,
        }
    }

    fn pull_settings() -> ReplicationSettings {
        let boundaries = BoundaryConfig::default();
        ReplicationSettings {
            name: "auto-repl-remote_media".to_string(),
            direction: Direction::Pull,
            transport: ReplicationTransport::Ssh { credential_id: 4 },
            source_dataset: "remote/media".parse().unwrap(),
            target_dataset: "tank/mirror/media".parse().unwrap(),
            recursive: true,
            naming_schemas: vec![naming_schema(Tier::Daily)],
            schedule: Some(Tier::Daily.schedule(&boundaries)),
            retention: RetentionPolicy::Custom {
                lifetimes: vec![Lifetime {
                    schedule: Tier::Daily.schedule(&boundaries),
                    value: 7,
                    unit: LifetimeUnit::Day,
                }],
                lifetime_value: 7,
                lifetime_unit: LifetimeUnit::Day,
            },
            encryption: TargetEncryption::Key {
                key: "deadbeef".to_string(),
                format: KeyFormat::Hex,
            },
            enabled: true,
        }
    }

    #[test]
    fn push_payload_uses_source_retention_and_extra_schemas() {
        let payload = to_payload(&push_settings());
        assert_eq!(payload["direction"], "PUSH");
        assert_eq!(payload["transport"], "LOCAL");
        assert_eq!(payload["retention_policy"], "SOURCE");
        assert_eq!(
            payload["also_include_naming_schema"],
            json!(["auto-hourly-%Y-%m-%d_%H:%M", "auto-daily-%Y-%m-%d_%H:%M"])
        );
        assert_eq!(payload.get("naming_schema"), None);
        // Push tasks carry a schedule too; the middleware will not run an
        // automatic task without one.
        assert_eq!(payload["schedule"]["minute"], "0");
        assert_eq!(payload["schedule"]["hour"], "*");
        assert_eq!(payload["encryption"], false);
        assert_eq!(payload["auto"], true);
        assert_eq!(payload["readonly"], "SET");
    }

    #[test]
    fn pull_payload_carries_schedule_lifetimes_and_encryption() {
        let payload = to_payload(&pull_settings());
        assert_eq!(payload["direction"], "PULL");
        assert_eq!(payload["transport"], "SSH");
        assert_eq!(payload["ssh_credentials"], 4);
        assert_eq!(
            payload["naming_schema"],
            json!(["auto-daily-%Y-%m-%d_%H:%M"])
        );
        assert_eq!(payload.get("also_include_naming_schema"), None);
        assert_eq!(payload["schedule"]["hour"], "0");
        assert_eq!(payload["retention_policy"], "CUSTOM");
        assert_eq!(payload["lifetimes"][0]["lifetime_value"], 7);
        assert_eq!(payload["lifetimes"][0]["lifetime_unit"], "DAY");
        assert_eq!(payload["lifetime_value"], 7);
        assert_eq!(payload["lifetime_unit"], "DAY");
        assert_eq!(payload["encryption"], true);
        assert_eq!(payload["encryption_inherit"], false);
        assert_eq!(payload["encryption_key_format"], "HEX");
    }

    #[test]
    fn rows_read_back_as_the_settings_that_created_them() {
        for settings in [push_settings(), pull_settings()] {
            let mut wire = to_payload(&settings);
            let map = wire.as_object_mut().unwrap();
            map.insert("id".to_string(), json!(17));
            // The wire reports SSH credentials as a nested object.
            if let Some(credential_id) = map.remove("ssh_credentials") {
                map.insert(
                    "ssh_credentials".to_string(),
                    json!({ "id": credential_id }),
                );
            }

            let row: ReplicationRow =
                serde_json::from_value(wire).unwrap();
            let record = row.into_record().unwrap();
            assert_eq!(record.id, TaskId(17));
            assert_eq!(record.settings, settings);
        }
    }

    #[test]
    fn unmanaged_and_malformed_rows_are_dropped() {
        for (label, mutate) in [
            ("name", (|map: &mut serde_json::Map<String, Value>| {
                map.insert("name".to_string(), json!("nightly-backup"));
            }) as fn(&mut serde_json::Map<String, Value>)),
            ("source", |map: &mut serde_json::Map<String, Value>| {
                map.insert("source_datasets".to_string(), json!(["bad@ds"]));
            }),
            ("retention", |map: &mut serde_json::Map<String, Value>| {
                map.insert("retention_policy".to_string(), json!("NONE"));
            }),
        ] {
            let mut wire = to_payload(&push_settings());
            let map = wire.as_object_mut().unwrap();
            map.insert("id".to_string(), json!(1));
            mutate(map);
            let row: ReplicationRow =
                serde_json::from_value(wire).unwrap();
            assert!(row.into_record().is_none(), "{label}");
        }
    }

    #[test]
    fn apply_errors_classify_by_message() {
        let already = CallError::Rpc {
            method: "zfs.snapshot.create".to_string(),
            code: -1,
            message: "[EEXIST] Snapshot already exists".to_string(),
        };
        assert_matches!(apply_error(already), ApplyError::AlreadyExists);

        let gone = CallError::Rpc {
            method: "replication.update".to_string(),
            code: -1,
            message: "[ENOENT] Replication task 9 does not exist".to_string(),
        };
        assert_matches!(apply_error(gone), ApplyError::NotFound);

        assert_matches!(
            apply_error(CallError::Timeout),
            ApplyError::Transient(_)
        );

        let other = CallError::Rpc {
            method: "replication.create".to_string(),
            code: -1,
            message: "[EINVAL] Invalid schedule".to_string(),
        };
        assert_matches!(apply_error(other), ApplyError::Permanent(_));
    }

    #[tokio::test]
    async fn list_snapshots_classifies_and_sorts() {
        let executor = FakeExecutor::new();
        executor.expect(
            "/usr/bin/midclt call zfs.snapshot.query [[\"dataset\",\"=\",\"tank/data\"]]",
            FakeOutcome::Success {
                stdout: json!([
                    { "snapshot_name": "auto-hourly-2026-08-25_14:00" },
                    { "snapshot_name": "before-upgrade" },
                    { "snapshot_name": "auto-daily-2026-08-25_00:00" },
                ])
                .to_string(),
            },
        );
        let client = MiddlewareClient::with_transport(
            Arc::new(MidcltTransport::with_executor(executor.as_executor())),
            test_logger("list_snapshots_classifies_and_sorts"),
        );

        let dataset: DatasetName = "tank/data".parse().unwrap();
        let records = client.list_snapshots(&dataset).await.unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(
            records.iter().filter(|r| r.is_managed()).count(),
            2
        );
        let mut sorted = records.clone();
        sorted.sort();
        assert_eq!(records, sorted);
    }

    #[tokio::test]
    async fn missing_parent_dataset_is_a_distinct_error() {
        let executor = FakeExecutor::new();
        executor.expect(
            "/usr/bin/midclt call pool.dataset.query [[\"id\",\"=\",\"tank/nope\"]]",
            FakeOutcome::Success { stdout: "[]".to_string() },
        );
        let client = MiddlewareClient::with_transport(
            Arc::new(MidcltTransport::with_executor(executor.as_executor())),
            test_logger("missing_parent_dataset_is_a_distinct_error"),
        );

        let parent: DatasetName = "tank/nope".parse().unwrap();
        let err =
            client.list_child_datasets(&parent, false).await.unwrap_err();
        assert_matches!(err, FetchError::DatasetNotFound(d) if d == parent);
    }

    #[tokio::test]
    async fn child_listing_filters_depth_unless_recursive() {
        let listing = json!([
            { "id": "tank/data/home" },
            { "id": "tank/data/home/alice" },
            { "id": "tank/data/media" },
        ]);
        let exists = json!([{ "id": "tank/data" }]);

        for (recursive, expected) in [
            (false, vec!["tank/data/home", "tank/data/media"]),
            (
                true,
                vec![
                    "tank/data/home",
                    "tank/data/home/alice",
                    "tank/data/media",
                ],
            ),
        ] {
            let executor = FakeExecutor::new();
            executor.expect(
                "/usr/bin/midclt call pool.dataset.query [[\"id\",\"=\",\"tank/data\"]]",
                FakeOutcome::Success { stdout: exists.to_string() },
            );
            executor.expect(
                "/usr/bin/midclt call pool.dataset.query [[\"id\",\"^\",\"tank/data/\"]]",
                FakeOutcome::Success { stdout: listing.to_string() },
            );
            let client = MiddlewareClient::with_transport(
                Arc::new(MidcltTransport::with_executor(
                    executor.as_executor(),
                )),
                test_logger("child_listing_filters_depth_unless_recursive"),
            );

            let parent: DatasetName = "tank/data".parse().unwrap();
            let children = client
                .list_child_datasets(&parent, recursive)
                .await
                .unwrap();
            let got: Vec<&str> =
                children.iter().map(|c| c.as_str()).collect();
            assert_eq!(got, expected, "recursive={recursive}");
        }
    }
}
