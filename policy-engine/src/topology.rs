// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolves a replication policy into concrete source/target pairs.

use crate::request::ConfigError;
use crate::request::ReplicationPolicyRequest;
use middleware_client::FetchError;
use middleware_client::MiddlewareApi;
use policy_common::dataset::ParseDatasetError;
use policy_common::DatasetName;
use policy_common::ReplicationEdge;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;

/// How source datasets are discovered under the request's source.
#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Discovery {
    /// The request names the one source/target pair itself.
    #[default]
    None,
    /// Replicate each direct child of the source, one task per child.
    Children,
    /// Replicate every descendant of the source.
    Recursive,
}

#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    #[error(transparent)]
    Config(ConfigError),
    #[error("failed to enumerate child datasets")]
    Fetch(#[source] FetchError),
    #[error("derived target for {source} is not a valid dataset name")]
    InvalidTarget {
        source: DatasetName,
        #[source]
        err: ParseDatasetError,
    },
}

/// Resolves the request into an ordered edge list.
///
/// Deterministic: identical inputs and identical observed children yield an
/// identical sequence, sorted by source dataset path. Each discovered
/// source maps to the target path obtained by substituting the request's
/// source prefix with its target prefix; two sources mapping to the same
/// target is a configuration error, not something resolved here.
pub async fn resolve<M: MiddlewareApi>(
    api: &M,
    request: &ReplicationPolicyRequest,
) -> Result<Vec<ReplicationEdge>, ResolveError> {
    let pairs: Vec<(DatasetName, DatasetName)> = match request.discovery {
        Discovery::None => {
            vec![(request.source.clone(), request.target.clone())]
        }
        Discovery::Children | Discovery::Recursive => {
            let recursive = request.discovery == Discovery::Recursive;
            let children = api
                .list_child_datasets(&request.source, recursive)
                .await
                .map_err(ResolveError::Fetch)?;
            let mut pairs = Vec::with_capacity(children.len());
            for child in children {
                let target = derive_target(request, &child)?;
                pairs.push((child, target));
            }
            pairs
        }
    };

    let mut by_target: BTreeMap<DatasetName, DatasetName> = BTreeMap::new();
    for (source, target) in &pairs {
        if source == target {
            return Err(ResolveError::Config(ConfigError::SourceIsTarget {
                dataset: source.clone(),
            }));
        }
        if let Some(first) = by_target.insert(target.clone(), source.clone())
        {
            return Err(ResolveError::Config(ConfigError::TargetConflict {
                target: target.clone(),
                first,
                second: source.clone(),
            }));
        }
    }

    let mut edges: Vec<ReplicationEdge> = pairs
        .into_iter()
        .map(|(source, target)| ReplicationEdge {
            source,
            target,
            tiers: request.tiers.enabled_tiers().collect(),
            direction: request.direction,
        })
        .collect();
    edges.sort();
    Ok(edges)
}

fn derive_target(
    request: &ReplicationPolicyRequest,
    child: &DatasetName,
) -> Result<DatasetName, ResolveError> {
    match child.relative_to(&request.source) {
        Some(relative) => request.target.join(relative).map_err(|err| {
            ResolveError::InvalidTarget { source: child.clone(), err }
        }),
        // The child listing only ever returns descendants; a non-descendant
        // row maps onto the target root itself, which the conflict check
        // below would reject anyway.
        None => Ok(request.target.clone()),
    }
}
