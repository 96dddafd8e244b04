// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Typed ZFS dataset names.

use serde::Deserialize;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// The pool-rooted name of a ZFS dataset, e.g. `tank/data/home`.
///
/// A valid name has at least one component; components are separated by `/`
/// and contain only the characters ZFS accepts in dataset names. `@` is
/// rejected: snapshot identifiers (`dataset@name`) are a different thing and
/// are carried as raw strings.
#[derive(
    Clone,
    Debug,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
)]
#[serde(try_from = "String", into = "String")]
pub struct DatasetName(String);

#[derive(Debug, thiserror::Error)]
pub enum ParseDatasetError {
    #[error("dataset name is empty")]
    Empty,
    #[error("dataset name {0:?} has an empty component")]
    EmptyComponent(String),
    #[error("dataset name {name:?} contains invalid character {c:?}")]
    InvalidCharacter { name: String, c: char },
}

fn valid_component_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ':')
}

impl DatasetName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The pool (first component) of this dataset.
    pub fn pool(&self) -> &str {
        self.0.split('/').next().unwrap_or(&self.0)
    }

    /// Appends a (possibly multi-component) relative path.
    pub fn join(&self, relative: &str) -> Result<DatasetName, ParseDatasetError> {
        format!("{}/{}", self.0, relative).parse()
    }

    /// True if `self` is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &DatasetName) -> bool {
        other
            .0
            .strip_prefix(&self.0)
            .is_some_and(|rest| rest.starts_with('/'))
    }

    /// The path of `self` relative to `parent`, if `parent` is an ancestor.
    pub fn relative_to(&self, parent: &DatasetName) -> Option<&str> {
        self.0
            .strip_prefix(&parent.0)
            .and_then(|rest| rest.strip_prefix('/'))
    }

    /// Number of components in the name.
    pub fn depth(&self) -> usize {
        self.0.split('/').count()
    }

    /// The name with `/` replaced by `_`, used in replication task names.
    pub fn underscored(&self) -> String {
        self.0.replace('/', "_")
    }
}

impl FromStr for DatasetName {
    type Err = ParseDatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseDatasetError::Empty);
        }
        for component in s.split('/') {
            if component.is_empty() {
                return Err(ParseDatasetError::EmptyComponent(s.to_string()));
            }
            if let Some(c) =
                component.chars().find(|c| !valid_component_char(*c))
            {
                return Err(ParseDatasetError::InvalidCharacter {
                    name: s.to_string(),
                    c,
                });
            }
        }
        Ok(DatasetName(s.to_string()))
    }
}

impl TryFrom<String> for DatasetName {
    type Error = ParseDatasetError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<DatasetName> for String {
    fn from(name: DatasetName) -> String {
        name.0
    }
}

impl fmt::Display for DatasetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> DatasetName {
        s.parse().unwrap()
    }

    #[test]
    fn parses_valid_names() {
        assert_eq!(name("tank").as_str(), "tank");
        assert_eq!(name("tank/data/home-2.0").pool(), "tank");
        assert_eq!(name("tank/data").depth(), 2);
    }

    #[test]
    fn rejects_invalid_names() {
        assert!("".parse::<DatasetName>().is_err());
        assert!("tank//data".parse::<DatasetName>().is_err());
        assert!("/tank".parse::<DatasetName>().is_err());
        assert!("tank/data@snap".parse::<DatasetName>().is_err());
        assert!("tank/da ta".parse::<DatasetName>().is_err());
    }

    #[test]
    fn ancestry_and_relative_paths() {
        let parent = name("tank/data");
        let child = name("tank/data/home/alice");
        assert!(parent.is_ancestor_of(&child));
        assert!(!parent.is_ancestor_of(&parent));
        // Prefix of a component is not an ancestor.
        assert!(!parent.is_ancestor_of(&name("tank/database")));
        assert_eq!(child.relative_to(&parent), Some("home/alice"));
        assert_eq!(parent.relative_to(&child), None);
        assert_eq!(
            parent.join("home/alice").unwrap(),
            child
        );
    }

    #[test]
    fn underscored_names() {
        assert_eq!(name("tank/data/home").underscored(), "tank_data_home");
    }

    #[test]
    fn serde_round_trip_validates() {
        let parsed: DatasetName =
            serde_json::from_str("\"tank/data\"").unwrap();
        assert_eq!(parsed, name("tank/data"));
        assert!(serde_json::from_str::<DatasetName>("\"bad name\"").is_err());
    }
}
