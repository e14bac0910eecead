//! Topic identity and snapshot model
//!
//! A [`Topic`] is an immutable snapshot of a topic's shape that can be built
//! from either a `KafkaTopic` resource or broker metadata. Both sides are
//! correlated through [`TopicName`]; the Kubernetes side addresses the same
//! topic through the derived [`ResourceName`].

use crate::error::{OperatorError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

/// Legal Kafka topic names
static TOPIC_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9._-]+$").unwrap());

/// Legal Kubernetes object names (RFC 1123 subdomain)
static RESOURCE_NAME_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9]([-a-z0-9.]*[a-z0-9])?$").unwrap());

const MAX_TOPIC_NAME_LEN: usize = 249;
pub(crate) const MAX_RESOURCE_NAME_LEN: usize = 253;

/// Hex digits of the name hash appended to normalised resource names
pub(crate) const NAME_HASH_LEN: usize = 40;

/// Kafka-side name of a topic, and the identity used by the store and the
/// admission ledger
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TopicName(String);

impl TopicName {
    /// Validate and wrap a Kafka topic name
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let invalid = |reason: &str| OperatorError::InvalidTopicName {
            name: name.clone(),
            reason: reason.to_string(),
        };

        if name.is_empty() || name.len() > MAX_TOPIC_NAME_LEN {
            return Err(invalid("must be 1-249 characters"));
        }
        if name == "." || name == ".." {
            return Err(invalid("'.' and '..' are reserved"));
        }
        if !TOPIC_NAME_REGEX.is_match(&name) {
            return Err(invalid("only ASCII alphanumerics, '.', '_' and '-' are allowed"));
        }
        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Broker-internal topics (`__consumer_offsets` and friends)
    pub fn is_internal(&self) -> bool {
        self.0.starts_with("__")
    }

    /// Kubernetes name of the resource mirroring this topic.
    ///
    /// Names that are already valid object names map to themselves. Anything
    /// else is lower-cased, stripped of illegal characters and suffixed with a
    /// hash of the original name, so that e.g. `Orders` and `orders` get
    /// distinct resources.
    pub fn as_resource_name(&self) -> ResourceName {
        if self.0.len() <= MAX_RESOURCE_NAME_LEN && RESOURCE_NAME_REGEX.is_match(&self.0) {
            return ResourceName(self.0.clone());
        }

        let sanitized: String = self
            .0
            .chars()
            .map(|c| match c {
                'a'..='z' | '0'..='9' | '.' | '-' => c,
                'A'..='Z' => c.to_ascii_lowercase(),
                _ => '-',
            })
            .collect();
        let sanitized = sanitized.trim_matches(|c: char| !c.is_ascii_alphanumeric());

        let hash = name_hash(&self.0);

        // "---" + hash must fit after the sanitized prefix
        let budget = MAX_RESOURCE_NAME_LEN - NAME_HASH_LEN - 3;
        let prefix: String = sanitized.chars().take(budget).collect();
        let prefix = prefix.trim_end_matches(|c: char| !c.is_ascii_alphanumeric());

        if prefix.is_empty() {
            ResourceName(hash)
        } else {
            ResourceName(format!("{}---{}", prefix, hash))
        }
    }
}

/// Leading [`NAME_HASH_LEN`] hex digits of the SHA-256 of `name`
pub(crate) fn name_hash(name: &str) -> String {
    let digest = Sha256::digest(name.as_bytes());
    let mut hash: String = digest.iter().map(|b| format!("{:02x}", b)).collect();
    hash.truncate(NAME_HASH_LEN);
    hash
}

impl fmt::Display for TopicName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for TopicName {
    type Error = OperatorError;

    fn try_from(value: String) -> Result<Self> {
        Self::new(value)
    }
}

impl From<TopicName> for String {
    fn from(name: TopicName) -> Self {
        name.0
    }
}

/// Kubernetes-side name of a `KafkaTopic` resource
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceName(String);

impl ResourceName {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Immutable snapshot of a topic
///
/// `labels` is `None` for snapshots read from the brokers, which have no
/// notion of labels; a `None` is never treated as "all labels removed".
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topic {
    name: TopicName,
    resource_name: ResourceName,
    partitions: i32,
    replication_factor: i16,
    config: BTreeMap<String, String>,
    labels: Option<BTreeMap<String, String>>,
}

impl Topic {
    /// Create a snapshot with empty config and unknown labels
    pub fn new(name: TopicName, partitions: i32, replication_factor: i16) -> Result<Self> {
        if partitions < 1 {
            return Err(OperatorError::InvalidConfig(format!(
                "topic '{}' must have at least one partition, got {}",
                name, partitions
            )));
        }
        if replication_factor < 1 {
            return Err(OperatorError::InvalidConfig(format!(
                "topic '{}' must have a replication factor of at least one, got {}",
                name, replication_factor
            )));
        }
        Ok(Self {
            resource_name: name.as_resource_name(),
            name,
            partitions,
            replication_factor,
            config: BTreeMap::new(),
            labels: None,
        })
    }

    pub fn with_config(mut self, config: BTreeMap<String, String>) -> Self {
        self.config = config;
        self
    }

    pub fn with_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn with_resource_name(mut self, resource_name: ResourceName) -> Self {
        self.resource_name = resource_name;
        self
    }

    pub fn name(&self) -> &TopicName {
        &self.name
    }

    pub fn resource_name(&self) -> &ResourceName {
        &self.resource_name
    }

    pub fn partitions(&self) -> i32 {
        self.partitions
    }

    pub fn replication_factor(&self) -> i16 {
        self.replication_factor
    }

    pub fn config(&self) -> &BTreeMap<String, String> {
        &self.config
    }

    pub fn labels(&self) -> Option<&BTreeMap<String, String>> {
        self.labels.as_ref()
    }

    pub(crate) fn set_partitions(&mut self, partitions: i32) {
        self.partitions = partitions;
    }

    pub(crate) fn set_replication_factor(&mut self, replication_factor: i16) {
        self.replication_factor = replication_factor;
    }

    pub(crate) fn config_mut(&mut self) -> &mut BTreeMap<String, String> {
        &mut self.config
    }

    pub(crate) fn labels_mut(&mut self) -> &mut BTreeMap<String, String> {
        self.labels.get_or_insert_with(BTreeMap::new)
    }
}
