//! Durable store of last-converged topic snapshots
//!
//! The store holds, per [`TopicName`], the snapshot that was true on both the
//! Kubernetes and the Kafka side after the last successful reconciliation. It
//! is the common ancestor for three-way merges. Any backend implementing
//! [`TopicStore`] can be plugged into the controller.

mod configmap;
mod hierarchical;

pub use configmap::ConfigMapTopicStore;
pub use hierarchical::{HierarchicalTopicStore, MemoryNodeTree, NodeError, NodeResult, NodeTree};

use crate::error::StoreError;
use crate::topic::{ResourceName, Topic, TopicName};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Result type for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// CRUD access to converged snapshots, keyed by topic name
#[async_trait]
pub trait TopicStore: Send + Sync {
    /// Read the record for `name`; a missing record is `Ok(None)`
    async fn read(&self, name: &TopicName) -> StoreResult<Option<Topic>>;

    /// Create a record, failing with [`StoreError::AlreadyExists`] if one exists
    async fn create(&self, topic: &Topic) -> StoreResult<()>;

    /// Replace an existing record, failing with [`StoreError::NotFound`] if none exists
    async fn update(&self, topic: &Topic) -> StoreResult<()>;

    /// Delete a record, failing with [`StoreError::NotFound`] if none exists
    async fn delete(&self, name: &TopicName) -> StoreResult<()>;

    /// Names of every stored record
    async fn list(&self) -> StoreResult<Vec<TopicName>>;
}

/// Serialized form of a stored snapshot; the topic name is the record key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StoredTopic {
    resource_name: ResourceName,
    partitions: i32,
    replication_factor: i16,
    #[serde(default)]
    config: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    labels: Option<BTreeMap<String, String>>,
}

/// Encode a snapshot as a JSON record
pub fn encode(topic: &Topic) -> StoreResult<Vec<u8>> {
    let record = StoredTopic {
        resource_name: topic.resource_name().clone(),
        partitions: topic.partitions(),
        replication_factor: topic.replication_factor(),
        config: topic.config().clone(),
        labels: topic.labels().cloned(),
    };
    serde_json::to_vec(&record).map_err(|e| StoreError::Corrupt {
        name: topic.name().to_string(),
        message: e.to_string(),
    })
}

/// Decode a JSON record stored under `name`
pub fn decode(name: &TopicName, data: &[u8]) -> StoreResult<Topic> {
    let corrupt = |message: String| StoreError::Corrupt {
        name: name.to_string(),
        message,
    };

    let record: StoredTopic = serde_json::from_slice(data).map_err(|e| corrupt(e.to_string()))?;
    let topic = Topic::new(name.clone(), record.partitions, record.replication_factor)
        .map_err(|e| corrupt(e.to_string()))?
        .with_config(record.config)
        .with_resource_name(record.resource_name);

    Ok(match record.labels {
        Some(labels) => topic.with_labels(labels),
        None => topic,
    })
}
