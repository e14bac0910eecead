//! Store backed by a hierarchical coordination service
//!
//! Records live as child nodes of a fixed root path, one node per topic,
//! each holding the JSON-encoded snapshot:
//!
//! ```text
//! /kafka-topic-store/topics
//!     /orders          {"resourceName":"orders","partitions":12,...}
//!     /payments.v2     {...}
//! ```

use super::{decode, encode, StoreResult, TopicStore};
use crate::error::StoreError;
use crate::topic::{Topic, TopicName};
use async_trait::async_trait;
use std::collections::BTreeMap;
use thiserror::Error;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, warn};

/// Errors reported by a [`NodeTree`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeError {
    #[error("node {0} already exists")]
    NodeExists(String),

    #[error("node {0} does not exist")]
    NoNode(String),

    #[error("node {path} has version {actual}, expected {expected}")]
    BadVersion {
        path: String,
        expected: i64,
        actual: i64,
    },

    #[error("node {0} has children")]
    NotEmpty(String),

    #[error("coordination service error: {0}")]
    Backend(String),
}

/// Result type for node operations
pub type NodeResult<T> = std::result::Result<T, NodeError>;

/// The subset of a ZooKeeper-style coordination service the store needs.
///
/// Paths are absolute and `/`-separated. Every node carries a version that is
/// bumped on each `set`; `None` versions skip the optimistic check.
#[async_trait]
pub trait NodeTree: Send + Sync {
    /// Create a node; its parent must exist
    async fn create(&self, path: &str, data: Vec<u8>) -> NodeResult<()>;

    /// Data and version of a node
    async fn get(&self, path: &str) -> NodeResult<Option<(Vec<u8>, i64)>>;

    /// Replace a node's data, returning the new version
    async fn set(&self, path: &str, data: Vec<u8>, version: Option<i64>) -> NodeResult<i64>;

    /// Delete a childless node
    async fn delete(&self, path: &str, version: Option<i64>) -> NodeResult<()>;

    /// Names (not paths) of a node's direct children
    async fn children(&self, path: &str) -> NodeResult<Vec<String>>;
}

#[derive(Debug, Clone)]
struct Node {
    data: Vec<u8>,
    version: i64,
}

/// In-process [`NodeTree`]
#[derive(Debug, Default)]
pub struct MemoryNodeTree {
    nodes: RwLock<BTreeMap<String, Node>>,
}

impl MemoryNodeTree {
    pub fn new() -> Self {
        Self::default()
    }
}

fn parent_of(path: &str) -> Option<&str> {
    match path.rfind('/') {
        Some(0) | None => None,
        Some(idx) => Some(&path[..idx]),
    }
}

fn is_direct_child(parent: &str, path: &str) -> bool {
    path.strip_prefix(parent)
        .and_then(|rest| rest.strip_prefix('/'))
        .is_some_and(|name| !name.is_empty() && !name.contains('/'))
}

#[async_trait]
impl NodeTree for MemoryNodeTree {
    async fn create(&self, path: &str, data: Vec<u8>) -> NodeResult<()> {
        let mut nodes = self.nodes.write().await;
        if nodes.contains_key(path) {
            return Err(NodeError::NodeExists(path.to_string()));
        }
        if let Some(parent) = parent_of(path) {
            if !nodes.contains_key(parent) {
                return Err(NodeError::NoNode(parent.to_string()));
            }
        }
        nodes.insert(path.to_string(), Node { data, version: 0 });
        Ok(())
    }

    async fn get(&self, path: &str) -> NodeResult<Option<(Vec<u8>, i64)>> {
        let nodes = self.nodes.read().await;
        Ok(nodes.get(path).map(|n| (n.data.clone(), n.version)))
    }

    async fn set(&self, path: &str, data: Vec<u8>, version: Option<i64>) -> NodeResult<i64> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get_mut(path)
            .ok_or_else(|| NodeError::NoNode(path.to_string()))?;
        if let Some(expected) = version {
            if expected != node.version {
                return Err(NodeError::BadVersion {
                    path: path.to_string(),
                    expected,
                    actual: node.version,
                });
            }
        }
        node.data = data;
        node.version += 1;
        Ok(node.version)
    }

    async fn delete(&self, path: &str, version: Option<i64>) -> NodeResult<()> {
        let mut nodes = self.nodes.write().await;
        let node = nodes
            .get(path)
            .ok_or_else(|| NodeError::NoNode(path.to_string()))?;
        if let Some(expected) = version {
            if expected != node.version {
                return Err(NodeError::BadVersion {
                    path: path.to_string(),
                    expected,
                    actual: node.version,
                });
            }
        }
        if nodes.keys().any(|p| is_direct_child(path, p)) {
            return Err(NodeError::NotEmpty(path.to_string()));
        }
        nodes.remove(path);
        Ok(())
    }

    async fn children(&self, path: &str) -> NodeResult<Vec<String>> {
        let nodes = self.nodes.read().await;
        if !nodes.contains_key(path) {
            return Err(NodeError::NoNode(path.to_string()));
        }
        Ok(nodes
            .keys()
            .filter(|p| is_direct_child(path, p))
            .map(|p| p[path.len() + 1..].to_string())
            .collect())
    }
}

/// [`TopicStore`] keeping one node per topic under a fixed root
pub struct HierarchicalTopicStore<T> {
    tree: T,
    root: String,
    root_ready: OnceCell<()>,
}

impl<T: NodeTree> HierarchicalTopicStore<T> {
    /// Store records under `/<prefix>/topics`
    pub fn new(tree: T, prefix: &str) -> Self {
        Self {
            tree,
            root: format!("/{}/topics", prefix.trim_matches('/')),
            root_ready: OnceCell::new(),
        }
    }

    pub fn root(&self) -> &str {
        &self.root
    }

    fn path(&self, name: &TopicName) -> String {
        format!("{}/{}", self.root, name)
    }

    /// Create every segment of the root path that does not exist yet
    async fn ensure_root(&self) -> StoreResult<()> {
        self.root_ready
            .get_or_try_init(|| async {
                let mut path = String::new();
                for segment in self.root.split('/').filter(|s| !s.is_empty()) {
                    path.push('/');
                    path.push_str(segment);
                    match self.tree.create(&path, Vec::new()).await {
                        Ok(()) => debug!(path = %path, "Created store node"),
                        Err(NodeError::NodeExists(_)) => {}
                        Err(e) => return Err(backend(e)),
                    }
                }
                Ok(())
            })
            .await
            .map(|_| ())
    }
}

fn backend(e: NodeError) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl<T: NodeTree> TopicStore for HierarchicalTopicStore<T> {
    async fn read(&self, name: &TopicName) -> StoreResult<Option<Topic>> {
        self.ensure_root().await?;
        match self.tree.get(&self.path(name)).await.map_err(backend)? {
            Some((data, _)) => decode(name, &data).map(Some),
            None => Ok(None),
        }
    }

    async fn create(&self, topic: &Topic) -> StoreResult<()> {
        self.ensure_root().await?;
        let data = encode(topic)?;
        match self.tree.create(&self.path(topic.name()), data).await {
            Ok(()) => Ok(()),
            Err(NodeError::NodeExists(_)) => Err(StoreError::AlreadyExists(topic.name().to_string())),
            Err(e) => Err(backend(e)),
        }
    }

    async fn update(&self, topic: &Topic) -> StoreResult<()> {
        self.ensure_root().await?;
        let path = self.path(topic.name());
        let Some((_, version)) = self.tree.get(&path).await.map_err(backend)? else {
            return Err(StoreError::NotFound(topic.name().to_string()));
        };
        match self.tree.set(&path, encode(topic)?, Some(version)).await {
            Ok(_) => Ok(()),
            Err(NodeError::NoNode(_)) => Err(StoreError::NotFound(topic.name().to_string())),
            Err(NodeError::BadVersion {
                expected, actual, ..
            }) => Err(StoreError::BadVersion {
                name: topic.name().to_string(),
                expected,
                actual,
            }),
            Err(e) => Err(backend(e)),
        }
    }

    async fn delete(&self, name: &TopicName) -> StoreResult<()> {
        self.ensure_root().await?;
        match self.tree.delete(&self.path(name), None).await {
            Ok(()) => Ok(()),
            Err(NodeError::NoNode(_)) => Err(StoreError::NotFound(name.to_string())),
            Err(e) => Err(backend(e)),
        }
    }

    async fn list(&self) -> StoreResult<Vec<TopicName>> {
        self.ensure_root().await?;
        let children = self.tree.children(&self.root).await.map_err(backend)?;
        Ok(children
            .into_iter()
            .filter_map(|child| match TopicName::new(child.clone()) {
                Ok(name) => Some(name),
                Err(e) => {
                    warn!(node = %child, error = %e, "Ignoring store node with invalid topic name");
                    None
                }
            })
            .collect())
    }
}
