//! # Kafka Topic Operator
//!
//! Kubernetes operator that keeps Kafka topics and `KafkaTopic` custom
//! resources converged in both directions.
//!
//! Either side may be edited. Every topic has up to three snapshots: the live
//! broker topic, the `KafkaTopic` resource, and the last converged snapshot
//! recorded in a durable store. Comparing all three tells the operator which
//! side changed, so it can propagate creations, deletions and edits without
//! guessing.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use kafka_topic_operator::prelude::*;
//! use kube::Client;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let client = Client::try_default().await?;
//!     run_topic_operator(client, OperatorConfig::default()).await
//! }
//! ```
//!
//! ## Architecture
//!
//! 1. **Watch**: [`watcher`] turns broker polls and `KafkaTopic` watch events
//!    into [`Trigger`](controller::Trigger)s; a periodic sweep covers anything
//!    missed
//! 2. **Admit**: [`inflight`] keeps at most one reconciliation per topic
//! 3. **Decide**: [`reconcile`] picks one of eight cases from which snapshots
//!    exist, and three-way merges when all three do
//! 4. **Act**: [`controller`] executes the planned actions in order against
//!    [`kafka`], [`k8s`] and [`store`], then reports status and warnings
//!
//! ## Custom Resource
//!
//! ```yaml
//! apiVersion: kafka.operator.io/v1beta1
//! kind: KafkaTopic
//! metadata:
//!   name: orders-events
//!   labels:
//!     app.kubernetes.io/managed-by: kafka-topic-operator
//! spec:
//!   partitions: 12
//!   replicas: 3
//!   config:
//!     retention.ms: "604800000"
//! ```
//!
//! ## Metrics
//!
//! - `kafka_topic_reconciliations_total` - Reconciliation attempts
//! - `kafka_topic_reconciliation_errors_total` - Failed attempts
//! - `kafka_topic_reconciliation_duration_seconds` - Attempt latency
//! - `kafka_topic_dropped_triggers_total` - Triggers coalesced by admission
//! - `kafka_topic_warning_events_total` - Warning events published
//! - `kafka_topic_in_flight` - Outstanding reconciliations

pub mod config;
pub mod controller;
pub mod crd;
pub mod diff;
pub mod error;
pub mod inflight;
pub mod k8s;
pub mod kafka;
pub mod labels;
pub mod reconcile;
pub mod retry;
pub mod store;
pub mod topic;
pub mod watcher;

pub mod prelude {
    //! Re-exports for convenient usage
    pub use crate::config::{OperatorConfig, StoreKind};
    pub use crate::controller::{run_topic_operator, OperatorMetrics, TopicOperator, Trigger};
    pub use crate::crd::{KafkaTopic, KafkaTopicSpec, KafkaTopicStatus, TopicCondition};
    pub use crate::diff::TopicDiff;
    pub use crate::error::{KafkaError, OperatorError, Result, StoreError};
    pub use crate::k8s::{K8sGateway, KubeGateway};
    pub use crate::kafka::{KafkaAdmin, KafkaAdminConfig, RdKafkaAdmin, TopicListing};
    pub use crate::labels::LabelPredicate;
    pub use crate::reconcile::{CorrectiveAction, Decision};
    pub use crate::retry::RetryConfig;
    pub use crate::store::{
        ConfigMapTopicStore, HierarchicalTopicStore, MemoryNodeTree, NodeTree, TopicStore,
    };
    pub use crate::topic::{ResourceName, Topic, TopicName};
}
