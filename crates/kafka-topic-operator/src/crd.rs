//! Custom Resource Definition for declarative Kafka topics
//!
//! This module defines the `KafkaTopic` CRD and its conversion to and from
//! the [`Topic`] snapshot used by the reconciliation engine.

use crate::error::{OperatorError, Result};
use crate::topic::{ResourceName, Topic, TopicName};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::{CustomResource, ResourceExt};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::{Validate, ValidationError};

/// KafkaTopic custom resource for declarative topic management
///
/// # Example
///
/// ```yaml
/// apiVersion: kafka.operator.io/v1beta1
/// kind: KafkaTopic
/// metadata:
///   name: orders-events
///   labels:
///     app.kubernetes.io/managed-by: kafka-topic-operator
/// spec:
///   partitions: 12
///   replicas: 3
///   config:
///     retention.ms: "604800000"
///     cleanup.policy: delete
/// ```
#[derive(CustomResource, Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema, Validate)]
#[kube(
    group = "kafka.operator.io",
    version = "v1beta1",
    kind = "KafkaTopic",
    plural = "kafkatopics",
    shortname = "kt",
    namespaced,
    status = "KafkaTopicStatus",
    printcolumn = r#"{"name":"Topic","type":"string","jsonPath":".spec.topicName"}"#,
    printcolumn = r#"{"name":"Partitions","type":"integer","jsonPath":".spec.partitions"}"#,
    printcolumn = r#"{"name":"Replicas","type":"integer","jsonPath":".spec.replicas"}"#,
    printcolumn = r#"{"name":"Phase","type":"string","jsonPath":".status.phase"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct KafkaTopicSpec {
    /// Name of the topic in Kafka; defaults to the resource name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, max = 249, message = "topic name must be 1-249 characters"))]
    pub topic_name: Option<String>,

    /// Number of partitions. Cannot be decreased after creation
    #[validate(range(min = 1, max = 100000, message = "partitions must be at least 1"))]
    pub partitions: i32,

    /// Replication factor
    #[validate(range(
        min = 1,
        max = 32767,
        message = "replication factor must be at least 1"
    ))]
    pub replicas: i32,

    /// Topic-level configuration overrides, e.g. `retention.ms`
    #[serde(default)]
    #[validate(custom(function = "validate_topic_config"))]
    pub config: BTreeMap<String, String>,
}

fn validate_topic_config(
    config: &BTreeMap<String, String>,
) -> std::result::Result<(), ValidationError> {
    for (key, value) in config {
        if key.is_empty() || key.len() > 255 {
            return Err(ValidationError::new("invalid_config_key")
                .with_message("config keys must be 1-255 characters".into()));
        }
        if value.len() > 4096 {
            return Err(ValidationError::new("config_value_too_long")
                .with_message(format!("value of '{}' exceeds 4096 characters", key).into()));
        }
    }
    Ok(())
}

/// Status of the KafkaTopic resource
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KafkaTopicStatus {
    /// Current phase: Ready or NotReady
    #[serde(default)]
    pub phase: String,

    /// Human-readable message about current state
    #[serde(default)]
    pub message: String,

    /// Generation of the spec last reconciled
    #[serde(default)]
    pub observed_generation: i64,

    /// Conditions for detailed status tracking
    #[serde(default)]
    pub conditions: Vec<TopicCondition>,

    /// Last time the topic was reconciled
    #[serde(default)]
    pub last_sync_time: Option<String>,
}

/// Condition for tracking topic status
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TopicCondition {
    /// Type of condition
    pub r#type: String,

    /// Status: True, False, Unknown
    pub status: String,

    /// Machine-readable reason
    pub reason: String,

    /// Human-readable message
    pub message: String,

    /// Last transition time
    pub last_transition_time: String,
}

impl KafkaTopic {
    /// Kafka topic this resource describes
    pub fn topic_name(&self) -> Result<TopicName> {
        match &self.spec.topic_name {
            Some(name) => TopicName::new(name.clone()),
            None => TopicName::new(self.name_any()),
        }
    }

    /// Convert to a snapshot, validating the spec on the way
    pub fn to_topic(&self) -> Result<Topic> {
        let resource = self.name_any();
        let invalid = |reason: String| OperatorError::InvalidResource {
            name: resource.clone(),
            reason,
        };

        if let Err(errors) = self.spec.validate() {
            let messages: Vec<String> = errors
                .field_errors()
                .iter()
                .flat_map(|(field, errs)| {
                    errs.iter()
                        .map(move |e| format!("{}: {:?}", field, e.message))
                })
                .collect();
            return Err(invalid(messages.join("; ")));
        }

        let name = self.topic_name().map_err(|e| invalid(e.to_string()))?;
        let replicas = i16::try_from(self.spec.replicas)
            .map_err(|_| invalid(format!("replicas {} out of range", self.spec.replicas)))?;

        let topic = Topic::new(name, self.spec.partitions, replicas)
            .map_err(|e| invalid(e.to_string()))?;

        Ok(topic
            .with_config(self.spec.config.clone())
            .with_labels(self.labels().clone())
            .with_resource_name(ResourceName::new(resource)))
    }

    /// Build a resource mirroring `topic` in `namespace`.
    ///
    /// `spec.topicName` is only set when the topic name differs from the
    /// resource name.
    pub fn from_topic(topic: &Topic, namespace: &str) -> Self {
        let resource_name = topic.resource_name().as_str().to_string();
        let topic_name = (topic.name().as_str() != resource_name)
            .then(|| topic.name().as_str().to_string());

        KafkaTopic {
            metadata: ObjectMeta {
                name: Some(resource_name),
                namespace: Some(namespace.to_string()),
                labels: topic.labels().cloned(),
                ..Default::default()
            },
            spec: KafkaTopicSpec {
                topic_name,
                partitions: topic.partitions(),
                replicas: i32::from(topic.replication_factor()),
                config: topic.config().clone(),
            },
            status: None,
        }
    }
}
