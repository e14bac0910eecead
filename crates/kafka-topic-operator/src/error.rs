//! Error types for the Kafka topic operator

use thiserror::Error;

/// Errors reported by the broker gateway
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KafkaError {
    /// Topic already exists on the broker side
    #[error("topic '{0}' already exists")]
    TopicExists(String),

    /// Topic is not known to the brokers
    #[error("topic '{0}' does not exist")]
    UnknownTopic(String),

    /// The gateway cannot perform the requested operation
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// The brokers rejected an admin request
    #[error("admin operation on '{topic}' failed: {message}")]
    Admin { topic: String, message: String },

    /// Client-level failure (connection, protocol, configuration)
    #[error("kafka client error: {0}")]
    Client(String),

    /// Request did not complete in time
    #[error("kafka request timed out: {0}")]
    Timeout(String),
}

/// Errors reported by a durable topic store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A record already exists for the identity
    #[error("stored topic '{0}' already exists")]
    AlreadyExists(String),

    /// No record exists for the identity
    #[error("stored topic '{0}' not found")]
    NotFound(String),

    /// Optimistic version check failed
    #[error("stored topic '{name}' has version {actual}, expected {expected}")]
    BadVersion {
        name: String,
        expected: i64,
        actual: i64,
    },

    /// A record could not be decoded
    #[error("stored topic '{name}' is corrupt: {message}")]
    Corrupt { name: String, message: String },

    /// Backend failure
    #[error("store backend error: {0}")]
    Backend(String),
}

/// Errors that can occur during operator operations
#[derive(Error, Debug)]
pub enum OperatorError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    /// Broker gateway error
    #[error(transparent)]
    Kafka(#[from] KafkaError),

    /// Durable store error
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Both sides changed the same field to different values
    #[error("Topic '{topic}' has conflicting changes: {reason}")]
    Conflict { topic: String, reason: String },

    /// A change would reduce the partition count
    #[error("Topic '{topic}': partition count cannot be decreased from {from} to {to}")]
    PartitionDecrease { topic: String, from: i32, to: i32 },

    /// A KafkaTopic resource failed validation
    #[error("Invalid KafkaTopic resource '{name}': {reason}")]
    InvalidResource { name: String, reason: String },

    /// A name is not a legal Kafka topic name
    #[error("Invalid topic name '{name}': {reason}")]
    InvalidTopicName { name: String, reason: String },

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Topic metadata did not become visible within the retry bound
    #[error("Metadata for topic '{topic}' not visible after {attempts} attempts")]
    MetadataTimeout { topic: String, attempts: u32 },

    /// The controller's trigger channel is closed
    #[error("Controller is shut down")]
    Shutdown,
}

/// Result type for operator operations
pub type Result<T> = std::result::Result<T, OperatorError>;

impl OperatorError {
    /// Whether this is the broker reporting a topic we were about to create
    pub fn is_create_race(&self) -> bool {
        matches!(self, OperatorError::Kafka(KafkaError::TopicExists(_)))
    }

    /// Short machine-readable reason used for Kubernetes events and status
    pub fn reason(&self) -> &'static str {
        match self {
            OperatorError::KubeError(_) => "KubernetesApiError",
            OperatorError::Kafka(KafkaError::TopicExists(_)) => "TopicCreateRace",
            OperatorError::Kafka(KafkaError::Unsupported(_)) => "UnsupportedChange",
            OperatorError::Kafka(_) => "KafkaError",
            OperatorError::Store(_) => "StoreError",
            OperatorError::Conflict { .. } => "ConflictingChanges",
            OperatorError::PartitionDecrease { .. } => "PartitionDecrease",
            OperatorError::InvalidResource { .. } => "InvalidResource",
            OperatorError::InvalidTopicName { .. } => "InvalidTopicName",
            OperatorError::InvalidConfig(_) => "InvalidConfig",
            OperatorError::MetadataTimeout { .. } => "MetadataTimeout",
            OperatorError::Shutdown => "Shutdown",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OperatorError::PartitionDecrease {
            topic: "orders".to_string(),
            from: 5,
            to: 3,
        };
        assert!(err.to_string().contains("orders"));
        assert!(err.to_string().contains("cannot be decreased"));
    }

    #[test]
    fn test_reasons() {
        let lag = OperatorError::MetadataTimeout {
            topic: "t".to_string(),
            attempts: 6,
        };
        assert_eq!(lag.reason(), "MetadataTimeout");

        let conflict = OperatorError::Conflict {
            topic: "t".to_string(),
            reason: "config.a".to_string(),
        };
        assert_eq!(conflict.reason(), "ConflictingChanges");
    }

    #[test]
    fn test_create_race_detection() {
        let err = OperatorError::from(KafkaError::TopicExists("t".to_string()));
        assert!(err.is_create_race());
        assert_eq!(err.reason(), "TopicCreateRace");

        let other = OperatorError::from(KafkaError::UnknownTopic("t".to_string()));
        assert!(!other.is_create_race());
    }

    #[test]
    fn test_store_error_passthrough() {
        let err = OperatorError::from(StoreError::NotFound("orders".to_string()));
        assert_eq!(err.to_string(), "stored topic 'orders' not found");
        assert_eq!(err.reason(), "StoreError");
    }
}
