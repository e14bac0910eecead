//! Broker gateway
//!
//! [`KafkaAdmin`] is the set of admin operations the reconciliation engine
//! needs from the brokers. [`RdKafkaAdmin`] implements it on top of
//! librdkafka's admin client. Every call is a single attempt bounded by the
//! configured operation timeout; retrying is up to the caller.

use crate::error::{KafkaError, OperatorError, Result};
use crate::topic::{Topic, TopicName};
use async_trait::async_trait;
use rdkafka::admin::{
    AdminClient, AdminOptions, AlterConfig, ConfigEntry, ConfigSource, NewPartitions, NewTopic,
    ResourceSpecifier, TopicReplication, TopicResult,
};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError as RdKafkaError, RDKafkaErrorCode};
use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Default timeout for admin and metadata requests
const DEFAULT_OPERATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Admin operations against the brokers
#[async_trait]
pub trait KafkaAdmin: Send + Sync {
    /// Snapshot of a topic, or `None` if the brokers do not know it
    async fn read_metadata(&self, name: &TopicName) -> Result<Option<Topic>>;

    /// Create a topic; fails with [`KafkaError::TopicExists`] if it exists
    async fn create(&self, topic: &Topic) -> Result<()>;

    /// Delete a topic; fails with [`KafkaError::UnknownTopic`] if it is absent
    async fn delete(&self, name: &TopicName) -> Result<()>;

    /// Make the topic's dynamic configuration equal to `topic.config()`
    async fn update_config(&self, topic: &Topic) -> Result<()>;

    /// Grow the topic to `topic.partitions()` partitions
    async fn increase_partitions(&self, topic: &Topic) -> Result<()>;

    /// Move the topic to `topic.replication_factor()` replicas
    async fn change_replication_factor(&self, topic: &Topic) -> Result<()>;

    /// Snapshots of every topic, used by the polling watcher
    async fn describe_topics(&self) -> Result<TopicListing>;

    /// Names of every topic, including those whose metadata is unavailable
    async fn list_topics(&self) -> Result<Vec<TopicName>> {
        let listing = self.describe_topics().await?;
        Ok(listing
            .topics
            .iter()
            .map(|topic| topic.name().clone())
            .chain(listing.unavailable)
            .collect())
    }
}

/// Result of describing every topic
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopicListing {
    pub topics: Vec<Topic>,
    /// Topics the brokers know but could not describe (no leader, etc.)
    pub unavailable: Vec<TopicName>,
}

impl From<Vec<Topic>> for TopicListing {
    fn from(topics: Vec<Topic>) -> Self {
        Self {
            topics,
            unavailable: Vec::new(),
        }
    }
}

/// Configuration for [`RdKafkaAdmin`]
#[derive(Debug, Clone)]
pub struct KafkaAdminConfig {
    /// Comma-separated `host:port` list
    pub bootstrap_servers: String,
    /// Bound on every admin and metadata request
    pub operation_timeout: Duration,
    /// Extra librdkafka properties (security settings and the like)
    pub properties: BTreeMap<String, String>,
}

impl Default for KafkaAdminConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            operation_timeout: DEFAULT_OPERATION_TIMEOUT,
            properties: BTreeMap::new(),
        }
    }
}

/// [`KafkaAdmin`] backed by librdkafka
pub struct RdKafkaAdmin {
    client: Arc<AdminClient<DefaultClientContext>>,
    config: KafkaAdminConfig,
}

impl RdKafkaAdmin {
    pub fn new(config: KafkaAdminConfig) -> Result<Self> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", &config.bootstrap_servers)
            .set("client.id", "kafka-topic-operator");
        for (key, value) in &config.properties {
            client_config.set(key, value);
        }

        let client = client_config
            .create::<AdminClient<DefaultClientContext>>()
            .map_err(|e| KafkaError::Client(e.to_string()))?;

        info!(
            bootstrap_servers = %config.bootstrap_servers,
            timeout_secs = config.operation_timeout.as_secs(),
            "Created Kafka admin client"
        );

        Ok(Self {
            client: Arc::new(client),
            config,
        })
    }

    fn options(&self) -> AdminOptions {
        AdminOptions::new().operation_timeout(Some(self.config.operation_timeout))
    }

    async fn with_timeout<T, F>(&self, op: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, RdKafkaError>>,
    {
        // leave the broker-side timeout room to report first
        let limit = self.config.operation_timeout + Duration::from_secs(5);
        match timeout(limit, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(client_error(e).into()),
            Err(_) => Err(KafkaError::Timeout(format!("{} timed out", op)).into()),
        }
    }

    /// Metadata of every topic, with the per-topic error code if any.
    ///
    /// Never asks for a single topic: with auto-creation enabled on the
    /// brokers, a targeted metadata request creates the topic.
    async fn fetch_metadata(&self) -> Result<Vec<BrokerTopic>> {
        let client = Arc::clone(&self.client);
        let limit = self.config.operation_timeout;
        let metadata = tokio::task::spawn_blocking(move || {
            client.inner().fetch_metadata(None, limit).map(|metadata| {
                metadata
                    .topics()
                    .iter()
                    .map(|t| BrokerTopic {
                        name: t.name().to_string(),
                        partitions: t.partitions().len(),
                        replicas: t.partitions().first().map_or(0, |p| p.replicas().len()),
                        error: t.error().map(RDKafkaErrorCode::from),
                    })
                    .collect::<Vec<_>>()
            })
        })
        .await
        .map_err(|e| KafkaError::Client(format!("metadata task failed: {}", e)))?;

        metadata.map_err(|e| OperatorError::from(client_error(e)))
    }

    /// Dynamic config of each named topic; topics that vanished are omitted
    async fn describe_configs(
        &self,
        names: &[&str],
    ) -> Result<HashMap<String, BTreeMap<String, String>>> {
        if names.is_empty() {
            return Ok(HashMap::new());
        }
        let specifiers: Vec<ResourceSpecifier> =
            names.iter().map(|&n| ResourceSpecifier::Topic(n)).collect();
        let opts = self.options();
        let results = self
            .with_timeout(
                "describe_configs",
                self.client.describe_configs(specifiers.iter(), &opts),
            )
            .await?;

        let mut configs = HashMap::new();
        for (name, result) in names.iter().zip(results) {
            match result {
                Ok(resource) => {
                    configs.insert(name.to_string(), dynamic_config(&resource.entries));
                }
                Err(code) if is_unknown_topic(code) => {
                    debug!(topic = %name, "Topic vanished while describing configs");
                }
                Err(code) => return Err(admin_error(name, code).into()),
            }
        }
        Ok(configs)
    }
}

/// Shape of a topic as reported by a metadata request
#[derive(Debug, Clone, PartialEq)]
struct BrokerTopic {
    name: String,
    partitions: usize,
    /// Replica count of the first partition
    replicas: usize,
    error: Option<RDKafkaErrorCode>,
}

impl BrokerTopic {
    fn is_healthy(&self) -> bool {
        self.error.is_none()
    }

    /// Known to the brokers, whether or not it could be described
    fn exists(&self) -> bool {
        !self.error.is_some_and(is_unknown_topic)
    }
}

/// Whether `name` has usable metadata.
///
/// Absent and unknown-topic entries are `Ok(false)`; any other per-topic
/// error leaves the topic's state undetermined and is returned as such.
fn lookup_metadata(metadata: &[BrokerTopic], name: &str) -> std::result::Result<bool, KafkaError> {
    match metadata.iter().find(|t| t.name == name) {
        None => Ok(false),
        Some(t) => match t.error {
            None => Ok(true),
            Some(code) if is_unknown_topic(code) => Ok(false),
            Some(code) => Err(admin_error(name, code)),
        },
    }
}

/// Snapshots of the described topics, skipping entries that cannot form one
fn topics_from_metadata(
    metadata: &[BrokerTopic],
    mut configs: HashMap<String, BTreeMap<String, String>>,
) -> Vec<Topic> {
    metadata
        .iter()
        .filter(|t| t.is_healthy())
        .filter_map(|t| {
            let config = configs.remove(&t.name)?;
            let name = TopicName::new(t.name.as_str()).ok()?;
            let partitions = i32::try_from(t.partitions).ok()?;
            let replicas = i16::try_from(t.replicas).ok()?;
            match Topic::new(name, partitions, replicas) {
                Ok(topic) => Some(topic.with_config(config)),
                Err(e) => {
                    warn!(topic = %t.name, error = %e, "Skipping topic with unusable metadata");
                    None
                }
            }
        })
        .collect()
}

/// Names the brokers know but reported an error for
fn unavailable_topics(metadata: &[BrokerTopic]) -> Vec<TopicName> {
    metadata
        .iter()
        .filter(|t| !t.is_healthy() && t.exists())
        .filter_map(|t| {
            debug!(topic = %t.name, error = ?t.error, "Topic metadata unavailable");
            TopicName::new(t.name.as_str()).ok()
        })
        .collect()
}

/// Entries explicitly set on the topic, as opposed to broker defaults
fn dynamic_config(entries: &[ConfigEntry]) -> BTreeMap<String, String> {
    entries
        .iter()
        .filter(|e| matches!(e.source, ConfigSource::DynamicTopic))
        .filter_map(|e| Some((e.name.clone(), e.value.clone()?)))
        .collect()
}

fn is_unknown_topic(code: RDKafkaErrorCode) -> bool {
    matches!(
        code,
        RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic
    )
}

/// Map a per-topic admin result code onto the gateway taxonomy
fn admin_error(topic: &str, code: RDKafkaErrorCode) -> KafkaError {
    match code {
        RDKafkaErrorCode::TopicAlreadyExists => KafkaError::TopicExists(topic.to_string()),
        c if is_unknown_topic(c) => KafkaError::UnknownTopic(topic.to_string()),
        RDKafkaErrorCode::RequestTimedOut | RDKafkaErrorCode::OperationTimedOut => {
            KafkaError::Timeout(format!("admin operation on '{}'", topic))
        }
        other => KafkaError::Admin {
            topic: topic.to_string(),
            message: other.to_string(),
        },
    }
}

fn client_error(e: RdKafkaError) -> KafkaError {
    KafkaError::Client(e.to_string())
}

/// Outcome of a single-topic admin request
fn single_result(topic: &str, results: Vec<TopicResult>) -> std::result::Result<(), KafkaError> {
    match results.into_iter().next() {
        Some(Ok(_)) => Ok(()),
        Some(Err((_, code))) => Err(admin_error(topic, code)),
        None => Err(KafkaError::Admin {
            topic: topic.to_string(),
            message: "broker returned no result".to_string(),
        }),
    }
}

#[async_trait]
impl KafkaAdmin for RdKafkaAdmin {
    async fn read_metadata(&self, name: &TopicName) -> Result<Option<Topic>> {
        let metadata = self.fetch_metadata().await?;
        if !lookup_metadata(&metadata, name.as_str())? {
            return Ok(None);
        }
        let configs = self.describe_configs(&[name.as_str()]).await?;
        Ok(topics_from_metadata(&metadata, configs)
            .into_iter()
            .find(|t| t.name() == name))
    }

    async fn create(&self, topic: &Topic) -> Result<()> {
        let name = topic.name().as_str();
        let mut new_topic = NewTopic::new(
            name,
            topic.partitions(),
            TopicReplication::Fixed(i32::from(topic.replication_factor())),
        );
        for (key, value) in topic.config() {
            new_topic = new_topic.set(key, value);
        }

        let opts = self.options();
        let results = self
            .with_timeout("create_topics", self.client.create_topics([&new_topic], &opts))
            .await?;
        single_result(name, results)?;

        info!(
            topic = %name,
            partitions = topic.partitions(),
            replication_factor = topic.replication_factor(),
            "Created Kafka topic"
        );
        Ok(())
    }

    async fn delete(&self, name: &TopicName) -> Result<()> {
        let opts = self.options();
        let results = self
            .with_timeout(
                "delete_topics",
                self.client.delete_topics(&[name.as_str()], &opts),
            )
            .await?;
        single_result(name.as_str(), results)?;

        info!(topic = %name, "Deleted Kafka topic");
        Ok(())
    }

    async fn update_config(&self, topic: &Topic) -> Result<()> {
        let name = topic.name().as_str();
        // non-incremental: entries missing here revert to the broker default
        let mut alter = AlterConfig::new(ResourceSpecifier::Topic(name));
        for (key, value) in topic.config() {
            alter = alter.set(key, value);
        }

        let opts = self.options();
        let results = self
            .with_timeout("alter_configs", self.client.alter_configs([&alter], &opts))
            .await?;
        match results.into_iter().next() {
            Some(Ok(_)) => {}
            Some(Err((_, code))) => return Err(admin_error(name, code).into()),
            None => {
                return Err(KafkaError::Admin {
                    topic: name.to_string(),
                    message: "broker returned no result".to_string(),
                }
                .into())
            }
        }

        info!(topic = %name, entries = topic.config().len(), "Updated Kafka topic config");
        Ok(())
    }

    async fn increase_partitions(&self, topic: &Topic) -> Result<()> {
        let name = topic.name().as_str();
        let count = usize::try_from(topic.partitions()).map_err(|_| KafkaError::Admin {
            topic: name.to_string(),
            message: format!("invalid partition count {}", topic.partitions()),
        })?;
        let partitions = NewPartitions::new(name, count);

        let opts = self.options();
        let results = self
            .with_timeout(
                "create_partitions",
                self.client.create_partitions([&partitions], &opts),
            )
            .await?;
        single_result(name, results)?;

        info!(topic = %name, partitions = count, "Increased Kafka topic partitions");
        Ok(())
    }

    async fn change_replication_factor(&self, topic: &Topic) -> Result<()> {
        warn!(
            topic = %topic.name(),
            replication_factor = topic.replication_factor(),
            "Replication factor changes require a partition reassignment"
        );
        Err(KafkaError::Unsupported(format!(
            "changing the replication factor of '{}' to {} requires a partition reassignment",
            topic.name(),
            topic.replication_factor()
        ))
        .into())
    }

    async fn describe_topics(&self) -> Result<TopicListing> {
        let metadata = self.fetch_metadata().await?;
        let names: Vec<&str> = metadata
            .iter()
            .filter(|t| t.is_healthy())
            .map(|t| t.name.as_str())
            .filter(|name| !name.starts_with("__"))
            .collect();
        let configs = self.describe_configs(&names).await?;
        Ok(TopicListing {
            topics: topics_from_metadata(&metadata, configs),
            unavailable: unavailable_topics(&metadata),
        })
    }

    async fn list_topics(&self) -> Result<Vec<TopicName>> {
        let metadata = self.fetch_metadata().await?;
        Ok(metadata
            .iter()
            .filter(|t| t.exists())
            .filter_map(|t| TopicName::new(t.name.as_str()).ok())
            .collect())
    }
}
