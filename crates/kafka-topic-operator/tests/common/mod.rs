//! In-memory collaborators for driving the controller in tests

#![allow(dead_code)]

use async_trait::async_trait;
use kafka_topic_operator::controller::TopicOperator;
use kafka_topic_operator::crd::{KafkaTopic, KafkaTopicSpec, KafkaTopicStatus};
use kafka_topic_operator::error::{KafkaError, Result};
use kafka_topic_operator::k8s::{with_topic_spec, K8sGateway};
use kafka_topic_operator::kafka::{KafkaAdmin, TopicListing};
use kafka_topic_operator::labels::LabelPredicate;
use kafka_topic_operator::retry::RetryConfig;
use kafka_topic_operator::store::{HierarchicalTopicStore, MemoryNodeTree, TopicStore};
use kafka_topic_operator::topic::{ResourceName, Topic, TopicName};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const NAMESPACE: &str = "kafka";

pub fn predicate() -> LabelPredicate {
    "app.kubernetes.io/managed-by=kafka-topic-operator"
        .parse()
        .unwrap()
}

pub fn name(s: &str) -> TopicName {
    TopicName::new(s).unwrap()
}

/// Broker-side snapshot: no labels
pub fn topic(n: &str, partitions: i32, replicas: i16, config: &[(&str, &str)]) -> Topic {
    Topic::new(name(n), partitions, replicas)
        .unwrap()
        .with_config(
            config
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        )
}

/// Snapshot as a managed resource describes it
pub fn managed(t: Topic) -> Topic {
    t.with_labels(predicate().labels().clone())
}

/// Recording broker gateway
#[derive(Default)]
pub struct FakeKafka {
    topics: Mutex<BTreeMap<TopicName, Topic>>,
    calls: Mutex<Vec<String>>,
    /// Another client creates the topic just before we do
    lose_create_race: Mutex<bool>,
    /// Topics listed by the brokers but without usable metadata
    unavailable: Mutex<BTreeSet<TopicName>>,
}

impl FakeKafka {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn insert(&self, topic: Topic) {
        self.topics
            .lock()
            .unwrap()
            .insert(topic.name().clone(), broker_view(&topic));
    }

    pub fn get(&self, n: &str) -> Option<Topic> {
        self.topics.lock().unwrap().get(&name(n)).cloned()
    }

    /// Keep the topic but fail every metadata request for it
    pub fn make_unavailable(&self, n: &str) {
        self.unavailable.lock().unwrap().insert(name(n));
    }

    pub fn lose_next_create_race(&self) {
        *self.lose_create_race.lock().unwrap() = true;
    }

    /// Mutating calls, in order
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, op: &str) -> usize {
        self.calls()
            .iter()
            .filter(|c| c.split(' ').next() == Some(op))
            .count()
    }

    fn record(&self, op: &str, name: &TopicName) {
        self.calls.lock().unwrap().push(format!("{} {}", op, name));
    }
}

fn broker_view(topic: &Topic) -> Topic {
    Topic::new(
        topic.name().clone(),
        topic.partitions(),
        topic.replication_factor(),
    )
    .unwrap()
    .with_config(topic.config().clone())
}

#[async_trait]
impl KafkaAdmin for FakeKafka {
    async fn read_metadata(&self, name: &TopicName) -> Result<Option<Topic>> {
        if self.unavailable.lock().unwrap().contains(name) {
            return Err(KafkaError::Admin {
                topic: name.to_string(),
                message: "Broker: Leader not available".to_string(),
            }
            .into());
        }
        Ok(self.topics.lock().unwrap().get(name).cloned())
    }

    async fn create(&self, topic: &Topic) -> Result<()> {
        self.record("create", topic.name());
        let mut topics = self.topics.lock().unwrap();
        let mut race = self.lose_create_race.lock().unwrap();
        if *race {
            *race = false;
            topics.insert(topic.name().clone(), broker_view(topic));
            return Err(KafkaError::TopicExists(topic.name().to_string()).into());
        }
        if topics.contains_key(topic.name()) {
            return Err(KafkaError::TopicExists(topic.name().to_string()).into());
        }
        topics.insert(topic.name().clone(), broker_view(topic));
        Ok(())
    }

    async fn delete(&self, name: &TopicName) -> Result<()> {
        self.record("delete", name);
        match self.topics.lock().unwrap().remove(name) {
            Some(_) => Ok(()),
            None => Err(KafkaError::UnknownTopic(name.to_string()).into()),
        }
    }

    async fn update_config(&self, topic: &Topic) -> Result<()> {
        self.record("update_config", topic.name());
        let mut topics = self.topics.lock().unwrap();
        let current = topics
            .get(topic.name())
            .ok_or_else(|| KafkaError::UnknownTopic(topic.name().to_string()))?;
        let updated = current.clone().with_config(topic.config().clone());
        topics.insert(topic.name().clone(), updated);
        Ok(())
    }

    async fn increase_partitions(&self, topic: &Topic) -> Result<()> {
        self.record("increase_partitions", topic.name());
        let mut topics = self.topics.lock().unwrap();
        let current = topics
            .get(topic.name())
            .ok_or_else(|| KafkaError::UnknownTopic(topic.name().to_string()))?;
        if topic.partitions() <= current.partitions() {
            return Err(KafkaError::Admin {
                topic: topic.name().to_string(),
                message: format!(
                    "Broker: Invalid number of partitions: topic already has {} partitions",
                    current.partitions()
                ),
            }
            .into());
        }
        let updated = Topic::new(
            topic.name().clone(),
            topic.partitions(),
            current.replication_factor(),
        )?
        .with_config(current.config().clone());
        topics.insert(topic.name().clone(), updated);
        Ok(())
    }

    async fn change_replication_factor(&self, topic: &Topic) -> Result<()> {
        self.record("change_replication_factor", topic.name());
        Err(KafkaError::Unsupported("replication factor changes".to_string()).into())
    }

    async fn describe_topics(&self) -> Result<TopicListing> {
        let broken = self.unavailable.lock().unwrap();
        let (unavailable, topics): (Vec<Topic>, Vec<Topic>) = self
            .topics
            .lock()
            .unwrap()
            .values()
            .cloned()
            .partition(|t| broken.contains(t.name()));
        Ok(TopicListing {
            topics,
            unavailable: unavailable.into_iter().map(|t| t.name().clone()).collect(),
        })
    }
}

/// Recording cluster-API gateway
#[derive(Default)]
pub struct FakeK8s {
    resources: Mutex<BTreeMap<ResourceName, KafkaTopic>>,
    calls: Mutex<Vec<String>>,
    warnings: Mutex<Vec<(String, String)>>,
}

impl FakeK8s {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Add a resource as if a user had applied it
    pub fn insert(&self, topic: &Topic) {
        let mut kt = KafkaTopic::from_topic(topic, NAMESPACE);
        kt.metadata.generation = Some(1);
        self.resources
            .lock()
            .unwrap()
            .insert(topic.resource_name().clone(), kt);
    }

    /// Add a resource with a raw spec
    pub fn insert_raw(&self, resource: &str, spec: KafkaTopicSpec, labels: BTreeMap<String, String>) {
        let mut kt = KafkaTopic::new(resource, spec);
        kt.metadata.namespace = Some(NAMESPACE.to_string());
        kt.metadata.generation = Some(1);
        kt.metadata.labels = Some(labels);
        self.resources
            .lock()
            .unwrap()
            .insert(ResourceName::new(resource), kt);
    }

    pub fn resource(&self, name: &str) -> Option<KafkaTopic> {
        self.resources
            .lock()
            .unwrap()
            .get(&ResourceName::new(name))
            .cloned()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Mutating calls other than status writes
    pub fn mutations(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| !c.starts_with("update_status"))
            .collect()
    }

    /// (resource, reason) of every warning event
    pub fn warnings(&self) -> Vec<(String, String)> {
        self.warnings.lock().unwrap().clone()
    }

    pub fn warning_reasons(&self) -> Vec<String> {
        self.warnings().into_iter().map(|(_, reason)| reason).collect()
    }

    fn record(&self, op: &str, name: &ResourceName) {
        self.calls.lock().unwrap().push(format!("{} {}", op, name));
    }
}

#[async_trait]
impl K8sGateway for FakeK8s {
    async fn get(&self, name: &ResourceName) -> Result<Option<KafkaTopic>> {
        Ok(self.resources.lock().unwrap().get(name).cloned())
    }

    async fn list(&self) -> Result<Vec<KafkaTopic>> {
        Ok(self.resources.lock().unwrap().values().cloned().collect())
    }

    async fn create(&self, topic: &Topic) -> Result<()> {
        self.record("create", topic.resource_name());
        self.insert(topic);
        Ok(())
    }

    async fn update(&self, topic: &Topic) -> Result<()> {
        self.record("update", topic.resource_name());
        let mut resources = self.resources.lock().unwrap();
        let current = resources
            .get(topic.resource_name())
            .cloned()
            .unwrap_or_else(|| KafkaTopic::from_topic(topic, NAMESPACE));
        let generation = current.metadata.generation.unwrap_or(0);
        let mut kt = with_topic_spec(current, topic);
        kt.metadata.generation = Some(generation + 1);
        resources.insert(topic.resource_name().clone(), kt);
        Ok(())
    }

    async fn delete(&self, name: &ResourceName) -> Result<()> {
        self.record("delete", name);
        self.resources.lock().unwrap().remove(name);
        Ok(())
    }

    async fn update_status(&self, name: &ResourceName, status: &KafkaTopicStatus) -> Result<()> {
        self.record("update_status", name);
        if let Some(kt) = self.resources.lock().unwrap().get_mut(name) {
            kt.status = Some(status.clone());
        }
        Ok(())
    }

    async fn emit_warning_event(
        &self,
        resource: &ResourceName,
        _involved: Option<&KafkaTopic>,
        reason: &str,
        _message: &str,
    ) {
        self.warnings
            .lock()
            .unwrap()
            .push((resource.to_string(), reason.to_string()));
    }
}

/// Everything a controller test needs
pub struct Harness {
    pub kafka: Arc<FakeKafka>,
    pub k8s: Arc<FakeK8s>,
    pub store: Arc<HierarchicalTopicStore<MemoryNodeTree>>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            kafka: FakeKafka::new(),
            k8s: FakeK8s::new(),
            store: Arc::new(HierarchicalTopicStore::new(
                MemoryNodeTree::new(),
                "kafka-topic-store",
            )),
        }
    }

    pub fn operator(&self) -> Arc<TopicOperator> {
        Arc::new(
            TopicOperator::new(
                self.kafka.clone(),
                self.k8s.clone(),
                self.store.clone(),
                predicate(),
            )
            .with_retry(
                RetryConfig::default()
                    .with_max_attempts(3)
                    .with_initial_delay(Duration::from_millis(1)),
            ),
        )
    }

    pub async fn stored(&self, n: &str) -> Option<Topic> {
        self.store.read(&name(n)).await.unwrap()
    }

    pub async fn store_topic(&self, topic: &Topic) {
        self.store.create(topic).await.unwrap();
    }
}

/// Phase of the resource's status, if one was written
pub fn phase(kt: &KafkaTopic) -> Option<String> {
    kt.status.as_ref().map(|s| s.phase.clone())
}
