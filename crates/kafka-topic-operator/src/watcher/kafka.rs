//! Broker-side watcher
//!
//! Polls the brokers for topic snapshots and compares each poll against the
//! previous one: names that appeared are created, names that vanished are
//! deleted, and topics whose partitions, replication factor or config moved
//! are changed. The first poll only records a baseline; the controller's
//! startup sweep covers whatever existed before. A topic the brokers list but
//! cannot describe keeps its previous snapshot until a poll describes it.

use crate::controller::Trigger;
use crate::kafka::{KafkaAdmin, TopicListing};
use crate::topic::{Topic, TopicName};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Last observed broker-side snapshots
#[derive(Debug, Default)]
pub struct KafkaView {
    topics: Option<HashMap<TopicName, Topic>>,
}

impl KafkaView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a poll result and return the triggers it implies
    pub fn observe(&mut self, listing: TopicListing) -> Vec<Trigger> {
        let mut current: HashMap<TopicName, Topic> = listing
            .topics
            .into_iter()
            .filter(|t| !t.name().is_internal())
            .map(|t| (t.name().clone(), t))
            .collect();
        if let Some(previous) = self.topics.as_ref() {
            for name in listing.unavailable {
                if let Some(before) = previous.get(&name) {
                    current.entry(name).or_insert_with(|| before.clone());
                }
            }
        }

        let Some(previous) = self.topics.replace(current) else {
            return vec![];
        };
        let Some(current) = self.topics.as_ref() else {
            return vec![];
        };

        let mut triggers = Vec::new();
        for (name, topic) in current {
            match previous.get(name) {
                None => triggers.push(Trigger::KafkaTopicCreated(name.clone())),
                Some(before) if before != topic => {
                    triggers.push(Trigger::KafkaTopicChanged(name.clone()))
                }
                Some(_) => {}
            }
        }
        for name in previous.keys() {
            if !current.contains_key(name) {
                triggers.push(Trigger::KafkaTopicDeleted(name.clone()));
            }
        }
        triggers
    }

    /// Number of topics in the last poll
    pub fn len(&self) -> usize {
        self.topics.as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Polling loop feeding the controller
pub struct KafkaTopicWatcher {
    admin: Arc<dyn KafkaAdmin>,
    interval: Duration,
    tx: mpsc::Sender<Trigger>,
}

impl KafkaTopicWatcher {
    pub fn new(admin: Arc<dyn KafkaAdmin>, interval: Duration, tx: mpsc::Sender<Trigger>) -> Self {
        Self {
            admin,
            interval,
            tx,
        }
    }

    /// Poll until the controller's channel closes
    pub async fn run(self) {
        let mut view = KafkaView::new();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval_secs = self.interval.as_secs(), "Starting Kafka topic watcher");

        loop {
            ticker.tick().await;

            let listing = match self.admin.describe_topics().await {
                Ok(listing) => listing,
                Err(e) => {
                    warn!(error = %e, "Failed to poll Kafka topics");
                    continue;
                }
            };

            let unavailable = listing.unavailable.len();
            let triggers = view.observe(listing);
            debug!(
                topics = view.len(),
                unavailable,
                triggers = triggers.len(),
                "Polled Kafka topics"
            );

            for trigger in triggers {
                if self.tx.send(trigger).await.is_err() {
                    info!("Controller stopped, shutting down Kafka topic watcher");
                    return;
                }
            }
        }
    }
}
