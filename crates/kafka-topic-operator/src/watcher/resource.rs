//! Cluster-API-side watcher
//!
//! Follows `KafkaTopic` watch events for resources matching the operator's
//! label predicate. Only spec changes (a new `metadata.generation`) count as
//! modifications, so status writes never trigger a reconciliation. When the
//! watch restarts, resources missing from the relist are reported deleted.

use crate::controller::Trigger;
use crate::crd::KafkaTopic;
use crate::labels::LabelPredicate;
use crate::topic::{ResourceName, TopicName};
use futures::StreamExt;
use kube::runtime::watcher::Event;
use kube::runtime::{watcher, WatchStreamExt};
use kube::{Api, ResourceExt};
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
struct Seen {
    topic: TopicName,
    generation: Option<i64>,
}

/// Resources known to the watcher
#[derive(Debug)]
pub struct ResourceView {
    predicate: LabelPredicate,
    seen: HashMap<ResourceName, Seen>,
    relist: Option<HashSet<ResourceName>>,
}

impl ResourceView {
    pub fn new(predicate: LabelPredicate) -> Self {
        Self {
            predicate,
            seen: HashMap::new(),
            relist: None,
        }
    }

    /// Record a watch event and return the triggers it implies
    pub fn observe(&mut self, event: Event<KafkaTopic>) -> Vec<Trigger> {
        match event {
            Event::Init => {
                self.relist = Some(HashSet::new());
                vec![]
            }
            Event::InitApply(kt) => {
                if let Some(relist) = self.relist.as_mut() {
                    relist.insert(ResourceName::new(kt.name_any()));
                }
                self.applied(&kt).into_iter().collect()
            }
            Event::Apply(kt) => self.applied(&kt).into_iter().collect(),
            Event::Delete(kt) => self.deleted(&kt).into_iter().collect(),
            Event::InitDone => {
                let Some(relist) = self.relist.take() else {
                    return vec![];
                };
                let gone: Vec<ResourceName> = self
                    .seen
                    .keys()
                    .filter(|name| !relist.contains(*name))
                    .cloned()
                    .collect();
                gone.into_iter()
                    .filter_map(|resource| {
                        let seen = self.seen.remove(&resource)?;
                        Some(Trigger::ResourceDeleted {
                            topic: seen.topic,
                            resource,
                        })
                    })
                    .collect()
            }
        }
    }

    fn applied(&mut self, kt: &KafkaTopic) -> Option<Trigger> {
        let resource = ResourceName::new(kt.name_any());
        if !self.predicate.matches(kt.labels()) {
            debug!(resource = %resource, "Ignoring KafkaTopic outside the label selector");
            return None;
        }

        let topic = match kt.topic_name() {
            Ok(topic) => topic,
            Err(e) => {
                return Some(Trigger::ResourceRejected {
                    resource,
                    reason: e.to_string(),
                })
            }
        };
        let generation = kt.metadata.generation;

        let previous = self.seen.insert(
            resource.clone(),
            Seen {
                topic: topic.clone(),
                generation,
            },
        );
        match previous {
            None => Some(Trigger::ResourceAdded { topic, resource }),
            Some(seen) if seen.generation != generation || seen.topic != topic => {
                Some(Trigger::ResourceModified { topic, resource })
            }
            Some(_) => None,
        }
    }

    fn deleted(&mut self, kt: &KafkaTopic) -> Option<Trigger> {
        let resource = ResourceName::new(kt.name_any());
        let topic = match self.seen.remove(&resource) {
            Some(seen) => seen.topic,
            None => kt.topic_name().ok()?,
        };
        Some(Trigger::ResourceDeleted { topic, resource })
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

/// Watch loop feeding the controller
pub struct ResourceWatcher {
    api: Api<KafkaTopic>,
    predicate: LabelPredicate,
    tx: mpsc::Sender<Trigger>,
}

impl ResourceWatcher {
    pub fn new(api: Api<KafkaTopic>, predicate: LabelPredicate, tx: mpsc::Sender<Trigger>) -> Self {
        Self { api, predicate, tx }
    }

    /// Watch until the controller's channel closes
    pub async fn run(self) {
        let config = watcher::Config::default().labels(&self.predicate.selector());
        let mut view = ResourceView::new(self.predicate.clone());
        let mut events = std::pin::pin!(watcher(self.api.clone(), config).default_backoff());

        info!(selector = %self.predicate, "Starting KafkaTopic watcher");

        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(e) => {
                    warn!(error = %e, "KafkaTopic watch failed, backing off");
                    continue;
                }
            };

            for trigger in view.observe(event) {
                if self.tx.send(trigger).await.is_err() {
                    info!("Controller stopped, shutting down KafkaTopic watcher");
                    return;
                }
            }
        }
    }
}
