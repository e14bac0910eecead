//! Topic reconciliation controller
//!
//! All reconciliation runs inside [`TopicOperator::run`], a single task that
//! owns the admission ledger. Watchers and the sweep ticker send
//! [`Trigger`]s over one channel; each admitted trigger becomes a
//! reconciliation future polled by that same task, so sequences for different
//! topics interleave while the steps of one sequence run in order.

use crate::crd::{KafkaTopic, KafkaTopicStatus, TopicCondition};
use crate::config::{OperatorConfig, StoreKind};
use crate::error::{OperatorError, Result};
use crate::inflight::InFlight;
use crate::k8s::{K8sGateway, KubeGateway};
use crate::kafka::{KafkaAdmin, KafkaAdminConfig, RdKafkaAdmin};
use crate::labels::LabelPredicate;
use crate::reconcile::{self, CorrectiveAction, Decision};
use crate::retry::{retry_until_visible, RetryConfig};
use crate::store::{ConfigMapTopicStore, HierarchicalTopicStore, MemoryNodeTree, TopicStore};
use crate::topic::{ResourceName, TopicName};
use crate::watcher::{KafkaTopicWatcher, ResourceWatcher};
use chrono::Utc;
use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, StreamExt};
use kube::{Api, Client, ResourceExt};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, instrument, warn};

/// Capacity of the trigger channel
const TRIGGER_BUFFER: usize = 1024;

/// A reason to reconcile
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Trigger {
    KafkaTopicCreated(TopicName),
    KafkaTopicDeleted(TopicName),
    KafkaTopicChanged(TopicName),
    ResourceAdded {
        topic: TopicName,
        resource: ResourceName,
    },
    ResourceModified {
        topic: TopicName,
        resource: ResourceName,
    },
    ResourceDeleted {
        topic: TopicName,
        resource: ResourceName,
    },
    /// A managed resource whose topic name is unusable
    ResourceRejected {
        resource: ResourceName,
        reason: String,
    },
    /// Reconcile one topic again (sweep results, create-race follow-ups)
    Resync {
        topic: TopicName,
        resource: Option<ResourceName>,
    },
    /// Reconcile every known topic
    Sweep,
}

impl Trigger {
    pub fn cause(&self) -> &'static str {
        match self {
            Trigger::KafkaTopicCreated(_) => "KafkaTopicCreated",
            Trigger::KafkaTopicDeleted(_) => "KafkaTopicDeleted",
            Trigger::KafkaTopicChanged(_) => "KafkaTopicChanged",
            Trigger::ResourceAdded { .. } => "ResourceAdded",
            Trigger::ResourceModified { .. } => "ResourceModified",
            Trigger::ResourceDeleted { .. } => "ResourceDeleted",
            Trigger::ResourceRejected { .. } => "ResourceRejected",
            Trigger::Resync { .. } => "Resync",
            Trigger::Sweep => "Sweep",
        }
    }

    /// Topic and, when known, resource this trigger is about
    fn subject(&self) -> Option<(&TopicName, Option<&ResourceName>)> {
        match self {
            Trigger::KafkaTopicCreated(topic)
            | Trigger::KafkaTopicDeleted(topic)
            | Trigger::KafkaTopicChanged(topic) => Some((topic, None)),
            Trigger::ResourceAdded { topic, resource }
            | Trigger::ResourceModified { topic, resource }
            | Trigger::ResourceDeleted { topic, resource } => Some((topic, Some(resource))),
            Trigger::Resync { topic, resource } => Some((topic, resource.as_ref())),
            Trigger::ResourceRejected { .. } | Trigger::Sweep => None,
        }
    }
}

/// Metrics for the topic operator
#[derive(Clone)]
pub struct OperatorMetrics {
    /// Counter for reconciliation attempts
    pub reconciliations: metrics::Counter,
    /// Counter for failed reconciliation attempts
    pub errors: metrics::Counter,
    /// Histogram for reconciliation duration
    pub duration: metrics::Histogram,
    /// Counter for triggers dropped by admission control
    pub dropped_triggers: metrics::Counter,
    /// Counter for published warning events
    pub warning_events: metrics::Counter,
    /// Gauge for outstanding reconciliation sequences
    pub in_flight: metrics::Gauge,
}

impl OperatorMetrics {
    pub fn new() -> Self {
        Self {
            reconciliations: metrics::counter!("kafka_topic_reconciliations_total"),
            errors: metrics::counter!("kafka_topic_reconciliation_errors_total"),
            duration: metrics::histogram!("kafka_topic_reconciliation_duration_seconds"),
            dropped_triggers: metrics::counter!("kafka_topic_dropped_triggers_total"),
            warning_events: metrics::counter!("kafka_topic_warning_events_total"),
            in_flight: metrics::gauge!("kafka_topic_in_flight"),
        }
    }
}

impl Default for OperatorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one reconciliation attempt
#[derive(Debug)]
pub struct Outcome {
    pub topic: TopicName,
    pub result: Result<Option<Decision>>,
}

impl Outcome {
    /// The attempt lost a race creating the broker topic
    pub fn is_create_race(&self) -> bool {
        matches!(&self.result, Err(e) if e.is_create_race())
    }
}

/// What the loop is waiting on
enum Completion {
    Reconciled(Outcome),
    Swept(Vec<(TopicName, Option<ResourceName>)>),
    Rejected,
}

/// State of the Kubernetes side gathered during an attempt
struct Attempt {
    resource: ResourceName,
    live: Option<KafkaTopic>,
}

/// The reconciliation engine and its collaborators
pub struct TopicOperator {
    kafka: Arc<dyn KafkaAdmin>,
    k8s: Arc<dyn K8sGateway>,
    store: Arc<dyn TopicStore>,
    predicate: LabelPredicate,
    retry: RetryConfig,
    metrics: Option<OperatorMetrics>,
}

impl TopicOperator {
    pub fn new(
        kafka: Arc<dyn KafkaAdmin>,
        k8s: Arc<dyn K8sGateway>,
        store: Arc<dyn TopicStore>,
        predicate: LabelPredicate,
    ) -> Self {
        Self {
            kafka,
            k8s,
            store,
            predicate,
            retry: RetryConfig::default(),
            metrics: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_metrics(mut self, metrics: OperatorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Process triggers until the channel closes and every admitted
    /// sequence has finished
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<Trigger>) {
        let mut inflight = InFlight::new();
        let mut running: FuturesUnordered<BoxFuture<'static, Completion>> =
            FuturesUnordered::new();
        let mut open = true;

        info!("Starting topic reconciliation loop");

        loop {
            tokio::select! {
                biased;

                trigger = rx.recv(), if open => match trigger {
                    Some(trigger) => self.admit(trigger, &mut inflight, &mut running),
                    None => {
                        debug!("Trigger channel closed, draining outstanding reconciliations");
                        open = false;
                    }
                },

                Some(completion) = running.next(), if !running.is_empty() => match completion {
                    Completion::Reconciled(outcome) => {
                        if let Some(entry) = inflight.complete(&outcome.topic) {
                            debug!(
                                topic = %outcome.topic,
                                cause = entry.cause,
                                elapsed_ms = entry.started.elapsed().as_millis() as u64,
                                "Reconciliation sequence finished"
                            );
                        }
                        if outcome.is_create_race() {
                            info!(topic = %outcome.topic, "Scheduling follow-up after topic create race");
                            let follow_up = Trigger::Resync {
                                topic: outcome.topic.clone(),
                                resource: None,
                            };
                            self.admit(follow_up, &mut inflight, &mut running);
                        }
                    }
                    Completion::Swept(subjects) => {
                        info!(topics = subjects.len(), "Full reconciliation sweep");
                        for (topic, resource) in subjects {
                            self.admit(Trigger::Resync { topic, resource }, &mut inflight, &mut running);
                        }
                    }
                    Completion::Rejected => {}
                },

                else => break,
            }

            if let Some(ref metrics) = self.metrics {
                metrics.in_flight.set(inflight.len() as f64);
            }
        }

        info!("Topic reconciliation loop stopped");
    }

    fn admit(
        self: &Arc<Self>,
        trigger: Trigger,
        inflight: &mut InFlight,
        running: &mut FuturesUnordered<BoxFuture<'static, Completion>>,
    ) {
        let cause = trigger.cause();
        match &trigger {
            Trigger::Sweep => {
                let this = Arc::clone(self);
                running.push(async move { Completion::Swept(this.sweep().await) }.boxed());
                return;
            }
            Trigger::ResourceRejected { resource, reason } => {
                let this = Arc::clone(self);
                let (resource, reason) = (resource.clone(), reason.clone());
                running.push(
                    async move {
                        this.reject(&resource, &reason).await;
                        Completion::Rejected
                    }
                    .boxed(),
                );
                return;
            }
            _ => {}
        }

        let Some((topic, resource)) = trigger.subject() else {
            return;
        };
        if topic.is_internal() {
            debug!(topic = %topic, cause, "Ignoring internal topic");
            return;
        }
        if !inflight.try_admit(topic, cause) {
            debug!(topic = %topic, cause, "Reconciliation already in flight, dropping trigger");
            if let Some(ref metrics) = self.metrics {
                metrics.dropped_triggers.increment(1);
            }
            return;
        }

        let this = Arc::clone(self);
        let (topic, resource) = (topic.clone(), resource.cloned());
        running.push(
            async move {
                let result = this.reconcile(&topic, resource.as_ref(), cause).await;
                Completion::Reconciled(Outcome { topic, result })
            }
            .boxed(),
        );
    }

    /// Run one reconciliation attempt for `topic`.
    ///
    /// Returns the decision taken, or `None` when the resource is not managed
    /// by this instance. Failures have already been reported through a
    /// warning event and the resource status when this returns.
    #[instrument(skip(self, topic, resource), fields(topic = %topic))]
    pub async fn reconcile(
        &self,
        topic: &TopicName,
        resource: Option<&ResourceName>,
        cause: &'static str,
    ) -> Result<Option<Decision>> {
        let start = Instant::now();
        if let Some(ref metrics) = self.metrics {
            metrics.reconciliations.increment(1);
        }

        let mut attempt = Attempt {
            resource: resource.cloned().unwrap_or_else(|| topic.as_resource_name()),
            live: None,
        };
        let result = self.reconcile_inner(topic, resource, &mut attempt).await;

        if let Some(ref metrics) = self.metrics {
            metrics.duration.record(start.elapsed().as_secs_f64());
        }

        match &result {
            Ok(Some(decision)) => {
                debug!(topic = %topic, cause, %decision, "Reconciliation complete");
                if let Some(live) = &attempt.live {
                    if *decision != Decision::DeleteResource {
                        self.report_ready(&attempt.resource, live).await;
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                if let Some(ref metrics) = self.metrics {
                    metrics.errors.increment(1);
                }
                if e.is_create_race() {
                    warn!(topic = %topic, cause, "Topic was created concurrently by someone else");
                } else {
                    warn!(topic = %topic, cause, error = %e, "Reconciliation failed");
                }
                self.publish_warning(&attempt, e.reason(), &e.to_string())
                    .await;
                if let Some(live) = &attempt.live {
                    self.report_failure(&attempt.resource, live, e).await;
                }
            }
        }

        result
    }

    async fn reconcile_inner(
        &self,
        topic: &TopicName,
        resource: Option<&ResourceName>,
        attempt: &mut Attempt,
    ) -> Result<Option<Decision>> {
        let stored = self.store.read(topic).await?;

        attempt.resource = resource
            .cloned()
            .or_else(|| stored.as_ref().map(|s| s.resource_name().clone()))
            .unwrap_or_else(|| topic.as_resource_name());

        let live = self.k8s.get(&attempt.resource).await?;
        if let Some(kt) = &live {
            if !self.predicate.matches(kt.labels()) {
                debug!(resource = %attempt.resource, "KafkaTopic is not managed by this operator");
                return Ok(None);
            }
        }
        attempt.live = live;

        let k8s = attempt
            .live
            .as_ref()
            .map(KafkaTopic::to_topic)
            .transpose()?;
        if let Some(k8s) = &k8s {
            if k8s.name() != topic {
                return Err(OperatorError::InvalidResource {
                    name: attempt.resource.to_string(),
                    reason: format!(
                        "describes topic '{}', but is the resource of topic '{}'",
                        k8s.name(),
                        topic
                    ),
                });
            }
        }

        let kafka = self.kafka.read_metadata(topic).await?;

        let plan = reconcile::plan(
            stored.as_ref(),
            k8s.as_ref(),
            kafka.as_ref(),
            &self.predicate,
        )?;

        match plan.decision {
            Decision::Nothing => {
                warn!(topic = %topic, "Topic is absent from Kafka, Kubernetes and the store");
            }
            decision if plan.is_empty() => {
                debug!(topic = %topic, %decision, "Topic already converged");
            }
            decision => {
                info!(
                    topic = %topic,
                    %decision,
                    actions = plan.actions.len(),
                    "Reconciling topic"
                );
            }
        }

        for action in &plan.actions {
            self.execute(action, attempt).await?;
        }

        Ok(Some(plan.decision))
    }

    async fn execute(&self, action: &CorrectiveAction, attempt: &Attempt) -> Result<()> {
        debug!(action = action.name(), resource = %attempt.resource, "Executing corrective action");

        match action {
            CorrectiveAction::CreateKafkaTopic(topic) => {
                self.kafka.create(topic).await?;
                retry_until_visible(&self.retry, topic.name().as_str(), || {
                    self.kafka.read_metadata(topic.name())
                })
                .await?;
            }
            CorrectiveAction::DeleteKafkaTopic(name) => self.kafka.delete(name).await?,
            CorrectiveAction::ChangeReplicationFactor(topic) => {
                self.kafka.change_replication_factor(topic).await?
            }
            CorrectiveAction::UpdateKafkaConfig(topic) => self.kafka.update_config(topic).await?,
            CorrectiveAction::IncreaseKafkaPartitions(topic) => {
                self.kafka.increase_partitions(topic).await?
            }
            CorrectiveAction::CreateResource(topic) => self.k8s.create(topic).await?,
            CorrectiveAction::UpdateResource(topic) => self.k8s.update(topic).await?,
            CorrectiveAction::DeleteResource(name) => self.k8s.delete(name).await?,
            CorrectiveAction::CreateStored(topic) => self.store.create(topic).await?,
            CorrectiveAction::UpdateStored(topic) => self.store.update(topic).await?,
            CorrectiveAction::DeleteStored(name) => self.store.delete(name).await?,
            CorrectiveAction::Warn { reason, message } => {
                warn!(resource = %attempt.resource, reason, "{}", message);
                self.publish_warning(attempt, reason, message).await;
            }
        }
        Ok(())
    }

    /// Identities known to any of the three sources
    async fn sweep(&self) -> Vec<(TopicName, Option<ResourceName>)> {
        let mut subjects: BTreeMap<TopicName, Option<ResourceName>> = BTreeMap::new();

        match self.kafka.list_topics().await {
            Ok(names) => subjects.extend(
                names
                    .into_iter()
                    .filter(|name| !name.is_internal())
                    .map(|name| (name, None)),
            ),
            Err(e) => warn!(error = %e, "Sweep could not list Kafka topics"),
        }

        match self.store.list().await {
            Ok(names) => {
                for name in names {
                    subjects.entry(name).or_insert(None);
                }
            }
            Err(e) => warn!(error = %e, "Sweep could not list stored topics"),
        }

        match self.k8s.list().await {
            Ok(resources) => {
                for kt in resources
                    .iter()
                    .filter(|kt| self.predicate.matches(kt.labels()))
                {
                    match kt.topic_name() {
                        Ok(name) => {
                            subjects.insert(name, Some(ResourceName::new(kt.name_any())));
                        }
                        Err(e) => {
                            warn!(resource = %kt.name_any(), error = %e, "Sweep skipped KafkaTopic")
                        }
                    }
                }
            }
            Err(e) => warn!(error = %e, "Sweep could not list KafkaTopic resources"),
        }

        subjects.into_iter().collect()
    }

    async fn reject(&self, resource: &ResourceName, reason: &str) {
        warn!(resource = %resource, reason, "Rejected KafkaTopic");
        let live = match self.k8s.get(resource).await {
            Ok(live) => live,
            Err(e) => {
                warn!(resource = %resource, error = %e, "Failed to fetch rejected KafkaTopic");
                None
            }
        };
        let attempt = Attempt {
            resource: resource.clone(),
            live,
        };
        self.publish_warning(&attempt, "InvalidTopicName", reason)
            .await;
        if let Some(live) = &attempt.live {
            let err = OperatorError::InvalidResource {
                name: resource.to_string(),
                reason: reason.to_string(),
            };
            self.report_failure(resource, live, &err).await;
        }
    }

    async fn publish_warning(&self, attempt: &Attempt, reason: &str, message: &str) {
        if let Some(ref metrics) = self.metrics {
            metrics.warning_events.increment(1);
        }
        self.k8s
            .emit_warning_event(&attempt.resource, attempt.live.as_ref(), reason, message)
            .await;
    }

    async fn report_ready(&self, resource: &ResourceName, live: &KafkaTopic) {
        let generation = live.metadata.generation.unwrap_or(0);
        let unchanged = live
            .status
            .as_ref()
            .is_some_and(|s| s.phase == "Ready" && s.observed_generation == generation);
        if unchanged {
            return;
        }
        self.write_status(resource, build_ready_status(generation))
            .await;
    }

    async fn report_failure(&self, resource: &ResourceName, live: &KafkaTopic, err: &OperatorError) {
        let generation = live.metadata.generation.unwrap_or(0);
        self.write_status(resource, build_error_status(generation, err))
            .await;
    }

    async fn write_status(&self, resource: &ResourceName, status: KafkaTopicStatus) {
        if let Err(e) = self.k8s.update_status(resource, &status).await {
            warn!(resource = %resource, error = %e, "Failed to update KafkaTopic status");
        }
    }
}

/// Build a ready status
pub fn build_ready_status(generation: i64) -> KafkaTopicStatus {
    let now = Utc::now().to_rfc3339();

    KafkaTopicStatus {
        phase: "Ready".to_string(),
        message: "Topic is in sync with Kafka".to_string(),
        observed_generation: generation,
        conditions: vec![TopicCondition {
            r#type: "Ready".to_string(),
            status: "True".to_string(),
            reason: "Reconciled".to_string(),
            message: "Topic is in sync with Kafka".to_string(),
            last_transition_time: now.clone(),
        }],
        last_sync_time: Some(now),
    }
}

/// Build an error status (reconciliation failed)
pub fn build_error_status(generation: i64, err: &OperatorError) -> KafkaTopicStatus {
    let now = Utc::now().to_rfc3339();

    KafkaTopicStatus {
        phase: "NotReady".to_string(),
        message: err.to_string(),
        observed_generation: generation,
        conditions: vec![TopicCondition {
            r#type: "Ready".to_string(),
            status: "False".to_string(),
            reason: err.reason().to_string(),
            message: err.to_string(),
            last_transition_time: now.clone(),
        }],
        last_sync_time: Some(now),
    }
}

/// Start the topic operator against a live cluster
pub async fn run_topic_operator(client: Client, config: OperatorConfig) -> Result<()> {
    config.validate()?;

    let kafka: Arc<dyn KafkaAdmin> = Arc::new(RdKafkaAdmin::new(KafkaAdminConfig {
        bootstrap_servers: config.bootstrap_servers.clone(),
        operation_timeout: config.operation_timeout,
        ..Default::default()
    })?);
    let k8s: Arc<dyn K8sGateway> = Arc::new(KubeGateway::new(
        client.clone(),
        &config.namespace,
        config.resource_labels.selector(),
    ));
    let store: Arc<dyn TopicStore> = match config.store {
        StoreKind::Configmap => Arc::new(ConfigMapTopicStore::new(
            client.clone(),
            &config.namespace,
            config.store_prefix.clone(),
        )),
        StoreKind::Memory => {
            warn!("Using the in-memory topic store; converged state is lost on restart");
            Arc::new(HierarchicalTopicStore::new(
                MemoryNodeTree::new(),
                &config.store_prefix,
            ))
        }
    };

    info!(
        namespace = %config.namespace,
        bootstrap_servers = %config.bootstrap_servers,
        selector = %config.resource_labels,
        store = ?config.store,
        "Starting Kafka topic operator"
    );

    let operator = Arc::new(
        TopicOperator::new(Arc::clone(&kafka), k8s, store, config.resource_labels.clone())
            .with_retry(config.retry.clone())
            .with_metrics(OperatorMetrics::new()),
    );

    let (tx, rx) = mpsc::channel(TRIGGER_BUFFER);

    let resources: Api<KafkaTopic> = Api::namespaced(client, &config.namespace);
    let resource_watcher = ResourceWatcher::new(resources, config.resource_labels.clone(), tx.clone());
    let kafka_watcher = KafkaTopicWatcher::new(kafka, config.kafka_poll_interval, tx.clone());

    let watchers = vec![
        tokio::spawn(resource_watcher.run()),
        tokio::spawn(kafka_watcher.run()),
        tokio::spawn(run_sweep_ticker(config.full_reconciliation_interval, tx)),
    ];

    operator.run(rx).await;

    for handle in watchers {
        handle.abort();
    }
    error!("Topic operator stopped unexpectedly");
    Err(OperatorError::Shutdown)
}

/// Send a sweep trigger now and then every `interval`
async fn run_sweep_ticker(interval: Duration, tx: mpsc::Sender<Trigger>) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if tx.send(Trigger::Sweep).await.is_err() {
            return;
        }
    }
}
