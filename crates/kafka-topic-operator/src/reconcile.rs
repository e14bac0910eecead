//! Reconciliation decision
//!
//! Given the stored, Kubernetes-side and broker-side snapshots of one topic,
//! [`plan`] decides which of the eight structural cases applies and returns
//! the ordered [`CorrectiveAction`]s that converge the three. Planning is
//! pure; executing the actions is the controller's job.
//!
//! | stored | k8s | kafka | decision |
//! |---|---|---|---|
//! | - | - | - | nothing |
//! | - | - | x | create resource, create record |
//! | - | x | - | create topic, create record |
//! | - | x | x (equal) | create record |
//! | - | x | x (differ) | update resource from kafka, warn, create record |
//! | x | - | - | delete record |
//! | x | - | x | delete topic, delete record |
//! | x | x | - | delete resource, delete record |
//! | x | x | x | three-way merge |

use crate::diff::TopicDiff;
use crate::error::{OperatorError, Result};
use crate::labels::LabelPredicate;
use crate::topic::{ResourceName, Topic, TopicName};
use std::fmt;

/// One step of a reconciliation sequence
#[derive(Debug, Clone, PartialEq)]
pub enum CorrectiveAction {
    CreateKafkaTopic(Topic),
    DeleteKafkaTopic(TopicName),
    ChangeReplicationFactor(Topic),
    UpdateKafkaConfig(Topic),
    IncreaseKafkaPartitions(Topic),
    CreateResource(Topic),
    UpdateResource(Topic),
    DeleteResource(ResourceName),
    CreateStored(Topic),
    UpdateStored(Topic),
    DeleteStored(TopicName),
    /// Publish a warning event and carry on
    Warn {
        reason: &'static str,
        message: String,
    },
}

impl CorrectiveAction {
    /// Short name used in logs and metrics
    pub fn name(&self) -> &'static str {
        match self {
            CorrectiveAction::CreateKafkaTopic(_) => "CreateKafkaTopic",
            CorrectiveAction::DeleteKafkaTopic(_) => "DeleteKafkaTopic",
            CorrectiveAction::ChangeReplicationFactor(_) => "ChangeReplicationFactor",
            CorrectiveAction::UpdateKafkaConfig(_) => "UpdateKafkaConfig",
            CorrectiveAction::IncreaseKafkaPartitions(_) => "IncreaseKafkaPartitions",
            CorrectiveAction::CreateResource(_) => "CreateResource",
            CorrectiveAction::UpdateResource(_) => "UpdateResource",
            CorrectiveAction::DeleteResource(_) => "DeleteResource",
            CorrectiveAction::CreateStored(_) => "CreateStored",
            CorrectiveAction::UpdateStored(_) => "UpdateStored",
            CorrectiveAction::DeleteStored(_) => "DeleteStored",
            CorrectiveAction::Warn { .. } => "Warn",
        }
    }

}

/// Which of the structural cases a reconciliation fell into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Nothing,
    CreateResource,
    CreateKafkaTopic,
    RecordConverged,
    KafkaWins,
    ForgetStored,
    DeleteKafkaTopic,
    DeleteResource,
    Merge,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Decision::Nothing => "nothing",
            Decision::CreateResource => "create-resource",
            Decision::CreateKafkaTopic => "create-kafka-topic",
            Decision::RecordConverged => "record-converged",
            Decision::KafkaWins => "kafka-wins",
            Decision::ForgetStored => "forget-stored",
            Decision::DeleteKafkaTopic => "delete-kafka-topic",
            Decision::DeleteResource => "delete-resource",
            Decision::Merge => "merge",
        };
        f.write_str(s)
    }
}

/// Outcome of planning: the case and the ordered actions
#[derive(Debug, Clone, PartialEq)]
pub struct Plan {
    pub decision: Decision,
    pub actions: Vec<CorrectiveAction>,
}

impl Plan {
    fn new(decision: Decision, actions: Vec<CorrectiveAction>) -> Self {
        Self { decision, actions }
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }
}

/// Decide how to converge the three snapshots of one topic.
///
/// Resources created from broker snapshots are stamped with the predicate's
/// labels so this instance keeps managing them. Conflicting edits and
/// partition decreases are errors; no action is planned for them.
pub fn plan(
    stored: Option<&Topic>,
    k8s: Option<&Topic>,
    kafka: Option<&Topic>,
    predicate: &LabelPredicate,
) -> Result<Plan> {
    use CorrectiveAction as A;

    let plan = match (stored, k8s, kafka) {
        (None, None, None) => Plan::new(Decision::Nothing, vec![]),
        (None, None, Some(kafka)) => {
            let resource = kafka.clone().with_labels(predicate.labels().clone());
            Plan::new(
                Decision::CreateResource,
                vec![A::CreateResource(resource.clone()), A::CreateStored(resource)],
            )
        }
        (None, Some(k8s), None) => Plan::new(
            Decision::CreateKafkaTopic,
            vec![A::CreateKafkaTopic(k8s.clone()), A::CreateStored(k8s.clone())],
        ),
        (None, Some(k8s), Some(kafka)) => {
            let diff = TopicDiff::diff(k8s, kafka);
            if diff.is_empty() {
                Plan::new(Decision::RecordConverged, vec![A::CreateStored(k8s.clone())])
            } else {
                let mut resource = kafka.clone().with_resource_name(k8s.resource_name().clone());
                if let Some(labels) = k8s.labels() {
                    resource = resource.with_labels(labels.clone());
                }
                let message = format!(
                    "KafkaTopic {} differs from existing topic '{}' ({}); the resource was updated to match Kafka",
                    k8s.resource_name(),
                    kafka.name(),
                    diff
                );
                Plan::new(
                    Decision::KafkaWins,
                    vec![
                        A::UpdateResource(resource.clone()),
                        A::Warn {
                            reason: "ResourceOverwritten",
                            message,
                        },
                        A::CreateStored(resource),
                    ],
                )
            }
        }
        (Some(stored), None, None) => Plan::new(
            Decision::ForgetStored,
            vec![A::DeleteStored(stored.name().clone())],
        ),
        (Some(stored), None, Some(kafka)) => Plan::new(
            Decision::DeleteKafkaTopic,
            vec![
                A::DeleteKafkaTopic(kafka.name().clone()),
                A::DeleteStored(stored.name().clone()),
            ],
        ),
        (Some(stored), Some(k8s), None) => Plan::new(
            Decision::DeleteResource,
            vec![
                A::DeleteResource(k8s.resource_name().clone()),
                A::DeleteStored(stored.name().clone()),
            ],
        ),
        (Some(stored), Some(k8s), Some(kafka)) => {
            Plan::new(Decision::Merge, update_3way(stored, k8s, kafka)?)
        }
    };
    Ok(plan)
}

/// Three-way merge of independent Kubernetes-side and broker-side edits
/// against the last converged snapshot
pub fn update_3way(stored: &Topic, k8s: &Topic, kafka: &Topic) -> Result<Vec<CorrectiveAction>> {
    let diff_kafka = TopicDiff::diff(stored, kafka);
    let diff_k8s = TopicDiff::diff(stored, k8s);

    if let Some(reason) = diff_kafka.conflict(&diff_k8s) {
        return Err(OperatorError::Conflict {
            topic: stored.name().to_string(),
            reason,
        });
    }

    let merged = diff_kafka.merge(&diff_k8s);
    if merged.is_empty() {
        return Ok(vec![]);
    }

    if merged.partition_delta() < 0 {
        let (from, to) = merged
            .partitions()
            .map(|c| (c.from, c.to))
            .unwrap_or((stored.partitions(), stored.partitions()));
        return Err(OperatorError::PartitionDecrease {
            topic: stored.name().to_string(),
            from,
            to,
        });
    }

    let result = merged
        .apply(stored)
        .with_resource_name(k8s.resource_name().clone());

    // Broker steps only for fields the broker does not already hold; edits
    // that started on the broker side flow to the resource and the store only.
    let mut actions = Vec::new();
    if merged.changes_replication_factor()
        && kafka.replication_factor() != result.replication_factor()
    {
        actions.push(CorrectiveAction::ChangeReplicationFactor(result.clone()));
    }
    actions.push(CorrectiveAction::UpdateResource(result.clone()));
    if merged.changes_config() && kafka.config() != result.config() {
        actions.push(CorrectiveAction::UpdateKafkaConfig(result.clone()));
    }
    if merged.partition_delta() > 0 && kafka.partitions() < result.partitions() {
        actions.push(CorrectiveAction::IncreaseKafkaPartitions(result.clone()));
    }
    actions.push(CorrectiveAction::UpdateStored(result));
    Ok(actions)
}
