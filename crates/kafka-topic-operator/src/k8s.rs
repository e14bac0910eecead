//! Cluster-API gateway
//!
//! [`K8sGateway`] covers what the reconciliation engine does to `KafkaTopic`
//! resources: CRUD, status and warning events. [`KubeGateway`] is the
//! implementation against a live API server.

use crate::crd::{KafkaTopic, KafkaTopicStatus};
use crate::error::{OperatorError, Result};
use crate::topic::{ResourceName, Topic};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ObjectReference;
use kube::api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams};
use kube::runtime::events::{Event, EventType, Recorder, Reporter};
use kube::{Client, Resource};
use tracing::{debug, info, warn};

/// Field manager and event reporter name
pub const FIELD_MANAGER: &str = "kafka-topic-operator";

/// Operations on `KafkaTopic` resources in the watched namespace
#[async_trait]
pub trait K8sGateway: Send + Sync {
    /// Fetch a resource; `None` if it does not exist
    async fn get(&self, name: &ResourceName) -> Result<Option<KafkaTopic>>;

    /// Every resource matching the operator's label selector
    async fn list(&self) -> Result<Vec<KafkaTopic>>;

    /// Create a resource mirroring `topic`
    async fn create(&self, topic: &Topic) -> Result<()>;

    /// Make the resource's spec mirror `topic`
    async fn update(&self, topic: &Topic) -> Result<()>;

    /// Delete a resource; a missing resource is not an error
    async fn delete(&self, name: &ResourceName) -> Result<()>;

    /// Replace the status subresource
    async fn update_status(&self, name: &ResourceName, status: &KafkaTopicStatus) -> Result<()>;

    /// Publish a warning event about `resource`.
    ///
    /// `involved` is the live object when one is known; otherwise the event
    /// refers to the resource by name only. Failures are logged, not returned.
    async fn emit_warning_event(
        &self,
        resource: &ResourceName,
        involved: Option<&KafkaTopic>,
        reason: &str,
        message: &str,
    );
}

/// [`K8sGateway`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeGateway {
    api: Api<KafkaTopic>,
    namespace: String,
    selector: String,
    recorder: Recorder,
}

impl KubeGateway {
    pub fn new(client: Client, namespace: &str, selector: impl Into<String>) -> Self {
        let reporter = Reporter {
            controller: FIELD_MANAGER.to_string(),
            instance: std::env::var("POD_NAME").ok(),
        };
        Self {
            api: Api::namespaced(client.clone(), namespace),
            namespace: namespace.to_string(),
            selector: selector.into(),
            recorder: Recorder::new(client, reporter),
        }
    }

    fn resource_for(&self, topic: &Topic) -> KafkaTopic {
        KafkaTopic::from_topic(topic, &self.namespace)
    }
}

/// `current` with its spec replaced by `topic`.
///
/// The whole spec is swapped, so config keys missing from `topic` are removed
/// no matter which field manager wrote them. Metadata is kept, including the
/// `resourceVersion` guarding the replace. Labels change only when `topic`
/// carries them.
pub fn with_topic_spec(mut current: KafkaTopic, topic: &Topic) -> KafkaTopic {
    let namespace = current.metadata.namespace.clone().unwrap_or_default();
    let desired = KafkaTopic::from_topic(topic, &namespace);
    current.spec = desired.spec;
    if let Some(labels) = desired.metadata.labels {
        current.metadata.labels = Some(labels);
    }
    current
}

/// Reference to a resource that may not exist (or no longer exists)
pub fn dangling_reference(namespace: &str, name: &ResourceName) -> ObjectReference {
    ObjectReference {
        api_version: Some(KafkaTopic::api_version(&()).to_string()),
        kind: Some(KafkaTopic::kind(&()).to_string()),
        namespace: Some(namespace.to_string()),
        name: Some(name.to_string()),
        ..Default::default()
    }
}

#[async_trait]
impl K8sGateway for KubeGateway {
    async fn get(&self, name: &ResourceName) -> Result<Option<KafkaTopic>> {
        Ok(self.api.get_opt(name.as_str()).await?)
    }

    async fn list(&self) -> Result<Vec<KafkaTopic>> {
        let lp = ListParams::default().labels(&self.selector);
        Ok(self.api.list(&lp).await?.items)
    }

    async fn create(&self, topic: &Topic) -> Result<()> {
        let resource = self.resource_for(topic);
        self.api.create(&PostParams::default(), &resource).await?;
        info!(
            resource = %topic.resource_name(),
            topic = %topic.name(),
            "Created KafkaTopic resource"
        );
        Ok(())
    }

    async fn update(&self, topic: &Topic) -> Result<()> {
        let name = topic.resource_name().as_str();
        let current = self.api.get(name).await?;
        let params = PostParams {
            field_manager: Some(FIELD_MANAGER.to_string()),
            ..Default::default()
        };
        self.api
            .replace(name, &params, &with_topic_spec(current, topic))
            .await?;
        info!(
            resource = %topic.resource_name(),
            topic = %topic.name(),
            "Updated KafkaTopic resource"
        );
        Ok(())
    }

    async fn delete(&self, name: &ResourceName) -> Result<()> {
        match self.api.delete(name.as_str(), &DeleteParams::default()).await {
            Ok(_) => {
                info!(resource = %name, "Deleted KafkaTopic resource");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                debug!(resource = %name, "KafkaTopic resource already gone");
                Ok(())
            }
            Err(e) => Err(OperatorError::from(e)),
        }
    }

    async fn update_status(&self, name: &ResourceName, status: &KafkaTopicStatus) -> Result<()> {
        debug!(resource = %name, phase = %status.phase, "Updating topic status");

        let patch = serde_json::json!({
            "status": status
        });
        self.api
            .patch_status(name.as_str(), &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }

    async fn emit_warning_event(
        &self,
        resource: &ResourceName,
        involved: Option<&KafkaTopic>,
        reason: &str,
        message: &str,
    ) {
        let reference = match involved {
            Some(kt) => kt.object_ref(&()),
            None => dangling_reference(&self.namespace, resource),
        };
        let event = Event {
            type_: EventType::Warning,
            reason: reason.to_string(),
            note: Some(message.to_string()),
            action: "Reconcile".to_string(),
            secondary: None,
        };

        if let Err(e) = self.recorder.publish(&event, &reference).await {
            warn!(resource = %resource, reason, error = %e, "Failed to publish warning event");
        }
    }
}
