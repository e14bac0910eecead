//! Store backed by Kubernetes ConfigMaps
//!
//! Each record is a ConfigMap named `<prefix>-<resource-name>` holding the
//! JSON snapshot under [`DATA_KEY`]. Names that would exceed the object name
//! limit are cut and end in a hash of the topic name instead. The Kafka topic name is kept in an
//! annotation so records can be listed without decoding them.

use super::{decode, encode, StoreResult, TopicStore};
use crate::error::StoreError;
use crate::topic::{name_hash, Topic, TopicName, MAX_RESOURCE_NAME_LEN, NAME_HASH_LEN};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use kube::api::{Api, DeleteParams, ListParams, PostParams};
use kube::{Client, ResourceExt};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Key of the JSON record inside the ConfigMap data
pub const DATA_KEY: &str = "topic.json";

/// Annotation carrying the Kafka topic name
pub const TOPIC_NAME_ANNOTATION: &str = "kafka.operator.io/topic-name";

/// Label marking ConfigMaps owned by the store
pub const STORE_LABEL: &str = "kafka.operator.io/topic-store";

/// [`TopicStore`] keeping one ConfigMap per topic in a namespace
#[derive(Clone)]
pub struct ConfigMapTopicStore {
    api: Api<ConfigMap>,
    prefix: String,
}

impl ConfigMapTopicStore {
    pub fn new(client: Client, namespace: &str, prefix: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            prefix: prefix.into(),
        }
    }

    fn configmap_name(&self, name: &TopicName) -> String {
        configmap_name(&self.prefix, name)
    }

    fn selector(&self) -> String {
        format!("{}={}", STORE_LABEL, self.prefix)
    }
}

/// Name of the ConfigMap holding the record for `name`
pub fn configmap_name(prefix: &str, name: &TopicName) -> String {
    let full = format!("{}-{}", prefix, name.as_resource_name());
    if full.len() <= MAX_RESOURCE_NAME_LEN {
        return full;
    }

    let budget = MAX_RESOURCE_NAME_LEN - NAME_HASH_LEN - 1;
    let head: String = full.chars().take(budget).collect();
    let head = head.trim_end_matches(|c: char| !c.is_ascii_alphanumeric());
    format!("{}-{}", head, name_hash(name.as_str()))
}

/// Build the ConfigMap holding `topic`
pub fn build_configmap(prefix: &str, topic: &Topic) -> StoreResult<ConfigMap> {
    let data = encode(topic)?;
    let json = String::from_utf8(data).map_err(|e| StoreError::Corrupt {
        name: topic.name().to_string(),
        message: e.to_string(),
    })?;

    Ok(ConfigMap {
        metadata: ObjectMeta {
            name: Some(configmap_name(prefix, topic.name())),
            labels: Some(BTreeMap::from([
                (STORE_LABEL.to_string(), prefix.to_string()),
                (
                    "app.kubernetes.io/managed-by".to_string(),
                    "kafka-topic-operator".to_string(),
                ),
            ])),
            annotations: Some(BTreeMap::from([(
                TOPIC_NAME_ANNOTATION.to_string(),
                topic.name().to_string(),
            )])),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(DATA_KEY.to_string(), json)])),
        ..Default::default()
    })
}

fn read_record(name: &TopicName, cm: &ConfigMap) -> StoreResult<Topic> {
    let json = cm
        .data
        .as_ref()
        .and_then(|d| d.get(DATA_KEY))
        .ok_or_else(|| StoreError::Corrupt {
            name: name.to_string(),
            message: format!("ConfigMap {} has no '{}' key", cm.name_any(), DATA_KEY),
        })?;
    decode(name, json.as_bytes())
}

fn backend(e: kube::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

#[async_trait]
impl TopicStore for ConfigMapTopicStore {
    async fn read(&self, name: &TopicName) -> StoreResult<Option<Topic>> {
        match self
            .api
            .get_opt(&self.configmap_name(name))
            .await
            .map_err(backend)?
        {
            Some(cm) => read_record(name, &cm).map(Some),
            None => Ok(None),
        }
    }

    async fn create(&self, topic: &Topic) -> StoreResult<()> {
        let cm = build_configmap(&self.prefix, topic)?;
        match self.api.create(&PostParams::default(), &cm).await {
            Ok(_) => {
                debug!(topic = %topic.name(), configmap = %cm.name_any(), "Stored topic");
                Ok(())
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => {
                Err(StoreError::AlreadyExists(topic.name().to_string()))
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn update(&self, topic: &Topic) -> StoreResult<()> {
        let name = self.configmap_name(topic.name());
        let Some(existing) = self.api.get_opt(&name).await.map_err(backend)? else {
            return Err(StoreError::NotFound(topic.name().to_string()));
        };

        let mut cm = build_configmap(&self.prefix, topic)?;
        // replace only the version we just read
        cm.metadata.resource_version = existing.metadata.resource_version.clone();

        match self.api.replace(&name, &PostParams::default(), &cm).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                Err(StoreError::NotFound(topic.name().to_string()))
            }
            Err(kube::Error::Api(ae)) if ae.code == 409 => Err(StoreError::Backend(format!(
                "ConfigMap {} was modified concurrently",
                name
            ))),
            Err(e) => Err(backend(e)),
        }
    }

    async fn delete(&self, name: &TopicName) -> StoreResult<()> {
        match self
            .api
            .delete(&self.configmap_name(name), &DeleteParams::default())
            .await
        {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(ae)) if ae.code == 404 => {
                Err(StoreError::NotFound(name.to_string()))
            }
            Err(e) => Err(backend(e)),
        }
    }

    async fn list(&self) -> StoreResult<Vec<TopicName>> {
        let lp = ListParams::default().labels(&self.selector());
        let configmaps = self.api.list(&lp).await.map_err(backend)?;

        Ok(configmaps
            .items
            .iter()
            .filter_map(|cm| {
                let annotation = cm.annotations().get(TOPIC_NAME_ANNOTATION)?;
                match TopicName::new(annotation.clone()) {
                    Ok(name) => Some(name),
                    Err(e) => {
                        warn!(configmap = %cm.name_any(), error = %e, "Ignoring malformed store record");
                        None
                    }
                }
            })
            .collect())
    }
}
