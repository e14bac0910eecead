//! Operator configuration

use crate::error::{OperatorError, Result};
use crate::labels::LabelPredicate;
use crate::retry::RetryConfig;
use std::time::Duration;

/// Backend of the converged-snapshot store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum StoreKind {
    /// One ConfigMap per topic in the watched namespace
    #[default]
    Configmap,
    /// In-process node tree; records are lost on restart
    Memory,
}

/// Runtime configuration of the topic operator
#[derive(Debug, Clone)]
pub struct OperatorConfig {
    pub bootstrap_servers: String,
    pub namespace: String,
    pub resource_labels: LabelPredicate,
    pub full_reconciliation_interval: Duration,
    pub kafka_poll_interval: Duration,
    pub operation_timeout: Duration,
    pub retry: RetryConfig,
    pub store: StoreKind,
    pub store_prefix: String,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: "localhost:9092".to_string(),
            namespace: "default".to_string(),
            resource_labels: LabelPredicate::new(
                [(
                    "app.kubernetes.io/managed-by".to_string(),
                    "kafka-topic-operator".to_string(),
                )]
                .into(),
            ),
            full_reconciliation_interval: Duration::from_secs(900),
            kafka_poll_interval: Duration::from_secs(10),
            operation_timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            store: StoreKind::default(),
            store_prefix: "kafka-topic-store".to_string(),
        }
    }
}

impl OperatorConfig {
    /// Reject settings the operator cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.bootstrap_servers.trim().is_empty() {
            return Err(OperatorError::InvalidConfig(
                "bootstrap servers must not be empty".to_string(),
            ));
        }
        if self.namespace.is_empty() {
            return Err(OperatorError::InvalidConfig(
                "namespace must not be empty".to_string(),
            ));
        }
        if self.resource_labels.labels().is_empty() {
            return Err(OperatorError::InvalidConfig(
                "resource labels must select at least one label".to_string(),
            ));
        }
        for (name, value) in [
            ("full reconciliation interval", self.full_reconciliation_interval),
            ("kafka poll interval", self.kafka_poll_interval),
            ("operation timeout", self.operation_timeout),
        ] {
            if value.is_zero() {
                return Err(OperatorError::InvalidConfig(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(OperatorError::InvalidConfig(
                "topic metadata attempts must be at least 1".to_string(),
            ));
        }
        if self.store_prefix.is_empty()
            || !self
                .store_prefix
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(OperatorError::InvalidConfig(format!(
                "store prefix '{}' must be a non-empty DNS label",
                self.store_prefix
            )));
        }
        Ok(())
    }
}
