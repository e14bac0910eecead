//! Label predicate scoping which `KafkaTopic` resources an operator instance
//! manages

use crate::error::{OperatorError, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Equality-based label selector (`key=value,key2=value2`)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LabelPredicate {
    labels: BTreeMap<String, String>,
}

impl LabelPredicate {
    pub fn new(labels: BTreeMap<String, String>) -> Self {
        Self { labels }
    }

    /// Whether every required label is present with the required value
    pub fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value))
    }

    /// Labels stamped onto resources this instance creates
    pub fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    /// Selector string for list and watch calls
    pub fn selector(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for LabelPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .labels
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        f.write_str(&parts.join(","))
    }
}

impl FromStr for LabelPredicate {
    type Err = OperatorError;

    fn from_str(s: &str) -> Result<Self> {
        let mut labels = BTreeMap::new();
        for pair in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                OperatorError::InvalidConfig(format!(
                    "label selector entry '{}' must have the form key=value",
                    pair
                ))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(OperatorError::InvalidConfig(format!(
                    "label selector entry '{}' has an empty key",
                    pair
                )));
            }
            labels.insert(key.to_string(), value.trim().to_string());
        }
        Ok(Self { labels })
    }
}
