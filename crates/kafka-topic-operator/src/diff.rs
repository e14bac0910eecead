//! Field-level differences between topic snapshots
//!
//! A [`TopicDiff`] records, for each field that differs, the value in the
//! base snapshot and the value it changes to. Two diffs taken against the same
//! base can be checked for conflicts and merged; this is the core of the
//! three-way reconciliation.

use crate::topic::Topic;
use std::collections::BTreeMap;
use std::fmt;

/// A scalar field changing from `from` to `to`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Change<T> {
    pub from: T,
    pub to: T,
}

/// Change of a single map entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryChange {
    /// Entry added or its value changed
    Set(String),
    /// Entry removed
    Removed,
}

impl fmt::Display for EntryChange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EntryChange::Set(value) => write!(f, "'{}'", value),
            EntryChange::Removed => f.write_str("<removed>"),
        }
    }
}

/// Set of field-level changes between two snapshots
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TopicDiff {
    partitions: Option<Change<i32>>,
    replication_factor: Option<Change<i16>>,
    config: BTreeMap<String, EntryChange>,
    labels: BTreeMap<String, EntryChange>,
}

impl TopicDiff {
    /// Compute the changes that turn `base` into `other`.
    ///
    /// Label changes are only recorded when `other` knows its labels.
    pub fn diff(base: &Topic, other: &Topic) -> Self {
        let partitions = (base.partitions() != other.partitions()).then(|| Change {
            from: base.partitions(),
            to: other.partitions(),
        });
        let replication_factor =
            (base.replication_factor() != other.replication_factor()).then(|| Change {
                from: base.replication_factor(),
                to: other.replication_factor(),
            });

        let config = diff_maps(base.config(), other.config());

        let empty = BTreeMap::new();
        let labels = match other.labels() {
            Some(other_labels) => diff_maps(base.labels().unwrap_or(&empty), other_labels),
            None => BTreeMap::new(),
        };

        Self {
            partitions,
            replication_factor,
            config,
            labels,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.partitions.is_none()
            && self.replication_factor.is_none()
            && self.config.is_empty()
            && self.labels.is_empty()
    }

    /// Describe every field both diffs change to different values, or `None`
    /// when the diffs can be merged
    pub fn conflict(&self, other: &TopicDiff) -> Option<String> {
        let mut conflicts = Vec::new();

        if let (Some(a), Some(b)) = (self.partitions, other.partitions) {
            if a.to != b.to {
                conflicts.push(format!("partitions ({} vs {})", a.to, b.to));
            }
        }
        if let (Some(a), Some(b)) = (self.replication_factor, other.replication_factor) {
            if a.to != b.to {
                conflicts.push(format!("replicationFactor ({} vs {})", a.to, b.to));
            }
        }
        for (key, change) in &self.config {
            if let Some(theirs) = other.config.get(key) {
                if theirs != change {
                    conflicts.push(format!("config.{} ({} vs {})", key, change, theirs));
                }
            }
        }
        for (key, change) in &self.labels {
            if let Some(theirs) = other.labels.get(key) {
                if theirs != change {
                    conflicts.push(format!("labels.{} ({} vs {})", key, change, theirs));
                }
            }
        }

        if conflicts.is_empty() {
            None
        } else {
            Some(conflicts.join(", "))
        }
    }

    /// Union of two non-conflicting diffs.
    ///
    /// Must only be called when [`TopicDiff::conflict`] returned `None`; on a
    /// conflicting field the change in `self` is kept.
    pub fn merge(&self, other: &TopicDiff) -> TopicDiff {
        let mut config = other.config.clone();
        config.extend(self.config.clone());
        let mut labels = other.labels.clone();
        labels.extend(self.labels.clone());

        TopicDiff {
            partitions: self.partitions.or(other.partitions),
            replication_factor: self.replication_factor.or(other.replication_factor),
            config,
            labels,
        }
    }

    /// Snapshot obtained by applying every change to `topic`
    pub fn apply(&self, topic: &Topic) -> Topic {
        let mut result = topic.clone();
        if let Some(change) = self.partitions {
            result.set_partitions(change.to);
        }
        if let Some(change) = self.replication_factor {
            result.set_replication_factor(change.to);
        }
        apply_entries(result.config_mut(), &self.config);
        if !self.labels.is_empty() {
            apply_entries(result.labels_mut(), &self.labels);
        }
        result
    }

    /// Net partition count change, zero when partitions are unchanged
    pub fn partition_delta(&self) -> i32 {
        self.partitions
            .map(|change| change.to.saturating_sub(change.from))
            .unwrap_or(0)
    }

    pub fn changes_replication_factor(&self) -> bool {
        self.replication_factor.is_some()
    }

    pub fn changes_config(&self) -> bool {
        !self.config.is_empty()
    }

    pub fn partitions(&self) -> Option<Change<i32>> {
        self.partitions
    }
}

impl fmt::Display for TopicDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts = Vec::new();
        if let Some(c) = self.partitions {
            parts.push(format!("partitions: {} -> {}", c.from, c.to));
        }
        if let Some(c) = self.replication_factor {
            parts.push(format!("replicationFactor: {} -> {}", c.from, c.to));
        }
        for (key, change) in &self.config {
            parts.push(format!("config.{}: {}", key, change));
        }
        for (key, change) in &self.labels {
            parts.push(format!("labels.{}: {}", key, change));
        }
        if parts.is_empty() {
            f.write_str("<no changes>")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

fn diff_maps(
    base: &BTreeMap<String, String>,
    other: &BTreeMap<String, String>,
) -> BTreeMap<String, EntryChange> {
    let mut changes = BTreeMap::new();
    for (key, value) in other {
        if base.get(key) != Some(value) {
            changes.insert(key.clone(), EntryChange::Set(value.clone()));
        }
    }
    for key in base.keys() {
        if !other.contains_key(key) {
            changes.insert(key.clone(), EntryChange::Removed);
        }
    }
    changes
}

fn apply_entries(target: &mut BTreeMap<String, String>, changes: &BTreeMap<String, EntryChange>) {
    for (key, change) in changes {
        match change {
            EntryChange::Set(value) => {
                target.insert(key.clone(), value.clone());
            }
            EntryChange::Removed => {
                target.remove(key);
            }
        }
    }
}
