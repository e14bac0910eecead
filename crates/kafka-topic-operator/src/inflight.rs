//! Admission control for reconciliation sequences
//!
//! Watchers fire once per observed mutation, so a burst of edits to one topic
//! produces a burst of triggers. The ledger admits one sequence per identity;
//! triggers arriving while it is outstanding are dropped. The ledger is owned
//! by the controller loop and is never shared.

use crate::topic::TopicName;
use std::collections::HashMap;
use std::time::Instant;

/// An outstanding reconciliation sequence
#[derive(Debug, Clone)]
pub struct InFlightEntry {
    /// Trigger that started the sequence
    pub cause: &'static str,
    pub started: Instant,
}

/// Per-identity ledger of outstanding sequences
#[derive(Debug, Default)]
pub struct InFlight {
    entries: HashMap<TopicName, InFlightEntry>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new sequence for `name`.
    ///
    /// Returns `false`, leaving the ledger unchanged, when a sequence is
    /// already outstanding for that identity.
    pub fn try_admit(&mut self, name: &TopicName, cause: &'static str) -> bool {
        if self.entries.contains_key(name) {
            return false;
        }
        self.entries.insert(
            name.clone(),
            InFlightEntry {
                cause,
                started: Instant::now(),
            },
        );
        true
    }

    /// Clear the entry for `name`, returning the finished sequence
    pub fn complete(&mut self, name: &TopicName) -> Option<InFlightEntry> {
        self.entries.remove(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
