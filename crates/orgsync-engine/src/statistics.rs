//! Run reports for reconciliation calls.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

use orgsync_core::{EntityKind, EventType};

use crate::listener::Hook;

/// A hook call that failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerFailure {
    pub listener: String,
    pub hook: Hook,
    pub kind: EntityKind,
    pub entity_id: String,
    pub message: String,
}

/// A batch item whose reconciliation failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    pub kind: EntityKind,
    pub entity_id: String,
    pub event: EventType,
    pub message: String,
}

/// Outcome of one reconciliation call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    /// Hook sequences dispatched, keyed by `kind.EVENT`.
    #[serde(default)]
    pub dispatched: BTreeMap<String, u32>,
    /// Deletions skipped because the entity still exists or its absence
    /// could not be confirmed.
    #[serde(default)]
    pub guard_skips: u32,
    /// Entities requested for save that the backend does not know.
    #[serde(default)]
    pub not_found: u32,
    #[serde(default)]
    pub listener_failures: Vec<ListenerFailure>,
    #[serde(default)]
    pub item_failures: Vec<ItemFailure>,
}

impl Default for SyncReport {
    fn default() -> Self {
        Self::new()
    }
}

fn dispatch_key(kind: EntityKind, event: EventType) -> String {
    format!("{kind}.{event}")
}

impl SyncReport {
    /// Start a new report.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            dispatched: BTreeMap::new(),
            guard_skips: 0,
            not_found: 0,
            listener_failures: Vec::new(),
            item_failures: Vec::new(),
        }
    }

    pub fn record_dispatch(&mut self, kind: EntityKind, event: EventType) {
        *self.dispatched.entry(dispatch_key(kind, event)).or_insert(0) += 1;
    }

    pub fn record_guard_skip(&mut self) {
        self.guard_skips += 1;
    }

    pub fn record_not_found(&mut self) {
        self.not_found += 1;
    }

    pub fn record_listener_failure(&mut self, failure: ListenerFailure) {
        self.listener_failures.push(failure);
    }

    pub fn record_item_failure(
        &mut self,
        kind: EntityKind,
        entity_id: impl Into<String>,
        event: EventType,
        message: impl Into<String>,
    ) {
        self.item_failures.push(ItemFailure {
            kind,
            entity_id: entity_id.into(),
            event,
            message: message.into(),
        });
    }

    /// Number of hook sequences dispatched for a kind and event.
    #[must_use]
    pub fn dispatched_count(&self, kind: EntityKind, event: EventType) -> u32 {
        self.dispatched
            .get(&dispatch_key(kind, event))
            .copied()
            .unwrap_or(0)
    }

    /// Number of hook sequences dispatched overall.
    #[must_use]
    pub fn total_dispatched(&self) -> u32 {
        self.dispatched.values().sum()
    }

    #[must_use]
    pub fn has_failures(&self) -> bool {
        !self.listener_failures.is_empty() || !self.item_failures.is_empty()
    }

    /// Stamp the end time.
    pub fn finish(&mut self) {
        self.finished_at = Some(Utc::now());
    }

    /// Wall-clock duration, if finished.
    #[must_use]
    pub fn duration_seconds(&self) -> Option<i64> {
        self.finished_at
            .map(|finished| (finished - self.started_at).num_seconds())
    }

    /// Fold another report into this one, keeping this run's identity.
    pub fn merge(&mut self, other: &SyncReport) {
        for (key, value) in &other.dispatched {
            *self.dispatched.entry(key.clone()).or_insert(0) += value;
        }
        self.guard_skips += other.guard_skips;
        self.not_found += other.not_found;
        self.listener_failures
            .extend(other.listener_failures.iter().cloned());
        self.item_failures.extend(other.item_failures.iter().cloned());
    }
}
