//! Bounded queue of storage operations suppressed for lack of consent.
//!
//! FIFO; when full the oldest entry is evicted to admit the newest.

use chrono::{DateTime, Utc};
use consentry_core::ConsentCategory;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Which storage area an operation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    Local,
    Session,
}

/// What the suppressed call was
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Set,
    Remove,
    Clear,
}

/// A suppressed storage call awaiting consent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedOperation {
    pub kind: OperationKind,
    pub store: StoreKind,
    /// Absent for `Clear`
    pub key: Option<String>,
    /// Present only for `Set`
    pub value: Option<String>,
    pub category: ConsentCategory,
    pub queued_at: DateTime<Utc>,
}

impl QueuedOperation {
    pub fn set(store: StoreKind, key: &str, value: &str, category: ConsentCategory) -> Self {
        Self {
            kind: OperationKind::Set,
            store,
            key: Some(key.to_string()),
            value: Some(value.to_string()),
            category,
            queued_at: Utc::now(),
        }
    }

    pub fn remove(store: StoreKind, key: &str, category: ConsentCategory) -> Self {
        Self {
            kind: OperationKind::Remove,
            store,
            key: Some(key.to_string()),
            value: None,
            category,
            queued_at: Utc::now(),
        }
    }

    pub fn clear(store: StoreKind) -> Self {
        Self {
            kind: OperationKind::Clear,
            store,
            key: None,
            value: None,
            category: ConsentCategory::STRICTEST,
            queued_at: Utc::now(),
        }
    }
}

/// Bounded FIFO with drop-oldest overflow
#[derive(Debug, Clone)]
pub struct OperationQueue {
    entries: VecDeque<QueuedOperation>,
    capacity: usize,
}

impl OperationQueue {
    /// `capacity` is clamped to at least one entry
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append, returning the entry evicted to make room (if any)
    pub fn push(&mut self, op: QueuedOperation) -> Option<QueuedOperation> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        self.entries.push_back(op);
        evicted
    }

    /// Remove and return, in enqueue order, every entry whose category
    /// satisfies `allowed`. The rest keep their relative order.
    pub fn take_satisfied(&mut self, allowed: impl Fn(ConsentCategory) -> bool) -> Vec<QueuedOperation> {
        let mut ready = Vec::new();
        let mut pending = VecDeque::with_capacity(self.entries.len());
        for op in self.entries.drain(..) {
            if allowed(op.category) {
                ready.push(op);
            } else {
                pending.push_back(op);
            }
        }
        self.entries = pending;
        ready
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedOperation> {
        self.entries.iter()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
