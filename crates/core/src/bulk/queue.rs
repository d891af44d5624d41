//! Priority queue of pending bulk operations.

use std::cmp::Reverse;
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Utc};

use super::BulkOperationType;

/// A queued bulk operation waiting for execution.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub operation_id: String,
    pub client_id: String,
    pub operation: BulkOperationType,
    pub channel_ids: Vec<String>,
    pub priority: u8,
    pub enqueued_at: DateTime<Utc>,
}

type QueueKey = (Reverse<u8>, u64);

/// Ordered by priority descending, then enqueue order.
#[derive(Debug, Default)]
pub struct OperationQueue {
    entries: BTreeMap<QueueKey, QueueEntry>,
    index: HashMap<String, QueueKey>,
    next_seq: u64,
}

impl OperationQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: QueueEntry) {
        let key = (Reverse(entry.priority), self.next_seq);
        self.next_seq += 1;
        self.index.insert(entry.operation_id.clone(), key);
        self.entries.insert(key, entry);
    }

    pub fn get(&self, operation_id: &str) -> Option<&QueueEntry> {
        self.index
            .get(operation_id)
            .and_then(|key| self.entries.get(key))
    }

    pub fn remove(&mut self, operation_id: &str) -> Option<QueueEntry> {
        let key = self.index.remove(operation_id)?;
        self.entries.remove(&key)
    }

    /// Entries in dispatch order.
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.values()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
