//! Advisory per-channel locks for bulk operations.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

type LockMap = HashMap<String, String>;

fn lock(map: &Mutex<LockMap>) -> MutexGuard<'_, LockMap> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Channel id to owning operation id.
///
/// Acquisition is all-or-nothing: either every requested channel is
/// locked for the caller or none is.
#[derive(Debug, Default, Clone)]
pub struct ChannelLocks {
    held: Arc<Mutex<LockMap>>,
}

impl ChannelLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lock every channel or report the ones already held elsewhere.
    pub fn try_acquire(
        &self,
        operation_id: &str,
        channel_ids: &[String],
    ) -> Result<ChannelLockGuard, Vec<String>> {
        let mut held = lock(&self.held);
        let conflicts: Vec<String> = channel_ids
            .iter()
            .filter(|id| held.contains_key(id.as_str()))
            .cloned()
            .collect();
        if !conflicts.is_empty() {
            return Err(conflicts);
        }

        for id in channel_ids {
            held.insert(id.clone(), operation_id.to_string());
        }
        Ok(ChannelLockGuard {
            held: self.held.clone(),
            operation_id: operation_id.to_string(),
            channel_ids: channel_ids.to_vec(),
        })
    }

    pub fn holder(&self, channel_id: &str) -> Option<String> {
        lock(&self.held).get(channel_id).cloned()
    }

    pub fn is_locked(&self, channel_id: &str) -> bool {
        lock(&self.held).contains_key(channel_id)
    }

    pub fn len(&self) -> usize {
        lock(&self.held).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.held).is_empty()
    }
}

/// Releases its channels when dropped.
#[derive(Debug)]
pub struct ChannelLockGuard {
    held: Arc<Mutex<LockMap>>,
    operation_id: String,
    channel_ids: Vec<String>,
}

impl Drop for ChannelLockGuard {
    fn drop(&mut self) {
        let mut held = lock(&self.held);
        for id in &self.channel_ids {
            if held.get(id) == Some(&self.operation_id) {
                held.remove(id);
            }
        }
    }
}
