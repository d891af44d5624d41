//! Mock subscription gate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::subscription::{CapabilityDecision, PlanOperation, SubscriptionError, SubscriptionGate};

/// Gate with per-client limits and priorities set by the test.
///
/// Unconfigured clients get generous limits and priority 1. Every check is
/// recorded for assertions.
pub struct MockSubscriptionGate {
    max_channels: Arc<RwLock<HashMap<String, u32>>>,
    max_concurrent: Arc<RwLock<HashMap<String, u32>>>,
    priorities: Arc<RwLock<HashMap<String, u8>>>,
    checks: Arc<RwLock<Vec<(String, PlanOperation)>>>,
    next_error: Arc<RwLock<Option<SubscriptionError>>>,
}

const DEFAULT_LIMIT: u32 = 1000;

impl Default for MockSubscriptionGate {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSubscriptionGate {
    pub fn new() -> Self {
        Self {
            max_channels: Arc::new(RwLock::new(HashMap::new())),
            max_concurrent: Arc::new(RwLock::new(HashMap::new())),
            priorities: Arc::new(RwLock::new(HashMap::new())),
            checks: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
        }
    }

    pub async fn set_max_channels(&self, client_id: &str, limit: u32) {
        self.max_channels
            .write()
            .await
            .insert(client_id.to_string(), limit);
    }

    pub async fn set_max_concurrent(&self, client_id: &str, limit: u32) {
        self.max_concurrent
            .write()
            .await
            .insert(client_id.to_string(), limit);
    }

    pub async fn set_priority(&self, client_id: &str, priority: u8) {
        self.priorities
            .write()
            .await
            .insert(client_id.to_string(), priority);
    }

    /// Configure the next call to fail with the given error.
    pub async fn set_next_error(&self, error: SubscriptionError) {
        *self.next_error.write().await = Some(error);
    }

    pub async fn recorded_checks(&self) -> Vec<(String, PlanOperation)> {
        self.checks.read().await.clone()
    }
}

#[async_trait]
impl SubscriptionGate for MockSubscriptionGate {
    async fn check(
        &self,
        client_id: &str,
        operation: PlanOperation,
    ) -> Result<CapabilityDecision, SubscriptionError> {
        if let Some(e) = self.next_error.write().await.take() {
            return Err(e);
        }
        self.checks
            .write()
            .await
            .push((client_id.to_string(), operation));

        let (used, limit) = match operation {
            PlanOperation::CreateChannel { existing } => (
                existing,
                self.max_channels.read().await.get(client_id).copied(),
            ),
            PlanOperation::StartChannel { active } => (
                active,
                self.max_concurrent.read().await.get(client_id).copied(),
            ),
        };
        let limit = limit.unwrap_or(DEFAULT_LIMIT);
        if used < limit {
            Ok(CapabilityDecision::allow(limit))
        } else {
            Ok(CapabilityDecision::deny(
                limit,
                format!("{} limit of {} reached", operation.name(), limit),
            ))
        }
    }

    async fn priority(&self, client_id: &str) -> Result<u8, SubscriptionError> {
        Ok(self
            .priorities
            .read()
            .await
            .get(client_id)
            .copied()
            .unwrap_or(1))
    }
}
