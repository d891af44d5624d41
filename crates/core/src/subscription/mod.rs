//! Subscription plan capability checks.
//!
//! The gate is consulted before a channel is created or started and to
//! resolve a client's bulk scheduling priority. Callers pass their current
//! usage so implementations stay stateless.

mod config;
mod static_gate;

pub use config::{PlanLimits, SubscriptionConfig};
pub use static_gate::StaticPlanGate;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;

/// Operation being checked against a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanOperation {
    /// Create a channel; `existing` is the client's current channel count.
    CreateChannel { existing: u32 },
    /// Start a channel; `active` is the client's STARTING/LIVE channel count.
    StartChannel { active: u32 },
}

impl PlanOperation {
    pub fn name(&self) -> &'static str {
        match self {
            PlanOperation::CreateChannel { .. } => "create_channel",
            PlanOperation::StartChannel { .. } => "start_channel",
        }
    }
}

/// Result of a capability check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CapabilityDecision {
    pub allowed: bool,
    /// The numeric bound that applied.
    pub limit: u32,
    pub reason: Option<String>,
}

impl CapabilityDecision {
    pub fn allow(limit: u32) -> Self {
        Self {
            allowed: true,
            limit,
            reason: None,
        }
    }

    pub fn deny(limit: u32, reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            limit,
            reason: Some(reason.into()),
        }
    }
}

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("Unknown subscription plan: {0}")]
    UnknownPlan(String),

    #[error("Subscription service unavailable: {0}")]
    Unavailable(String),
}

/// Plan enforcement collaborator.
#[async_trait]
pub trait SubscriptionGate: Send + Sync {
    async fn check(
        &self,
        client_id: &str,
        operation: PlanOperation,
    ) -> Result<CapabilityDecision, SubscriptionError>;

    /// Bulk scheduling priority of the client's plan.
    async fn priority(&self, client_id: &str) -> Result<u8, SubscriptionError>;
}
