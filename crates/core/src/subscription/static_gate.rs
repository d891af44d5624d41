use async_trait::async_trait;

use super::{
    CapabilityDecision, PlanLimits, PlanOperation, SubscriptionConfig, SubscriptionError,
    SubscriptionGate,
};

/// Gate backed by the `[subscriptions]` configuration section.
pub struct StaticPlanGate {
    config: SubscriptionConfig,
}

impl StaticPlanGate {
    pub fn new(config: SubscriptionConfig) -> Self {
        Self { config }
    }

    fn limits_for(&self, client_id: &str) -> Result<&PlanLimits, SubscriptionError> {
        let plan = self
            .config
            .clients
            .get(client_id)
            .unwrap_or(&self.config.default_plan);
        self.config
            .plans
            .get(plan)
            .ok_or_else(|| SubscriptionError::UnknownPlan(plan.clone()))
    }
}

#[async_trait]
impl SubscriptionGate for StaticPlanGate {
    async fn check(
        &self,
        client_id: &str,
        operation: PlanOperation,
    ) -> Result<CapabilityDecision, SubscriptionError> {
        let limits = self.limits_for(client_id)?;

        let decision = match operation {
            PlanOperation::CreateChannel { existing } => {
                let limit = limits.max_channels;
                if existing < limit {
                    CapabilityDecision::allow(limit)
                } else {
                    CapabilityDecision::deny(limit, format!("channel limit of {} reached", limit))
                }
            }
            PlanOperation::StartChannel { active } => {
                let limit = limits.max_concurrent_channels;
                if active < limit {
                    CapabilityDecision::allow(limit)
                } else {
                    CapabilityDecision::deny(
                        limit,
                        format!("concurrent channel limit of {} reached", limit),
                    )
                }
            }
        };

        tracing::debug!(
            client_id = %client_id,
            operation = operation.name(),
            allowed = decision.allowed,
            limit = decision.limit,
            "Plan capability checked"
        );
        Ok(decision)
    }

    async fn priority(&self, client_id: &str) -> Result<u8, SubscriptionError> {
        Ok(self.limits_for(client_id)?.priority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate() -> StaticPlanGate {
        let mut config = SubscriptionConfig::default();
        config.plans.insert(
            "pro".to_string(),
            PlanLimits {
                max_channels: 50,
                max_concurrent_channels: 2,
                priority: 8,
            },
        );
        config
            .clients
            .insert("acme".to_string(), "pro".to_string());
        StaticPlanGate::new(config)
    }

    #[tokio::test]
    async fn test_default_plan_applies_to_unknown_clients() {
        let gate = gate();
        assert_eq!(gate.priority("someone").await.unwrap(), 1);
        let decision = gate
            .check("someone", PlanOperation::CreateChannel { existing: 9 })
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.limit, 10);
    }

    #[tokio::test]
    async fn test_channel_count_limit() {
        let decision = gate()
            .check("someone", PlanOperation::CreateChannel { existing: 10 })
            .await
            .unwrap();
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("10"));
    }

    #[tokio::test]
    async fn test_concurrent_limit_uses_assigned_plan() {
        let gate = gate();
        assert_eq!(gate.priority("acme").await.unwrap(), 8);

        let ok = gate
            .check("acme", PlanOperation::StartChannel { active: 1 })
            .await
            .unwrap();
        assert!(ok.allowed);

        let denied = gate
            .check("acme", PlanOperation::StartChannel { active: 2 })
            .await
            .unwrap();
        assert!(!denied.allowed);
        assert_eq!(denied.limit, 2);
    }

    #[tokio::test]
    async fn test_unknown_plan_is_an_error() {
        let mut config = SubscriptionConfig::default();
        config
            .clients
            .insert("ghost".to_string(), "missing".to_string());
        let gate = StaticPlanGate::new(config);

        assert!(matches!(
            gate.priority("ghost").await,
            Err(SubscriptionError::UnknownPlan(_))
        ));
    }
}
