use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Limits granted by a subscription plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanLimits {
    /// Channels a client may own.
    pub max_channels: u32,
    /// Channels that may be STARTING or LIVE at the same time.
    pub max_concurrent_channels: u32,
    /// Bulk scheduling priority, 1..=10.
    #[serde(default = "default_priority")]
    pub priority: u8,
}

fn default_priority() -> u8 {
    1
}

/// `[subscriptions]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Plan applied to clients without an explicit assignment.
    #[serde(default = "default_plan_name")]
    pub default_plan: String,
    #[serde(default = "default_plans")]
    pub plans: HashMap<String, PlanLimits>,
    /// client_id -> plan name.
    #[serde(default)]
    pub clients: HashMap<String, String>,
}

fn default_plan_name() -> String {
    "basic".to_string()
}

fn default_plans() -> HashMap<String, PlanLimits> {
    let mut plans = HashMap::new();
    plans.insert(
        default_plan_name(),
        PlanLimits {
            max_channels: 10,
            max_concurrent_channels: 5,
            priority: 1,
        },
    );
    plans
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self {
            default_plan: default_plan_name(),
            plans: default_plans(),
            clients: HashMap::new(),
        }
    }
}
