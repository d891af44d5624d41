use super::{types::Config, ConfigError};
use crate::bulk::MAX_BATCH_CAP;

/// Hard ceiling on the adaptive concurrency ceiling.
const MAX_CONCURRENCY_CAP: usize = 10;

/// Validate configuration.
///
/// Checks cross-field constraints that serde cannot express.
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(invalid("server.port cannot be 0"));
    }

    let supervisor = &config.supervisor;
    if supervisor.heartbeat_interval_ms == 0 {
        return Err(invalid("supervisor.heartbeat_interval_ms must be positive"));
    }
    if supervisor.restart_base_delay_ms > supervisor.restart_max_delay_ms {
        return Err(invalid(
            "supervisor.restart_base_delay_ms cannot exceed supervisor.restart_max_delay_ms",
        ));
    }
    if supervisor.segment_duration_secs == 0 {
        return Err(invalid("supervisor.segment_duration_secs must be positive"));
    }

    let scheduler = &config.scheduler;
    if scheduler.max_batch_size == 0 || scheduler.max_batch_size > MAX_BATCH_CAP {
        return Err(invalid(format!(
            "scheduler.max_batch_size must be between 1 and {}",
            MAX_BATCH_CAP
        )));
    }

    let resources = &config.resources;
    if resources.initial_concurrency == 0
        || resources.initial_concurrency > resources.max_concurrency
        || resources.max_concurrency > MAX_CONCURRENCY_CAP
    {
        return Err(invalid(format!(
            "resources concurrency must satisfy 1 <= initial_concurrency <= max_concurrency <= {}",
            MAX_CONCURRENCY_CAP
        )));
    }
    for (name, value) in [
        ("cpu_load_threshold", resources.cpu_load_threshold),
        ("relax_cpu_load", resources.relax_cpu_load),
    ] {
        if value <= 0.0 || value > 1.0 {
            return Err(invalid(format!("resources.{} must be in (0, 1]", name)));
        }
    }
    for (name, value) in [
        ("memory_threshold_percent", resources.memory_threshold_percent),
        ("relax_memory_percent", resources.relax_memory_percent),
    ] {
        if value <= 0.0 || value > 100.0 {
            return Err(invalid(format!("resources.{} must be in (0, 100]", name)));
        }
    }
    if resources.relax_cpu_load >= resources.cpu_load_threshold
        || resources.relax_memory_percent >= resources.memory_threshold_percent
    {
        return Err(invalid(
            "resources relax thresholds must be below the throttle thresholds",
        ));
    }

    let subscriptions = &config.subscriptions;
    if !subscriptions.plans.contains_key(&subscriptions.default_plan) {
        return Err(invalid(format!(
            "subscriptions.default_plan '{}' is not a configured plan",
            subscriptions.default_plan
        )));
    }
    for (client, plan) in &subscriptions.clients {
        if !subscriptions.plans.contains_key(plan) {
            return Err(invalid(format!(
                "client '{}' is assigned to unknown plan '{}'",
                client, plan
            )));
        }
    }

    Ok(())
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError(message.into())
}
