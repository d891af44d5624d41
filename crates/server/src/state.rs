use std::sync::Arc;
use streamvisor_core::{BulkOperationScheduler, ChannelLifecycleManager, Config, SanitizedConfig};

/// Shared application state
pub struct AppState {
    config: Config,
    lifecycle: Arc<ChannelLifecycleManager>,
    scheduler: Arc<BulkOperationScheduler>,
}

impl AppState {
    pub fn new(
        config: Config,
        lifecycle: Arc<ChannelLifecycleManager>,
        scheduler: Arc<BulkOperationScheduler>,
    ) -> Self {
        Self {
            config,
            lifecycle,
            scheduler,
        }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn lifecycle(&self) -> &ChannelLifecycleManager {
        self.lifecycle.as_ref()
    }

    pub fn scheduler(&self) -> &BulkOperationScheduler {
        self.scheduler.as_ref()
    }
}
