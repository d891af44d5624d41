pub mod bulk;
pub mod channel;
pub mod config;
pub mod events;
pub mod lifecycle;
pub mod metrics;
pub mod planner;
pub mod process;
pub mod resources;
pub mod subscription;
pub mod supervisor;
pub mod testing;

pub use bulk::{
    Availability, BulkError, BulkOperationRequest, BulkOperationResult, BulkOperationScheduler,
    BulkOperationType, BulkStatus, ChannelOperationHandler, ChannelOperationResult,
    SchedulerConfig,
};
pub use channel::{
    Channel, ChannelConfig, ChannelRepository, ChannelStatus, ChannelStoreError, ChannelUpdate,
    NewChannel, OutputTarget, SqliteChannelRepository,
};
pub use config::{
    load_config, load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig,
};
pub use events::{EventBus, EventEnvelope, EventSubscription, StreamEvent};
pub use lifecycle::{ChannelLifecycleManager, ChannelStatusReport, LifecycleError};
pub use planner::{DefaultStreamPlanner, OutputDescriptor, PlanError, StreamPlan, StreamPlanner};
pub use process::{
    HealthMetrics, NewStreamProcess, ProcessStatus, ProcessStoreError, RecoveryPolicy,
    SqliteStreamProcessRepository, StreamProcess, StreamProcessRepository,
};
pub use resources::{ResourceConfig, ResourceConstraints, ResourceMonitor, SysinfoSampler, SystemSampler};
pub use subscription::{
    CapabilityDecision, PlanOperation, StaticPlanGate, SubscriptionError, SubscriptionGate,
};
pub use supervisor::{
    ConnectivityProbe, FfmpegCommandFactory, ProbeResult, ProcessSupervisor, StreamHealth,
    SupervisorConfig, SupervisorError,
};
