use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sha2::{Digest, Sha256};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use streamvisor_core::{
    load_config, supervisor::CommandFactory, validate_config, BulkOperationScheduler,
    ChannelLifecycleManager, ChannelOperationHandler, ChannelRepository, ConnectivityProbe,
    DefaultStreamPlanner, EventBus, FfmpegCommandFactory, ProcessSupervisor, ResourceMonitor,
    SqliteChannelRepository, SqliteStreamProcessRepository, StaticPlanGate, StreamProcessRepository,
    SubscriptionGate, SysinfoSampler, SystemSampler,
};
use streamvisor_server::{api::create_router, state::AppState};

/// Application version
const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("Fatal error: {:#}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Determine config path
    let config_path = std::env::var("STREAMVISOR_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("config.toml"));

    // Load configuration
    info!("Loading configuration from {:?}", config_path);
    let config = load_config(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Validate configuration
    validate_config(&config).context("Configuration validation failed")?;

    // Fingerprint so restarts with a changed config are visible in the logs
    let config_json = serde_json::to_string(&config).unwrap_or_default();
    let config_hash = format!("{:x}", Sha256::digest(config_json.as_bytes()));

    info!(
        version = VERSION,
        config_hash = &config_hash[..16],
        "Configuration loaded successfully"
    );
    info!("Database path: {:?}", config.database.path);
    info!("HLS root: {:?}", config.supervisor.hls_root);

    // Stores
    let channels: Arc<dyn ChannelRepository> = Arc::new(
        SqliteChannelRepository::new(&config.database.path)
            .context("Failed to create channel store")?,
    );
    let processes: Arc<dyn StreamProcessRepository> = Arc::new(
        SqliteStreamProcessRepository::new(&config.database.path)
            .context("Failed to create stream process store")?,
    );
    info!("Stores initialized");

    // Collaborators
    let events = EventBus::new();
    let sampler: Arc<dyn SystemSampler> = Arc::new(SysinfoSampler::new());
    let commands: Arc<dyn CommandFactory> = Arc::new(FfmpegCommandFactory::new(
        config.supervisor.ffmpeg_path.clone(),
        config.supervisor.ffmpeg_log_level.clone(),
    ));
    let gate: Arc<dyn SubscriptionGate> =
        Arc::new(StaticPlanGate::new(config.subscriptions.clone()));

    let supervisor = ProcessSupervisor::new(
        config.supervisor.clone(),
        Arc::clone(&processes),
        events.clone(),
        Arc::clone(&commands),
        Arc::clone(&sampler),
    );
    info!(
        ffmpeg = ?config.supervisor.ffmpeg_path,
        max_restarts = config.supervisor.max_restarts,
        "Process supervisor initialized"
    );

    let lifecycle = Arc::new(ChannelLifecycleManager::new(
        channels,
        processes,
        supervisor.clone(),
        Arc::new(DefaultStreamPlanner::from_config(&config.supervisor)),
        Arc::clone(&gate),
        events,
        ConnectivityProbe::new(
            commands,
            Duration::from_secs(config.supervisor.probe_timeout_secs),
        ),
    ));

    let monitor = Arc::new(ResourceMonitor::new(config.resources.clone(), sampler));
    let scheduler = Arc::new(BulkOperationScheduler::new(
        config.scheduler.clone(),
        Arc::clone(&monitor),
        gate,
        Arc::new(supervisor.clone()),
    ));
    info!(
        constraints = ?scheduler.get_resource_constraints(),
        "Bulk scheduler initialized"
    );

    // Background tasks
    let shutdown = CancellationToken::new();
    let monitor_handle = monitor.spawn(shutdown.clone());
    let reactor_handle = Arc::clone(&lifecycle).spawn_event_reactor(shutdown.clone());
    let handler: Arc<dyn ChannelOperationHandler> = lifecycle.clone();
    let dispatcher_handle = Arc::clone(&scheduler).spawn(handler, shutdown.clone());

    // Create app state and router
    let state = Arc::new(AppState::new(config.clone(), lifecycle, scheduler));
    let app = create_router(state);

    // Start server
    let addr = SocketAddr::new(config.server.host, config.server.port);
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutting down...");
    shutdown.cancel();
    let _ = tokio::join!(monitor_handle, reactor_handle, dispatcher_handle);

    // Stop every transcoder before exiting
    supervisor.shutdown_all().await;
    info!("All streams stopped");

    Ok(())
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
