//! Channel lifecycle integration tests.
//!
//! These drive the lifecycle manager against SQLite stores and real `sh`
//! processes standing in for the transcoder:
//! STOPPED -> STARTING -> LIVE -> STOPPED, crash recovery, and the restart
//! ceiling.

#![cfg(unix)]

use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use streamvisor_core::{
    testing::{
        fixtures, MockSubscriptionGate, ScriptCommandFactory, StaticSampler, CRASHING_SCRIPT,
        HEALTHY_SCRIPT,
    },
    ChannelLifecycleManager, ChannelRepository, ChannelStatus, ConnectivityProbe,
    DefaultStreamPlanner, EventBus, EventSubscription, LifecycleError, ProcessStatus,
    ProcessSupervisor, SqliteChannelRepository, SqliteStreamProcessRepository, StreamEvent,
    StreamProcessRepository, SupervisorConfig, SupervisorError,
};

/// Test helper wiring every component around temporary SQLite files.
struct TestHarness {
    manager: Arc<ChannelLifecycleManager>,
    channels: Arc<SqliteChannelRepository>,
    processes: Arc<SqliteStreamProcessRepository>,
    commands: Arc<ScriptCommandFactory>,
    events: EventBus,
    _temp_dir: TempDir,
}

impl TestHarness {
    fn new(script: &str) -> Self {
        Self::with_config(script, |_| {})
    }

    fn with_config(script: &str, tweak: impl FnOnce(&mut SupervisorConfig)) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let db_path = temp_dir.path().join("test.db");

        let mut config = SupervisorConfig {
            hls_root: temp_dir.path().join("hls"),
            heartbeat_interval_ms: 100,
            termination_grace_ms: 500,
            restart_base_delay_ms: 10,
            restart_max_delay_ms: 50,
            restart_cleanup_delay_ms: 10,
            max_restarts: 3,
            ..Default::default()
        };
        tweak(&mut config);

        let channels = Arc::new(
            SqliteChannelRepository::new(&db_path).expect("Failed to create channel store"),
        );
        let processes = Arc::new(
            SqliteStreamProcessRepository::new(&db_path).expect("Failed to create process store"),
        );
        let commands = Arc::new(ScriptCommandFactory::new(script));
        let events = EventBus::new();

        let supervisor = ProcessSupervisor::new(
            config.clone(),
            Arc::clone(&processes) as Arc<dyn StreamProcessRepository>,
            events.clone(),
            commands.clone(),
            Arc::new(StaticSampler::new(4, 0.5, 30.0)),
        );
        let manager = Arc::new(ChannelLifecycleManager::new(
            Arc::clone(&channels) as Arc<dyn ChannelRepository>,
            Arc::clone(&processes) as Arc<dyn StreamProcessRepository>,
            supervisor,
            Arc::new(DefaultStreamPlanner::from_config(&config)),
            Arc::new(MockSubscriptionGate::new()),
            events.clone(),
            ConnectivityProbe::new(commands.clone(), Duration::from_secs(2)),
        ));

        Self {
            manager,
            channels,
            processes,
            commands,
            events,
            _temp_dir: temp_dir,
        }
    }

    async fn create(&self, name: &str) -> String {
        self.manager
            .create_channel("client", name, fixtures::hls_config())
            .await
            .expect("Failed to create channel")
            .id
    }

    async fn status(&self, channel_id: &str) -> ChannelStatus {
        self.channels.find_by_id(channel_id).await.unwrap().status
    }

    async fn wait_for_status(&self, channel_id: &str, expected: ChannelStatus) -> bool {
        for _ in 0..100 {
            if self.status(channel_id).await == expected {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    }
}

fn status_changes(events: &mut EventSubscription, channel_id: &str) -> Vec<(ChannelStatus, ChannelStatus)> {
    let mut changes = Vec::new();
    while let Some(envelope) = events.try_recv() {
        if let StreamEvent::ChannelStatusChanged { channel_id: id, from, to } = envelope.event {
            if id == channel_id {
                changes.push((from, to));
            }
        }
    }
    changes
}

#[tokio::test]
async fn test_start_walks_the_state_machine() {
    let harness = TestHarness::new(HEALTHY_SCRIPT);
    let id = harness.create("Main").await;
    let mut events = harness.events.subscribe();

    let channel = harness.manager.start_channel(&id).await.unwrap();
    assert_eq!(channel.status, ChannelStatus::Live);
    assert!(channel.last_start_time.is_some());

    assert_eq!(
        status_changes(&mut events, &id),
        vec![
            (ChannelStatus::Stopped, ChannelStatus::Starting),
            (ChannelStatus::Starting, ChannelStatus::Live),
        ]
    );

    let record = harness
        .processes
        .find_by_channel_id(&id)
        .await
        .unwrap()
        .expect("process record created");
    assert_eq!(record.status, ProcessStatus::Running);
    assert!(record.pid.is_some());

    let report = harness.manager.get_status(&id).await.unwrap();
    let stream = report.stream.expect("stream health");
    assert_eq!(stream.status, ProcessStatus::Running);
    assert_eq!(stream.restart_attempts, 0);

    harness.manager.stop_channel(&id).await.unwrap();
}

#[tokio::test]
async fn test_stop_twice_is_stopped_both_times() {
    let harness = TestHarness::new(HEALTHY_SCRIPT);
    let id = harness.create("Main").await;
    harness.manager.start_channel(&id).await.unwrap();

    let first = harness.manager.stop_channel(&id).await.unwrap();
    let second = harness.manager.stop_channel(&id).await.unwrap();
    assert_eq!(first.status, ChannelStatus::Stopped);
    assert_eq!(second.status, ChannelStatus::Stopped);

    let record = harness.processes.find_by_channel_id(&id).await.unwrap().unwrap();
    assert_eq!(record.status, ProcessStatus::Idle);
    assert_eq!(record.pid, None);

    // Terminating with nothing alive is still fine.
    harness.manager.supervisor().terminate_stream(&id).await.unwrap();
}

#[tokio::test]
async fn test_restart_from_error_brings_channel_back() {
    let harness = TestHarness::new(HEALTHY_SCRIPT);
    let id = harness.create("Main").await;
    harness.manager.start_channel(&id).await.unwrap();
    harness
        .channels
        .update_status(&id, ChannelStatus::Error, chrono::Utc::now())
        .await
        .unwrap();

    let channel = harness.manager.restart_channel(&id).await.unwrap();
    assert_eq!(channel.status, ChannelStatus::Live);
    assert_eq!(channel.restart_count, 1);
    assert_eq!(harness.commands.launch_count(&id), 2);

    harness.manager.stop_channel(&id).await.unwrap();
}

#[tokio::test]
async fn test_signal_death_is_not_a_failure() {
    let harness = TestHarness::new(HEALTHY_SCRIPT);
    let shutdown = CancellationToken::new();
    let reactor = harness.manager.clone().spawn_event_reactor(shutdown.clone());
    let id = harness.create("Main").await;
    harness.manager.start_channel(&id).await.unwrap();
    let mut events = harness.events.subscribe();

    let pid = harness
        .processes
        .find_by_channel_id(&id)
        .await
        .unwrap()
        .unwrap()
        .pid
        .unwrap();
    std::process::Command::new("kill")
        .arg("-9")
        .arg(pid.to_string())
        .status()
        .unwrap();

    let mut idle = false;
    for _ in 0..100 {
        let record = harness.processes.find_by_channel_id(&id).await.unwrap().unwrap();
        if record.status == ProcessStatus::Idle {
            idle = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(idle);

    // The channel follows its transcoder instead of staying LIVE.
    assert!(harness.wait_for_status(&id, ChannelStatus::Stopped).await);
    let channel = harness.channels.find_by_id(&id).await.unwrap();
    assert!(channel.last_stop_time.is_some());
    assert_eq!(harness.commands.launch_count(&id), 1);
    assert!(!harness.manager.supervisor().is_running(&id).await);

    let mut kinds = Vec::new();
    while let Some(envelope) = events.try_recv() {
        kinds.push(envelope.event.kind());
    }
    assert!(kinds.contains(&"streamExited"));
    assert!(kinds.contains(&"streamingStopped"));
    assert!(!kinds.contains(&"streamFailure"));

    // Starting again works from STOPPED.
    let channel = harness.manager.start_channel(&id).await.unwrap();
    assert_eq!(channel.status, ChannelStatus::Live);
    harness.manager.stop_channel(&id).await.unwrap();
    shutdown.cancel();
    reactor.await.unwrap();
}

#[tokio::test]
async fn test_stop_during_recovery_keeps_channel_stopped() {
    let harness = TestHarness::with_config(HEALTHY_SCRIPT, |config| {
        config.restart_base_delay_ms = 400;
        config.restart_max_delay_ms = 400;
    });
    let id = harness.create("Flaky").await;
    harness.commands.set_channel_script(&id, "sleep 0.2; exit 1");
    let mut events = harness.events.subscribe();
    harness.manager.start_channel(&id).await.unwrap();

    // Wait for the crash, then stop while the restart is backing off.
    let failed = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Some(envelope) = events.recv().await {
                if matches!(envelope.event, StreamEvent::StreamFailure { .. }) {
                    return;
                }
            }
        }
    })
    .await;
    assert!(failed.is_ok());
    let channel = harness.manager.stop_channel(&id).await.unwrap();
    assert_eq!(channel.status, ChannelStatus::Stopped);

    tokio::time::sleep(Duration::from_millis(800)).await;
    assert!(!harness.manager.supervisor().is_running(&id).await);
    assert_eq!(harness.commands.launch_count(&id), 1);
    assert_eq!(harness.status(&id).await, ChannelStatus::Stopped);
    assert_eq!(harness.manager.supervisor().restart_attempts(&id).await, 0);
    while let Some(envelope) = events.try_recv() {
        assert!(!matches!(envelope.event, StreamEvent::StreamRestarted { .. }));
    }
}

#[tokio::test]
async fn test_crashing_stream_is_recovered() {
    let harness = TestHarness::new(HEALTHY_SCRIPT);
    let id = harness.create("Main").await;

    // Crash once, then run healthy.
    let marker = harness._temp_dir.path().join("crashed");
    harness.commands.set_channel_script(
        &id,
        &format!(
            r#"if [ -e "{marker}" ]; then {healthy}; else : > "{marker}"; sleep 0.3; exit 1; fi"#,
            marker = marker.display(),
            healthy = HEALTHY_SCRIPT,
        ),
    );
    let mut events = harness.events.subscribe();

    harness.manager.start_channel(&id).await.unwrap();

    let mut relaunched = false;
    for _ in 0..100 {
        if harness.commands.launch_count(&id) == 2 && harness.manager.supervisor().is_running(&id).await {
            relaunched = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(relaunched);
    assert_eq!(harness.status(&id).await, ChannelStatus::Live);
    assert_eq!(harness.manager.supervisor().restart_attempts(&id).await, 1);

    let mut kinds = Vec::new();
    while let Some(envelope) = events.try_recv() {
        kinds.push(envelope.event.kind());
    }
    assert!(kinds.contains(&"streamFailure"));
    assert!(kinds.contains(&"streamRestarted"));

    harness.manager.stop_channel(&id).await.unwrap();
    assert_eq!(harness.manager.supervisor().restart_attempts(&id).await, 0);
}

#[tokio::test]
async fn test_restart_ceiling_moves_channel_to_error() {
    let harness = TestHarness::new(CRASHING_SCRIPT);
    let shutdown = CancellationToken::new();
    let reactor = harness.manager.clone().spawn_event_reactor(shutdown.clone());
    let id = harness.create("Flaky").await;
    let mut events = harness.events.subscribe();

    // The first spawn succeeds, then every run exits with code 1.
    harness.manager.start_channel(&id).await.unwrap();
    assert!(harness.wait_for_status(&id, ChannelStatus::Error).await);

    // Initial launch plus three restarts, then nothing more.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(harness.commands.launch_count(&id), 4);
    assert_eq!(harness.manager.supervisor().restart_attempts(&id).await, 3);

    let mut exceeded = false;
    while let Some(envelope) = events.try_recv() {
        if matches!(envelope.event, StreamEvent::MaxRestartsExceeded { .. }) {
            exceeded = true;
        }
    }
    assert!(exceeded);

    // A manual restart at the ceiling spawns nothing.
    let err = harness.manager.restart_channel(&id).await.unwrap_err();
    assert!(matches!(
        err,
        LifecycleError::Supervisor(SupervisorError::MaxRestartsExceeded { attempts: 3, .. })
    ));
    assert_eq!(harness.status(&id).await, ChannelStatus::Error);
    assert_eq!(harness.commands.launch_count(&id), 4);

    // An explicit start clears the counter.
    harness.commands.set_stream_script(HEALTHY_SCRIPT);
    let channel = harness.manager.start_channel(&id).await.unwrap();
    assert_eq!(channel.status, ChannelStatus::Live);
    assert_eq!(harness.manager.supervisor().restart_attempts(&id).await, 0);

    harness.manager.stop_channel(&id).await.unwrap();
    shutdown.cancel();
    reactor.await.unwrap();
}

#[tokio::test]
async fn test_delete_removes_channel_and_process() {
    let harness = TestHarness::new(HEALTHY_SCRIPT);
    let id = harness.create("Main").await;
    harness.manager.start_channel(&id).await.unwrap();

    harness.manager.delete_channel(&id).await.unwrap();

    assert!(harness.channels.find_by_id(&id).await.unwrap_err().is_not_found());
    assert!(harness.processes.find_by_channel_id(&id).await.unwrap().is_none());
    assert_eq!(harness.manager.supervisor().active_stream_count(), 0);
}

#[tokio::test]
async fn test_channels_listed_per_client() {
    let harness = TestHarness::new(HEALTHY_SCRIPT);
    harness.create("One").await;
    harness.create("Two").await;
    harness
        .manager
        .create_channel("other", "Three", fixtures::hls_config())
        .await
        .unwrap();

    let names: Vec<String> = harness
        .manager
        .list_channels("client")
        .await
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["One".to_string(), "Two".to_string()]);
}
