//! Common test utilities for API testing with mocks.
//!
//! The fixture wires the real lifecycle manager and bulk scheduler around
//! in-memory stores, a fixed host sampler and `sh` scripts standing in for
//! the transcoder, then drives the router in-process.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use streamvisor_core::{
    supervisor::CommandFactory,
    testing::{
        InMemoryChannelRepository, InMemoryStreamProcessRepository, MockSubscriptionGate,
        ScriptCommandFactory, StaticSampler, HEALTHY_SCRIPT,
    },
    BulkOperationScheduler, ChannelLifecycleManager, ChannelOperationHandler, Config,
    ConnectivityProbe, DefaultStreamPlanner, EventBus, ProcessSupervisor, ResourceMonitor,
    SupervisorConfig,
};
use streamvisor_server::state::AppState;

/// Test fixture for API testing with mock dependencies.
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Plan limits and priorities per client
    pub gate: Arc<MockSubscriptionGate>,
    /// Host load seen by admission control
    pub sampler: Arc<StaticSampler>,
    /// Transcoder scripts and launch log
    pub commands: Arc<ScriptCommandFactory>,
    pub supervisor: ProcessSupervisor,
    shutdown: CancellationToken,
    /// Temporary directory for segment output
    pub temp_dir: TempDir,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    pub async fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");

        let mut config = Config::default();
        config.supervisor = SupervisorConfig {
            hls_root: temp_dir.path().join("hls"),
            heartbeat_interval_ms: 100,
            termination_grace_ms: 500,
            restart_base_delay_ms: 10,
            restart_max_delay_ms: 50,
            restart_cleanup_delay_ms: 10,
            ..Default::default()
        };
        config.scheduler.dispatch_interval_ms = 20;

        let gate = Arc::new(MockSubscriptionGate::new());
        let sampler = Arc::new(StaticSampler::new(4, 1.0, 40.0));
        let commands = Arc::new(ScriptCommandFactory::new(HEALTHY_SCRIPT));
        let events = EventBus::new();
        let processes = Arc::new(InMemoryStreamProcessRepository::new());

        let supervisor = ProcessSupervisor::new(
            config.supervisor.clone(),
            processes.clone(),
            events.clone(),
            Arc::clone(&commands) as Arc<dyn CommandFactory>,
            sampler.clone(),
        );
        let lifecycle = Arc::new(ChannelLifecycleManager::new(
            Arc::new(InMemoryChannelRepository::new()),
            processes,
            supervisor.clone(),
            Arc::new(DefaultStreamPlanner::from_config(&config.supervisor)),
            gate.clone(),
            events,
            ConnectivityProbe::new(commands.clone(), Duration::from_secs(2)),
        ));

        let monitor = Arc::new(ResourceMonitor::new(
            config.resources.clone(),
            sampler.clone(),
        ));
        let scheduler = Arc::new(BulkOperationScheduler::new(
            config.scheduler.clone(),
            monitor,
            gate.clone(),
            Arc::new(supervisor.clone()),
        ));

        let shutdown = CancellationToken::new();
        let handler: Arc<dyn ChannelOperationHandler> = lifecycle.clone();
        Arc::clone(&scheduler).spawn(handler, shutdown.clone());

        let state = Arc::new(AppState::new(config, lifecycle, scheduler));
        let router = streamvisor_server::api::create_router(state);

        Self {
            router,
            gate,
            sampler,
            commands,
            supervisor,
            shutdown,
            temp_dir,
        }
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body), None).await
    }

    /// Send a POST request with JSON body on behalf of a client.
    pub async fn post_as(&self, client_id: &str, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body), Some(client_id)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None, None).await
    }

    /// Send a PATCH request with JSON body.
    pub async fn patch(&self, path: &str, body: Value) -> TestResponse {
        self.request("PATCH", path, Some(body), None).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None, None).await
    }

    /// Fetch a plain-text endpoint.
    pub async fn get_text(&self, path: &str) -> (StatusCode, String) {
        let request = Request::builder()
            .method("GET")
            .uri(path)
            .body(Body::empty())
            .unwrap();
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();
        (status, String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Create a channel for `client_id` and return its id.
    pub async fn create_channel(&self, client_id: &str, name: &str) -> String {
        let response = self
            .post_as(
                client_id,
                "/api/v1/channels",
                serde_json::json!({
                    "name": name,
                    "config": { "input_source": "/media/loop.mp4" }
                }),
            )
            .await;
        assert_eq!(response.status, StatusCode::CREATED, "{}", response.body);
        response.body["id"]
            .as_str()
            .expect("channel id")
            .to_string()
    }

    /// Poll a bulk operation until it reaches a terminal status.
    pub async fn wait_for_bulk(&self, operation_id: &str) -> Value {
        let path = format!("/api/v1/bulk/{}", operation_id);
        for _ in 0..200 {
            let response = self.get(&path).await;
            let status = response.body["status"].as_str().unwrap_or_default();
            if status == "COMPLETED" || status == "FAILED" {
                return response.body;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("bulk operation {} did not finish", operation_id);
    }

    /// Send a request to the test server.
    async fn request(
        &self,
        method: &str,
        path: &str,
        body: Option<Value>,
        client_id: Option<&str>,
    ) -> TestResponse {
        let mut request_builder = Request::builder().method(method).uri(path);
        if let Some(client_id) = client_id {
            request_builder = request_builder.header("X-Client-Id", client_id);
        }

        let body = if let Some(json_body) = body {
            request_builder = request_builder.header("Content-Type", "application/json");
            Body::from(serde_json::to_vec(&json_body).unwrap())
        } else {
            Body::empty()
        };

        let request = request_builder.body(body).unwrap();

        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("Failed to send request");

        let status = response.status();
        let body_bytes = response
            .into_body()
            .collect()
            .await
            .expect("Failed to collect body")
            .to_bytes();

        let body: Value = if body_bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body_bytes).unwrap_or(Value::Null)
        };

        TestResponse { status, body }
    }
}

impl Drop for TestFixture {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
