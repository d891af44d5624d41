//! API tests driving the router in-process.

#![cfg(unix)]

mod common;

use axum::http::StatusCode;
use serde_json::json;

use common::TestFixture;

// ============================================================================
// Health, config, metrics
// ============================================================================

#[tokio::test]
async fn test_health_reports_active_streams() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/health").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "ok");
    assert_eq!(response.body["active_streams"], 0);
}

#[tokio::test]
async fn test_config_is_sanitized() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/config").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["scheduler"]["max_batch_size"], 50);
    assert!(response.body["subscriptions"]["assigned_clients"].is_number());
    assert!(response.body["subscriptions"].get("clients").is_none());
}

#[tokio::test]
async fn test_metrics_endpoint_exposes_text_format() {
    let fixture = TestFixture::new().await;
    fixture.get("/api/v1/health").await;

    let (status, body) = fixture.get_text("/metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains("streamvisor_http_requests_total"));
    assert!(body.contains("streamvisor_bulk_queue_pending"));
}

// ============================================================================
// Channels
// ============================================================================

#[tokio::test]
async fn test_create_and_list_channels_per_client() {
    let fixture = TestFixture::new().await;
    let id = fixture.create_channel("acme", "Main").await;
    fixture.create_channel("globex", "Other").await;

    let response = fixture.get(&format!("/api/v1/channels/{}", id)).await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["client_id"], "acme");
    assert_eq!(response.body["status"], "STOPPED");
    assert!(response.body["hls_endpoint"]
        .as_str()
        .unwrap()
        .ends_with(".m3u8"));

    let response = fixture.get("/api/v1/channels?client_id=acme").await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["total"], 1);
    assert_eq!(response.body["channels"][0]["name"], "Main");
}

#[tokio::test]
async fn test_create_channel_rejects_blank_name() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .post(
            "/api/v1/channels",
            json!({ "name": "  ", "config": { "input_source": "/media/loop.mp4" } }),
        )
        .await;

    assert_status!(response, StatusCode::BAD_REQUEST);
    assert!(response.body["error"].is_string());
}

#[tokio::test]
async fn test_channel_plan_limit_is_too_many_requests() {
    let fixture = TestFixture::new().await;
    fixture.gate.set_max_channels("acme", 1).await;
    fixture.create_channel("acme", "First").await;

    let response = fixture
        .post_as(
            "acme",
            "/api/v1/channels",
            json!({ "name": "Second", "config": { "input_source": "/media/loop.mp4" } }),
        )
        .await;

    assert_status!(response, StatusCode::TOO_MANY_REQUESTS);
}

#[tokio::test]
async fn test_unknown_channel_is_not_found() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/channels/missing").await;
    assert_status!(response, StatusCode::NOT_FOUND);

    let response = fixture.post_empty("/api/v1/channels/missing/start").await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_start_stop_cycle_over_http() {
    let fixture = TestFixture::new().await;
    let id = fixture.create_channel("acme", "Main").await;

    let response = fixture
        .post_empty(&format!("/api/v1/channels/{}/start", id))
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["status"], "LIVE");

    let response = fixture
        .post_empty(&format!("/api/v1/channels/{}/start", id))
        .await;
    assert_status!(response, StatusCode::CONFLICT);

    let response = fixture
        .get(&format!("/api/v1/channels/{}/status", id))
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["channel"]["status"], "LIVE");
    assert_eq!(response.body["stream"]["status"], "RUNNING");

    let response = fixture.get("/api/v1/health").await;
    assert_eq!(response.body["active_streams"], 1);

    for _ in 0..2 {
        let response = fixture
            .post_empty(&format!("/api/v1/channels/{}/stop", id))
            .await;
        assert_status!(response, StatusCode::OK);
        assert_eq!(response.body["status"], "STOPPED");
    }
    assert_eq!(fixture.supervisor.active_stream_count(), 0);
}

#[tokio::test]
async fn test_restart_of_stopped_channel_conflicts() {
    let fixture = TestFixture::new().await;
    let id = fixture.create_channel("acme", "Main").await;

    let response = fixture
        .post_empty(&format!("/api/v1/channels/{}/restart", id))
        .await;

    assert_status!(response, StatusCode::CONFLICT);
    assert_eq!(fixture.commands.launch_count(&id), 0);
}

#[tokio::test]
async fn test_update_and_delete_channel() {
    let fixture = TestFixture::new().await;
    let id = fixture.create_channel("acme", "Main").await;
    let path = format!("/api/v1/channels/{}", id);

    let response = fixture
        .patch(&path, json!({ "name": "Renamed", "video_bitrate_kbps": 4000 }))
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["name"], "Renamed");
    assert_eq!(response.body["config"]["video_bitrate_kbps"], 4000);

    let response = fixture.delete(&path).await;
    assert_status!(response, StatusCode::NO_CONTENT);

    let response = fixture.get(&path).await;
    assert_status!(response, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_connectivity_without_destinations_is_bad_request() {
    let fixture = TestFixture::new().await;
    let id = fixture.create_channel("acme", "Main").await;

    let response = fixture
        .post_empty(&format!("/api/v1/channels/{}/connectivity", id))
        .await;

    assert_status!(response, StatusCode::BAD_REQUEST);
}

// ============================================================================
// Bulk operations
// ============================================================================

#[tokio::test]
async fn test_bulk_start_is_accepted_and_completes() {
    let fixture = TestFixture::new().await;
    let first = fixture.create_channel("acme", "One").await;
    let second = fixture.create_channel("acme", "Two").await;

    let response = fixture
        .post_as(
            "acme",
            "/api/v1/bulk",
            json!({ "operation": "START", "channel_ids": [first, second] }),
        )
        .await;
    assert_status!(response, StatusCode::ACCEPTED);
    assert_eq!(response.body["status"], "PENDING");
    let operation_id = response.body["operation_id"].as_str().unwrap().to_string();

    let result = fixture.wait_for_bulk(&operation_id).await;
    assert_eq!(result["status"], "COMPLETED");
    assert_eq!(result["success_count"], 2);
    assert_eq!(result["failure_count"], 0);
    assert_eq!(result["client_id"], "acme");

    let response = fixture
        .post_as(
            "acme",
            "/api/v1/bulk",
            json!({ "operation": "STOP", "channel_ids": [first, second] }),
        )
        .await;
    let operation_id = response.body["operation_id"].as_str().unwrap().to_string();
    let result = fixture.wait_for_bulk(&operation_id).await;
    assert_eq!(result["success_count"], 2);
    assert_eq!(fixture.supervisor.active_stream_count(), 0);
}

#[tokio::test]
async fn test_bulk_for_foreign_channels_reports_failures() {
    let fixture = TestFixture::new().await;
    let id = fixture.create_channel("acme", "Main").await;

    let response = fixture
        .post_as(
            "intruder",
            "/api/v1/bulk",
            json!({ "operation": "START", "channel_ids": [id] }),
        )
        .await;
    let operation_id = response.body["operation_id"].as_str().unwrap().to_string();

    let result = fixture.wait_for_bulk(&operation_id).await;
    assert_eq!(result["status"], "COMPLETED");
    assert_eq!(result["failure_count"], 1);
    assert_eq!(fixture.commands.launch_count(&id), 0);
}

#[tokio::test]
async fn test_bulk_validation_errors() {
    let fixture = TestFixture::new().await;
    let too_many: Vec<String> = (0..51).map(|i| format!("c{}", i)).collect();

    let response = fixture
        .post(
            "/api/v1/bulk",
            json!({ "operation": "START", "channel_ids": too_many }),
        )
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);

    let response = fixture
        .post(
            "/api/v1/bulk",
            json!({ "operation": "STOP", "channel_ids": [] }),
        )
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);

    let response = fixture
        .post(
            "/api/v1/bulk",
            json!({ "operation": "STOP", "channel_ids": ["a"], "priority": 11 }),
        )
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);

    assert!(fixture.commands.launches().is_empty());
}

#[tokio::test]
async fn test_unknown_bulk_operation_is_not_found() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/bulk/does-not-exist").await;

    assert_status!(response, StatusCode::NOT_FOUND);
}

// ============================================================================
// Resources
// ============================================================================

#[tokio::test]
async fn test_resource_constraints() {
    let fixture = TestFixture::new().await;

    let response = fixture.get("/api/v1/resources/constraints").await;

    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["cpu_count"], 4);
    assert_eq!(response.body["max_ffmpeg_processes"], 8);
    assert_eq!(response.body["max_concurrent_operations"], 5);
}

#[tokio::test]
async fn test_resource_availability_tracks_load() {
    let fixture = TestFixture::new().await;

    let response = fixture
        .get("/api/v1/resources/availability?client_id=acme&operation=start")
        .await;
    assert_status!(response, StatusCode::OK);
    assert_eq!(response.body["available"], true);

    fixture.sampler.set_load(3.6);
    let response = fixture
        .get("/api/v1/resources/availability?client_id=acme&operation=start")
        .await;
    assert_eq!(response.body["available"], false);
    assert!(response.body["reason"].is_string());

    let response = fixture
        .get("/api/v1/resources/availability?operation=explode")
        .await;
    assert_status!(response, StatusCode::BAD_REQUEST);
}
