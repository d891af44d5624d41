//! Channel API handlers.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use streamvisor_core::{
    Channel, ChannelConfig, ChannelStatusReport, ChannelUpdate, ProbeResult,
};

use super::error::ApiError;
use super::middleware::ClientId;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

/// Request body for creating a channel
#[derive(Debug, Deserialize)]
pub struct CreateChannelBody {
    /// Owner; defaults to the `X-Client-Id` caller
    pub client_id: Option<String>,
    pub name: String,
    pub config: ChannelConfig,
}

/// Query parameters for listing channels
#[derive(Debug, Deserialize)]
pub struct ListChannelsParams {
    pub client_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListChannelsResponse {
    pub channels: Vec<Channel>,
    pub total: usize,
}

#[derive(Debug, Serialize)]
pub struct ConnectivityResponse {
    pub channel_id: String,
    pub reachable: bool,
    pub results: Vec<ProbeResult>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn create_channel(
    State(state): State<Arc<AppState>>,
    ClientId(caller): ClientId,
    Json(body): Json<CreateChannelBody>,
) -> Result<(StatusCode, Json<Channel>), ApiError> {
    let client_id = body.client_id.unwrap_or(caller);
    let channel = state
        .lifecycle()
        .create_channel(&client_id, &body.name, body.config)
        .await?;
    Ok((StatusCode::CREATED, Json(channel)))
}

pub async fn list_channels(
    State(state): State<Arc<AppState>>,
    ClientId(caller): ClientId,
    Query(params): Query<ListChannelsParams>,
) -> Result<Json<ListChannelsResponse>, ApiError> {
    let client_id = params.client_id.unwrap_or(caller);
    let channels = state.lifecycle().list_channels(&client_id).await?;
    Ok(Json(ListChannelsResponse {
        total: channels.len(),
        channels,
    }))
}

pub async fn get_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Channel>, ApiError> {
    Ok(Json(state.lifecycle().get_channel(&id).await?))
}

pub async fn update_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(update): Json<ChannelUpdate>,
) -> Result<Json<Channel>, ApiError> {
    Ok(Json(state.lifecycle().update_channel(&id, update).await?))
}

pub async fn delete_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.lifecycle().delete_channel(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn start_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Channel>, ApiError> {
    Ok(Json(state.lifecycle().start_channel(&id).await?))
}

pub async fn stop_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Channel>, ApiError> {
    Ok(Json(state.lifecycle().stop_channel(&id).await?))
}

pub async fn restart_channel(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Channel>, ApiError> {
    Ok(Json(state.lifecycle().restart_channel(&id).await?))
}

pub async fn get_channel_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ChannelStatusReport>, ApiError> {
    Ok(Json(state.lifecycle().get_status(&id).await?))
}

pub async fn test_connectivity(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ConnectivityResponse>, ApiError> {
    let results = state.lifecycle().test_connectivity(&id).await?;
    Ok(Json(ConnectivityResponse {
        channel_id: id,
        reachable: results.iter().all(|r| r.reachable),
        results,
    }))
}
