//! Bulk operation API handlers.
//!
//! Submission only queues; the dispatcher started in `main` executes.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use streamvisor_core::{BulkOperationRequest, BulkOperationResult, BulkStatus};
use tracing::info;

use super::error::ApiError;
use super::middleware::ClientId;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct SubmitBulkResponse {
    pub operation_id: String,
    pub status: BulkStatus,
}

pub async fn submit_bulk_operation(
    State(state): State<Arc<AppState>>,
    ClientId(client_id): ClientId,
    Json(request): Json<BulkOperationRequest>,
) -> Result<(StatusCode, Json<SubmitBulkResponse>), ApiError> {
    let operation = request.operation;
    let operation_id = state
        .scheduler()
        .queue_bulk_operation(&client_id, request)
        .await?;
    info!(
        operation_id = %operation_id,
        client_id = %client_id,
        operation = %operation,
        "Bulk operation accepted"
    );
    Ok((
        StatusCode::ACCEPTED,
        Json(SubmitBulkResponse {
            operation_id,
            status: BulkStatus::Pending,
        }),
    ))
}

pub async fn get_bulk_operation(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<BulkOperationResult>, ApiError> {
    Ok(Json(state.scheduler().get_operation_status(&id)?))
}
