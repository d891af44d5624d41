//! Resource constraint and admission handlers.

use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use std::sync::Arc;
use streamvisor_core::{Availability, BulkOperationType, ResourceConstraints};

use super::error::ApiError;
use super::middleware::ClientId;
use crate::state::AppState;

/// Query parameters for an availability check
#[derive(Debug, Deserialize)]
pub struct AvailabilityParams {
    pub client_id: Option<String>,
    /// Operation type, e.g. `start` or `RESTART`
    pub operation: String,
}

pub async fn get_constraints(State(state): State<Arc<AppState>>) -> Json<ResourceConstraints> {
    Json(state.scheduler().get_resource_constraints())
}

pub async fn check_availability(
    State(state): State<Arc<AppState>>,
    ClientId(caller): ClientId,
    Query(params): Query<AvailabilityParams>,
) -> Result<Json<Availability>, ApiError> {
    let operation: BulkOperationType = params
        .operation
        .parse()
        .map_err(|e: String| ApiError::bad_request(e))?;
    let client_id = params.client_id.unwrap_or(caller);
    Ok(Json(
        state
            .scheduler()
            .check_resource_availability(&client_id, operation)
            .await,
    ))
}
