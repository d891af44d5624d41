//! Mapping of library errors to HTTP responses.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use streamvisor_core::{BulkError, LifecycleError, SupervisorError};

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub conflicting_channels: Vec<String>,
}

/// An error on its way out of a handler.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorResponse,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: ErrorResponse {
                error: message.into(),
                conflicting_channels: Vec::new(),
            },
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(status = %self.status, error = %self.body.error, "Request failed");
        }
        (self.status, Json(self.body)).into_response()
    }
}

impl From<LifecycleError> for ApiError {
    fn from(e: LifecycleError) -> Self {
        let status = if e.is_not_found() {
            StatusCode::NOT_FOUND
        } else if e.is_validation() {
            StatusCode::BAD_REQUEST
        } else if e.is_conflict() {
            StatusCode::CONFLICT
        } else {
            match e {
                LifecycleError::LimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
                LifecycleError::Supervisor(SupervisorError::MaxRestartsExceeded { .. }) => {
                    StatusCode::CONFLICT
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            }
        };
        Self::new(status, e.to_string())
    }
}

impl From<BulkError> for ApiError {
    fn from(e: BulkError) -> Self {
        if e.is_validation() {
            return Self::bad_request(e.to_string());
        }
        match e {
            BulkError::NotFound(_) => Self::new(StatusCode::NOT_FOUND, e.to_string()),
            BulkError::ChannelsLocked { ref channels, .. } => {
                let conflicting_channels = channels.clone();
                let mut error = Self::new(StatusCode::CONFLICT, e.to_string());
                error.body.conflicting_channels = conflicting_channels;
                error
            }
            _ => Self::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        }
    }
}
