use axum::{
    middleware::from_fn,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{bulk, channels, handlers, middleware::metrics_middleware, resources};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Channels
        .route(
            "/channels",
            post(channels::create_channel).get(channels::list_channels),
        )
        .route(
            "/channels/{id}",
            get(channels::get_channel)
                .patch(channels::update_channel)
                .delete(channels::delete_channel),
        )
        .route("/channels/{id}/start", post(channels::start_channel))
        .route("/channels/{id}/stop", post(channels::stop_channel))
        .route("/channels/{id}/restart", post(channels::restart_channel))
        .route("/channels/{id}/status", get(channels::get_channel_status))
        .route(
            "/channels/{id}/connectivity",
            post(channels::test_connectivity),
        )
        // Bulk operations
        .route("/bulk", post(bulk::submit_bulk_operation))
        .route("/bulk/{id}", get(bulk::get_bulk_operation))
        // Resources
        .route("/resources/constraints", get(resources::get_constraints))
        .route(
            "/resources/availability",
            get(resources::check_availability),
        );

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::metrics))
        .layer(from_fn(metrics_middleware))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
