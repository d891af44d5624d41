//! HTTP adapter and process wiring for streamvisor.

pub mod api;
pub mod metrics;
pub mod state;
