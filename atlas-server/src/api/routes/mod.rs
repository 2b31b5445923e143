//! API route modules.
//!
//! Organizes routes by resource type.

pub mod containers;
pub mod health;
pub mod logging;
pub mod logs;
pub mod scans;
pub mod scheduler;

use axum::Router;

use crate::api::server::AppState;

/// Create the main API router with all routes.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .nest("/api/health", health::router())
        .nest("/api/scheduler", scheduler::router())
        .nest("/api/scans", scans::router())
        .nest("/api/logs", logs::router())
        .nest("/api/containers", containers::router())
        .nest("/api/logging", logging::router())
        .with_state(state)
}
