//! Container listing routes.

use axum::{Json, Router, routing::get};

use crate::api::error::ApiResult;
use crate::api::models::ContainersResponse;
use crate::api::server::AppState;
use crate::scan::docker;

/// Create the containers router.
pub fn router() -> Router<AppState> {
    Router::new().route("/", get(list_containers))
}

/// Names of currently running containers. An unreachable docker daemon
/// yields an empty list rather than an error.
async fn list_containers() -> ApiResult<Json<ContainersResponse>> {
    Ok(Json(ContainersResponse {
        containers: docker::running_containers().await,
    }))
}
