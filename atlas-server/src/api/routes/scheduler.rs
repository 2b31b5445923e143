//! Scheduler configuration routes.

use axum::{
    Json, Router,
    extract::{Path, State},
    routing::{get, put},
};

use crate::api::error::ApiResult;
use crate::api::models::{IntervalsResponse, SchedulerStatusResponse, UpdateIntervalRequest};
use crate::api::server::AppState;

/// Create the scheduler router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/status", get(scheduler_status))
        .route("/intervals", get(get_intervals))
        .route("/intervals/{kind}", put(update_interval))
}

/// Scheduler liveness plus the current interval mapping.
async fn scheduler_status(State(state): State<AppState>) -> ApiResult<Json<SchedulerStatusResponse>> {
    Ok(Json(SchedulerStatusResponse {
        running: state.scheduler_running(),
        intervals: state.intervals.get_all(),
    }))
}

/// Current trigger intervals for all scan types.
async fn get_intervals(State(state): State<AppState>) -> ApiResult<Json<IntervalsResponse>> {
    Ok(Json(IntervalsResponse {
        intervals: state.intervals.get_all(),
    }))
}

/// Change one scan type's trigger interval.
///
/// Takes effect on the scheduler's next due check. 400 for an unknown scan
/// id or an interval below one second.
async fn update_interval(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Json(request): Json<UpdateIntervalRequest>,
) -> ApiResult<Json<IntervalsResponse>> {
    state.intervals.update(&kind, request.interval)?;
    Ok(Json(IntervalsResponse {
        intervals: state.intervals.get_all(),
    }))
}
