//! Log listing, content, download, and tail-follow routes.
//!
//! Log names are either plain `.log` file names under the logs directory or
//! `container:<name>` entries backed by `docker logs`.

use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::{HeaderMap, HeaderValue, header},
    response::sse::{Event, KeepAlive, Sse},
    response::IntoResponse,
    routing::get,
};
use futures::Stream;
use tokio_stream::{StreamExt, wrappers::ReceiverStream};
use tokio_util::sync::CancellationToken;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::LogListResponse;
use crate::api::server::AppState;
use crate::scan::docker::{self, CONTAINER_PREFIX};
use crate::scan::tailer;

/// Create the logs router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_logs))
        .route("/{name}", get(get_log))
        .route("/{name}/download", get(download_log))
        .route("/{name}/stream", get(stream_log))
}

/// List available logs: scan log files plus one `container:<name>` entry per
/// running container.
async fn list_logs(State(state): State<AppState>) -> ApiResult<Json<LogListResponse>> {
    let mut logs = tailer::list_log_files(&state.config.logs_dir)?;
    for name in docker::running_containers().await {
        logs.push(format!("{CONTAINER_PREFIX}{name}"));
    }
    Ok(Json(LogListResponse { logs }))
}

/// Full log content as plain text.
async fn get_log(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<String> {
    Ok(read_content(&state, &name).await?)
}

/// Full log content as an attachment.
async fn download_log(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let content = read_content(&state, &name).await?;

    let filename = match name.strip_prefix(CONTAINER_PREFIX) {
        Some(container) => format!("{container}.log"),
        None => name,
    };
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(
        header::CONTENT_DISPOSITION,
        HeaderValue::from_str(&format!("attachment; filename=\"{filename}\""))
            .map_err(|e| ApiError::internal(format!("Invalid header value: {e}")))?,
    );

    Ok((headers, content))
}

/// Tail-and-follow a log as Server-Sent Events.
///
/// Emits the last few lines first, then follows appends. File streams never
/// self-terminate; container streams end when `docker logs -f` exits. 404
/// for a missing file.
async fn stream_log(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let window = state.config.tail_window;
    // The follower task stops on its own when the client disconnects and the
    // receiver is dropped; the token is only an extra shutdown path.
    let cancel = CancellationToken::new();

    let rx = match name.strip_prefix(CONTAINER_PREFIX) {
        Some(container) => docker::follow_logs(container, window, cancel)?,
        None => {
            let path = tailer::resolve_log_path(&state.config.logs_dir, &name)?;
            tailer::follow(path, window, cancel).await?
        }
    };

    let stream = ReceiverStream::new(rx).map(|line| Ok(Event::default().data(line)));
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn read_content(state: &AppState, name: &str) -> crate::error::Result<String> {
    match name.strip_prefix(CONTAINER_PREFIX) {
        Some(container) => docker::read_logs(container).await,
        None => tailer::read_log(&state.config.logs_dir, name).await,
    }
}
