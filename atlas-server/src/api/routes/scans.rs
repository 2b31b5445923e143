//! Scan trigger and live-stream routes.

use std::convert::Infallible;

use axum::{
    Json, Router,
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
    routing::{get, post},
};
use futures::Stream;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::warn;

use crate::api::error::{ApiError, ApiResult};
use crate::api::models::{RunScanResponse, ScansStatusResponse, StopScanResponse};
use crate::api::server::AppState;
use crate::error::Error;
use crate::scan::{ScanKind, StartOutcome, StreamEvent, TriggerSource};

/// Create the scans router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_scans))
        .route("/{kind}/run", post(run_scan))
        .route("/{kind}/stop", post(stop_scan))
        .route("/{kind}/stream", get(stream_scan))
}

/// Current state of every registered scan type.
async fn list_scans(State(state): State<AppState>) -> ApiResult<Json<ScansStatusResponse>> {
    let scans = ScanKind::ALL
        .into_iter()
        .map(|kind| state.runner.status(kind))
        .collect();
    Ok(Json(ScansStatusResponse { scans }))
}

/// Trigger a scan and wait for it to finish.
///
/// The response carries the run's complete output and exit code; a non-zero
/// exit is reported in the body, not as a transport failure. 409 when a run
/// of this kind is already in flight.
async fn run_scan(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> ApiResult<Json<RunScanResponse>> {
    let kind: ScanKind = kind.parse()?;

    let events = match state.runner.try_start(kind, TriggerSource::Manual).await? {
        StartOutcome::Started { events, .. } => events,
        StartOutcome::Busy => return Err(Error::AlreadyRunning(kind).into()),
    };

    let (output, exit_code) = collect_run_output(events).await;
    Ok(Json(RunScanResponse {
        status: "completed".to_string(),
        exit_code,
        output,
    }))
}

/// Kill an in-flight run. 409 when the scan is idle.
async fn stop_scan(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> ApiResult<Json<StopScanResponse>> {
    let kind: ScanKind = kind.parse()?;
    let run_id = state.runner.stop(kind)?;
    Ok(Json(StopScanResponse {
        status: "stopping".to_string(),
        run_id,
    }))
}

/// Stream a scan's live output as Server-Sent Events.
///
/// Attaches to the in-flight run when there is one, otherwise starts a new
/// manual run. Each output line arrives as one `data:` frame; the terminal
/// `[exit <code>]` frame is last, then the connection closes.
async fn stream_scan(
    State(state): State<AppState>,
    Path(kind): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let kind: ScanKind = kind.parse().map_err(ApiError::from)?;

    let mut rx = match state.hub.subscribe(kind) {
        Some(rx) => rx,
        None => match state.runner.try_start(kind, TriggerSource::Manual).await? {
            StartOutcome::Started { events, .. } => events,
            // Lost a start race; the winner's channel is open now.
            StartOutcome::Busy => state.hub.subscribe(kind).ok_or_else(|| {
                ApiError::conflict(format!("scan {kind} finished before the stream could attach"))
            })?,
        },
    };

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let terminal = matches!(event, StreamEvent::Exit(_));
                    yield Ok(Event::default().data(event.frame()));
                    if terminal {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    // A subscriber this far behind is cut off rather than
                    // allowed to miss lines silently.
                    warn!(scan = %kind, skipped, "SSE subscriber lagged; disconnecting");
                    break;
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

/// Drain a run's event stream into a single output string plus exit code.
async fn collect_run_output(mut rx: broadcast::Receiver<StreamEvent>) -> (String, i32) {
    let mut output = String::new();
    loop {
        match rx.recv().await {
            Ok(StreamEvent::Line(line)) => {
                output.push_str(&line);
                output.push('\n');
            }
            Ok(StreamEvent::Exit(code)) => return (output, code),
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "Run collector lagged; some output lines were dropped");
            }
            Err(RecvError::Closed) => return (output, -1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scan::hub::STREAM_CHANNEL_CAPACITY;

    #[tokio::test]
    async fn collector_accumulates_lines_until_exit() {
        let (tx, rx) = broadcast::channel(STREAM_CHANNEL_CAPACITY);
        tx.send(StreamEvent::Line("a".into())).unwrap();
        tx.send(StreamEvent::Line("b".into())).unwrap();
        tx.send(StreamEvent::Exit(2)).unwrap();

        let (output, code) = collect_run_output(rx).await;
        assert_eq!(output, "a\nb\n");
        assert_eq!(code, 2);
    }

    #[tokio::test]
    async fn collector_handles_channel_closing_without_marker() {
        let (tx, rx) = broadcast::channel(STREAM_CHANNEL_CAPACITY);
        tx.send(StreamEvent::Line("only".into())).unwrap();
        drop(tx);

        let (output, code) = collect_run_output(rx).await;
        assert_eq!(output, "only\n");
        assert_eq!(code, -1);
    }
}
