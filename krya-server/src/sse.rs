//! Server-Sent Events stream of job log entries.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use krya::core::types::LogEntry;
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::state::AppState;

fn log_event(entry: &LogEntry) -> Option<Event> {
    serde_json::to_string(entry)
        .ok()
        .map(|json| Event::default().event("log").data(json))
}

/// GET /logs - recent entries first, then live ones as they are emitted.
pub async fn logs_handler(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let backlog_len = state.config().snapshot().jobs.status_log_count;
    let (backlog, mut rx) = state.coordinator.log().subscribe(backlog_len);
    debug!(backlog = backlog.len(), "log stream subscriber connected");

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        for entry in &backlog {
            if let Some(event) = log_event(entry) {
                yield Ok(event);
            }
        }

        loop {
            match rx.recv().await {
                Ok(entry) => {
                    if let Some(event) = log_event(&entry) {
                        yield Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(skipped = n, "SSE client lagged, some log entries dropped");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    break;
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("ping"),
    )
}
