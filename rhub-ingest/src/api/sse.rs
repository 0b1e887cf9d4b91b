//! Server-Sent Events stream of pipeline progress
//!
//! GET /events: run/source lifecycle events for ops tooling. Broadcast is
//! lossy; a slow consumer misses events rather than stalling ingestion.

use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::AppState;

/// GET /events
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    info!("New SSE client connected to pipeline events");

    let mut rx = state.event_bus.subscribe();

    let stream = async_stream::stream! {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(15)) => {
                    debug!("SSE: sending heartbeat");
                    yield Ok(Event::default().comment("heartbeat"));
                }

                event = rx.recv() => {
                    match event {
                        Ok(event) => match serde_json::to_string(&event) {
                            Ok(json) => {
                                yield Ok(Event::default().event("pipeline").data(json));
                            }
                            Err(e) => {
                                warn!("SSE: failed to serialize event: {}", e);
                            }
                        },
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                            warn!(missed, "SSE client lagged, events dropped");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                    }
                }
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
