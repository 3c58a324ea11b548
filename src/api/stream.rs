//! SSE streaming endpoints for builds and repository changes

use axum::{
    extract::State as AxumState,
    response::sse::{Event, KeepAlive, Sse},
};
use serde::Serialize;
use std::convert::Infallible;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;

use crate::SharedState;

fn sse_stream<T>(
    rx: broadcast::Receiver<T>,
    event_name: &'static str,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>>
where
    T: Serialize + Clone + Send + 'static,
{
    let event_stream = BroadcastStream::new(rx).filter_map(move |result| {
        match result {
            Ok(item) => {
                let data = serde_json::to_string(&item).unwrap_or_default();
                Some(Ok(Event::default().event(event_name).data(data)))
            }
            Err(_) => None, // Skip lagged messages
        }
    });

    Sse::new(event_stream).keep_alive(KeepAlive::default())
}

/// GET /api/stream/builds - SSE stream of new build requests
pub async fn stream_builds(
    AxumState(state): AxumState<SharedState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    sse_stream(state.builds.subscribe(), "build_requested")
}

/// GET /api/stream/repositories - SSE stream of pushed repositories
pub async fn stream_repositories(
    AxumState(state): AxumState<SharedState>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    sse_stream(state.repository_events.subscribe(), "repository_changed")
}
