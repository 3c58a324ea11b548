//! Webhook endpoint

use axum::{
    body::Bytes,
    extract::State as AxumState,
    http::{HeaderMap, Method, StatusCode},
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::SharedState;

/// Handles every method on `/webhook`. Requests the gate intercepts get its
/// answer; everything else is dispatched and answered with `200` once all
/// interested subscribers have run, whatever they decided.
pub async fn handle_webhook(
    AxumState(state): AxumState<SharedState>,
    method: Method,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let envelope = match state.gate.check(&method, &headers, &body) {
        Ok(envelope) => envelope,
        Err(interception) => return interception.into_response(),
    };

    info!(event = %envelope.kind, "Received webhook event");
    let subscribers = Arc::clone(&state.subscribers);
    let kind = envelope.kind;

    match tokio::task::spawn_blocking(move || subscribers.dispatch(&envelope)).await {
        Ok(report) => debug!(
            event = %kind,
            delivered = report.delivered,
            failed = report.failed.len(),
            "Dispatch finished"
        ),
        Err(e) => error!(event = %kind, "Dispatch task failed: {}", e),
    }

    StatusCode::OK.into_response()
}
