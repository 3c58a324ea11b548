//! Status endpoint

use axum::{Json, extract::State as AxumState, response::IntoResponse};
use serde_json::json;

use crate::SharedState;

/// GET /status - Server status
pub async fn status(AxumState(state): AxumState<SharedState>) -> impl IntoResponse {
    Json(json!({
        "server": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION"),
            "started_at": state.started_at,
            "uptime_seconds": state.start_time.elapsed().as_secs(),
        },
        "jobs": state.jobs.len(),
        "subscribers": state.subscribers.len(),
        "recent_builds": state.builds.recent().len(),
    }))
}
