//! Recent log entries endpoint

use axum::{
    Json,
    extract::{Query, State as AxumState},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;
use serde_json::json;
use tracing::Level;

use crate::SharedState;

#[derive(Debug, Deserialize)]
pub struct LogsQuery {
    pub level: Option<String>,
}

/// GET /api/logs - Captured log entries, oldest first
/// Supports query parameter: ?level=warn
pub async fn get_logs(
    AxumState(state): AxumState<SharedState>,
    Query(query): Query<LogsQuery>,
) -> Response {
    let Some(level) = query.level else {
        return Json(state.recent_logs.entries()).into_response();
    };

    match level.parse::<Level>() {
        Ok(level) => Json(state.recent_logs.entries_at(level)).into_response(),
        Err(_) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": format!("Unknown log level '{}'", level) })),
        )
            .into_response(),
    }
}
