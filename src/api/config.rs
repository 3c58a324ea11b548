//! Config API endpoint

use axum::{Json, extract::State as AxumState, http::StatusCode, response::IntoResponse};
use serde_json::json;
use tracing::{error, info};

use crate::{SharedState, reload_config};

/// POST /api/reload - Reload jobs from the configuration file
/// In-flight dispatches keep the job snapshot they started with
pub async fn reload_config_endpoint(AxumState(state): AxumState<SharedState>) -> impl IntoResponse {
    let result = reload_config(&state.config_path)
        .await
        .and_then(|config| state.jobs.replace(&config));

    match result {
        Ok(jobs) => {
            info!(
                "Configuration reloaded successfully from {:?}",
                state.config_path
            );
            Json(json!({
                "status": "success",
                "message": "Configuration reloaded successfully",
                "jobs": jobs,
            }))
            .into_response()
        }
        Err(e) => {
            error!("Failed to reload config: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "status": "error",
                    "message": e.to_string()
                })),
            )
                .into_response()
        }
    }
}
