//! HTTP surface: the webhook endpoint plus a small read-only API

pub mod builds;
pub mod config;
pub mod jobs;
pub mod logs;
pub mod status;
pub mod stream;
pub mod webhook;

use axum::{Router, routing};

use crate::SharedState;

pub use builds::get_builds;
pub use config::reload_config_endpoint;
pub use jobs::get_jobs;
pub use logs::get_logs;
pub use status::status;
pub use stream::{stream_builds, stream_repositories};
pub use webhook::handle_webhook;

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/webhook", routing::any(handle_webhook))
        .route("/status", routing::get(status))
        .route("/api/jobs", routing::get(get_jobs))
        .route("/api/builds", routing::get(get_builds))
        .route("/api/logs", routing::get(get_logs))
        .route("/api/stream/builds", routing::get(stream_builds))
        .route("/api/stream/repositories", routing::get(stream_repositories))
        .route("/api/reload", routing::post(reload_config_endpoint))
        .with_state(state)
}
