//! Build request history endpoint

use axum::{
    Json,
    extract::{Query, State as AxumState},
};
use serde::Deserialize;

use crate::SharedState;
use crate::build::BuildRequest;

#[derive(Debug, Deserialize)]
pub struct BuildsQuery {
    pub job: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/builds - Recent build requests, newest first
/// Supports query parameters: ?job=name&limit=10
pub async fn get_builds(
    AxumState(state): AxumState<SharedState>,
    Query(query): Query<BuildsQuery>,
) -> Json<Vec<BuildRequest>> {
    let builds = state
        .builds
        .recent()
        .into_iter()
        .filter(|build| query.job.as_deref().is_none_or(|job| build.job_name == job))
        .take(query.limit.unwrap_or(usize::MAX))
        .collect();

    Json(builds)
}
