//! Jobs API endpoint

use axum::{
    Json,
    extract::{Query, State as AxumState},
};
use serde::{Deserialize, Serialize};

use crate::SharedState;
use crate::jobs::{JobRegistry, JobSummary};
use crate::security::SecurityContext;

#[derive(Debug, Deserialize)]
pub struct JobsQuery {
    /// Only jobs whose name contains this text
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct JobView {
    #[serde(flatten)]
    pub summary: JobSummary,
    /// Subscribers that would act on behalf of this job
    pub subscribers: Vec<String>,
}

/// GET /api/jobs - Jobs visible to anonymous viewers
pub async fn get_jobs(
    AxumState(state): AxumState<SharedState>,
    Query(query): Query<JobsQuery>,
) -> Json<Vec<JobView>> {
    let ctx = SecurityContext::anonymous();

    let jobs = state
        .jobs
        .visible_jobs(&ctx)
        .into_iter()
        .filter(|job| match &query.name {
            Some(name) => job.full_name().contains(name.as_str()),
            None => true,
        })
        .map(|job| JobView {
            subscribers: state
                .subscribers
                .applicable_to(job.as_ref())
                .map(|s| s.name().to_string())
                .collect(),
            summary: JobSummary::of(job.as_ref()),
        })
        .collect();

    Json(jobs)
}
