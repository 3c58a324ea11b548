//! Event kinds and the per-request envelope handed from the gate to the
//! subscriber registry.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::RouterError;

/// Event category, as named by the `X-GitHub-Event` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    PullRequestReview,
    PullRequestReviewComment,
    Issues,
    IssueComment,
    Create,
    Delete,
    Release,
    Ping,
    Status,
    CheckRun,
    CheckSuite,
    WorkflowRun,
    Repository,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::PullRequestReview => "pull_request_review",
            EventKind::PullRequestReviewComment => "pull_request_review_comment",
            EventKind::Issues => "issues",
            EventKind::IssueComment => "issue_comment",
            EventKind::Create => "create",
            EventKind::Delete => "delete",
            EventKind::Release => "release",
            EventKind::Ping => "ping",
            EventKind::Status => "status",
            EventKind::CheckRun => "check_run",
            EventKind::CheckSuite => "check_suite",
            EventKind::WorkflowRun => "workflow_run",
            EventKind::Repository => "repository",
        }
    }
}

impl FromStr for EventKind {
    type Err = RouterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let kind = match s.trim().to_ascii_lowercase().as_str() {
            "push" => EventKind::Push,
            "pull_request" => EventKind::PullRequest,
            "pull_request_review" => EventKind::PullRequestReview,
            "pull_request_review_comment" => EventKind::PullRequestReviewComment,
            "issues" => EventKind::Issues,
            "issue_comment" => EventKind::IssueComment,
            "create" => EventKind::Create,
            "delete" => EventKind::Delete,
            "release" => EventKind::Release,
            "ping" => EventKind::Ping,
            "status" => EventKind::Status,
            "check_run" => EventKind::CheckRun,
            "check_suite" => EventKind::CheckSuite,
            "workflow_run" => EventKind::WorkflowRun,
            "repository" => EventKind::Repository,
            _ => return Err(RouterError::UnknownEvent(s.to_string())),
        };
        Ok(kind)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An accepted delivery. The payload is left unparsed; subscribers that care
/// about it parse it themselves.
#[derive(Debug, Clone)]
pub struct EventEnvelope {
    pub kind: EventKind,
    pub payload: String,
}

impl EventEnvelope {
    pub fn new(kind: EventKind, payload: impl Into<String>) -> Self {
        Self {
            kind,
            payload: payload.into(),
        }
    }
}
