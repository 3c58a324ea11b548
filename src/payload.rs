//! Typed view over push event payloads

use serde::Deserialize;

use crate::error::{Result, RouterError};

/// Paths touched by a single commit of a push.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct CommitChange {
    #[serde(default)]
    pub added: Vec<String>,
    #[serde(default)]
    pub modified: Vec<String>,
    #[serde(default)]
    pub removed: Vec<String>,
}

impl CommitChange {
    /// Every path of the commit, in the order modified, added, removed.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.modified
            .iter()
            .chain(self.added.iter())
            .chain(self.removed.iter())
            .map(String::as_str)
    }
}

#[derive(Deserialize)]
struct RawRepository {
    url: Option<String>,
}

#[derive(Deserialize)]
struct RawPusher {
    name: Option<String>,
}

#[derive(Deserialize)]
struct RawPushPayload {
    repository: Option<RawRepository>,
    pusher: Option<RawPusher>,
    after: Option<String>,
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    #[serde(default)]
    commits: Vec<CommitChange>,
}

/// Data extracted from a push payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushPayload {
    pub repository_url: String,
    pub pusher_name: String,
    pub after_sha: String,
    pub git_ref: Option<String>,
    pub commits: Vec<CommitChange>,
}

impl PushPayload {
    pub fn parse(payload: &str) -> Result<Self> {
        let raw: RawPushPayload = serde_json::from_str(payload)?;

        let repository_url = raw
            .repository
            .and_then(|r| r.url)
            .filter(|url| !url.trim().is_empty())
            .ok_or_else(|| RouterError::MalformedPayload("missing repository.url".to_string()))?;
        let after_sha = raw
            .after
            .filter(|sha| !sha.trim().is_empty())
            .ok_or_else(|| RouterError::MalformedPayload("missing after".to_string()))?;
        let pusher_name = raw
            .pusher
            .and_then(|p| p.name)
            .ok_or_else(|| RouterError::MalformedPayload("missing pusher.name".to_string()))?;

        Ok(Self {
            repository_url,
            pusher_name,
            after_sha,
            git_ref: raw.git_ref,
            commits: raw.commits,
        })
    }

    /// Branch name of the pushed ref, if the ref is a branch.
    pub fn branch(&self) -> Option<&str> {
        self.git_ref
            .as_deref()
            .and_then(|r| r.strip_prefix("refs/heads/"))
    }
}
