//! Per-job push filters: monorepo subpath and master-branch policy.

use serde::Serialize;

use crate::payload::CommitChange;

pub const DEFAULT_MASTER_BRANCH: &str = "master";

/// Returns true if the push touches `repository_path`.
///
/// An absent or blank path means the job covers the whole repository and
/// always matches. Otherwise this is a plain string prefix test, so `lib`
/// also matches `libfoo/x`.
pub fn path_matches(repository_path: Option<&str>, commits: &[CommitChange]) -> bool {
    let Some(prefix) = repository_path.filter(|p| !p.trim().is_empty()) else {
        return true;
    };

    commits
        .iter()
        .any(|commit| commit.paths().any(|path| path.starts_with(prefix)))
}

/// What a job does with pushes to its master branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BranchPolicy {
    #[default]
    Any,
    IgnoreMaster { master_branch: String },
    OnlyMaster { master_branch: String },
}

impl BranchPolicy {
    /// Pushes without a branch ref (tags, or payloads lacking `ref`) are
    /// always allowed.
    pub fn allows(&self, branch: Option<&str>) -> bool {
        let Some(branch) = branch else {
            return true;
        };
        match self {
            BranchPolicy::Any => true,
            BranchPolicy::IgnoreMaster { master_branch } => branch != master_branch,
            BranchPolicy::OnlyMaster { master_branch } => branch == master_branch,
        }
    }
}
