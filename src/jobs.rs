//! Job registry interfaces and the configuration-backed registry.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

use crate::build::{BuildQueue, QueueTrigger};
use crate::error::{Result, RouterError};
use crate::filter::{BranchPolicy, DEFAULT_MASTER_BRANCH};
use crate::repository::RepositoryIdentity;
use crate::security::{ElevatedContext, SecurityContext};
use crate::{JobConfig, RouterConfig};

/// A named string build parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StringParameter {
    pub name: String,
    pub value: String,
}

impl StringParameter {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Schedules a build for a job. Whether the build then succeeds is not the
/// caller's concern; an error only means the request could not be handed over.
pub trait PushTrigger: Send + Sync {
    fn on_post(
        &self,
        elevated: &ElevatedContext<'_>,
        pusher_name: &str,
        parameters: &[StringParameter],
    ) -> Result<()>;
}

/// Read-only projection of a build job.
pub trait BuildJob: Send + Sync {
    fn full_name(&self) -> &str;

    /// The job's push trigger, if one is configured and active.
    fn push_trigger(&self) -> Option<&dyn PushTrigger>;

    fn has_active_push_trigger(&self) -> bool {
        self.push_trigger().is_some()
    }

    fn repository_identities(&self) -> &HashSet<RepositoryIdentity>;

    /// Monorepo subpath; `None` for whole-repository jobs.
    fn repository_path(&self) -> Option<&str>;

    fn branch_policy(&self) -> &BranchPolicy;
}

pub trait JobRegistry: Send + Sync {
    /// Point-in-time snapshot of every job, hidden ones included.
    fn all_jobs(&self, elevated: &ElevatedContext<'_>) -> Vec<Arc<dyn BuildJob>>;

    /// Jobs the given context is allowed to see.
    fn visible_jobs(&self, ctx: &SecurityContext) -> Vec<Arc<dyn BuildJob>>;
}

/// A job declared in the router configuration file.
pub struct ConfiguredJob {
    name: String,
    identities: HashSet<RepositoryIdentity>,
    repository_path: Option<String>,
    branch_policy: BranchPolicy,
    public: bool,
    trigger: Option<QueueTrigger>,
}

impl ConfiguredJob {
    pub fn from_config(config: &JobConfig, queue: &Arc<BuildQueue>) -> Result<Self> {
        let identities = config
            .repositories
            .iter()
            .map(|url| {
                RepositoryIdentity::parse(url).map_err(|_| {
                    RouterError::ConfigError(format!(
                        "Job '{}' has an invalid repository url '{}'",
                        config.name, url
                    ))
                })
            })
            .collect::<Result<HashSet<_>>>()?;

        let master_branch = config
            .master_branch
            .clone()
            .unwrap_or_else(|| DEFAULT_MASTER_BRANCH.to_string());
        let branch_policy = match (config.ignore_master_push, config.only_master_push) {
            (false, false) => BranchPolicy::Any,
            (true, false) => BranchPolicy::IgnoreMaster { master_branch },
            (false, true) => BranchPolicy::OnlyMaster { master_branch },
            (true, true) => {
                return Err(RouterError::ConfigError(format!(
                    "Job '{}' sets both ignore_master_push and only_master_push",
                    config.name
                )));
            }
        };

        let trigger = config
            .push_trigger
            .then(|| QueueTrigger::new(config.name.clone(), Arc::clone(queue)));

        Ok(Self {
            name: config.name.clone(),
            identities,
            repository_path: config.repository_path.clone(),
            branch_policy,
            public: config.public,
            trigger,
        })
    }

    pub fn is_public(&self) -> bool {
        self.public
    }
}

impl BuildJob for ConfiguredJob {
    fn full_name(&self) -> &str {
        &self.name
    }

    fn push_trigger(&self) -> Option<&dyn PushTrigger> {
        self.trigger.as_ref().map(|t| t as &dyn PushTrigger)
    }

    fn repository_identities(&self) -> &HashSet<RepositoryIdentity> {
        &self.identities
    }

    fn repository_path(&self) -> Option<&str> {
        self.repository_path.as_deref()
    }

    fn branch_policy(&self) -> &BranchPolicy {
        &self.branch_policy
    }
}

/// Job summary for the API
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub name: String,
    pub repositories: Vec<String>,
    pub repository_path: Option<String>,
    pub push_trigger: bool,
    pub branch_policy: BranchPolicy,
}

impl JobSummary {
    pub fn of(job: &dyn BuildJob) -> Self {
        let mut repositories: Vec<String> = job
            .repository_identities()
            .iter()
            .map(RepositoryIdentity::to_url)
            .collect();
        repositories.sort();
        Self {
            name: job.full_name().to_string(),
            repositories,
            repository_path: job.repository_path().map(str::to_string),
            push_trigger: job.has_active_push_trigger(),
            branch_policy: job.branch_policy().clone(),
        }
    }
}

/// Job registry backed by the `[[job]]` tables of the configuration file.
/// Reloading swaps the whole job list; snapshots already handed out keep the
/// jobs they were taken with.
pub struct ConfiguredJobRegistry {
    jobs: RwLock<Vec<Arc<ConfiguredJob>>>,
    queue: Arc<BuildQueue>,
}

impl ConfiguredJobRegistry {
    pub fn from_config(config: &RouterConfig, queue: Arc<BuildQueue>) -> Result<Self> {
        let jobs = Self::build_jobs(config, &queue)?;
        Ok(Self {
            jobs: RwLock::new(jobs),
            queue,
        })
    }

    fn build_jobs(config: &RouterConfig, queue: &Arc<BuildQueue>) -> Result<Vec<Arc<ConfiguredJob>>> {
        let mut seen = HashSet::new();
        config
            .jobs
            .iter()
            .map(|job| {
                if !seen.insert(job.name.as_str()) {
                    return Err(RouterError::ConfigError(format!(
                        "Duplicate job name '{}'",
                        job.name
                    )));
                }
                ConfiguredJob::from_config(job, queue).map(Arc::new)
            })
            .collect()
    }

    /// Replaces every job with the ones declared in `config`. On error the
    /// current jobs stay in place.
    pub fn replace(&self, config: &RouterConfig) -> Result<usize> {
        let jobs = Self::build_jobs(config, &self.queue)?;
        let count = jobs.len();
        *self.jobs.write().unwrap_or_else(PoisonError::into_inner) = jobs;
        info!("Job registry now holds {} job(s)", count);
        Ok(count)
    }

    pub fn len(&self) -> usize {
        self.jobs.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn snapshot(&self) -> Vec<Arc<ConfiguredJob>> {
        self.jobs
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl JobRegistry for ConfiguredJobRegistry {
    fn all_jobs(&self, _elevated: &ElevatedContext<'_>) -> Vec<Arc<dyn BuildJob>> {
        self.snapshot()
            .into_iter()
            .map(|job| job as Arc<dyn BuildJob>)
            .collect()
    }

    fn visible_jobs(&self, ctx: &SecurityContext) -> Vec<Arc<dyn BuildJob>> {
        let elevated = ctx.is_elevated();
        self.snapshot()
            .into_iter()
            .filter(|job| elevated || job.is_public())
            .map(|job| job as Arc<dyn BuildJob>)
            .collect()
    }
}
