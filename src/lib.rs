pub mod api;
pub mod build;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod filter;
pub mod gate;
pub mod identity;
pub mod jobs;
pub mod listener;
pub mod logging;
pub mod payload;
pub mod repository;
pub mod security;
pub mod subscriber;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::broadcast;

use build::{BuildQueue, DEFAULT_BUILD_HISTORY};
use dispatcher::PushDispatcher;
use error::{Result, RouterError};
use gate::RequestGate;
use identity::InstanceIdentity;
use jobs::ConfiguredJobRegistry;
use listener::{BroadcastListener, RepositoryChanged};
use logging::RecentLogs;
use subscriber::SubscriberRegistry;

const REPOSITORY_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Deserialize, Clone)]
pub struct RouterConfig {
    pub webhook_secret: Option<String>,
    pub identity_key_file: Option<PathBuf>,
    pub log_directory: Option<PathBuf>,
    #[serde(default = "default_build_history")]
    pub build_history: usize,
    #[serde(default, rename = "job")]
    pub jobs: Vec<JobConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobConfig {
    pub name: String,
    pub repositories: Vec<String>,
    /// Path within a monorepo; empty or absent means the whole repository
    pub repository_path: Option<String>,
    #[serde(default = "default_true")]
    pub push_trigger: bool,
    /// Visible to anonymous API viewers
    #[serde(default)]
    pub public: bool,
    /// Won't trigger a build for pushes to the master branch
    #[serde(default)]
    pub ignore_master_push: bool,
    /// Will trigger a build only for pushes to the master branch
    #[serde(default)]
    pub only_master_push: bool,
    pub master_branch: Option<String>,
}

fn default_build_history() -> usize {
    DEFAULT_BUILD_HISTORY
}

fn default_true() -> bool {
    true
}

impl RouterConfig {
    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}

/// Load and parse the configuration file
pub fn load_config(path: impl AsRef<Path>) -> Result<RouterConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        RouterError::ConfigError(format!("Failed to read config file {:?}: {}", path, e))
    })?;
    RouterConfig::from_toml(&contents).map_err(|e| {
        RouterError::ConfigError(format!("Failed to parse config file {:?}: {}", path, e))
    })
}

/// Re-read the configuration file without blocking the runtime
pub async fn reload_config(path: impl AsRef<Path>) -> Result<RouterConfig> {
    let path = path.as_ref();
    let contents = tokio::fs::read_to_string(path).await.map_err(|e| {
        RouterError::ConfigError(format!("Failed to read config file {:?}: {}", path, e))
    })?;
    RouterConfig::from_toml(&contents)
}

pub struct AppState {
    pub config_path: PathBuf,
    pub gate: RequestGate,
    pub subscribers: Arc<SubscriberRegistry>,
    pub jobs: Arc<ConfiguredJobRegistry>,
    pub builds: Arc<BuildQueue>,
    pub repository_events: broadcast::Sender<RepositoryChanged>,
    pub recent_logs: RecentLogs,
    pub started_at: DateTime<Utc>,
    pub start_time: Instant,
}

pub type SharedState = Arc<AppState>;

impl AppState {
    /// Wires the gate, job registry, push dispatcher and listeners together.
    pub fn new(
        config: &RouterConfig,
        config_path: PathBuf,
        identity: InstanceIdentity,
        recent_logs: RecentLogs,
    ) -> Result<Self> {
        let builds = Arc::new(BuildQueue::new(config.build_history));
        let jobs = Arc::new(ConfiguredJobRegistry::from_config(config, Arc::clone(&builds))?);
        let (repository_events, _) = broadcast::channel(REPOSITORY_EVENT_CAPACITY);

        let push_dispatcher = PushDispatcher::new(jobs.clone())
            .with_listener(Arc::new(BroadcastListener::new(repository_events.clone())));
        let subscribers = SubscriberRegistry::new().with(Arc::new(push_dispatcher));

        Ok(Self {
            config_path,
            gate: RequestGate::new(Arc::new(identity), config.webhook_secret.clone()),
            subscribers: Arc::new(subscribers),
            jobs,
            builds,
            repository_events,
            recent_logs,
            started_at: Utc::now(),
            start_time: Instant::now(),
        })
    }
}
