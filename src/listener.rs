//! Repository-changed notifications

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::info;

use crate::repository::RepositoryIdentity;

/// Told about every accepted push, whether or not any job matched.
pub trait RepositoryListener: Send + Sync {
    fn on_push_repository_changed(&self, pusher_name: &str, repository: &RepositoryIdentity);
}

#[derive(Debug, Clone, Serialize)]
pub struct RepositoryChanged {
    pub pusher: String,
    pub repository: RepositoryIdentity,
    pub timestamp: DateTime<Utc>,
}

/// Logs each change and publishes it for SSE subscribers.
#[derive(Clone)]
pub struct BroadcastListener {
    events: broadcast::Sender<RepositoryChanged>,
}

impl BroadcastListener {
    pub fn new(events: broadcast::Sender<RepositoryChanged>) -> Self {
        Self { events }
    }
}

impl RepositoryListener for BroadcastListener {
    fn on_push_repository_changed(&self, pusher_name: &str, repository: &RepositoryIdentity) {
        info!(%repository, pusher = pusher_name, "Repository changed");
        let _ = self.events.send(RepositoryChanged {
            pusher: pusher_name.to_string(),
            repository: repository.clone(),
            timestamp: Utc::now(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn publishes_changes() {
        let (tx, mut rx) = broadcast::channel(4);
        let listener = BroadcastListener::new(tx);
        let repository = RepositoryIdentity::new("github.com", "acme", "widgets");

        listener.on_push_repository_changed("alice", &repository);

        let event = rx.recv().await.unwrap();
        assert_eq!(event.pusher, "alice");
        assert_eq!(event.repository, repository);
    }
}
