use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Result;
use crate::jobs::{PushTrigger, StringParameter};
use crate::security::ElevatedContext;

/// Default number of build requests kept for the API
pub const DEFAULT_BUILD_HISTORY: usize = 100;

const BUILD_EVENT_CAPACITY: usize = 256;

/// A build handed over by a push trigger
#[derive(Debug, Clone, Serialize)]
pub struct BuildRequest {
    pub id: String,
    pub job_name: String,
    pub pusher: String,
    pub parameters: Vec<StringParameter>,
    pub requested_at: DateTime<Utc>,
}

impl BuildRequest {
    pub fn new(job_name: String, pusher: String, parameters: Vec<StringParameter>) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            job_name,
            pusher,
            parameters,
            requested_at: Utc::now(),
        }
    }

    pub fn parameter(&self, name: &str) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }
}

/// Bounded in-memory record of requested builds. Every new request is also
/// broadcast to stream subscribers.
pub struct BuildQueue {
    recent: Mutex<VecDeque<BuildRequest>>,
    max_requests: usize,
    events: broadcast::Sender<BuildRequest>,
}

impl BuildQueue {
    pub fn new(max_requests: usize) -> Self {
        let (events, _) = broadcast::channel(BUILD_EVENT_CAPACITY);
        Self {
            recent: Mutex::new(VecDeque::new()),
            max_requests: max_requests.max(1),
            events,
        }
    }

    pub fn enqueue(&self, request: BuildRequest) {
        {
            let mut recent = self.recent.lock().unwrap_or_else(PoisonError::into_inner);
            if recent.len() == self.max_requests {
                recent.pop_front();
            }
            recent.push_back(request.clone());
        }
        // No receivers is fine
        let _ = self.events.send(request);
    }

    /// Most recent first
    pub fn recent(&self) -> Vec<BuildRequest> {
        self.recent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .rev()
            .cloned()
            .collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BuildRequest> {
        self.events.subscribe()
    }
}

/// Push trigger that records a [`BuildRequest`] for its job.
pub struct QueueTrigger {
    job_name: String,
    queue: Arc<BuildQueue>,
}

impl QueueTrigger {
    pub fn new(job_name: String, queue: Arc<BuildQueue>) -> Self {
        Self { job_name, queue }
    }
}

impl PushTrigger for QueueTrigger {
    fn on_post(
        &self,
        _elevated: &ElevatedContext<'_>,
        pusher_name: &str,
        parameters: &[StringParameter],
    ) -> Result<()> {
        let request = BuildRequest::new(
            self.job_name.clone(),
            pusher_name.to_string(),
            parameters.to_vec(),
        );
        tracing::debug!(job = %self.job_name, build_id = %request.id, "Queued build");
        self.queue.enqueue(request);
        Ok(())
    }
}
