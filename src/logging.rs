use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_core::{Event, Field, Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::error::{Result, RouterError};

const MAX_LOG_MEMORY_BYTES: usize = 512 * 1024; // 512KB
const LOG_FILE_PREFIX: &str = "hook_router";
const DEFAULT_LOG_FILTER: &str = "info";

#[derive(Clone, Debug, Serialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: String,
    pub target: String,
    pub message: String,
}

impl LogEntry {
    fn size(&self) -> usize {
        std::mem::size_of::<LogEntry>() + self.level.len() + self.target.len() + self.message.len()
    }
}

struct LogBuffer {
    entries: VecDeque<LogEntry>,
    total_bytes: usize,
    max_bytes: usize,
}

/// Most recent log entries, capped by approximate memory use. Backs the
/// `/api/logs` endpoint so operators can see why a push did or did not
/// poke a job.
#[derive(Clone)]
pub struct RecentLogs {
    inner: Arc<Mutex<LogBuffer>>,
}

impl RecentLogs {
    pub fn new(max_bytes: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(LogBuffer {
                entries: VecDeque::new(),
                total_bytes: 0,
                max_bytes,
            })),
        }
    }

    pub fn push(&self, entry: LogEntry) {
        let size = entry.size();
        let mut buffer = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if size > buffer.max_bytes {
            return;
        }

        // Remove oldest entries until the new one fits
        while buffer.total_bytes + size > buffer.max_bytes {
            match buffer.entries.pop_front() {
                Some(old) => buffer.total_bytes -= old.size(),
                None => break,
            }
        }
        buffer.total_bytes += size;
        buffer.entries.push_back(entry);
    }

    /// Oldest first
    pub fn entries(&self) -> Vec<LogEntry> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .iter()
            .cloned()
            .collect()
    }

    pub fn entries_at(&self, level: Level) -> Vec<LogEntry> {
        let level = level.to_string();
        self.entries()
            .into_iter()
            .filter(|entry| entry.level == level)
            .collect()
    }
}

impl Default for RecentLogs {
    fn default() -> Self {
        Self::new(MAX_LOG_MEMORY_BYTES)
    }
}

/// Collects the message and the remaining fields of an event as `key=value`.
#[derive(Default)]
struct LogEntryVisitor {
    message: String,
    fields: String,
}

impl LogEntryVisitor {
    fn into_message(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else {
            format!("{}{}", self.message, self.fields)
        }
    }
}

impl tracing::field::Visit for LogEntryVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

/// Tracing layer feeding [`RecentLogs`]
#[derive(Clone)]
pub struct RecentLogLayer {
    logs: RecentLogs,
}

impl RecentLogLayer {
    pub fn new(logs: RecentLogs) -> Self {
        Self { logs }
    }
}

impl<S: Subscriber> Layer<S> for RecentLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let mut visitor = LogEntryVisitor::default();
        event.record(&mut visitor);

        self.logs.push(LogEntry {
            timestamp: Utc::now(),
            level: metadata.level().to_string(),
            target: metadata.target().to_string(),
            message: visitor.into_message(),
        });
    }
}

pub struct FileLogger {
    log_directory: PathBuf,
    rotation: Rotation,
}

impl FileLogger {
    pub fn new(log_directory: PathBuf) -> Self {
        Self {
            log_directory,
            rotation: Rotation::DAILY,
        }
    }

    pub fn setup_file_logging(&self) -> Result<(NonBlocking, WorkerGuard)> {
        std::fs::create_dir_all(&self.log_directory).map_err(|e| {
            RouterError::ConfigError(format!(
                "Failed to create log directory {:?}: {}",
                self.log_directory, e
            ))
        })?;

        let file_appender =
            RollingFileAppender::new(self.rotation.clone(), &self.log_directory, LOG_FILE_PREFIX);
        Ok(tracing_appender::non_blocking(file_appender))
    }
}

/// Installs the global subscriber: env filter (`RUST_LOG`, default `info`),
/// console output, optional rolling file output, and the in-memory layer.
///
/// Keep the returned guard alive for as long as file output is wanted.
pub fn setup_logging(file_logger: Option<&FileLogger>) -> Result<(RecentLogs, Option<WorkerGuard>)> {
    let recent = RecentLogs::default();

    let (file_layer, guard) = match file_logger {
        Some(file_logger) => {
            let (writer, guard) = file_logger.setup_file_logging()?;
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(writer)
                .with_ansi(false); // Disable ANSI colors for file logs
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));

    tracing_subscriber::registry()
        .with(filter)
        .with(RecentLogLayer::new(recent.clone()))
        .with(tracing_subscriber::fmt::layer()) // Console output
        .with(file_layer)
        .try_init()
        .map_err(|e| RouterError::ConfigError(format!("Failed to install logging: {}", e)))?;

    Ok((recent, guard))
}
