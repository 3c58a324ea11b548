use std::io;

/// Custom error type for git_hook_router operations
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Malformed repository url: {0}")]
    MalformedRepositoryUrl(String),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Unknown event type: {0}")]
    UnknownEvent(String),

    #[error("Trigger failed for job '{job}': {message}")]
    TriggerFailed { job: String, message: String },

    #[error("Instance identity error: {0}")]
    IdentityError(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("TOML parsing error: {0}")]
    TomlParseError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Helper type for Results that use RouterError
pub type Result<T> = std::result::Result<T, RouterError>;
