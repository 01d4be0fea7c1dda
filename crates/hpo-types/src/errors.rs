use thiserror::Error;

use crate::results::SearchResult;

/// Main error type for the HPO launcher
#[derive(Error, Debug)]
pub enum HpoError {
    #[error("Invalid configuration: {field} = {value:?}: {reason}")]
    InvalidConfig {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Image build error: {0}")]
    Build(#[from] BuildError),

    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error(
        "Timed out waiting for {job} after {waited_seconds}s ({} trial(s) completed)",
        .partial.completed_count()
    )]
    Timeout {
        job: String,
        waited_seconds: u64,
        partial: Box<SearchResult>,
    },

    #[error("Backend unavailable: {service}: {message}")]
    BackendUnavailable { service: String, message: String },

    #[error("Aborted: {action} was not confirmed")]
    Declined { action: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl HpoError {
    pub fn invalid(
        field: impl Into<String>,
        value: impl ToString,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            value: value.to_string(),
            reason: reason.into(),
        }
    }

    /// Transient failures worth another attempt at the backend boundary.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HpoError::BackendUnavailable { .. } | HpoError::Launch(LaunchError::Throttled { .. })
        )
    }

    /// Partial trial records carried by a timeout, if any.
    pub fn partial_result(&self) -> Option<&SearchResult> {
        match self {
            HpoError::Timeout { partial, .. } => Some(partial),
            _ => None,
        }
    }
}

/// Image assembly and toolchain errors. Never retried.
#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Invalid image specification: {message}")]
    Assembly { message: String },

    #[error("Toolchain {step} failed: {message}")]
    Toolchain { step: String, message: String },
}

/// Submission-side errors reported by an execution or tuning backend.
#[derive(Error, Debug)]
pub enum LaunchError {
    #[error("Request rejected: {reason}")]
    Rejected { reason: String },

    #[error("Resource limit for {instance_type}: {reason}")]
    ResourceLimit {
        instance_type: String,
        reason: String,
    },

    #[error("Job name already in use: {name}")]
    NameConflict { name: String },

    #[error("Throttled, retry after {retry_after_ms} ms")]
    Throttled { retry_after_ms: u64 },

    #[error("Job {job} failed: {reason}")]
    RunFailed { job: String, reason: String },
}

/// Result type alias for launcher operations
pub type HpoResult<T> = Result<T, HpoError>;

/// Macro for creating invalid-configuration errors
#[macro_export]
macro_rules! invalid_config {
    ($field:expr, $value:expr, $($arg:tt)*) => {
        $crate::HpoError::invalid($field, $value, format!($($arg)*))
    };
}

/// Macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::HpoError::Config(format!($($arg)*))
    };
}
