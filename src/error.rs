use std::path::PathBuf;

use miette::Diagnostic;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error, Diagnostic)]
pub enum FeatureError {
    #[error("malformed input at byte {offset}: expected {expected}")]
    MalformedInput { offset: usize, expected: String },

    #[error("fetch failed for {key}: {reason}")]
    FetchFailed { key: String, reason: String },

    #[error("fetch for {key} returned status {status}")]
    FetchStatus { key: String, status: u16 },

    #[error("feature store is not initialized")]
    #[diagnostic(help("call initialize() before reading base data"))]
    NotInitialized,

    #[error("unknown {category} feature: {name}")]
    UnknownFeature { category: String, name: String },

    #[error("initialization failed")]
    InitializationFailed(#[source] Box<FeatureError>),

    #[error("cell not found: {0}")]
    CellNotFound(String),

    #[error("timed out waiting for in-flight load of {key}")]
    WaitTimedOut { key: String },

    #[error("in-flight load of {key} was abandoned")]
    LoadAbandoned { key: String },

    #[error("invalid feature category: {0}")]
    InvalidCategory(String),

    #[error("missing config file kira-sf.json in current directory")]
    MissingConfig,

    #[error("failed to read config file at {0}")]
    ConfigRead(PathBuf),

    #[error("failed to parse JSON config: {0}")]
    ConfigParse(String),

    #[error("filesystem error: {0}")]
    Filesystem(String),
}

impl FeatureError {
    pub(crate) fn malformed(offset: usize, expected: impl Into<String>) -> Self {
        FeatureError::MalformedInput {
            offset,
            expected: expected.into(),
        }
    }

    pub(crate) fn fetch(key: &str, reason: impl ToString) -> Self {
        FeatureError::FetchFailed {
            key: key.to_string(),
            reason: reason.to_string(),
        }
    }

    /// Errors that a single feature load may absorb into a zero-filled vector.
    pub fn is_recoverable_load_failure(&self) -> bool {
        matches!(
            self,
            FeatureError::MalformedInput { .. }
                | FeatureError::FetchFailed { .. }
                | FeatureError::FetchStatus { .. }
        )
    }

    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            FeatureError::FetchFailed { .. } | FeatureError::FetchStatus { .. }
        )
    }

    pub fn is_malformed(&self) -> bool {
        matches!(self, FeatureError::MalformedInput { .. })
    }
}
