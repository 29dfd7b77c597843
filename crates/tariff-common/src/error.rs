//! Error types for the tariff pipeline

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ValidationIssue;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, TariffError>;

/// Main error type for the pipeline
#[derive(Error, Debug)]
pub enum TariffError {
    /// Unknown source id or invalid configuration. Never retried.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Timeout, connection error, 5xx or 429.
    #[error("Transient fetch error: {message}")]
    TransientFetch {
        message: String,
        status: Option<u16>,
    },

    /// 4xx other than 429, or a request that cannot succeed as built.
    #[error("Permanent fetch error: {message}")]
    PermanentFetch {
        message: String,
        status: Option<u16>,
    },

    #[error("Empty payload: {0}")]
    EmptyPayload(String),

    #[error("Validation failed: {message}")]
    ValidationFailure {
        message: String,
        issues: Vec<ValidationIssue>,
    },

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable tag for an error, carried by run results and notifications
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Configuration,
    TransientFetch,
    PermanentFetch,
    EmptyPayload,
    ValidationFailure,
    Persistence,
    Io,
    Serialization,
    Parse,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::TransientFetch => "transient_fetch",
            ErrorKind::PermanentFetch => "permanent_fetch",
            ErrorKind::EmptyPayload => "empty_payload",
            ErrorKind::ValidationFailure => "validation_failure",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Io => "io",
            ErrorKind::Serialization => "serialization",
            ErrorKind::Parse => "parse",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TariffError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TariffError::Configuration(_) => ErrorKind::Configuration,
            TariffError::TransientFetch { .. } => ErrorKind::TransientFetch,
            TariffError::PermanentFetch { .. } => ErrorKind::PermanentFetch,
            TariffError::EmptyPayload(_) => ErrorKind::EmptyPayload,
            TariffError::ValidationFailure { .. } => ErrorKind::ValidationFailure,
            TariffError::Persistence(_) => ErrorKind::Persistence,
            TariffError::Io(_) => ErrorKind::Io,
            TariffError::Serialization(_) => ErrorKind::Serialization,
            TariffError::Parse(_) => ErrorKind::Parse,
            TariffError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Whether a retry of the same operation could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, TariffError::TransientFetch { .. })
    }

    pub fn config(message: impl Into<String>) -> Self {
        TariffError::Configuration(message.into())
    }
}
