//! Engine error types

use converge_core::CoreError;
use std::fmt;
use thiserror::Error;

/// Classification of a provider failure, driving retry behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    /// Worth retrying with backoff (throttling, flaky transport).
    Transient,
    /// Retrying will not help.
    Permanent,
    /// The remote object does not exist.
    NotFound,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderErrorKind::Transient => write!(f, "transient"),
            ProviderErrorKind::Permanent => write!(f, "permanent"),
            ProviderErrorKind::NotFound => write!(f, "not found"),
        }
    }
}

/// Error returned by provider CRUD operations.
#[derive(Error, Debug, Clone)]
#[error("{kind} provider error: {message}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    pub message: String,
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Transient,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::Permanent,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            kind: ProviderErrorKind::NotFound,
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == ProviderErrorKind::Transient
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ProviderErrorKind::NotFound
    }
}

/// Engine errors
#[derive(Error, Debug)]
pub enum CloudError {
    #[error("no provider registered for resource kind: {0}")]
    ProviderNotFound(String),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("plan conflict: {0}")]
    PlanConflict(String),

    #[error("resource not found in state: {0}")]
    ResourceNotFound(String),

    #[error("resource {resource} has no attribute '{attribute}'")]
    MissingAttribute { resource: String, attribute: String },

    #[error("state file error: {0}")]
    StateError(String),

    #[error("lock acquisition failed: {0}")]
    LockError(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CloudError>;
pub type ProviderResult<T> = std::result::Result<T, ProviderError>;
