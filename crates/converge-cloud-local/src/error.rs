//! Sandbox provider error types

use converge_cloud::ProviderError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LocalError {
    #[error("missing required attribute '{0}'")]
    MissingAttribute(String),

    #[error("invalid attribute '{attr}': {message}")]
    InvalidAttribute { attr: String, message: String },

    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, LocalError>;

impl From<LocalError> for ProviderError {
    fn from(err: LocalError) -> Self {
        match &err {
            LocalError::NotFound(_) => ProviderError::not_found(err.to_string()),
            // Contention on the backing document can clear up on retry.
            LocalError::Io(_) => ProviderError::transient(err.to_string()),
            _ => ProviderError::permanent(err.to_string()),
        }
    }
}
