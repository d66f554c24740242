//! Declaration-level error types

use crate::model::ResourceId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("cyclic dependency detected: {}", format_cycle(.0))]
    CyclicDependency(Vec<ResourceId>),

    #[error("unresolved reference from {referrer} to {target}")]
    UnresolvedReference { referrer: String, target: String },

    #[error("duplicate resource declaration: {0}")]
    DuplicateResource(String),

    #[error("invalid declaration: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn format_cycle(members: &[ResourceId]) -> String {
    let mut parts: Vec<String> = members.iter().map(|id| id.to_string()).collect();
    // Close the loop in the rendering so the cycle reads as one.
    if let Some(first) = parts.first().cloned() {
        parts.push(first);
    }
    parts.join(" -> ")
}

pub type Result<T> = std::result::Result<T, CoreError>;
