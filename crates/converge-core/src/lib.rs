//! Converge declaration model
//!
//! The configuration-facing half of the engine: typed resource
//! declarations, reference scanning, and dependency graph resolution.
//! Everything here is synchronous, side-effect free and deterministic —
//! the same declaration set always yields the same graph and the same
//! topological order.

pub mod error;
pub mod graph;
pub mod loader;
pub mod model;

// Re-exports
pub use error::{CoreError, Result};
pub use graph::DependencyGraph;
pub use loader::{load_declarations, parse_declarations};
pub use model::{
    AttrValue, DeclarationSet, Lifecycle, OutputDecl, Reference, ResourceDecl, ResourceId,
};
