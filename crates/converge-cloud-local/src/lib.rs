//! Converge local sandbox provider
//!
//! Implements the provider capability against a simulated cloud living in
//! `.converge/cloud.json`. Useful for trying declarations end to end, and
//! as the reference shape for real provider crates: one adapter per
//! resource kind, registered into the engine's lookup table.

pub mod cloud;
pub mod error;
pub mod provider;

// Re-exports
pub use cloud::LocalCloud;
pub use error::{LocalError, Result};
pub use provider::{LocalProvider, register_defaults};
