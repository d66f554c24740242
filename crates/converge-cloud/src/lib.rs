//! Converge reconciliation engine
//!
//! Reconciles a declared resource graph against observed remote state:
//! diffing, deterministic planning, and a parallel, fail-fast apply loop
//! over pluggable provider adapters.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────┐
//! │                  converge CLI                     │
//! │              (plan / apply / destroy)             │
//! └──────────────────┬───────────────────────────────┘
//!                    │
//! ┌──────────────────▼───────────────────────────────┐
//! │                converge-cloud                     │
//! │   declarations ─▶ diff ─▶ plan ─▶ executor        │
//! │        ▲                             │            │
//! │        │                             ▼            │
//! │   state store ◀──── commit per item ─┘            │
//! │  ┌──────────────────────────────────────────┐    │
//! │  │   trait ResourceProvider { C/R/U/D }      │    │
//! │  └──────────────────────────────────────────┘    │
//! └───────┬──────────────────────────────────────────┘
//!         │
//! ┌───────▼────────────┐
//! │ converge-cloud-    │
//! │ local (sandbox)    │
//! └────────────────────┘
//! ```
//!
//! Plan computation (diff + plan) is pure and deterministic; only the
//! executor talks to providers and mutates state.

pub mod action;
pub mod diff;
pub mod error;
pub mod executor;
pub mod output;
pub mod plan;
pub mod provider;
pub mod state;

// Re-exports
pub use action::{ActionType, Plan, PlanItem, PlanSummary};
pub use diff::{ResourceDiff, diff};
pub use error::{CloudError, ProviderError, ProviderErrorKind, ProviderResult, Result};
pub use executor::{ApplyReport, Executor, ItemOutcome, ItemStatus, refresh_state};
pub use output::{OutputSet, OutputValue, REDACTED, resolve_outputs};
pub use plan::plan;
pub use provider::{
    Attrs, Created, KindSchema, ProviderRegistry, ResourceProvider, RetryConfig,
};
pub use state::{GlobalState, ResourceRecord, StateLock, StateManager};
