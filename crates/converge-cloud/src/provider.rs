//! Provider capability trait and registry
//!
//! A provider adapter implements the four CRUD operations for one resource
//! kind. The executor looks adapters up in a [`ProviderRegistry`] — a plain
//! lookup table, one entry per kind.

use crate::error::{CloudError, ProviderResult, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

/// Attribute map as seen by providers: fully resolved JSON values.
pub type Attrs = BTreeMap<String, serde_json::Value>;

/// Result of a successful create: the provider-assigned remote id plus the
/// full observed attribute set (computed attributes included).
#[derive(Debug, Clone)]
pub struct Created {
    pub remote_id: String,
    pub attrs: Attrs,
}

/// Attribute metadata for one resource kind, consumed by the differ.
#[derive(Debug, Clone, Default)]
pub struct KindSchema {
    /// Attributes the provider cannot change in place; a diff in one of
    /// these forces a replacement.
    pub replace_on_change: BTreeSet<String>,
}

impl KindSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_replace_on_change<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.replace_on_change
            .extend(attrs.into_iter().map(Into::into));
        self
    }

    pub fn requires_replacement(&self, attr: &str) -> bool {
        self.replace_on_change.contains(attr)
    }
}

/// Provider capability for one resource kind.
///
/// All adapters (local sandbox kinds, real cloud kinds) implement this trait
/// to give the executor a uniform interface. Errors carry a
/// [`crate::ProviderErrorKind`] classification; only transient errors are
/// retried.
#[async_trait]
pub trait ResourceProvider: Send + Sync {
    /// Resource kind this adapter manages (e.g. "network", "instance").
    fn kind(&self) -> &str;

    /// Attribute metadata for the differ.
    fn schema(&self) -> KindSchema {
        KindSchema::default()
    }

    /// Create a remote object from resolved attributes.
    async fn create(&self, attrs: &Attrs) -> ProviderResult<Created>;

    /// Read the current remote attributes, `None` when the object is gone.
    async fn read(&self, remote_id: &str) -> ProviderResult<Option<Attrs>>;

    /// Update the remote object in place and return the new attribute set.
    async fn update(&self, remote_id: &str, attrs: &Attrs) -> ProviderResult<Attrs>;

    /// Delete the remote object.
    async fn delete(&self, remote_id: &str) -> ProviderResult<()>;
}

/// Lookup table of provider adapters, keyed by resource kind.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<String, Arc<dyn ResourceProvider>>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, provider: Arc<dyn ResourceProvider>) {
        self.providers
            .insert(provider.kind().to_string(), provider);
    }

    pub fn get(&self, kind: &str) -> Result<Arc<dyn ResourceProvider>> {
        self.providers
            .get(kind)
            .cloned()
            .ok_or_else(|| CloudError::ProviderNotFound(kind.to_string()))
    }

    /// Schemas of every registered kind, for the differ.
    pub fn schemas(&self) -> HashMap<String, KindSchema> {
        self.providers
            .iter()
            .map(|(kind, provider)| (kind.clone(), provider.schema()))
            .collect()
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

/// Retry configuration for transient provider errors.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts, the first call included.
    pub max_attempts: u32,

    /// Initial delay between retries.
    pub initial_delay: Duration,

    /// Maximum delay between retries.
    pub max_delay: Duration,

    /// Backoff multiplier.
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Backoff delay after the given 1-based attempt number.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = self
            .backoff_multiplier
            .powi(attempt.saturating_sub(1) as i32);
        self.initial_delay.mul_f64(factor).min(self.max_delay)
    }
}
