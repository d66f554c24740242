//! Plan execution
//!
//! Walks a plan, invoking provider adapters and committing observed state
//! after every successful item. Items with no dependency path between them
//! may run concurrently up to `max_parallel`; items connected by an edge
//! execute in strict sequence, and a producer's commit always lands before
//! its dependents start. Failure is fail-fast: no new items are issued,
//! in-flight siblings drain and commit, everything else is reported as not
//! attempted. Convergence on the next run is the recovery mechanism — there
//! is no rollback.

use crate::action::{ActionType, Plan, PlanItem};
use crate::error::{CloudError, ProviderError, ProviderResult, Result};
use crate::output::OutputSet;
use crate::provider::{Attrs, Created, ProviderRegistry, ResourceProvider, RetryConfig};
use crate::state::{GlobalState, ResourceRecord, StateManager};
use chrono::Utc;
use converge_core::{AttrValue, ResourceId};
use futures_util::stream::{FuturesUnordered, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Result status of one plan item after an apply run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    Succeeded,
    Unchanged,
    Failed { error: String },
    NotAttempted,
}

/// Per-item outcome, in plan order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemOutcome {
    pub resource: ResourceId,
    pub action: ActionType,
    pub status: ItemStatus,
}

/// Result of applying a plan.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApplyReport {
    pub outcomes: Vec<ItemOutcome>,

    /// Total execution time in milliseconds
    pub duration_ms: u64,

    /// Outputs resolved after a fully successful apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<OutputSet>,
}

impl ApplyReport {
    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| matches!(o.status, ItemStatus::Succeeded | ItemStatus::Unchanged))
    }

    pub fn succeeded(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Succeeded))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::Failed { .. }))
    }

    pub fn not_attempted(&self) -> usize {
        self.count(|s| matches!(s, ItemStatus::NotAttempted))
    }

    pub fn first_failure(&self) -> Option<&ItemOutcome> {
        self.outcomes
            .iter()
            .find(|o| matches!(o.status, ItemStatus::Failed { .. }))
    }

    pub fn with_outputs(mut self, outputs: OutputSet) -> Self {
        self.outputs = Some(outputs);
        self
    }

    fn count(&self, pred: impl Fn(&ItemStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| pred(&o.status)).count()
    }
}

/// What a provider call produced, to be folded into state by the run loop.
enum CommitData {
    Created {
        remote_id: String,
        attrs: Attrs,
        inputs: Attrs,
    },
    Updated {
        remote_id: String,
        attrs: Attrs,
        inputs: Attrs,
    },
    Destroyed {
        remote_id: String,
    },
}

/// The provider call an item boils down to, attributes fully resolved.
enum Work {
    Create { inputs: Attrs },
    Update { remote_id: String, inputs: Attrs },
    Destroy { remote_id: String },
}

/// Walks plans against a provider registry.
pub struct Executor {
    registry: Arc<ProviderRegistry>,
    retry: RetryConfig,
    max_parallel: usize,
    cancel: CancellationToken,
}

impl Executor {
    pub fn new(registry: Arc<ProviderRegistry>) -> Self {
        Self {
            registry,
            retry: RetryConfig::default(),
            max_parallel: 4,
            cancel: CancellationToken::new(),
        }
    }

    /// Maximum number of provider calls in flight at once.
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        self.max_parallel = max.max(1);
        self
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Cancellation lets started provider calls finish and commit but
    /// issues no new ones.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Apply the plan, committing state after each successful item.
    ///
    /// Provider failures are reported per item, not returned as `Err`; the
    /// error path is reserved for state persistence problems.
    pub async fn apply(
        &self,
        plan: &Plan,
        state: &mut GlobalState,
        manager: &StateManager,
    ) -> Result<ApplyReport> {
        let started = Instant::now();
        let n = plan.items.len();

        let mut statuses: Vec<Option<ItemStatus>> = vec![None; n];
        let mut remaining_deps: Vec<usize> = plan.items.iter().map(|i| i.depends_on.len()).collect();
        let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
        for (i, item) in plan.items.iter().enumerate() {
            for &d in &item.depends_on {
                dependents[d].push(i);
            }
        }

        // NoOp items complete without a provider call.
        let mut issued = vec![false; n];
        for (i, item) in plan.items.iter().enumerate() {
            if item.action == ActionType::NoOp {
                statuses[i] = Some(ItemStatus::Unchanged);
                issued[i] = true;
                for &j in &dependents[i] {
                    remaining_deps[j] -= 1;
                }
            }
        }

        let mut halted = false;
        let mut running = 0usize;
        let mut in_flight = FuturesUnordered::new();

        loop {
            if !halted && !self.cancel.is_cancelled() {
                while running < self.max_parallel {
                    let Some(idx) = next_ready(&issued, &statuses, &remaining_deps) else {
                        break;
                    };
                    issued[idx] = true;
                    let item = &plan.items[idx];
                    match self.prepare(item, state) {
                        Ok((provider, work)) => {
                            tracing::info!(
                                resource = %item.resource,
                                action = %item.action,
                                "applying"
                            );
                            let retry = self.retry.clone();
                            let cancel = self.cancel.clone();
                            in_flight.push(async move {
                                (idx, run_with_retry(provider, work, retry, cancel).await)
                            });
                            running += 1;
                        }
                        Err(e) => {
                            tracing::error!(resource = %item.resource, "cannot start: {e}");
                            statuses[idx] = Some(ItemStatus::Failed {
                                error: e.to_string(),
                            });
                            halted = true;
                            break;
                        }
                    }
                }
            }

            let Some((idx, result)) = in_flight.next().await else {
                break;
            };
            running -= 1;
            let item = &plan.items[idx];
            match result {
                Ok(data) => {
                    commit(item, data, state);
                    manager.save(state).await?;
                    statuses[idx] = Some(ItemStatus::Succeeded);
                    for &j in &dependents[idx] {
                        remaining_deps[j] -= 1;
                    }
                    tracing::info!(resource = %item.resource, action = %item.action, "applied");
                }
                Err(e) => {
                    tracing::error!(
                        resource = %item.resource,
                        action = %item.action,
                        "failed: {e}"
                    );
                    statuses[idx] = Some(ItemStatus::Failed {
                        error: e.to_string(),
                    });
                    halted = true;
                }
            }
        }

        let outcomes = plan
            .items
            .iter()
            .zip(statuses)
            .map(|(item, status)| ItemOutcome {
                resource: item.resource.clone(),
                action: item.action,
                status: status.unwrap_or(ItemStatus::NotAttempted),
            })
            .collect();

        Ok(ApplyReport {
            outcomes,
            duration_ms: started.elapsed().as_millis() as u64,
            outputs: None,
        })
    }

    /// Resolve the item against current state and pick its provider. Runs
    /// synchronously at issue time so the dependency snapshot is consistent.
    fn prepare(
        &self,
        item: &PlanItem,
        state: &GlobalState,
    ) -> Result<(Arc<dyn ResourceProvider>, Work)> {
        let provider = self.registry.get(&item.resource.kind)?;
        let work = match item.action {
            ActionType::Create => Work::Create {
                inputs: resolve_attrs(item.attrs.as_ref(), state)?,
            },
            ActionType::Update => Work::Update {
                remote_id: item_remote_id(item)?,
                inputs: resolve_attrs(item.attrs.as_ref(), state)?,
            },
            ActionType::Destroy => Work::Destroy {
                remote_id: item_remote_id(item)?,
            },
            ActionType::Replace | ActionType::NoOp => {
                return Err(CloudError::PlanConflict(format!(
                    "{} item is not executable",
                    item.action
                )));
            }
        };
        Ok((provider, work))
    }
}

fn item_remote_id(item: &PlanItem) -> Result<String> {
    item.remote_id
        .clone()
        .ok_or_else(|| CloudError::StateError(format!("{} has no remote id", item.resource)))
}

fn next_ready(
    issued: &[bool],
    statuses: &[Option<ItemStatus>],
    remaining_deps: &[usize],
) -> Option<usize> {
    (0..issued.len()).find(|&i| !issued[i] && statuses[i].is_none() && remaining_deps[i] == 0)
}

/// Substitute pending references with attributes of already-committed
/// producers. The planner ordered producers first, so every lookup hits.
fn resolve_attrs(
    attrs: Option<&BTreeMap<String, AttrValue>>,
    state: &GlobalState,
) -> Result<Attrs> {
    let Some(attrs) = attrs else {
        return Ok(Attrs::new());
    };
    let mut out = Attrs::new();
    for (name, value) in attrs {
        let resolved = value.resolve_with(&mut |reference| {
            let record = state
                .get(&reference.target)
                .ok_or_else(|| CloudError::ResourceNotFound(reference.target.to_string()))?;
            record
                .lookup(&reference.attribute)
                .cloned()
                .ok_or_else(|| CloudError::MissingAttribute {
                    resource: reference.target.to_string(),
                    attribute: reference.attribute.clone(),
                })
        })?;
        out.insert(name.clone(), resolved);
    }
    Ok(out)
}

async fn run_with_retry(
    provider: Arc<dyn ResourceProvider>,
    work: Work,
    retry: RetryConfig,
    cancel: CancellationToken,
) -> ProviderResult<CommitData> {
    let mut attempt: u32 = 1;
    loop {
        let result = match &work {
            Work::Create { inputs } => {
                provider
                    .create(inputs)
                    .await
                    .map(|Created { remote_id, attrs }| CommitData::Created {
                        remote_id,
                        attrs,
                        inputs: inputs.clone(),
                    })
            }
            Work::Update { remote_id, inputs } => {
                provider
                    .update(remote_id, inputs)
                    .await
                    .map(|attrs| CommitData::Updated {
                        remote_id: remote_id.clone(),
                        attrs,
                        inputs: inputs.clone(),
                    })
            }
            Work::Destroy { remote_id } => match provider.delete(remote_id).await {
                // Already gone remotely: converged.
                Err(e) if e.is_not_found() => Ok(CommitData::Destroyed {
                    remote_id: remote_id.clone(),
                }),
                other => other.map(|_| CommitData::Destroyed {
                    remote_id: remote_id.clone(),
                }),
            },
        };

        match result {
            Err(e) if e.is_transient() => {
                if attempt >= retry.max_attempts {
                    return Err(ProviderError::permanent(format!(
                        "giving up after {attempt} attempts: {}",
                        e.message
                    )));
                }
                let delay = retry.delay_for(attempt);
                tracing::warn!(
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient provider error, backing off: {}",
                    e.message
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Err(ProviderError::permanent("cancelled during backoff"));
                    }
                }
                attempt += 1;
            }
            other => return other,
        }
    }
}

/// Re-read every tracked resource from its provider, folding the observed
/// attributes back into state. Objects that disappeared remotely drop out of
/// state, so the next diff plans their recreation.
pub async fn refresh_state(
    registry: &ProviderRegistry,
    state: &mut GlobalState,
    manager: &StateManager,
) -> Result<()> {
    let ids: Vec<ResourceId> = state.records().map(|r| r.resource.clone()).collect();
    let mut dirty = false;
    for id in ids {
        let provider = registry.get(&id.kind)?;
        let Some(record) = state.get(&id) else {
            continue;
        };
        match provider.read(&record.remote_id).await {
            Ok(Some(attrs)) => {
                if attrs != record.attrs {
                    tracing::debug!(resource = %id, "observed attributes drifted");
                    let mut updated = record.clone();
                    updated.attrs = attrs;
                    updated.updated_at = Utc::now();
                    state.insert(updated);
                    dirty = true;
                }
            }
            Ok(None) => {
                tracing::warn!(resource = %id, "remote object disappeared, dropping from state");
                state.remove(&id);
                dirty = true;
            }
            Err(e) if e.is_not_found() => {
                state.remove(&id);
                dirty = true;
            }
            Err(e) => return Err(e.into()),
        }
    }
    if dirty {
        manager.save(state).await?;
    }
    Ok(())
}

/// Fold a completed provider call into state. Destroy removes the record
/// only while it still points at the destroyed remote object, so the
/// destroy half of a create-before-destroy replacement leaves the
/// successor's record alone.
fn commit(item: &PlanItem, data: CommitData, state: &mut GlobalState) {
    match data {
        CommitData::Created {
            remote_id,
            attrs,
            inputs,
        } => {
            state.insert(
                ResourceRecord::new(item.resource.clone(), remote_id)
                    .with_inputs(inputs)
                    .with_attrs(attrs)
                    .with_dependencies(item.producers.clone()),
            );
        }
        CommitData::Updated {
            remote_id,
            attrs,
            inputs,
        } => {
            let created_at = state
                .get(&item.resource)
                .map(|r| r.created_at)
                .unwrap_or_else(Utc::now);
            let mut record = ResourceRecord::new(item.resource.clone(), remote_id)
                .with_inputs(inputs)
                .with_attrs(attrs)
                .with_dependencies(item.producers.clone());
            record.created_at = created_at;
            state.insert(record);
        }
        CommitData::Destroyed { remote_id } => {
            let still_current = state
                .get(&item.resource)
                .map(|r| r.remote_id == remote_id)
                .unwrap_or(false);
            if still_current {
                state.remove(&item.resource);
            }
        }
    }
}
