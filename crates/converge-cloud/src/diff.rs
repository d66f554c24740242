//! Declared-vs-observed diffing
//!
//! Computes, per resource identity, which action would converge the remote
//! side onto the declaration. Pure: reads declarations, state and schemas,
//! touches nothing.

use crate::action::ActionType;
use crate::error::{CloudError, Result};
use crate::provider::KindSchema;
use crate::state::GlobalState;
use converge_core::{AttrValue, DeclarationSet, DependencyGraph, ResourceId};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Outcome of comparing one identity's declared and observed state.
#[derive(Debug, Clone)]
pub struct ResourceDiff {
    pub resource: ResourceId,
    pub action: ActionType,
    /// Names of attributes that differ.
    pub changed: BTreeSet<String>,
}

/// Sentinel for values that cannot be known until apply time.
struct Unknown;

/// Diff every declared identity (in topological order) and every state-only
/// identity (destroys, in state order).
///
/// An attribute backed by a reference resolves against the producer's
/// recorded attributes; when the producer is absent from state or itself
/// planned for Create/Replace the value is unknown and counts as changed.
/// Processing in topological order lets replacements cascade through
/// replacement-triggering attributes in a single pass. When an attribute
/// diff hits both a mutable and a replace-on-change field, Replace wins.
pub fn diff(
    decls: &DeclarationSet,
    graph: &DependencyGraph,
    state: &GlobalState,
    schemas: &HashMap<String, KindSchema>,
) -> Result<Vec<ResourceDiff>> {
    let mut diffs = Vec::new();
    let mut pending_new: HashSet<ResourceId> = HashSet::new();

    for id in graph.topo_order() {
        let Some(decl) = decls.get(id) else { continue };
        let schema = schemas
            .get(&decl.kind)
            .ok_or_else(|| CloudError::ProviderNotFound(decl.kind.clone()))?;

        let diff = match state.get(id) {
            None => {
                pending_new.insert(id.clone());
                ResourceDiff {
                    resource: id.clone(),
                    action: ActionType::Create,
                    changed: decl.attrs.keys().cloned().collect(),
                }
            }
            Some(record) => {
                let mut changed = BTreeSet::new();
                for (name, value) in &decl.attrs {
                    match resolve_desired(value, state, &pending_new) {
                        Ok(desired) => {
                            if record.inputs.get(name) != Some(&desired) {
                                changed.insert(name.clone());
                            }
                        }
                        Err(Unknown) => {
                            changed.insert(name.clone());
                        }
                    }
                }
                // An attribute dropped from the declaration is also a change.
                for name in record.inputs.keys() {
                    if !decl.attrs.contains_key(name) {
                        changed.insert(name.clone());
                    }
                }

                let action = if changed.is_empty() {
                    ActionType::NoOp
                } else if changed.iter().any(|n| schema.requires_replacement(n)) {
                    pending_new.insert(id.clone());
                    ActionType::Replace
                } else {
                    ActionType::Update
                };
                ResourceDiff {
                    resource: id.clone(),
                    action,
                    changed,
                }
            }
        };
        tracing::debug!(resource = %diff.resource, action = %diff.action, "diffed");
        diffs.push(diff);
    }

    for record in state.records() {
        if decls.contains(&record.resource) {
            continue;
        }
        // The executor will need an adapter to destroy it.
        if !schemas.contains_key(&record.resource.kind) {
            return Err(CloudError::ProviderNotFound(record.resource.kind.clone()));
        }
        tracing::debug!(resource = %record.resource, "no longer declared, destroying");
        diffs.push(ResourceDiff {
            resource: record.resource.clone(),
            action: ActionType::Destroy,
            changed: BTreeSet::new(),
        });
    }

    Ok(diffs)
}

fn resolve_desired(
    value: &AttrValue,
    state: &GlobalState,
    pending_new: &HashSet<ResourceId>,
) -> std::result::Result<serde_json::Value, Unknown> {
    value.resolve_with(&mut |reference| {
        if pending_new.contains(&reference.target) {
            return Err(Unknown);
        }
        let record = state.get(&reference.target).ok_or(Unknown)?;
        record.lookup(&reference.attribute).cloned().ok_or(Unknown)
    })
}
