//! Plan construction
//!
//! Turns per-resource diffs into a linear execution plan: a deterministic
//! topological order over the item dependency graph, with replacement pairs
//! expanded and destroys of no-longer-declared resources sequenced by the
//! dependencies recorded in state.

use crate::action::{ActionType, Plan, PlanItem};
use crate::diff::ResourceDiff;
use crate::error::{CloudError, Result};
use crate::state::GlobalState;
use converge_core::{DeclarationSet, DependencyGraph, ResourceId};
use std::collections::{BTreeSet, HashMap};

/// Order the diffed actions into an executable plan.
///
/// Guarantees:
/// - a Create/Update runs after the Create/Update of every producer;
/// - a Destroy runs after everything that depended on the resource (per
///   state records) has been destroyed or repointed;
/// - a replacement becomes Destroy-then-Create, or Create-then-Destroy for
///   resources marked `create_before_destroy`;
/// - ties break on declaration order (state order for destroys), so the
///   same inputs always produce the same plan.
///
/// A cycle in the item graph cannot arise from a valid DAG and reports
/// [`CloudError::PlanConflict`].
pub fn plan(
    decls: &DeclarationSet,
    graph: &DependencyGraph,
    diffs: &[ResourceDiff],
    state: &GlobalState,
) -> Result<Plan> {
    let diff_by_id: HashMap<&ResourceId, &ResourceDiff> =
        diffs.iter().map(|d| (&d.resource, d)).collect();

    let mut items: Vec<PlanItem> = Vec::new();
    let mut forward_item: HashMap<ResourceId, usize> = HashMap::new();
    let mut destroy_item: HashMap<ResourceId, usize> = HashMap::new();

    // Destroys of no-longer-declared resources seed the order first.
    for diff in diffs {
        if diff.action != ActionType::Destroy {
            continue;
        }
        let record = state
            .get(&diff.resource)
            .ok_or_else(|| CloudError::ResourceNotFound(diff.resource.to_string()))?;
        let mut item = PlanItem::new(diff.resource.clone(), ActionType::Destroy);
        item.remote_id = Some(record.remote_id.clone());
        destroy_item.insert(diff.resource.clone(), items.len());
        items.push(item);
    }

    // Declared resources in declaration order.
    for decl in &decls.resources {
        let id = decl.id();
        let Some(diff) = diff_by_id.get(&id) else {
            continue;
        };
        match diff.action {
            ActionType::NoOp => {
                items.push(PlanItem::new(id, ActionType::NoOp));
            }
            ActionType::Create => {
                let mut item = PlanItem::new(id.clone(), ActionType::Create);
                item.attrs = Some(decl.attrs.clone());
                item.producers = decl.depends_on().into_iter().collect();
                forward_item.insert(id, items.len());
                items.push(item);
            }
            ActionType::Update => {
                let record = state
                    .get(&id)
                    .ok_or_else(|| CloudError::ResourceNotFound(id.to_string()))?;
                let mut item = PlanItem::new(id.clone(), ActionType::Update);
                item.attrs = Some(decl.attrs.clone());
                item.remote_id = Some(record.remote_id.clone());
                item.producers = decl.depends_on().into_iter().collect();
                forward_item.insert(id, items.len());
                items.push(item);
            }
            ActionType::Replace => {
                let record = state
                    .get(&id)
                    .ok_or_else(|| CloudError::ResourceNotFound(id.to_string()))?;
                let mut destroy = PlanItem::new(id.clone(), ActionType::Destroy);
                destroy.remote_id = Some(record.remote_id.clone());
                destroy.replace = true;
                let mut create = PlanItem::new(id.clone(), ActionType::Create);
                create.attrs = Some(decl.attrs.clone());
                create.producers = decl.depends_on().into_iter().collect();
                create.replace = true;

                if decl.lifecycle.create_before_destroy {
                    let ci = items.len();
                    items.push(create);
                    let di = items.len();
                    items.push(destroy);
                    items[di].depends_on.push(ci);
                    forward_item.insert(id.clone(), ci);
                    destroy_item.insert(id, di);
                } else {
                    let di = items.len();
                    items.push(destroy);
                    let ci = items.len();
                    items.push(create);
                    items[ci].depends_on.push(di);
                    forward_item.insert(id.clone(), ci);
                    destroy_item.insert(id, di);
                }
            }
            // State-only identities were handled in the seed pass.
            ActionType::Destroy => {}
        }
    }

    // Forward edges: dependents wait for their producers' Create/Update.
    let mut edges: Vec<(usize, usize)> = Vec::new();
    for decl in &decls.resources {
        let id = decl.id();
        let Some(&fi) = forward_item.get(&id) else {
            continue;
        };
        for producer in graph.dependencies_of(&id) {
            if let Some(&fp) = forward_item.get(producer) {
                edges.push((fi, fp));
            }
        }
    }

    // Destroy edges: a resource goes away only after everything that
    // depended on it (per state records) has been destroyed or repointed.
    for di in 0..items.len() {
        if items[di].action != ActionType::Destroy {
            continue;
        }
        let id = items[di].resource.clone();
        for record in state.records() {
            if record.resource == id || !record.dependencies.contains(&id) {
                continue;
            }
            if let Some(&ds) = destroy_item.get(&record.resource) {
                if ds != di {
                    edges.push((di, ds));
                }
            } else if let Some(&fs) = forward_item.get(&record.resource) {
                // Only when the declaration dropped the reference; a
                // dependent that still references the identity waits on the
                // successor instead.
                let still_declared = graph
                    .dependencies_of(&record.resource)
                    .into_iter()
                    .any(|p| p == &id);
                if items[fs].action == ActionType::Update && !still_declared {
                    edges.push((di, fs));
                }
            }
        }
    }

    for (from, to) in edges {
        items[from].depends_on.push(to);
    }
    for item in &mut items {
        item.depends_on.sort_unstable();
        item.depends_on.dedup();
    }

    let order = toposort_items(&items)?;

    let mut new_index = vec![0usize; items.len()];
    for (pos, &old) in order.iter().enumerate() {
        new_index[old] = pos;
    }
    let mut final_items = Vec::with_capacity(items.len());
    for &old in &order {
        let mut item = items[old].clone();
        item.depends_on = item.depends_on.iter().map(|&d| new_index[d]).collect();
        item.depends_on.sort_unstable();
        final_items.push(item);
    }

    // Defensive: the linear order must satisfy every edge.
    for (i, item) in final_items.iter().enumerate() {
        if item.depends_on.iter().any(|&d| d >= i) {
            return Err(CloudError::PlanConflict(format!(
                "ordering constraint violated for {}",
                item.resource
            )));
        }
    }

    let plan = Plan::new(final_items);
    tracing::debug!(items = plan.len(), "plan computed: {}", plan.summary());
    Ok(plan)
}

/// Kahn's algorithm over plan items; ties break on seed index, which keeps
/// destroys of undeclared resources early and declared work in declaration
/// order.
fn toposort_items(items: &[PlanItem]) -> Result<Vec<usize>> {
    let n = items.len();
    let mut indegree = vec![0usize; n];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (i, item) in items.iter().enumerate() {
        indegree[i] = item.depends_on.len();
        for &d in &item.depends_on {
            dependents[d].push(i);
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(&i) = ready.iter().next() {
        ready.remove(&i);
        order.push(i);
        for &j in &dependents[i] {
            indegree[j] -= 1;
            if indegree[j] == 0 {
                ready.insert(j);
            }
        }
    }

    if order.len() < n {
        return Err(CloudError::PlanConflict(format!(
            "{} of {} actions could not be ordered",
            n - order.len(),
            n
        )));
    }
    Ok(order)
}
