//! Dependency graph construction
//!
//! Scans every declared attribute tree for references and builds the
//! directed graph used by the differ and the planner. Building is a pure
//! function of the declaration set: same input, same graph, same
//! topological order.

use crate::error::{CoreError, Result};
use crate::model::{DeclarationSet, ResourceId};
use std::collections::{BTreeSet, HashMap, HashSet};

/// Directed dependency graph over declared resources.
///
/// Edges point from the dependent resource to its producer. The stored
/// topological order lists producers before their dependents, with
/// declaration order as the tie-break.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    nodes: Vec<ResourceId>,
    index: HashMap<ResourceId, usize>,
    deps: Vec<BTreeSet<usize>>,
    dependents: Vec<BTreeSet<usize>>,
    topo: Vec<usize>,
}

impl DependencyGraph {
    /// Build the graph for a declaration set.
    ///
    /// Fails with [`CoreError::UnresolvedReference`] when a reference points
    /// at an undeclared identity and [`CoreError::CyclicDependency`] when the
    /// reference relation is not a DAG; the cycle members are reported.
    pub fn build(decls: &DeclarationSet) -> Result<Self> {
        decls.validate()?;

        let nodes: Vec<ResourceId> = decls.resources.iter().map(|d| d.id()).collect();
        let index: HashMap<ResourceId, usize> = nodes
            .iter()
            .enumerate()
            .map(|(i, id)| (id.clone(), i))
            .collect();

        let mut deps = vec![BTreeSet::new(); nodes.len()];
        let mut dependents = vec![BTreeSet::new(); nodes.len()];

        for (i, decl) in decls.resources.iter().enumerate() {
            for reference in decl.references() {
                let Some(&j) = index.get(&reference.target) else {
                    return Err(CoreError::UnresolvedReference {
                        referrer: nodes[i].to_string(),
                        target: reference.target.to_string(),
                    });
                };
                if i == j {
                    return Err(CoreError::CyclicDependency(vec![nodes[i].clone()]));
                }
                deps[i].insert(j);
                dependents[j].insert(i);
            }
        }

        let topo = toposort(&nodes, &deps, &dependents)?;
        tracing::debug!(
            resources = nodes.len(),
            edges = deps.iter().map(|d| d.len()).sum::<usize>(),
            "dependency graph built"
        );

        Ok(Self {
            nodes,
            index,
            deps,
            dependents,
            topo,
        })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    pub fn edge_count(&self) -> usize {
        self.deps.iter().map(|d| d.len()).sum()
    }

    /// All `(dependent, producer)` pairs.
    pub fn edges(&self) -> Vec<(&ResourceId, &ResourceId)> {
        let mut out = Vec::new();
        for (i, producers) in self.deps.iter().enumerate() {
            for &j in producers {
                out.push((&self.nodes[i], &self.nodes[j]));
            }
        }
        out
    }

    /// Producers this resource directly depends on.
    pub fn dependencies_of(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.index
            .get(id)
            .map(|&i| self.deps[i].iter().map(|&j| &self.nodes[j]).collect())
            .unwrap_or_default()
    }

    /// Resources that directly depend on this one.
    pub fn dependents_of(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.index
            .get(id)
            .map(|&i| self.dependents[i].iter().map(|&j| &self.nodes[j]).collect())
            .unwrap_or_default()
    }

    /// Identities in topological order, producers first.
    pub fn topo_order(&self) -> Vec<&ResourceId> {
        self.topo.iter().map(|&i| &self.nodes[i]).collect()
    }
}

/// Kahn's algorithm with a deterministic tie-break: among ready nodes the
/// lowest declaration index goes first.
fn toposort(
    nodes: &[ResourceId],
    deps: &[BTreeSet<usize>],
    dependents: &[BTreeSet<usize>],
) -> Result<Vec<usize>> {
    let mut indegree: Vec<usize> = deps.iter().map(|d| d.len()).collect();
    let mut ready: BTreeSet<usize> = indegree
        .iter()
        .enumerate()
        .filter(|&(_, &d)| d == 0)
        .map(|(i, _)| i)
        .collect();

    let mut order = Vec::with_capacity(nodes.len());
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

    if order.len() < nodes.len() {
        let done: HashSet<usize> = order.iter().copied().collect();
        return Err(CoreError::CyclicDependency(find_cycle(nodes, deps, &done)));
    }
    Ok(order)
}

/// Walk producer edges among unordered nodes until one repeats; the loop
/// slice is the cycle. Every unordered node still has an unordered producer,
/// so the walk cannot dead-end.
fn find_cycle(nodes: &[ResourceId], deps: &[BTreeSet<usize>], done: &HashSet<usize>) -> Vec<ResourceId> {
    let Some(start) = (0..nodes.len()).find(|i| !done.contains(i)) else {
        return Vec::new();
    };

    let mut seen_at: HashMap<usize, usize> = HashMap::new();
    let mut path = Vec::new();
    let mut current = start;
    loop {
        if let Some(&pos) = seen_at.get(&current) {
            return path[pos..].iter().map(|&i: &usize| nodes[i].clone()).collect();
        }
        seen_at.insert(current, path.len());
        path.push(current);
        match deps[current].iter().copied().find(|j| !done.contains(j)) {
            Some(next) => current = next,
            None => return path.iter().map(|&i| nodes[i].clone()).collect(),
        }
    }
}
