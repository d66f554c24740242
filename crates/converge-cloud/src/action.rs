//! Plan and action types

use converge_core::{AttrValue, ResourceId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Action bound to a resource by the differ or a plan item.
///
/// `Replace` only appears in diff results; the planner expands it into a
/// Destroy/Create pair, so a finished [`Plan`] never contains it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    /// Create a new resource
    Create,
    /// Update an existing resource in place
    Update,
    /// Destroy and recreate (diff-level only)
    Replace,
    /// Destroy a resource
    Destroy,
    /// No changes needed
    NoOp,
}

impl ActionType {
    pub fn is_mutation(&self) -> bool {
        !matches!(self, ActionType::NoOp)
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActionType::Create => write!(f, "create"),
            ActionType::Update => write!(f, "update"),
            ActionType::Replace => write!(f, "replace"),
            ActionType::Destroy => write!(f, "destroy"),
            ActionType::NoOp => write!(f, "no-op"),
        }
    }
}

/// One step of an execution plan.
///
/// `depends_on` holds indices of items that must commit before this one may
/// start; the linear order of [`Plan::items`] is itself one valid
/// topological order of those edges, so a sequential walk is always safe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanItem {
    pub resource: ResourceId,

    pub action: ActionType,

    /// Desired attributes, references still pending resolution. Present for
    /// Create and Update.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attrs: Option<BTreeMap<String, AttrValue>>,

    /// Remote id snapshot taken at plan time. Present for Update and
    /// Destroy; for the destroy half of a replacement this pins the old
    /// object even after the successor has overwritten the state record.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,

    /// Producer identities, recorded into state when this item commits.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub producers: Vec<ResourceId>,

    /// Indices of items that must complete before this one starts.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<usize>,

    /// Set on both halves of a replacement pair.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub replace: bool,
}

impl PlanItem {
    pub fn new(resource: ResourceId, action: ActionType) -> Self {
        Self {
            resource,
            action,
            attrs: None,
            remote_id: None,
            producers: Vec::new(),
            depends_on: Vec::new(),
            replace: false,
        }
    }
}

/// Plan containing all items to be applied, in execution order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub items: Vec<PlanItem>,
}

impl Plan {
    pub fn new(items: Vec<PlanItem>) -> Self {
        Self { items }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Whether applying this plan would touch anything.
    pub fn has_changes(&self) -> bool {
        self.items.iter().any(|i| i.action.is_mutation())
    }

    pub fn actions_by_type(&self, action: ActionType) -> Vec<&PlanItem> {
        self.items.iter().filter(|i| i.action == action).collect()
    }

    pub fn summary(&self) -> PlanSummary {
        PlanSummary {
            create: self.actions_by_type(ActionType::Create).len(),
            update: self.actions_by_type(ActionType::Update).len(),
            destroy: self.actions_by_type(ActionType::Destroy).len(),
            unchanged: self.actions_by_type(ActionType::NoOp).len(),
        }
    }
}

/// Summary of planned actions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub destroy: usize,
    pub unchanged: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to destroy, {} unchanged",
            self.create, self.update, self.destroy, self.unchanged
        )
    }
}
