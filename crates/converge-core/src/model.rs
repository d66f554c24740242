//! Declared resource model
//!
//! A declaration set is the parsed, in-memory form of a configuration
//! document: resources with attribute trees (literals and references to
//! other resources' attributes) plus output declarations. It is immutable
//! for the duration of one plan/apply cycle.

use crate::error::{CoreError, Result};
use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Identity of a declared resource: `(kind, local name)`.
///
/// Rendered as `kind.name`, which is also the key format used by the state
/// store.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceId {
    pub kind: String,
    pub name: String,
}

impl ResourceId {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.kind, self.name)
    }
}

impl FromStr for ResourceId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once('.') {
            Some((kind, name)) if !kind.is_empty() && !name.is_empty() => {
                Ok(Self::new(kind, name))
            }
            _ => Err(CoreError::InvalidConfig(format!(
                "invalid resource identity '{s}', expected 'kind.name'"
            ))),
        }
    }
}

/// A dependency edge: this attribute takes its value from `target`'s
/// output attribute at `attribute`.
///
/// Serialized as `{"$ref": "kind.name.attribute"}` so references survive a
/// round trip through the declaration document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub target: ResourceId,
    pub attribute: String,
}

impl Reference {
    pub fn new(target: ResourceId, attribute: impl Into<String>) -> Self {
        Self {
            target,
            attribute: attribute.into(),
        }
    }

    /// Parse the `kind.name.attribute` form. The attribute part may itself
    /// contain dots (nested lookup path).
    pub fn parse(s: &str) -> Result<Self> {
        let mut parts = s.splitn(3, '.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(kind), Some(name), Some(attribute))
                if !kind.is_empty() && !name.is_empty() && !attribute.is_empty() =>
            {
                Ok(Self::new(ResourceId::new(kind, name), attribute))
            }
            _ => Err(CoreError::InvalidConfig(format!(
                "invalid reference '{s}', expected 'kind.name.attribute'"
            ))),
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.target, self.attribute)
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("$ref", &self.to_string())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        struct Repr {
            #[serde(rename = "$ref")]
            reference: String,
        }
        let repr = Repr::deserialize(deserializer)?;
        Reference::parse(&repr.reference).map_err(D::Error::custom)
    }
}

/// An attribute value tree.
///
/// References may appear at any depth, e.g. a list of security group ids on
/// an instance. Variant order matters for the untagged deserializer: an
/// object carrying `$ref` becomes a [`Reference`], any other object a
/// [`AttrValue::Map`], arrays a [`AttrValue::List`] and scalars a
/// [`AttrValue::Literal`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Reference(Reference),
    List(Vec<AttrValue>),
    Map(BTreeMap<String, AttrValue>),
    Literal(serde_json::Value),
}

impl AttrValue {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn reference(
        kind: impl Into<String>,
        name: impl Into<String>,
        attribute: impl Into<String>,
    ) -> Self {
        Self::Reference(Reference::new(ResourceId::new(kind, name), attribute))
    }

    /// Collect every reference in the tree, depth first.
    pub fn references<'a>(&'a self, out: &mut Vec<&'a Reference>) {
        match self {
            AttrValue::Reference(r) => out.push(r),
            AttrValue::List(items) => {
                for item in items {
                    item.references(out);
                }
            }
            AttrValue::Map(entries) => {
                for value in entries.values() {
                    value.references(out);
                }
            }
            AttrValue::Literal(_) => {}
        }
    }

    /// Collapse the tree into a plain JSON value, resolving each reference
    /// through `resolve`. The first resolver error aborts the walk.
    pub fn resolve_with<E, F>(&self, resolve: &mut F) -> std::result::Result<serde_json::Value, E>
    where
        F: FnMut(&Reference) -> std::result::Result<serde_json::Value, E>,
    {
        match self {
            AttrValue::Literal(v) => Ok(v.clone()),
            AttrValue::Reference(r) => resolve(r),
            AttrValue::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(item.resolve_with(resolve)?);
                }
                Ok(serde_json::Value::Array(out))
            }
            AttrValue::Map(entries) => {
                let mut out = serde_json::Map::new();
                for (key, value) in entries {
                    out.insert(key.clone(), value.resolve_with(resolve)?);
                }
                Ok(serde_json::Value::Object(out))
            }
        }
    }
}

/// Per-resource lifecycle switches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lifecycle {
    /// When replacing, create the successor before destroying the old
    /// resource. Default is destroy-before-create.
    #[serde(default)]
    pub create_before_destroy: bool,
}

/// One declared resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDecl {
    pub kind: String,
    pub name: String,

    #[serde(default)]
    pub attrs: BTreeMap<String, AttrValue>,

    #[serde(default)]
    pub lifecycle: Lifecycle,
}

impl ResourceDecl {
    pub fn new(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            attrs: BTreeMap::new(),
            lifecycle: Lifecycle::default(),
        }
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: AttrValue) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    pub fn with_create_before_destroy(mut self) -> Self {
        self.lifecycle.create_before_destroy = true;
        self
    }

    pub fn id(&self) -> ResourceId {
        ResourceId::new(self.kind.clone(), self.name.clone())
    }

    /// Every reference appearing anywhere in this resource's attributes.
    pub fn references(&self) -> Vec<&Reference> {
        let mut out = Vec::new();
        for value in self.attrs.values() {
            value.references(&mut out);
        }
        out
    }

    /// Identities of the resources this declaration depends on.
    pub fn depends_on(&self) -> BTreeSet<ResourceId> {
        self.references()
            .into_iter()
            .map(|r| r.target.clone())
            .collect()
    }
}

/// A declared output: a named, possibly sensitive view onto one resource
/// attribute, resolved after a successful apply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputDecl {
    pub name: String,
    pub source: Reference,

    #[serde(default)]
    pub sensitive: bool,
}

/// The parsed declaration document: resources in declaration order plus
/// outputs. Declaration order is the deterministic tie-break for planning.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeclarationSet {
    #[serde(default)]
    pub resources: Vec<ResourceDecl>,

    #[serde(default)]
    pub outputs: Vec<OutputDecl>,
}

impl DeclarationSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, resource: ResourceDecl) {
        self.resources.push(resource);
    }

    pub fn get(&self, id: &ResourceId) -> Option<&ResourceDecl> {
        self.resources.iter().find(|r| &r.id() == id)
    }

    pub fn contains(&self, id: &ResourceId) -> bool {
        self.get(id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Structural validation that does not need the dependency graph:
    /// identity syntax, duplicate identities, output sources pointing at
    /// declared resources.
    pub fn validate(&self) -> Result<()> {
        let mut seen = BTreeSet::new();
        for decl in &self.resources {
            if decl.kind.is_empty() || decl.name.is_empty() {
                return Err(CoreError::InvalidConfig(format!(
                    "resource with empty kind or name: '{}.{}'",
                    decl.kind, decl.name
                )));
            }
            if decl.kind.contains('.') || decl.name.contains('.') {
                return Err(CoreError::InvalidConfig(format!(
                    "'.' is not allowed in resource kind or name: '{}.{}'",
                    decl.kind, decl.name
                )));
            }
            if !seen.insert(decl.id()) {
                return Err(CoreError::DuplicateResource(decl.id().to_string()));
            }
        }
        for output in &self.outputs {
            if output.name.is_empty() {
                return Err(CoreError::InvalidConfig("output with empty name".into()));
            }
            if !seen.contains(&output.source.target) {
                return Err(CoreError::UnresolvedReference {
                    referrer: format!("output.{}", output.name),
                    target: output.source.target.to_string(),
                });
            }
        }
        Ok(())
    }
}
