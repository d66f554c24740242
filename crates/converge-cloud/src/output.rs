//! Output resolution
//!
//! After a fully successful apply, declared outputs resolve against final
//! observed state. Sensitive values stay available in the structured form
//! but never show up in a default rendering — `Display` and `Debug` both
//! redact them.

use crate::error::{CloudError, Result};
use crate::state::GlobalState;
use converge_core::OutputDecl;
use serde::{Deserialize, Serialize};
use std::fmt;

pub const REDACTED: &str = "(sensitive)";

/// One resolved output.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputValue {
    pub name: String,
    pub value: serde_json::Value,
    pub sensitive: bool,
}

impl OutputValue {
    /// Rendering-safe form of the value.
    pub fn display_value(&self) -> String {
        if self.sensitive {
            return REDACTED.to_string();
        }
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for OutputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.name, self.display_value())
    }
}

impl fmt::Debug for OutputValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value: &dyn fmt::Debug = if self.sensitive { &REDACTED } else { &self.value };
        f.debug_struct("OutputValue")
            .field("name", &self.name)
            .field("value", value)
            .field("sensitive", &self.sensitive)
            .finish()
    }
}

/// All resolved outputs of one apply.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct OutputSet {
    pub outputs: Vec<OutputValue>,
}

impl OutputSet {
    pub fn get(&self, name: &str) -> Option<&OutputValue> {
        self.outputs.iter().find(|o| o.name == name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &OutputValue> {
        self.outputs.iter()
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }
}

impl fmt::Display for OutputSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for output in &self.outputs {
            writeln!(f, "{output}")?;
        }
        Ok(())
    }
}

/// Resolve every declared output against final state.
pub fn resolve_outputs(decls: &[OutputDecl], state: &GlobalState) -> Result<OutputSet> {
    let mut outputs = Vec::with_capacity(decls.len());
    for decl in decls {
        let record = state
            .get(&decl.source.target)
            .ok_or_else(|| CloudError::ResourceNotFound(decl.source.target.to_string()))?;
        let value = record.lookup(&decl.source.attribute).cloned().ok_or_else(|| {
            CloudError::MissingAttribute {
                resource: decl.source.target.to_string(),
                attribute: decl.source.attribute.clone(),
            }
        })?;
        outputs.push(OutputValue {
            name: decl.name.clone(),
            value,
            sensitive: decl.sensitive,
        });
    }
    Ok(OutputSet { outputs })
}
