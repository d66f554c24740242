//! Declaration document loading
//!
//! The engine consumes an already-parsed [`DeclarationSet`]; this module is
//! the thin serde boundary that gets one from a JSON document on disk.

use crate::error::Result;
use crate::model::DeclarationSet;
use std::path::Path;

/// Parse and validate a declaration document.
pub fn parse_declarations(content: &str) -> Result<DeclarationSet> {
    let decls: DeclarationSet = serde_json::from_str(content)?;
    decls.validate()?;
    Ok(decls)
}

/// Load a declaration document from a file.
pub fn load_declarations(path: impl AsRef<Path>) -> Result<DeclarationSet> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;
    let decls = parse_declarations(&content)?;
    tracing::debug!(
        path = %path.display(),
        resources = decls.resources.len(),
        outputs = decls.outputs.len(),
        "declarations loaded"
    );
    Ok(decls)
}
