//! The simulated cloud
//!
//! A single JSON document under `.converge/cloud.json` plays the remote
//! side: object storage per kind, a serial counter for id allocation.
//! Every mutation persists the document, so a sandbox survives across CLI
//! invocations the same way a real cloud would.

use crate::error::Result;
use converge_cloud::Attrs;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;

const CLOUD_DIR: &str = ".converge";
const CLOUD_FILE: &str = "cloud.json";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CloudDoc {
    serial: u64,

    /// kind -> remote id -> attributes
    resources: BTreeMap<String, BTreeMap<String, Attrs>>,
}

/// Handle on the sandbox document.
pub struct LocalCloud {
    path: PathBuf,
    doc: Mutex<CloudDoc>,
}

impl LocalCloud {
    /// Open (or start) the sandbox under a project root.
    pub async fn open(project_root: impl AsRef<Path>) -> Result<Self> {
        let path = project_root.as_ref().join(CLOUD_DIR).join(CLOUD_FILE);
        let doc = if path.exists() {
            let content = fs::read_to_string(&path).await?;
            serde_json::from_str(&content)?
        } else {
            CloudDoc::default()
        };
        Ok(Self {
            path,
            doc: Mutex::new(doc),
        })
    }

    async fn persist(&self, doc: &CloudDoc) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.exists() {
                fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_json::to_string_pretty(doc)?;
        fs::write(&self.path, content).await?;
        Ok(())
    }

    /// Allocate the next remote id for a kind prefix, e.g. `net-000007`.
    pub async fn allocate(&self, prefix: &str) -> Result<(String, u64)> {
        let mut doc = self.doc.lock().await;
        doc.serial += 1;
        let serial = doc.serial;
        let remote_id = format!("{prefix}-{serial:06}");
        self.persist(&doc).await?;
        Ok((remote_id, serial))
    }

    pub async fn put(&self, kind: &str, remote_id: &str, attrs: Attrs) -> Result<()> {
        let mut doc = self.doc.lock().await;
        doc.resources
            .entry(kind.to_string())
            .or_default()
            .insert(remote_id.to_string(), attrs);
        self.persist(&doc).await
    }

    pub async fn get(&self, kind: &str, remote_id: &str) -> Option<Attrs> {
        let doc = self.doc.lock().await;
        doc.resources
            .get(kind)
            .and_then(|objects| objects.get(remote_id))
            .cloned()
    }

    /// Remove an object; false when it was already gone.
    pub async fn remove(&self, kind: &str, remote_id: &str) -> Result<bool> {
        let mut doc = self.doc.lock().await;
        let removed = doc
            .resources
            .get_mut(kind)
            .and_then(|objects| objects.remove(remote_id))
            .is_some();
        if removed {
            self.persist(&doc).await?;
        }
        Ok(removed)
    }

    /// Number of live objects of a kind.
    pub async fn count(&self, kind: &str) -> usize {
        let doc = self.doc.lock().await;
        doc.resources.get(kind).map(|m| m.len()).unwrap_or(0)
    }
}
