pub mod apply;
pub mod destroy;
pub mod outputs;
pub mod plan;

use anyhow::Context as _;
use converge_cloud::{GlobalState, Plan, ProviderRegistry, StateManager};
use converge_cloud_local::LocalCloud;
use converge_core::{DeclarationSet, DependencyGraph};
use std::path::Path;
use std::sync::Arc;

/// Everything a command needs for one run.
pub struct Workspace {
    pub decls: DeclarationSet,
    pub manager: StateManager,
    pub registry: Arc<ProviderRegistry>,
}

/// Open the project: declarations, state manager and the sandbox provider
/// registry.
pub async fn open(root: &Path, file: &Path) -> anyhow::Result<Workspace> {
    let path = if file.is_absolute() {
        file.to_path_buf()
    } else {
        root.join(file)
    };
    let decls = converge_core::load_declarations(&path)
        .with_context(|| format!("loading declarations from {}", path.display()))?;
    Ok(Workspace {
        decls,
        manager: StateManager::new(root),
        registry: registry(root).await?,
    })
}

/// Open the project with an empty declaration set (destroy).
pub async fn open_empty(root: &Path) -> anyhow::Result<Workspace> {
    Ok(Workspace {
        decls: DeclarationSet::default(),
        manager: StateManager::new(root),
        registry: registry(root).await?,
    })
}

async fn registry(root: &Path) -> anyhow::Result<Arc<ProviderRegistry>> {
    let cloud = Arc::new(LocalCloud::open(root).await?);
    let mut registry = ProviderRegistry::new();
    converge_cloud_local::register_defaults(&mut registry, cloud);
    Ok(Arc::new(registry))
}

/// Plan phase shared by plan, apply and destroy.
pub fn compute_plan(ws: &Workspace, state: &GlobalState) -> anyhow::Result<Plan> {
    let graph = DependencyGraph::build(&ws.decls)?;
    let diffs = converge_cloud::diff(&ws.decls, &graph, state, &ws.registry.schemas())?;
    Ok(converge_cloud::plan(&ws.decls, &graph, &diffs, state)?)
}
