use crate::commands;
use crate::render;
use converge_cloud::resolve_outputs;
use std::path::Path;

pub async fn handle(root: &Path, file: &Path, json: bool) -> anyhow::Result<()> {
    let ws = commands::open(root, file).await?;
    let state = ws.manager.load().await?;
    let outputs = resolve_outputs(&ws.decls.outputs, &state)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
        return Ok(());
    }

    if outputs.is_empty() {
        println!("No outputs declared.");
        return Ok(());
    }
    render::print_outputs(&outputs);
    Ok(())
}
