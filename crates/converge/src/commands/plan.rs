use crate::commands;
use crate::render;
use colored::Colorize;
use converge_cloud::refresh_state;
use std::path::Path;

pub async fn handle(root: &Path, file: &Path, json: bool, refresh: bool) -> anyhow::Result<()> {
    let ws = commands::open(root, file).await?;
    let mut state = ws.manager.load().await?;
    if refresh {
        refresh_state(&ws.registry, &mut state, &ws.manager).await?;
    }
    let plan = commands::compute_plan(&ws, &state)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&plan)?);
        return Ok(());
    }

    if !plan.has_changes() {
        println!("{}", "No changes. Infrastructure is up to date.".green());
        return Ok(());
    }
    render::print_plan(&plan);
    Ok(())
}
