use crate::commands::{self, Workspace};
use crate::render;
use colored::Colorize;
use converge_cloud::{Executor, refresh_state, resolve_outputs};
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub async fn handle(
    root: &Path,
    file: &Path,
    parallelism: usize,
    refresh: bool,
) -> anyhow::Result<()> {
    let ws = commands::open(root, file).await?;
    let lock = ws.manager.acquire_lock().await?;
    let result = run(&ws, parallelism, refresh).await;
    lock.release().await?;
    result
}

async fn run(ws: &Workspace, parallelism: usize, refresh: bool) -> anyhow::Result<()> {
    let mut state = ws.manager.load().await?;
    if refresh {
        refresh_state(&ws.registry, &mut state, &ws.manager).await?;
    }
    let plan = commands::compute_plan(ws, &state)?;

    if !plan.has_changes() {
        println!("{}", "No changes. Infrastructure is up to date.".green());
        return Ok(());
    }
    render::print_plan(&plan);
    println!();

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, letting in-flight operations finish");
                cancel.cancel();
            }
        });
    }

    let report = Executor::new(ws.registry.clone())
        .with_max_parallel(parallelism)
        .with_cancellation(cancel)
        .apply(&plan, &mut state, &ws.manager)
        .await?;
    render::print_report(&report);

    if !report.is_success() {
        anyhow::bail!("apply finished with errors; state reflects everything that succeeded");
    }

    let outputs = resolve_outputs(&ws.decls.outputs, &state)?;
    if !outputs.is_empty() {
        println!();
        render::print_outputs(&outputs);
    }
    Ok(())
}
