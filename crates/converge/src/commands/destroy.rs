use crate::commands::{self, Workspace};
use crate::render;
use colored::Colorize;
use converge_cloud::Executor;
use std::io::Write as _;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub async fn handle(root: &Path, parallelism: usize, yes: bool) -> anyhow::Result<()> {
    let ws = commands::open_empty(root).await?;
    let lock = ws.manager.acquire_lock().await?;
    let result = run(&ws, parallelism, yes).await;
    lock.release().await?;
    result
}

async fn run(ws: &Workspace, parallelism: usize, yes: bool) -> anyhow::Result<()> {
    let mut state = ws.manager.load().await?;
    if state.is_empty() {
        println!("{}", "Nothing to destroy.".green());
        return Ok(());
    }

    let plan = commands::compute_plan(ws, &state)?;
    render::print_plan(&plan);
    println!();

    if !yes && !confirm(state.len())? {
        println!("Aborted.");
        return Ok(());
    }

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
        anyhow::bail!("destroy finished with errors; state reflects everything that succeeded");
    }
    Ok(())
}

fn confirm(count: usize) -> anyhow::Result<bool> {
    print!(
        "{} resources will be destroyed. Type 'yes' to continue: ",
        count.to_string().red().bold()
    );
    std::io::stdout().flush()?;
    let mut answer = String::new();
    std::io::stdin().read_line(&mut answer)?;
    Ok(answer.trim() == "yes")
}
