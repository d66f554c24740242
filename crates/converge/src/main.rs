mod commands;
mod render;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "converge")]
#[command(about = "Declare cloud resources, plan the difference, apply it safely", version)]
struct Cli {
    /// Project root holding the declaration file and state
    #[arg(short = 'C', long, global = true, default_value = ".")]
    chdir: PathBuf,

    /// Declaration file, relative to the project root
    #[arg(
        short,
        long,
        global = true,
        default_value = "converge.json",
        env = "CONVERGE_FILE"
    )]
    file: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show what an apply would change
    Plan {
        /// Render the full plan as JSON
        #[arg(long)]
        json: bool,
        /// Re-read remote objects before diffing
        #[arg(long)]
        refresh: bool,
    },
    /// Apply the declared configuration
    Apply {
        /// Maximum provider calls in flight at once
        #[arg(short, long, default_value_t = 4)]
        parallelism: usize,
        /// Re-read remote objects before diffing
        #[arg(long)]
        refresh: bool,
    },
    /// Destroy every resource tracked in state
    Destroy {
        /// Maximum provider calls in flight at once
        #[arg(short, long, default_value_t = 4)]
        parallelism: usize,
        /// Skip the confirmation prompt
        #[arg(short, long)]
        yes: bool,
    },
    /// Show outputs resolved from the last apply
    Outputs {
        /// Render raw values as JSON (sensitive values included)
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Plan { json, refresh } => {
            commands::plan::handle(&cli.chdir, &cli.file, json, refresh).await
        }
        Commands::Apply {
            parallelism,
            refresh,
        } => commands::apply::handle(&cli.chdir, &cli.file, parallelism, refresh).await,
        Commands::Destroy { parallelism, yes } => {
            commands::destroy::handle(&cli.chdir, parallelism, yes).await
        }
        Commands::Outputs { json } => commands::outputs::handle(&cli.chdir, &cli.file, json).await,
    }
}
