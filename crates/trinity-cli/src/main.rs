mod cli;
mod commands;
mod error;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands, FoundationCommands, PatternCommands, WorkflowCommands};
use tracing_appender::non_blocking::WorkerGuard;

fn init_logging(verbose: bool) -> Option<WorkerGuard> {
    let level = if verbose { "debug" } else { "info" };

    if let Ok(state_dir) = trinity_storage::paths::ensure_state_dir() {
        let log_dir = state_dir.join("logs");
        if std::fs::create_dir_all(&log_dir).is_ok() {
            let file_appender = tracing_appender::rolling::daily(log_dir, "trinity.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .with_level(true)
                .with_env_filter(level)
                .init();
            return Some(guard);
        }
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_level(true)
        .with_env_filter(level)
        .init();
    None
}

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error::handle_error(err);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    if let Some(dir) = &cli.dir {
        // SAFETY: set before any worker threads read the environment.
        unsafe { std::env::set_var("TRINITY_DIR", dir) };
    }
    let _log_guard = init_logging(cli.verbose);

    match cli.command {
        Commands::Run => commands::run::run().await,
        Commands::Workflow { command } => match command {
            WorkflowCommands::List => commands::workflow::list(cli.format).await,
            WorkflowCommands::Status { id } => commands::workflow::status(&id, cli.format).await,
            WorkflowCommands::Resume { id } => commands::workflow::resume(&id, cli.format).await,
        },
        Commands::Foundation { command } => match command {
            FoundationCommands::Verify => commands::foundation::verify(cli.format).await,
        },
        Commands::Pattern { command } => match command {
            PatternCommands::Search { query, limit } => {
                commands::pattern::search(&query, limit, cli.format).await
            }
        },
    }
}
