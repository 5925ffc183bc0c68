mod context;
mod inbox;
mod index;
mod logging;
mod logs;
mod metrics;
mod runner;
mod task;

use anyhow::Result;
use clap::{Parser, Subcommand};
use context::CockpitContext;
use inbox::InboxArgs;
use index::IndexCommand;
use logs::LogsCommand;
use metrics::MetricsCommand;
use runner::ManageTestsArgs;
use std::path::PathBuf;
use std::process::ExitCode;
use task::TaskCommand;
use tracing::debug;

#[derive(Parser)]
#[command(name = "cockpit")]
#[command(about = "Developer cockpit core tools", long_about = None)]
struct Cli {
    /// Workspace root; overrides COCKPIT_WORKSPACE_ROOT
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,
    #[arg(long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build and query the repository content index
    Index {
        #[command(subcommand)]
        action: IndexCommand,
    },
    /// Run the test suite headless
    ManageTests(ManageTestsArgs),
    /// Validate the logic inbox
    Inbox(InboxArgs),
    /// Manage journaled tasks
    Task {
        #[command(subcommand)]
        action: TaskCommand,
    },
    /// Script health metrics
    Metrics {
        #[command(subcommand)]
        action: MetricsCommand,
    },
    /// Classify log files
    Logs {
        #[command(subcommand)]
        action: LogsCommand,
    },
}

fn main() -> ExitCode {
    // Usage errors exit with status 2 here.
    let cli = Cli::parse();

    let ctx = match CockpitContext::open(cli.workspace.as_deref()) {
        Ok(ctx) => ctx,
        Err(err) => {
            eprintln!("Error: {err:#}");
            return ExitCode::from(1);
        }
    };
    let _log_guard = logging::init_logging(&ctx, cli.debug);

    match run(&ctx, cli.command) {
        Ok(code) => code,
        Err(err) => {
            debug!("command_failed: {err:?}");
            eprintln!("Error: {err:#}");
            ExitCode::from(1)
        }
    }
}

fn run(ctx: &CockpitContext, command: Commands) -> Result<ExitCode> {
    match command {
        Commands::Index { action } => index::handle_index_command(ctx, action)?,
        Commands::ManageTests(args) => return runner::handle_manage_tests(ctx, args),
        Commands::Inbox(args) => return inbox::handle_inbox_command(ctx, args),
        Commands::Task { action } => task::handle_task_command(ctx, action)?,
        Commands::Metrics { action } => metrics::handle_metrics_command(ctx, action)?,
        Commands::Logs { action } => logs::handle_logs_command(ctx, action)?,
    }
    Ok(ExitCode::SUCCESS)
}
