use crate::context::CockpitContext;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use cockpit_metrics::{collect_metrics, MetricsRequest};
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum MetricsCommand {
    /// Score scripts by recent errors and print the summary
    Collect(CollectArgs),
}

#[derive(Args, Debug)]
pub struct CollectArgs {
    /// Write one row per script to the metrics database
    #[arg(long)]
    pub store: bool,
    /// Files or directories to score; defaults to the configured targets
    #[arg(long = "target")]
    pub targets: Vec<PathBuf>,
    #[arg(long)]
    pub db: Option<PathBuf>,
    #[arg(long)]
    pub error_limit: Option<usize>,
}

pub fn handle_metrics_command(ctx: &CockpitContext, command: MetricsCommand) -> Result<()> {
    match command {
        MetricsCommand::Collect(args) => {
            let mut request = MetricsRequest::from_config(&ctx.paths, &ctx.config)
                .store(args.store)
                .fs(ctx.fs.clone());
            if !args.targets.is_empty() {
                request.targets = args.targets;
            }
            if let Some(db) = args.db {
                request = request.db_path(db);
            }
            if let Some(limit) = args.error_limit {
                request = request.error_limit(limit);
            }
            let summary = collect_metrics(&request).context("Failed to collect metrics")?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
    }
    Ok(())
}
