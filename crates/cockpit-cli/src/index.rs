use crate::context::CockpitContext;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use cockpit_index::{IndexConfig, ReferenceHelper, RepoIndex};
use serde_json::json;
use std::path::PathBuf;

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum IndexCommand {
    /// Rebuild the repository index from scratch
    Rebuild(RebuildArgs),
    /// Search the index
    Query(QueryArgs),
    /// Complete file and directory references
    Refs(RefsArgs),
}

#[derive(Args, Debug)]
pub struct RootArgs {
    #[arg(long)]
    pub repo_root: Option<PathBuf>,
    #[arg(long)]
    pub data_root: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RebuildArgs {
    #[command(flatten)]
    pub roots: RootArgs,
    /// Skip embeddings; queries fall back to keyword search
    #[arg(long)]
    pub no_embed: bool,
}

#[derive(Args, Debug)]
pub struct QueryArgs {
    #[command(flatten)]
    pub roots: RootArgs,
    #[arg(long)]
    pub text: String,
    #[arg(long, default_value_t = 5)]
    pub limit: usize,
}

#[derive(Args, Debug)]
pub struct RefsArgs {
    #[command(flatten)]
    pub roots: RootArgs,
    pub query: String,
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

pub fn handle_index_command(ctx: &CockpitContext, command: IndexCommand) -> Result<()> {
    match command {
        IndexCommand::Rebuild(args) => {
            let mut config = index_config(ctx, &args.roots);
            if args.no_embed {
                config.embeddings = false;
            }
            let index = RepoIndex::new(config, ctx.fs.clone());
            let summary = index.rebuild().context("Failed to rebuild repository index")?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        IndexCommand::Query(args) => {
            let index = RepoIndex::new(index_config(ctx, &args.roots), ctx.fs.clone());
            index.ensure_loaded().context("Failed to load repository index")?;
            let hits = index.search(&args.text, args.limit);
            println!("{}", serde_json::to_string_pretty(&hits)?);
        }
        IndexCommand::Refs(args) => {
            let index = RepoIndex::new(index_config(ctx, &args.roots), ctx.fs.clone());
            let helper = ReferenceHelper::from_index(&index);
            let suggestions = helper.suggestions(&args.query, args.limit);
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "files": helper.file_count(),
                    "directories": helper.directory_count(),
                    "suggestions": suggestions,
                }))?
            );
        }
    }
    Ok(())
}

fn index_config(ctx: &CockpitContext, roots: &RootArgs) -> IndexConfig {
    let mut config = IndexConfig::from_cockpit(&ctx.paths, &ctx.config);
    if let Some(repo_root) = &roots.repo_root {
        config.repo_root = repo_root.clone();
    }
    if let Some(data_root) = &roots.data_root {
        config.data_root = data_root.clone();
    }
    config
}
