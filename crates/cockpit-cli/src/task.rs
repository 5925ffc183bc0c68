use crate::context::CockpitContext;
use anyhow::{anyhow, Context, Result};
use chrono::{Local, TimeZone};
use clap::{Args, Subcommand};
use cockpit_core::{Task, TaskStatus};
use cockpit_diff::DiffEngine;

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum TaskCommand {
    List(TaskListArgs),
    #[command(alias = "add-task")]
    Add(TaskAddArgs),
    #[command(alias = "set-status")]
    Status(TaskStatusArgs),
    /// Record the task's current diff
    Diff(TaskDiffArgs),
    /// Print the tail of the task's run log
    Log(TaskLogArgs),
}

#[derive(Args, Debug)]
pub struct TaskListArgs {
    #[arg(long)]
    pub status: Option<TaskStatus>,
    /// Include deleted tasks
    #[arg(long)]
    pub all: bool,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct TaskAddArgs {
    pub title: String,
    #[arg(long, default_value = "cli")]
    pub source: String,
    #[arg(long, default_value = "")]
    pub session: String,
}

#[derive(Args, Debug)]
pub struct TaskStatusArgs {
    pub id: String,
    pub status: TaskStatus,
    #[arg(long, default_value = "cli")]
    pub by: String,
}

#[derive(Args, Debug)]
pub struct TaskDiffArgs {
    pub id: String,
    /// Limit the diff to these workspace-relative files
    pub files: Vec<String>,
    /// Compare against content snapshots even inside a git work tree
    #[arg(long)]
    pub no_vcs: bool,
}

#[derive(Args, Debug)]
pub struct TaskLogArgs {
    pub id: String,
    #[arg(long, default_value_t = 50)]
    pub lines: usize,
}

pub fn handle_task_command(ctx: &CockpitContext, command: TaskCommand) -> Result<()> {
    match command {
        TaskCommand::List(args) => list_tasks(ctx, &args),
        TaskCommand::Add(args) => {
            let task = ctx
                .journal
                .create_task(&args.title, &args.source, &args.session)
                .context("Failed to add task")?;
            println!("Added task [{}] {}", task.id, task.title);
            Ok(())
        }
        TaskCommand::Status(args) => {
            let task = ctx
                .journal
                .transition(&args.id, args.status, &args.by)
                .with_context(|| format!("Failed to update task {}", args.id))?;
            println!("Task [{}] is now {}", task.id, task.status);
            Ok(())
        }
        TaskCommand::Diff(args) => {
            let mut engine = DiffEngine::new(ctx.journal.clone(), &ctx.paths.workspace_root);
            if args.no_vcs {
                engine = engine.without_vcs();
            }
            let files = (!args.files.is_empty()).then_some(args.files.as_slice());
            match engine.record_diff(&args.id, files) {
                Some(snapshot) => println!("{}", serde_json::to_string_pretty(&snapshot)?),
                None => println!("No new diff for task {}", args.id),
            }
            Ok(())
        }
        TaskCommand::Log(args) => {
            if ctx.journal.get_task(&args.id)?.is_none() {
                return Err(anyhow!("Task {} not found", args.id));
            }
            for line in ctx.journal.load_run_log_tail(&args.id, args.lines)? {
                println!("{line}");
            }
            Ok(())
        }
    }
}

fn list_tasks(ctx: &CockpitContext, args: &TaskListArgs) -> Result<()> {
    let tasks: Vec<Task> = ctx
        .journal
        .load_tasks()
        .context("Failed to read tasks journal")?
        .into_iter()
        .filter(|task| visible(task, args.status, args.all))
        .collect();
    if args.json {
        println!("{}", serde_json::to_string_pretty(&tasks)?);
        return Ok(());
    }
    if tasks.is_empty() {
        println!("No tasks found.");
        return Ok(());
    }
    for task in &tasks {
        println!(
            "- [{}] {} ({}, updated {}, +{}/-{})",
            task.id,
            task.title,
            task.status,
            format_ts(task.updated_ts),
            task.diffs.added,
            task.diffs.removed
        );
    }
    Ok(())
}

fn visible(task: &Task, status: Option<TaskStatus>, all: bool) -> bool {
    match status {
        Some(status) => task.status == status,
        None => all || task.status != TaskStatus::Deleted,
    }
}

fn format_ts(ts: f64) -> String {
    Local
        .timestamp_millis_opt((ts * 1000.0) as i64)
        .single()
        .map(|time| time.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| format!("{ts:.0}"))
}
