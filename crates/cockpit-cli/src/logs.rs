use crate::context::CockpitContext;
use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use cockpit_logtail::{ClassifiedLine, ErrorConsole, ErrorConsoleJob, LogTailer};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum LogsCommand {
    /// Classify a log file and journal its ERROR/CRITICAL lines
    Scan(ScanArgs),
}

#[derive(Args, Debug)]
pub struct ScanArgs {
    #[arg(long)]
    pub file: PathBuf,
    /// Keep tailing the file after the initial scan
    #[arg(long)]
    pub follow: bool,
    #[arg(long, default_value_t = 500)]
    pub interval_ms: u64,
}

pub fn handle_logs_command(ctx: &CockpitContext, command: LogsCommand) -> Result<()> {
    match command {
        LogsCommand::Scan(args) => {
            let mut console = ErrorConsole::for_file(LogTailer::new(&args.file), Arc::clone(&ctx.journal));
            for line in console
                .poll()
                .with_context(|| format!("Failed to scan {}", args.file.display()))?
            {
                print_line(&line);
            }
            if !args.follow {
                return Ok(());
            }
            let console = Arc::new(Mutex::new(console));
            let _job = ErrorConsoleJob::start(
                console,
                Duration::from_millis(args.interval_ms.max(50)),
                print_line,
            )
            .context("Failed to start log follower")?;
            loop {
                std::thread::park();
            }
        }
    }
}

fn print_line(line: &ClassifiedLine) {
    match serde_json::to_string(line) {
        Ok(json) => println!("{json}"),
        Err(err) => eprintln!("log_line_encode_failed: {err}"),
    }
}
