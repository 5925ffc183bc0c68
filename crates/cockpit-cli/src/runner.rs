use crate::context::CockpitContext;
use anyhow::{Context, Result};
use clap::Args;
use std::process::{Command, ExitCode};
use tracing::{info, warn};

#[derive(Args, Debug)]
pub struct ManageTestsArgs {
    /// Arguments forwarded to `cargo test`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

pub fn test_command(args: &[String]) -> Vec<String> {
    std::iter::once("cargo".to_string())
        .chain(std::iter::once("test".to_string()))
        .chain(args.iter().cloned())
        .collect()
}

/// Runs the workspace test suite headless and passes its exit code through.
pub fn handle_manage_tests(ctx: &CockpitContext, args: ManageTestsArgs) -> Result<ExitCode> {
    let argv = test_command(&args.args);
    ctx.safety
        .ensure_command_allowed(&argv)
        .context("Test command rejected")?;
    info!(argv = ?argv, "manage_tests_started");
    let status = Command::new(&argv[0])
        .args(&argv[1..])
        .current_dir(&ctx.paths.workspace_root)
        .env("QT_QPA_PLATFORM", "offscreen")
        .status()
        .context("Failed to start cargo test")?;
    match status.code() {
        Some(code) => Ok(ExitCode::from(exit_byte(code))),
        None => {
            warn!("manage_tests_signalled");
            Ok(ExitCode::from(1))
        }
    }
}

fn exit_byte(code: i32) -> u8 {
    u8::try_from(code).unwrap_or(1)
}
