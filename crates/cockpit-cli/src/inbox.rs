use crate::context::CockpitContext;
use anyhow::{bail, Context, Result};
use clap::Args;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

#[derive(Args, Debug)]
pub struct InboxArgs {
    /// Check that every line of the logic inbox is a JSON object
    #[arg(long)]
    pub validate: bool,
    /// Inbox file; defaults to `logic_inbox.jsonl` under the datasets root
    #[arg(long)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, PartialEq, Eq)]
pub struct InboxProblem {
    pub line: usize,
    pub reason: String,
}

pub fn handle_inbox_command(ctx: &CockpitContext, args: InboxArgs) -> Result<ExitCode> {
    if !args.validate {
        bail!("Nothing to do; pass --validate");
    }
    let path = args.path.unwrap_or_else(|| ctx.paths.logic_inbox());
    let problems = validate_inbox(&path)?;
    if problems.is_empty() {
        println!("{}: ok", path.display());
        return Ok(ExitCode::SUCCESS);
    }
    for problem in &problems {
        println!("{}:{}: {}", path.display(), problem.line, problem.reason);
    }
    Ok(ExitCode::from(1))
}

/// Problems per 1-based line. A missing file is an empty, valid inbox;
/// blank lines are ignored.
pub fn validate_inbox(path: &Path) -> Result<Vec<InboxProblem>> {
    let content = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to read {}", path.display()));
        }
    };
    let text = match String::from_utf8(content) {
        Ok(text) => text,
        Err(_) => {
            return Ok(vec![InboxProblem {
                line: 0,
                reason: "file is not valid UTF-8".to_string(),
            }]);
        }
    };
    let mut problems = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(_)) => {}
            Ok(_) => problems.push(InboxProblem {
                line: idx + 1,
                reason: "expected a JSON object".to_string(),
            }),
            Err(err) => problems.push(InboxProblem {
                line: idx + 1,
                reason: err.to_string(),
            }),
        }
    }
    Ok(problems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn missing_inbox_is_valid() {
        let dir = TempDir::new().expect("temp dir");
        let problems = validate_inbox(&dir.path().join("logic_inbox.jsonl")).expect("validate");
        assert!(problems.is_empty());
    }

    #[test]
    fn reports_each_bad_line() {
        let dir = TempDir::new().expect("temp dir");
        let path = dir.path().join("logic_inbox.jsonl");
        fs::write(&path, "{\"op\":\"a\"}\n\n[1,2]\n{broken\n{\"op\":\"b\"}\n").expect("write inbox");
        let problems = validate_inbox(&path).expect("validate");
        let lines: Vec<usize> = problems.iter().map(|problem| problem.line).collect();
        assert_eq!(lines, vec![3, 4]);
        assert_eq!(problems[0].reason, "expected a JSON object");
    }
}
