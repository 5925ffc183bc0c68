use crate::journal::{append_locked, hold, read_to_string, JournalStore, TaskPatch};
use crate::JournalError;
use cockpit_core::{Classify, FailureKind};
use serde::Serialize;
use std::path::PathBuf;
use tracing::debug;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct RunLogWrite {
    pub absolute_path: PathBuf,
    /// Relative to the datasets root, forward slashes.
    pub relative_path: String,
    pub created: bool,
}

impl JournalStore {
    /// Appends `lines` to `runs/<task_id>/run.log`, creating it on first use.
    /// A newly created log is linked from the task when the task exists.
    pub fn append_run_log<S: AsRef<str>>(
        &self,
        task_id: &str,
        lines: &[S],
    ) -> Result<RunLogWrite, JournalError> {
        if task_id.trim().is_empty() || task_id.contains(['/', '\\']) || task_id == ".." {
            return Err(JournalError::Invalid(format!("bad task id for run log: {task_id:?}")));
        }
        let path = self.paths().run_log(task_id);
        let relative_path = self.paths().relative_to_datasets(&path);

        let created = {
            let lock = self.file_lock(&path);
            let _guard = hold(&lock);
            let created = !path.exists();
            let mut buffer = String::new();
            for line in lines {
                buffer.push_str(line.as_ref().trim_end_matches(['\r', '\n']));
                buffer.push('\n');
            }
            append_locked(self.fs(), &path, buffer.as_bytes())?;
            created
        };

        if created {
            let patch = TaskPatch::new().run_log_path(relative_path.clone());
            match self.update_task(task_id, patch) {
                Ok(_) => {}
                Err(err) if err.kind() == FailureKind::NotFound => {
                    debug!(task_id, "run_log_without_task");
                }
                Err(err) => return Err(err),
            }
        }

        Ok(RunLogWrite {
            absolute_path: path,
            relative_path,
            created,
        })
    }

    /// Labels captured process output per stream and appends it. Returns
    /// `None` when both streams are empty.
    pub fn append_run_output(
        &self,
        task_id: &str,
        stdout: &str,
        stderr: &str,
    ) -> Result<Option<RunLogWrite>, JournalError> {
        let lines: Vec<String> = stdout
            .lines()
            .map(|line| format!("[stdout] {line}"))
            .chain(stderr.lines().map(|line| format!("[stderr] {line}")))
            .collect();
        if lines.is_empty() {
            return Ok(None);
        }
        self.append_run_log(task_id, &lines).map(Some)
    }

    /// The last `max_lines` lines of the task's run log; empty when missing.
    pub fn load_run_log_tail(&self, task_id: &str, max_lines: usize) -> Result<Vec<String>, JournalError> {
        if max_lines == 0 {
            return Ok(Vec::new());
        }
        let path = self.paths().run_log(task_id);
        let Some(content) = read_to_string(self.fs(), &path)? else {
            return Ok(Vec::new());
        };
        let lines: Vec<&str> = content.lines().collect();
        let start = lines.len().saturating_sub(max_lines);
        Ok(lines[start..].iter().map(|line| line.to_string()).collect())
    }
}
