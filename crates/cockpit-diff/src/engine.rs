use crate::git;
use crate::lines::{line_delta, LineDelta};
use crate::DiffError;
use cockpit_core::{now_ts, DiffSnapshot, DiffSummary, Extra};
use cockpit_storage::{JournalStore, TaskPatch};
use std::collections::BTreeSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Where a snapshot's numbers came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffSource {
    Vcs,
    Snapshot,
}

impl DiffSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DiffSource::Vcs => "vcs",
            DiffSource::Snapshot => "snapshot",
        }
    }
}

struct PendingSnapshot {
    path: PathBuf,
    content: String,
}

pub struct DiffEngine {
    journal: Arc<JournalStore>,
    workspace_root: PathBuf,
    prefer_vcs: bool,
}

impl DiffEngine {
    pub fn new(journal: Arc<JournalStore>, workspace_root: impl Into<PathBuf>) -> Self {
        Self {
            journal,
            workspace_root: workspace_root.into(),
            prefer_vcs: true,
        }
    }

    /// Skips the version-control path even inside a repository.
    pub fn without_vcs(mut self) -> Self {
        self.prefer_vcs = false;
        self
    }

    pub fn workspace_root(&self) -> &Path {
        &self.workspace_root
    }

    /// Records the task's current diff. Any failure is logged and yields
    /// `None`; so does a call that finds nothing new since the last snapshot.
    pub fn record_diff(&self, task_id: &str, files: Option<&[String]>) -> Option<DiffSnapshot> {
        match self.try_record_diff(task_id, files) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                warn!(task_id, "record_diff_failed: {err}");
                None
            }
        }
    }

    pub fn try_record_diff(
        &self,
        task_id: &str,
        files: Option<&[String]>,
    ) -> Result<Option<DiffSnapshot>, DiffError> {
        let task = self
            .journal
            .get_task(task_id)?
            .ok_or_else(|| DiffError::TaskNotFound(task_id.to_string()))?;

        let requested: Vec<String> = match files {
            Some(files) => files
                .iter()
                .filter_map(|file| self.relative_path(file))
                .collect(),
            None => Vec::new(),
        };

        let (delta, changed, source, pending) = match self.vcs_delta(&requested) {
            Some((delta, changed)) => (delta, changed, DiffSource::Vcs, Vec::new()),
            None => {
                let (delta, changed, pending) =
                    self.snapshot_delta(task_id, files.map(|_| requested.as_slice()))?;
                (delta, changed, DiffSource::Snapshot, pending)
            }
        };

        if delta.is_empty() && changed.is_empty() {
            self.store_snapshots(&pending)?;
            debug!(task_id, source = source.as_str(), "diff_unchanged");
            return Ok(None);
        }
        // Numstat is cumulative against HEAD, so an identical result means
        // nothing moved. Snapshot deltas are incremental and never repeat.
        if source == DiffSource::Vcs {
            if let Some(last) = self.journal.last_diff(task_id)? {
                if last.added == delta.added && last.removed == delta.removed && last.files == changed {
                    debug!(task_id, source = source.as_str(), "diff_repeated");
                    return Ok(None);
                }
            }
        }

        let mut extra = Extra::new();
        extra.insert("source".to_string(), source.as_str().into());
        let snapshot = DiffSnapshot {
            ts: now_ts(),
            task_id: task_id.to_string(),
            added: delta.added,
            removed: delta.removed,
            files: changed.clone(),
            extra,
        };
        self.journal.append_diff(&snapshot)?;
        self.store_snapshots(&pending)?;

        let mut files: BTreeSet<String> = task.files.iter().cloned().collect();
        files.extend(changed);
        self.journal.update_task(
            task_id,
            TaskPatch::new()
                .diffs(DiffSummary {
                    added: delta.added,
                    removed: delta.removed,
                })
                .files(files.into_iter().collect()),
        )?;
        info!(
            task_id,
            added = delta.added,
            removed = delta.removed,
            source = source.as_str(),
            "diff_recorded"
        );
        Ok(Some(snapshot))
    }

    fn vcs_delta(&self, files: &[String]) -> Option<(LineDelta, Vec<String>)> {
        if !self.prefer_vcs || !git::is_work_tree(&self.workspace_root) {
            return None;
        }
        match git::numstat_head(&self.workspace_root, files) {
            Ok(stat) => Some((
                LineDelta {
                    added: stat.added,
                    removed: stat.removed,
                },
                stat.files,
            )),
            Err(err) => {
                debug!("git_numstat_failed: {err}");
                None
            }
        }
    }

    /// Compares each file with its stored snapshot. The refreshed snapshot
    /// contents are returned, not written, so the baseline only moves once
    /// the diff record is durable. `None` re-checks every file already
    /// snapshotted.
    fn snapshot_delta(
        &self,
        task_id: &str,
        files: Option<&[String]>,
    ) -> Result<(LineDelta, Vec<String>, Vec<PendingSnapshot>), DiffError> {
        let snapshots_dir = self.journal.paths().snapshots_dir(task_id);
        let targets: Vec<String> = match files {
            Some(files) => files.to_vec(),
            None => snapshotted_files(&snapshots_dir),
        };

        let mut total = LineDelta::default();
        let mut changed = Vec::new();
        let mut pending = Vec::new();
        for rel in targets {
            let current_path = self.workspace_root.join(&rel);
            let snapshot_path = snapshots_dir.join(&rel);
            let current = read_lossy(&current_path)?;
            let previous = read_lossy(&snapshot_path)?;
            if current.is_none() && previous.is_none() {
                debug!(path = %rel, "diff_target_missing");
                continue;
            }
            let current = current.unwrap_or_default();
            let previous = previous.unwrap_or_default();

            let new_lines: Vec<&str> = current.lines().collect();
            let old_lines: Vec<&str> = previous.lines().collect();
            let delta = line_delta(&old_lines, &new_lines);
            if !delta.is_empty() {
                total.added += delta.added;
                total.removed += delta.removed;
                changed.push(rel.clone());
            }
            pending.push(PendingSnapshot {
                path: snapshot_path,
                content: new_lines.join("\n"),
            });
        }
        Ok((total, changed, pending))
    }

    fn store_snapshots(&self, pending: &[PendingSnapshot]) -> Result<(), DiffError> {
        for snapshot in pending {
            self.journal
                .fs()
                .write_atomic(&snapshot.path, snapshot.content.as_bytes())?;
        }
        Ok(())
    }

    /// Workspace-relative form of `file`; paths escaping the workspace are
    /// dropped.
    fn relative_path(&self, file: &str) -> Option<String> {
        let path = Path::new(file);
        let rel = if path.is_absolute() {
            path.strip_prefix(&self.workspace_root).ok()?.to_path_buf()
        } else {
            path.to_path_buf()
        };
        let mut clean = PathBuf::new();
        for component in rel.components() {
            match component {
                Component::Normal(part) => clean.push(part),
                Component::CurDir => {}
                _ => {
                    warn!(file, "diff_path_outside_workspace");
                    return None;
                }
            }
        }
        if clean.as_os_str().is_empty() {
            return None;
        }
        Some(clean.to_string_lossy().replace('\\', "/"))
    }
}

fn read_lossy(path: &Path) -> Result<Option<String>, DiffError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(String::from_utf8_lossy(&bytes).into_owned())),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(DiffError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn snapshotted_files(dir: &Path) -> Vec<String> {
    let mut files: Vec<String> = WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            entry
                .path()
                .strip_prefix(dir)
                .ok()
                .map(|rel| rel.to_string_lossy().replace('\\', "/"))
        })
        .filter(|rel| !rel.ends_with(".tmp"))
        .collect();
    files.sort();
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use cockpit_core::{CockpitPaths, Task};
    use cockpit_safety::GuardedFs;
    use tempfile::TempDir;

    fn engine(dir: &TempDir) -> DiffEngine {
        let journal = Arc::new(JournalStore::new(
            CockpitPaths::new(dir.path()),
            GuardedFs::unguarded(),
        ));
        DiffEngine::new(journal, dir.path()).without_vcs()
    }

    #[test]
    fn missing_task_yields_none_and_appends_nothing() {
        let dir = TempDir::new().expect("temp dir");
        let engine = engine(&dir);
        fs::write(dir.path().join("a.txt"), "x\n").expect("write");
        assert!(engine
            .record_diff("tsk_ghost", Some(&["a.txt".to_string()]))
            .is_none());
        assert!(engine.journal.load_diffs(None).expect("diffs").is_empty());
    }

    #[test]
    fn paths_outside_the_workspace_are_ignored() {
        let dir = TempDir::new().expect("temp dir");
        let engine = engine(&dir);
        assert_eq!(engine.relative_path("../etc/passwd"), None);
        assert_eq!(engine.relative_path("./src/lib.rs"), Some("src/lib.rs".to_string()));
        let absolute = dir.path().join("docs").join("notes.md");
        assert_eq!(
            engine.relative_path(&absolute.to_string_lossy()),
            Some("docs/notes.md".to_string())
        );
    }

    #[test]
    fn rechecks_snapshotted_files_when_none_named() {
        let dir = TempDir::new().expect("temp dir");
        let engine = engine(&dir);
        let mut task = Task::new("tsk_all", "all");
        task.created_ts = 1.0;
        task.updated_ts = 1.0;
        engine.journal.append_task(&task).expect("task");
        fs::create_dir_all(dir.path().join("src")).expect("mkdir");
        fs::write(dir.path().join("src/main.rs"), "fn main() {}\n").expect("write");

        let first = engine
            .record_diff("tsk_all", Some(&["src/main.rs".to_string()]))
            .expect("first snapshot");
        assert_eq!((first.added, first.removed), (1, 0));

        fs::write(dir.path().join("src/main.rs"), "fn main() {}\n// done\n").expect("edit");
        let second = engine.record_diff("tsk_all", None).expect("second snapshot");
        assert_eq!((second.added, second.removed), (1, 0));
        assert_eq!(second.files, vec!["src/main.rs"]);
        assert!(engine.record_diff("tsk_all", None).is_none());
    }
}
