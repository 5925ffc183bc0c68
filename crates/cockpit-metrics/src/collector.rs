use crate::MetricsError;
use cockpit_core::{now_ts, CockpitConfig, CockpitPaths, ErrorRecord, MetricsEntry, Task};
use cockpit_index::{IgnorePolicy, Language};
use cockpit_safety::GuardedFs;
use cockpit_storage::{JournalStore, MetricsDb};
use serde::Serialize;
use serde_json::json;
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Instant, UNIX_EPOCH};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct MetricsRequest {
    /// Files or directories; empty means the workspace root.
    pub targets: Vec<PathBuf>,
    pub workspace_root: PathBuf,
    pub datasets_root: PathBuf,
    pub store: bool,
    /// Defaults to `system_metrics.db` under the datasets root.
    pub db_path: Option<PathBuf>,
    pub error_limit: usize,
    /// Journal reads and database writes go through this façade.
    pub fs: GuardedFs,
}

impl MetricsRequest {
    pub fn new(paths: &CockpitPaths) -> Self {
        Self {
            targets: Vec::new(),
            workspace_root: paths.workspace_root.clone(),
            datasets_root: paths.datasets_root.clone(),
            store: false,
            db_path: None,
            error_limit: 20,
            fs: GuardedFs::unguarded(),
        }
    }

    pub fn from_config(paths: &CockpitPaths, config: &CockpitConfig) -> Self {
        let mut request = Self::new(paths);
        request.targets = config.metrics_targets.clone();
        request.error_limit = config.error_limit;
        request
    }

    pub fn target(mut self, target: impl Into<PathBuf>) -> Self {
        self.targets.push(target.into());
        self
    }

    pub fn store(mut self, store: bool) -> Self {
        self.store = store;
        self
    }

    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn fs(mut self, fs: GuardedFs) -> Self {
        self.fs = fs;
        self
    }

    pub fn error_limit(mut self, limit: usize) -> Self {
        self.error_limit = limit;
        self
    }

    pub fn resolved_db_path(&self) -> PathBuf {
        self.db_path
            .clone()
            .unwrap_or_else(|| self.paths().metrics_db())
    }

    fn paths(&self) -> CockpitPaths {
        CockpitPaths::with_datasets_root(&self.workspace_root, &self.datasets_root)
    }

    fn resolved_targets(&self) -> Vec<PathBuf> {
        if self.targets.is_empty() {
            return vec![self.workspace_root.clone()];
        }
        self.targets
            .iter()
            .map(|target| {
                if target.is_relative() {
                    self.workspace_root.join(target)
                } else {
                    target.clone()
                }
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ScriptMetrics {
    /// Workspace-relative with forward slashes, absolute when outside it.
    pub path: String,
    pub component: String,
    pub line_count: usize,
    pub last_modified: Option<f64>,
    pub last_run_ts: Option<f64>,
    pub error_count: usize,
    pub score: f64,
    /// Most recent failures, oldest first.
    pub errors: Vec<ErrorRecord>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ComponentMetrics {
    pub component: String,
    pub file_count: usize,
    pub total_lines: usize,
    pub last_run_ts: Option<f64>,
    pub error_count: usize,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSummary {
    pub timestamp: f64,
    pub scripts: Vec<ScriptMetrics>,
    pub components: Vec<ComponentMetrics>,
    pub runtime_ms: f64,
    pub stored: usize,
    pub db_path: Option<PathBuf>,
}

impl MetricsSummary {
    pub fn script(&self, path: &str) -> Option<&ScriptMetrics> {
        self.scripts.iter().find(|script| script.path == path)
    }
}

/// 1.0 for a clean script, strictly decreasing as errors accumulate.
pub fn score_for(error_count: usize) -> f64 {
    1.0 / (1.0 + error_count as f64)
}

pub fn collect_metrics(request: &MetricsRequest) -> Result<MetricsSummary, MetricsError> {
    let started = Instant::now();
    let paths = request.paths();
    let journal = JournalStore::new(paths.clone(), request.fs.clone());

    let tasks = journal.load_tasks().unwrap_or_else(|err| {
        warn!("metrics_tasks_unreadable: {err}");
        Vec::new()
    });
    let mut failures: Vec<ErrorRecord> = journal
        .load_errors()?
        .into_iter()
        .filter(|record| record.level.is_failure() && record.path.is_some())
        .collect();
    failures.sort_by(|a, b| a.ts.partial_cmp(&b.ts).unwrap_or(std::cmp::Ordering::Equal));

    let mut seen = HashSet::new();
    let mut scripts = Vec::new();
    for target in request.resolved_targets() {
        if !target.exists() {
            warn!(target = %target.display(), "metrics_target_missing");
            continue;
        }
        let component = display_path(&request.workspace_root, &target);
        let component = if component.is_empty() {
            ".".to_string()
        } else {
            component
        };
        for file in source_files(&target, &request.datasets_root) {
            if !seen.insert(file.clone()) {
                continue;
            }
            let rel = display_path(&request.workspace_root, &file);
            scripts.push(script_metrics(
                &file,
                rel,
                &component,
                &tasks,
                &failures,
                &request.workspace_root,
                request.error_limit,
            ));
        }
    }

    let components = aggregate(&scripts);
    let timestamp = now_ts();
    let mut stored = 0;
    let mut db_path = None;
    if request.store {
        let path = request.resolved_db_path();
        let runtime_ms = started.elapsed().as_secs_f64() * 1000.0;
        let entries: Vec<MetricsEntry> = scripts
            .iter()
            .map(|script| MetricsEntry {
                timestamp,
                script_path: script.path.clone(),
                score: script.score,
                runtime_ms: Some(runtime_ms),
                component: Some(script.component.clone()),
                metadata: json!({
                    "line_count": script.line_count,
                    "error_count": script.error_count,
                    "last_modified": script.last_modified,
                    "last_run_ts": script.last_run_ts,
                }),
            })
            .collect();
        stored = MetricsDb::new(&path)
            .with_fs(request.fs.clone())
            .insert_entries(&entries)?;
        db_path = Some(path);
    }

    let summary = MetricsSummary {
        timestamp,
        scripts,
        components,
        runtime_ms: started.elapsed().as_secs_f64() * 1000.0,
        stored,
        db_path,
    };
    info!(
        scripts = summary.scripts.len(),
        stored = summary.stored,
        runtime_ms = summary.runtime_ms,
        "metrics_collected"
    );
    Ok(summary)
}

fn source_files(target: &Path, datasets_root: &Path) -> Vec<PathBuf> {
    if target.is_file() {
        return vec![target.to_path_buf()];
    }
    let mut files: Vec<PathBuf> = WalkDir::new(target)
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 {
                return true;
            }
            if entry.path() == datasets_root {
                return false;
            }
            !(entry.file_type().is_dir()
                && entry
                    .file_name()
                    .to_str()
                    .map(IgnorePolicy::is_skipped_dir_name)
                    .unwrap_or(false))
        })
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| Language::detect(path).is_source())
        .collect();
    files.sort();
    files
}

fn script_metrics(
    file: &Path,
    rel: String,
    component: &str,
    tasks: &[Task],
    failures: &[ErrorRecord],
    workspace_root: &Path,
    error_limit: usize,
) -> ScriptMetrics {
    let line_count = match fs::read(file) {
        Ok(bytes) => String::from_utf8_lossy(&bytes).lines().count(),
        Err(err) => {
            debug!(path = %file.display(), "metrics_read_failed: {err}");
            0
        }
    };
    let last_modified = fs::metadata(file)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map(|elapsed| elapsed.as_secs_f64());
    let last_run_ts = tasks
        .iter()
        .filter(|task| task.files.iter().any(|path| normalize_record_path(workspace_root, path) == rel))
        .map(|task| task.updated_ts)
        .fold(None, |acc: Option<f64>, ts| Some(acc.map_or(ts, |prev| prev.max(ts))));

    let matching: Vec<&ErrorRecord> = failures
        .iter()
        .filter(|record| {
            record
                .path
                .as_deref()
                .map(|path| normalize_record_path(workspace_root, path) == rel)
                .unwrap_or(false)
        })
        .collect();
    let error_count = matching.len();
    let errors = matching
        .iter()
        .skip(error_count.saturating_sub(error_limit))
        .map(|record| (*record).clone())
        .collect();

    ScriptMetrics {
        path: rel,
        component: component.to_string(),
        line_count,
        last_modified,
        last_run_ts,
        error_count,
        score: score_for(error_count),
        errors,
    }
}

fn aggregate(scripts: &[ScriptMetrics]) -> Vec<ComponentMetrics> {
    let mut components: BTreeMap<&str, ComponentMetrics> = BTreeMap::new();
    for script in scripts {
        let entry = components
            .entry(script.component.as_str())
            .or_insert_with(|| ComponentMetrics {
                component: script.component.clone(),
                file_count: 0,
                total_lines: 0,
                last_run_ts: None,
                error_count: 0,
            });
        entry.file_count += 1;
        entry.total_lines += script.line_count;
        entry.error_count += script.error_count;
        entry.last_run_ts = match (entry.last_run_ts, script.last_run_ts) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }
    components.into_values().collect()
}

fn display_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/")
}

fn normalize_record_path(root: &Path, path: &str) -> String {
    let candidate = Path::new(path);
    let rel = if candidate.is_absolute() {
        display_path(root, candidate)
    } else {
        path.replace('\\', "/")
    };
    rel.trim_start_matches("./").to_string()
}
