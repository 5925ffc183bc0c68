use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

/// The single environment override for where journals and datasets live.
pub const WORKSPACE_ENV: &str = "COCKPIT_WORKSPACE_ROOT";

pub fn resolve_workspace_root() -> std::io::Result<PathBuf> {
    if let Ok(value) = std::env::var(WORKSPACE_ENV) {
        if !value.trim().is_empty() {
            return Ok(PathBuf::from(value.trim()));
        }
    }
    std::env::current_dir()
}

/// Every on-disk location, rooted under the datasets directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CockpitPaths {
    pub workspace_root: PathBuf,
    pub datasets_root: PathBuf,
}

impl CockpitPaths {
    pub fn new(workspace_root: impl Into<PathBuf>) -> Self {
        let workspace_root = workspace_root.into();
        let datasets_root = workspace_root.join("datasets");
        Self {
            workspace_root,
            datasets_root,
        }
    }

    pub fn with_datasets_root(
        workspace_root: impl Into<PathBuf>,
        datasets_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            workspace_root: workspace_root.into(),
            datasets_root: datasets_root.into(),
        }
    }

    pub fn resolve() -> std::io::Result<Self> {
        Ok(Self::new(resolve_workspace_root()?))
    }

    pub fn tasks(&self) -> PathBuf {
        self.datasets_root.join("tasks.jsonl")
    }

    pub fn task_events(&self) -> PathBuf {
        self.datasets_root.join("task_events.jsonl")
    }

    pub fn diffs(&self) -> PathBuf {
        self.datasets_root.join("diffs.jsonl")
    }

    pub fn errors(&self) -> PathBuf {
        self.datasets_root.join("errors.jsonl")
    }

    pub fn repo_index_dir(&self) -> PathBuf {
        self.datasets_root.join("repo_index")
    }

    pub fn repo_index(&self) -> PathBuf {
        self.repo_index_dir().join("index.jsonl")
    }

    pub fn runs_dir(&self) -> PathBuf {
        self.datasets_root.join("runs")
    }

    pub fn run_dir(&self, task_id: &str) -> PathBuf {
        self.runs_dir().join(task_id)
    }

    pub fn run_log(&self, task_id: &str) -> PathBuf {
        self.run_dir(task_id).join("run.log")
    }

    pub fn snapshots_dir(&self, task_id: &str) -> PathBuf {
        self.run_dir(task_id).join("snapshots")
    }

    pub fn metrics_db(&self) -> PathBuf {
        self.datasets_root.join("system_metrics.db")
    }

    pub fn prompts_dir(&self) -> PathBuf {
        self.datasets_root.join("prompts")
    }

    pub fn logic_inbox(&self) -> PathBuf {
        self.datasets_root.join("logic_inbox.jsonl")
    }

    pub fn config_file(&self) -> PathBuf {
        self.workspace_root.join(".cockpit").join("config.json")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.workspace_root.join(".cockpit").join("logs")
    }

    /// Path of `path` relative to the datasets root, with forward slashes.
    pub fn relative_to_datasets(&self, path: &Path) -> String {
        path.strip_prefix(&self.datasets_root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CockpitConfig {
    #[serde(default)]
    pub extra_index_roots: Vec<PathBuf>,
    #[serde(default = "default_true")]
    pub embeddings: bool,
    #[serde(default = "default_metrics_interval_secs")]
    pub metrics_interval_secs: u64,
    #[serde(default)]
    pub metrics_targets: Vec<PathBuf>,
    #[serde(default = "default_error_limit")]
    pub error_limit: usize,
    #[serde(default)]
    pub protected_paths: Vec<PathBuf>,
    #[serde(default)]
    pub protected_directories: Vec<PathBuf>,
    #[serde(default = "default_embed_timeout_ms")]
    pub embed_timeout_ms: u64,
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn default_true() -> bool {
    true
}

fn default_metrics_interval_secs() -> u64 {
    300
}

fn default_error_limit() -> usize {
    20
}

fn default_embed_timeout_ms() -> u64 {
    10_000
}

impl Default for CockpitConfig {
    fn default() -> Self {
        Self {
            extra_index_roots: Vec::new(),
            embeddings: true,
            metrics_interval_secs: default_metrics_interval_secs(),
            metrics_targets: Vec::new(),
            error_limit: default_error_limit(),
            protected_paths: Vec::new(),
            protected_directories: Vec::new(),
            embed_timeout_ms: default_embed_timeout_ms(),
            log_file: None,
            extra: BTreeMap::new(),
        }
    }
}

impl CockpitConfig {
    /// Reads `.cockpit/config.json`; a missing or malformed file yields defaults.
    pub fn load(paths: &CockpitPaths) -> Self {
        let path = paths.config_file();
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str::<CockpitConfig>(&content) {
            Ok(mut config) => {
                config.resolve_relative(&paths.workspace_root);
                config
            }
            Err(err) => {
                warn!("config_parse_failed: {}: {err}", path.display());
                Self::default()
            }
        }
    }

    fn resolve_relative(&mut self, root: &Path) {
        let absolutize = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = root.join(&*path);
            }
        };
        self.extra_index_roots.iter_mut().for_each(absolutize);
        self.metrics_targets.iter_mut().for_each(absolutize);
        self.protected_paths.iter_mut().for_each(absolutize);
        self.protected_directories.iter_mut().for_each(absolutize);
        if let Some(log_file) = self.log_file.as_mut() {
            absolutize(log_file);
        }
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_secs(self.metrics_interval_secs.max(1))
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_millis(self.embed_timeout_ms)
    }
}
