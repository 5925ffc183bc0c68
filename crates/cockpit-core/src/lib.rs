pub mod bus;
pub mod config;
pub mod error;
pub mod timer;

pub use bus::{Bus, BusError, Subscription, TOPICS};
pub use config::{CockpitConfig, CockpitPaths};
pub use error::{Classify, FailureKind};
pub use timer::{DebounceTrigger, Debouncer, PeriodicTask};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Fields a record did not declare; kept so rewrites round-trip them.
pub type Extra = BTreeMap<String, Value>;

/// Seconds since the Unix epoch with microsecond precision.
pub fn now_ts() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Open,
    Merged,
    Closed,
    Cancelled,
    Failed,
    Deleted,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Open => "open",
            TaskStatus::Merged => "merged",
            TaskStatus::Closed => "closed",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Failed => "failed",
            TaskStatus::Deleted => "deleted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Open)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let normalized = input.trim().to_lowercase();
        match normalized.as_str() {
            "open" => Ok(TaskStatus::Open),
            "merged" => Ok(TaskStatus::Merged),
            "closed" => Ok(TaskStatus::Closed),
            "cancelled" | "canceled" => Ok(TaskStatus::Cancelled),
            "failed" => Ok(TaskStatus::Failed),
            "deleted" => Ok(TaskStatus::Deleted),
            other => Err(format!("Unknown status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DiffSummary {
    pub added: u64,
    pub removed: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub status: TaskStatus,
    pub created_ts: f64,
    pub updated_ts: f64,
    #[serde(default)]
    pub session_id: String,
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub diffs: DiffSummary,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_log_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codex_conversation_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, flatten)]
    pub extra: Extra,
}

impl Task {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = now_ts();
        Self {
            id: id.into(),
            title: title.into(),
            status: TaskStatus::Open,
            created_ts: now,
            updated_ts: now,
            session_id: String::new(),
            source: String::new(),
            labels: Vec::new(),
            diffs: DiffSummary::default(),
            files: Vec::new(),
            run_log_path: None,
            codex_conversation_id: None,
            parent_id: None,
            extra: Extra::new(),
        }
    }

    /// Opaque `tsk_<hex>` identifier.
    pub fn generate_id() -> String {
        let raw = uuid::Uuid::new_v4().simple().to_string();
        format!("tsk_{}", &raw[..12])
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("task id cannot be empty".to_string());
        }
        if self.updated_ts < self.created_ts {
            return Err(format!(
                "task {} has updated_ts {} before created_ts {}",
                self.id, self.updated_ts, self.created_ts
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskEventKind {
    Created,
    Updated,
    StatusChanged,
    DiffRecorded,
    RunLog,
    Deleted,
    Note,
}

impl TaskEventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskEventKind::Created => "created",
            TaskEventKind::Updated => "updated",
            TaskEventKind::StatusChanged => "status_changed",
            TaskEventKind::DiffRecorded => "diff_recorded",
            TaskEventKind::RunLog => "run_log",
            TaskEventKind::Deleted => "deleted",
            TaskEventKind::Note => "note",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TaskEvent {
    pub ts: f64,
    pub task_id: String,
    pub event: TaskEventKind,
    pub by: String,
    #[serde(default, flatten)]
    pub extra: Extra,
}

impl TaskEvent {
    pub fn new(task_id: impl Into<String>, event: TaskEventKind, by: impl Into<String>) -> Self {
        Self {
            ts: now_ts(),
            task_id: task_id.into(),
            event,
            by: by.into(),
            extra: Extra::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DiffSnapshot {
    pub ts: f64,
    pub task_id: String,
    pub added: u64,
    pub removed: u64,
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default, flatten)]
    pub extra: Extra,
}

impl DiffSnapshot {
    pub fn summary(&self) -> DiffSummary {
        DiffSummary {
            added: self.added,
            removed: self.removed,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.added == 0 && self.removed == 0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "UPPERCASE")]
pub enum ErrorLevel {
    Debug,
    Info,
    #[serde(alias = "WARNING")]
    Warn,
    Error,
    Critical,
}

impl ErrorLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorLevel::Debug => "DEBUG",
            ErrorLevel::Info => "INFO",
            ErrorLevel::Warn => "WARN",
            ErrorLevel::Error => "ERROR",
            ErrorLevel::Critical => "CRITICAL",
        }
    }

    /// ERROR and CRITICAL are the levels persisted and counted as failures.
    pub fn is_failure(&self) -> bool {
        matches!(self, ErrorLevel::Error | ErrorLevel::Critical)
    }
}

impl fmt::Display for ErrorLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorLevel {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_uppercase().as_str() {
            "DEBUG" => Ok(ErrorLevel::Debug),
            "INFO" => Ok(ErrorLevel::Info),
            "WARN" | "WARNING" => Ok(ErrorLevel::Warn),
            "ERROR" => Ok(ErrorLevel::Error),
            "CRITICAL" | "FATAL" => Ok(ErrorLevel::Critical),
            other => Err(format!("Unknown level: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCategory {
    Runtime,
    #[serde(rename = "UI")]
    Ui,
    #[serde(rename = "I/O")]
    Io,
    Security,
}

impl ErrorCategory {
    pub const ALL: [ErrorCategory; 4] = [
        ErrorCategory::Runtime,
        ErrorCategory::Ui,
        ErrorCategory::Io,
        ErrorCategory::Security,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Runtime => "Runtime",
            ErrorCategory::Ui => "UI",
            ErrorCategory::Io => "I/O",
            ErrorCategory::Security => "Security",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ErrorRecord {
    pub ts: f64,
    pub level: ErrorLevel,
    pub kind: ErrorCategory,
    pub msg: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(default, flatten)]
    pub extra: Extra,
}

impl ErrorRecord {
    pub fn new(level: ErrorLevel, kind: ErrorCategory, msg: impl Into<String>) -> Self {
        Self {
            ts: now_ts(),
            level,
            kind,
            msg: msg.into(),
            path: None,
            task_id: None,
            extra: Extra::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SegmentKind {
    Function,
    Class,
    Heading,
    Block,
    File,
}

impl SegmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentKind::Function => "function",
            SegmentKind::Class => "class",
            SegmentKind::Heading => "heading",
            SegmentKind::Block => "block",
            SegmentKind::File => "file",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexSegment {
    pub id: String,
    pub path: String,
    pub scan_root: String,
    pub kind: SegmentKind,
    pub language: String,
    pub start_line: usize,
    pub end_line: usize,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default, flatten)]
    pub extra: Extra,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MetricsEntry {
    pub timestamp: f64,
    pub script_path: String,
    pub score: f64,
    #[serde(default)]
    pub runtime_ms: Option<f64>,
    #[serde(default)]
    pub component: Option<String>,
    #[serde(default)]
    pub metadata: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum OperatorStatus {
    #[default]
    Idle,
    Busy,
    Listening,
    Error,
    Offline,
}

impl OperatorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperatorStatus::Idle => "idle",
            OperatorStatus::Busy => "busy",
            OperatorStatus::Listening => "listening",
            OperatorStatus::Error => "error",
            OperatorStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for OperatorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperatorStatus {
    type Err = String;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        match input.trim().to_lowercase().as_str() {
            "idle" => Ok(OperatorStatus::Idle),
            "busy" => Ok(OperatorStatus::Busy),
            "listening" => Ok(OperatorStatus::Listening),
            "error" => Ok(OperatorStatus::Error),
            "offline" => Ok(OperatorStatus::Offline),
            other => Err(format!("Unknown operator status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OperatorRecord {
    pub name: String,
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_path: Option<PathBuf>,
    #[serde(default)]
    pub status: OperatorStatus,
    #[serde(default)]
    pub status_detail: String,
    /// Set by the registry when a restart hook is attached.
    #[serde(default)]
    pub restartable: bool,
}

impl OperatorRecord {
    pub fn new(name: impl Into<String>, role: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            role: role.into(),
            prompt_path: None,
            status: OperatorStatus::Idle,
            status_detail: String::new(),
            restartable: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PromptDefinition {
    pub slug: String,
    pub title: String,
    #[serde(default)]
    pub default_text: String,
}

impl PromptDefinition {
    pub fn new(
        slug: impl Into<String>,
        title: impl Into<String>,
        default_text: impl Into<String>,
    ) -> Self {
        Self {
            slug: slug.into(),
            title: title.into(),
            default_text: default_text.into(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LaunchSpec {
    pub argv: Vec<String>,
    pub cwd: PathBuf,
    pub target_path: PathBuf,
    pub original_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
}

impl LaunchSpec {
    pub fn new(argv: Vec<String>, cwd: impl Into<PathBuf>, target: impl Into<PathBuf>) -> Self {
        let target = target.into();
        Self {
            argv,
            cwd: cwd.into(),
            original_path: target.clone(),
            target_path: target,
            task_id: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn task_roundtrips_unknown_fields() {
        let raw = json!({
            "id": "tsk_1",
            "title": "wire bus",
            "status": "open",
            "created_ts": 1.0,
            "updated_ts": 2.0,
            "session_id": "s-1",
            "source": "agent",
            "labels": ["core"],
            "diffs": {"added": 3, "removed": 1},
            "files": ["src/lib.rs"],
            "reviewer": {"name": "kim"}
        });
        let task: Task = serde_json::from_value(raw.clone()).expect("decode task");
        assert_eq!(task.status, TaskStatus::Open);
        assert_eq!(task.extra.get("reviewer"), Some(&json!({"name": "kim"})));

        let encoded = serde_json::to_value(&task).expect("encode task");
        assert_eq!(encoded, raw);
    }

    #[test]
    fn unknown_status_is_rejected_at_decode() {
        let raw = json!({
            "id": "tsk_1",
            "title": "t",
            "status": "in-review",
            "created_ts": 1.0,
            "updated_ts": 1.0
        });
        assert!(serde_json::from_value::<Task>(raw).is_err());
    }

    #[test]
    fn error_record_uses_display_names_for_kind() {
        let mut record = ErrorRecord::new(ErrorLevel::Error, ErrorCategory::Io, "disk full");
        record.path = Some("app.py".to_string());
        let encoded = serde_json::to_value(&record).expect("encode");
        assert_eq!(encoded["kind"], "I/O");
        assert_eq!(encoded["level"], "ERROR");

        let decoded: ErrorRecord = serde_json::from_value(json!({
            "ts": 1.0, "level": "WARNING", "kind": "UI", "msg": "slow paint"
        }))
        .expect("decode");
        assert_eq!(decoded.level, ErrorLevel::Warn);
        assert_eq!(decoded.kind, ErrorCategory::Ui);
    }

    #[test]
    fn generated_ids_are_prefixed_and_distinct() {
        let a = Task::generate_id();
        let b = Task::generate_id();
        assert!(a.starts_with("tsk_"));
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }

    #[test]
    fn validate_rejects_time_travel() {
        let mut task = Task::new("tsk_1", "t");
        task.updated_ts = task.created_ts - 1.0;
        assert!(task.validate().is_err());
    }
}
