use crate::JournalError;
use cockpit_core::{
    now_ts, Bus, CockpitPaths, DiffSnapshot, DiffSummary, ErrorRecord, Extra, Task, TaskEvent,
    TaskEventKind, TaskStatus,
};
use cockpit_safety::{GuardedFs, OpenMode, SafetyError};
use fs2::FileExt;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::ffi::OsString;
use std::fs::File;
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Typed form of a partial task update. Unset fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub status: Option<TaskStatus>,
    pub updated_ts: Option<f64>,
    pub session_id: Option<String>,
    pub source: Option<String>,
    pub labels: Option<Vec<String>>,
    pub diffs: Option<DiffSummary>,
    pub files: Option<Vec<String>>,
    pub run_log_path: Option<String>,
    pub codex_conversation_id: Option<String>,
    pub parent_id: Option<String>,
    pub extra: Extra,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: TaskStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn updated_ts(mut self, ts: f64) -> Self {
        self.updated_ts = Some(ts);
        self
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.labels = Some(labels);
        self
    }

    pub fn diffs(mut self, diffs: DiffSummary) -> Self {
        self.diffs = Some(diffs);
        self
    }

    pub fn files(mut self, files: Vec<String>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn run_log_path(mut self, path: impl Into<String>) -> Self {
        self.run_log_path = Some(path.into());
        self
    }

    pub fn extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    fn apply(&self, task: &mut Task) {
        if let Some(title) = &self.title {
            task.title = title.clone();
        }
        if let Some(status) = self.status {
            task.status = status;
        }
        if let Some(session_id) = &self.session_id {
            task.session_id = session_id.clone();
        }
        if let Some(source) = &self.source {
            task.source = source.clone();
        }
        if let Some(labels) = &self.labels {
            task.labels = labels.clone();
        }
        if let Some(diffs) = self.diffs {
            task.diffs = diffs;
        }
        if let Some(files) = &self.files {
            task.files = files.clone();
        }
        if let Some(path) = &self.run_log_path {
            task.run_log_path = Some(path.clone());
        }
        if let Some(id) = &self.codex_conversation_id {
            task.codex_conversation_id = Some(id.clone());
        }
        if let Some(parent) = &self.parent_id {
            task.parent_id = Some(parent.clone());
        }
        for (key, value) in &self.extra {
            task.extra.insert(key.clone(), value.clone());
        }
        let ts = self.updated_ts.unwrap_or_else(now_ts);
        task.updated_ts = ts.max(task.created_ts);
    }
}

/// Append-only JSONL journals for tasks, events, diffs and errors, rooted
/// under the datasets directory. One writer per file inside the process;
/// appends and rewrites also take an advisory lock for other processes.
pub struct JournalStore {
    paths: CockpitPaths,
    fs: GuardedFs,
    bus: Option<Bus>,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl JournalStore {
    pub fn new(paths: CockpitPaths, fs: GuardedFs) -> Self {
        Self {
            paths,
            fs,
            bus: None,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn paths(&self) -> &CockpitPaths {
        &self.paths
    }

    pub fn fs(&self) -> &GuardedFs {
        &self.fs
    }

    pub fn bus(&self) -> Option<&Bus> {
        self.bus.as_ref()
    }

    pub fn append_task(&self, task: &Task) -> Result<(), JournalError> {
        self.append_tasks(std::slice::from_ref(task))
    }

    /// Appends every task in one locked write; a duplicate id anywhere in the
    /// batch or the journal rejects the whole batch.
    pub fn append_tasks(&self, tasks: &[Task]) -> Result<(), JournalError> {
        if tasks.is_empty() {
            return Ok(());
        }
        let path = self.paths.tasks();
        let lock = self.file_lock(&path);
        {
            let _guard = hold(&lock);
            let mut seen: HashSet<String> = read_jsonl::<Task>(&self.fs, &path, true)?
                .into_iter()
                .map(|task| task.id)
                .collect();
            for task in tasks {
                task.validate().map_err(JournalError::Invalid)?;
                if !seen.insert(task.id.clone()) {
                    return Err(JournalError::Conflict(task.id.clone()));
                }
            }
            self.append_lines(&path, tasks)?;
        }
        for task in tasks {
            self.publish("task.created", task);
        }
        Ok(())
    }

    /// Creates an open task with a generated `tsk_` id.
    pub fn create_task(
        &self,
        title: &str,
        source: &str,
        session_id: &str,
    ) -> Result<Task, JournalError> {
        let mut task = Task::new(Task::generate_id(), title);
        task.source = source.to_string();
        task.session_id = session_id.to_string();
        self.append_task(&task)?;
        self.append_event(&TaskEvent::new(&task.id, TaskEventKind::Created, source))?;
        Ok(task)
    }

    pub fn append_event(&self, event: &TaskEvent) -> Result<(), JournalError> {
        self.append_events(std::slice::from_ref(event))
    }

    pub fn append_events(&self, events: &[TaskEvent]) -> Result<(), JournalError> {
        if events.is_empty() {
            return Ok(());
        }
        let path = self.paths.task_events();
        let lock = self.file_lock(&path);
        {
            let _guard = hold(&lock);
            self.append_lines(&path, events)?;
        }
        for event in events {
            self.publish("task.event", event);
        }
        Ok(())
    }

    pub fn append_diff(&self, snapshot: &DiffSnapshot) -> Result<(), JournalError> {
        let path = self.paths.diffs();
        let lock = self.file_lock(&path);
        {
            let _guard = hold(&lock);
            self.append_lines(&path, std::slice::from_ref(snapshot))?;
        }
        self.publish("task.diff", snapshot);
        Ok(())
    }

    pub fn append_error_record(&self, record: &ErrorRecord) -> Result<(), JournalError> {
        let path = self.paths.errors();
        let lock = self.file_lock(&path);
        {
            let _guard = hold(&lock);
            self.append_lines(&path, std::slice::from_ref(record))?;
        }
        self.publish("system.error", record);
        Ok(())
    }

    /// Applies `patch` to task `id` and rewrites the tasks file atomically.
    pub fn update_task(&self, id: &str, patch: TaskPatch) -> Result<Task, JournalError> {
        let path = self.paths.tasks();
        let lock = self.file_lock(&path);
        let (updated, previous_status) = {
            let _guard = hold(&lock);
            let _file_lock = JournalLock::acquire(&self.fs, &path)?;
            let mut tasks = read_jsonl::<Task>(&self.fs, &path, true)?;
            let task = tasks
                .iter_mut()
                .find(|task| task.id == id)
                .ok_or_else(|| JournalError::NotFound(id.to_string()))?;
            let previous_status = task.status;
            patch.apply(task);
            task.validate().map_err(JournalError::Invalid)?;
            let updated = task.clone();

            let mut buffer = Vec::new();
            for task in &tasks {
                encode_line(&mut buffer, task)?;
            }
            self.fs.write_atomic(&path, &buffer)?;
            (updated, previous_status)
        };

        self.publish("task.updated", &updated);
        if updated.status != previous_status {
            self.publish_value(
                "task.status",
                json!({
                    "id": updated.id,
                    "status": updated.status,
                    "previous": previous_status,
                    "updated_ts": updated.updated_ts,
                }),
            );
            if updated.status == TaskStatus::Deleted {
                self.publish_value("task.deleted", json!({"id": updated.id}));
            }
        }
        Ok(updated)
    }

    /// Moves a task to `status` and records the transition as an event.
    pub fn transition(&self, id: &str, status: TaskStatus, by: &str) -> Result<Task, JournalError> {
        let before = self
            .get_task(id)?
            .ok_or_else(|| JournalError::NotFound(id.to_string()))?;
        let task = self.update_task(id, TaskPatch::new().status(status))?;
        let kind = if status == TaskStatus::Deleted {
            TaskEventKind::Deleted
        } else {
            TaskEventKind::StatusChanged
        };
        let mut event = TaskEvent::new(id, kind, by);
        event.extra.insert("from".to_string(), json!(before.status));
        event.extra.insert("to".to_string(), json!(status));
        self.append_event(&event)?;
        Ok(task)
    }

    pub fn load_tasks(&self) -> Result<Vec<Task>, JournalError> {
        read_jsonl(&self.fs, &self.paths.tasks(), true)
    }

    pub fn get_task(&self, id: &str) -> Result<Option<Task>, JournalError> {
        Ok(self.load_tasks()?.into_iter().find(|task| task.id == id))
    }

    pub fn load_events(&self, task_id: Option<&str>) -> Result<Vec<TaskEvent>, JournalError> {
        let events: Vec<TaskEvent> = read_jsonl(&self.fs, &self.paths.task_events(), false)?;
        Ok(filter_by_task(events, task_id, |event| &event.task_id))
    }

    pub fn load_diffs(&self, task_id: Option<&str>) -> Result<Vec<DiffSnapshot>, JournalError> {
        let diffs: Vec<DiffSnapshot> = read_jsonl(&self.fs, &self.paths.diffs(), false)?;
        Ok(filter_by_task(diffs, task_id, |diff| &diff.task_id))
    }

    pub fn last_diff(&self, task_id: &str) -> Result<Option<DiffSnapshot>, JournalError> {
        Ok(self.load_diffs(Some(task_id))?.pop())
    }

    pub fn load_errors(&self) -> Result<Vec<ErrorRecord>, JournalError> {
        read_jsonl(&self.fs, &self.paths.errors(), false)
    }

    pub(crate) fn file_lock(&self, path: &Path) -> Arc<Mutex<()>> {
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(path.to_path_buf()).or_default())
    }

    fn append_lines<T: Serialize>(&self, path: &Path, records: &[T]) -> Result<(), JournalError> {
        let mut buffer = Vec::new();
        for record in records {
            encode_line(&mut buffer, record)?;
        }
        append_locked(&self.fs, path, &buffer)
    }

    fn publish<T: Serialize>(&self, topic: &str, payload: &T) {
        if let Some(bus) = &self.bus {
            if let Err(err) = bus.publish_json(topic, payload) {
                warn!(topic, "journal_publish_failed: {err}");
            }
        }
    }

    pub(crate) fn publish_value(&self, topic: &str, payload: Value) {
        if let Some(bus) = &self.bus {
            if let Err(err) = bus.publish(topic, payload) {
                warn!(topic, "journal_publish_failed: {err}");
            }
        }
    }
}

pub(crate) fn hold(lock: &Mutex<()>) -> MutexGuard<'_, ()> {
    lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn encode_line<T: Serialize>(buffer: &mut Vec<u8>, record: &T) -> Result<(), JournalError> {
    serde_json::to_writer(&mut *buffer, record)
        .map_err(|err| JournalError::Encode(err.to_string()))?;
    buffer.push(b'\n');
    Ok(())
}

/// Exclusive advisory lock on the `<name>.lock` sibling of a journal file,
/// released on drop. The data file itself is replaced by atomic rewrites,
/// so the lock lives beside it.
pub(crate) struct JournalLock {
    file: File,
}

impl JournalLock {
    pub(crate) fn acquire(fs: &GuardedFs, path: &Path) -> Result<Self, JournalError> {
        if let Some(parent) = path.parent() {
            fs.create_dir_all(parent)?;
        }
        let lock_path = lock_sibling(path);
        let file = fs.open(&lock_path, OpenMode::AppendCreate)?;
        file.lock_exclusive().map_err(|source| JournalError::Lock {
            path: lock_path,
            source,
        })?;
        Ok(Self { file })
    }
}

impl Drop for JournalLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

pub(crate) fn lock_sibling(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| OsString::from("journal"));
    name.push(".lock");
    path.with_file_name(name)
}

/// Appends `bytes` under the journal lock and fsyncs before the lock is
/// released. The file is opened after locking so a concurrent rewrite is
/// never appended to through a stale handle.
pub(crate) fn append_locked(fs: &GuardedFs, path: &Path, bytes: &[u8]) -> Result<(), JournalError> {
    let _lock = JournalLock::acquire(fs, path)?;
    let mut file = fs.open(path, OpenMode::AppendCreate)?;
    file.write_all(bytes)
        .and_then(|_| file.flush())
        .and_then(|_| file.sync_all())
        .map_err(|err| SafetyError::io(path, err))?;
    Ok(())
}

/// Reads a JSONL file; a missing file is empty. Strict reads fail on the
/// first malformed line, lenient reads skip it with a warning.
pub(crate) fn read_jsonl<T: DeserializeOwned>(
    fs: &GuardedFs,
    path: &Path,
    strict: bool,
) -> Result<Vec<T>, JournalError> {
    let content = match read_to_string(fs, path)? {
        Some(content) => content,
        None => return Ok(Vec::new()),
    };
    let mut records = Vec::new();
    for (idx, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<T>(line) {
            Ok(record) => records.push(record),
            Err(err) if strict => {
                return Err(JournalError::Decode {
                    path: path.to_path_buf(),
                    line: idx + 1,
                    reason: err.to_string(),
                });
            }
            Err(err) => {
                warn!("journal_line_skipped: {}:{}: {err}", path.display(), idx + 1);
            }
        }
    }
    debug!(path = %path.display(), count = records.len(), "journal_loaded");
    Ok(records)
}

pub(crate) fn read_to_string(fs: &GuardedFs, path: &Path) -> Result<Option<String>, JournalError> {
    let mut file = match fs.open(path, OpenMode::Read) {
        Ok(file) => file,
        Err(SafetyError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => {
            return Ok(None)
        }
        Err(err) => return Err(err.into()),
    };
    let mut content = String::new();
    file.read_to_string(&mut content)
        .map_err(|err| SafetyError::io(path, err))?;
    Ok(Some(content))
}

fn filter_by_task<T>(records: Vec<T>, task_id: Option<&str>, key: impl Fn(&T) -> &String) -> Vec<T> {
    match task_id {
        Some(id) => records.into_iter().filter(|record| key(record) == id).collect(),
        None => records,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cockpit_core::{Classify, ErrorCategory, ErrorLevel, FailureKind};
    use cockpit_safety::guarded::temp_sibling;
    use cockpit_safety::SafetyManager;
    use std::fs;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> JournalStore {
        JournalStore::new(CockpitPaths::new(dir.path()), GuardedFs::unguarded())
    }

    fn task(id: &str, created: f64) -> Task {
        let mut task = Task::new(id, format!("task {id}"));
        task.created_ts = created;
        task.updated_ts = created;
        task
    }

    #[test]
    fn append_writes_one_compact_line_per_record() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        let mut first = task("tsk_1", 1.0);
        first.extra.insert("priority".to_string(), json!("high"));
        store.append_task(&first).expect("append");

        let raw = fs::read_to_string(store.paths().tasks()).expect("read");
        assert!(raw.ends_with('\n'));
        assert_eq!(raw.lines().count(), 1);
        let decoded: Task = serde_json::from_str(raw.trim_end()).expect("decode");
        assert_eq!(decoded, first);
    }

    #[test]
    fn duplicate_id_is_a_conflict() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        store.append_task(&task("tsk_1", 1.0)).expect("append");
        let err = store.append_task(&task("tsk_1", 2.0)).unwrap_err();
        assert_eq!(err.kind(), FailureKind::Conflict);

        let err = store
            .append_tasks(&[task("tsk_2", 1.0), task("tsk_2", 1.0)])
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Conflict);
        assert_eq!(store.load_tasks().expect("load").len(), 1);
    }

    #[test]
    fn update_missing_task_is_not_found() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        let err = store
            .update_task("tsk_missing", TaskPatch::new().status(TaskStatus::Closed))
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::NotFound);
    }

    #[test]
    fn update_clamps_timestamp_and_keeps_other_records() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        store
            .append_tasks(&[task("tsk_1", 10.0), task("tsk_2", 10.0)])
            .expect("append");
        let updated = store
            .update_task(
                "tsk_2",
                TaskPatch::new()
                    .updated_ts(5.0)
                    .labels(vec!["core".to_string()])
                    .extra("reviewer", json!("kim")),
            )
            .expect("update");
        assert_eq!(updated.updated_ts, 10.0);
        assert_eq!(updated.labels, vec!["core"]);

        let tasks = store.load_tasks().expect("load");
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0], task("tsk_1", 10.0));
        assert_eq!(tasks[1].extra.get("reviewer"), Some(&json!("kim")));
        assert!(!temp_sibling(&store.paths().tasks()).exists());
    }

    #[test]
    fn malformed_tasks_file_refuses_rewrite() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        store.append_task(&task("tsk_1", 1.0)).expect("append");
        let path = store.paths().tasks();
        let mut raw = fs::read_to_string(&path).expect("read");
        raw.push_str("{broken\n");
        fs::write(&path, &raw).expect("corrupt");

        let err = store
            .update_task("tsk_1", TaskPatch::new().status(TaskStatus::Closed))
            .unwrap_err();
        assert_eq!(err.kind(), FailureKind::Validation);
        assert_eq!(fs::read_to_string(&path).expect("read back"), raw);
    }

    #[test]
    fn status_changes_fan_out_on_the_bus() {
        let dir = TempDir::new().expect("temp dir");
        let bus = Bus::new();
        let topics = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&topics);
        bus.subscribe("task.*", move |topic, _| {
            sink.lock().unwrap().push(topic.to_string());
            Ok(())
        })
        .expect("subscribe");
        let store = store(&dir).with_bus(bus);

        store.append_task(&task("tsk_1", 1.0)).expect("append");
        store
            .transition("tsk_1", TaskStatus::Deleted, "tester")
            .expect("transition");
        assert_eq!(
            *topics.lock().unwrap(),
            vec!["task.created", "task.updated", "task.status", "task.deleted", "task.event"]
        );
        let events = store.load_events(Some("tsk_1")).expect("events");
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, TaskEventKind::Deleted);
        assert_eq!(events[0].extra.get("from"), Some(&json!("open")));
    }

    #[test]
    fn subscriber_can_read_back_the_appended_record() {
        let dir = TempDir::new().expect("temp dir");
        let bus = Bus::new();
        let paths = CockpitPaths::new(dir.path());
        let errors_path = paths.errors();
        let seen = Arc::new(StdMutex::new(0usize));
        let sink = Arc::clone(&seen);
        bus.subscribe("system.error", move |_, _| {
            let raw = fs::read_to_string(&errors_path).map_err(|err| err.to_string())?;
            *sink.lock().unwrap() = raw.lines().count();
            Ok(())
        })
        .expect("subscribe");
        let store = JournalStore::new(paths, GuardedFs::unguarded()).with_bus(bus);

        let record = ErrorRecord::new(ErrorLevel::Error, ErrorCategory::Io, "disk full");
        store.append_error_record(&record).expect("append");
        assert_eq!(*seen.lock().unwrap(), 1);
        let loaded = store.load_errors().expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].msg, record.msg);
        assert_eq!(loaded[0].kind, ErrorCategory::Io);
    }

    #[test]
    fn lenient_reads_skip_garbage_lines() {
        let dir = TempDir::new().expect("temp dir");
        let store = store(&dir);
        let snapshot = DiffSnapshot {
            ts: 1.0,
            task_id: "tsk_1".to_string(),
            added: 2,
            removed: 0,
            files: vec!["notes.txt".to_string()],
            extra: Extra::new(),
        };
        store.append_diff(&snapshot).expect("append");
        let path = store.paths().diffs();
        let mut raw = fs::read_to_string(&path).expect("read");
        raw.push_str("not json\n");
        fs::write(&path, raw).expect("write");

        assert_eq!(store.load_diffs(None).expect("load"), vec![snapshot.clone()]);
        assert_eq!(store.last_diff("tsk_1").expect("last"), Some(snapshot));
        assert_eq!(store.last_diff("tsk_2").expect("last"), None);
    }

    #[test]
    fn rewrite_waits_for_a_foreign_lock_holder_and_keeps_its_append() {
        let dir = TempDir::new().expect("temp dir");
        let store = Arc::new(store(&dir));
        store.append_task(&task("tsk_1", 1.0)).expect("append");
        let path = store.paths().tasks();

        let foreign = JournalLock::acquire(&GuardedFs::unguarded(), &path).expect("foreign lock");
        let (done_tx, done_rx) = std::sync::mpsc::channel();
        let writer = Arc::clone(&store);
        let handle = std::thread::spawn(move || {
            let result = writer.update_task("tsk_1", TaskPatch::new().title("renamed"));
            done_tx.send(()).expect("signal");
            result
        });
        std::thread::sleep(std::time::Duration::from_millis(150));
        assert!(done_rx.try_recv().is_err(), "rewrite ran while the lock was held");

        let mut raw = fs::read_to_string(&path).expect("read");
        raw.push_str(&serde_json::to_string(&task("tsk_2", 2.0)).expect("encode"));
        raw.push('\n');
        fs::write(&path, raw).expect("foreign append");
        drop(foreign);

        let updated = handle.join().expect("join").expect("update");
        assert_eq!(updated.title, "renamed");
        let ids: Vec<String> = store
            .load_tasks()
            .expect("load")
            .into_iter()
            .map(|task| task.id)
            .collect();
        assert_eq!(ids, vec!["tsk_1", "tsk_2"]);
        assert!(lock_sibling(&path).exists());
    }

    #[test]
    fn protected_journal_rejects_appends_without_publishing() {
        let dir = TempDir::new().expect("temp dir");
        let paths = CockpitPaths::new(dir.path());
        let manager = SafetyManager::new();
        manager.add_protected_directory(&paths.datasets_root);
        manager.install_file_guard();
        let bus = Bus::new();
        let hits = Arc::new(StdMutex::new(0usize));
        let sink = Arc::clone(&hits);
        bus.subscribe("task.created", move |_, _| {
            *sink.lock().unwrap() += 1;
            Ok(())
        })
        .expect("subscribe");
        let store = JournalStore::new(paths, GuardedFs::new(Arc::new(manager))).with_bus(bus);

        let err = store.append_task(&task("tsk_1", 1.0)).unwrap_err();
        assert_eq!(err.kind(), FailureKind::SafetyViolation);
        assert_eq!(*hits.lock().unwrap(), 0);
    }
}
