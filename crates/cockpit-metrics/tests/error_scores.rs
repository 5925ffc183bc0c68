use cockpit_core::{CockpitPaths, ErrorCategory, ErrorLevel, ErrorRecord, Task};
use cockpit_metrics::{collect_metrics, MetricsRequest};
use cockpit_safety::GuardedFs;
use cockpit_storage::{JournalStore, MetricsDb, TaskPatch};
use std::fs;
use tempfile::TempDir;

fn error_for(path: &str, level: ErrorLevel, ts: f64) -> ErrorRecord {
    let mut record = ErrorRecord::new(level, ErrorCategory::Runtime, format!("boom at {ts}"));
    record.ts = ts;
    record.path = Some(path.to_string());
    record
}

#[test]
fn error_rows_lower_the_script_score() {
    let dir = TempDir::new().expect("temp dir");
    let paths = CockpitPaths::new(dir.path());
    fs::write(dir.path().join("app.py"), "import os\nprint(os.getcwd())\n").expect("write app");
    let journal = JournalStore::new(paths.clone(), GuardedFs::unguarded());

    journal
        .append_error_record(&error_for("app.py", ErrorLevel::Error, 1.0))
        .expect("first error");
    journal
        .append_error_record(&error_for("app.py", ErrorLevel::Warn, 1.5))
        .expect("warning");

    let request = MetricsRequest::new(&paths).store(true);
    let summary = collect_metrics(&request).expect("collect");
    let app = summary.script("app.py").expect("app metrics");
    assert_eq!(app.error_count, 1);
    assert_eq!(app.score, 0.5);
    assert_eq!(app.line_count, 2);
    assert_eq!(app.errors.len(), 1);
    let db = MetricsDb::new(paths.metrics_db());
    assert_eq!(db.row_count().expect("rows"), summary.scripts.len() as u64);
    assert_eq!(summary.stored, summary.scripts.len());

    journal
        .append_error_record(&error_for("app.py", ErrorLevel::Critical, 2.0))
        .expect("second error");
    let summary = collect_metrics(&MetricsRequest::new(&paths)).expect("collect again");
    let app = summary.script("app.py").expect("app metrics");
    assert_eq!(app.error_count, 2);
    assert!((app.score - 1.0 / 3.0).abs() < 1e-9);
    assert_eq!(summary.stored, 0);
    assert_eq!(db.row_count().expect("rows unchanged"), 1);
}

#[test]
fn error_tail_and_last_run_follow_the_journal() {
    let dir = TempDir::new().expect("temp dir");
    let paths = CockpitPaths::new(dir.path());
    fs::create_dir_all(dir.path().join("tools/__pycache__")).expect("mkdir");
    fs::write(dir.path().join("tools/run.py"), "pass\n").expect("write run");
    fs::write(dir.path().join("tools/__pycache__/run.py"), "pass\n").expect("write cache");
    fs::write(dir.path().join("tools/README.md"), "# tools\n").expect("write readme");
    let journal = JournalStore::new(paths.clone(), GuardedFs::unguarded());

    let mut task = Task::new("tsk_metrics", "touch run.py");
    task.created_ts = 100.0;
    task.updated_ts = 100.0;
    journal.append_task(&task).expect("append task");
    journal
        .update_task(
            "tsk_metrics",
            TaskPatch::new()
                .files(vec!["tools/run.py".to_string()])
                .updated_ts(110.0),
        )
        .expect("update task");
    for ts in 1..=4 {
        let absolute = dir.path().join("tools/run.py");
        journal
            .append_error_record(&error_for(&absolute.to_string_lossy(), ErrorLevel::Error, ts as f64))
            .expect("error");
    }

    let request = MetricsRequest::new(&paths).target("tools").error_limit(2);
    let summary = collect_metrics(&request).expect("collect");
    assert_eq!(summary.scripts.len(), 1);
    let run = &summary.scripts[0];
    assert_eq!(run.path, "tools/run.py");
    assert_eq!(run.component, "tools");
    assert_eq!(run.error_count, 4);
    let tail: Vec<f64> = run.errors.iter().map(|record| record.ts).collect();
    assert_eq!(tail, vec![3.0, 4.0]);
    assert_eq!(run.last_run_ts, Some(110.0));
    assert_eq!(summary.components.len(), 1);
    assert_eq!(summary.components[0].file_count, 1);
}
