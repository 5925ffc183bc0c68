use cockpit_core::{Bus, CockpitPaths, DiffSummary, Task};
use cockpit_diff::DiffEngine;
use cockpit_safety::{GuardedFs, SafetyManager};
use cockpit_storage::JournalStore;
use std::fs;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

#[test]
fn snapshot_fallback_tracks_edits_and_is_idempotent() {
    let dir = TempDir::new().expect("temp dir");
    let bus = Bus::new();
    let diffs = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&diffs);
    bus.subscribe("task.diff", move |_, payload| {
        sink.lock().unwrap().push(payload.get("added").cloned());
        Ok(())
    })
    .expect("subscribe");

    let paths = CockpitPaths::new(dir.path());
    let journal = Arc::new(JournalStore::new(paths.clone(), GuardedFs::unguarded()).with_bus(bus));
    let mut task = Task::new("tsk_snap", "snapshot fallback");
    task.created_ts = 1.0;
    task.updated_ts = 1.0;
    journal.append_task(&task).expect("append task");

    let engine = DiffEngine::new(Arc::clone(&journal), dir.path()).without_vcs();
    let notes = dir.path().join("notes.txt");
    let files = vec!["notes.txt".to_string()];

    fs::write(&notes, "first\nsecond\n").expect("seed notes");
    let first = engine
        .record_diff("tsk_snap", Some(&files))
        .expect("first diff");
    assert_eq!((first.added, first.removed), (2, 0));
    assert_eq!(first.files, files);

    assert!(engine.record_diff("tsk_snap", Some(&files)).is_none());

    fs::write(&notes, "first\nthird\n").expect("edit notes");
    let second = engine
        .record_diff("tsk_snap", Some(&files))
        .expect("second diff");
    assert_eq!((second.added, second.removed), (1, 1));

    let stored = journal
        .get_task("tsk_snap")
        .expect("load task")
        .expect("task exists");
    assert_eq!(stored.diffs, DiffSummary { added: 1, removed: 1 });
    assert_eq!(stored.files, files);

    let snapshot = fs::read_to_string(paths.snapshots_dir("tsk_snap").join("notes.txt"))
        .expect("snapshot file");
    assert_eq!(snapshot, "first\nthird");

    assert_eq!(journal.load_diffs(Some("tsk_snap")).expect("diffs").len(), 2);
    assert_eq!(diffs.lock().unwrap().len(), 2);
}

fn seeded_journal(dir: &TempDir, fs: GuardedFs) -> Arc<JournalStore> {
    let journal = Arc::new(JournalStore::new(CockpitPaths::new(dir.path()), fs));
    let mut task = Task::new("tsk_edits", "incremental edits");
    task.created_ts = 1.0;
    task.updated_ts = 1.0;
    journal.append_task(&task).expect("append task");
    journal
}

#[test]
fn same_shaped_edits_are_each_recorded() {
    let dir = TempDir::new().expect("temp dir");
    let journal = seeded_journal(&dir, GuardedFs::unguarded());
    let engine = DiffEngine::new(Arc::clone(&journal), dir.path()).without_vcs();
    let notes = dir.path().join("notes.txt");
    let files = vec!["notes.txt".to_string()];

    fs::write(&notes, "first\nsecond\n").expect("seed notes");
    engine.record_diff("tsk_edits", Some(&files)).expect("seed diff");

    for line in ["third", "fourth", "fifth"] {
        fs::write(&notes, format!("first\n{line}\n")).expect("edit notes");
        let diff = engine
            .record_diff("tsk_edits", Some(&files))
            .expect("edit recorded");
        assert_eq!((diff.added, diff.removed), (1, 1), "edit to {line}");
    }
    assert_eq!(journal.load_diffs(Some("tsk_edits")).expect("diffs").len(), 4);
    assert!(engine.record_diff("tsk_edits", None).is_none());
}

#[test]
fn failed_append_keeps_the_previous_baseline() {
    let dir = TempDir::new().expect("temp dir");
    let safety = Arc::new(SafetyManager::new());
    safety.install_file_guard();
    let journal = seeded_journal(&dir, GuardedFs::new(Arc::clone(&safety)));
    let engine = DiffEngine::new(Arc::clone(&journal), dir.path()).without_vcs();
    let notes = dir.path().join("notes.txt");
    let files = vec!["notes.txt".to_string()];

    fs::write(&notes, "first\nsecond\n").expect("seed notes");
    engine.record_diff("tsk_edits", Some(&files)).expect("seed diff");

    let diffs_path = journal.paths().diffs();
    safety.add_protected_path(&diffs_path);
    fs::write(&notes, "first\nthird\n").expect("edit notes");
    assert!(engine.record_diff("tsk_edits", Some(&files)).is_none());
    let snapshot = fs::read_to_string(journal.paths().snapshots_dir("tsk_edits").join("notes.txt"))
        .expect("snapshot file");
    assert_eq!(snapshot, "first\nsecond");

    safety.remove_protected_path(&diffs_path);
    let retried = engine
        .record_diff("tsk_edits", Some(&files))
        .expect("retried diff");
    assert_eq!((retried.added, retried.removed), (1, 1));
}
