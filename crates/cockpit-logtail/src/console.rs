use crate::classifier::{ClassifiedLine, ErrorClassifier};
use crate::tailer::LogTailer;
use crate::LogTailError;
use cockpit_core::PeriodicTask;
use cockpit_storage::JournalStore;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, warn};

/// Tails one log file, classifies every new line and journals the
/// ERROR/CRITICAL ones.
pub struct ErrorConsole {
    tailer: LogTailer,
    classifier: ErrorClassifier,
    journal: Arc<JournalStore>,
    last_task_id: Option<String>,
}

impl ErrorConsole {
    pub fn new(tailer: LogTailer, classifier: ErrorClassifier, journal: Arc<JournalStore>) -> Self {
        Self {
            tailer,
            classifier,
            journal,
            last_task_id: None,
        }
    }

    /// Console over `tailer`'s file, tagging records with the file name.
    pub fn for_file(tailer: LogTailer, journal: Arc<JournalStore>) -> Self {
        let source = tailer.path().display().to_string();
        Self::new(tailer, ErrorClassifier::with_source(source), journal)
    }

    /// The most recent `task_id=` seen in the log.
    pub fn last_task_id(&self) -> Option<&str> {
        self.last_task_id.as_deref()
    }

    /// Reads, classifies and persists whatever was appended since the last
    /// poll. A failed journal append stops the batch; lines already read
    /// are not replayed.
    pub fn poll(&mut self) -> Result<Vec<ClassifiedLine>, LogTailError> {
        let lines = self.tailer.read_new_lines()?;
        let mut classified = Vec::with_capacity(lines.len());
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let entry = self.classifier.classify(&line);
            if let Some(task_id) = &entry.task_id {
                self.last_task_id = Some(task_id.clone());
            }
            if let Some(record) = &entry.record {
                self.journal.append_error_record(record)?;
                debug!(kind = record.kind.as_str(), "error_recorded");
            }
            classified.push(entry);
        }
        Ok(classified)
    }
}

/// Polls an [`ErrorConsole`] on a timer and hands each classified line to
/// `sink`.
pub struct ErrorConsoleJob {
    task: PeriodicTask,
}

impl ErrorConsoleJob {
    pub fn start<F>(console: Arc<Mutex<ErrorConsole>>, interval: Duration, sink: F) -> std::io::Result<Self>
    where
        F: Fn(&ClassifiedLine) + Send + 'static,
    {
        let task = PeriodicTask::start("error-console", interval, move || {
            let lines = console
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .poll()
                .map_err(|err| {
                    warn!("error_console_poll_failed: {err}");
                    err.to_string()
                })?;
            for line in &lines {
                sink(line);
            }
            Ok(())
        })?;
        Ok(Self { task })
    }

    pub fn is_running(&self) -> bool {
        self.task.is_running()
    }

    pub fn stop(&mut self) {
        self.task.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cockpit_core::{CockpitPaths, ErrorCategory};
    use cockpit_safety::GuardedFs;
    use std::fs;
    use std::time::Instant;
    use tempfile::TempDir;

    fn journal(dir: &TempDir) -> Arc<JournalStore> {
        Arc::new(JournalStore::new(
            CockpitPaths::new(dir.path()),
            GuardedFs::unguarded(),
        ))
    }

    #[test]
    fn poll_tracks_task_ids_and_skips_blank_lines() {
        let dir = TempDir::new().expect("temp dir");
        let log = dir.path().join("app.log");
        fs::write(
            &log,
            "\n2024-05-01 10:00:00 [INFO] started task_id=tsk_1\n   \n",
        )
        .expect("write log");
        let mut console = ErrorConsole::for_file(LogTailer::new(&log), journal(&dir));
        let lines = console.poll().expect("poll");
        assert_eq!(lines.len(), 1);
        assert!(lines[0].record.is_none());
        assert_eq!(console.last_task_id(), Some("tsk_1"));
        assert!(console.poll().expect("idle poll").is_empty());
    }

    #[test]
    fn job_forwards_lines_to_sink() {
        let dir = TempDir::new().expect("temp dir");
        let log = dir.path().join("app.log");
        fs::write(&log, "2024-05-01 10:00:00 [ERROR] widget render failed\n").expect("write log");
        let store = journal(&dir);
        let console = Arc::new(Mutex::new(ErrorConsole::for_file(
            LogTailer::new(&log),
            Arc::clone(&store),
        )));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut job = ErrorConsoleJob::start(console, Duration::from_millis(20), move |line| {
            sink.lock().expect("lock").push(line.primary);
        })
        .expect("start job");

        let deadline = Instant::now() + Duration::from_secs(5);
        while seen.lock().expect("lock").is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        job.stop();
        assert!(!job.is_running());
        assert_eq!(*seen.lock().expect("lock"), vec![ErrorCategory::Ui]);
        assert_eq!(store.load_errors().expect("errors").len(), 1);
    }
}
