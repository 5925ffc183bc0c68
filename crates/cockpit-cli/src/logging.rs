use crate::context::CockpitContext;
use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

pub struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        if let Some(file) = &self.file {
            let _ = lock_file(file).flush();
        }
    }
}

/// Filter from `RUST_LOG`, else `COCKPIT_LOG_LEVEL`, else `info`. Events go
/// to stderr and to the cockpit log file when it can be opened.
pub fn init_logging(ctx: &CockpitContext, debug: bool) -> Option<LogGuard> {
    let level = if debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("COCKPIT_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let guard = match open_log_file(log_path(ctx)) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = guard.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(guard)
}

fn log_path(ctx: &CockpitContext) -> PathBuf {
    ctx.config
        .log_file
        .clone()
        .unwrap_or_else(|| ctx.paths.log_dir().join("cockpit.log"))
}

fn open_log_file(path: PathBuf) -> io::Result<LogGuard> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().create(true).append(true).open(&path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

fn lock_file(file: &Mutex<std::fs::File>) -> std::sync::MutexGuard<'_, std::fs::File> {
    file.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Stdout carries command output, so log lines go to stderr.
struct MultiWriter {
    stderr: io::Stderr,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stderr: io::stderr(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stderr.write_all(buf);
        if let Some(file) = &self.file {
            let _ = lock_file(file).write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stderr.flush();
        if let Some(file) = &self.file {
            let _ = lock_file(file).flush();
        }
        Ok(())
    }
}
