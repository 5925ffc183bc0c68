//! Rolling log tail with keyword classification. ERROR and CRITICAL lines
//! are persisted as error records.

pub mod classifier;
pub mod console;
pub mod tailer;

use cockpit_core::{Classify, FailureKind};
use cockpit_storage::JournalError;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use classifier::{extract_task_id, primary_category, ClassifiedLine, ErrorClassifier};
pub use console::{ErrorConsole, ErrorConsoleJob};
pub use tailer::LogTailer;

#[derive(Debug, Error)]
pub enum LogTailError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Journal(#[from] JournalError),
}

impl LogTailError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        LogTailError::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

impl Classify for LogTailError {
    fn kind(&self) -> FailureKind {
        match self {
            LogTailError::Io { source, .. } => Classify::kind(source),
            LogTailError::Journal(err) => err.kind(),
        }
    }
}
