pub mod engine;
pub mod git;
pub mod lines;

pub use engine::{DiffEngine, DiffSource};
pub use lines::{line_delta, LineDelta};

use cockpit_core::{Classify, FailureKind};
use cockpit_safety::SafetyError;
use cockpit_storage::JournalError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiffError {
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error(transparent)]
    Fs(#[from] SafetyError),
    #[error("task not found: {0}")]
    TaskNotFound(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Classify for DiffError {
    fn kind(&self) -> FailureKind {
        match self {
            DiffError::Journal(err) => err.kind(),
            DiffError::Fs(err) => err.kind(),
            DiffError::TaskNotFound(_) => FailureKind::NotFound,
            DiffError::Io { source, .. } => Classify::kind(source),
        }
    }
}
