pub mod guarded;
pub mod manager;
pub mod risk;

pub use guarded::{GuardedFs, OpenMode};
pub use manager::{
    normalize_path, CommandRequest, Confirmer, NoticeKind, Notifier, SafetyManager, SafetyNotice,
};
pub use risk::{classify_command, RiskMatch, RiskRule};

use cockpit_core::{Classify, FailureKind};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SafetyError {
    #[error("safety violation: {0}")]
    Violation(String),
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SafetyError {
    pub fn io(path: &Path, source: std::io::Error) -> Self {
        SafetyError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn is_violation(&self) -> bool {
        matches!(self, SafetyError::Violation(_))
    }
}

impl Classify for SafetyError {
    fn kind(&self) -> FailureKind {
        match self {
            SafetyError::Violation(_) => FailureKind::SafetyViolation,
            SafetyError::Io { source, .. } => Classify::kind(source),
        }
    }
}
