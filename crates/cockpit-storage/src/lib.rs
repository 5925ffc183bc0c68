pub mod journal;
pub mod metrics_db;
pub mod runlog;

pub use journal::{JournalStore, TaskPatch};
pub use metrics_db::{MetricsDb, METRICS_SCHEMA_VERSION};
pub use runlog::RunLogWrite;

use cockpit_core::{Classify, FailureKind};
use cockpit_safety::SafetyError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error(transparent)]
    Fs(#[from] SafetyError),
    #[error("failed to lock {path}: {source}")]
    Lock {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed record in {path} at line {line}: {reason}")]
    Decode {
        path: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("failed to encode record: {0}")]
    Encode(String),
    #[error("task not found: {0}")]
    NotFound(String),
    #[error("duplicate task id: {0}")]
    Conflict(String),
    #[error("invalid record: {0}")]
    Invalid(String),
}

impl Classify for JournalError {
    fn kind(&self) -> FailureKind {
        match self {
            JournalError::Fs(err) => err.kind(),
            JournalError::Lock { source, .. } => Classify::kind(source),
            JournalError::Decode { .. } | JournalError::Encode(_) | JournalError::Invalid(_) => {
                FailureKind::Validation
            }
            JournalError::NotFound(_) => FailureKind::NotFound,
            JournalError::Conflict(_) => FailureKind::Conflict,
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("unsupported schema version {found}, max supported {supported}")]
    UnsupportedSchemaVersion { found: i64, supported: i64 },
    #[error("io error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Fs(#[from] SafetyError),
}

impl Classify for StorageError {
    fn kind(&self) -> FailureKind {
        match self {
            StorageError::Sqlite(rusqlite::Error::SqliteFailure(code, _))
                if matches!(
                    code.code,
                    rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
                ) =>
            {
                FailureKind::Transient
            }
            StorageError::Sqlite(_) | StorageError::Io { .. } => FailureKind::Io,
            StorageError::Fs(err) => err.kind(),
            StorageError::Serialization(_) | StorageError::UnsupportedSchemaVersion { .. } => {
                FailureKind::Validation
            }
        }
    }
}
