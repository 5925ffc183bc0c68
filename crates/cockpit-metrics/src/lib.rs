pub mod collector;
pub mod job;

use cockpit_core::{Classify, FailureKind};
use cockpit_storage::{JournalError, StorageError};
use thiserror::Error;

pub use collector::{
    collect_metrics, score_for, ComponentMetrics, MetricsRequest, MetricsSummary, ScriptMetrics,
};
pub use job::MetricsJob;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error(transparent)]
    Journal(#[from] JournalError),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl Classify for MetricsError {
    fn kind(&self) -> FailureKind {
        match self {
            MetricsError::Journal(err) => err.kind(),
            MetricsError::Storage(err) => err.kind(),
        }
    }
}
