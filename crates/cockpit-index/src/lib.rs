//! Repository content index, file reference completion and the watcher
//! that keeps completion current.

pub mod embed;
pub mod index;
pub mod policy;
pub mod reference;
pub mod search;
pub mod segment;
pub mod watcher;

use cockpit_core::{Classify, FailureKind};
use cockpit_safety::SafetyError;
use std::path::PathBuf;
use thiserror::Error;

pub use embed::{cosine, Embedder, HashingEmbedder, HASHING_DIMENSIONS};
pub use index::{segment_id, IndexConfig, RebuildSummary, RepoIndex};
pub use policy::IgnorePolicy;
pub use reference::{ReferenceHelper, Suggestion, SuggestionKind};
pub use search::{keyword_search, SearchHit};
pub use segment::{segment_file, Language, SegmentLimits};
pub use watcher::{ReferenceWatcher, REFRESH_DEBOUNCE};

#[derive(Debug, Error)]
pub enum IndexError {
    #[error(transparent)]
    Fs(#[from] SafetyError),
    #[error("index file not found: {0}")]
    Missing(PathBuf),
    #[error("failed to encode index: {0}")]
    Encode(String),
    #[error("file watcher unavailable: {0}")]
    Watch(String),
}

impl Classify for IndexError {
    fn kind(&self) -> FailureKind {
        match self {
            IndexError::Fs(err) => err.kind(),
            IndexError::Missing(_) => FailureKind::NotFound,
            IndexError::Encode(_) => FailureKind::Validation,
            IndexError::Watch(_) => FailureKind::Transient,
        }
    }
}
