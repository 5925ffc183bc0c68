//! Prompt texts with local overlays, and the live operator catalogue.

pub mod prompts;
pub mod registry;

use cockpit_core::{Classify, FailureKind};
use cockpit_safety::SafetyError;
use thiserror::Error;

pub use prompts::{PromptStore, PromptWatcher};
pub use registry::{OperatorRegistry, RestartHook};

#[derive(Debug, Error)]
pub enum PromptError {
    #[error(transparent)]
    Fs(#[from] SafetyError),
    #[error("unknown prompt: {0}")]
    UnknownSlug(String),
    #[error("invalid prompt slug: {0:?}")]
    InvalidSlug(String),
}

impl Classify for PromptError {
    fn kind(&self) -> FailureKind {
        match self {
            PromptError::Fs(err) => err.kind(),
            PromptError::UnknownSlug(_) => FailureKind::NotFound,
            PromptError::InvalidSlug(_) => FailureKind::Validation,
        }
    }
}

#[derive(Debug, Error)]
pub enum OperatorError {
    #[error("unknown operator: {0}")]
    NotFound(String),
    #[error("invalid operator name: {0:?}")]
    InvalidName(String),
    #[error("restart of {name} failed: {reason}")]
    RestartFailed { name: String, reason: String },
}

impl Classify for OperatorError {
    fn kind(&self) -> FailureKind {
        match self {
            OperatorError::NotFound(_) => FailureKind::NotFound,
            OperatorError::InvalidName(_) => FailureKind::Validation,
            OperatorError::RestartFailed { .. } => FailureKind::ExternalFailure,
        }
    }
}
