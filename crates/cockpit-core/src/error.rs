use serde::{Deserialize, Serialize};
use std::fmt;

/// Failure taxonomy shared by every cockpit subsystem.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FailureKind {
    Validation,
    NotFound,
    Conflict,
    Io,
    SafetyViolation,
    ExternalTimeout,
    ExternalFailure,
    Transient,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Validation => "validation",
            FailureKind::NotFound => "not-found",
            FailureKind::Conflict => "conflict",
            FailureKind::Io => "io",
            FailureKind::SafetyViolation => "safety-violation",
            FailureKind::ExternalTimeout => "external-timeout",
            FailureKind::ExternalFailure => "external-failure",
            FailureKind::Transient => "transient",
        }
    }

    /// Transient failures are safe to retry without changing inputs.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FailureKind::Transient | FailureKind::ExternalTimeout)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub trait Classify {
    fn kind(&self) -> FailureKind;
}

impl Classify for std::io::Error {
    fn kind(&self) -> FailureKind {
        match std::io::Error::kind(self) {
            std::io::ErrorKind::NotFound => FailureKind::NotFound,
            std::io::ErrorKind::TimedOut => FailureKind::ExternalTimeout,
            std::io::ErrorKind::Interrupted | std::io::ErrorKind::WouldBlock => {
                FailureKind::Transient
            }
            _ => FailureKind::Io,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_map_onto_taxonomy() {
        let missing = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        assert_eq!(Classify::kind(&missing), FailureKind::NotFound);
        let denied = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "no");
        assert_eq!(Classify::kind(&denied), FailureKind::Io);
        assert!(FailureKind::Transient.is_retryable());
        assert_eq!(FailureKind::SafetyViolation.to_string(), "safety-violation");
    }
}
