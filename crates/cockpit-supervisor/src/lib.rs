pub mod geometry;
pub mod platform;
pub mod supervisor;

use cockpit_core::{Classify, FailureKind};
use std::io;
use thiserror::Error;

pub use geometry::GeometrySync;
pub use platform::{
    terminate_process, NoWindows, ProcessTable, SysinfoProcessTable, Termination, WindowHandle,
    WindowSystem,
};
pub use supervisor::{
    ExitDetail, ProcessState, ProcessSupervisor, SupervisorConfig, SupervisorEvent, EXITED_DETAIL,
    TERMINATED_DETAIL, WINDOW_CLOSED_DETAIL,
};

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("launch spec has an empty argv")]
    EmptyArgv,
    #[error("process already started")]
    AlreadyStarted,
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to start supervisor thread: {0}")]
    Thread(#[source] io::Error),
}

impl Classify for SupervisorError {
    fn kind(&self) -> FailureKind {
        match self {
            SupervisorError::EmptyArgv => FailureKind::Validation,
            SupervisorError::AlreadyStarted => FailureKind::Conflict,
            SupervisorError::Spawn { .. } => FailureKind::ExternalFailure,
            SupervisorError::Thread(_) => FailureKind::Io,
        }
    }
}
