//! Process-lifecycle harness.
//!
//! Provides the building blocks the scenarios are written against:
//! - Workspace allocation and teardown
//! - Subject spawning with deadline-bounded output scraping
//! - Graceful-then-forced termination
//! - Filesystem probes against an instance's workspace
//! - The per-step trace transcript

pub mod probe;
pub mod signals;
pub mod supervisor;
pub mod terminate;
pub mod trace;
pub mod workspace;

pub use probe::file_exists;
pub use signals::{MatchProgress, StartupEnd, StartupMatcher, StartupState};
pub use supervisor::{
    Instance, InstanceKey, SpawnOutcome, StartupFailure, StopOutcome, Supervisor,
    SupervisorConfig,
};
pub use terminate::Termination;
pub use trace::{StepOutcome, TraceEntry, TraceLog};
pub use workspace::{WORKSPACE_PREFIX, WorkspaceManager};

use std::path::PathBuf;
use std::time::Duration;

/// Error type for harness operations.
///
/// Only environment-level and process-control problems are errors. A subject
/// that fails to report its signals in time is an expected outcome and is
/// returned as [`SpawnOutcome::Failed`] instead.
#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("Subject binary not found at {path} (build it first or pass --subject)")]
    SubjectMissing { path: PathBuf },

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Process control failed for {label} (pid={pid}): {source}")]
    ProcessControl {
        label: String,
        pid: u32,
        #[source]
        source: std::io::Error,
    },

    #[error("Workspace {path} is in use by live instance '{holder}'")]
    WorkspaceBusy { path: PathBuf, holder: String },

    #[error("Workspace name '{name}' resolves to {path}, already held by '{owner}'")]
    WorkspaceCollision {
        path: PathBuf,
        name: String,
        owner: String,
    },

    #[error("Workspace error at {path}: {source}")]
    Workspace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Build command '{command}' failed with exit {exit_code}")]
    BuildFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Build command '{command}' timed out after {timeout:?}")]
    BuildTimeout { command: String, timeout: Duration },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for harness operations
pub type HarnessResult<T> = Result<T, HarnessError>;
