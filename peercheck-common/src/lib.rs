//! Shared library for peercheck.
//!
//! peercheck is a black-box harness for the identity-persistence contracts of
//! a peer-to-peer tunnel binary (the "subject"). The subject is only ever
//! observed from the outside: it is launched with command-line flags, its
//! merged output is scraped for readiness lines, and its working directory is
//! inspected for the persisted peer file.

pub mod config;
pub mod harness;
pub mod logging;
pub mod preflight;
pub mod report;
pub mod scenarios;
pub mod types;

pub use config::{ConfigError, HarnessSettings};
pub use harness::{
    HarnessError, HarnessResult, Instance, SpawnOutcome, StartupFailure, Supervisor,
    WorkspaceManager,
};
pub use logging::{LogConfig, init_logging};
pub use report::{RunOutcome, RunSummary, Reporter};
pub use scenarios::{ScenarioId, ScenarioOutcome};
pub use types::{Launch, NodeId, Role};
