//! Behavioural scenarios.
//!
//! Each scenario is a fixed script of spawn, stop, wait, probe and assert
//! steps run through a [`ScenarioContext`]. A startup failure ends the
//! script early with a failing verdict; only environment errors are
//! returned as `Err`.

mod catalog;

use crate::harness::{
    HarnessResult, Instance, SpawnOutcome, StepOutcome, Supervisor, TraceLog, WorkspaceManager,
    probe,
};
use crate::types::{Launch, NodeId};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

/// Pauses inserted between steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    /// Between ordinary steps.
    pub settle: Duration,
    /// Before filesystem probes, so the subject has flushed its files.
    pub probe_settle: Duration,
    /// Between scenarios, after cleanup.
    pub between_scenarios: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(1),
            probe_settle: Duration::from_secs(2),
            between_scenarios: Duration::from_secs(1),
        }
    }
}

impl Pacing {
    /// No pauses at all.
    pub fn none() -> Self {
        Self {
            settle: Duration::ZERO,
            probe_settle: Duration::ZERO,
            between_scenarios: Duration::ZERO,
        }
    }
}

/// Port assignment. Scenarios use fixed offsets from the two bases so no
/// two scenarios share a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortPlan {
    pub server_base: u16,
    pub client_base: u16,
}

impl Default for PortPlan {
    fn default() -> Self {
        Self {
            server_base: 8080,
            client_base: 9080,
        }
    }
}

impl PortPlan {
    pub fn server(&self, offset: u16) -> u16 {
        self.server_base.saturating_add(offset)
    }

    pub fn client(&self, offset: u16) -> u16 {
        self.client_base.saturating_add(offset)
    }
}

/// The catalog of scenarios, in run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioId {
    StableServerId,
    EphemeralClientId,
    ServerNoPeerPersistence,
    ClientPeerPersistence,
    MultipleClients,
}

impl ScenarioId {
    pub const ALL: [ScenarioId; 5] = [
        Self::StableServerId,
        Self::EphemeralClientId,
        Self::ServerNoPeerPersistence,
        Self::ClientPeerPersistence,
        Self::MultipleClients,
    ];

    /// 1-based catalog position.
    pub fn number(self) -> usize {
        self as usize + 1
    }

    /// Short tag used in trace lines and workspace names (`s1`..`s5`).
    pub fn tag(self) -> String {
        format!("s{}", self.number())
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::StableServerId => "Stable Server ID",
            Self::EphemeralClientId => "Ephemeral Client ID",
            Self::ServerNoPeerPersistence => "Server No Peer Persistence",
            Self::ClientPeerPersistence => "Client Peer Persistence",
            Self::MultipleClients => "Multiple Clients",
        }
    }

    pub fn slug(self) -> &'static str {
        match self {
            Self::StableServerId => "stable-server-id",
            Self::EphemeralClientId => "ephemeral-client-id",
            Self::ServerNoPeerPersistence => "server-no-peer-persistence",
            Self::ClientPeerPersistence => "client-peer-persistence",
            Self::MultipleClients => "multiple-clients",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::StableServerId => "a restarted server in the same workspace keeps its identifier",
            Self::EphemeralClientId => "two client runs report different identifiers",
            Self::ServerNoPeerPersistence => "a server never writes .tunnel_peer",
            Self::ClientPeerPersistence => "a connected client writes .tunnel_peer",
            Self::MultipleClients => "a server accepts a second client after the first leaves",
        }
    }

    /// Run this scenario's script.
    pub async fn run(self, ctx: &mut ScenarioContext<'_>) -> HarnessResult<()> {
        match self {
            Self::StableServerId => catalog::stable_server_id(ctx).await,
            Self::EphemeralClientId => catalog::ephemeral_client_id(ctx).await,
            Self::ServerNoPeerPersistence => catalog::server_no_peer_persistence(ctx).await,
            Self::ClientPeerPersistence => catalog::client_peer_persistence(ctx).await,
            Self::MultipleClients => catalog::multiple_clients(ctx).await,
        }
    }
}

impl fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown scenario '{0}' (use --list to see the catalog)")]
pub struct UnknownScenario(String);

impl FromStr for ScenarioId {
    type Err = UnknownScenario;

    /// Accepts the slug, the tag (`s3`) or the bare number (`3`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|id| {
                id.slug() == wanted || id.tag() == wanted || id.number().to_string() == wanted
            })
            .ok_or_else(|| UnknownScenario(s.to_string()))
    }
}

/// Verdict of one scenario plus the lines explaining it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioOutcome {
    pub passed: bool,
    pub diagnostics: Vec<String>,
}

/// Everything a running scenario may touch.
pub struct ScenarioContext<'a> {
    tag: String,
    supervisor: &'a mut Supervisor,
    workspaces: &'a mut WorkspaceManager,
    trace: &'a mut TraceLog,
    pacing: Pacing,
    ports: PortPlan,
    checks: usize,
    passed: bool,
    diagnostics: Vec<String>,
}

impl<'a> ScenarioContext<'a> {
    pub fn new(
        id: ScenarioId,
        supervisor: &'a mut Supervisor,
        workspaces: &'a mut WorkspaceManager,
        trace: &'a mut TraceLog,
        pacing: Pacing,
        ports: PortPlan,
    ) -> Self {
        Self {
            tag: id.tag(),
            supervisor,
            workspaces,
            trace,
            pacing,
            ports,
            checks: 0,
            passed: true,
            diagnostics: Vec::new(),
        }
    }

    pub fn ports(&self) -> PortPlan {
        self.ports
    }

    /// Verdict so far: logical AND of every check, false after any startup
    /// failure, false if the script never checked anything.
    pub fn into_outcome(self) -> ScenarioOutcome {
        ScenarioOutcome {
            passed: self.passed && self.checks > 0,
            diagnostics: self.diagnostics,
        }
    }

    fn step(
        &mut self,
        action: &str,
        target: &str,
        outcome: StepOutcome,
        context: &[(&str, &str)],
    ) {
        self.trace.record(&self.tag, action, target, outcome, context);
    }

    /// Spawn a server in the workspace named `name` (scoped to this scenario).
    ///
    /// Returns `None` after recording a failing verdict if startup failed.
    pub async fn spawn_server(
        &mut self,
        name: &str,
        port: u16,
    ) -> HarnessResult<Option<Instance>> {
        self.spawn(name, Launch::server(port)).await
    }

    /// Spawn a client of `peer` in the workspace named `name`.
    pub async fn spawn_client(
        &mut self,
        name: &str,
        port: u16,
        peer: &NodeId,
    ) -> HarnessResult<Option<Instance>> {
        self.spawn(name, Launch::client(port, peer.clone())).await
    }

    async fn spawn(&mut self, name: &str, launch: Launch) -> HarnessResult<Option<Instance>> {
        let workspace = self.workspaces.allocate(&format!("{}_{name}", self.tag))?;
        let role = launch.role().to_string();
        let port = launch.port().to_string();
        match self.supervisor.spawn(name, &launch, &workspace).await? {
            SpawnOutcome::Ready(instance) => {
                self.step(
                    "spawn",
                    name,
                    StepOutcome::Ok,
                    &[
                        ("role", role.as_str()),
                        ("port", port.as_str()),
                        ("node_id", instance.node_id().short()),
                    ],
                );
                Ok(Some(instance))
            }
            SpawnOutcome::Failed(failure) => {
                let missing = failure.missing_signals().join("+");
                self.step(
                    "spawn",
                    name,
                    StepOutcome::Fail,
                    &[("port", port.as_str()), ("missing", missing.as_str())],
                );
                self.passed = false;
                self.diagnostics.extend(failure.diagnostics());
                Ok(None)
            }
        }
    }

    pub async fn stop(&mut self, instance: &Instance) -> HarnessResult<()> {
        let result = self.supervisor.stop(instance).await?.to_string();
        self.step(
            "stop",
            instance.label(),
            StepOutcome::Info,
            &[("result", result.as_str())],
        );
        Ok(())
    }

    /// Pause between ordinary steps.
    pub async fn settle(&mut self) {
        self.wait(self.pacing.settle).await;
    }

    /// Pause before a filesystem probe.
    pub async fn settle_before_probe(&mut self) {
        self.wait(self.pacing.probe_settle).await;
    }

    async fn wait(&mut self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        let shown = humantime::format_duration(duration).to_string();
        self.step("wait", &shown, StepOutcome::Info, &[]);
        tokio::time::sleep(duration).await;
    }

    /// Whether `file` exists in the instance's workspace. Traced, not judged.
    pub fn probe(&mut self, instance: &Instance, file: &str) -> bool {
        let present = probe::file_exists(instance, file);
        let target = format!("{}/{file}", instance.label());
        let found = if present { "present" } else { "absent" };
        self.step("probe", &target, StepOutcome::Info, &[("file", found)]);
        present
    }

    /// Record one assertion.
    pub fn check(&mut self, description: &str, passed: bool, context: &[(&str, &str)]) -> bool {
        self.checks += 1;
        self.step("assert", description, StepOutcome::from(passed), context);
        if !passed {
            self.passed = false;
            let details: Vec<String> = context.iter().map(|(k, v)| format!("{k}={v}")).collect();
            if details.is_empty() {
                self.diagnostics.push(format!("assertion failed: {description}"));
            } else {
                self.diagnostics.push(format!(
                    "assertion failed: {description} ({})",
                    details.join(", ")
                ));
            }
        }
        info!(scenario = %self.tag, passed, "{description}");
        passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scenario_ids_parse_from_slug_tag_and_number() {
        assert_eq!(
            "stable-server-id".parse::<ScenarioId>().unwrap(),
            ScenarioId::StableServerId
        );
        assert_eq!("S4".parse::<ScenarioId>().unwrap(), ScenarioId::ClientPeerPersistence);
        assert_eq!("5".parse::<ScenarioId>().unwrap(), ScenarioId::MultipleClients);
        assert!("6".parse::<ScenarioId>().is_err());
        assert!("stable".parse::<ScenarioId>().is_err());
    }

    #[test]
    fn catalog_order_and_names() {
        let names: Vec<_> = ScenarioId::ALL.iter().map(|id| id.name()).collect();
        assert_eq!(
            names,
            vec![
                "Stable Server ID",
                "Ephemeral Client ID",
                "Server No Peer Persistence",
                "Client Peer Persistence",
                "Multiple Clients",
            ]
        );
        assert_eq!(ScenarioId::ServerNoPeerPersistence.tag(), "s3");
    }

    #[test]
    fn port_plan_offsets_from_bases() {
        let ports = PortPlan::default();
        assert_eq!(ports.server(4), 8084);
        assert_eq!(ports.client(6), 9086);
        let high = PortPlan {
            server_base: u16::MAX,
            client_base: 1,
        };
        assert_eq!(high.server(3), u16::MAX);
    }

    #[tokio::test]
    async fn outcome_requires_at_least_one_check() {
        let root = tempfile::TempDir::new().unwrap();
        let mut supervisor = Supervisor::new("/nonexistent", Default::default());
        let mut workspaces = WorkspaceManager::new(root.path());
        let mut trace = TraceLog::quiet();

        let ctx = ScenarioContext::new(
            ScenarioId::StableServerId,
            &mut supervisor,
            &mut workspaces,
            &mut trace,
            Pacing::none(),
            PortPlan::default(),
        );
        assert!(!ctx.into_outcome().passed);

        let mut ctx = ScenarioContext::new(
            ScenarioId::StableServerId,
            &mut supervisor,
            &mut workspaces,
            &mut trace,
            Pacing::none(),
            PortPlan::default(),
        );
        ctx.check("ids match", true, &[]);
        ctx.check("file absent", false, &[("server", "present")]);
        let outcome = ctx.into_outcome();
        assert!(!outcome.passed);
        assert_eq!(
            outcome.diagnostics,
            vec!["assertion failed: file absent (server=present)"]
        );
        assert_eq!(trace.entries().len(), 2);
    }
}
