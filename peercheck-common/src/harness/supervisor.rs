//! Process supervisor.
//!
//! Spawns the subject in a workspace, scrapes its merged stdout/stderr for
//! startup signals under a deadline, and owns every live child process until
//! it is stopped. Children are registered before their output is read so an
//! interrupted spawn is still reachable by [`Supervisor::stop_all`].

use super::signals::{MatchProgress, StartupEnd, StartupMatcher};
use super::terminate::{self, Termination};
use super::{HarnessError, HarnessResult};
use crate::types::{Launch, NodeId, Role};
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

/// Timing and buffering knobs for the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SupervisorConfig {
    /// Window for a server to report its identifier.
    pub server_startup: Duration,
    /// Window for a client to report identifier and connection.
    pub client_startup: Duration,
    /// Wait after SIGTERM before killing.
    pub stop_grace: Duration,
    /// Recent output lines kept per instance.
    pub output_tail_lines: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            server_startup: Duration::from_secs(5),
            client_startup: Duration::from_secs(10),
            stop_grace: Duration::from_secs(2),
            output_tail_lines: 20,
        }
    }
}

impl SupervisorConfig {
    pub fn startup_window(&self, role: Role) -> Duration {
        match role {
            Role::Server => self.server_startup,
            Role::Client => self.client_startup,
        }
    }
}

/// Registry key of a spawned process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct InstanceKey(u64);

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A subject process that completed startup.
///
/// The child handle stays in the supervisor's registry; an `Instance` is the
/// caller's receipt for it. Its identifier is fixed at construction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    key: InstanceKey,
    label: String,
    role: Role,
    port: u16,
    workspace: PathBuf,
    node_id: NodeId,
    pid: Option<u32>,
}

impl Instance {
    pub fn key(&self) -> InstanceKey {
        self.key
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }
}

/// Why a spawn did not produce a ready instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupFailure {
    pub label: String,
    pub role: Role,
    pub missing_identifier: bool,
    pub missing_connection: bool,
    pub end: StartupEnd,
    pub elapsed: Duration,
    /// Identifier seen before the failure, if any.
    pub node_id: Option<NodeId>,
    pub exit_code: Option<i32>,
    /// Last lines of merged output, oldest first.
    pub output_tail: Vec<String>,
}

impl StartupFailure {
    /// Names of the signals that never arrived.
    pub fn missing_signals(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.missing_identifier {
            missing.push("identifier");
        }
        if self.missing_connection {
            missing.push("connection");
        }
        missing
    }

    /// Diagnostic lines for a scenario report.
    pub fn diagnostics(&self) -> Vec<String> {
        let mut lines = vec![self.to_string()];
        if let Some(code) = self.exit_code {
            lines.push(format!("exit code: {code}"));
        }
        if self.output_tail.is_empty() {
            lines.push("no output captured".to_string());
        } else {
            lines.push(format!("last {} output line(s):", self.output_tail.len()));
            lines.extend(self.output_tail.iter().map(|line| format!("  | {line}")));
        }
        lines
    }
}

impl fmt::Display for StartupFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let missing = match (self.missing_identifier, self.missing_connection) {
            (true, true) => "no identifier and no connection",
            (true, false) => "no identifier",
            (false, true) => "no connection",
            (false, false) => "startup incomplete",
        };
        write!(
            f,
            "{} ({}) failed to start: {} ({} after {})",
            self.label,
            self.role,
            missing,
            self.end,
            humantime::format_duration(round_millis(self.elapsed))
        )
    }
}

/// Result of [`Supervisor::spawn`].
#[derive(Debug)]
pub enum SpawnOutcome {
    Ready(Instance),
    Failed(StartupFailure),
}

/// Result of [`Supervisor::stop`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    Stopped(Termination),
    /// Not registered (already stopped or cleaned up).
    AlreadyGone,
}

impl fmt::Display for StopOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped(termination) => write!(f, "stopped ({termination})"),
            Self::AlreadyGone => write!(f, "already gone"),
        }
    }
}

/// Bounded ring of recent output lines shared with the reader tasks.
#[derive(Debug, Clone)]
struct OutputTail {
    lines: Arc<Mutex<VecDeque<String>>>,
    capacity: usize,
}

impl OutputTail {
    fn new(capacity: usize) -> Self {
        Self {
            lines: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    fn push(&self, line: &str) {
        if self.capacity == 0 {
            return;
        }
        let mut lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        if lines.len() == self.capacity {
            lines.pop_front();
        }
        lines.push_back(line.to_string());
    }

    fn snapshot(&self) -> Vec<String> {
        let lines = self.lines.lock().unwrap_or_else(|e| e.into_inner());
        lines.iter().cloned().collect()
    }
}

struct ManagedProcess {
    label: String,
    workspace: PathBuf,
    child: Child,
    tail: OutputTail,
}

/// Owner of every live subject process.
pub struct Supervisor {
    program: PathBuf,
    config: SupervisorConfig,
    processes: BTreeMap<InstanceKey, ManagedProcess>,
    next_key: u64,
}

impl Supervisor {
    pub fn new(program: impl Into<PathBuf>, config: SupervisorConfig) -> Self {
        Self {
            program: program.into(),
            config,
            processes: BTreeMap::new(),
            next_key: 1,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    pub fn live_count(&self) -> usize {
        self.processes.len()
    }

    pub fn is_live(&self, instance: &Instance) -> bool {
        self.processes.contains_key(&instance.key)
    }

    /// Recent merged output of a registered instance.
    pub fn output_tail(&self, instance: &Instance) -> Vec<String> {
        self.processes
            .get(&instance.key)
            .map(|process| process.tail.snapshot())
            .unwrap_or_default()
    }

    /// Launch the subject in `workspace` and wait for its startup signals.
    ///
    /// Missing signals are reported as [`SpawnOutcome::Failed`] after the
    /// child has been killed. Only environment problems (the program cannot
    /// be executed, the workspace is held by a live instance) are errors.
    pub async fn spawn(
        &mut self,
        label: &str,
        launch: &Launch,
        workspace: &Path,
    ) -> HarnessResult<SpawnOutcome> {
        if let Some(holder) = self
            .processes
            .values()
            .find(|process| process.workspace == workspace)
        {
            return Err(HarnessError::WorkspaceBusy {
                path: workspace.to_path_buf(),
                holder: holder.label.clone(),
            });
        }

        let role = launch.role();
        let mut child = Command::new(&self.program)
            .args(launch.args())
            .current_dir(workspace)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HarnessError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        let pid = child.id();
        let tail = OutputTail::new(self.config.output_tail_lines);
        let (tx, mut rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            forward_lines(stdout, "stdout", label, tx.clone(), tail.clone());
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(stderr, "stderr", label, tx.clone(), tail.clone());
        }
        drop(tx);

        let key = InstanceKey(self.next_key);
        self.next_key += 1;
        self.processes.insert(
            key,
            ManagedProcess {
                label: label.to_string(),
                workspace: workspace.to_path_buf(),
                child,
                tail: tail.clone(),
            },
        );
        debug!(instance = label, %key, ?pid, %role, port = launch.port(), "Spawned subject");

        let window = self.config.startup_window(role);
        let started = Instant::now();
        let deadline = started + window;
        let mut matcher = StartupMatcher::new(role);
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(line)) => {
                    if matcher.observe(&line) == MatchProgress::Ready {
                        break;
                    }
                }
                Ok(None) => {
                    matcher.finish(StartupEnd::StreamClosed);
                    break;
                }
                Err(_) => {
                    matcher.finish(StartupEnd::DeadlineElapsed);
                    break;
                }
            }
        }
        // Reader tasks keep draining into the tail after this point.
        drop(rx);
        let elapsed = started.elapsed();

        if let Some(node_id) = matcher.node_id().filter(|_| matcher.is_ready()) {
            info!(
                instance = label,
                %role,
                node_id = node_id.short(),
                elapsed_ms = elapsed.as_millis() as u64,
                "Subject ready"
            );
            return Ok(SpawnOutcome::Ready(Instance {
                key,
                label: label.to_string(),
                role,
                port: launch.port(),
                workspace: workspace.to_path_buf(),
                node_id: node_id.clone(),
                pid,
            }));
        }

        let end = matcher.ended().unwrap_or(StartupEnd::DeadlineElapsed);
        let exit_code = match self.processes.remove(&key) {
            Some(mut process) => {
                // Closed pipes usually mean the child is exiting; reap it so
                // its real status is reported.
                let exited = match end {
                    StartupEnd::StreamClosed => {
                        tokio::time::timeout(self.config.stop_grace, process.child.wait())
                            .await
                            .ok()
                            .and_then(Result::ok)
                    }
                    StartupEnd::DeadlineElapsed => None,
                };
                match exited {
                    Some(status) => status.code(),
                    None => {
                        terminate::kill_now(&mut process.child, label).await;
                        process
                            .child
                            .try_wait()
                            .ok()
                            .flatten()
                            .and_then(|status| status.code())
                    }
                }
            }
            None => None,
        };
        let failure = StartupFailure {
            label: label.to_string(),
            role,
            missing_identifier: matcher.missing_identifier(),
            missing_connection: matcher.missing_connection(),
            end,
            elapsed,
            node_id: matcher.node_id().cloned(),
            exit_code,
            output_tail: tail.snapshot(),
        };
        warn!(instance = label, "{failure}");
        Ok(SpawnOutcome::Failed(failure))
    }

    /// Stop a live instance: SIGTERM, then kill after the grace period.
    ///
    /// The workspace is left in place for later probes.
    pub async fn stop(&mut self, instance: &Instance) -> HarnessResult<StopOutcome> {
        let Some(mut process) = self.processes.remove(&instance.key) else {
            debug!(instance = instance.label(), "Stop requested for unregistered instance");
            return Ok(StopOutcome::AlreadyGone);
        };
        let termination =
            terminate::terminate(&mut process.child, &process.label, self.config.stop_grace)
                .await?;
        Ok(StopOutcome::Stopped(termination))
    }

    /// Stop every registered process. Never fails; returns how many were
    /// registered.
    pub async fn stop_all(&mut self) -> usize {
        let processes = std::mem::take(&mut self.processes);
        let count = processes.len();
        for (key, mut process) in processes {
            debug!(instance = %process.label, %key, "Stopping leftover process");
            terminate::terminate_best_effort(
                &mut process.child,
                &process.label,
                self.config.stop_grace,
            )
            .await;
        }
        if count > 0 {
            info!("Stopped {count} leftover process(es)");
        }
        count
    }
}

/// Read `reader` line by line until EOF, logging every line, recording it in
/// `tail` and forwarding it to the startup matcher while anyone listens.
fn forward_lines<R>(
    reader: R,
    stream: &'static str,
    label: &str,
    tx: mpsc::UnboundedSender<String>,
    tail: OutputTail,
) where
    R: AsyncRead + Unpin + Send + 'static,
{
    let label = label.to_string();
    tokio::spawn(async move {
        let mut reader = BufReader::new(reader);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    let line = line.trim_end_matches(['\n', '\r']);
                    trace!(target: "peercheck::subject", instance = %label, stream, "{line}");
                    tail.push(line);
                    // Receiver is gone once startup matching is over.
                    let _ = tx.send(line.to_string());
                }
                Err(err) => {
                    debug!(instance = %label, stream, "Output read failed: {err}");
                    break;
                }
            }
        }
    });
}

fn round_millis(duration: Duration) -> Duration {
    Duration::from_millis(duration.as_millis() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn startup_window_depends_on_role() {
        let config = SupervisorConfig::default();
        assert_eq!(config.startup_window(Role::Server), Duration::from_secs(5));
        assert_eq!(config.startup_window(Role::Client), Duration::from_secs(10));
    }

    #[test]
    fn output_tail_keeps_most_recent_lines() {
        let tail = OutputTail::new(2);
        tail.push("one");
        tail.push("two");
        tail.push("three");
        assert_eq!(tail.snapshot(), vec!["two", "three"]);

        let disabled = OutputTail::new(0);
        disabled.push("ignored");
        assert!(disabled.snapshot().is_empty());
    }

    #[test]
    fn startup_failure_names_missing_signals() {
        let failure = StartupFailure {
            label: "client1".to_string(),
            role: Role::Client,
            missing_identifier: false,
            missing_connection: true,
            end: StartupEnd::DeadlineElapsed,
            elapsed: Duration::from_millis(10_004),
            node_id: NodeId::parse("abcd"),
            exit_code: None,
            output_tail: vec!["Node ID: abcd".to_string()],
        };

        assert_eq!(failure.missing_signals(), vec!["connection"]);
        let text = failure.to_string();
        assert!(text.contains("client1 (client)"));
        assert!(text.contains("no connection"));
        assert!(text.contains("startup window elapsed"));

        let diagnostics = failure.diagnostics();
        assert_eq!(diagnostics.len(), 3);
        assert_eq!(diagnostics[2], "  | Node ID: abcd");
    }

    #[test]
    fn startup_failure_without_output_says_so() {
        let failure = StartupFailure {
            label: "server".to_string(),
            role: Role::Server,
            missing_identifier: true,
            missing_connection: false,
            end: StartupEnd::StreamClosed,
            elapsed: Duration::from_millis(3),
            node_id: None,
            exit_code: Some(1),
            output_tail: Vec::new(),
        };
        assert!(failure.to_string().contains("no identifier"));
        assert_eq!(
            failure.diagnostics(),
            vec![
                failure.to_string(),
                "exit code: 1".to_string(),
                "no output captured".to_string()
            ]
        );
    }
}
