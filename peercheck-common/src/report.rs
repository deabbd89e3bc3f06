//! Run sequencing and the final summary.
//!
//! The [`Reporter`] runs scenarios one at a time. After every scenario (and
//! on interrupt) it stops every live process and removes every workspace
//! before anything else happens, so nothing leaks into the next scenario.

use crate::harness::{
    HarnessError, HarnessResult, Supervisor, TraceEntry, TraceLog, WorkspaceManager,
};
use crate::scenarios::{Pacing, PortPlan, ScenarioContext, ScenarioId, ScenarioOutcome};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Verdict of one scenario in a run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub id: ScenarioId,
    pub name: String,
    pub passed: bool,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub diagnostics: Vec<String>,
}

/// Everything a run produced.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub subject: PathBuf,
    pub results: Vec<ScenarioResult>,
    pub trace: Vec<TraceEntry>,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.results.len()
    }

    pub fn passed(&self) -> usize {
        self.results.iter().filter(|r| r.passed).count()
    }

    pub fn all_passed(&self) -> bool {
        self.passed() == self.total()
    }

    /// `(name, verdict)` pairs in run order.
    pub fn verdicts(&self) -> Vec<(&str, bool)> {
        self.results
            .iter()
            .map(|r| (r.name.as_str(), r.passed))
            .collect()
    }

    /// Human-readable summary block.
    pub fn render(&self) -> String {
        let rule = "=".repeat(60);
        let mut out = String::new();
        out.push_str(&format!("\n{rule}\nTEST SUMMARY\n{rule}\n\n"));
        for result in &self.results {
            let status = if result.passed { "PASS" } else { "FAIL" };
            out.push_str(&format!("  {status}  {}\n", result.name));
            if !result.passed {
                for line in &result.diagnostics {
                    out.push_str(&format!("        {line}\n"));
                }
            }
        }
        out.push('\n');
        if self.all_passed() {
            out.push_str(&format!("✓ All {} scenarios passed\n", self.total()));
        } else {
            out.push_str(&format!(
                "{}/{} scenarios passed\n",
                self.passed(),
                self.total()
            ));
        }
        out
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }

    /// Write the pretty JSON report to `path`, creating parent directories.
    pub fn write_json(&self, path: &Path) -> HarnessResult<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let json = self
            .to_json()
            .map_err(|e| HarnessError::Io(std::io::Error::other(e)))?;
        std::fs::write(path, json)?;
        info!(path = %path.display(), "Wrote run report");
        Ok(())
    }
}

/// How a run ended.
#[derive(Debug)]
pub enum RunOutcome {
    Completed(RunSummary),
    /// Operator interrupt; holds the scenarios finished before it.
    Interrupted(RunSummary),
}

impl RunOutcome {
    pub fn summary(&self) -> &RunSummary {
        match self {
            Self::Completed(summary) | Self::Interrupted(summary) => summary,
        }
    }
}

/// Sequential scenario driver owning the process and workspace registries.
pub struct Reporter {
    supervisor: Supervisor,
    workspaces: WorkspaceManager,
    trace: TraceLog,
    pacing: Pacing,
    ports: PortPlan,
}

impl Reporter {
    pub fn new(
        supervisor: Supervisor,
        workspaces: WorkspaceManager,
        pacing: Pacing,
        ports: PortPlan,
    ) -> Self {
        Self {
            supervisor,
            workspaces,
            trace: TraceLog::new(),
            pacing,
            ports,
        }
    }

    /// Replace the transcript sink (e.g. with [`TraceLog::quiet`]).
    pub fn with_trace(mut self, trace: TraceLog) -> Self {
        self.trace = trace;
        self
    }

    pub fn supervisor(&self) -> &Supervisor {
        &self.supervisor
    }

    pub fn workspaces(&self) -> &WorkspaceManager {
        &self.workspaces
    }

    /// Run `scenarios` in order until done or `interrupt` resolves.
    ///
    /// Full cleanup runs after every scenario and before returning, whatever
    /// the outcome. An environment error from any step aborts the run.
    pub async fn run<F>(
        &mut self,
        scenarios: &[ScenarioId],
        interrupt: F,
    ) -> HarnessResult<RunOutcome>
    where
        F: Future<Output = ()>,
    {
        let started_at = Utc::now();
        let mut results = Vec::with_capacity(scenarios.len());
        let mut interrupted = false;
        tokio::pin!(interrupt);

        for (index, &id) in scenarios.iter().enumerate() {
            if index > 0 && !self.pacing.between_scenarios.is_zero() {
                tokio::select! {
                    biased;
                    _ = &mut interrupt => {
                        interrupted = true;
                        break;
                    }
                    _ = tokio::time::sleep(self.pacing.between_scenarios) => {}
                }
            }

            self.trace
                .section(&format!("SCENARIO {}: {}", id.number(), id.name()));
            info!(scenario = %id.tag(), "Starting scenario: {}", id.name());

            let started = Instant::now();
            let step = tokio::select! {
                biased;
                _ = &mut interrupt => None,
                outcome = self.run_scenario(id) => Some(outcome),
            };
            self.cleanup().await;

            match step {
                None => {
                    warn!(scenario = %id.tag(), "Interrupted, cleaned up");
                    interrupted = true;
                    break;
                }
                Some(Err(err)) => return Err(err),
                Some(Ok(outcome)) => {
                    info!(scenario = %id.tag(), passed = outcome.passed, "Scenario finished");
                    results.push(ScenarioResult {
                        id,
                        name: id.name().to_string(),
                        passed: outcome.passed,
                        duration_ms: started.elapsed().as_millis() as u64,
                        diagnostics: outcome.diagnostics,
                    });
                }
            }
        }

        let summary = RunSummary {
            started_at,
            finished_at: Utc::now(),
            subject: self.supervisor.program().to_path_buf(),
            results,
            trace: self.trace.entries().to_vec(),
        };
        Ok(if interrupted {
            RunOutcome::Interrupted(summary)
        } else {
            RunOutcome::Completed(summary)
        })
    }

    async fn run_scenario(&mut self, id: ScenarioId) -> HarnessResult<ScenarioOutcome> {
        let mut ctx = ScenarioContext::new(
            id,
            &mut self.supervisor,
            &mut self.workspaces,
            &mut self.trace,
            self.pacing,
            self.ports,
        );
        id.run(&mut ctx).await?;
        Ok(ctx.into_outcome())
    }

    /// Stop every live process, then remove every registered workspace.
    pub async fn cleanup(&mut self) {
        let stopped = self.supervisor.stop_all().await;
        let report = self.workspaces.cleanup_all();
        debug!(
            stopped,
            removed = report.removed,
            missing = report.missing,
            failed = report.failed.len(),
            "Cleanup finished"
        );
    }
}
