//! Per-step transcript.
//!
//! Every scenario step (spawn, stop, wait, probe, assert) produces one
//! [`TraceEntry`]. Entries are printed to stdout as they happen and kept for
//! the JSON report. This is separate from diagnostic logging on stderr.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::time::Instant;

/// Result column of a trace line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StepOutcome {
    Ok,
    Fail,
    Info,
}

impl fmt::Display for StepOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "ok"),
            Self::Fail => write!(f, "FAIL"),
            Self::Info => write!(f, "info"),
        }
    }
}

impl From<bool> for StepOutcome {
    fn from(passed: bool) -> Self {
        if passed { Self::Ok } else { Self::Fail }
    }
}

/// One step of one scenario.
#[derive(Debug, Clone, Serialize)]
pub struct TraceEntry {
    pub timestamp: DateTime<Utc>,
    /// Elapsed time since the run started.
    pub elapsed_ms: u64,
    pub scenario: String,
    pub action: String,
    pub target: String,
    pub outcome: StepOutcome,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<(String, String)>,
}

impl fmt::Display for TraceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:>6}ms] [{}] {} {} -> {}",
            self.elapsed_ms, self.scenario, self.action, self.target, self.outcome
        )?;
        if !self.context.is_empty() {
            write!(f, " {{")?;
            for (i, (k, v)) in self.context.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{k}={v}")?;
            }
            write!(f, "}}")?;
        }
        Ok(())
    }
}

/// Ordered transcript of a whole run.
#[derive(Debug)]
pub struct TraceLog {
    started: Instant,
    entries: Vec<TraceEntry>,
    print_realtime: bool,
}

impl Default for TraceLog {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceLog {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            entries: Vec::new(),
            print_realtime: true,
        }
    }

    /// Keep entries in memory only.
    pub fn quiet() -> Self {
        Self {
            print_realtime: false,
            ..Self::new()
        }
    }

    pub fn record(
        &mut self,
        scenario: &str,
        action: &str,
        target: &str,
        outcome: StepOutcome,
        context: &[(&str, &str)],
    ) {
        let entry = TraceEntry {
            timestamp: Utc::now(),
            elapsed_ms: self.started.elapsed().as_millis() as u64,
            scenario: scenario.to_string(),
            action: action.to_string(),
            target: target.to_string(),
            outcome,
            context: context
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        };
        if self.print_realtime {
            println!("{entry}");
        }
        self.entries.push(entry);
    }

    /// Print a section header between scenarios.
    pub fn section(&self, title: &str) {
        if self.print_realtime {
            let rule = "=".repeat(60);
            println!("\n{rule}\n{title}\n{rule}");
        }
    }

    pub fn entries(&self) -> &[TraceEntry] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entry_display_matches_transcript_format() {
        let entry = TraceEntry {
            timestamp: Utc::now(),
            elapsed_ms: 1234,
            scenario: "s1".to_string(),
            action: "spawn".to_string(),
            target: "server".to_string(),
            outcome: StepOutcome::Ok,
            context: vec![
                ("port".to_string(), "8080".to_string()),
                ("node_id".to_string(), "abcd".to_string()),
            ],
        };
        assert_eq!(
            entry.to_string(),
            "[  1234ms] [s1] spawn server -> ok {port=8080, node_id=abcd}"
        );
    }

    #[test]
    fn entry_without_context_has_no_braces() {
        let entry = TraceEntry {
            timestamp: Utc::now(),
            elapsed_ms: 5,
            scenario: "s3".to_string(),
            action: "probe".to_string(),
            target: "server/.tunnel_peer".to_string(),
            outcome: StepOutcome::Fail,
            context: Vec::new(),
        };
        assert_eq!(
            entry.to_string(),
            "[     5ms] [s3] probe server/.tunnel_peer -> FAIL"
        );
    }

    #[test]
    fn log_keeps_entries_in_order() {
        let mut log = TraceLog::quiet();
        log.record("s1", "spawn", "server", StepOutcome::Ok, &[]);
        log.record("s2", "spawn", "server", StepOutcome::Ok, &[]);
        log.record("s1", "stop", "server", StepOutcome::Info, &[("how", "graceful")]);

        assert_eq!(log.entries().len(), 3);
        let s1: Vec<_> = log
            .entries()
            .iter()
            .filter(|e| e.scenario == "s1")
            .map(|e| e.action.as_str())
            .collect();
        assert_eq!(s1, vec!["spawn", "stop"]);
        assert_eq!(log.entries()[2].context[0], ("how".to_string(), "graceful".to_string()));
        assert_eq!(StepOutcome::from(false), StepOutcome::Fail);
    }
}
