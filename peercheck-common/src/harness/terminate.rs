//! Graceful-then-forced termination of subject processes.
//!
//! Escalation is SIGTERM, a bounded wait for exit, then SIGKILL. The wait is
//! a real deadline on `Child::wait`, so a process that exits early is reaped
//! immediately and one that ignores TERM is killed as soon as the grace
//! period ends.

use super::{HarnessError, HarnessResult};
use std::fmt;
use std::time::Duration;
use tokio::process::Child;
use tracing::{debug, info, warn};

/// How a process ended up stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// Had already exited before any signal was sent.
    AlreadyExited,
    /// Exited within the grace period after SIGTERM.
    Graceful,
    /// Still running after the grace period; killed.
    Forced,
}

impl fmt::Display for Termination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyExited => write!(f, "already_exited"),
            Self::Graceful => write!(f, "graceful"),
            Self::Forced => write!(f, "forced"),
        }
    }
}

/// Stop `child`, escalating to a kill after `grace`.
///
/// Calling this on a process that has already exited is a no-op.
pub async fn terminate(
    child: &mut Child,
    label: &str,
    grace: Duration,
) -> HarnessResult<Termination> {
    let control_error = |pid: u32| {
        let label = label.to_string();
        move |source: std::io::Error| HarnessError::ProcessControl { label, pid, source }
    };

    let pid = child.id().unwrap_or(0);
    if child.try_wait().map_err(control_error(pid))?.is_some() {
        debug!(instance = label, "Process already exited");
        return Ok(Termination::AlreadyExited);
    }

    if !send_term(pid) {
        debug!(instance = label, pid, "SIGTERM not delivered, waiting before kill");
    }

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            info!(instance = label, pid, %status, "Process stopped");
            Ok(Termination::Graceful)
        }
        Ok(Err(source)) => Err(control_error(pid)(source)),
        Err(_) => {
            warn!(
                instance = label,
                pid,
                "Process ignored SIGTERM for {}, killing",
                humantime::format_duration(grace)
            );
            child.kill().await.map_err(control_error(pid))?;
            Ok(Termination::Forced)
        }
    }
}

/// [`terminate`] for cleanup paths: failures are logged, never returned.
pub async fn terminate_best_effort(
    child: &mut Child,
    label: &str,
    grace: Duration,
) -> Option<Termination> {
    match terminate(child, label, grace).await {
        Ok(termination) => Some(termination),
        Err(err) => {
            warn!(instance = label, "Termination failed: {err}");
            if let Err(err) = child.start_kill() {
                debug!(instance = label, "Fallback kill failed: {err}");
            }
            None
        }
    }
}

/// Kill immediately without a grace period. Used for half-started processes.
pub async fn kill_now(child: &mut Child, label: &str) {
    match child.try_wait() {
        Ok(Some(_)) => return,
        Ok(None) => {}
        Err(err) => debug!(instance = label, "try_wait failed before kill: {err}"),
    }
    if let Err(err) = child.kill().await {
        warn!(instance = label, "Failed to kill process: {err}");
    }
}

#[cfg(unix)]
fn send_term(pid: u32) -> bool {
    if pid == 0 {
        return false;
    }
    match std::process::Command::new("kill")
        .arg("-TERM")
        .arg(pid.to_string())
        .output()
    {
        Ok(output) => output.status.success(),
        Err(e) => {
            debug!("Failed to send TERM signal to process {}: {}", pid, e);
            false
        }
    }
}

#[cfg(not(unix))]
fn send_term(_pid: u32) -> bool {
    false
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;
    use tokio::process::Command;

    fn sh(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .unwrap()
    }

    #[tokio::test]
    async fn term_is_enough_for_a_cooperative_process() {
        let mut child = sh("exec sleep 30");
        let outcome = terminate(&mut child, "sleeper", Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(outcome, Termination::Graceful);
    }

    #[tokio::test]
    async fn exited_process_is_a_noop() {
        let mut child = sh("exit 0");
        child.wait().await.unwrap();
        let outcome = terminate(&mut child, "done", Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(outcome, Termination::AlreadyExited);
    }

    #[tokio::test]
    async fn ignoring_term_escalates_to_kill() {
        let mut child = sh("trap '' TERM; while :; do sleep 1; done");
        // Give the shell time to install its trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        let started = std::time::Instant::now();
        let outcome = terminate(&mut child, "stubborn", Duration::from_millis(300))
            .await
            .unwrap();
        assert_eq!(outcome, Termination::Forced);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(child.try_wait().unwrap().is_some());
    }

    #[tokio::test]
    async fn kill_now_reaps_running_process() {
        let mut child = sh("exec sleep 30");
        kill_now(&mut child, "half-started").await;
        assert!(child.try_wait().unwrap().is_some());
    }
}
