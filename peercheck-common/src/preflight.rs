//! Environment checks that run before any scenario.
//!
//! Failures here are environment errors: the run is aborted before the first
//! scenario starts.

use crate::harness::{HarnessError, HarnessResult};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info};

/// Lines of build stderr kept in [`HarnessError::BuildFailed`].
const BUILD_STDERR_TAIL: usize = 40;

/// The subject must exist and be a regular file.
pub fn check_subject(path: &Path) -> HarnessResult<()> {
    if path.is_file() {
        debug!(subject = %path.display(), "Subject binary found");
        Ok(())
    } else {
        Err(HarnessError::SubjectMissing {
            path: path.to_path_buf(),
        })
    }
}

/// Command that builds the subject.
#[derive(Debug, Clone)]
pub struct BuildCommand {
    program: String,
    args: Vec<String>,
    dir: PathBuf,
    timeout: Duration,
}

impl BuildCommand {
    pub fn new(program: impl Into<String>, dir: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: dir.into(),
            timeout: Duration::from_secs(600),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the build, returning an error unless it exits successfully.
    pub async fn run(&self) -> HarnessResult<()> {
        let command = self.display();
        info!(dir = %self.dir.display(), "Building subject: {command}");

        let child = Command::new(&self.program)
            .args(&self.args)
            .current_dir(&self.dir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| HarnessError::Spawn {
                program: PathBuf::from(&self.program),
                source,
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => {
                return Err(HarnessError::BuildTimeout {
                    command,
                    timeout: self.timeout,
                });
            }
        };

        if output.status.success() {
            info!("Build succeeded");
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = lines[lines.len().saturating_sub(BUILD_STDERR_TAIL)..].join("\n");
        Err(HarnessError::BuildFailed {
            command,
            exit_code: output.status.code().unwrap_or(-1),
            stderr: tail,
        })
    }
}
