//! Diagnostic logging setup.
//!
//! Human-readable output goes to stderr so it never interleaves with the
//! step transcript on stdout. An optional JSON-lines file captures the same
//! events (including every scraped subject line at `trace`).

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Logging configuration assembled by the binary.
#[derive(Debug, Clone)]
pub struct LogConfig {
    level: String,
    file: Option<PathBuf>,
    ansi: bool,
}

impl LogConfig {
    pub fn new(level: impl Into<String>) -> Self {
        Self {
            level: level.into(),
            file: None,
            ansi: true,
        }
    }

    /// Also write JSON lines to `path`.
    pub fn with_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.file = Some(path.into());
        self
    }

    pub fn without_ansi(mut self) -> Self {
        self.ansi = false;
        self
    }

    /// Directive used when `RUST_LOG` is unset.
    fn default_directive(&self) -> String {
        format!(
            "peercheck={level},peercheck_common={level}",
            level = self.level
        )
    }
}

/// Keeps background log writers alive; drop it last.
pub struct LoggingGuards {
    _file: Option<WorkerGuard>,
}

/// Install the global subscriber.
pub fn init_logging(config: &LogConfig) -> Result<LoggingGuards> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.default_directive()))
        .with_context(|| format!("invalid log level '{}'", config.level))?;

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.ansi)
        .with_target(false)
        .compact();

    let (file_layer, file_guard) = match config.file.as_deref() {
        Some(path) => {
            let (writer, guard) = open_log_file(path)?;
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .with_file(true)
                .with_line_number(true);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("logging already initialised")?;

    Ok(LoggingGuards { _file: file_guard })
}

fn open_log_file(
    path: &Path,
) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard)> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("create log directory {}", dir.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("log file path has no file name: {}", path.display()))?;
    let appender = tracing_appender::rolling::never(&dir, file_name);
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_directive_covers_both_crates() {
        let config = LogConfig::new("debug").with_file("/tmp/peercheck.jsonl");
        assert_eq!(
            config.default_directive(),
            "peercheck=debug,peercheck_common=debug"
        );
        assert_eq!(config.file.as_deref(), Some(Path::new("/tmp/peercheck.jsonl")));
    }
}
