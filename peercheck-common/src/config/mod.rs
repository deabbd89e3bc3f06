//! Configuration system for peercheck.
//!
//! Values are layered, lowest precedence first:
//! - built-in defaults
//! - an optional TOML file
//! - `PEERCHECK_*` environment variables
//! - command-line flags (applied by the binary through [`HarnessSettings::mark`])
//!
//! Every key remembers where its effective value came from so the startup
//! log can show it.

pub mod env;
pub mod source;

pub use env::{EnvError, EnvParser};
pub use source::{ConfigSource, Sourced};

use crate::harness::SupervisorConfig;
use crate::scenarios::{Pacing, PortPlan};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Default location of the subject relative to the invoking directory.
pub const DEFAULT_SUBJECT: &str = "./target/debug/tunnel";

/// Default command for `--build`.
pub const DEFAULT_BUILD_COMMAND: [&str; 2] = ["cargo", "build"];

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: Box<toml::de::Error>,
    },

    #[error("Invalid duration for '{key}': {value}")]
    InvalidDuration { key: String, value: String },

    #[error("build_command must name a program")]
    EmptyBuildCommand,

    #[error("Invalid environment configuration: {}", format_env_errors(.0))]
    Environment(Vec<EnvError>),
}

fn format_env_errors(errors: &[EnvError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Effective harness configuration.
#[derive(Debug, Clone)]
pub struct HarnessSettings {
    /// Path to the subject binary.
    pub subject: PathBuf,
    /// Directory under which instance workspaces are created.
    pub work_root: PathBuf,
    pub server_startup: Duration,
    pub client_startup: Duration,
    pub stop_grace: Duration,
    /// Pause between scenario steps.
    pub settle: Duration,
    /// Pause before filesystem probes.
    pub probe_settle: Duration,
    pub between_scenarios: Duration,
    pub server_base_port: u16,
    pub client_base_port: u16,
    /// Subject output lines kept per instance for diagnostics.
    pub output_tail_lines: usize,
    /// Leftover workspaces older than this are swept at startup.
    pub stale_workspace_age: Duration,
    pub log_level: String,
    /// Program and arguments run by `--build` in the project directory.
    pub build_command: Vec<String>,
    pub build_timeout: Duration,
    sources: BTreeMap<&'static str, ConfigSource>,
}

impl Default for HarnessSettings {
    fn default() -> Self {
        Self {
            subject: PathBuf::from(DEFAULT_SUBJECT),
            work_root: std::env::temp_dir().join("peercheck_workspaces"),
            server_startup: Duration::from_secs(5),
            client_startup: Duration::from_secs(10),
            stop_grace: Duration::from_secs(2),
            settle: Duration::from_secs(1),
            probe_settle: Duration::from_secs(2),
            between_scenarios: Duration::from_secs(1),
            server_base_port: 8080,
            client_base_port: 9080,
            output_tail_lines: 20,
            stale_workspace_age: Duration::from_secs(3600),
            log_level: "info".to_string(),
            build_command: DEFAULT_BUILD_COMMAND.iter().map(|s| s.to_string()).collect(),
            build_timeout: Duration::from_secs(600),
            sources: BTreeMap::new(),
        }
    }
}

/// On-disk TOML shape. Durations are humantime strings.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    subject: Option<PathBuf>,
    work_root: Option<PathBuf>,
    server_startup: Option<String>,
    client_startup: Option<String>,
    stop_grace: Option<String>,
    settle: Option<String>,
    probe_settle: Option<String>,
    between_scenarios: Option<String>,
    server_base_port: Option<u16>,
    client_base_port: Option<u16>,
    output_tail_lines: Option<usize>,
    stale_workspace_age: Option<String>,
    log_level: Option<String>,
    build_command: Option<Vec<String>>,
    build_timeout: Option<String>,
}

impl HarnessSettings {
    /// Load defaults, then the optional file, then the environment.
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut settings = Self::default();
        if let Some(path) = config_path {
            let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
            settings.apply_toml(&contents).map_err(|err| match err {
                ConfigError::Parse { source, .. } => ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                },
                other => other,
            })?;
        }
        settings.apply_env()?;
        Ok(settings)
    }

    /// Merge a TOML document over the current values.
    pub fn apply_toml(&mut self, contents: &str) -> Result<(), ConfigError> {
        let file: FileConfig = toml::from_str(contents).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source: Box::new(source),
        })?;

        if let Some(subject) = file.subject {
            self.subject = subject;
            self.mark("subject", ConfigSource::File);
        }
        if let Some(work_root) = file.work_root {
            self.work_root = work_root;
            self.mark("work_root", ConfigSource::File);
        }

        let durations = [
            ("server_startup", file.server_startup),
            ("client_startup", file.client_startup),
            ("stop_grace", file.stop_grace),
            ("settle", file.settle),
            ("probe_settle", file.probe_settle),
            ("between_scenarios", file.between_scenarios),
            ("stale_workspace_age", file.stale_workspace_age),
            ("build_timeout", file.build_timeout),
        ];
        for (key, raw) in durations {
            let Some(raw) = raw else { continue };
            let parsed =
                humantime::parse_duration(raw.trim()).map_err(|_| ConfigError::InvalidDuration {
                    key: key.to_string(),
                    value: raw.clone(),
                })?;
            *self.duration_mut(key) = parsed;
            self.mark(key, ConfigSource::File);
        }

        if let Some(port) = file.server_base_port {
            self.server_base_port = port;
            self.mark("server_base_port", ConfigSource::File);
        }
        if let Some(port) = file.client_base_port {
            self.client_base_port = port;
            self.mark("client_base_port", ConfigSource::File);
        }
        if let Some(lines) = file.output_tail_lines {
            self.output_tail_lines = lines;
            self.mark("output_tail_lines", ConfigSource::File);
        }
        if let Some(level) = file.log_level {
            self.log_level = level.to_lowercase();
            self.mark("log_level", ConfigSource::File);
        }
        if let Some(command) = file.build_command {
            if command.first().is_none_or(|program| program.trim().is_empty()) {
                return Err(ConfigError::EmptyBuildCommand);
            }
            self.build_command = command;
            self.mark("build_command", ConfigSource::File);
        }
        Ok(())
    }

    /// Apply `PEERCHECK_*` overrides. All invalid variables are reported together.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        let mut parser = EnvParser::new();

        macro_rules! apply {
            ($key:literal, $sourced:expr, $field:expr) => {{
                let mut source = ConfigSource::Default;
                $sourced.apply_to(&mut $field, &mut source);
                if source == ConfigSource::Environment {
                    self.mark($key, source);
                }
            }};
        }

        apply!("subject", parser.get_path("SUBJECT"), self.subject);
        apply!("work_root", parser.get_path("WORK_ROOT"), self.work_root);
        apply!(
            "server_startup",
            parser.get_duration("SERVER_STARTUP"),
            self.server_startup
        );
        apply!(
            "client_startup",
            parser.get_duration("CLIENT_STARTUP"),
            self.client_startup
        );
        apply!("stop_grace", parser.get_duration("STOP_GRACE"), self.stop_grace);
        apply!("settle", parser.get_duration("SETTLE"), self.settle);
        apply!(
            "probe_settle",
            parser.get_duration("PROBE_SETTLE"),
            self.probe_settle
        );
        apply!(
            "between_scenarios",
            parser.get_duration("BETWEEN_SCENARIOS"),
            self.between_scenarios
        );
        apply!(
            "server_base_port",
            parser.get_port("SERVER_BASE_PORT"),
            self.server_base_port
        );
        apply!(
            "client_base_port",
            parser.get_port("CLIENT_BASE_PORT"),
            self.client_base_port
        );
        apply!(
            "output_tail_lines",
            parser.get_usize_range("OUTPUT_TAIL_LINES", 0, 10_000),
            self.output_tail_lines
        );
        apply!(
            "stale_workspace_age",
            parser.get_duration("STALE_WORKSPACE_AGE"),
            self.stale_workspace_age
        );
        apply!("log_level", parser.get_log_level("LOG_LEVEL"), self.log_level);
        apply!(
            "build_command",
            parser.get_command("BUILD_COMMAND"),
            self.build_command
        );
        apply!(
            "build_timeout",
            parser.get_duration("BUILD_TIMEOUT"),
            self.build_timeout
        );

        if parser.has_errors() {
            return Err(ConfigError::Environment(parser.take_errors()));
        }
        Ok(())
    }

    /// Record the origin of a key's effective value.
    pub fn mark(&mut self, key: &'static str, source: ConfigSource) {
        self.sources.insert(key, source);
    }

    /// Origin of a key's effective value.
    pub fn source_of(&self, key: &str) -> ConfigSource {
        self.sources
            .get(key)
            .cloned()
            .unwrap_or(ConfigSource::Default)
    }

    /// Make relative subject/work-root paths absolute against `base`.
    ///
    /// The subject is spawned with its workspace as current directory, so a
    /// relative executable path would otherwise resolve inside the workspace.
    pub fn resolve_paths(&mut self, base: &Path) {
        if self.subject.is_relative() {
            self.subject = base.join(&self.subject);
        }
        if self.work_root.is_relative() {
            self.work_root = base.join(&self.work_root);
        }
    }

    pub fn supervisor_config(&self) -> SupervisorConfig {
        SupervisorConfig {
            server_startup: self.server_startup,
            client_startup: self.client_startup,
            stop_grace: self.stop_grace,
            output_tail_lines: self.output_tail_lines,
        }
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            settle: self.settle,
            probe_settle: self.probe_settle,
            between_scenarios: self.between_scenarios,
        }
    }

    pub fn ports(&self) -> PortPlan {
        PortPlan {
            server_base: self.server_base_port,
            client_base: self.client_base_port,
        }
    }

    /// Replace the build command with a whitespace-separated command line.
    pub fn set_build_command(&mut self, command_line: &str) -> Result<(), ConfigError> {
        let command: Vec<String> = command_line.split_whitespace().map(str::to_string).collect();
        if command.is_empty() {
            return Err(ConfigError::EmptyBuildCommand);
        }
        self.build_command = command;
        Ok(())
    }

    /// `(key, value, source)` triples for the startup log.
    pub fn describe(&self) -> Vec<(&'static str, String, ConfigSource)> {
        let entries: [(&'static str, String); 15] = [
            ("subject", self.subject.display().to_string()),
            ("work_root", self.work_root.display().to_string()),
            ("server_startup", humantime::format_duration(self.server_startup).to_string()),
            ("client_startup", humantime::format_duration(self.client_startup).to_string()),
            ("stop_grace", humantime::format_duration(self.stop_grace).to_string()),
            ("settle", humantime::format_duration(self.settle).to_string()),
            ("probe_settle", humantime::format_duration(self.probe_settle).to_string()),
            (
                "between_scenarios",
                humantime::format_duration(self.between_scenarios).to_string(),
            ),
            ("server_base_port", self.server_base_port.to_string()),
            ("client_base_port", self.client_base_port.to_string()),
            ("output_tail_lines", self.output_tail_lines.to_string()),
            (
                "stale_workspace_age",
                humantime::format_duration(self.stale_workspace_age).to_string(),
            ),
            ("log_level", self.log_level.clone()),
            ("build_command", self.build_command.join(" ")),
            ("build_timeout", humantime::format_duration(self.build_timeout).to_string()),
        ];
        entries
            .into_iter()
            .map(|(key, value)| (key, value, self.source_of(key)))
            .collect()
    }

    fn duration_mut(&mut self, key: &str) -> &mut Duration {
        match key {
            "server_startup" => &mut self.server_startup,
            "client_startup" => &mut self.client_startup,
            "stop_grace" => &mut self.stop_grace,
            "settle" => &mut self.settle,
            "probe_settle" => &mut self.probe_settle,
            "between_scenarios" => &mut self.between_scenarios,
            "stale_workspace_age" => &mut self.stale_workspace_age,
            "build_timeout" => &mut self.build_timeout,
            other => unreachable!("unknown duration key {other}"),
        }
    }
}

#[cfg(test)]
pub(crate) fn env_test_lock() -> std::sync::MutexGuard<'static, ()> {
    use std::sync::{Mutex, OnceLock};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    ENV_LOCK
        .get_or_init(|| Mutex::new(()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
