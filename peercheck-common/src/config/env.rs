//! Environment variable parsing with type safety.
//!
//! Every `PEERCHECK_*` override is parsed here. Errors are collected rather
//! than returned so a misconfigured environment is reported in one go.

use super::source::{ConfigSource, Sourced};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during environment variable parsing.
#[derive(Debug, Error)]
pub enum EnvError {
    /// Invalid value for a variable.
    #[error("Invalid value for {var}: expected {expected}, got '{value}'")]
    InvalidValue {
        var: String,
        expected: String,
        value: String,
    },

    /// Invalid duration format.
    #[error("Invalid duration for {var}: {value}")]
    InvalidDuration { var: String, value: String },

    /// Value out of valid range.
    #[error("Value out of range for {var}: {value} (valid: {min}..={max})")]
    OutOfRange {
        var: String,
        value: String,
        min: String,
        max: String,
    },

    /// Invalid log level.
    #[error("Invalid log level for {var}: {value}")]
    InvalidLogLevel { var: String, value: String },
}

/// Type-safe environment variable parser.
pub struct EnvParser {
    prefix: &'static str,
    errors: Vec<EnvError>,
}

impl EnvParser {
    /// Create a new parser with the PEERCHECK_ prefix.
    pub fn new() -> Self {
        Self {
            prefix: "PEERCHECK_",
            errors: Vec::new(),
        }
    }

    pub fn errors(&self) -> &[EnvError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<EnvError> {
        std::mem::take(&mut self.errors)
    }

    fn var_name(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }

    /// Get an optional path with ~ expansion (None if unset or empty).
    pub fn get_path(&mut self, name: &str) -> Sourced<Option<PathBuf>> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) if value.trim().is_empty() => Sourced::default_value(None),
            Ok(value) => Sourced::from_env(Some(expand_home(value.trim())), var_name),
            Err(_) => Sourced::default_value(None),
        }
    }

    /// Get an optional port number.
    pub fn get_port(&mut self, name: &str) -> Sourced<Option<u16>> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.trim().parse::<u16>() {
                Ok(0) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name.clone(),
                        value,
                        min: "1".to_string(),
                        max: u16::MAX.to_string(),
                    });
                    Sourced::default_value(None)
                }
                Ok(port) => Sourced::from_env(Some(port), var_name),
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name.clone(),
                        expected: "TCP port (1-65535)".to_string(),
                        value,
                    });
                    Sourced::default_value(None)
                }
            },
            Err(_) => Sourced::default_value(None),
        }
    }

    /// Get an optional usize with range validation.
    pub fn get_usize_range(&mut self, name: &str, min: usize, max: usize) -> Sourced<Option<usize>> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match value.trim().parse::<usize>() {
                Ok(n) if n >= min && n <= max => Sourced::from_env(Some(n), var_name),
                Ok(n) => {
                    self.errors.push(EnvError::OutOfRange {
                        var: var_name.clone(),
                        value: n.to_string(),
                        min: min.to_string(),
                        max: max.to_string(),
                    });
                    Sourced::default_value(None)
                }
                Err(_) => {
                    self.errors.push(EnvError::InvalidValue {
                        var: var_name.clone(),
                        expected: "unsigned integer".to_string(),
                        value,
                    });
                    Sourced::default_value(None)
                }
            },
            Err(_) => Sourced::default_value(None),
        }
    }

    /// Get an optional human-readable duration (`500ms`, `5s`, `1h`).
    pub fn get_duration(&mut self, name: &str) -> Sourced<Option<Duration>> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => match humantime::parse_duration(value.trim()) {
                Ok(duration) => Sourced::from_env(Some(duration), var_name),
                Err(_) => {
                    self.errors.push(EnvError::InvalidDuration {
                        var: var_name.clone(),
                        value,
                    });
                    Sourced::default_value(None)
                }
            },
            Err(_) => Sourced::default_value(None),
        }
    }

    /// Get an optional whitespace-separated command line (None if unset or blank).
    pub fn get_command(&mut self, name: &str) -> Sourced<Option<Vec<String>>> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => {
                let argv: Vec<String> = value.split_whitespace().map(str::to_string).collect();
                if argv.is_empty() {
                    Sourced::default_value(None)
                } else {
                    Sourced::from_env(Some(argv), var_name)
                }
            }
            Err(_) => Sourced::default_value(None),
        }
    }

    /// Get an optional log level, validated against the levels tracing knows.
    pub fn get_log_level(&mut self, name: &str) -> Sourced<Option<String>> {
        let var_name = self.var_name(name);
        match env::var(&var_name) {
            Ok(value) => {
                let lower = value.trim().to_lowercase();
                match lower.as_str() {
                    "trace" | "debug" | "info" | "warn" | "error" | "off" => {
                        Sourced::from_env(Some(lower), var_name)
                    }
                    _ => {
                        self.errors.push(EnvError::InvalidLogLevel {
                            var: var_name.clone(),
                            value,
                        });
                        Sourced::default_value(None)
                    }
                }
            }
            Err(_) => Sourced::default_value(None),
        }
    }
}

impl Default for EnvParser {
    fn default() -> Self {
        Self::new()
    }
}

fn expand_home(value: &str) -> PathBuf {
    if let Some(stripped) = value.strip_prefix("~/")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(stripped);
    }
    PathBuf::from(value)
}

impl<T> Sourced<Option<T>> {
    /// Apply an environment override onto `target` and record its source.
    pub(crate) fn apply_to(self, target: &mut T, source: &mut ConfigSource) {
        if let Some(value) = self.value {
            *target = value;
            *source = ConfigSource::Environment;
        }
    }
}

#[cfg(test)]
#[allow(unsafe_code)]
mod tests {
    use super::*;
    use crate::config::env_test_lock;

    fn cleanup_env(vars: &[&str]) {
        for var in vars {
            // SAFETY: Tests hold env_test_lock, no concurrent access to env vars
            unsafe { env::remove_var(var) };
        }
    }

    fn set_env(var: &str, value: &str) {
        // SAFETY: Tests hold env_test_lock, no concurrent access to env vars
        unsafe { env::set_var(var, value) };
    }

    #[test]
    fn test_duration_parsing() {
        let _guard = env_test_lock();
        let vars = ["PEERCHECK_TEST_GRACE"];
        cleanup_env(&vars);

        set_env("PEERCHECK_TEST_GRACE", "1500ms");
        let mut parser = EnvParser::new();
        let parsed = parser.get_duration("TEST_GRACE");
        assert_eq!(parsed.value, Some(Duration::from_millis(1500)));
        assert!(parsed.is_from_env());
        assert!(!parser.has_errors());

        set_env("PEERCHECK_TEST_GRACE", "soon");
        let parsed = parser.get_duration("TEST_GRACE");
        assert_eq!(parsed.value, None);
        assert!(matches!(
            parser.errors()[0],
            EnvError::InvalidDuration { .. }
        ));

        cleanup_env(&vars);
    }

    #[test]
    fn test_port_rejects_zero_and_garbage() {
        let _guard = env_test_lock();
        let vars = ["PEERCHECK_TEST_PORT"];
        cleanup_env(&vars);

        let mut parser = EnvParser::new();
        set_env("PEERCHECK_TEST_PORT", "0");
        assert_eq!(parser.get_port("TEST_PORT").value, None);
        set_env("PEERCHECK_TEST_PORT", "http");
        assert_eq!(parser.get_port("TEST_PORT").value, None);
        set_env("PEERCHECK_TEST_PORT", "8443");
        assert_eq!(parser.get_port("TEST_PORT").value, Some(8443));

        let errors = parser.take_errors();
        assert_eq!(errors.len(), 2);
        assert!(matches!(errors[0], EnvError::OutOfRange { .. }));
        assert!(matches!(errors[1], EnvError::InvalidValue { .. }));
        assert!(!parser.has_errors());

        cleanup_env(&vars);
    }

    #[test]
    fn test_unset_values_fall_back_to_default() {
        let _guard = env_test_lock();
        let vars = ["PEERCHECK_TEST_UNSET", "PEERCHECK_TEST_EMPTY_PATH"];
        cleanup_env(&vars);
        set_env("PEERCHECK_TEST_EMPTY_PATH", "  ");

        let mut parser = EnvParser::new();
        let level = parser.get_log_level("TEST_UNSET");
        assert_eq!(level.source, ConfigSource::Default);
        assert_eq!(level.value, None);
        assert_eq!(parser.get_path("TEST_EMPTY_PATH").value, None);

        cleanup_env(&vars);
    }

    #[test]
    fn test_log_level_is_normalised() {
        let _guard = env_test_lock();
        let vars = ["PEERCHECK_TEST_LEVEL"];
        cleanup_env(&vars);

        set_env("PEERCHECK_TEST_LEVEL", "DEBUG");
        let mut parser = EnvParser::new();
        assert_eq!(
            parser.get_log_level("TEST_LEVEL").value.as_deref(),
            Some("debug")
        );

        set_env("PEERCHECK_TEST_LEVEL", "chatty");
        assert_eq!(parser.get_log_level("TEST_LEVEL").value, None);
        assert!(parser.has_errors());

        cleanup_env(&vars);
    }

    #[test]
    fn test_usize_range() {
        let _guard = env_test_lock();
        let vars = ["PEERCHECK_TEST_TAIL"];
        cleanup_env(&vars);

        set_env("PEERCHECK_TEST_TAIL", "5000");
        let mut parser = EnvParser::new();
        assert_eq!(parser.get_usize_range("TEST_TAIL", 0, 1000).value, None);
        assert!(matches!(parser.errors()[0], EnvError::OutOfRange { .. }));

        cleanup_env(&vars);
    }
}
