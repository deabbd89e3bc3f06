//! Per-instance working directories.
//!
//! The manager owns every directory it hands out. Directories outlive the
//! instances that used them and are only removed by [`WorkspaceManager::cleanup_all`],
//! so filesystem probes stay valid after a stop.

use super::{HarnessError, HarnessResult};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};

/// Directory-name prefix for every harness-owned workspace.
pub const WORKSPACE_PREFIX: &str = ".test_";

/// Result of one cleanup pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: usize,
    /// Registered but already gone; skipped.
    pub missing: usize,
    /// Could not be removed; logged and skipped.
    pub failed: Vec<PathBuf>,
}

/// One registered workspace and the name that claimed it.
#[derive(Debug)]
struct Allocation {
    path: PathBuf,
    name: String,
}

/// Registry of allocated workspaces under one root.
#[derive(Debug)]
pub struct WorkspaceManager {
    root: PathBuf,
    registered: Vec<Allocation>,
}

impl WorkspaceManager {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            registered: Vec::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path a workspace name resolves to. Deterministic in `name`.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.root
            .join(format!("{WORKSPACE_PREFIX}{}", sanitize_name(name)))
    }

    /// Create the workspace for `name` and register it.
    ///
    /// The first allocation of a path starts from an empty directory: anything
    /// left there by an earlier run is discarded. Allocating the same name
    /// again while registered returns the same directory untouched. A
    /// different name that sanitizes to a registered path is rejected.
    pub fn allocate(&mut self, name: &str) -> HarnessResult<PathBuf> {
        let path = self.path_for(name);
        let workspace_err = |source: std::io::Error| HarnessError::Workspace {
            path: path.clone(),
            source,
        };

        if let Some(existing) = self.registered.iter().find(|a| a.path == path) {
            if existing.name != name {
                return Err(HarnessError::WorkspaceCollision {
                    path: path.clone(),
                    name: name.to_string(),
                    owner: existing.name.clone(),
                });
            }
            std::fs::create_dir_all(&path).map_err(workspace_err)?;
            return Ok(path);
        }

        match std::fs::remove_dir_all(&path) {
            Ok(()) => info!(workspace = %path.display(), "Discarded leftover workspace"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(workspace_err(err)),
        }
        std::fs::create_dir_all(&path).map_err(workspace_err)?;
        debug!(workspace = %path.display(), name, "Registered workspace");
        self.registered.push(Allocation {
            path: path.clone(),
            name: name.to_string(),
        });
        Ok(path)
    }

    pub fn registered(&self) -> Vec<&Path> {
        self.registered.iter().map(|a| a.path.as_path()).collect()
    }

    pub fn is_registered(&self, path: &Path) -> bool {
        self.registered.iter().any(|a| a.path == path)
    }

    /// Remove every registered workspace and clear the registry.
    ///
    /// Never fails: missing directories are counted and skipped, removal
    /// errors are logged.
    pub fn cleanup_all(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();
        for Allocation { path, .. } in self.registered.drain(..) {
            match std::fs::remove_dir_all(&path) {
                Ok(()) => {
                    debug!(workspace = %path.display(), "Removed workspace");
                    report.removed += 1;
                }
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    report.missing += 1;
                }
                Err(err) => {
                    warn!(workspace = %path.display(), "Failed to remove workspace: {err}");
                    report.failed.push(path);
                }
            }
        }
        report
    }

    /// Remove leftover harness workspaces under the root older than `max_age`.
    ///
    /// Only directories carrying [`WORKSPACE_PREFIX`] that are not currently
    /// registered are considered. Returns the number removed.
    pub fn sweep_stale(&self, max_age: Duration) -> usize {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return 0;
        };

        let now = SystemTime::now();
        let mut cleaned = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let owned = entry
                .file_name()
                .to_str()
                .is_some_and(|name| name.starts_with(WORKSPACE_PREFIX));
            if !owned || !path.is_dir() || self.is_registered(&path) {
                continue;
            }

            let is_stale = entry
                .metadata()
                .ok()
                .and_then(|m| m.modified().ok())
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age >= max_age);

            if is_stale && std::fs::remove_dir_all(&path).is_ok() {
                cleaned += 1;
            }
        }

        if cleaned > 0 {
            info!(
                root = %self.root.display(),
                "Removed {cleaned} stale workspace(s) from an earlier run"
            );
        }
        cleaned
    }
}

/// Lowercase the name and replace anything outside `[a-z0-9_-]` with `_`.
fn sanitize_name(name: &str) -> String {
    let mut sanitized = String::with_capacity(name.len());
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' {
            sanitized.push(ch.to_ascii_lowercase());
        } else {
            sanitized.push('_');
        }
    }
    if sanitized.is_empty() {
        "instance".to_string()
    } else {
        sanitized
    }
}
