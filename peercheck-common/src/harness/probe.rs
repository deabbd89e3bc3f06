//! Filesystem probes against an instance's workspace.

use super::supervisor::Instance;

/// Whether `name` exists inside the instance's workspace.
///
/// A missing workspace reads the same as a missing file.
pub fn file_exists(instance: &Instance, name: &str) -> bool {
    exists_in(instance.workspace(), name)
}

pub(crate) fn exists_in(workspace: &std::path::Path, name: &str) -> bool {
    workspace.join(name).exists()
}
