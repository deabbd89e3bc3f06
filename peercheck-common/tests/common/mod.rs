//! Shared fixtures for process-level tests.
//!
//! A [`FakeSubject`] is a POSIX shell script that speaks the subject's
//! command-line and output contract closely enough to drive the supervisor
//! and the scenario catalog without the real binary.

#![allow(dead_code)]

use peercheck_common::harness::{SupervisorConfig, WORKSPACE_PREFIX};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// How the fake subject misbehaves, if at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Server keeps `.node_key` in its workspace, client writes
    /// `.tunnel_peer` and reports the connection on stderr.
    Healthy,
    /// Never prints anything.
    Silent,
    /// Prints one line and exits with status 3.
    ExitsImmediately,
    /// Clients report an identifier but never connect.
    ClientNeverConnects,
    /// Healthy output but SIGTERM is ignored.
    IgnoresTerm,
    /// Server generates a fresh identifier on every start.
    ServerForgetsIdentity,
    /// Server writes `.tunnel_peer` as well.
    ServerWritesPeerFile,
    /// Client connects but never writes `.tunnel_peer`.
    ClientSkipsPeerFile,
    /// Server floods ~1 MiB of output after startup, then touches `.drained`.
    Chatty,
    /// Every client reports the same identifier.
    FixedClientIdentity,
    /// Prints one line, closes its output, then exits with status 4 a little later.
    ClosesOutputThenExits,
}

const PRELUDE: &str = r#"#!/bin/sh
port=""
peer=""
while [ $# -gt 0 ]; do
  case "$1" in
    -p) port="$2"; shift 2 ;;
    -c) peer="$2"; shift 2 ;;
    *) shift ;;
  esac
done
rand_id() { od -An -tx1 -N16 /dev/urandom | tr -d ' \n'; }
"#;

impl Behavior {
    fn body(self) -> String {
        let server_id = match self {
            Behavior::ServerForgetsIdentity => "id=$(rand_id)",
            _ => "[ -f .node_key ] || rand_id > .node_key\n  id=$(cat .node_key)",
        };
        let server_extra = match self {
            Behavior::ServerWritesPeerFile => "echo unknown > .tunnel_peer",
            Behavior::Chatty => {
                "head -c 1048576 /dev/zero | tr '\\000' 'x' | fold -w 100\n  touch .drained"
            }
            _ => ":",
        };
        let client_connect = match self {
            Behavior::ClientNeverConnects => ":",
            Behavior::ClientSkipsPeerFile => "echo \"✅ Connected to $peer\" >&2",
            _ => "echo \"$peer\" > .tunnel_peer\n  echo \"Connected to peer $peer\" >&2",
        };
        let trap = match self {
            Behavior::IgnoresTerm => "trap '' TERM\n",
            _ => "",
        };

        let client_id = match self {
            Behavior::FixedClientIdentity => "c0ffee00",
            _ => "$(rand_id)",
        };

        format!(
            r#"{trap}if [ -z "$peer" ]; then
  {server_id}
  echo "listening on port $port"
  echo "Node ID: $id"
  {server_extra}
else
  echo "Node ID: {client_id}"
  echo "dialing $peer"
  {client_connect}
fi
exec sleep 3600
"#
        )
    }

    fn script(self) -> String {
        match self {
            Behavior::Silent => "#!/bin/sh\nexec sleep 3600\n".to_string(),
            Behavior::ExitsImmediately => "#!/bin/sh\necho \"starting up\"\nexit 3\n".to_string(),
            Behavior::ClosesOutputThenExits => {
                "#!/bin/sh\necho \"starting up\"\nexec >/dev/null 2>&1\nsleep 0.3\nexit 4\n"
                    .to_string()
            }
            _ => format!("{PRELUDE}{}", self.body()),
        }
    }
}

/// An executable fake subject in its own temp directory.
pub struct FakeSubject {
    _dir: TempDir,
    path: PathBuf,
}

impl FakeSubject {
    pub fn new(behavior: Behavior) -> Self {
        let dir = TempDir::new().expect("create fake subject dir");
        let path = dir.path().join("tunnel");
        std::fs::write(&path, behavior.script()).expect("write fake subject");
        let mut perms = std::fs::metadata(&path).expect("stat").permissions();
        perms.set_mode(0o755);
        std::fs::set_permissions(&path, perms).expect("chmod fake subject");
        Self { _dir: dir, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Supervisor timings short enough for tests.
pub fn fast_config() -> SupervisorConfig {
    SupervisorConfig {
        server_startup: Duration::from_secs(5),
        client_startup: Duration::from_secs(5),
        stop_grace: Duration::from_millis(500),
        output_tail_lines: 20,
    }
}

/// Like [`fast_config`] but with startup windows for failures expected to
/// hit the deadline.
pub fn short_window_config() -> SupervisorConfig {
    SupervisorConfig {
        server_startup: Duration::from_millis(400),
        client_startup: Duration::from_millis(400),
        ..fast_config()
    }
}

/// Harness-owned directories left under `root`.
pub fn leftover_workspaces(root: &Path) -> Vec<PathBuf> {
    std::fs::read_dir(root)
        .map(|entries| {
            entries
                .flatten()
                .map(|entry| entry.path())
                .filter(|path| {
                    path.file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with(WORKSPACE_PREFIX))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_for(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}
