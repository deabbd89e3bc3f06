//! Startup signal recognition.
//!
//! The subject announces its state only through free-form output lines. The
//! [`StartupMatcher`] folds those lines into a small state machine so the
//! two-signal client case (identifier AND connection, in either order) is
//! explicit and can be tested without spawning anything.
//!
//! ```text
//!   AwaitingIdentifier ──id──▶ AwaitingConnection ──connected──▶ Ready
//!          │   (server: id alone ─────────────────────────────▶ Ready)
//!          └── deadline / end of stream ──▶ TimedOut / StreamClosed
//! ```

use crate::types::{NodeId, Role};
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;

static NODE_ID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"Node ID: ([a-f0-9]+)").expect("static node id pattern"));

/// Substrings that mark a client as connected.
pub const CONNECTION_MARKERS: [&str; 2] = ["Connected to peer", "✅ Connected"];

/// Extract the identifier token from a `Node ID: <hex>` line.
pub fn extract_node_id(line: &str) -> Option<NodeId> {
    NODE_ID_PATTERN
        .captures(line)
        .and_then(|caps| caps.get(1))
        .and_then(|token| NodeId::parse(token.as_str()))
}

pub fn is_connection_line(line: &str) -> bool {
    CONNECTION_MARKERS.iter().any(|marker| line.contains(marker))
}

/// Why scanning stopped without reaching [`StartupState::Ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupEnd {
    /// The per-role window elapsed.
    DeadlineElapsed,
    /// The merged output stream ended (process exited or closed both pipes).
    StreamClosed,
}

impl fmt::Display for StartupEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::DeadlineElapsed => write!(f, "startup window elapsed"),
            Self::StreamClosed => write!(f, "output ended before startup completed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupState {
    AwaitingIdentifier,
    AwaitingConnection,
    Ready,
    TimedOut,
    StreamClosed,
}

/// Result of feeding one line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchProgress {
    Pending,
    Ready,
}

/// Line-by-line matcher for one spawn attempt.
#[derive(Debug, Clone)]
pub struct StartupMatcher {
    role: Role,
    node_id: Option<NodeId>,
    connected: bool,
    ended: Option<StartupEnd>,
}

impl StartupMatcher {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            node_id: None,
            connected: false,
            ended: None,
        }
    }

    /// Feed one output line.
    ///
    /// The first identifier seen is kept; later `Node ID:` lines never
    /// replace it. Connection markers only matter for clients.
    pub fn observe(&mut self, line: &str) -> MatchProgress {
        if self.ended.is_none() {
            if self.node_id.is_none() {
                self.node_id = extract_node_id(line);
            }
            if self.role == Role::Client && !self.connected && is_connection_line(line) {
                self.connected = true;
            }
        }

        if self.is_ready() {
            MatchProgress::Ready
        } else {
            MatchProgress::Pending
        }
    }

    /// Record that scanning stopped. No-op once ready.
    pub fn finish(&mut self, end: StartupEnd) {
        if !self.is_ready() && self.ended.is_none() {
            self.ended = Some(end);
        }
    }

    pub fn is_ready(&self) -> bool {
        match self.role {
            Role::Server => self.node_id.is_some(),
            Role::Client => self.node_id.is_some() && self.connected,
        }
    }

    pub fn state(&self) -> StartupState {
        if self.is_ready() {
            return StartupState::Ready;
        }
        match self.ended {
            Some(StartupEnd::DeadlineElapsed) => StartupState::TimedOut,
            Some(StartupEnd::StreamClosed) => StartupState::StreamClosed,
            None if self.node_id.is_none() => StartupState::AwaitingIdentifier,
            None => StartupState::AwaitingConnection,
        }
    }

    pub fn ended(&self) -> Option<StartupEnd> {
        self.ended
    }

    pub fn node_id(&self) -> Option<&NodeId> {
        self.node_id.as_ref()
    }

    pub fn missing_identifier(&self) -> bool {
        self.node_id.is_none()
    }

    /// Only clients wait for a connection.
    pub fn missing_connection(&self) -> bool {
        self.role == Role::Client && !self.connected
    }
}
