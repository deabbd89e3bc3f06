//! Core vocabulary shared by the supervisor, scenarios and reporter.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the file a subject writes once it has durably recorded a peer.
pub const PEER_FILE: &str = ".tunnel_peer";

/// Role an instance is launched in. Fixed at spawn time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Server,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// Identifier a subject reports for itself (`Node ID: <hex>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    /// Wrap a token captured from subject output.
    ///
    /// Returns `None` unless the token is non-empty lowercase hex.
    pub fn parse(token: &str) -> Option<Self> {
        let valid = !token.is_empty()
            && token
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        valid.then(|| Self(token.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened form used in trace lines.
    pub fn short(&self) -> &str {
        let end = self.0.len().min(16);
        &self.0[..end]
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Invocation form of the subject.
///
/// Servers run as `<subject> -p <port>`, clients as
/// `<subject> -p <port> -c <peer-identifier>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Launch {
    Server { port: u16 },
    Client { port: u16, peer: NodeId },
}

impl Launch {
    pub fn server(port: u16) -> Self {
        Self::Server { port }
    }

    pub fn client(port: u16, peer: NodeId) -> Self {
        Self::Client { port, peer }
    }

    pub fn role(&self) -> Role {
        match self {
            Self::Server { .. } => Role::Server,
            Self::Client { .. } => Role::Client,
        }
    }

    pub fn port(&self) -> u16 {
        match self {
            Self::Server { port } | Self::Client { port, .. } => *port,
        }
    }

    /// Command-line arguments passed to the subject.
    pub fn args(&self) -> Vec<String> {
        match self {
            Self::Server { port } => vec!["-p".to_string(), port.to_string()],
            Self::Client { port, peer } => vec![
                "-p".to_string(),
                port.to_string(),
                "-c".to_string(),
                peer.to_string(),
            ],
        }
    }
}
