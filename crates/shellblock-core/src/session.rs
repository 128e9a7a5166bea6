//! Session types for shell session management.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Unique identifier for a shell session.
///
/// Identifiers are small integers handed out in creation order by a registry,
/// which keeps them short enough for an agent to quote back reliably.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
#[serde(transparent)]
pub struct SessionId(u64);

impl SessionId {
    /// Wrap a raw identifier.
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Get the raw identifier.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl From<u64> for SessionId {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl FromStr for SessionId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        s.trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| crate::Error::InvalidInput(format!("Invalid session ID: {s}")))
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a shell session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Lifecycle {
    /// Process being spawned, hook not yet confirmed
    Starting,
    /// Idle at a prompt, accepting a command
    Ready,
    /// A command has been submitted and its output is being collected
    Running,
    /// Process exited or was killed; absorbing
    Terminated,
}

impl Lifecycle {
    /// Whether this state is final.
    pub fn is_terminated(&self) -> bool {
        matches!(self, Lifecycle::Terminated)
    }
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Lifecycle::Starting => "starting",
            Lifecycle::Ready => "ready",
            Lifecycle::Running => "running",
            Lifecycle::Terminated => "terminated",
        };
        f.write_str(name)
    }
}

/// Listing entry describing a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    /// Session identifier
    pub id: SessionId,
    /// Short title
    pub label: Option<String>,
    /// Longer free-text summary
    pub description: Option<String>,
    /// Current lifecycle state
    pub lifecycle: Lifecycle,
    /// Command text of the running command, if any
    pub current_command: Option<String>,
    /// Whether the shell runs with elevated privilege
    pub elevated: bool,
    /// Whether the session runs without block markers
    pub degraded: bool,
    /// Number of retained blocks
    pub block_count: usize,
    /// Number of malformed marker events observed
    pub protocol_violations: u64,
    /// Exit code of the shell process once it has exited
    pub exit_code: Option<u32>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}
