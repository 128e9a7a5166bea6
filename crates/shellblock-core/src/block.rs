//! Block types: the addressable units a session's output is split into.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What a block holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockKind {
    /// The command line the shell was about to execute
    Command,
    /// Everything the command printed
    Output,
}

impl std::fmt::Display for BlockKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockKind::Command => f.write_str("command"),
            BlockKind::Output => f.write_str("output"),
        }
    }
}

/// Whether a block still receives content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    /// Content is still being appended
    Open,
    /// Content is final
    Closed,
}

/// How an Output block ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// The shell reported this exit status
    Code(i32),
    /// The block was closed without an end marker (a new command started,
    /// or the shell went away)
    NotObserved,
    /// The session was terminated while the block was open
    Terminated,
}

impl ExitStatus {
    /// The numeric exit code, when one was reported.
    pub fn code(&self) -> Option<i32> {
        match self {
            ExitStatus::Code(code) => Some(*code),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitStatus::Code(code) => write!(f, "{code}"),
            ExitStatus::NotObserved => f.write_str("not observed"),
            ExitStatus::Terminated => f.write_str("terminated"),
        }
    }
}

/// A contiguous run of session output.
///
/// Sequence numbers are assigned at creation and never reused within a
/// session, so a reader can spot evicted blocks as gaps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Sequence number, unique within the session
    pub seq: u64,
    /// Command or Output
    pub kind: BlockKind,
    /// Open or Closed
    pub status: BlockStatus,
    /// Raw bytes (for Command blocks, exactly the submitted command text)
    pub content: Vec<u8>,
    /// For Output blocks, the Command block they answer
    pub command_seq: Option<u64>,
    /// For closed Output blocks, how they ended
    pub exit: Option<ExitStatus>,
    /// Bytes received but not stored because of the per-block cap
    pub truncated_bytes: u64,
    /// When the block was opened
    pub opened_at: DateTime<Utc>,
    /// When the block was closed
    pub closed_at: Option<DateTime<Utc>>,
}

impl Block {
    /// Create an empty open block.
    pub fn open(seq: u64, kind: BlockKind) -> Self {
        Self {
            seq,
            kind,
            status: BlockStatus::Open,
            content: Vec::new(),
            command_seq: None,
            exit: None,
            truncated_bytes: 0,
            opened_at: Utc::now(),
            closed_at: None,
        }
    }

    /// Whether content is still being appended.
    pub fn is_open(&self) -> bool {
        self.status == BlockStatus::Open
    }

    /// Whether this is a Command block.
    pub fn is_command(&self) -> bool {
        self.kind == BlockKind::Command
    }

    /// The command text of a Command block. Non-UTF-8 bytes are replaced.
    pub fn command_text(&self) -> Option<String> {
        self.is_command()
            .then(|| String::from_utf8_lossy(&self.content).into_owned())
    }

    /// Exit code of a closed Output block, if the shell reported one.
    pub fn exit_code(&self) -> Option<i32> {
        self.exit.and_then(|exit| exit.code())
    }

    /// Mark the block closed.
    pub fn close(&mut self, exit: Option<ExitStatus>) {
        self.status = BlockStatus::Closed;
        self.exit = exit;
        self.closed_at = Some(Utc::now());
    }

    /// Append bytes, storing at most `cap` bytes in total and counting the
    /// rest in `truncated_bytes`. Returns the number of bytes stored.
    pub fn append_capped(&mut self, bytes: &[u8], cap: usize) -> usize {
        let room = cap.saturating_sub(self.content.len());
        let stored = room.min(bytes.len());
        self.content.extend_from_slice(&bytes[..stored]);
        self.truncated_bytes += (bytes.len() - stored) as u64;
        stored
    }

    /// Total bytes received by this block, stored or not.
    pub fn received_bytes(&self) -> u64 {
        self.content.len() as u64 + self.truncated_bytes
    }
}
