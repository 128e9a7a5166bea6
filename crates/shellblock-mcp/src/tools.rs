//! MCP tool parameter and response types.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use shellblock_core::{Block, BlockKind, BlockStatus, ExitStatus, Lifecycle, SessionId};
use shellblock_engine::render::{plain_text, raw_text};
use shellblock_session::WaitOutcome;

// =============================================================================
// Session Management Tools
// =============================================================================

/// Parameters for create_session
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct CreateSessionParams {
    /// Short label for the session
    #[serde(default)]
    pub label: Option<String>,

    /// What the session is used for
    #[serde(default)]
    pub description: Option<String>,

    /// Run the shell as root (requires the server to be started with a root password)
    #[serde(default)]
    pub elevated: bool,
}

/// Response for create_session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionResponse {
    /// New session identifier
    pub session_id: SessionId,

    /// Lifecycle state after startup
    pub lifecycle: Lifecycle,

    /// True when the shell hook was not detected and output is not split into blocks
    pub degraded: bool,

    /// Whether the shell runs as root
    pub elevated: bool,

    /// Human-readable summary
    pub message: String,
}

/// Parameters for list_sessions
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct ListSessionsParams {}

/// Parameters for update_session_label
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UpdateSessionLabelParams {
    /// Session to update
    pub session_id: String,

    /// New label
    pub label: String,
}

/// Parameters for update_session_description
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct UpdateSessionDescriptionParams {
    /// Session to update
    pub session_id: String,

    /// New description
    pub description: String,
}

/// Parameters for delete_session
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DeleteSessionParams {
    /// Session to terminate and remove
    pub session_id: String,
}

/// Generic acknowledgement
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageResponse {
    /// Session the operation applied to
    pub session_id: SessionId,

    /// Human-readable summary
    pub message: String,
}

// =============================================================================
// Command Tools
// =============================================================================

/// Parameters for execute_command
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ExecuteCommandParams {
    /// Session to run the command in
    pub session_id: String,

    /// Command line to execute
    pub command: String,

    /// How long to wait for the command to finish, in seconds
    #[serde(default)]
    pub timeout_seconds: Option<f64>,

    /// Return output with escape sequences instead of plain text
    #[serde(default)]
    pub raw: bool,
}

/// Parameters for run_command
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct RunCommandParams {
    /// Session to run the command in
    pub session_id: String,

    /// Command line to submit
    pub command: String,
}

/// Response for run_command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunCommandResponse {
    /// Session the command was submitted to
    pub session_id: SessionId,

    /// Pass this to wait_for_command to wait for the command's output
    pub after_seq: u64,

    /// Human-readable summary
    pub message: String,
}

/// Parameters for wait_for_command
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct WaitForCommandParams {
    /// Session to wait on
    pub session_id: String,

    /// Wait for the first output block with a sequence number at or after this one
    pub after_seq: u64,

    /// How long to wait, in seconds
    #[serde(default)]
    pub timeout_seconds: Option<f64>,

    /// Return output with escape sequences instead of plain text
    #[serde(default)]
    pub raw: bool,
}

/// State reported by wait_for_command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WaitStatus {
    /// The output block closed
    Completed,
    /// The timeout passed; the command keeps running
    StillRunning,
    /// The session ended
    Terminated,
    /// No command is pending
    Idle,
}

/// Response for wait_for_command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WaitForCommandResponse {
    /// Session waited on
    pub session_id: SessionId,

    /// How the wait ended
    pub status: WaitStatus,

    /// The output block, complete or partial
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block: Option<BlockView>,
}

impl WaitForCommandResponse {
    /// Build the response for a wait outcome.
    pub fn new(session_id: SessionId, outcome: WaitOutcome, raw: bool) -> Self {
        let (status, block) = match outcome {
            WaitOutcome::Completed(block) => (WaitStatus::Completed, Some(block)),
            WaitOutcome::StillRunning { partial } => (WaitStatus::StillRunning, partial),
            WaitOutcome::Terminated(block) => (WaitStatus::Terminated, block),
            WaitOutcome::Idle => (WaitStatus::Idle, None),
        };
        Self {
            session_id,
            status,
            block: block.map(|block| BlockView::new(&block, raw)),
        }
    }
}

/// Parameters for send_keys
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SendKeysParams {
    /// Session whose running command receives the keys
    pub session_id: String,

    /// Text sent as-is
    #[serde(default)]
    pub keys: Option<String>,

    /// Named keys sent after the text, e.g. ["Ctrl+c"], ["Down", "Enter"]
    #[serde(default)]
    pub key_names: Vec<String>,
}

/// Parameters for enter_root_password
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EnterRootPasswordParams {
    /// Session whose running command is waiting for the password
    pub session_id: String,
}

// =============================================================================
// Reading Tools
// =============================================================================

/// Parameters for read_blocks
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ReadBlocksParams {
    /// Session to read
    pub session_id: String,

    /// Return blocks with a sequence number at or after this one
    #[serde(default)]
    pub since_seq: Option<u64>,

    /// Return only the last N blocks
    #[serde(default)]
    pub last: Option<usize>,

    /// Return content with escape sequences instead of plain text
    #[serde(default)]
    pub raw: bool,
}

/// Parameters for snapshot
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SnapshotParams {
    /// Session to snapshot
    pub session_id: String,

    /// Include every retained block instead of starting at the last command
    #[serde(default)]
    pub include_all: bool,

    /// Return content with escape sequences instead of plain text
    #[serde(default)]
    pub raw: bool,
}

/// Response for read_blocks and snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlocksResponse {
    /// Session read
    pub session_id: SessionId,

    /// Blocks in sequence order; gaps mean older blocks were evicted
    pub blocks: Vec<BlockView>,
}

/// A block as shown to agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockView {
    /// Sequence number
    pub seq: u64,

    /// Command or output
    pub kind: BlockKind,

    /// Open or closed
    pub status: BlockStatus,

    /// Command text, or output rendered as text
    pub text: String,

    /// For output blocks, the command block they answer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub command_seq: Option<u64>,

    /// For closed output blocks, how they ended
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit: Option<ExitStatus>,

    /// Exit code reported by the shell
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,

    /// Bytes dropped by the per-block cap
    #[serde(skip_serializing_if = "is_zero")]
    #[serde(default)]
    pub truncated_bytes: u64,

    /// When the block was opened
    pub opened_at: DateTime<Utc>,

    /// When the block was closed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
}

fn is_zero(value: &u64) -> bool {
    *value == 0
}

impl BlockView {
    /// Render a block. Command text is always shown verbatim.
    pub fn new(block: &Block, raw: bool) -> Self {
        let text = if raw || block.is_command() {
            raw_text(&block.content)
        } else {
            plain_text(&block.content)
        };
        Self {
            seq: block.seq,
            kind: block.kind,
            status: block.status,
            text,
            command_seq: block.command_seq,
            exit: block.exit,
            exit_code: block.exit_code(),
            truncated_bytes: block.truncated_bytes,
            opened_at: block.opened_at,
            closed_at: block.closed_at,
        }
    }

    /// Render a list of blocks.
    pub fn all(blocks: &[Block], raw: bool) -> Vec<Self> {
        blocks.iter().map(|block| Self::new(block, raw)).collect()
    }
}

/// Convert a timeout in seconds to milliseconds.
pub fn timeout_ms(seconds: Option<f64>) -> Result<Option<u64>, String> {
    match seconds {
        None => Ok(None),
        Some(s) if s.is_finite() && s >= 0.0 => Ok(Some((s * 1000.0).round() as u64)),
        Some(s) => Err(format!("timeout_seconds must be a non-negative number, got {s}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_conversion() {
        assert_eq!(timeout_ms(None), Ok(None));
        assert_eq!(timeout_ms(Some(1.5)), Ok(Some(1500)));
        assert_eq!(timeout_ms(Some(0.0)), Ok(Some(0)));
        assert!(timeout_ms(Some(-1.0)).is_err());
        assert!(timeout_ms(Some(f64::NAN)).is_err());
    }

    #[test]
    fn test_params_defaults() {
        let params: ExecuteCommandParams =
            serde_json::from_str(r#"{"session_id": "0", "command": "ls"}"#).unwrap();
        assert_eq!(params.timeout_seconds, None);
        assert!(!params.raw);

        let params: SendKeysParams =
            serde_json::from_str(r#"{"session_id": "1", "key_names": ["Ctrl+c"]}"#).unwrap();
        assert_eq!(params.keys, None);
        assert_eq!(params.key_names, vec!["Ctrl+c"]);

        let params: CreateSessionParams = serde_json::from_str("{}").unwrap();
        assert!(!params.elevated);
    }

    #[test]
    fn test_block_view_rendering() {
        let mut command = Block::open(4, BlockKind::Command);
        command.content = b"printf '\\033[1mX'".to_vec();
        command.close(None);
        let view = BlockView::new(&command, false);
        assert_eq!(view.text, "printf '\\033[1mX'");

        let mut output = Block::open(5, BlockKind::Output);
        output.command_seq = Some(4);
        output.content = b"\x1b[1mX\x1b[0m\r\n".to_vec();
        output.close(Some(ExitStatus::Code(0)));

        let view = BlockView::new(&output, false);
        assert_eq!(view.text, "X\n");
        assert_eq!(view.exit_code, Some(0));
        assert_eq!(BlockView::new(&output, true).text, "\x1b[1mX\x1b[0m\r\n");

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["kind"], "output");
        assert_eq!(json["exit"]["code"], 0);
        assert!(json.get("truncated_bytes").is_none());
    }

    #[test]
    fn test_wait_response() {
        let response = WaitForCommandResponse::new(SessionId::new(2), WaitOutcome::Idle, false);
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["status"], "idle");
        assert_eq!(json["session_id"], 2);
        assert!(json.get("block").is_none());
    }
}
