//! Shellblock MCP Server Implementation
//!
//! This module implements the MCP server using rmcp 0.9's #[tool_router] pattern.
//! Each tool routes to one [`SessionRegistry`] operation.

use std::sync::Arc;

use rmcp::{
    handler::server::{router::tool::ToolRouter, wrapper::Parameters},
    model::*,
    tool, tool_handler, tool_router, ErrorData as McpError,
};
use serde::Serialize;
use tracing::{debug, error, info, instrument, warn};

use shellblock_core::{keys_bytes, Error, ErrorKind, SessionId};
use shellblock_session::{BlockRange, SessionOptions, SessionRegistry};

use crate::tools::*;

/// Translate a registry error into a protocol error.
pub fn to_mcp_error(e: Error) -> McpError {
    let code = match e.kind() {
        ErrorKind::NotFound | ErrorKind::InvalidInput => ErrorCode(-32602), // Invalid params
        _ => ErrorCode(-32603),                                               // Internal error
    };
    match e.kind() {
        ErrorKind::Internal => error!("Tool failed: {}", e),
        _ => debug!("Tool rejected: {}", e),
    }
    McpError::new(code, e.to_string(), None)
}

fn invalid_params(message: impl Into<String>) -> McpError {
    McpError::new(ErrorCode(-32602), message.into(), None)
}

fn json_result<T: Serialize>(response: &T, fallback: impl FnOnce() -> String) -> CallToolResult {
    CallToolResult::success(vec![Content::text(
        serde_json::to_string_pretty(response).unwrap_or_else(|_| fallback()),
    )])
}

/// Shellblock MCP Server
///
/// Exposes the session registry as MCP tools.
#[derive(Clone)]
pub struct ShellblockServer {
    /// Live sessions
    registry: Arc<SessionRegistry>,
    /// Tool router for handling MCP tool calls
    tool_router: ToolRouter<Self>,
}

#[tool_router]
impl ShellblockServer {
    /// Create a server over `registry`.
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            registry,
            tool_router: Self::tool_router(),
        }
    }

    /// The registry behind the tools.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Descriptions of every tool.
    pub fn tools(&self) -> Vec<Tool> {
        self.tool_router.list_all()
    }

    fn parse_id(session_id: &str) -> Result<SessionId, McpError> {
        session_id.parse().map_err(|_| {
            warn!("Invalid session ID format: {}", session_id);
            invalid_params(format!("Invalid session ID: {session_id}"))
        })
    }

    /// Create a new shell session
    #[tool(
        description = "Create a new zsh session and return its ID. Commands run in it are split into command and output blocks."
    )]
    #[instrument(skip_all)]
    async fn create_session(
        &self,
        Parameters(params): Parameters<CreateSessionParams>,
    ) -> Result<CallToolResult, McpError> {
        info!(
            "Creating session: label={:?} elevated={}",
            params.label, params.elevated
        );

        let id = self
            .registry
            .create(SessionOptions {
                label: params.label,
                description: params.description,
                elevated: params.elevated,
            })
            .await
            .map_err(to_mcp_error)?;
        let session = self.registry.get(id).map_err(to_mcp_error)?;

        let degraded = session.is_degraded();
        let response = CreateSessionResponse {
            session_id: id,
            lifecycle: session.lifecycle(),
            degraded,
            elevated: session.is_elevated(),
            message: if degraded {
                format!(
                    "Session {id} created without shell integration; output is kept as one block"
                )
            } else {
                format!("Session {id} created")
            },
        };

        Ok(json_result(&response, || format!("Session {id} created")))
    }

    /// List all sessions
    #[tool(description = "List all shell sessions with their label, description, state and running command")]
    #[instrument(skip_all)]
    async fn list_sessions(
        &self,
        Parameters(_params): Parameters<ListSessionsParams>,
    ) -> Result<CallToolResult, McpError> {
        let summaries = self.registry.list();
        debug!("Found {} session(s)", summaries.len());

        if summaries.is_empty() {
            return Ok(CallToolResult::success(vec![Content::text("No sessions.")]));
        }

        let yaml = serde_yaml::to_string(&summaries).map_err(|e| {
            error!("Failed to serialize session list: {}", e);
            McpError::new(ErrorCode(-32603), format!("Failed to list sessions: {e}"), None)
        })?;
        Ok(CallToolResult::success(vec![Content::text(yaml)]))
    }

    /// Update a session label
    #[tool(description = "Set the label of a shell session")]
    #[instrument(skip_all)]
    async fn update_session_label(
        &self,
        Parameters(params): Parameters<UpdateSessionLabelParams>,
    ) -> Result<CallToolResult, McpError> {
        let id = Self::parse_id(&params.session_id)?;
        self.registry
            .set_metadata(id, Some(params.label), None)
            .map_err(to_mcp_error)?;

        let response = MessageResponse {
            session_id: id,
            message: "Session label updated".to_string(),
        };
        Ok(json_result(&response, || response.message.clone()))
    }

    /// Update a session description
    #[tool(description = "Set the description of a shell session")]
    #[instrument(skip_all)]
    async fn update_session_description(
        &self,
        Parameters(params): Parameters<UpdateSessionDescriptionParams>,
    ) -> Result<CallToolResult, McpError> {
        let id = Self::parse_id(&params.session_id)?;
        self.registry
            .set_metadata(id, None, Some(params.description))
            .map_err(to_mcp_error)?;

        let response = MessageResponse {
            session_id: id,
            message: "Session description updated".to_string(),
        };
        Ok(json_result(&response, || response.message.clone()))
    }

    /// Execute a command and wait for it
    #[tool(
        description = "Run a command in a session that is waiting for input and wait for it to finish. Returns the output and exit code, or status 'timeout' if it is still running when the timeout passes."
    )]
    #[instrument(skip_all)]
    async fn execute_command(
        &self,
        Parameters(params): Parameters<ExecuteCommandParams>,
    ) -> Result<CallToolResult, McpError> {
        let id = Self::parse_id(&params.session_id)?;
        let timeout = timeout_ms(params.timeout_seconds).map_err(invalid_params)?;
        info!(
            "Executing command: id={} length={} timeout_ms={:?}",
            id,
            params.command.len(),
            timeout
        );

        let result = self
            .registry
            .execute(id, &params.command, timeout, params.raw)
            .await
            .map_err(to_mcp_error)?;

        info!(
            "Command ended: id={} status={:?} exit_code={:?} duration_ms={}",
            id, result.status, result.exit_code, result.duration_ms
        );
        Ok(json_result(&result, || result.output.clone()))
    }

    /// Submit a command without waiting
    #[tool(
        description = "Submit a command to a session that is waiting for input and return immediately. Use wait_for_command with the returned after_seq to collect the output."
    )]
    #[instrument(skip_all)]
    async fn run_command(
        &self,
        Parameters(params): Parameters<RunCommandParams>,
    ) -> Result<CallToolResult, McpError> {
        let id = Self::parse_id(&params.session_id)?;
        let after_seq = self
            .registry
            .submit_input(id, &params.command)
            .map_err(to_mcp_error)?;

        let response = RunCommandResponse {
            session_id: id,
            after_seq,
            message: format!("Command submitted to session {id}"),
        };
        Ok(json_result(&response, || response.message.clone()))
    }

    /// Wait for a submitted command
    #[tool(
        description = "Wait for the output block of a command submitted with run_command to close. Returns status completed, still_running, terminated or idle."
    )]
    #[instrument(skip_all)]
    async fn wait_for_command(
        &self,
        Parameters(params): Parameters<WaitForCommandParams>,
    ) -> Result<CallToolResult, McpError> {
        let id = Self::parse_id(&params.session_id)?;
        let timeout = timeout_ms(params.timeout_seconds).map_err(invalid_params)?;

        let outcome = self
            .registry
            .wait_for_output(id, params.after_seq, timeout)
            .await
            .map_err(to_mcp_error)?;

        let response = WaitForCommandResponse::new(id, outcome, params.raw);
        debug!("Wait ended: id={} status={:?}", id, response.status);
        Ok(json_result(&response, || format!("{:?}", response.status)))
    }

    /// Read blocks
    #[tool(
        description = "Read command and output blocks of a session, either since a sequence number or the last N blocks. The open block is included with its content so far."
    )]
    #[instrument(skip_all)]
    async fn read_blocks(
        &self,
        Parameters(params): Parameters<ReadBlocksParams>,
    ) -> Result<CallToolResult, McpError> {
        let id = Self::parse_id(&params.session_id)?;
        let range = match (params.since_seq, params.last) {
            (Some(_), Some(_)) => {
                return Err(invalid_params("Pass either since_seq or last, not both"))
            }
            (Some(seq), None) => BlockRange::Since(seq),
            (None, Some(count)) => BlockRange::Last(count),
            (None, None) => BlockRange::All,
        };

        let blocks = self.registry.read_blocks(id, range).map_err(to_mcp_error)?;
        let response = BlocksResponse {
            session_id: id,
            blocks: BlockView::all(&blocks, params.raw),
        };
        Ok(json_result(&response, || format!("{} blocks", blocks.len())))
    }

    /// Snapshot a session
    #[tool(
        description = "Return the blocks of a session starting at the last command, or every retained block when include_all is true"
    )]
    #[instrument(skip_all)]
    async fn snapshot(
        &self,
        Parameters(params): Parameters<SnapshotParams>,
    ) -> Result<CallToolResult, McpError> {
        let id = Self::parse_id(&params.session_id)?;
        let blocks = self
            .registry
            .snapshot(id, params.include_all)
            .map_err(to_mcp_error)?;

        let response = BlocksResponse {
            session_id: id,
            blocks: BlockView::all(&blocks, params.raw),
        };
        Ok(json_result(&response, || format!("{} blocks", blocks.len())))
    }

    /// Send keys to a running command
    #[tool(
        description = "Send keys to the command running in a session, e.g. answers to prompts, key_names [\"Ctrl+c\"] to interrupt, or [\"Down\", \"Enter\"] for menus. Only available while a command is running."
    )]
    #[instrument(skip_all)]
    async fn send_keys(
        &self,
        Parameters(params): Parameters<SendKeysParams>,
    ) -> Result<CallToolResult, McpError> {
        let id = Self::parse_id(&params.session_id)?;
        let mut bytes = params.keys.unwrap_or_default().into_bytes();
        bytes.extend(keys_bytes(&params.key_names).map_err(to_mcp_error)?);
        if bytes.is_empty() {
            return Err(invalid_params("Pass keys or key_names"));
        }

        self.registry.send_keys(id, &bytes).map_err(to_mcp_error)?;
        debug!("Keys sent: id={} bytes={}", id, bytes.len());

        let response = MessageResponse {
            session_id: id,
            message: "Keys sent; the running command may take a moment to process them"
                .to_string(),
        };
        Ok(json_result(&response, || response.message.clone()))
    }

    /// Type the root password
    #[tool(
        description = "Type the root password and press Enter in an elevated session whose running command is waiting for a password"
    )]
    #[instrument(skip_all)]
    async fn enter_root_password(
        &self,
        Parameters(params): Parameters<EnterRootPasswordParams>,
    ) -> Result<CallToolResult, McpError> {
        let id = Self::parse_id(&params.session_id)?;
        self.registry.enter_credential(id).map_err(to_mcp_error)?;

        let response = MessageResponse {
            session_id: id,
            message: "Root password entered".to_string(),
        };
        Ok(json_result(&response, || response.message.clone()))
    }

    /// Delete a session
    #[tool(description = "Terminate a shell session and remove it")]
    #[instrument(skip_all)]
    async fn delete_session(
        &self,
        Parameters(params): Parameters<DeleteSessionParams>,
    ) -> Result<CallToolResult, McpError> {
        let id = Self::parse_id(&params.session_id)?;
        self.registry.terminate(id).map_err(to_mcp_error)?;
        info!("Session deleted: id={}", id);

        let response = MessageResponse {
            session_id: id,
            message: format!("Session {id} deleted"),
        };
        Ok(json_result(&response, || response.message.clone()))
    }
}

// Implement the ServerHandler trait to define server capabilities
#[tool_handler]
impl rmcp::ServerHandler for ShellblockServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Shellblock - drive interactive zsh sessions. Output is split into blocks: \
                 a command block with the command line, then an output block with what it \
                 printed and its exit code. Use create_session to start a shell, \
                 execute_command to run a command and get its output, or run_command and \
                 wait_for_command for long-running commands. While a command runs, use \
                 send_keys to answer prompts or interrupt it, and enter_root_password in \
                 elevated sessions. read_blocks and snapshot return earlier output."
                    .into(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}
