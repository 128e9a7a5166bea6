//! # shellblock-session
//!
//! Shell sessions and the session registry.
//!
//! This crate provides:
//! - Shell launching on a pseudo-terminal ([`PtyLauncher`])
//! - zsh hook installation for the marker protocol
//! - Session lifecycle driven by segmentation events
//! - Blocking waits for command output
//! - The [`SessionRegistry`] routing operations by session id
//!
//! ## Architecture
//!
//! This is Layer 2 in the architecture - it depends on shellblock-core
//! and shellblock-engine, and is driven by the MCP server.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod credential;
pub mod hook;
pub mod pty;
pub mod registry;
pub mod session;
pub mod testing;
pub mod wait;

// Re-export commonly used types
pub use credential::Credential;
pub use hook::{zsh_hook_script, HookDir};
pub use pty::{LaunchSpec, LaunchedShell, PtyLauncher, ShellEvent, ShellLauncher, ShellProcess};
pub use registry::SessionRegistry;
pub use session::{BlockRange, Session, SessionOptions};
pub use testing::ScriptedLauncher;
pub use wait::{ExecutionResult, ExecutionStatus, WaitOutcome};
