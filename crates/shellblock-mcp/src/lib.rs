//! Shellblock MCP Server Library
//!
//! This library contains the MCP protocol layer: tool parameter types and
//! the server that routes tool calls to the session registry.
//! The actual server binary is in main.rs.

pub mod protocol;
pub mod tools;

// Re-export commonly used types
pub use protocol::ShellblockServer;
pub use tools::*;
