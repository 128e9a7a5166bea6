//! # shellblock-core
//!
//! Core types for shellblock.
//!
//! This crate contains all fundamental types with **no internal dependencies**
//! on other shellblock crates. It provides:
//!
//! - Session types (SessionId, Lifecycle, SessionSummary)
//! - Block types (Block, BlockKind, BlockStatus, ExitStatus)
//! - Server configuration loaded from YAML
//! - Named key translation
//! - Error types
//!
//! ## Architecture
//!
//! This is Layer 0 in the architecture - all other crates depend on this one,
//! but this crate has no dependencies on other shellblock crates.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod block;
pub mod config;
pub mod error;
pub mod key;
pub mod session;

// Re-export commonly used types
pub use block::{Block, BlockKind, BlockStatus, ExitStatus};
pub use config::{
    BlockSettings, EnvVar, ExecutionSettings, SecuritySettings, ServerConfig, ServerSettings,
    ShellSettings,
};
pub use error::{Error, ErrorKind, Result};
pub use key::{key_bytes, keys_bytes};
pub use session::{Lifecycle, SessionId, SessionSummary};
