//! # shellblock-engine
//!
//! Block recognition for shellblock.
//!
//! This crate provides:
//! - The boundary marker protocol (encoding, decoding, violations)
//! - A streaming segmentation engine that turns marker-annotated shell
//!   output into an ordered list of command and output blocks
//! - A bounded block store with FIFO eviction
//! - Plain-text extraction for reading block content
//!
//! Nothing here knows about processes, PTYs or shells: the engine depends
//! only on the marker grammar.
//!
//! ## Architecture
//!
//! This is Layer 1 in the architecture - it depends on shellblock-core
//! and is driven by shellblock-session.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod marker;
pub mod render;
pub mod segmenter;
pub mod store;

// Re-export commonly used types
pub use marker::{Marker, MarkerCodec, MarkerKind, ProtocolViolation};
pub use segmenter::{SegmentEvent, Segmenter};
pub use store::{BlockStore, StoreLimits};
