//! Boundary marker protocol.
//!
//! A marker is a DCS string, which terminals swallow without displaying:
//!
//! ```text
//! ESC P shellblock ; <nonce> ; <tag> [ ; <payload> ] ESC \
//! ```
//!
//! The nonce is fixed per session, so output that merely mentions
//! `shellblock` cannot forge a marker. Tags:
//!
//! | Tag | Event        | Payload                      |
//! |-----|--------------|------------------------------|
//! | `I` | InputStart   | hex of the command text      |
//! | `i` | InputEnd     | none                         |
//! | `O` | OutputStart  | none                         |
//! | `o` | OutputEnd    | decimal exit status          |
//!
//! Neither payload form can contain `ESC`, so the terminator is unambiguous.

use thiserror::Error;

/// Byte sequence that ends every marker (`ST`).
pub const TERMINATOR: &[u8] = b"\x1b\\";

/// Upper bound on the bytes between sentinel and terminator.
pub const MAX_BODY_LEN: usize = 256 * 1024;

const DCS: &[u8] = b"\x1bP";
const NAMESPACE: &str = "shellblock";

/// The four event kinds a marker can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MarkerKind {
    /// The shell is about to run a command line
    InputStart,
    /// The command line has been read (or the prompt produced no command)
    InputEnd,
    /// Command output begins
    OutputStart,
    /// Command output ended with an exit status
    OutputEnd,
}

impl MarkerKind {
    /// Single-byte tag used on the wire.
    pub fn tag(&self) -> u8 {
        match self {
            MarkerKind::InputStart => b'I',
            MarkerKind::InputEnd => b'i',
            MarkerKind::OutputStart => b'O',
            MarkerKind::OutputEnd => b'o',
        }
    }

    /// Look up the kind for a wire tag.
    pub fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            b'I' => Some(MarkerKind::InputStart),
            b'i' => Some(MarkerKind::InputEnd),
            b'O' => Some(MarkerKind::OutputStart),
            b'o' => Some(MarkerKind::OutputEnd),
            _ => None,
        }
    }
}

/// A decoded marker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Marker {
    /// Command text, byte for byte
    InputStart(Vec<u8>),
    /// End of the input phase
    InputEnd,
    /// Output begins
    OutputStart,
    /// Output ended with this exit status
    OutputEnd(i32),
}

impl Marker {
    /// Event kind of this marker.
    pub fn kind(&self) -> MarkerKind {
        match self {
            Marker::InputStart(_) => MarkerKind::InputStart,
            Marker::InputEnd => MarkerKind::InputEnd,
            Marker::OutputStart => MarkerKind::OutputStart,
            Marker::OutputEnd(_) => MarkerKind::OutputEnd,
        }
    }
}

/// A malformed or out-of-place marker. Never fatal: the engine logs it,
/// counts it and carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolViolation {
    /// Tag byte is not one of `I i O o`
    #[error("unknown marker tag {0:#04x}")]
    UnknownTag(u8),

    /// Marker body is empty or not `<tag>[;<payload>]`
    #[error("malformed marker body")]
    MalformedBody,

    /// Payload on a kind that takes none, or no payload on one that needs it
    #[error("unexpected payload shape for {0:?}")]
    PayloadShape(MarkerKind),

    /// Command payload is not valid hex
    #[error("invalid hex in command payload")]
    BadHex,

    /// OutputEnd payload is not a decimal integer
    #[error("invalid exit status {0:?}")]
    BadStatus(String),

    /// A new sentinel appeared before the previous marker was terminated
    #[error("marker not terminated before the next sentinel")]
    Unterminated,

    /// No terminator within the maximum body length
    #[error("marker body exceeds {} bytes", MAX_BODY_LEN)]
    Oversized,

    /// OutputEnd with no open Output block
    #[error("output end without an open output block")]
    OrphanOutputEnd,
}

impl From<ProtocolViolation> for shellblock_core::Error {
    fn from(violation: ProtocolViolation) -> Self {
        shellblock_core::Error::ProtocolViolation(violation.to_string())
    }
}

/// Encodes and decodes markers for one session nonce.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerCodec {
    nonce: String,
    sentinel: Vec<u8>,
}

impl MarkerCodec {
    /// Create a codec for a fixed nonce.
    ///
    /// The nonce must not contain `;` or `ESC`; callers normally use
    /// [`MarkerCodec::random`].
    pub fn new(nonce: impl Into<String>) -> Self {
        let nonce = nonce.into();
        let mut sentinel = Vec::with_capacity(DCS.len() + NAMESPACE.len() + nonce.len() + 2);
        sentinel.extend_from_slice(DCS);
        sentinel.extend_from_slice(NAMESPACE.as_bytes());
        sentinel.push(b';');
        sentinel.extend_from_slice(nonce.as_bytes());
        sentinel.push(b';');
        Self { nonce, sentinel }
    }

    /// Create a codec with a fresh random nonce.
    pub fn random() -> Self {
        Self::new(uuid::Uuid::new_v4().simple().to_string())
    }

    /// The session nonce.
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Fixed prefix every marker of this session starts with.
    pub fn sentinel(&self) -> &[u8] {
        &self.sentinel
    }

    /// Encode a marker to its exact wire bytes.
    pub fn encode(&self, marker: &Marker) -> Vec<u8> {
        let mut out = self.sentinel.clone();
        out.push(marker.kind().tag());
        match marker {
            Marker::InputStart(text) => {
                out.push(b';');
                out.extend_from_slice(hex::encode(text).as_bytes());
            }
            Marker::OutputEnd(status) => {
                out.push(b';');
                out.extend_from_slice(status.to_string().as_bytes());
            }
            Marker::InputEnd | Marker::OutputStart => {}
        }
        out.extend_from_slice(TERMINATOR);
        out
    }

    /// Decode a marker body: the bytes between sentinel and terminator.
    pub fn decode_body(&self, body: &[u8]) -> Result<Marker, ProtocolViolation> {
        let (&tag, rest) = body.split_first().ok_or(ProtocolViolation::MalformedBody)?;
        let kind = MarkerKind::from_tag(tag).ok_or(ProtocolViolation::UnknownTag(tag))?;

        let payload = match rest {
            [] => None,
            [b';', payload @ ..] => Some(payload),
            _ => return Err(ProtocolViolation::MalformedBody),
        };

        match (kind, payload) {
            (MarkerKind::InputStart, Some(digits)) => hex::decode(digits)
                .map(Marker::InputStart)
                .map_err(|_| ProtocolViolation::BadHex),
            (MarkerKind::OutputEnd, Some(digits)) => {
                let text = String::from_utf8_lossy(digits);
                text.trim()
                    .parse::<i32>()
                    .map(Marker::OutputEnd)
                    .map_err(|_| ProtocolViolation::BadStatus(text.into_owned()))
            }
            (MarkerKind::InputEnd, None) => Ok(Marker::InputEnd),
            (MarkerKind::OutputStart, None) => Ok(Marker::OutputStart),
            (kind, _) => Err(ProtocolViolation::PayloadShape(kind)),
        }
    }
}
