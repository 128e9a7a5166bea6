//! Named keys for driving interactive programs.
//!
//! Agents send raw text most of the time, but control keys are awkward to
//! spell in JSON. A key name such as `Ctrl+c`, `Enter` or `Up` maps to the
//! bytes an xterm-compatible terminal would send.

use crate::{Error, Result};

const NAMED: &[(&str, &[u8])] = &[
    ("enter", b"\r"),
    ("return", b"\r"),
    ("tab", b"\t"),
    ("shift+tab", b"\x1b[Z"),
    ("escape", b"\x1b"),
    ("esc", b"\x1b"),
    ("backspace", b"\x7f"),
    ("space", b" "),
    ("delete", b"\x1b[3~"),
    ("insert", b"\x1b[2~"),
    ("up", b"\x1b[A"),
    ("down", b"\x1b[B"),
    ("right", b"\x1b[C"),
    ("left", b"\x1b[D"),
    ("home", b"\x1b[H"),
    ("end", b"\x1b[F"),
    ("pageup", b"\x1b[5~"),
    ("pagedown", b"\x1b[6~"),
    ("f1", b"\x1bOP"),
    ("f2", b"\x1bOQ"),
    ("f3", b"\x1bOR"),
    ("f4", b"\x1bOS"),
    ("f5", b"\x1b[15~"),
    ("f6", b"\x1b[17~"),
    ("f7", b"\x1b[18~"),
    ("f8", b"\x1b[19~"),
    ("f9", b"\x1b[20~"),
    ("f10", b"\x1b[21~"),
    ("f11", b"\x1b[23~"),
    ("f12", b"\x1b[24~"),
];

/// Bytes for one key name.
///
/// Accepts the names above (case-insensitive), `Ctrl+<letter>` (also
/// `C-<letter>`), `Alt+<char>` (also `M-<char>`) and single characters.
pub fn key_bytes(name: &str) -> Result<Vec<u8>> {
    let name = name.trim();
    let lower = name.to_ascii_lowercase();

    if let Some(rest) = lower
        .strip_prefix("ctrl+")
        .or_else(|| lower.strip_prefix("c-"))
    {
        return match rest.as_bytes() {
            [c @ b'a'..=b'z'] => Ok(vec![c - b'a' + 1]),
            [b'@'] => Ok(vec![0x00]),
            [b'['] => Ok(vec![0x1b]),
            [b'\\'] => Ok(vec![0x1c]),
            _ => Err(Error::InvalidInput(format!("Unknown key: {name}"))),
        };
    }

    if name.len() > 2 && (lower.starts_with("alt+") || lower.starts_with("m-")) {
        // Keep the original case of the modified character.
        let rest = &name[name.find(['+', '-']).map_or(0, |i| i + 1)..];
        let mut bytes = vec![0x1b];
        bytes.extend(key_bytes(rest)?);
        return Ok(bytes);
    }

    if let Some((_, bytes)) = NAMED.iter().find(|(key, _)| *key == lower) {
        return Ok(bytes.to_vec());
    }

    let mut chars = name.chars();
    match (chars.next(), chars.next()) {
        (Some(c), None) => Ok(c.to_string().into_bytes()),
        _ => Err(Error::InvalidInput(format!("Unknown key: {name}"))),
    }
}

/// Concatenated bytes for a sequence of key names.
pub fn keys_bytes<S: AsRef<str>>(names: &[S]) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    for name in names {
        bytes.extend(key_bytes(name.as_ref())?);
    }
    Ok(bytes)
}
