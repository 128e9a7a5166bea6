//! The elevation credential and the prompt it answers.

use shellblock_engine::MarkerCodec;

/// Secret used to start and drive elevated sessions.
///
/// Never printed: `Debug` is redacted and there is no `Display`.
#[derive(Clone)]
pub struct Credential(String);

impl Credential {
    /// Wrap a secret.
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    /// The secret followed by a carriage return, as typed at a prompt.
    pub(crate) fn as_keystrokes(&self) -> Vec<u8> {
        let mut bytes = self.0.as_bytes().to_vec();
        bytes.push(b'\r');
        bytes
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

/// Prompt the elevation program is told to print before it reads the
/// secret. It carries the session nonce so shell output cannot imitate it.
pub(crate) fn elevation_prompt(codec: &MarkerCodec) -> String {
    format!("[shellblock {}] password: ", codec.nonce())
}

/// Looks for a known prompt in a stream that may split it across chunks.
#[derive(Debug)]
pub(crate) struct PromptWatch {
    prompt: Vec<u8>,
    tail: Vec<u8>,
}

impl PromptWatch {
    pub(crate) fn new(prompt: impl Into<Vec<u8>>) -> Self {
        Self {
            prompt: prompt.into(),
            tail: Vec::new(),
        }
    }

    /// Feed output; true once the prompt has been seen.
    pub(crate) fn scan(&mut self, bytes: &[u8]) -> bool {
        if self.prompt.is_empty() {
            return true;
        }
        self.tail.extend_from_slice(bytes);
        if self
            .tail
            .windows(self.prompt.len())
            .any(|window| window == self.prompt.as_slice())
        {
            self.tail.clear();
            return true;
        }
        let keep = self.prompt.len() - 1;
        if self.tail.len() > keep {
            self.tail.drain(..self.tail.len() - keep);
        }
        false
    }
}
