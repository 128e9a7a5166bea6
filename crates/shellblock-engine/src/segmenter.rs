//! Streaming block segmentation.
//!
//! The [`Segmenter`] consumes raw shell output in chunks of any size,
//! extracts markers, and maintains the session's block list. Splitting the
//! same byte stream differently never changes the resulting blocks: bytes
//! that might still turn out to be part of a marker stay in a residual
//! buffer until the next chunk decides them.

use shellblock_core::{Block, BlockKind, ExitStatus};
use tracing::{debug, trace};

use crate::marker::{Marker, MarkerCodec, ProtocolViolation, MAX_BODY_LEN, TERMINATOR};
use crate::store::{BlockStore, StoreLimits};

/// Something the segmenter observed while consuming a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SegmentEvent {
    /// The first well-formed marker arrived; the shell hook is active
    HookDetected,
    /// A block was opened
    BlockOpened {
        /// Sequence number
        seq: u64,
        /// Block kind
        kind: BlockKind,
    },
    /// A block was closed
    BlockClosed {
        /// Sequence number
        seq: u64,
        /// Block kind
        kind: BlockKind,
        /// Exit status, for Output blocks
        exit: Option<ExitStatus>,
    },
    /// The shell finished reading a line. `after_command` is false when the
    /// line produced no command (empty line, syntax error, first prompt).
    InputEnded {
        /// Whether an InputStart preceded this marker
        after_command: bool,
    },
    /// A malformed or misplaced marker was dropped
    Violation(ProtocolViolation),
}

/// Outcome of looking for the end of a marker.
enum Frame {
    /// Terminator found after `body_len` body bytes
    Complete { body_len: usize },
    /// Another sentinel starts at this body offset before any terminator
    Interrupted { at: usize },
    /// No terminator within the maximum body length
    Oversized,
    /// Need more bytes to decide
    Incomplete,
}

/// Incremental marker parser and block builder for one session.
#[derive(Debug)]
pub struct Segmenter {
    codec: MarkerCodec,
    store: BlockStore,
    residual: Vec<u8>,
    preamble: Vec<u8>,
    preamble_dropped: u64,
    hooked: bool,
    degraded: bool,
    finished: bool,
    awaiting_output: bool,
    last_command: Option<u64>,
    violations: u64,
}

impl Segmenter {
    /// Create a segmenter for markers produced with `codec`.
    pub fn new(codec: MarkerCodec, limits: StoreLimits) -> Self {
        Self {
            codec,
            store: BlockStore::new(limits),
            residual: Vec::new(),
            preamble: Vec::new(),
            preamble_dropped: 0,
            hooked: false,
            degraded: false,
            finished: false,
            awaiting_output: false,
            last_command: None,
            violations: 0,
        }
    }

    /// The marker codec.
    pub fn codec(&self) -> &MarkerCodec {
        &self.codec
    }

    /// The block list.
    pub fn store(&self) -> &BlockStore {
        &self.store
    }

    /// The open block, if any.
    pub fn open_block(&self) -> Option<&Block> {
        self.store.open_block()
    }

    /// Whether a well-formed marker has been seen.
    pub fn is_hooked(&self) -> bool {
        self.hooked
    }

    /// Whether the segmenter runs without markers.
    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    /// Whether [`Segmenter::finish`] has been called.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Number of protocol violations seen.
    pub fn violations(&self) -> u64 {
        self.violations
    }

    /// Command text answered by the open Output block.
    pub fn current_command(&self) -> Option<String> {
        let open = self.store.open_block()?;
        let command_seq = open.command_seq?;
        self.store.get(command_seq)?.command_text()
    }

    /// Consume a chunk of shell output.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<SegmentEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        let mut buf = std::mem::take(&mut self.residual);
        buf.extend_from_slice(chunk);
        let consumed = self.scan(&buf, &mut events);
        buf.drain(..consumed);
        self.residual = buf;
        events
    }

    /// End of stream. Flushes what is left of the residual buffer and closes
    /// the open block with `status`. Further input is ignored.
    pub fn finish(&mut self, status: ExitStatus) -> Vec<SegmentEvent> {
        let mut events = Vec::new();
        if self.finished {
            return events;
        }

        let rest = std::mem::take(&mut self.residual);
        match find(&rest, self.codec.sentinel()) {
            Some(start) => {
                self.content(&rest[..start]);
                self.violation(ProtocolViolation::Unterminated, &mut events);
            }
            None => self.content(&rest),
        }

        // A shell that dies before its first marker still leaves its output
        // readable.
        if !self.hooked && (!self.preamble.is_empty() || self.preamble_dropped > 0) {
            events.extend(self.degrade());
        }

        self.close_open(Some(status), &mut events);
        self.finished = true;
        events
    }

    /// Switch to markerless operation: open one Output block that receives
    /// everything from now on, seeded with the output seen so far. No-op
    /// once hooked.
    pub fn degrade(&mut self) -> Vec<SegmentEvent> {
        let mut events = Vec::new();
        if self.hooked || self.degraded || self.finished {
            return events;
        }

        self.degraded = true;
        let seq = self.store.open(BlockKind::Output);
        events.push(SegmentEvent::BlockOpened {
            seq,
            kind: BlockKind::Output,
        });
        let preamble = std::mem::take(&mut self.preamble);
        let dropped = std::mem::take(&mut self.preamble_dropped);
        self.store.seed_open(&preamble, dropped);
        debug!("degraded: fallback block seq={} seeded with {} bytes", seq, preamble.len());
        events
    }

    /// Scan `buf`, returning how many leading bytes were fully consumed.
    fn scan(&mut self, buf: &[u8], events: &mut Vec<SegmentEvent>) -> usize {
        let sentinel = self.codec.sentinel().to_vec();
        let mut pos = 0;

        loop {
            let rest = &buf[pos..];
            let Some(start) = find(rest, &sentinel) else {
                let keep = partial_prefix_len(rest, &sentinel);
                self.content(&rest[..rest.len() - keep]);
                return buf.len() - keep;
            };

            self.content(&rest[..start]);
            let body_from = pos + start + sentinel.len();

            match frame(&buf[body_from..], &sentinel) {
                Frame::Complete { body_len } => {
                    let body = &buf[body_from..body_from + body_len];
                    match self.codec.decode_body(body) {
                        Ok(marker) => self.on_marker(marker, events),
                        Err(violation) => self.violation(violation, events),
                    }
                    pos = body_from + body_len + TERMINATOR.len();
                }
                Frame::Interrupted { at } => {
                    self.violation(ProtocolViolation::Unterminated, events);
                    pos = body_from + at;
                }
                Frame::Oversized => {
                    self.violation(ProtocolViolation::Oversized, events);
                    pos = body_from + MAX_BODY_LEN;
                }
                Frame::Incomplete => return pos + start,
            }
        }
    }

    /// Route non-marker bytes.
    fn content(&mut self, bytes: &[u8]) {
        if bytes.is_empty() || self.store.append_open(bytes) {
            return;
        }
        if !self.hooked && !self.degraded {
            let cap = self.store.limits().max_block_bytes;
            let room = cap.saturating_sub(self.preamble.len());
            let kept = room.min(bytes.len());
            self.preamble.extend_from_slice(&bytes[..kept]);
            self.preamble_dropped += (bytes.len() - kept) as u64;
        }
        // Otherwise prompt noise between blocks; dropped.
    }

    fn on_marker(&mut self, marker: Marker, events: &mut Vec<SegmentEvent>) {
        trace!("marker {:?}", marker.kind());

        if !self.hooked {
            self.hooked = true;
            self.preamble.clear();
            self.preamble_dropped = 0;
            events.push(SegmentEvent::HookDetected);
            if self.degraded {
                // Late hook: leave markerless mode.
                self.degraded = false;
                self.close_open(Some(ExitStatus::NotObserved), events);
            }
        }

        match marker {
            Marker::InputStart(text) => {
                self.close_stale(events);
                let seq = self.store.open(BlockKind::Command);
                events.push(SegmentEvent::BlockOpened {
                    seq,
                    kind: BlockKind::Command,
                });
                self.store.set_command_text(&text);
                self.close_open(None, events);
                self.last_command = Some(seq);
                self.awaiting_output = true;
            }
            Marker::InputEnd => {
                events.push(SegmentEvent::InputEnded {
                    after_command: self.awaiting_output,
                });
            }
            Marker::OutputStart => {
                self.close_stale(events);
                let seq = self.store.open(BlockKind::Output);
                let command_seq = if self.awaiting_output {
                    self.last_command
                } else {
                    None
                };
                if let Some(block) = self.store.open_block_mut() {
                    block.command_seq = command_seq;
                }
                self.awaiting_output = false;
                events.push(SegmentEvent::BlockOpened {
                    seq,
                    kind: BlockKind::Output,
                });
            }
            Marker::OutputEnd(code) => {
                let output_open = self
                    .store
                    .open_block()
                    .is_some_and(|block| block.kind == BlockKind::Output);
                if output_open {
                    self.close_open(Some(ExitStatus::Code(code)), events);
                } else {
                    self.violation(ProtocolViolation::OrphanOutputEnd, events);
                }
            }
        }
    }

    /// Freeze an Output block whose end marker never came.
    fn close_stale(&mut self, events: &mut Vec<SegmentEvent>) {
        if let Some(open) = self.store.open_block() {
            debug!("closing block seq={} without end marker", open.seq);
            self.close_open(Some(ExitStatus::NotObserved), events);
        }
    }

    fn close_open(&mut self, exit: Option<ExitStatus>, events: &mut Vec<SegmentEvent>) {
        let is_output = self
            .store
            .open_block()
            .is_some_and(|block| block.kind == BlockKind::Output);
        let exit = if is_output { exit } else { None };
        if let Some((seq, kind)) = self.store.close_open(exit) {
            events.push(SegmentEvent::BlockClosed { seq, kind, exit });
        }
    }

    fn violation(&mut self, violation: ProtocolViolation, events: &mut Vec<SegmentEvent>) {
        self.violations += 1;
        debug!("protocol violation: {}", violation);
        events.push(SegmentEvent::Violation(violation));
    }
}

/// Find the end of a marker whose body starts at `after[0]`.
fn frame(after: &[u8], sentinel: &[u8]) -> Frame {
    let window = &after[..after.len().min(MAX_BODY_LEN + TERMINATOR.len())];
    let terminator = find(window, TERMINATOR);
    let next = find(window, sentinel);

    match (terminator, next) {
        (Some(t), Some(n)) if n < t => Frame::Interrupted { at: n },
        (Some(t), _) => Frame::Complete { body_len: t },
        (None, Some(n)) => Frame::Interrupted { at: n },
        (None, None) if window.len() == MAX_BODY_LEN + TERMINATOR.len() => Frame::Oversized,
        (None, None) => Frame::Incomplete,
    }
}

/// Position of the first occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    let first = *needle.first()?;
    let mut from = 0;
    while let Some(offset) = haystack[from..].iter().position(|&b| b == first) {
        let at = from + offset;
        if haystack[at..].starts_with(needle) {
            return Some(at);
        }
        from = at + 1;
    }
    None
}

/// Length of the longest suffix of `haystack` that is a proper prefix of
/// `needle`.
fn partial_prefix_len(haystack: &[u8], needle: &[u8]) -> usize {
    let longest = haystack.len().min(needle.len().saturating_sub(1));
    (1..=longest)
        .rev()
        .find(|&k| haystack.ends_with(&needle[..k]))
        .unwrap_or(0)
}
