//! Blocking waits for command output.

use std::ops::ControlFlow;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use shellblock_core::{Block, BlockKind, ExitStatus, Lifecycle, Result};
use shellblock_engine::render::{plain_text, raw_text};

use crate::session::Session;

/// In degraded mode a command counts as finished once its output has been
/// quiet this long.
pub const SETTLE_THRESHOLD: Duration = Duration::from_millis(500);

/// Result of [`Session::wait_for_output`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The Output block closed
    Completed(Block),
    /// Timed out; the Output block so far, if it was opened
    StillRunning {
        /// Content received before the deadline
        partial: Option<Block>,
    },
    /// The session ended; the last Output block, if any
    Terminated(Option<Block>),
    /// The session is ready and no command is pending
    Idle,
}

/// How [`Session::execute`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// The command completed
    Finished,
    /// The timeout passed first; the command may still be running
    Timeout,
    /// The session ended
    Terminated,
}

/// Outcome of running a command to completion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    /// How execution ended
    pub status: ExecutionStatus,
    /// Output text
    pub output: String,
    /// Exit code reported by the shell
    pub exit_code: Option<i32>,
    /// How the Output block ended, when it did
    pub exit: Option<ExitStatus>,
    /// Output bytes dropped by the per-block cap
    pub truncated_bytes: u64,
    /// Sequence number of the Output block
    pub block_seq: Option<u64>,
    /// Wall-clock time spent
    pub duration_ms: u64,
    /// Timeout that applied
    pub timeout_ms: u64,
}

impl Session {
    /// Wait until the first Output block with sequence number >= `after_seq`
    /// closes, the session ends, or `timeout` passes.
    ///
    /// In degraded mode the target is the fallback block, which only closes
    /// when the session ends.
    pub async fn wait_for_output(&self, after_seq: u64, timeout: Duration) -> WaitOutcome {
        let mut changes = self.subscribe();
        let deadline = Instant::now() + timeout;
        loop {
            changes.borrow_and_update();
            let partial = match self.check_output(after_seq) {
                ControlFlow::Break(outcome) => return outcome,
                ControlFlow::Continue(partial) => partial,
            };
            match tokio::time::timeout_at(deadline, changes.changed()).await {
                Ok(Ok(())) => continue,
                Ok(Err(_)) => return WaitOutcome::StillRunning { partial },
                Err(_) => {
                    return match self.check_output(after_seq) {
                        ControlFlow::Break(outcome) => outcome,
                        ControlFlow::Continue(partial) => WaitOutcome::StillRunning { partial },
                    }
                }
            }
        }
    }

    fn check_output(&self, after_seq: u64) -> ControlFlow<WaitOutcome, Option<Block>> {
        let state = self.lock();
        let store = state.segmenter.store();
        let degraded = state.segmenter.is_degraded();
        let terminated = state.lifecycle.is_terminated();

        let target = if degraded {
            store.open_block()
        } else {
            store
                .iter()
                .find(|block| block.seq >= after_seq && block.kind == BlockKind::Output)
        };

        match target {
            Some(block) if block.is_open() => ControlFlow::Continue(Some(block.clone())),
            Some(block) => {
                let block = block.clone();
                if terminated && block.exit_code().is_none() {
                    ControlFlow::Break(WaitOutcome::Terminated(Some(block)))
                } else {
                    ControlFlow::Break(WaitOutcome::Completed(block))
                }
            }
            None if terminated => ControlFlow::Break(WaitOutcome::Terminated(None)),
            None if !degraded
                && state.lifecycle == Lifecycle::Ready
                && !state.awaiting_command =>
            {
                ControlFlow::Break(WaitOutcome::Idle)
            }
            None => ControlFlow::Continue(None),
        }
    }

    /// Submit `text` and wait for its output.
    ///
    /// Output is rendered as plain text unless `raw` is set. In degraded
    /// mode there is no end marker: the result holds the output that arrived
    /// after submission, and the command counts as finished once output has
    /// been quiet for [`SETTLE_THRESHOLD`].
    pub async fn execute(
        &self,
        text: &str,
        timeout: Duration,
        raw: bool,
    ) -> Result<ExecutionResult> {
        let started = Instant::now();
        if self.is_degraded() {
            return self.execute_degraded(text, timeout, raw, started).await;
        }

        let from_seq = self.submit_input(text)?;
        let (status, block) = match self.wait_for_output(from_seq, timeout).await {
            WaitOutcome::Completed(block) => (ExecutionStatus::Finished, Some(block)),
            WaitOutcome::StillRunning { partial } => (ExecutionStatus::Timeout, partial),
            WaitOutcome::Terminated(block) => (ExecutionStatus::Terminated, block),
            WaitOutcome::Idle => (ExecutionStatus::Finished, None),
        };

        Ok(ExecutionResult {
            status,
            output: block
                .as_ref()
                .map(|block| render(&block.content, raw))
                .unwrap_or_default(),
            exit_code: block.as_ref().and_then(Block::exit_code),
            exit: block.as_ref().and_then(|block| block.exit),
            truncated_bytes: block.as_ref().map_or(0, |block| block.truncated_bytes),
            block_seq: block.as_ref().map(|block| block.seq),
            duration_ms: started.elapsed().as_millis() as u64,
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    async fn execute_degraded(
        &self,
        text: &str,
        timeout: Duration,
        raw: bool,
        started: Instant,
    ) -> Result<ExecutionResult> {
        let mut changes = self.subscribe();
        let mark = {
            let state = self.lock();
            state
                .segmenter
                .open_block()
                .map(|block| (block.seq, block.content.len()))
        };
        self.submit_input(text)?;

        let deadline = started + timeout;
        let status = loop {
            let quiet_until = (Instant::now() + SETTLE_THRESHOLD).min(deadline);
            match tokio::time::timeout_at(quiet_until, changes.changed()).await {
                Ok(Ok(())) if self.lifecycle().is_terminated() => break ExecutionStatus::Terminated,
                Ok(Ok(())) => continue,
                Ok(Err(_)) => break ExecutionStatus::Terminated,
                Err(_) if Instant::now() >= deadline => break ExecutionStatus::Timeout,
                Err(_) => break ExecutionStatus::Finished,
            }
        };

        let state = self.lock();
        let block = mark.and_then(|(seq, _)| state.segmenter.store().get(seq));
        let offset = mark.map_or(0, |(_, offset)| offset);
        let output = block
            .map(|block| render(&block.content[offset.min(block.content.len())..], raw))
            .unwrap_or_default();

        Ok(ExecutionResult {
            status,
            output,
            exit_code: None,
            exit: block.and_then(|block| block.exit),
            truncated_bytes: block.map_or(0, |block| block.truncated_bytes),
            block_seq: block.map(|block| block.seq),
            duration_ms: started.elapsed().as_millis() as u64,
            timeout_ms: timeout.as_millis() as u64,
        })
    }
}

fn render(bytes: &[u8], raw: bool) -> String {
    if raw {
        raw_text(bytes)
    } else {
        plain_text(bytes)
    }
}
