//! Bounded, append-only block list.

use std::collections::VecDeque;

use shellblock_core::{Block, BlockKind, BlockSettings, ExitStatus};
use tracing::debug;

/// Retention limits for a [`BlockStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLimits {
    /// Maximum number of retained blocks
    pub max_blocks: usize,
    /// Maximum stored bytes per block
    pub max_block_bytes: usize,
    /// Maximum stored bytes across all retained blocks
    pub max_total_bytes: usize,
}

impl StoreLimits {
    /// No effective limits.
    pub fn unbounded() -> Self {
        Self {
            max_blocks: usize::MAX,
            max_block_bytes: usize::MAX,
            max_total_bytes: usize::MAX,
        }
    }
}

impl Default for StoreLimits {
    fn default() -> Self {
        Self::from(&BlockSettings::default())
    }
}

impl From<&BlockSettings> for StoreLimits {
    fn from(settings: &BlockSettings) -> Self {
        Self {
            max_blocks: settings.max_blocks,
            max_block_bytes: settings.max_block_bytes,
            max_total_bytes: settings.max_total_bytes,
        }
    }
}

/// Ordered block list with FIFO eviction.
///
/// Sequence numbers are assigned by the store and strictly increase. Only
/// the last block may be open. Eviction only ever removes from the front, so
/// what remains is always a contiguous suffix of everything ever pushed.
#[derive(Debug, Clone)]
pub struct BlockStore {
    blocks: VecDeque<Block>,
    limits: StoreLimits,
    next_seq: u64,
    total_bytes: usize,
    evicted: u64,
}

impl BlockStore {
    /// Create an empty store.
    pub fn new(limits: StoreLimits) -> Self {
        Self {
            blocks: VecDeque::new(),
            limits,
            next_seq: 0,
            total_bytes: 0,
            evicted: 0,
        }
    }

    /// The configured limits.
    pub fn limits(&self) -> StoreLimits {
        self.limits
    }

    /// Open a new block at the end of the list. The caller closes any
    /// previously open block first.
    pub fn open(&mut self, kind: BlockKind) -> u64 {
        debug_assert!(self.open_block().is_none(), "previous block still open");
        let seq = self.next_seq;
        self.next_seq += 1;
        self.blocks.push_back(Block::open(seq, kind));
        seq
    }

    /// The open block, if any.
    pub fn open_block(&self) -> Option<&Block> {
        self.blocks.back().filter(|block| block.is_open())
    }

    pub(crate) fn open_block_mut(&mut self) -> Option<&mut Block> {
        self.blocks.back_mut().filter(|block| block.is_open())
    }

    /// Append to the open block, honouring the per-block cap. Returns false
    /// when no block is open.
    pub fn append_open(&mut self, bytes: &[u8]) -> bool {
        let cap = self.limits.max_block_bytes;
        let Some(block) = self.open_block_mut() else {
            return false;
        };
        let stored = block.append_capped(bytes, cap);
        self.total_bytes += stored;
        self.enforce_limits();
        true
    }

    /// Store the complete text of the open Command block. Command text is
    /// never capped per block; it still counts toward the total byte limit.
    pub fn set_command_text(&mut self, text: &[u8]) -> bool {
        let Some(block) = self.open_block_mut().filter(|block| block.is_command()) else {
            return false;
        };
        let previous = block.content.len();
        block.content = text.to_vec();
        self.total_bytes = self.total_bytes - previous + text.len();
        self.enforce_limits();
        true
    }

    /// Seed the open block with bytes and a count of already-dropped bytes.
    pub(crate) fn seed_open(&mut self, bytes: &[u8], dropped: u64) {
        if self.append_open(bytes) {
            if let Some(block) = self.open_block_mut() {
                block.truncated_bytes += dropped;
            }
        }
    }

    /// Close the open block, returning its sequence number and kind. The
    /// closed block may be evicted straight away.
    pub fn close_open(&mut self, exit: Option<ExitStatus>) -> Option<(u64, BlockKind)> {
        let block = self.open_block_mut()?;
        block.close(exit);
        let closed = (block.seq, block.kind);
        self.enforce_limits();
        Some(closed)
    }

    /// Block by sequence number, if still retained.
    pub fn get(&self, seq: u64) -> Option<&Block> {
        let index = self.blocks.binary_search_by_key(&seq, |b| b.seq).ok()?;
        self.blocks.get(index)
    }

    /// Blocks with `seq >= from`, in order.
    pub fn since(&self, from: u64) -> Vec<Block> {
        let start = self.blocks.partition_point(|b| b.seq < from);
        self.blocks.range(start..).cloned().collect()
    }

    /// The last `count` blocks, in order.
    pub fn last(&self, count: usize) -> Vec<Block> {
        let start = self.blocks.len().saturating_sub(count);
        self.blocks.range(start..).cloned().collect()
    }

    /// Blocks from the most recent Command block onward; everything when no
    /// Command block is retained.
    pub fn latest_command_onward(&self) -> Vec<Block> {
        let start = self
            .blocks
            .iter()
            .rposition(|b| b.is_command())
            .unwrap_or(0);
        self.blocks.range(start..).cloned().collect()
    }

    /// Iterate over retained blocks.
    pub fn iter(&self) -> impl Iterator<Item = &Block> {
        self.blocks.iter()
    }

    /// Number of retained blocks.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether no block is retained.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Stored bytes across retained blocks.
    pub fn total_bytes(&self) -> usize {
        self.total_bytes
    }

    /// Number of blocks evicted so far.
    pub fn evicted(&self) -> u64 {
        self.evicted
    }

    /// Sequence number the next block will get.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    fn over_limits(&self) -> bool {
        self.blocks.len() > self.limits.max_blocks
            || self.total_bytes > self.limits.max_total_bytes
    }

    /// Evict from the front until within limits or the front is protected.
    ///
    /// A Command block goes together with the Output block answering it; if
    /// that Output block is still open, neither goes. The open block never
    /// goes.
    fn enforce_limits(&mut self) {
        while self.over_limits() {
            let Some(front) = self.blocks.front() else {
                break;
            };
            if front.is_open() {
                break;
            }

            let mut count = 1;
            if front.is_command() {
                let seq = front.seq;
                if let Some(next) = self.blocks.get(1) {
                    if next.command_seq == Some(seq) {
                        if next.is_open() {
                            break;
                        }
                        count = 2;
                    }
                }
            }

            for _ in 0..count {
                if let Some(block) = self.blocks.pop_front() {
                    self.total_bytes -= block.content.len();
                    self.evicted += 1;
                    debug!("evicted block seq={} kind={}", block.seq, block.kind);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max_blocks: usize, max_block_bytes: usize, max_total_bytes: usize) -> StoreLimits {
        StoreLimits {
            max_blocks,
            max_block_bytes,
            max_total_bytes,
        }
    }

    /// Push a closed Command block and a closed Output block answering it.
    fn push_pair(store: &mut BlockStore, command: &[u8], output: &[u8]) -> (u64, u64) {
        let cmd = store.open(BlockKind::Command);
        store.append_open(command);
        store.close_open(None);
        let out = store.open(BlockKind::Output);
        store.open_block_mut().unwrap().command_seq = Some(cmd);
        store.append_open(output);
        store.close_open(Some(ExitStatus::Code(0)));
        (cmd, out)
    }

    #[test]
    fn test_sequence_numbers_increase() {
        let mut store = BlockStore::new(StoreLimits::unbounded());
        let (a, b) = push_pair(&mut store, b"ls", b"file\n");
        let (c, d) = push_pair(&mut store, b"pwd", b"/\n");
        assert_eq!((a, b, c, d), (0, 1, 2, 3));
        assert_eq!(store.next_seq(), 4);
        assert_eq!(store.total_bytes(), 2 + 5 + 3 + 2);
    }

    #[test]
    fn test_append_without_open_block() {
        let mut store = BlockStore::new(StoreLimits::unbounded());
        assert!(!store.append_open(b"noise"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_per_block_cap() {
        let mut store = BlockStore::new(limits(10, 4, 100));
        store.open(BlockKind::Output);
        store.append_open(b"abcdef");
        let block = store.open_block().unwrap();
        assert_eq!(block.content, b"abcd");
        assert_eq!(block.truncated_bytes, 2);
        assert_eq!(store.total_bytes(), 4);
    }

    #[test]
    fn test_command_text_ignores_block_cap() {
        let mut store = BlockStore::new(limits(10, 4, 100));
        store.open(BlockKind::Command);
        assert!(store.set_command_text(b"echo long"));
        let block = store.open_block().unwrap();
        assert_eq!(block.content, b"echo long");
        assert_eq!(block.truncated_bytes, 0);
        assert_eq!(store.total_bytes(), 9);

        store.close_open(None);
        store.open(BlockKind::Output);
        assert!(!store.set_command_text(b"x"));
    }

    #[test]
    fn test_evicts_pairs_by_count() {
        let mut store = BlockStore::new(limits(4, 100, 1000));
        push_pair(&mut store, b"a", b"1");
        push_pair(&mut store, b"b", b"2");
        push_pair(&mut store, b"c", b"3");

        let seqs: Vec<u64> = store.iter().map(|b| b.seq).collect();
        assert_eq!(seqs, vec![2, 3, 4, 5]);
        assert_eq!(store.evicted(), 2);
        assert_eq!(store.total_bytes(), 4);
    }

    #[test]
    fn test_never_evicts_command_with_open_output() {
        let mut store = BlockStore::new(limits(1, 100, 1000));
        let cmd = store.open(BlockKind::Command);
        store.append_open(b"sleep 10");
        store.close_open(None);
        store.open(BlockKind::Output);
        store.open_block_mut().unwrap().command_seq = Some(cmd);
        store.append_open(b"zzz");

        // Over the count limit, but both blocks are protected.
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(cmd).unwrap().content, b"sleep 10");

        store.close_open(Some(ExitStatus::Code(0)));
        assert!(store.is_empty());
    }

    #[test]
    fn test_evicts_by_total_bytes() {
        let mut store = BlockStore::new(limits(100, 10, 12));
        push_pair(&mut store, b"a", b"0123456789");
        assert_eq!(store.len(), 2);
        store.open(BlockKind::Output);
        store.append_open(b"xyz");
        // 11 + 3 > 12: the closed pair goes, the open block stays.
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_bytes(), 3);
    }

    #[test]
    fn test_range_queries() {
        let mut store = BlockStore::new(StoreLimits::unbounded());
        push_pair(&mut store, b"a", b"1");
        push_pair(&mut store, b"b", b"2");
        store.open(BlockKind::Output);
        store.append_open(b"partial");

        assert_eq!(store.since(3).len(), 2);
        assert_eq!(store.since(99).len(), 0);
        assert_eq!(store.last(2).iter().map(|b| b.seq).collect::<Vec<_>>(), vec![3, 4]);
        assert_eq!(store.last(99).len(), 5);
        assert_eq!(store.latest_command_onward().first().unwrap().seq, 2);
        assert_eq!(store.since(4)[0].content, b"partial");
        assert!(store.since(4)[0].is_open());
    }
}
