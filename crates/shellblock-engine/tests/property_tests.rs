//! Property-based tests for block segmentation.
//!
//! Uses proptest to feed the same stream split at random boundaries and
//! verify the block list does not depend on how the bytes arrived.

use proptest::prelude::*;

use shellblock_core::{Block, BlockKind, BlockStatus, ExitStatus};
use shellblock_engine::{Marker, MarkerCodec, Segmenter, StoreLimits};

fn codec() -> MarkerCodec {
    MarkerCodec::new("5eed5eed5eed5eed")
}

/// Block fields that do not depend on wall-clock time.
type Shape = (u64, BlockKind, BlockStatus, Vec<u8>, Option<u64>, Option<ExitStatus>, u64);

fn shape(block: &Block) -> Shape {
    (
        block.seq,
        block.kind,
        block.status,
        block.content.clone(),
        block.command_seq,
        block.exit,
        block.truncated_bytes,
    )
}

fn shapes(segmenter: &Segmenter) -> Vec<Shape> {
    segmenter.store().iter().map(shape).collect()
}

/// Feed `stream` split at the given cut points.
fn feed_split(stream: &[u8], cuts: &[usize], limits: StoreLimits) -> Segmenter {
    let mut segmenter = Segmenter::new(codec(), limits);
    let mut cuts: Vec<usize> = cuts.iter().map(|c| c % (stream.len() + 1)).collect();
    cuts.sort_unstable();
    let mut from = 0;
    for cut in cuts {
        segmenter.feed(&stream[from..cut]);
        from = cut;
    }
    segmenter.feed(&stream[from..]);
    segmenter
}

/// One piece of a synthetic shell session.
#[derive(Debug, Clone)]
enum Piece {
    Text(Vec<u8>),
    Mark(Marker),
}

fn piece() -> impl Strategy<Value = Piece> {
    prop_oneof![
        4 => proptest::collection::vec(any::<u8>(), 0..40).prop_map(Piece::Text),
        1 => proptest::collection::vec(any::<u8>(), 0..20)
            .prop_map(|cmd| Piece::Mark(Marker::InputStart(cmd))),
        1 => Just(Piece::Mark(Marker::InputEnd)),
        1 => Just(Piece::Mark(Marker::OutputStart)),
        1 => (-5i32..300).prop_map(|code| Piece::Mark(Marker::OutputEnd(code))),
    ]
}

fn render(pieces: &[Piece]) -> Vec<u8> {
    let codec = codec();
    let mut out = Vec::new();
    for piece in pieces {
        match piece {
            Piece::Text(bytes) => out.extend_from_slice(bytes),
            Piece::Mark(marker) => out.extend(codec.encode(marker)),
        }
    }
    out
}

fn stream() -> impl Strategy<Value = Vec<u8>> {
    proptest::collection::vec(piece(), 0..30).prop_map(|pieces| render(&pieces))
}

proptest! {
    /// Splitting the stream anywhere never changes the blocks.
    #[test]
    fn chunk_boundaries_do_not_matter(
        stream in stream(),
        cuts in proptest::collection::vec(any::<usize>(), 0..12),
    ) {
        let whole = feed_split(&stream, &[], StoreLimits::unbounded());
        let split = feed_split(&stream, &cuts, StoreLimits::unbounded());
        prop_assert_eq!(shapes(&whole), shapes(&split));
        prop_assert_eq!(whole.violations(), split.violations());
    }

    /// Sequence numbers strictly increase and at most the last block is open.
    #[test]
    fn order_and_single_open_block(stream in stream()) {
        let segmenter = feed_split(&stream, &[], StoreLimits::unbounded());
        let blocks: Vec<&Block> = segmenter.store().iter().collect();
        for pair in blocks.windows(2) {
            prop_assert!(pair[0].seq < pair[1].seq);
        }
        let open = blocks.iter().filter(|b| b.is_open()).count();
        prop_assert!(open <= 1);
        if open == 1 {
            prop_assert!(blocks.last().unwrap().is_open());
        }
    }

    /// Command text survives byte for byte, whatever it contains.
    #[test]
    fn command_text_round_trips(command in proptest::collection::vec(any::<u8>(), 0..200)) {
        let mut segmenter = Segmenter::new(codec(), StoreLimits::unbounded());
        segmenter.feed(&codec().encode(&Marker::InputStart(command.clone())));
        let block = segmenter.store().get(0).unwrap();
        prop_assert_eq!(block.kind, BlockKind::Command);
        prop_assert_eq!(&block.content, &command);
    }

    /// Under tight limits the retained list is a contiguous suffix of the
    /// unbounded one, and no Command loses an Output that is still retained.
    #[test]
    fn eviction_keeps_a_valid_suffix(
        stream in stream(),
        max_blocks in 1usize..6,
        max_total in 64usize..256,
    ) {
        let limits = StoreLimits { max_blocks, max_block_bytes: 64, max_total_bytes: max_total };
        let bounded = feed_split(&stream, &[], limits);
        let capped = StoreLimits { max_block_bytes: 64, ..StoreLimits::unbounded() };
        let full = feed_split(&stream, &[], capped);

        let kept = shapes(&bounded);
        let all = shapes(&full);
        prop_assert!(kept.len() <= all.len());
        let suffix = &all[all.len() - kept.len()..];
        prop_assert_eq!(&kept[..], suffix);

        if let Some(first) = bounded.store().iter().next().map(|b| b.seq) {
            for block in bounded.store().iter() {
                if let Some(command_seq) = block.command_seq {
                    prop_assert!(command_seq >= first);
                }
            }
        };
    }
}

/// Scenario A: a single `ls` yields a closed Command block and a closed
/// Output block.
#[test]
fn scenario_ls_produces_two_closed_blocks() {
    let codec = codec();
    let mut stream = b"% ".to_vec();
    stream.extend(codec.encode(&Marker::InputEnd));
    stream.extend(codec.encode(&Marker::InputStart(b"ls".to_vec())));
    stream.extend(codec.encode(&Marker::InputEnd));
    stream.extend(codec.encode(&Marker::OutputStart));
    stream.extend(b"Cargo.toml\r\nsrc\r\n");
    stream.extend(codec.encode(&Marker::OutputEnd(0)));
    stream.extend(b"% ");

    let mut segmenter = Segmenter::new(codec, StoreLimits::default());
    segmenter.feed(&stream);

    let blocks: Vec<&Block> = segmenter.store().iter().collect();
    assert_eq!(blocks.len(), 2);
    assert_eq!(blocks[0].kind, BlockKind::Command);
    assert_eq!(blocks[0].content, b"ls");
    assert_eq!(blocks[0].status, BlockStatus::Closed);
    assert_eq!(blocks[1].kind, BlockKind::Output);
    assert_eq!(blocks[1].content, b"Cargo.toml\r\nsrc\r\n");
    assert_eq!(blocks[1].status, BlockStatus::Closed);
    assert_eq!(blocks[1].exit_code(), Some(0));
}

/// Scenario B: an OutputStart marker split at every offset gives the same
/// blocks as the unsplit stream.
#[test]
fn scenario_output_start_split_at_every_offset() {
    let codec = codec();
    let mut prefix = codec.encode(&Marker::InputStart(b"cat f".to_vec()));
    prefix.extend(codec.encode(&Marker::InputEnd));
    let marker = codec.encode(&Marker::OutputStart);
    let suffix = b"line one\r\n".to_vec();

    let mut reference = Segmenter::new(codec.clone(), StoreLimits::default());
    reference.feed(&[prefix.as_slice(), &marker, &suffix].concat());
    let expected = shapes(&reference);
    assert_eq!(expected.len(), 2);

    for offset in 0..=marker.len() {
        let mut segmenter = Segmenter::new(codec.clone(), StoreLimits::default());
        segmenter.feed(&prefix);
        segmenter.feed(&marker[..offset]);
        segmenter.feed(&marker[offset..]);
        segmenter.feed(&suffix);
        assert_eq!(shapes(&segmenter), expected, "split at offset {offset}");
    }
}

/// Scenario C: end of stream after OutputStart leaves one Output block with
/// no exit code.
#[test]
fn scenario_eof_after_output_start() {
    let codec = codec();
    let mut segmenter = Segmenter::new(codec.clone(), StoreLimits::default());
    segmenter.feed(&codec.encode(&Marker::OutputStart));
    segmenter.feed(b"partial output");
    segmenter.finish(ExitStatus::NotObserved);

    let blocks: Vec<&Block> = segmenter.store().iter().collect();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].kind, BlockKind::Output);
    assert_eq!(blocks[0].status, BlockStatus::Closed);
    assert_eq!(blocks[0].exit_code(), None);
    assert_eq!(blocks[0].content, b"partial output");
}
