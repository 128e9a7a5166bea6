//! Integration tests for the shellblock system.

use std::sync::Arc;

use shellblock_core::{BlockKind, ExitStatus, ServerConfig};
use shellblock_engine::{Marker, MarkerCodec, Segmenter, StoreLimits};
use shellblock_mcp::{BlockView, ShellblockServer};
use shellblock_session::{ScriptedLauncher, SessionRegistry};

/// A zsh transcript as the hook would emit it: banner, prompt, one command
/// with coloured output, then a failing command.
fn transcript(codec: &MarkerCodec) -> Vec<u8> {
    let mut out = b"Last login: Mon Oct 12 09:00:00\r\n".to_vec();
    out.extend(codec.encode(&Marker::InputEnd));
    out.extend_from_slice(b"\x1b[32m~\x1b[0m $ ");
    for (command, output, status) in [
        ("ls --color", "\x1b[34msrc\x1b[0m  Cargo.toml\r\n", 0),
        ("cat missing", "cat: missing: No such file or directory\r\n", 1),
    ] {
        out.extend(codec.encode(&Marker::InputStart(command.as_bytes().to_vec())));
        out.extend_from_slice(command.as_bytes());
        out.extend_from_slice(b"\r\n");
        out.extend(codec.encode(&Marker::OutputStart));
        out.extend_from_slice(output.as_bytes());
        out.extend(codec.encode(&Marker::OutputEnd(status)));
        out.extend(codec.encode(&Marker::InputEnd));
        out.extend_from_slice(b"\x1b[32m~\x1b[0m $ ");
    }
    out
}

#[test]
fn test_full_segmentation_pipeline() {
    let codec = MarkerCodec::new("c0ffee");
    let stream = transcript(&codec);

    // Deliver in awkward pieces so markers straddle chunk boundaries
    let mut segmenter = Segmenter::new(codec, StoreLimits::default());
    for chunk in stream.chunks(7) {
        segmenter.feed(chunk);
    }

    assert!(segmenter.is_hooked());
    assert_eq!(segmenter.violations(), 0);

    let blocks: Vec<_> = segmenter.store().iter().cloned().collect();
    let views = BlockView::all(&blocks, false);
    println!("Segmented {} blocks:", views.len());
    for view in &views {
        println!("  {}: {:?} {:?} {:?}", view.seq, view.kind, view.exit, view.text);
    }

    assert_eq!(views.len(), 4);
    assert_eq!(views[0].kind, BlockKind::Command);
    assert_eq!(views[0].text, "ls --color");
    assert_eq!(views[1].kind, BlockKind::Output);
    assert_eq!(views[1].command_seq, Some(views[0].seq));
    assert_eq!(views[1].text, "src  Cargo.toml\n");
    assert_eq!(views[1].exit, Some(ExitStatus::Code(0)));
    assert_eq!(views[3].exit_code, Some(1));

    // Marker bytes never reach stored content
    for block in &blocks {
        assert!(!block
            .content
            .windows(b"shellblock".len())
            .any(|w| w == b"shellblock"));
    }
}

#[tokio::test]
async fn test_server_over_scripted_shell() {
    let registry = Arc::new(SessionRegistry::with_launcher(
        ServerConfig::default(),
        None,
        Arc::new(ScriptedLauncher::hooked().with_chunk_size(3)),
    ));
    let server = ShellblockServer::new(registry.clone());

    let id = registry
        .create(shellblock_session::SessionOptions::default())
        .await
        .unwrap();
    let result = registry
        .execute(id, "echo integrated", Some(5000), false)
        .await
        .unwrap();
    assert_eq!(result.output, "integrated\n");
    assert_eq!(result.exit_code, Some(0));

    // Tool schemas are generated for every parameter type
    for tool in server.tools() {
        let schema = serde_json::Value::Object((*tool.input_schema).clone());
        if tool.name != "create_session" && tool.name != "list_sessions" {
            assert!(
                schema["properties"]["session_id"].is_object(),
                "{} is missing session_id",
                tool.name
            );
        }
    }
}
