//! Unit tests for the line codec.
//!
//! Covers:
//! - complete, batched, and partially delivered lines
//! - identical decoding for every chunking of the same byte stream
//! - maximum line length enforcement
//! - one newline-terminated object per encoded message

use bytes::BytesMut;
use futures_util::StreamExt;
use serde_json::json;
use tokio::io::AsyncWriteExt;
use tokio_util::codec::{Decoder, Encoder, FramedRead};

use session_runner::protocol::codec::{LineCodec, DEFAULT_MAX_LINE_BYTES};
use session_runner::protocol::inbound::parse_line;
use session_runner::AppError;

const STREAM: &str = concat!(
    "{\"type\":\"system\",\"subtype\":\"init\",\"session_id\":\"ext-1\"}\n",
    "{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"text\",\"text\":\"h\u{e9}llo \u{1f600}\"}]}}\n",
    "\n",
    "{\"type\":\"assistant\",\"message\":{\"content\":[{\"type\":\"thinking\",\"thinking\":\"hmm\"}]}}\n",
    "{\"type\":\"result\",\"subtype\":\"success\",\"result\":\"done\",\"is_error\":false}\n",
);

/// Feed `bytes` to a fresh codec in chunks of `chunk` bytes and collect
/// every decoded line, flushing at end of stream.
fn decode_chunked(bytes: &[u8], chunk: usize) -> Vec<String> {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::new();
    let mut lines = Vec::new();
    for piece in bytes.chunks(chunk) {
        buf.extend_from_slice(piece);
        while let Some(line) = codec.decode(&mut buf).expect("decode") {
            lines.push(line);
        }
    }
    while let Some(line) = codec.decode_eof(&mut buf).expect("decode_eof") {
        lines.push(line);
    }
    lines
}

#[test]
fn single_line_is_decoded_without_terminator() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"type\":\"result\"}\n");

    let line = codec.decode(&mut buf).expect("decode must succeed");

    assert_eq!(line, Some("{\"type\":\"result\"}".to_owned()));
    assert!(buf.is_empty(), "consumed bytes must be removed from the buffer");
}

#[test]
fn batched_lines_are_each_decoded() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"a\":1}\n{\"b\":2}\n");

    assert_eq!(codec.decode(&mut buf).unwrap(), Some("{\"a\":1}".to_owned()));
    assert_eq!(codec.decode(&mut buf).unwrap(), Some("{\"b\":2}".to_owned()));
    assert_eq!(codec.decode(&mut buf).unwrap(), None);
}

#[test]
fn partial_line_is_buffered_until_newline() {
    let mut codec = LineCodec::new();
    let mut buf = BytesMut::from("{\"type\":\"ass");

    assert_eq!(codec.decode(&mut buf).unwrap(), None);
    assert_eq!(buf.len(), 12, "partial bytes must stay buffered");

    buf.extend_from_slice(b"istant\"}\n");
    assert_eq!(
        codec.decode(&mut buf).unwrap(),
        Some("{\"type\":\"assistant\"}".to_owned())
    );
}

#[test]
fn decoding_is_identical_for_every_chunk_size() {
    let bytes = STREAM.as_bytes();
    let expected = decode_chunked(bytes, bytes.len());
    assert_eq!(expected.len(), 5, "blank line is still a line at codec level");

    for chunk in 1..=bytes.len() {
        assert_eq!(
            decode_chunked(bytes, chunk),
            expected,
            "chunk size {chunk} changed the decoded lines"
        );
    }
}

#[test]
fn decoding_is_identical_for_every_single_split_point() {
    let bytes = STREAM.as_bytes();
    let expected = decode_chunked(bytes, bytes.len());

    for split in 1..bytes.len() {
        let mut codec = LineCodec::new();
        let mut buf = BytesMut::new();
        let mut lines = Vec::new();
        for part in [&bytes[..split], &bytes[split..]] {
            buf.extend_from_slice(part);
            while let Some(line) = codec.decode(&mut buf).unwrap() {
                lines.push(line);
            }
        }
        assert_eq!(lines, expected, "split at byte {split} changed the result");
    }
}

#[test]
fn decoded_messages_are_identical_across_chunkings() {
    let bytes = STREAM.as_bytes();
    let parse_all = |lines: Vec<String>| {
        lines
            .iter()
            .filter_map(|line| parse_line("s1", line).expect("valid line"))
            .collect::<Vec<_>>()
    };

    let expected = parse_all(decode_chunked(bytes, bytes.len()));
    assert_eq!(expected.len(), 4, "the blank line yields no message");

    for chunk in [1, 2, 3, 7, 13, 64] {
        assert_eq!(parse_all(decode_chunked(bytes, chunk)), expected);
    }
}

#[test]
fn line_longer_than_limit_is_rejected() {
    let mut codec = LineCodec::with_max_line_bytes(16);
    let mut buf = BytesMut::from(&[b'x'; 17][..]);

    let err = codec.decode(&mut buf).expect_err("must reject an overlong line");

    assert!(
        matches!(&err, AppError::Protocol(msg) if msg.starts_with("line too long")),
        "unexpected error: {err}"
    );
}

#[test]
fn line_at_exactly_the_limit_is_accepted() {
    let mut codec = LineCodec::with_max_line_bytes(8);
    let mut buf = BytesMut::from("12345678\n");

    assert_eq!(codec.decode(&mut buf).unwrap(), Some("12345678".to_owned()));
}

#[test]
fn default_limit_is_sixteen_mebibytes() {
    assert_eq!(LineCodec::new().max_line_bytes(), DEFAULT_MAX_LINE_BYTES);
    assert_eq!(DEFAULT_MAX_LINE_BYTES, 16 * 1024 * 1024);
}

#[test]
fn encoder_writes_one_terminated_line_per_message() {
    let mut codec = LineCodec::new();
    let mut dst = BytesMut::new();

    codec
        .encode(json!({"type": "user", "text": "multi\nline"}), &mut dst)
        .unwrap();
    codec.encode(json!({"type": "user"}), &mut dst).unwrap();

    let text = String::from_utf8(dst.to_vec()).unwrap();
    let lines: Vec<&str> = text.split_terminator('\n').collect();
    assert_eq!(lines.len(), 2, "embedded newlines must stay escaped");
    assert!(text.ends_with('\n'));
    for line in lines {
        serde_json::from_str::<serde_json::Value>(line).expect("each line is one JSON object");
    }
}

#[tokio::test]
async fn framed_reader_reassembles_lines_split_across_writes() {
    let (mut tx, rx) = tokio::io::duplex(64);
    let mut framed = FramedRead::new(rx, LineCodec::new());

    let writer = tokio::spawn(async move {
        for piece in ["{\"a\":", "1}\n{\"b\"", ":2}\n{\"c\":3}"] {
            tx.write_all(piece.as_bytes()).await.unwrap();
            tokio::task::yield_now().await;
        }
    });

    let mut lines = Vec::new();
    while let Some(line) = framed.next().await {
        lines.push(line.unwrap());
    }
    writer.await.unwrap();

    assert_eq!(lines, vec!["{\"a\":1}", "{\"b\":2}", "{\"c\":3}"]);
}
