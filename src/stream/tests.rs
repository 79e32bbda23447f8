// Copyright 2026 The Chatrelay Project
// SPDX-License-Identifier: Apache-2.0

// Tests for streaming reassembly
//
// Covers:
//  1. Plain accumulation, sentinel suppression, one line in / one line out
//  2. Retrieval role transitions (tool -> assistant -> content)
//  3. Upstream error payloads relayed verbatim, stream continues
//  4. Parse failures end the stream with a final error line
//  5. Lines split across chunks, CRLF, trailing line without newline
//  6. Non-SSE bodies decoded as one document, split `data:` prefix
//     and buffer cap
//  7. Transport errors, idle timeout, client disconnect
//  8. Monotonic growth of successive snapshots

use super::*;
use crate::message::{ChatMessage, Role, Snapshot};
use bytes::Bytes;
use serde_json::{json, Value};
use std::convert::Infallible;
use tokio::time::{self, Duration};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// In-memory upstream: each string becomes one network chunk plus newline.
fn sse_stream(
    lines: Vec<String>,
) -> impl tokio_stream::Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let chunks: Vec<Result<Bytes, Infallible>> = lines
        .into_iter()
        .map(|l| Ok(Bytes::from(format!("{l}\n"))))
        .collect();
    tokio_stream::iter(chunks)
}

/// In-memory upstream with raw chunk boundaries.
fn raw_stream(
    chunks: Vec<&'static [u8]>,
) -> impl tokio_stream::Stream<Item = Result<Bytes, Infallible>> + Send + 'static {
    let chunks: Vec<Result<Bytes, Infallible>> = chunks
        .into_iter()
        .map(|c| Ok(Bytes::from_static(c)))
        .collect();
    tokio_stream::iter(chunks)
}

/// Channel-backed upstream for time-controlled tests.
fn channel_stream() -> (
    tokio::sync::mpsc::Sender<Result<Bytes, String>>,
    ReceiverStream<Result<Bytes, String>>,
) {
    let (tx, rx) = tokio::sync::mpsc::channel(16);
    (tx, ReceiverStream::new(rx))
}

fn plain_delta(content: Option<&str>) -> String {
    let delta = match content {
        Some(c) => json!({ "content": c }),
        None => json!({ "role": "assistant" }),
    };
    format!(
        "data: {}",
        json!({
            "id": "chatcmpl-1",
            "model": "gpt-35-turbo",
            "created": 1_700_000_000u64,
            "object": "chat.completion.chunk",
            "choices": [{ "index": 0, "delta": delta, "finish_reason": null }]
        })
    )
}

fn rag_delta(delta: Value) -> String {
    format!(
        "data: {}",
        json!({
            "id": "rag-1",
            "model": "gpt-35-turbo",
            "created": 1_700_000_001u64,
            "object": "extensions.chat.completion.chunk",
            "choices": [{ "index": 0, "messages": [{ "index": 0, "delta": delta, "end_turn": false }] }]
        })
    )
}

fn processor(mode: ReassemblyMode) -> StreamProcessor {
    StreamProcessor::new(StreamSettings::new(mode))
}

/// Collect all output lines, asserting each is exactly one JSON document.
async fn collect_lines(stream: impl tokio_stream::Stream<Item = Bytes>) -> Vec<Value> {
    tokio::pin!(stream);
    let mut output = String::new();
    while let Some(chunk) = stream.next().await {
        let text = String::from_utf8(chunk.to_vec()).expect("output must be UTF-8");
        assert!(text.ends_with('\n'), "every chunk is one newline-terminated line: {text:?}");
        assert_eq!(text.matches('\n').count(), 1, "one line per chunk: {text:?}");
        output.push_str(&text);
    }
    output
        .lines()
        .map(|l| serde_json::from_str(l).unwrap_or_else(|e| panic!("bad JSON line {l:?}: {e}")))
        .collect()
}

fn snapshot(value: &Value) -> Snapshot {
    serde_json::from_value(value.clone()).expect("line should be a snapshot")
}

fn assistant_contents(lines: &[Value]) -> Vec<String> {
    lines
        .iter()
        .map(|l| {
            snapshot(l)
                .messages()
                .iter()
                .rev()
                .find(|m| m.role == Role::Assistant)
                .map(|m| m.content.clone())
                .unwrap_or_default()
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

#[test]
fn parse_line_classifies_framing() {
    assert_eq!(parse_line("").unwrap(), Frame::Skip);
    assert_eq!(parse_line("   ").unwrap(), Frame::Skip);
    assert_eq!(parse_line(": keep-alive").unwrap(), Frame::Skip);
    assert_eq!(parse_line("event: message").unwrap(), Frame::Skip);
    assert_eq!(parse_line("data:").unwrap(), Frame::Skip);
    assert_eq!(parse_line("data: [DONE]").unwrap(), Frame::Done);
    assert_eq!(parse_line("data:[DONE]").unwrap(), Frame::Done);
    assert_eq!(
        parse_line(r#"data: {"a":1}"#).unwrap(),
        Frame::Payload(json!({"a": 1}))
    );
    assert_eq!(
        parse_line(r#"{"error":{"code":"429"}}"#).unwrap(),
        Frame::Payload(json!({"error": {"code": "429"}}))
    );
    assert!(matches!(
        parse_line("data: {not json"),
        Err(StreamError::MalformedJson(_))
    ));
}

#[test]
fn sse_detection() {
    assert!(is_sse_content(b"data: {}"));
    assert!(is_sse_content(b"\n\ndata: {}"));
    assert!(is_sse_content(b": ping"));
    assert!(!is_sse_content(b"{\"error\": {}}"));
    assert!(!is_sse_content(b"<html>"));
}

#[test]
fn body_classification_waits_for_split_marker() {
    assert_eq!(classify_body(b""), None);
    assert_eq!(classify_body(b"\n\n  "), None);
    assert_eq!(classify_body(b"da"), None);
    assert_eq!(classify_body(b"\nevent"), None);
    assert_eq!(classify_body(b"data:"), Some(true));
    assert_eq!(classify_body(b": ping"), Some(true));
    assert_eq!(classify_body(b"{"), Some(false));
    assert_eq!(classify_body(b"dat\n"), Some(false));
    assert_eq!(classify_body(b"<html>"), Some(false));
}

#[test]
fn line_buffer_joins_split_lines() {
    let mut buf = LineBuffer::new();
    buf.push(b"data: {\"a\"");
    assert!(buf.next_line().is_none());
    buf.push(b":1}\r\nda");
    assert_eq!(buf.next_line().unwrap().unwrap(), "data: {\"a\":1}");
    assert!(buf.next_line().is_none());
    buf.push(b"ta: x");
    assert_eq!(buf.finish().unwrap().unwrap(), "data: x");
    assert!(buf.is_empty());
}

#[test]
fn line_buffer_long_line_in_many_chunks() {
    let mut buf = LineBuffer::new();
    for _ in 0..1000 {
        buf.push(b"xxxxxxxx");
        assert!(buf.next_line().is_none());
    }
    buf.push(b"\nnext");
    assert_eq!(buf.next_line().unwrap().unwrap().len(), 8000);
    assert!(buf.next_line().is_none());
    buf.push(b"\n");
    assert_eq!(buf.next_line().unwrap().unwrap(), "next");
    assert!(buf.is_empty());
}

#[test]
fn line_buffer_waits_for_split_utf8() {
    let mut buf = LineBuffer::new();
    let word = "caf\u{e9}\n".as_bytes();
    buf.push(&word[..4]);
    assert!(buf.next_line().is_none());
    buf.push(&word[4..]);
    assert_eq!(buf.next_line().unwrap().unwrap(), "caf\u{e9}");
}

// ---------------------------------------------------------------------------
// Reassembler: plain
// ---------------------------------------------------------------------------

fn payload(line: &str) -> Value {
    match parse_line(line).unwrap() {
        Frame::Payload(v) => v,
        other => panic!("expected payload, got {other:?}"),
    }
}

#[test]
fn plain_accumulation_with_sentinel() {
    let mut r = Reassembler::new(ReassemblyMode::Plain);
    let mut contents = Vec::new();
    for text in ["Hel", "lo", "[DONE]"] {
        r.apply(&payload(&plain_delta(Some(text)))).unwrap();
        contents.push(r.snapshot().messages()[0].content.clone());
    }
    assert_eq!(contents, vec!["Hel", "Hello", "Hello"]);
    assert_eq!(
        r.snapshot().messages(),
        &[ChatMessage::new(Role::Assistant, "Hello")]
    );
}

#[test]
fn plain_copies_identity_fields() {
    let mut r = Reassembler::new(ReassemblyMode::Plain);
    let line = r.apply(&payload(&plain_delta(Some("x")))).unwrap();
    let value: Value = serde_json::from_str(line.trim_end()).unwrap();
    assert_eq!(value["id"], "chatcmpl-1");
    assert_eq!(value["model"], "gpt-35-turbo");
    assert_eq!(value["created"], 1_700_000_000u64);
    assert_eq!(value["object"], "chat.completion.chunk");
    assert_eq!(value["choices"][0]["messages"][0]["role"], "assistant");
}

#[test]
fn plain_role_only_and_empty_choices_emit_empty_assistant() {
    let mut r = Reassembler::new(ReassemblyMode::Plain);
    let filter_chunk = json!({
        "id": "", "model": "", "created": 0, "object": "",
        "choices": [],
        "prompt_filter_results": [{"prompt_index": 0}]
    });
    r.apply(&filter_chunk).unwrap();
    assert_eq!(r.snapshot().messages(), &[ChatMessage::new(Role::Assistant, "")]);

    r.apply(&payload(&plain_delta(None))).unwrap();
    assert_eq!(r.snapshot().messages().len(), 1, "assistant message never recreated");
    assert_eq!(r.snapshot().messages()[0].content, "");
}

#[test]
fn plain_null_content_appends_nothing() {
    let mut r = Reassembler::new(ReassemblyMode::Plain);
    r.apply(&payload(&plain_delta(Some("a")))).unwrap();
    let null_content = json!({
        "id": "c", "model": "m", "created": 1, "object": "o",
        "choices": [{"delta": {"content": null}, "finish_reason": "stop"}]
    });
    r.apply(&null_content).unwrap();
    assert_eq!(r.snapshot().messages()[0].content, "a");
}

#[test]
fn plain_legacy_completion_text_is_content() {
    let mut r = Reassembler::new(ReassemblyMode::Plain);
    let chunk = json!({
        "id": "cmpl-1", "model": "davinci", "created": 1, "object": "text_completion",
        "choices": [{"text": "Hi", "index": 0}]
    });
    r.apply(&chunk).unwrap();
    r.apply(&chunk).unwrap();
    assert_eq!(r.snapshot().messages()[0].content, "HiHi");
}

#[test]
fn plain_missing_choices_is_error() {
    let mut r = Reassembler::new(ReassemblyMode::Plain);
    let err = r
        .apply(&json!({"id": "c", "model": "m", "created": 1, "object": "o"}))
        .unwrap_err();
    assert_eq!(err, StreamError::MissingField("choices"));
}

#[test]
fn missing_identity_field_is_error() {
    let mut r = Reassembler::new(ReassemblyMode::Plain);
    let err = r
        .apply(&json!({"model": "m", "created": 1, "object": "o", "choices": []}))
        .unwrap_err();
    assert_eq!(err, StreamError::MissingField("id"));
}

#[test]
fn non_object_payload_is_error() {
    let mut r = Reassembler::new(ReassemblyMode::Plain);
    assert_eq!(r.apply(&json!([1, 2])).unwrap_err(), StreamError::NotAnObject);
}

// ---------------------------------------------------------------------------
// Reassembler: retrieval augmented
// ---------------------------------------------------------------------------

#[test]
fn retrieval_role_transitions() {
    let mut r = Reassembler::new(ReassemblyMode::RetrievalAugmented);
    let sequence = [
        json!({"role": "tool", "content": "doc1"}),
        json!({"role": "assistant", "content": ""}),
        json!({"content": "Hel"}),
        json!({"content": "lo"}),
    ];
    for delta in sequence {
        r.apply(&payload(&rag_delta(delta))).unwrap();
    }
    assert_eq!(
        r.snapshot().messages(),
        &[
            ChatMessage::new(Role::Tool, "doc1"),
            ChatMessage::new(Role::Assistant, "Hello"),
        ]
    );
}

#[test]
fn retrieval_sentinel_appends_nothing() {
    let mut r = Reassembler::new(ReassemblyMode::RetrievalAugmented);
    r.apply(&payload(&rag_delta(json!({"role": "assistant"})))).unwrap();
    r.apply(&payload(&rag_delta(json!({"content": "Hi"})))).unwrap();
    r.apply(&payload(&rag_delta(json!({"content": "[DONE]"})))).unwrap();
    assert_eq!(r.snapshot().messages(), &[ChatMessage::new(Role::Assistant, "Hi")]);
}

#[test]
fn retrieval_without_tool_message() {
    let mut r = Reassembler::new(ReassemblyMode::RetrievalAugmented);
    r.apply(&payload(&rag_delta(json!({"role": "assistant"})))).unwrap();
    r.apply(&payload(&rag_delta(json!({"content": "ok"})))).unwrap();
    assert_eq!(r.snapshot().messages(), &[ChatMessage::new(Role::Assistant, "ok")]);
}

#[test]
fn retrieval_content_before_assistant_is_error() {
    let mut r = Reassembler::new(ReassemblyMode::RetrievalAugmented);
    r.apply(&payload(&rag_delta(json!({"role": "tool", "content": "doc"})))).unwrap();
    let err = r
        .apply(&payload(&rag_delta(json!({"content": "early"}))))
        .unwrap_err();
    assert_eq!(err, StreamError::ContentBeforeAssistant);
}

#[test]
fn retrieval_unexpected_role_is_error() {
    let mut r = Reassembler::new(ReassemblyMode::RetrievalAugmented);
    let err = r
        .apply(&payload(&rag_delta(json!({"role": "user", "content": "x"}))))
        .unwrap_err();
    assert_eq!(err, StreamError::UnexpectedRole("user".to_string()));
}

#[test]
fn retrieval_missing_delta_is_error() {
    let mut r = Reassembler::new(ReassemblyMode::RetrievalAugmented);
    let err = r
        .apply(&json!({"id": "i", "model": "m", "created": 1, "object": "o",
                       "choices": [{"delta": {"content": "plain shape"}}]}))
        .unwrap_err();
    assert_eq!(err, StreamError::MissingField("choices[0].messages[0].delta"));
}

#[test]
fn error_payload_relayed_without_touching_choices() {
    let mut r = Reassembler::new(ReassemblyMode::RetrievalAugmented);
    let err_payload = json!({"error": {"code": "429", "message": "Rate limit\nexceeded"}});
    let line = r.apply(&err_payload).unwrap();
    assert!(line.ends_with('\n'));
    assert_eq!(line.matches('\n').count(), 1, "inner newline must be escaped");
    let value: Value = serde_json::from_str(line.trim_end()).unwrap();
    assert_eq!(value, err_payload);
    assert_eq!(r.snapshot(), &Snapshot::default());
}

#[test]
fn encode_error_shape() {
    let line = encode_error("boom\nagain");
    assert_eq!(line, "{\"error\":\"boom\\nagain\"}\n");
}

// ---------------------------------------------------------------------------
// Processor: end to end over byte streams
// ---------------------------------------------------------------------------

#[tokio::test]
async fn plain_stream_one_line_per_payload() {
    let input = sse_stream(vec![
        plain_delta(None),
        String::new(),
        plain_delta(Some("Hel")),
        String::new(),
        plain_delta(Some("lo")),
        String::new(),
        plain_delta(Some("[DONE]")),
        String::new(),
        "data: [DONE]".to_string(),
    ]);

    let lines = collect_lines(processor(ReassemblyMode::Plain).process(input)).await;

    assert_eq!(lines.len(), 4, "blank lines and terminal marker produce nothing");
    assert_eq!(assistant_contents(&lines), vec!["", "Hel", "Hello", "Hello"]);
}

#[tokio::test]
async fn retrieval_stream_emits_full_message_list() {
    let input = sse_stream(vec![
        rag_delta(json!({"role": "tool", "content": "{\"citations\":[]}"})),
        rag_delta(json!({"role": "assistant", "content": ""})),
        rag_delta(json!({"content": "Hel"})),
        rag_delta(json!({"content": "lo"})),
        rag_delta(json!({"content": "[DONE]"})),
    ]);

    let lines = collect_lines(processor(ReassemblyMode::RetrievalAugmented).process(input)).await;

    assert_eq!(lines.len(), 5);
    let first = snapshot(&lines[0]);
    assert_eq!(first.messages(), &[ChatMessage::new(Role::Tool, "{\"citations\":[]}")]);
    let last = snapshot(&lines[4]);
    assert_eq!(
        last.messages(),
        &[
            ChatMessage::new(Role::Tool, "{\"citations\":[]}"),
            ChatMessage::new(Role::Assistant, "Hello"),
        ]
    );
    assert_eq!(last.id, "rag-1");
    assert_eq!(last.object, "extensions.chat.completion.chunk");
}

#[tokio::test]
async fn upstream_error_line_relayed_and_stream_continues() {
    let input = sse_stream(vec![
        rag_delta(json!({"role": "assistant"})),
        r#"data: {"error":{"code":"content_filter","message":"filtered"}}"#.to_string(),
        rag_delta(json!({"content": "after"})),
    ]);

    let lines = collect_lines(processor(ReassemblyMode::RetrievalAugmented).process(input)).await;

    assert_eq!(lines.len(), 3);
    assert_eq!(
        lines[1],
        json!({"error": {"code": "content_filter", "message": "filtered"}})
    );
    assert_eq!(assistant_contents(&lines[2..]), vec!["after"]);
}

#[tokio::test]
async fn malformed_line_ends_stream_with_error() {
    let input = sse_stream(vec![
        plain_delta(Some("a")),
        "data: {broken".to_string(),
        plain_delta(Some("never")),
    ]);

    let lines = collect_lines(processor(ReassemblyMode::Plain).process(input)).await;

    assert_eq!(lines.len(), 2);
    let message = lines[1]["error"].as_str().expect("final line is an error");
    assert!(message.contains("not valid JSON"), "{message}");
}

#[tokio::test]
async fn missing_key_ends_stream_with_error() {
    let input = sse_stream(vec![
        rag_delta(json!({"content": "no assistant yet"})),
        rag_delta(json!({"role": "assistant"})),
    ]);

    let lines = collect_lines(processor(ReassemblyMode::RetrievalAugmented).process(input)).await;

    assert_eq!(lines.len(), 1);
    assert!(lines[0]["error"]
        .as_str()
        .unwrap()
        .contains("before any assistant message"));
}

#[tokio::test]
async fn lines_split_across_chunks_reassembled() {
    let input = raw_stream(vec![
        b"data: {\"id\":\"c\",\"model\":\"m\",\"created\":1,",
        b"\"object\":\"o\",\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\r\n\r\ndata: {\"id\":\"c\",",
        b"\"model\":\"m\",\"created\":1,\"object\":\"o\",\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}",
    ]);

    let lines = collect_lines(processor(ReassemblyMode::Plain).process(input)).await;

    assert_eq!(assistant_contents(&lines), vec!["Hel", "Hello"]);
}

#[tokio::test]
async fn data_prefix_split_across_first_chunks() {
    let input = raw_stream(vec![
        b"da",
        b"ta: {\"id\":\"c\",\"model\":\"m\",\"created\":1,\"object\":\"o\",\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n",
        b"data: {\"id\":\"c\",\"model\":\"m\",\"created\":1,\"object\":\"o\",\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n",
    ]);

    let lines = collect_lines(processor(ReassemblyMode::Plain).process(input)).await;

    assert_eq!(assistant_contents(&lines), vec!["Hel", "Hello"]);
}

#[tokio::test]
async fn whitespace_then_split_prefix_still_streams() {
    let input = raw_stream(vec![b"\n", b"\nd", b"at", b"a: [DONE]\n"]);
    let lines = collect_lines(processor(ReassemblyMode::Plain).process(input)).await;
    assert!(lines.is_empty());
}

#[tokio::test]
async fn truncated_prefix_at_end_of_body_is_error() {
    let input = raw_stream(vec![b"da"]);

    let lines = collect_lines(processor(ReassemblyMode::Plain).process(input)).await;

    assert_eq!(lines.len(), 1);
    assert!(lines[0]["error"].as_str().unwrap().contains("not valid JSON"));
}

#[tokio::test]
async fn oversized_line_ends_stream_with_error() {
    let settings = StreamSettings::new(ReassemblyMode::Plain).with_max_buffered(64);
    let input = raw_stream(vec![b"data: {\"id\":\"", &[b'x'; 100], b"\"}\n"]);

    let lines = collect_lines(StreamProcessor::new(settings).process(input)).await;

    assert_eq!(lines, vec![json!({"error": "upstream sent more than 64 bytes without a line break"})]);
}

#[tokio::test]
async fn oversized_non_sse_body_ends_stream_with_error() {
    let settings = StreamSettings::new(ReassemblyMode::Plain).with_max_buffered(16);
    let input = raw_stream(vec![b"{\n  \"error\": ", b"{\"message\": \"too long for the cap\"}}\n"]);

    let lines = collect_lines(StreamProcessor::new(settings).process(input)).await;

    assert_eq!(lines.len(), 1);
    assert!(lines[0]["error"].as_str().unwrap().contains("more than 16 bytes"));
}

#[tokio::test]
async fn many_short_lines_in_one_chunk_within_cap() {
    let settings = StreamSettings::new(ReassemblyMode::Plain).with_max_buffered(32);
    let input = raw_stream(vec![b": ping\n: ping\n: ping\n: ping\n: ping\n: ping\ndata: [DONE]\n"]);

    let lines = collect_lines(StreamProcessor::new(settings).process(input)).await;

    assert!(lines.is_empty());
}

#[tokio::test]
async fn non_sse_error_body_emitted_as_single_line() {
    let input = raw_stream(vec![
        b"{\n  \"error\": {\n    \"code\": \"401\",\n",
        b"    \"message\": \"Access denied\"\n  }\n}\n",
    ]);

    let lines = collect_lines(processor(ReassemblyMode::Plain).process(input)).await;

    assert_eq!(
        lines,
        vec![json!({"error": {"code": "401", "message": "Access denied"}})]
    );
}

#[tokio::test]
async fn non_sse_garbage_becomes_error_line() {
    let input = raw_stream(vec![b"<html>Bad Gateway</html>"]);

    let lines = collect_lines(processor(ReassemblyMode::Plain).process(input)).await;

    assert_eq!(lines.len(), 1);
    assert!(lines[0]["error"].as_str().unwrap().contains("not valid JSON"));
}

#[tokio::test]
async fn empty_upstream_produces_no_output() {
    let input = raw_stream(vec![]);
    let lines = collect_lines(processor(ReassemblyMode::Plain).process(input)).await;
    assert!(lines.is_empty());
}

#[tokio::test]
async fn transport_error_becomes_final_error_line() {
    let (tx, input) = channel_stream();
    tx.send(Ok(Bytes::from(format!("{}\n", plain_delta(Some("par"))))))
        .await
        .unwrap();
    tx.send(Err("connection reset by peer".to_string()))
        .await
        .unwrap();
    tx.send(Ok(Bytes::from(format!("{}\n", plain_delta(Some("tial"))))))
        .await
        .unwrap();
    drop(tx);

    let lines = collect_lines(processor(ReassemblyMode::Plain).process(input)).await;

    assert_eq!(lines.len(), 2);
    assert_eq!(assistant_contents(&lines[..1]), vec!["par"]);
    assert_eq!(
        lines[1]["error"],
        "upstream stream failed: connection reset by peer"
    );
}

#[tokio::test(start_paused = true)]
async fn idle_timeout_emits_error() {
    let (tx, input) = channel_stream();

    let settings =
        StreamSettings::new(ReassemblyMode::Plain).with_idle_timeout(Duration::from_secs(30));
    let output = StreamProcessor::new(settings).process(input);
    tokio::pin!(output);

    tx.send(Ok(Bytes::from(format!("{}\n", plain_delta(Some("hi"))))))
        .await
        .unwrap();
    let first = output.next().await.expect("first snapshot");
    assert!(String::from_utf8_lossy(&first).contains("\"hi\""));

    time::advance(Duration::from_secs(31)).await;

    let last = output.next().await.expect("timeout error line");
    let value: Value = serde_json::from_slice(&last).unwrap();
    assert_eq!(value["error"], "upstream stream idle for more than 30000 ms");
    assert!(output.next().await.is_none(), "stream ends after the error");

    drop(tx);
}

#[tokio::test]
async fn client_disconnect_stops_processing() {
    let (tx, input) = channel_stream();

    let mut output = Box::pin(processor(ReassemblyMode::Plain).process(input));

    tx.send(Ok(Bytes::from(format!("{}\n", plain_delta(Some("hello"))))))
        .await
        .unwrap();
    let _ = output.next().await;

    drop(output);

    let _ = tx
        .send(Ok(Bytes::from(format!("{}\n", plain_delta(Some("world"))))))
        .await;

    tokio::task::yield_now().await;

    let closed = time::timeout(Duration::from_secs(1), tx.closed()).await;
    assert!(closed.is_ok(), "processor should drop upstream when client disconnects");
}

#[tokio::test]
async fn snapshots_grow_monotonically() {
    let mut lines = vec![
        rag_delta(json!({"role": "tool", "content": "doc"})),
        rag_delta(json!({"role": "assistant"})),
    ];
    for word in ["The", " ", "", "answer", " is", "[DONE]", " 42", "."] {
        lines.push(rag_delta(json!({ "content": word })));
    }

    let out = collect_lines(
        processor(ReassemblyMode::RetrievalAugmented).process(sse_stream(lines)),
    )
    .await;

    for pair in out.windows(2) {
        let before = snapshot(&pair[0]);
        let after = snapshot(&pair[1]);
        assert!(before.messages().len() <= after.messages().len());
        for (old, new) in before.messages().iter().zip(after.messages()) {
            assert_eq!(old.role, new.role);
            assert!(
                new.content.starts_with(&old.content),
                "{:?} is not a prefix of {:?}",
                old.content,
                new.content
            );
        }
    }
    assert_eq!(assistant_contents(&out).last().unwrap(), "The answer is 42.");
}
