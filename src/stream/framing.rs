// Copyright 2026 The Chatrelay Project
// SPDX-License-Identifier: Apache-2.0

// Line framing
//
// Splits the upstream byte stream into lines and turns each line into a
// `Frame`. Upstream lines look like:
//
//   data: {"id":"chatcmpl-1","choices":[...]}
//   <blank>
//   data: [DONE]

use super::types::{Frame, StreamError, DATA_PREFIX, DONE_SENTINEL};

/// Parse one line (without its trailing newline) into a frame.
///
/// Lines without the `data:` prefix are decoded as bare JSON, which is how
/// upstream error bodies arrive when the endpoint rejects a streaming
/// request outright.
pub fn parse_line(line: &str) -> Result<Frame, StreamError> {
    let trimmed = line.trim();

    if trimmed.is_empty() || trimmed.starts_with(':') {
        return Ok(Frame::Skip);
    }

    if ["event:", "id:", "retry:"]
        .iter()
        .any(|field| trimmed.starts_with(field))
    {
        return Ok(Frame::Skip);
    }

    let payload = trimmed
        .strip_prefix(DATA_PREFIX)
        .map(str::trim_start)
        .unwrap_or(trimmed);

    if payload == DONE_SENTINEL {
        return Ok(Frame::Done);
    }

    // `data:` with nothing after it is framing noise.
    if payload.is_empty() {
        return Ok(Frame::Skip);
    }

    serde_json::from_str(payload)
        .map(Frame::Payload)
        .map_err(|e| StreamError::MalformedJson(e.to_string()))
}

/// Markers that open an SSE body.
const SSE_MARKERS: [&str; 3] = [DATA_PREFIX, "event:", ":"];

/// Whether the start of a response body looks like an SSE stream.
///
/// Non-SSE bodies (a JSON error document, possibly pretty-printed over
/// several lines) are decoded as one payload instead of line by line.
pub fn is_sse_content(first_bytes: &[u8]) -> bool {
    let text = String::from_utf8_lossy(first_bytes);
    let trimmed = text.trim_start();
    SSE_MARKERS.iter().any(|marker| trimmed.starts_with(marker))
}

/// Classify the buffered start of a body, or `None` while it cannot be told
/// yet: nothing but whitespace so far, or a first line that is still a
/// prefix of an SSE marker (`"da"` split from `"ta: {...}"`).
pub fn classify_body(buffered: &[u8]) -> Option<bool> {
    let text = String::from_utf8_lossy(buffered);
    let trimmed = text.trim_start();
    if trimmed.is_empty() {
        return None;
    }
    if SSE_MARKERS.iter().any(|marker| trimmed.starts_with(marker)) {
        return Some(true);
    }
    let partial_marker =
        !trimmed.contains('\n') && SSE_MARKERS.iter().any(|marker| marker.starts_with(trimmed));
    if partial_marker {
        None
    } else {
        Some(false)
    }
}

/// Byte-level line splitter.
///
/// Buffers raw bytes so a multi-byte character or a JSON document split
/// across network chunks is decoded only once the whole line is present.
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
    /// Bytes of `pending` already known to hold no newline.
    scanned: usize,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) {
        self.pending.extend_from_slice(chunk);
    }

    /// Take the next complete line, if any. A trailing `\r` is dropped.
    pub fn next_line(&mut self) -> Option<Result<String, StreamError>> {
        let Some(offset) = self.pending[self.scanned..].iter().position(|b| *b == b'\n') else {
            self.scanned = self.pending.len();
            return None;
        };
        let newline = self.scanned + offset;
        self.scanned = 0;
        let mut line: Vec<u8> = self.pending.drain(..=newline).collect();
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
        Some(String::from_utf8(line).map_err(|_| StreamError::InvalidUtf8))
    }

    /// Take whatever is left once the input ended without a final newline.
    pub fn finish(&mut self) -> Option<Result<String, StreamError>> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = self.take_all();
        Some(String::from_utf8(rest).map_err(|_| StreamError::InvalidUtf8))
    }

    /// Take every buffered byte, complete lines included.
    pub fn take_all(&mut self) -> Vec<u8> {
        self.scanned = 0;
        std::mem::take(&mut self.pending)
    }

    pub fn buffered(&self) -> &[u8] {
        &self.pending
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
