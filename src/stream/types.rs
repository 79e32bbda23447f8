// Copyright 2026 The Chatrelay Project
// SPDX-License-Identifier: Apache-2.0

// Stream types
//
// Framing constants, the per-line frame produced by the parser, the
// reassembly mode, and stream-tier errors.

use std::time::Duration;

/// Framing prefix of every upstream payload line.
pub const DATA_PREFIX: &str = "data:";

/// Terminal sentinel. As a whole line payload it ends the stream; as delta
/// content it means "no text to append".
pub const DONE_SENTINEL: &str = "[DONE]";

/// Output channel depth. One line of lookahead keeps upstream reads paced by
/// downstream writes.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 1;

/// Cap on bytes held while waiting for a newline, or for the end of a
/// non-SSE body.
pub const MAX_BUFFERED_BYTES: usize = 8 * 1024 * 1024;

// ---------------------------------------------------------------------------
// Frames
// ---------------------------------------------------------------------------

/// One parsed upstream line.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Blank line, SSE comment, or `event:`/`id:`/`retry:` field. No output.
    Skip,
    /// `data: [DONE]`. No output.
    Done,
    /// Decoded JSON payload. Exactly one output line.
    Payload(serde_json::Value),
}

// ---------------------------------------------------------------------------
// Reassembly mode
// ---------------------------------------------------------------------------

/// Which accumulation rule applies to the delta lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReassemblyMode {
    /// Chat completions: `choices[0].delta.content` fragments build a single
    /// assistant message.
    Plain,
    /// Extensions endpoint with a search data source:
    /// `choices[0].messages[0].delta` carries a tool message, then an
    /// assistant role marker, then content fragments.
    RetrievalAugmented,
}

impl ReassemblyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReassemblyMode::Plain => "plain",
            ReassemblyMode::RetrievalAugmented => "retrieval_augmented",
        }
    }
}

/// Knobs for one stream processor.
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
    pub mode: ReassemblyMode,
    /// Maximum silence between upstream chunks. `None` waits forever.
    pub idle_timeout: Option<Duration>,
    /// Most bytes buffered before the stream fails.
    pub max_buffered: usize,
}

impl StreamSettings {
    pub fn new(mode: ReassemblyMode) -> Self {
        Self {
            mode,
            idle_timeout: None,
            max_buffered: MAX_BUFFERED_BYTES,
        }
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = Some(timeout);
        self
    }

    pub fn with_max_buffered(mut self, limit: usize) -> Self {
        self.max_buffered = limit;
        self
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Failures while consuming an upstream stream. Each one is rendered as a
/// final `{"error": ...}` line.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum StreamError {
    #[error("upstream line is not valid UTF-8")]
    InvalidUtf8,

    #[error("upstream payload is not valid JSON: {0}")]
    MalformedJson(String),

    #[error("upstream payload is not a JSON object")]
    NotAnObject,

    #[error("upstream payload is missing field '{0}'")]
    MissingField(&'static str),

    #[error("unexpected message role '{0}' in delta")]
    UnexpectedRole(String),

    #[error("content delta arrived before any assistant message was opened")]
    ContentBeforeAssistant,

    #[error("upstream stream failed: {0}")]
    Upstream(String),

    #[error("upstream stream idle for more than {0} ms")]
    IdleTimeout(u128),

    #[error("upstream sent more than {0} bytes without a line break")]
    BufferLimit(usize),
}
