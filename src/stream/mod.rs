// Copyright 2026 The Chatrelay Project
// SPDX-License-Identifier: Apache-2.0

// Streaming reassembly
//
// Responsibilities:
// - Split the upstream `data:`-framed byte stream into lines
// - Skip blank lines, SSE comments and the terminal `data: [DONE]`
// - Relay upstream error payloads verbatim and keep going
// - Fold plain or retrieval-augmented deltas into a cumulative snapshot
// - Emit one compact JSON line per payload line, flushed immediately
// - Turn any parse or transport failure into a final `{"error": ...}` line
// - Idle timeout between upstream chunks
// - Non-SSE bodies decoded as a single document

mod framing;
mod processor;
mod reassembler;
mod types;

pub use framing::{classify_body, is_sse_content, parse_line, LineBuffer};
pub use processor::StreamProcessor;
pub use reassembler::{encode_error, encode_line, encode_snapshot, Reassembler};
pub use types::{
    Frame, ReassemblyMode, StreamError, StreamSettings, DATA_PREFIX, DONE_SENTINEL,
    MAX_BUFFERED_BYTES, OUTPUT_CHANNEL_CAPACITY,
};

#[cfg(test)]
mod tests;
