// Stream processor
//
// Takes the upstream byte stream, splits it into lines, folds each delta
// into the per-turn snapshot, and produces an output byte stream with one
// JSON line per upstream payload line. Runs in its own task, connected to
// the response body by a one-slot channel.

use super::framing::{classify_body, is_sse_content, parse_line, LineBuffer};
use super::reassembler::{encode_error, Reassembler};
use super::types::{Frame, StreamError, StreamSettings, OUTPUT_CHANNEL_CAPACITY};
use bytes::Bytes;
use std::fmt::Display;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

/// Reassembles an upstream delta stream into snapshot lines.
#[derive(Debug, Clone, Copy)]
pub struct StreamProcessor {
    settings: StreamSettings,
}

/// Why processing stopped early.
#[derive(Debug, PartialEq)]
enum Halt {
    /// The downstream receiver is gone.
    Disconnected,
    /// A stream error line was emitted; nothing may follow it.
    Failed,
}

impl StreamProcessor {
    pub fn new(settings: StreamSettings) -> Self {
        Self { settings }
    }

    /// Process an upstream byte stream, producing the downstream byte stream.
    ///
    /// Dropping the returned stream stops the task at its next send, which
    /// drops `input` and with it the upstream connection.
    pub fn process<E>(
        &self,
        input: impl Stream<Item = Result<Bytes, E>> + Send + 'static,
    ) -> impl Stream<Item = Bytes>
    where
        E: Display + Send + 'static,
    {
        let settings = self.settings;
        let (tx, rx) = mpsc::channel::<Bytes>(OUTPUT_CHANNEL_CAPACITY);

        tokio::spawn(async move {
            let mut input = Box::pin(input);
            let mut state = ProcessingState::new(settings);

            tracing::debug!(mode = settings.mode.as_str(), "stream reassembly started");

            let outcome = run(&mut input, &mut state, &tx).await;

            match outcome {
                Ok(()) => tracing::debug!(
                    lines_out = state.lines_out,
                    "stream reassembly finished"
                ),
                Err(Halt::Disconnected) => tracing::info!(
                    lines_out = state.lines_out,
                    "client disconnected, upstream stream dropped"
                ),
                Err(Halt::Failed) => tracing::warn!(
                    lines_out = state.lines_out,
                    "stream reassembly ended with error"
                ),
            }
        });

        ReceiverStream::new(rx)
    }
}

// ---------------------------------------------------------------------------
// Processing state
// ---------------------------------------------------------------------------

/// Mutable state carried through the processing loop.
struct ProcessingState {
    settings: StreamSettings,
    lines: LineBuffer,
    reassembler: Reassembler,
    /// `None` until the buffered start of the body shows whether it is an
    /// SSE stream.
    is_sse: Option<bool>,
    lines_out: usize,
}

impl ProcessingState {
    fn new(settings: StreamSettings) -> Self {
        Self {
            settings,
            lines: LineBuffer::new(),
            reassembler: Reassembler::new(settings.mode),
            is_sse: None,
            lines_out: 0,
        }
    }
}

// ---------------------------------------------------------------------------
// Main loop
// ---------------------------------------------------------------------------

async fn run<S, E>(
    input: &mut S,
    state: &mut ProcessingState,
    tx: &mpsc::Sender<Bytes>,
) -> Result<(), Halt>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: Display,
{
    loop {
        let next = match state.settings.idle_timeout {
            Some(limit) => match tokio::time::timeout(limit, input.next()).await {
                Ok(next) => next,
                Err(_) => {
                    let err = StreamError::IdleTimeout(limit.as_millis());
                    return fail(tx, state, &err).await;
                }
            },
            None => input.next().await,
        };

        match next {
            None => break,
            Some(Err(e)) => {
                let err = StreamError::Upstream(e.to_string());
                return fail(tx, state, &err).await;
            }
            Some(Ok(chunk)) => {
                state.lines.push(&chunk);

                if state.is_sse.is_none() {
                    state.is_sse = classify_body(state.lines.buffered());
                }

                if state.is_sse == Some(true) {
                    drain_lines(state, tx).await?;
                }

                if state.lines.len() > state.settings.max_buffered {
                    let err = StreamError::BufferLimit(state.settings.max_buffered);
                    return fail(tx, state, &err).await;
                }
            }
        }
    }

    // Body ended while its start was still ambiguous.
    if state.is_sse.is_none() && state.lines.buffered().iter().any(|b| !b.is_ascii_whitespace()) {
        state.is_sse = Some(is_sse_content(state.lines.buffered()));
    }

    match state.is_sse {
        Some(true) => {
            drain_lines(state, tx).await?;
            if let Some(line) = state.lines.finish() {
                process_line(line, state, tx).await?;
            }
        }
        // Whole body is one document.
        Some(false) => {
            let body = state.lines.take_all();
            let text = String::from_utf8(body).map_err(|_| StreamError::InvalidUtf8);
            let frame = text.and_then(|t| {
                serde_json::from_str(t.trim())
                    .map(Frame::Payload)
                    .map_err(|e| StreamError::MalformedJson(e.to_string()))
            });
            process_frame(frame, state, tx).await?;
        }
        None => {}
    }

    Ok(())
}

/// Process every complete line currently buffered.
async fn drain_lines(state: &mut ProcessingState, tx: &mpsc::Sender<Bytes>) -> Result<(), Halt> {
    while let Some(line) = state.lines.next_line() {
        process_line(line, state, tx).await?;
    }
    Ok(())
}

async fn process_line(
    line: Result<String, StreamError>,
    state: &mut ProcessingState,
    tx: &mpsc::Sender<Bytes>,
) -> Result<(), Halt> {
    let frame = line.and_then(|l| parse_line(&l));
    process_frame(frame, state, tx).await
}

async fn process_frame(
    frame: Result<Frame, StreamError>,
    state: &mut ProcessingState,
    tx: &mpsc::Sender<Bytes>,
) -> Result<(), Halt> {
    let payload = match frame {
        Ok(Frame::Skip) | Ok(Frame::Done) => return Ok(()),
        Ok(Frame::Payload(payload)) => payload,
        Err(e) => return fail(tx, state, &e).await,
    };

    match state.reassembler.apply(&payload) {
        Ok(line) => send(tx, state, line).await,
        Err(e) => fail(tx, state, &e).await,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn send(tx: &mpsc::Sender<Bytes>, state: &mut ProcessingState, line: String) -> Result<(), Halt> {
    tx.send(Bytes::from(line))
        .await
        .map_err(|_| Halt::Disconnected)?;
    state.lines_out += 1;
    Ok(())
}

/// Emit the error as the final line and stop.
async fn fail(tx: &mpsc::Sender<Bytes>, state: &mut ProcessingState, err: &StreamError) -> Result<(), Halt> {
    tracing::warn!(error = %err, "upstream stream error");
    send(tx, state, encode_error(&err.to_string())).await?;
    Err(Halt::Failed)
}
