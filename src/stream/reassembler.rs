// Copyright 2026 The Chatrelay Project
// SPDX-License-Identifier: Apache-2.0

// Snapshot reassembly
//
// Owns the cumulative snapshot for one conversation turn and folds each
// decoded delta payload into it. Every call to `apply` yields exactly one
// encoded output line.

use serde_json::Value;

use super::types::{ReassemblyMode, StreamError, DONE_SENTINEL};
use crate::message::{ChatMessage, Role, Snapshot};

/// Per-turn accumulator.
///
/// `assistant` is the index of the message currently receiving content.
/// Messages before it are never touched again once it is opened.
#[derive(Debug)]
pub struct Reassembler {
    mode: ReassemblyMode,
    snapshot: Snapshot,
    assistant: Option<usize>,
}

impl Reassembler {
    pub fn new(mode: ReassemblyMode) -> Self {
        Self {
            mode,
            snapshot: Snapshot::default(),
            assistant: None,
        }
    }

    pub fn mode(&self) -> ReassemblyMode {
        self.mode
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    /// Fold one payload into the snapshot and return the output line.
    ///
    /// A payload carrying an `error` key is relayed verbatim and leaves the
    /// snapshot untouched.
    pub fn apply(&mut self, payload: &Value) -> Result<String, StreamError> {
        let object = payload.as_object().ok_or(StreamError::NotAnObject)?;

        if object.contains_key("error") {
            return Ok(encode_line(payload));
        }

        self.update_identity(payload)?;

        match self.mode {
            ReassemblyMode::Plain => self.apply_plain(payload)?,
            ReassemblyMode::RetrievalAugmented => self.apply_retrieval(payload)?,
        }

        Ok(encode_snapshot(&self.snapshot))
    }

    fn update_identity(&mut self, payload: &Value) -> Result<(), StreamError> {
        let id = str_field(payload, "id")?;
        let model = str_field(payload, "model")?;
        let object = str_field(payload, "object")?;
        let created = payload
            .get("created")
            .and_then(Value::as_u64)
            .ok_or(StreamError::MissingField("created"))?;

        self.snapshot.id = id.to_string();
        self.snapshot.model = model.to_string();
        self.snapshot.object = object.to_string();
        self.snapshot.created = created;
        Ok(())
    }

    /// One assistant message, opened on the first line and only appended to.
    fn apply_plain(&mut self, payload: &Value) -> Result<(), StreamError> {
        let choices = payload
            .get("choices")
            .and_then(Value::as_array)
            .ok_or(StreamError::MissingField("choices"))?;

        let index = self.open_assistant_once();

        // Azure sends a first chunk with an empty `choices` array that only
        // carries prompt filter results.
        let Some(choice) = choices.first() else {
            return Ok(());
        };

        let text = choice
            .get("delta")
            .and_then(|d| d.get("content"))
            .or_else(|| choice.get("text"))
            .and_then(Value::as_str);

        if let Some(text) = text {
            self.append(index, text);
        }
        Ok(())
    }

    fn apply_retrieval(&mut self, payload: &Value) -> Result<(), StreamError> {
        let delta = payload
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("messages"))
            .and_then(|m| m.get(0))
            .and_then(|m| m.get("delta"))
            .ok_or(StreamError::MissingField("choices[0].messages[0].delta"))?;

        match delta.get("role").and_then(Value::as_str) {
            Some("tool") => {
                if self.assistant.is_some() {
                    tracing::warn!("tool message arrived after assistant message was opened");
                }
                let content = match delta.get("content") {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                };
                self.snapshot
                    .messages_mut()
                    .push(ChatMessage::new(Role::Tool, content));
            }
            Some("assistant") => {
                let messages = self.snapshot.messages_mut();
                messages.push(ChatMessage::new(Role::Assistant, ""));
                self.assistant = Some(messages.len() - 1);
            }
            Some(other) => return Err(StreamError::UnexpectedRole(other.to_string())),
            None => {
                let text = delta
                    .get("content")
                    .and_then(Value::as_str)
                    .ok_or(StreamError::MissingField("content"))?;
                let index = self.assistant.ok_or(StreamError::ContentBeforeAssistant)?;
                self.append(index, text);
            }
        }
        Ok(())
    }

    fn open_assistant_once(&mut self) -> usize {
        if let Some(index) = self.assistant {
            return index;
        }
        let messages = self.snapshot.messages_mut();
        messages.push(ChatMessage::new(Role::Assistant, ""));
        let index = messages.len() - 1;
        self.assistant = Some(index);
        index
    }

    fn append(&mut self, index: usize, text: &str) {
        if text.is_empty() || text == DONE_SENTINEL {
            return;
        }
        if let Some(message) = self.snapshot.messages_mut().get_mut(index) {
            message.content.push_str(text);
        }
    }
}

fn str_field<'a>(payload: &'a Value, field: &'static str) -> Result<&'a str, StreamError> {
    payload
        .get(field)
        .and_then(Value::as_str)
        .ok_or(StreamError::MissingField(field))
}

// ---------------------------------------------------------------------------
// Output encoding
// ---------------------------------------------------------------------------

/// Compact JSON followed by a single newline. Compact serialization escapes
/// every newline inside strings, so the document never spans two lines.
pub fn encode_line(value: &Value) -> String {
    let mut line = value.to_string();
    line.push('\n');
    line
}

pub fn encode_snapshot(snapshot: &Snapshot) -> String {
    let mut line = serde_json::to_string(snapshot)
        .unwrap_or_else(|e| serde_json::json!({ "error": e.to_string() }).to_string());
    line.push('\n');
    line
}

/// `{"error": "<message>"}` line.
pub fn encode_error(message: &str) -> String {
    encode_line(&serde_json::json!({ "error": message }))
}
