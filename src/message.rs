// Copyright 2026 The Chatrelay Project
// SPDX-License-Identifier: Apache-2.0

// Conversation types shared by the request translator, the reassembler
// and the HTTP surface.
//
// `ChatMessage` is what the browser sends and what snapshots carry.
// `Snapshot` is the cumulative turn state relayed downstream, one per
// upstream delta line.

use serde::{Deserialize, Serialize};

/// The role of a message participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

/// A single message in the conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    /// Text content. A null or absent content is read as empty.
    #[serde(default, deserialize_with = "null_as_empty")]
    pub content: String,
}

impl ChatMessage {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Inbound `/conversation` request body.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConversationRequest {
    pub messages: Vec<ChatMessage>,
}

/// One entry of `Snapshot::choices`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SnapshotChoice {
    pub messages: Vec<ChatMessage>,
}

/// The full state of a conversation turn as known so far.
///
/// Identity fields (`id`, `model`, `created`, `object`) are copied from the
/// latest upstream delta. `choices` always holds exactly one entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub model: String,
    pub created: u64,
    pub object: String,
    pub choices: Vec<SnapshotChoice>,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            id: String::new(),
            model: String::new(),
            created: 0,
            object: String::new(),
            choices: vec![SnapshotChoice::default()],
        }
    }
}

impl Snapshot {
    /// Messages of the single choice.
    pub fn messages(&self) -> &[ChatMessage] {
        self.choices
            .first()
            .map(|c| c.messages.as_slice())
            .unwrap_or(&[])
    }

    pub fn messages_mut(&mut self) -> &mut Vec<ChatMessage> {
        if self.choices.is_empty() {
            self.choices.push(SnapshotChoice::default());
        }
        &mut self.choices[0].messages
    }
}
