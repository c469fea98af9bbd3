//! Conversation transcript model and the reducer that builds it.
//!
//! A turn's assistant message is assembled from an ordered event stream by
//! [`reducer::TranscriptReducer`]; tool-call lifecycles live in
//! [`registry::ToolCallRegistry`]; persisted history is replayed through the
//! same reducer by [`history::normalize_history`].

pub mod history;
pub mod reducer;
pub mod registry;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use history::{normalize_history, RawMessage};
pub use reducer::{Applied, ExtractionMode, TranscriptReducer};
pub use registry::ToolCallRegistry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// Lifecycle of a single tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Calling,
    Complete,
    Error,
}

impl ToolCallStatus {
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, ToolCallStatus::Calling)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallState {
    pub id: String,
    pub name: String,
    pub status: ToolCallStatus,
    pub input: serde_json::Map<String, serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ToolCallState {
    #[must_use]
    pub fn calling(
        id: impl Into<String>,
        name: impl Into<String>,
        input: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            status: ToolCallStatus::Calling,
            input,
            output: None,
            error: None,
        }
    }
}

/// One ordered element of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ContentPart {
    Text {
        content: String,
    },
    ToolCall {
        #[serde(rename = "toolCall")]
        tool_call: ToolCallState,
    },
}

impl ContentPart {
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        ContentPart::Text {
            content: content.into(),
        }
    }

    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ContentPart::Text { content } => Some(content),
            ContentPart::ToolCall { .. } => None,
        }
    }

    #[must_use]
    pub fn as_tool_call(&self) -> Option<&ToolCallState> {
        match self {
            ContentPart::ToolCall { tool_call } => Some(tool_call),
            ContentPart::Text { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Streaming,
    Finalized,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    /// Concatenation of all text parts.
    pub content: String,
    pub parts: Vec<ContentPart>,
    pub timestamp: DateTime<Utc>,
    pub status: MessageStatus,
}

impl ChatMessage {
    /// A finalized user message built from input text.
    #[must_use]
    pub fn user(id: impl Into<String>, text: impl Into<String>) -> Self {
        let text = text.into();
        let parts = if text.is_empty() {
            Vec::new()
        } else {
            vec![ContentPart::text(text.clone())]
        };
        Self {
            id: id.into(),
            role: Role::User,
            content: text,
            parts,
            timestamp: Utc::now(),
            status: MessageStatus::Finalized,
        }
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.status == MessageStatus::Finalized
    }

    pub fn tool_calls(&self) -> impl Iterator<Item = &ToolCallState> {
        self.parts.iter().filter_map(ContentPart::as_tool_call)
    }
}

pub(crate) fn flatten_text(parts: &[ContentPart]) -> String {
    let mut out = String::new();
    for part in parts {
        if let Some(text) = part.as_text() {
            out.push_str(text);
        }
    }
    out
}

/// A conversation thread as listed by the external store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub resource_id: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
