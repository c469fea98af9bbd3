use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use super::{flatten_text, ChatMessage, ContentPart, MessageStatus, Role, ToolCallRegistry};
use crate::error::error_marker;
use crate::extract::{EmbeddedExtractor, Extracted, Extraction, Scan};
use crate::stream::AgentEvent;
use crate::util::{json_display_string, next_call_id};

const STEP_SEPARATOR: &str = "\n\n";

/// Whether text is mined for embedded tool-call syntax.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExtractionMode {
    #[default]
    Enabled,
    Disabled,
}

impl ExtractionMode {
    #[must_use]
    pub fn from_flag(enabled: bool) -> Self {
        if enabled {
            ExtractionMode::Enabled
        } else {
            ExtractionMode::Disabled
        }
    }
}

/// Effect of one event on the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    /// The visible message changed.
    Updated,
    /// The message is now finalized.
    Finished,
    /// No visible change: dropped, duplicate, or deferred to a later event.
    Ignored,
}

#[derive(Debug)]
enum PartSlot {
    Text(String),
    /// Index into the registry; the call's current state is read at snapshot time.
    ToolCall(usize),
}

/// Builds one assistant message from the ordered events of a turn.
///
/// Only the last part may grow: text extends the tail text part, and any tool
/// call closes it. Tool-call parts hold a registry slot so a later
/// `ToolResult` changes what every subsequent [`snapshot`](Self::snapshot)
/// shows without touching part order.
#[derive(Debug)]
pub struct TranscriptReducer {
    message_id: String,
    timestamp: DateTime<Utc>,
    parts: Vec<PartSlot>,
    registry: ToolCallRegistry,
    extractor: Option<EmbeddedExtractor>,
    /// Offset into the tail text part where the next embedded scan starts.
    scan_from: usize,
    pending_break: bool,
    finalized: bool,
}

impl TranscriptReducer {
    #[must_use]
    pub fn new(message_id: impl Into<String>, mode: ExtractionMode) -> Self {
        Self {
            message_id: message_id.into(),
            timestamp: Utc::now(),
            parts: Vec::new(),
            registry: ToolCallRegistry::new(),
            extractor: match mode {
                ExtractionMode::Enabled => Some(EmbeddedExtractor::new()),
                ExtractionMode::Disabled => None,
            },
            scan_from: 0,
            pending_break: false,
            finalized: false,
        }
    }

    #[must_use]
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    #[must_use]
    pub fn registry(&self) -> &ToolCallRegistry {
        &self.registry
    }

    #[must_use]
    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn apply(&mut self, event: AgentEvent) -> Applied {
        if self.finalized {
            tracing::debug!(
                message_id = %self.message_id,
                "dropping {} event after finalize",
                event.kind()
            );
            return Applied::Ignored;
        }

        match event {
            AgentEvent::Text { content } => {
                if content.is_empty() {
                    return Applied::Ignored;
                }
                self.push_text(&content);
                Applied::Updated
            }
            AgentEvent::ToolCall { id, name, args } => {
                if self.begin_call(&id, &name, args) {
                    Applied::Updated
                } else {
                    Applied::Ignored
                }
            }
            AgentEvent::ToolResult {
                tool_call_id,
                result,
                is_error,
            } => {
                if self.settle(&tool_call_id, result, is_error) {
                    Applied::Updated
                } else {
                    Applied::Ignored
                }
            }
            AgentEvent::StepFinish => {
                self.pending_break = true;
                Applied::Ignored
            }
            AgentEvent::Finish => {
                self.finalize();
                Applied::Finished
            }
            AgentEvent::Error { message } => {
                self.fail(&message);
                Applied::Finished
            }
        }
    }

    /// Freeze the message as it stands. Unclosed embedded blocks stay literal.
    pub fn finalize(&mut self) {
        if self.finalized {
            return;
        }
        self.extract_embedded(true);
        self.pending_break = false;
        self.finalized = true;
    }

    /// Replace the message with a single `Error: <reason>` part and freeze it.
    pub fn fail(&mut self, reason: &str) {
        if self.finalized {
            return;
        }
        self.parts = vec![PartSlot::Text(error_marker(reason))];
        self.pending_break = false;
        self.finalized = true;
    }

    #[must_use]
    pub fn snapshot(&self) -> ChatMessage {
        let parts: Vec<ContentPart> = self
            .parts
            .iter()
            .filter_map(|slot| match slot {
                PartSlot::Text(text) if text.is_empty() => None,
                PartSlot::Text(text) => Some(ContentPart::text(text.clone())),
                PartSlot::ToolCall(index) => {
                    self.registry
                        .by_slot(*index)
                        .cloned()
                        .map(|tool_call| ContentPart::ToolCall { tool_call })
                }
            })
            .collect();
        ChatMessage {
            id: self.message_id.clone(),
            role: Role::Assistant,
            content: flatten_text(&parts),
            parts,
            timestamp: self.timestamp,
            status: if self.finalized {
                MessageStatus::Finalized
            } else {
                MessageStatus::Streaming
            },
        }
    }

    // -----------------------------------------------------------------------
    // Event handlers
    // -----------------------------------------------------------------------

    fn push_text(&mut self, chunk: &str) {
        let separate = std::mem::take(&mut self.pending_break);
        match self.parts.last_mut() {
            Some(PartSlot::Text(tail)) => {
                if separate && !tail.is_empty() {
                    tail.push_str(STEP_SEPARATOR);
                }
                tail.push_str(chunk);
            }
            _ => {
                self.parts.push(PartSlot::Text(chunk.to_string()));
                self.scan_from = 0;
            }
        }
        self.extract_embedded(false);
    }

    /// Returns whether a new part was appended.
    fn begin_call(&mut self, id: &str, name: &str, input: Map<String, Value>) -> bool {
        let (slot, created) = self.registry.begin_slot(id, name, input);
        if created {
            self.parts.push(PartSlot::ToolCall(slot));
        } else {
            tracing::debug!(message_id = %self.message_id, "duplicate tool call {id} ignored");
        }
        created
    }

    fn settle(&mut self, id: &str, result: Value, is_error: bool) -> bool {
        if !self.registry.contains(id) {
            tracing::debug!(message_id = %self.message_id, "result for unknown tool call {id} ignored");
            return false;
        }
        let changed = if is_error {
            self.registry.fail(id, json_display_string(&result))
        } else {
            self.registry.complete(id, result)
        };
        if !changed {
            tracing::debug!(message_id = %self.message_id, "repeated result for tool call {id} ignored");
        }
        changed
    }

    // -----------------------------------------------------------------------
    // Embedded extraction
    // -----------------------------------------------------------------------

    fn extract_embedded(&mut self, at_end: bool) {
        let Some(extractor) = self.extractor.take() else {
            return;
        };
        loop {
            let Some(PartSlot::Text(tail)) = self.parts.last() else {
                break;
            };
            match extractor.scan(tail, self.scan_from, at_end) {
                Scan::Idle { resume_at } => {
                    self.scan_from = resume_at;
                    break;
                }
                Scan::Found(extraction) => self.splice(extraction),
            }
        }
        self.extractor = Some(extractor);
    }

    /// Cut `extraction`'s span out of the tail text part and put its items
    /// in that position.
    fn splice(&mut self, extraction: Extraction) {
        let Some(PartSlot::Text(mut tail)) = self.parts.pop() else {
            return;
        };
        let after = tail.split_off(extraction.end);
        tail.truncate(extraction.start);
        let before_len = tail.len();
        if !tail.is_empty() {
            self.parts.push(PartSlot::Text(tail));
        }

        let parts_before = self.parts.len();
        for item in extraction.items {
            match item {
                Extracted::Call(call) => {
                    let id = call.id.unwrap_or_else(next_call_id);
                    self.begin_call(&id, &call.name, call.input);
                }
                Extracted::Outcome {
                    id,
                    output,
                    is_error,
                } => {
                    self.settle(&id, output, is_error);
                }
            }
        }

        let inserted = self.parts.len() != parts_before;
        match self.parts.last_mut() {
            // Nothing was inserted: rejoin the surrounding text.
            Some(PartSlot::Text(text)) if !inserted && before_len > 0 => {
                text.push_str(&after);
                self.scan_from = before_len;
            }
            _ => {
                self.parts.push(PartSlot::Text(after));
                self.scan_from = 0;
            }
        }
    }
}
