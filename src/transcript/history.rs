//! Replay of persisted thread history.
//!
//! The store keeps messages in whatever shape the agent runtime wrote them:
//! a plain string, an array of typed fragments, or a `{format: 2, parts}`
//! envelope. Each assistant message is turned back into [`AgentEvent`]s and
//! run through a [`TranscriptReducer`], so a reloaded thread renders exactly
//! like the live turn did.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{flatten_text, ChatMessage, ContentPart, ExtractionMode, MessageStatus, Role};
use super::reducer::TranscriptReducer;
use crate::stream::{args_object, AgentEvent};
use crate::util::next_call_id;

/// A message as returned by the thread store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    pub id: String,
    pub role: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

enum Replayed {
    Finished(ChatMessage),
    Assistant(TranscriptReducer),
}

pub fn normalize_history(raw: &[RawMessage], mode: ExtractionMode) -> Vec<ChatMessage> {
    let mut replayed: Vec<Replayed> = Vec::with_capacity(raw.len());

    for message in raw {
        let timestamp = message.created_at.unwrap_or_else(Utc::now);
        match message.role.as_str() {
            "user" => {
                let text = user_text(&message.content);
                let parts = if text.is_empty() {
                    Vec::new()
                } else {
                    vec![ContentPart::text(text.clone())]
                };
                replayed.push(Replayed::Finished(ChatMessage {
                    id: message.id.clone(),
                    role: Role::User,
                    content: text,
                    parts,
                    timestamp,
                    status: MessageStatus::Finalized,
                }));
            }
            "assistant" => {
                let mut reducer =
                    TranscriptReducer::new(message.id.clone(), mode).with_timestamp(timestamp);
                for event in content_events(&message.content) {
                    reducer.apply(event);
                }
                replayed.push(Replayed::Assistant(reducer));
            }
            "tool" => {
                for event in content_events(&message.content) {
                    apply_tool_result(&mut replayed, event);
                }
            }
            other => {
                tracing::trace!(message_id = %message.id, "skipping {other} message in history");
            }
        }
    }

    replayed
        .into_iter()
        .map(|entry| match entry {
            Replayed::Finished(message) => message,
            Replayed::Assistant(mut reducer) => {
                reducer.finalize();
                reducer.snapshot()
            }
        })
        .collect()
}

/// Route a result from a `tool` message to the latest assistant message that
/// made the call.
fn apply_tool_result(replayed: &mut [Replayed], event: AgentEvent) {
    let AgentEvent::ToolResult { tool_call_id, .. } = &event else {
        return;
    };
    let owner = replayed.iter_mut().rev().find_map(|entry| match entry {
        Replayed::Assistant(reducer) if reducer.registry().contains(tool_call_id) => Some(reducer),
        _ => None,
    });
    match owner {
        Some(reducer) => {
            reducer.apply(event);
        }
        None => tracing::debug!("history result for unknown tool call {tool_call_id} ignored"),
    }
}

fn user_text(content: &Value) -> String {
    let parts: Vec<ContentPart> = content_events(content)
        .into_iter()
        .filter_map(|event| match event {
            AgentEvent::Text { content } => Some(ContentPart::Text { content }),
            _ => None,
        })
        .collect();
    flatten_text(&parts)
}

/// Decode any of the stored content shapes into the event sequence that
/// would have produced it.
fn content_events(content: &Value) -> Vec<AgentEvent> {
    match content {
        Value::String(text) => vec![AgentEvent::text(text.clone())],
        Value::Array(fragments) => fragments.iter().filter_map(fragment_event).collect(),
        Value::Object(object) => match object.get("parts").and_then(Value::as_array) {
            Some(parts) => parts.iter().flat_map(part_events).collect(),
            None => object
                .get("content")
                .map(content_events)
                .unwrap_or_default(),
        },
        _ => Vec::new(),
    }
}

fn fragment_event(fragment: &Value) -> Option<AgentEvent> {
    match fragment {
        Value::String(text) => Some(AgentEvent::text(text.clone())),
        Value::Object(object) if object.get("type").and_then(Value::as_str) == Some("step-start") => {
            Some(AgentEvent::StepFinish)
        }
        _ => AgentEvent::from_frame(fragment),
    }
}

/// Events for one `format: 2` part.
fn part_events(part: &Value) -> Vec<AgentEvent> {
    let Some(kind) = part.get("type").and_then(Value::as_str) else {
        return Vec::new();
    };
    match kind {
        "text" => part
            .get("text")
            .and_then(Value::as_str)
            .map(|text| vec![AgentEvent::text(text)])
            .unwrap_or_default(),
        "step-start" => vec![AgentEvent::StepFinish],
        "tool-invocation" => part
            .get("toolInvocation")
            .map(invocation_events)
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn invocation_events(invocation: &Value) -> Vec<AgentEvent> {
    let Some(name) = invocation.get("toolName").and_then(Value::as_str) else {
        return Vec::new();
    };
    let id = invocation
        .get("toolCallId")
        .and_then(Value::as_str)
        .map_or_else(next_call_id, ToOwned::to_owned);
    let args = invocation.get("args").map(args_object).unwrap_or_default();

    let mut events = vec![AgentEvent::ToolCall {
        id: id.clone(),
        name: name.to_string(),
        args,
    }];
    if invocation.get("state").and_then(Value::as_str) == Some("result") {
        events.push(AgentEvent::ToolResult {
            tool_call_id: id,
            result: invocation.get("result").cloned().unwrap_or(Value::Null),
            is_error: invocation
                .get("isError")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        });
    }
    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::ToolCallStatus;
    use serde_json::json;

    fn raw(id: &str, role: &str, content: Value) -> RawMessage {
        RawMessage {
            id: id.to_string(),
            role: role.to_string(),
            content,
            created_at: None,
        }
    }

    fn live_parts() -> Vec<ContentPart> {
        let mut reducer = TranscriptReducer::new("a1", ExtractionMode::Enabled);
        for event in [
            AgentEvent::text("Let me check"),
            AgentEvent::ToolCall {
                id: "t1".to_string(),
                name: "read-file".to_string(),
                args: json!({"path": "a.ts"}).as_object().cloned().unwrap_or_default(),
            },
            AgentEvent::ToolResult {
                tool_call_id: "t1".to_string(),
                result: json!("contents"),
                is_error: false,
            },
            AgentEvent::text(" done"),
            AgentEvent::Finish,
        ] {
            reducer.apply(event);
        }
        reducer.snapshot().parts
    }

    #[test]
    fn fragment_array_matches_live_turn() {
        let history = normalize_history(
            &[raw(
                "a1",
                "assistant",
                json!([
                    {"type": "text", "text": "Let me check"},
                    {"type": "tool-call", "toolCallId": "t1", "toolName": "read-file", "args": {"path": "a.ts"}},
                    {"type": "tool-result", "toolCallId": "t1", "result": "contents"},
                    {"type": "text", "text": " done"}
                ]),
            )],
            ExtractionMode::Enabled,
        );
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].parts, live_parts());
        assert!(history[0].is_finalized());
    }

    #[test]
    fn format_two_parts_match_live_turn() {
        let history = normalize_history(
            &[raw(
                "a1",
                "assistant",
                json!({
                    "format": 2,
                    "parts": [
                        {"type": "step-start"},
                        {"type": "text", "text": "Let me check"},
                        {"type": "tool-invocation", "toolInvocation": {
                            "state": "result", "toolCallId": "t1", "toolName": "read-file",
                            "args": {"path": "a.ts"}, "result": "contents"
                        }},
                        {"type": "reasoning", "reasoning": "hidden"},
                        {"type": "text", "text": " done"}
                    ]
                }),
            )],
            ExtractionMode::Enabled,
        );
        assert_eq!(history[0].parts, live_parts());
    }

    #[test]
    fn tool_role_results_attach_to_calling_message() {
        let history = normalize_history(
            &[
                raw("u1", "user", json!("read a.ts")),
                raw(
                    "a1",
                    "assistant",
                    json!([
                        "Let me check",
                        {"type": "tool-call", "toolCallId": "t1", "toolName": "read-file", "args": {"path": "a.ts"}}
                    ]),
                ),
                raw(
                    "r1",
                    "tool",
                    json!([{"type": "tool-result", "toolCallId": "t1", "result": "contents"}]),
                ),
                raw("a2", "assistant", json!(" done")),
                raw("s1", "system", json!("hidden")),
            ],
            ExtractionMode::Enabled,
        );
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].content, "read a.ts");
        let call = history[1].tool_calls().next().unwrap();
        assert_eq!(call.status, ToolCallStatus::Complete);
        assert_eq!(call.output, Some(json!("contents")));
        assert_eq!(history[2].content, " done");
    }

    #[test]
    fn string_content_runs_embedded_extraction() {
        let text = r#"Sure. {"name":"git-status","arguments":{}} Done."#;
        let history = normalize_history(&[raw("a1", "assistant", json!(text))], ExtractionMode::Enabled);
        assert_eq!(history[0].tool_calls().count(), 1);
        assert_eq!(history[0].content, "Sure.  Done.");

        let plain = normalize_history(&[raw("a1", "assistant", json!(text))], ExtractionMode::Disabled);
        assert_eq!(plain[0].content, text);
    }

    #[test]
    fn user_fragments_flatten_to_text() {
        let history = normalize_history(
            &[raw(
                "u1",
                "user",
                json!([{"type": "text", "text": "hello "}, "world"]),
            )],
            ExtractionMode::Enabled,
        );
        assert_eq!(history[0].parts, vec![ContentPart::text("hello world")]);
    }

    #[test]
    fn raw_message_deserializes_store_shape() {
        let message: RawMessage = serde_json::from_value(json!({
            "id": "m1",
            "role": "assistant",
            "content": "hi",
            "createdAt": "2025-03-01T10:00:00Z",
            "threadId": "th1",
            "type": "text"
        }))
        .unwrap();
        assert!(message.created_at.is_some());
        let history = normalize_history(&[message], ExtractionMode::Enabled);
        assert_eq!(history[0].timestamp.to_rfc3339(), "2025-03-01T10:00:00+00:00");
    }
}
