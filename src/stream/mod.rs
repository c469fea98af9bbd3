pub mod frame;

pub use frame::{agent_event_stream, encode_frame, FrameParser};

use serde_json::{Map, Value};

use crate::util::{json_display_string, next_call_id};

/// One discrete event of an agent turn.
///
/// Wire frames from different runtimes name their fields differently
/// (`textDelta` vs `content`, `toolCallId` vs `id`, ...); they are all folded
/// into this union by [`AgentEvent::from_frame`] so nothing downstream sees
/// the variants.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentEvent {
    Text {
        content: String,
    },
    ToolCall {
        id: String,
        name: String,
        args: Map<String, Value>,
    },
    ToolResult {
        tool_call_id: String,
        result: Value,
        is_error: bool,
    },
    StepFinish,
    Finish,
    /// Failure reported in-band by the agent runtime.
    Error {
        message: String,
    },
}

impl AgentEvent {
    #[must_use]
    pub fn text(content: impl Into<String>) -> Self {
        AgentEvent::Text {
            content: content.into(),
        }
    }

    /// Wire `type` of the canonical frame.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            AgentEvent::Text { .. } => "text",
            AgentEvent::ToolCall { .. } => "tool-call",
            AgentEvent::ToolResult { .. } => "tool-result",
            AgentEvent::StepFinish => "step-finish",
            AgentEvent::Finish => "finish",
            AgentEvent::Error { .. } => "error",
        }
    }

    /// Normalize one decoded `data:` payload.
    ///
    /// Returns `None` for non-objects, unknown `type` values, and frames
    /// missing a required field.
    #[must_use]
    pub fn from_frame(frame: &Value) -> Option<Self> {
        let object = frame.as_object()?;
        let kind = object.get("type")?.as_str()?;
        match kind {
            "text" | "text-delta" => {
                let content = first_field(object, &["content", "textDelta", "text", "delta"])?;
                Some(AgentEvent::Text {
                    content: json_display_string(content),
                })
            }
            "tool-call" => {
                let name = first_field(object, &["toolName", "name"])?
                    .as_str()?
                    .to_string();
                let id = first_field(object, &["toolCallId", "id"])
                    .and_then(Value::as_str)
                    .filter(|id| !id.is_empty())
                    .map_or_else(next_call_id, ToOwned::to_owned);
                let args = first_field(object, &["args", "input", "arguments"])
                    .map(args_object)
                    .unwrap_or_default();
                Some(AgentEvent::ToolCall { id, name, args })
            }
            "tool-result" => {
                let tool_call_id = first_field(object, &["toolCallId", "id"])?
                    .as_str()?
                    .to_string();
                let result = first_field(object, &["result", "output"])
                    .cloned()
                    .unwrap_or(Value::Null);
                let is_error = first_field(object, &["isError", "is_error"])
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                Some(AgentEvent::ToolResult {
                    tool_call_id,
                    result,
                    is_error,
                })
            }
            "step-finish" | "finish-step" => Some(AgentEvent::StepFinish),
            "finish" => Some(AgentEvent::Finish),
            "error" => {
                let message = first_field(object, &["error", "message"])
                    .map_or_else(|| "agent runtime error".to_string(), json_display_string);
                Some(AgentEvent::Error { message })
            }
            _ => None,
        }
    }

    /// Encode in the canonical wire shape accepted by [`Self::from_frame`].
    #[must_use]
    pub fn to_frame(&self) -> Value {
        match self {
            AgentEvent::Text { content } => {
                serde_json::json!({ "type": "text", "content": content })
            }
            AgentEvent::ToolCall { id, name, args } => serde_json::json!({
                "type": "tool-call",
                "toolCallId": id,
                "toolName": name,
                "args": args,
            }),
            AgentEvent::ToolResult {
                tool_call_id,
                result,
                is_error,
            } => serde_json::json!({
                "type": "tool-result",
                "toolCallId": tool_call_id,
                "result": result,
                "isError": is_error,
            }),
            AgentEvent::StepFinish => serde_json::json!({ "type": "step-finish" }),
            AgentEvent::Finish => serde_json::json!({ "type": "finish" }),
            AgentEvent::Error { message } => {
                serde_json::json!({ "type": "error", "error": message })
            }
        }
    }
}

#[inline]
fn first_field<'a>(object: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|key| object.get(*key).filter(|value| !value.is_null()))
}

/// Tool arguments as an object; JSON-encoded strings are decoded.
pub(crate) fn args_object(value: &Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map.clone(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}
