use crate::transcript::{ChatMessage, ContentPart, ToolCallStatus};

/// Part and tool-call counts of one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TurnStats {
    pub text_parts: usize,
    pub text_bytes: usize,
    pub tool_calls: usize,
    pub calling: usize,
    pub complete: usize,
    pub errored: usize,
}

impl TurnStats {
    #[must_use]
    pub fn from_message(message: &ChatMessage) -> Self {
        let mut stats = Self::default();
        for part in &message.parts {
            match part {
                ContentPart::Text { content } => {
                    stats.text_parts += 1;
                    stats.text_bytes += content.len();
                }
                ContentPart::ToolCall { tool_call } => {
                    stats.tool_calls += 1;
                    match tool_call.status {
                        ToolCallStatus::Calling => stats.calling += 1,
                        ToolCallStatus::Complete => stats.complete += 1,
                        ToolCallStatus::Error => stats.errored += 1,
                    }
                }
            }
        }
        stats
    }
}
