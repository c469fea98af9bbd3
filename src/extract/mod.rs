//! Recovery of tool calls that a model wrote into its text output.
//!
//! Some agent runtimes only emit plain text; the calls the model wanted to
//! make arrive embedded in prose as XML-ish tags, fenced JSON, or a bare JSON
//! object. Each syntax is an [`EmbeddedMatcher`]; [`EmbeddedExtractor`] runs
//! them in a fixed priority order over the growing text of one message part.

pub mod bare_json;
pub mod fenced;
pub mod tagged;

use serde_json::{Map, Value};

use crate::util::{floor_char_boundary, normalize_call_id};

/// A call recovered from text. `id` is `None` when the text did not carry one.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedCall {
    pub id: Option<String>,
    pub name: String,
    pub input: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Extracted {
    Call(ExtractedCall),
    /// Terminal marker for a call made earlier in the turn.
    Outcome {
        id: String,
        output: Value,
        is_error: bool,
    },
}

/// A complete embedded block at byte range `start..end` of the scanned text.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub start: usize,
    pub end: usize,
    pub items: Vec<Extracted>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MatchOutcome {
    /// Nothing that could start a block at or after the scan offset.
    NoCandidate,
    /// A block opens at `start` but has not closed yet.
    Pending { start: usize },
    /// `start..end` is a closed block that is not a tool call; leave it as text.
    Opaque { start: usize, end: usize },
    Matched(Extraction),
}

impl MatchOutcome {
    fn start(&self) -> Option<usize> {
        match self {
            MatchOutcome::NoCandidate => None,
            MatchOutcome::Pending { start } | MatchOutcome::Opaque { start, .. } => Some(*start),
            MatchOutcome::Matched(extraction) => Some(extraction.start),
        }
    }
}

/// One embedded tool-call syntax.
pub trait EmbeddedMatcher: Send + Sync {
    fn name(&self) -> &'static str;

    /// Length in bytes of the longest opener, used to keep a partially
    /// streamed opener inside the next scan window.
    fn max_opener_len(&self) -> usize;

    /// Report the first candidate block starting at or after `from`.
    fn scan(&self, text: &str, from: usize) -> MatchOutcome;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Scan {
    /// No complete block; later scans may start at `resume_at`.
    Idle { resume_at: usize },
    Found(Extraction),
}

pub struct EmbeddedExtractor {
    matchers: Vec<Box<dyn EmbeddedMatcher>>,
    max_opener_len: usize,
}

impl Default for EmbeddedExtractor {
    fn default() -> Self {
        Self::with_matchers(vec![
            Box::new(tagged::TaggedMatcher),
            Box::new(fenced::FencedMatcher),
            Box::new(bare_json::BareJsonMatcher),
        ])
    }
}

impl std::fmt::Debug for EmbeddedExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.matchers.iter().map(|m| m.name()).collect();
        f.debug_struct("EmbeddedExtractor")
            .field("matchers", &names)
            .finish()
    }
}

impl EmbeddedExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Matchers earlier in `matchers` win ties on start offset.
    #[must_use]
    pub fn with_matchers(matchers: Vec<Box<dyn EmbeddedMatcher>>) -> Self {
        let max_opener_len = matchers
            .iter()
            .map(|m| m.max_opener_len())
            .max()
            .unwrap_or(1);
        Self {
            matchers,
            max_opener_len,
        }
    }

    /// Find the first complete block in `text[from..]`.
    ///
    /// With `at_end` set the text will not grow any more. An unclosed
    /// opener is then plain prose and scanning resumes just past it, so a
    /// stray `<invoke` or inline fence cannot hide a later call.
    #[must_use]
    pub fn scan(&self, text: &str, from: usize, at_end: bool) -> Scan {
        let mut cursor = from.min(text.len());
        loop {
            let mut best: Option<(usize, MatchOutcome)> = None;
            for matcher in &self.matchers {
                let outcome = matcher.scan(text, cursor);
                let Some(start) = outcome.start() else {
                    continue;
                };
                if best.as_ref().is_none_or(|(best_start, _)| start < *best_start) {
                    best = Some((start, outcome));
                }
            }

            match best {
                None => {
                    if at_end {
                        return Scan::Idle {
                            resume_at: text.len(),
                        };
                    }
                    let window = text.len().saturating_sub(self.max_opener_len - 1);
                    let resume_at = cursor.max(floor_char_boundary(text, window));
                    return Scan::Idle { resume_at };
                }
                Some((_, MatchOutcome::Matched(extraction))) => {
                    return Scan::Found(extraction);
                }
                Some((_, MatchOutcome::Opaque { end, .. })) => {
                    cursor = end.max(cursor + 1).min(text.len());
                }
                Some((start, _)) if at_end => {
                    cursor = text[start..]
                        .chars()
                        .next()
                        .map_or(text.len(), |c| start + c.len_utf8());
                }
                Some((start, _)) => {
                    return Scan::Idle { resume_at: start };
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Shared JSON call shape
// ---------------------------------------------------------------------------

const ARGUMENT_KEYS: [&str; 4] = ["arguments", "args", "parameters", "input"];

/// Interpret a JSON object as a tool call.
///
/// Accepts `{name|toolName, arguments|args|parameters|input, id?}` and the
/// `{id?, function: {name, arguments}}` envelope. String arguments must
/// decode to an object.
pub(crate) fn call_from_json(value: &Value) -> Option<ExtractedCall> {
    let object = value.as_object()?;
    let (name, arguments) = match object.get("function").and_then(Value::as_object) {
        Some(function) => (
            function.get("name")?.as_str()?,
            ARGUMENT_KEYS.iter().find_map(|key| function.get(*key))?,
        ),
        None => (
            object
                .get("name")
                .or_else(|| object.get("toolName"))?
                .as_str()?,
            ARGUMENT_KEYS.iter().find_map(|key| object.get(*key))?,
        ),
    };
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let input = match arguments {
        Value::Object(map) => map.clone(),
        Value::String(text) if text.trim().is_empty() => Map::new(),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(Value::Object(map)) => map,
            _ => return None,
        },
        Value::Null => Map::new(),
        _ => return None,
    };

    let id = object
        .get("id")
        .or_else(|| object.get("toolCallId"))
        .and_then(Value::as_str)
        .and_then(normalize_call_id);

    Some(ExtractedCall {
        id,
        name: name.to_string(),
        input,
    })
}

/// Calls from a JSON object or a non-empty array of call objects.
pub(crate) fn calls_from_json(value: &Value) -> Option<Vec<ExtractedCall>> {
    match value {
        Value::Array(items) if !items.is_empty() => items.iter().map(call_from_json).collect(),
        Value::Object(_) => call_from_json(value).map(|call| vec![call]),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn call_shapes_are_recognized() {
        let plain = call_from_json(&json!({"name": "read-file", "arguments": {"path": "a.ts"}}));
        assert_eq!(plain.unwrap().input["path"], "a.ts");

        let tool_name = call_from_json(&json!({"toolName": "git-status", "args": {}, "id": "t1"}));
        let tool_name = tool_name.unwrap();
        assert_eq!(tool_name.name, "git-status");
        assert_eq!(tool_name.id.as_deref(), Some("t1"));

        let envelope = call_from_json(&json!({
            "id": "call_1",
            "type": "function",
            "function": {"name": "create-pr", "arguments": "{\"title\":\"x\"}"}
        }));
        assert_eq!(envelope.unwrap().input["title"], "x");
    }

    #[test]
    fn non_call_objects_are_rejected() {
        assert!(call_from_json(&json!({"name": "Ada", "age": 3})).is_none());
        assert!(call_from_json(&json!({"name": "", "args": {}})).is_none());
        assert!(call_from_json(&json!({"name": "x", "arguments": "[1,2]"})).is_none());
        assert!(call_from_json(&json!({"name": "x", "arguments": 5})).is_none());
        assert!(calls_from_json(&json!([])).is_none());
        assert!(calls_from_json(&json!([{"name": "x", "args": {}}, {"other": 1}])).is_none());
    }

    #[test]
    fn earliest_candidate_wins_across_matchers() {
        let extractor = EmbeddedExtractor::new();
        let text = r#"a {"name":"first","args":{}} b <invoke name="second"></invoke>"#;
        let Scan::Found(found) = extractor.scan(text, 0, false) else {
            panic!("expected a match");
        };
        assert_eq!(found.start, 2);
        assert!(matches!(&found.items[0], Extracted::Call(call) if call.name == "first"));
    }

    #[test]
    fn opaque_spans_are_not_looked_inside() {
        let extractor = EmbeddedExtractor::new();
        let text = "```rust\nlet x = {\"name\":\"x\",\"args\":{}};\n```\n";
        assert!(matches!(extractor.scan(text, 0, false), Scan::Idle { .. }));
    }

    #[test]
    fn pending_block_holds_resume_offset() {
        let extractor = EmbeddedExtractor::new();
        let text = "intro <function_calls><invoke name=\"x\">";
        assert_eq!(
            extractor.scan(text, 0, false),
            Scan::Idle { resume_at: 6 }
        );
        assert_eq!(
            extractor.scan(text, 0, true),
            Scan::Idle {
                resume_at: text.len()
            }
        );
    }

    #[test]
    fn unclosed_opener_at_end_does_not_hide_later_call() {
        let extractor = EmbeddedExtractor::new();
        let text = r#"The <invoke tag is XML. {"name":"read-file","arguments":{"path":"a.ts"}} ok"#;
        assert_eq!(extractor.scan(text, 0, false), Scan::Idle { resume_at: 4 });
        let Scan::Found(found) = extractor.scan(text, 0, true) else {
            panic!("expected the JSON call once the text is final");
        };
        assert_eq!(found.start, text.find('{').unwrap());
        assert!(matches!(&found.items[0], Extracted::Call(call) if call.name == "read-file"));
    }

    #[test]
    fn idle_resume_keeps_partial_opener_in_window() {
        let extractor = EmbeddedExtractor::new();
        let text = "plain prose that ends with <functi";
        let Scan::Idle { resume_at } = extractor.scan(text, 0, false) else {
            panic!("expected idle");
        };
        assert!(resume_at <= text.find('<').unwrap());
    }
}
