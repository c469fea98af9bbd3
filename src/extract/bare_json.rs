use memchr::memchr;

use super::{call_from_json, EmbeddedMatcher, Extracted, Extraction, MatchOutcome};
use crate::json_scan::{object_end, ScanError};

/// A top-level JSON object in running prose, e.g.
/// `Let me look. {"name": "read-file", "arguments": {"path": "a.ts"}} OK.`
///
/// Objects that are valid JSON but not tool-call shaped are opaque; braces
/// that cannot start JSON are ordinary text.
#[derive(Debug, Clone, Copy, Default)]
pub struct BareJsonMatcher;

impl EmbeddedMatcher for BareJsonMatcher {
    fn name(&self) -> &'static str {
        "bare_json"
    }

    fn max_opener_len(&self) -> usize {
        1
    }

    fn scan(&self, text: &str, from: usize) -> MatchOutcome {
        let bytes = text.as_bytes();
        let mut cursor = from;
        while let Some(rel) = memchr(b'{', &bytes[cursor..]) {
            let start = cursor + rel;
            cursor = start + 1;
            let end = match object_end(bytes, start) {
                Ok(end) => end,
                Err(ScanError::Incomplete) => return MatchOutcome::Pending { start },
                Err(ScanError::Invalid) => continue,
            };

            let Ok(value) = serde_json::from_str::<serde_json::Value>(&text[start..end]) else {
                continue;
            };
            return match call_from_json(&value) {
                Some(call) => MatchOutcome::Matched(Extraction {
                    start,
                    end,
                    items: vec![Extracted::Call(call)],
                }),
                None => MatchOutcome::Opaque { start, end },
            };
        }
        MatchOutcome::NoCandidate
    }
}
