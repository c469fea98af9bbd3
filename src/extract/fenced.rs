use std::sync::LazyLock;

use memchr::{memchr, memmem};
use regex_lite::Regex;

use super::{calls_from_json, EmbeddedMatcher, Extracted, Extraction, MatchOutcome};

/// Info strings under which a fence body is tried as a tool call.
static TOOL_INFO_STRING: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"^(?i:json|jsonc|tool|tool_call|tool_code|function_call)?$").ok()
});

const FENCE: &[u8] = b"```";

/// Markdown code fences whose body is a JSON tool call:
///
/// ````text
/// ```json
/// {"name": "read-file", "arguments": {"path": "a.ts"}}
/// ```
/// ````
///
/// Fences with any other info string are opaque so code samples are never
/// mined for calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct FencedMatcher;

impl EmbeddedMatcher for FencedMatcher {
    fn name(&self) -> &'static str {
        "fenced"
    }

    fn max_opener_len(&self) -> usize {
        FENCE.len()
    }

    fn scan(&self, text: &str, from: usize) -> MatchOutcome {
        let bytes = text.as_bytes();
        let mut search = from;
        let (start, ticks, info_start) = loop {
            let Some(start) = memmem::find(&bytes[search..], FENCE).map(|rel| search + rel) else {
                return MatchOutcome::NoCandidate;
            };
            let ticks = bytes[start..].iter().take_while(|&&b| b == b'`').count();
            let info_start = start + ticks;
            if opens_line(bytes, start) && !info_has_backtick(bytes, info_start) {
                break (start, ticks, info_start);
            }
            search = info_start;
        };
        let Some(info_end) = memchr(b'\n', &bytes[info_start..]).map(|rel| info_start + rel)
        else {
            return MatchOutcome::Pending { start };
        };
        let body_start = info_end + 1;
        let Some((body_end, end)) = find_closing_fence(bytes, body_start, ticks) else {
            return MatchOutcome::Pending { start };
        };

        let info = text[info_start..info_end].trim();
        let is_tool_fence = TOOL_INFO_STRING
            .as_ref()
            .is_some_and(|re| re.is_match(info));
        if !is_tool_fence {
            return MatchOutcome::Opaque { start, end };
        }
        let body = text[body_start..body_end].trim();
        let calls = serde_json::from_str::<serde_json::Value>(body)
            .ok()
            .and_then(|value| calls_from_json(&value));
        match calls {
            Some(calls) => MatchOutcome::Matched(Extraction {
                start,
                end,
                items: calls.into_iter().map(Extracted::Call).collect(),
            }),
            None => MatchOutcome::Opaque { start, end },
        }
    }
}

/// A fence opener sits at the start of a line behind at most three spaces.
fn opens_line(bytes: &[u8], start: usize) -> bool {
    let line_start = memchr::memrchr(b'\n', &bytes[..start]).map_or(0, |nl| nl + 1);
    let indent = &bytes[line_start..start];
    indent.len() <= 3 && indent.iter().all(|&b| b == b' ')
}

/// Inline code such as ``` ```npm test``` ``` carries a backtick in what
/// would be the info string.
fn info_has_backtick(bytes: &[u8], info_start: usize) -> bool {
    let line_end = memchr(b'\n', &bytes[info_start..]).map_or(bytes.len(), |rel| info_start + rel);
    memchr(b'`', &bytes[info_start..line_end]).is_some()
}

/// Locate a closing fence of at least `ticks` backticks on its own line.
/// Returns `(body_end, fence_end)`; `fence_end` excludes the line break.
fn find_closing_fence(bytes: &[u8], body_start: usize, ticks: usize) -> Option<(usize, usize)> {
    let mut line_start = body_start;
    while line_start <= bytes.len() {
        let line_end = memchr(b'\n', &bytes[line_start..]).map_or(bytes.len(), |rel| line_start + rel);
        let line = &bytes[line_start..line_end];
        let indent = line.iter().take_while(|&&b| b == b' ').count();
        let run = line[indent..].iter().take_while(|&&b| b == b'`').count();
        if indent <= 3
            && run >= ticks
            && line[indent + run..].iter().all(u8::is_ascii_whitespace)
        {
            let trailing = line[indent + run..]
                .iter()
                .take_while(|&&b| b != b'\r')
                .count();
            return Some((line_start, line_start + indent + run + trailing));
        }
        if line_end == bytes.len() {
            return None;
        }
        line_start = line_end + 1;
    }
    None
}
