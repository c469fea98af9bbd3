use std::borrow::Cow;

use memchr::{memchr, memmem};
use serde_json::{Map, Value};

use super::{EmbeddedMatcher, Extracted, ExtractedCall, Extraction, MatchOutcome};
use crate::error::ChatError;
use crate::util::normalize_call_id;

/// Block-level tags that open an embedded call or outcome, in match order.
const BLOCK_TAGS: [&[u8]; 4] = [b"function_calls", b"function_call", b"invoke", b"tool_result"];
const LONGEST_OPENER: usize = b"<function_calls>".len();

/// XML-ish tool-call blocks:
///
/// ```xml
/// <function_calls>
///   <invoke name="read-file" id="t1">
///     <parameter name="path">src/a.ts</parameter>
///   </invoke>
///   <function_call>
///     <tool>git-status</tool>
///     <args_json><![CDATA[{}]]></args_json>
///   </function_call>
/// </function_calls>
/// <tool_result id="t1">contents</tool_result>
/// ```
///
/// `<invoke>` and `<function_call>` may also appear without the wrapper.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaggedMatcher;

impl EmbeddedMatcher for TaggedMatcher {
    fn name(&self) -> &'static str {
        "tagged"
    }

    fn max_opener_len(&self) -> usize {
        LONGEST_OPENER
    }

    fn scan(&self, text: &str, from: usize) -> MatchOutcome {
        let bytes = text.as_bytes();
        let mut cursor = from;
        while let Some(rel_lt) = memchr(b'<', &bytes[cursor..]) {
            let start = cursor + rel_lt;
            cursor = start + 1;
            let Some(tag) = block_tag_at(bytes, start) else {
                continue;
            };
            if let Some(block) = self_closing_block(text, tag, start) {
                let end = block.next_cursor;
                return match parse_self_closing(tag, block) {
                    Some(item) => MatchOutcome::Matched(Extraction {
                        start,
                        end,
                        items: vec![item],
                    }),
                    None => MatchOutcome::Opaque { start, end },
                };
            }
            let Some(block) = next_tag_block(text, tag, start).filter(|b| b.start == start) else {
                return MatchOutcome::Pending { start };
            };
            let end = block.next_cursor;
            return match parse_block(tag, &text[start..end], block) {
                Some(items) => MatchOutcome::Matched(Extraction { start, end, items }),
                None => MatchOutcome::Opaque { start, end },
            };
        }
        MatchOutcome::NoCandidate
    }
}

fn block_tag_at(bytes: &[u8], start: usize) -> Option<&'static [u8]> {
    BLOCK_TAGS.into_iter().find(|tag| {
        let name_start = start + 1;
        let name_end = name_start + tag.len();
        bytes
            .get(name_start..name_end)
            .is_some_and(|name| name.eq_ignore_ascii_case(tag))
            && bytes.get(name_end).is_some_and(|&b| is_tag_name_boundary(b))
    })
}

fn parse_block(tag: &[u8], block_text: &str, block: TagBlock<'_>) -> Option<Vec<Extracted>> {
    if tag == b"tool_result" {
        return parse_tool_result(block).map(|outcome| vec![outcome]);
    }
    let calls = match parse_calls_strict(block_text) {
        Ok(calls) => calls,
        Err(err) => {
            tracing::trace!("strict tagged parse failed, using permissive parse: {err}");
            parse_calls_permissive(block_text)
        }
    };
    if calls.is_empty() {
        return None;
    }
    Some(calls.into_iter().map(Extracted::Call).collect())
}

/// `<invoke name="git-status"/>` is a whole call with no arguments.
fn parse_self_closing(tag: &[u8], block: TagBlock<'_>) -> Option<Extracted> {
    match tag {
        b"invoke" | b"function_call" => {
            let name = extract_attr(block.attrs, b"name").filter(|name| !name.trim().is_empty())?;
            Some(Extracted::Call(ExtractedCall {
                id: extract_attr(block.attrs, b"id").and_then(|id| normalize_call_id(&id)),
                name: name.trim().to_string(),
                input: Map::new(),
            }))
        }
        b"tool_result" => parse_tool_result(block),
        _ => None,
    }
}

fn parse_tool_result(block: TagBlock<'_>) -> Option<Extracted> {
    let id = extract_attr(block.attrs, b"id").and_then(|id| normalize_call_id(&id))?;
    let is_error = extract_attr(block.attrs, b"is_error")
        .is_some_and(|flag| flag.eq_ignore_ascii_case("true"));
    let raw = unwrap_cdata(block.body);
    let output = coerce_json_value(&decode_xml_entities(raw.trim()));
    Some(Extracted::Outcome {
        id,
        output,
        is_error,
    })
}

// ---------------------------------------------------------------------------
// Tier 1: strict XML
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct CallBuilder {
    name: String,
    id: Option<String>,
    input: Map<String, Value>,
}

#[derive(Debug)]
enum Field {
    Parameter(String),
    ToolName,
    Arguments,
    CallId,
}

#[inline]
fn is_args_tag(tag: &[u8]) -> bool {
    matches!(tag, b"args_json" | b"arguments" | b"parameters")
}

/// Parse calls with quick-xml. Any well-formedness problem is an error so the
/// caller can fall back to the permissive scanner.
fn parse_calls_strict(xml_text: &str) -> Result<Vec<ExtractedCall>, ChatError> {
    use quick_xml::events::Event;
    use quick_xml::Reader;

    let mut reader = Reader::from_str(xml_text);
    let mut calls = Vec::with_capacity(2);
    let mut current: Option<CallBuilder> = None;
    let mut field: Option<Field> = None;
    let mut text = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let qname = e.name();
                let tag = qname.as_ref();
                match (tag, current.is_some()) {
                    (b"invoke", false) => {
                        let name = attr_value(e, b"name").ok_or_else(|| {
                            ChatError::Protocol("missing 'name' attribute on <invoke>".into())
                        })?;
                        current = Some(CallBuilder {
                            name,
                            id: attr_value(e, b"id").and_then(|id| normalize_call_id(&id)),
                            input: Map::new(),
                        });
                    }
                    (b"function_call", false) => {
                        current = Some(CallBuilder {
                            name: attr_value(e, b"name").unwrap_or_default(),
                            id: attr_value(e, b"id").and_then(|id| normalize_call_id(&id)),
                            input: Map::new(),
                        });
                    }
                    (b"parameter", true) => {
                        let name = attr_value(e, b"name").ok_or_else(|| {
                            ChatError::Protocol("missing 'name' attribute on <parameter>".into())
                        })?;
                        field = Some(Field::Parameter(name));
                        text.clear();
                    }
                    (b"tool" | b"name", true) => {
                        field = Some(Field::ToolName);
                        text.clear();
                    }
                    (b"id" | b"tool_call_id", true) => {
                        field = Some(Field::CallId);
                        text.clear();
                    }
                    (tag, true) if is_args_tag(tag) => {
                        field = Some(Field::Arguments);
                        text.clear();
                    }
                    _ => {}
                }
            }
            Ok(Event::Empty(ref e)) => {
                if e.name().as_ref() == b"invoke" && current.is_none() {
                    if let Some(name) = attr_value(e, b"name") {
                        calls.push(ExtractedCall {
                            id: attr_value(e, b"id").and_then(|id| normalize_call_id(&id)),
                            name,
                            input: Map::new(),
                        });
                    }
                }
            }
            Ok(Event::Text(ref e)) => {
                if field.is_some() {
                    match e.unescape() {
                        Ok(cow) => text.push_str(&cow),
                        Err(_) => text.push_str(&String::from_utf8_lossy(e.as_ref())),
                    }
                }
            }
            Ok(Event::CData(ref e)) => {
                if field.is_some() {
                    text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::End(ref e)) => {
                let qname = e.name();
                let tag = qname.as_ref();
                let closes_field = match field.as_ref() {
                    Some(Field::Parameter(_)) => tag == b"parameter",
                    Some(Field::ToolName) => matches!(tag, b"tool" | b"name"),
                    Some(Field::CallId) => matches!(tag, b"id" | b"tool_call_id"),
                    Some(Field::Arguments) => is_args_tag(tag),
                    None => false,
                };
                if closes_field {
                    if let (Some(open), Some(builder)) = (field.take(), current.as_mut()) {
                        let value = text.trim();
                        match open {
                            Field::Parameter(name) => {
                                builder.input.insert(name, coerce_json_value(value));
                            }
                            Field::ToolName => builder.name = value.to_string(),
                            Field::CallId => builder.id = normalize_call_id(value),
                            Field::Arguments => builder.input = parse_args_object(value)?,
                        }
                    }
                    text.clear();
                    continue;
                }
                if matches!(tag, b"invoke" | b"function_call") {
                    if let Some(builder) = current.take() {
                        let name = builder.name.trim();
                        if name.is_empty() {
                            return Err(ChatError::Protocol("tool call without a name".into()));
                        }
                        calls.push(ExtractedCall {
                            id: builder.id,
                            name: name.to_string(),
                            input: builder.input,
                        });
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(ChatError::Protocol(format!("XML parse error: {e}"))),
            _ => {}
        }
    }

    if calls.is_empty() {
        return Err(ChatError::Protocol(
            "strict XML parse found no tool call elements".into(),
        ));
    }
    Ok(calls)
}

fn attr_value(e: &quick_xml::events::BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|attr| attr.key.as_ref() == key)
        .map(|attr| decode_xml_entities(&String::from_utf8_lossy(&attr.value)).into_owned())
}

fn parse_args_object(text: &str) -> Result<Map<String, Value>, ChatError> {
    if text.is_empty() {
        return Ok(Map::new());
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ChatError::Protocol(format!(
            "tool arguments must be a JSON object, got {}",
            kind_label(&other)
        ))),
        Err(e) => Err(ChatError::Protocol(format!("invalid tool arguments: {e}"))),
    }
}

fn kind_label(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ---------------------------------------------------------------------------
// Tier 2: permissive byte scan
// ---------------------------------------------------------------------------

/// Tolerates stray `<`, `&` and mismatched nesting. Calls come back in
/// document order.
fn parse_calls_permissive(text: &str) -> Vec<ExtractedCall> {
    let mut found: Vec<(usize, ExtractedCall)> = Vec::with_capacity(2);

    let mut cursor = 0usize;
    while let Some(block) = next_tag_block(text, b"function_call", cursor) {
        cursor = block.next_cursor;
        let name = first_tag_body(block.body, &[b"tool", b"name"])
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(ToOwned::to_owned)
            .or_else(|| extract_attr(block.attrs, b"name"));
        let Some(name) = name else {
            continue;
        };
        let id = first_tag_body(block.body, &[b"id", b"tool_call_id"])
            .and_then(normalize_call_id)
            .or_else(|| extract_attr(block.attrs, b"id").and_then(|id| normalize_call_id(&id)));
        let input = first_tag_body(block.body, &[b"args_json", b"arguments", b"parameters"])
            .map(|args| {
                let raw = unwrap_cdata(args);
                parse_args_object(decode_xml_entities(raw.trim()).trim()).unwrap_or_default()
            })
            .unwrap_or_default();
        found.push((block.start, ExtractedCall { id, name, input }));
    }

    let mut cursor = 0usize;
    while let Some(block) = next_tag_block(text, b"invoke", cursor) {
        cursor = block.next_cursor;
        let Some(name) = extract_attr(block.attrs, b"name") else {
            continue;
        };
        let mut input = Map::with_capacity(2);
        let mut param_cursor = 0usize;
        while let Some(param) = next_tag_block(block.body, b"parameter", param_cursor) {
            param_cursor = param.next_cursor;
            if let Some(param_name) = extract_attr(param.attrs, b"name") {
                let raw = unwrap_cdata(param.body);
                let value = decode_xml_entities(raw.trim());
                input.insert(param_name, coerce_json_value(&value));
            }
        }
        let id = extract_attr(block.attrs, b"id").and_then(|id| normalize_call_id(&id));
        found.push((block.start, ExtractedCall { id, name, input }));
    }

    found.sort_by_key(|(start, _)| *start);
    found.into_iter().map(|(_, call)| call).collect()
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct TagBlock<'a> {
    start: usize,
    attrs: &'a str,
    body: &'a str,
    next_cursor: usize,
}

#[inline]
const fn is_tag_name_boundary(byte: u8) -> bool {
    !(byte.is_ascii_alphanumeric() || byte == b'_')
}

fn find_tag_start(bytes: &[u8], tag_name: &[u8], from: usize, closing: bool) -> Option<usize> {
    let prefix_len = if closing { 2 } else { 1 };
    let mut cursor = from;
    while let Some(rel_lt) = memchr(b'<', bytes.get(cursor..)?) {
        let start = cursor + rel_lt;
        cursor = start + 1;
        if closing && bytes.get(start + 1) != Some(&b'/') {
            continue;
        }
        let name_start = start + prefix_len;
        let name_end = name_start + tag_name.len();
        let Some(name) = bytes.get(name_start..name_end) else {
            return None;
        };
        if name.eq_ignore_ascii_case(tag_name)
            && bytes.get(name_end).is_some_and(|&b| is_tag_name_boundary(b))
        {
            return Some(start);
        }
    }
    None
}

/// The opener at `start` when it closes itself with `/>`.
fn self_closing_block<'a>(text: &'a str, tag_name: &[u8], start: usize) -> Option<TagBlock<'a>> {
    let bytes = text.as_bytes();
    let name_end = start + 1 + tag_name.len();
    let open_gt = memchr(b'>', bytes.get(name_end..)?).map(|rel| name_end + rel)?;
    if open_gt == name_end || bytes[open_gt - 1] != b'/' {
        return None;
    }
    Some(TagBlock {
        start,
        attrs: text.get(name_end..open_gt - 1)?,
        body: "",
        next_cursor: open_gt + 1,
    })
}

/// Next complete `<tag ...>body</tag>` block at or after `from`, matched
/// case-insensitively. Nested tags of the same name are not balanced.
fn next_tag_block<'a>(text: &'a str, tag_name: &[u8], from: usize) -> Option<TagBlock<'a>> {
    let bytes = text.as_bytes();
    let mut search_from = from;
    while let Some(start) = find_tag_start(bytes, tag_name, search_from, false) {
        search_from = start + 1;
        let name_end = start + 1 + tag_name.len();
        let Some(open_gt) = memchr(b'>', &bytes[name_end..]).map(|rel| name_end + rel) else {
            continue;
        };
        let body_start = open_gt + 1;
        let Some(close_start) = find_tag_start(bytes, tag_name, body_start, true) else {
            continue;
        };
        let close_name_end = close_start + 2 + tag_name.len();
        let Some(close_gt) = memchr(b'>', &bytes[close_name_end..]).map(|rel| close_name_end + rel)
        else {
            continue;
        };
        let (Some(attrs), Some(body)) = (
            text.get(name_end..open_gt),
            text.get(body_start..close_start),
        ) else {
            continue;
        };
        return Some(TagBlock {
            start,
            attrs: attrs.trim_end_matches('/'),
            body,
            next_cursor: close_gt + 1,
        });
    }
    None
}

fn first_tag_body<'a>(text: &'a str, tags: &[&[u8]]) -> Option<&'a str> {
    tags.iter()
        .filter_map(|tag| next_tag_block(text, tag, 0))
        .min_by_key(|block| block.start)
        .map(|block| block.body)
}

/// Concatenated content of every `<![CDATA[...]]>` section, or `text`
/// unchanged when there is none (or one is unterminated).
fn unwrap_cdata(text: &str) -> Cow<'_, str> {
    const CDATA_OPEN: &[u8] = b"<![CDATA[";
    const CDATA_CLOSE: &[u8] = b"]]>";

    let bytes = text.as_bytes();
    let mut out: Option<String> = None;
    let mut cursor = 0usize;
    while let Some(open_rel) = memmem::find(&bytes[cursor..], CDATA_OPEN) {
        let content_start = cursor + open_rel + CDATA_OPEN.len();
        let Some(close_rel) = memmem::find(&bytes[content_start..], CDATA_CLOSE) else {
            return Cow::Borrowed(text);
        };
        let content_end = content_start + close_rel;
        if let Some(part) = text.get(content_start..content_end) {
            out.get_or_insert_with(|| String::with_capacity(text.len()))
                .push_str(part);
        }
        cursor = content_end + CDATA_CLOSE.len();
    }
    out.map_or(Cow::Borrowed(text), Cow::Owned)
}

fn decode_xml_entities(text: &str) -> Cow<'_, str> {
    const ENTITIES: [(&str, char); 5] = [
        ("&amp;", '&'),
        ("&lt;", '<'),
        ("&gt;", '>'),
        ("&quot;", '"'),
        ("&apos;", '\''),
    ];

    let Some(first_amp) = memchr(b'&', text.as_bytes()) else {
        return Cow::Borrowed(text);
    };
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..first_amp]);
    let mut rest = &text[first_amp..];
    while !rest.is_empty() {
        let entity = ENTITIES
            .iter()
            .find(|(entity, _)| rest.starts_with(entity));
        let consumed = match entity {
            Some((entity, ch)) => {
                out.push(*ch);
                entity.len()
            }
            None => {
                out.push('&');
                1
            }
        };
        rest = &rest[consumed..];
        let next = memchr(b'&', rest.as_bytes()).unwrap_or(rest.len());
        out.push_str(&rest[..next]);
        rest = &rest[next..];
    }
    Cow::Owned(out)
}

/// Quoted attribute value (single or double quotes), matched
/// case-insensitively on a word boundary.
fn extract_attr(attrs: &str, attr: &[u8]) -> Option<String> {
    let bytes = attrs.as_bytes();
    let mut search_from = 0usize;
    while search_from + attr.len() <= bytes.len() {
        let Some(rel) = bytes[search_from..]
            .windows(attr.len())
            .position(|window| window.eq_ignore_ascii_case(attr))
        else {
            return None;
        };
        let name_start = search_from + rel;
        let name_end = name_start + attr.len();
        search_from = name_start + 1;

        let left_ok = name_start == 0 || is_tag_name_boundary(bytes[name_start - 1]);
        let right_ok = bytes.get(name_end).is_none_or(|&b| is_tag_name_boundary(b));
        if !left_ok || !right_ok {
            continue;
        }

        let mut idx = name_end;
        while bytes.get(idx).is_some_and(u8::is_ascii_whitespace) {
            idx += 1;
        }
        if bytes.get(idx) != Some(&b'=') {
            continue;
        }
        idx += 1;
        while bytes.get(idx).is_some_and(u8::is_ascii_whitespace) {
            idx += 1;
        }
        let quote = *bytes.get(idx)?;
        if quote != b'"' && quote != b'\'' {
            continue;
        }
        let value_start = idx + 1;
        let value_end = value_start + memchr(quote, &bytes[value_start..])?;
        return attrs
            .get(value_start..value_end)
            .map(|value| decode_xml_entities(value.trim()).into_owned());
    }
    None
}

/// Parse `text` as JSON when it looks like a JSON value; otherwise keep it
/// as a string.
fn coerce_json_value(text: &str) -> Value {
    let trimmed = text.trim();
    let looks_like_json = trimmed
        .as_bytes()
        .first()
        .is_some_and(|b| matches!(b, b'{' | b'[' | b'"' | b'-' | b'0'..=b'9' | b't' | b'f' | b'n'));
    if looks_like_json {
        if let Ok(value) = serde_json::from_str(trimmed) {
            return value;
        }
    }
    Value::String(text.to_string())
}

#[cfg(test)]
#[path = "tagged_tests.rs"]
mod tests;
