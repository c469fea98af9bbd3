use std::sync::atomic::{AtomicU64, Ordering};

static CALL_ID_COUNTER: AtomicU64 = AtomicU64::new(1);
const HEX: &[u8; 16] = b"0123456789abcdef";

/// Generate a fresh tool-call id for calls that arrive without one.
#[inline]
pub(crate) fn next_call_id() -> String {
    let id = CALL_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut out = String::with_capacity(21);
    out.push_str("call_");
    push_u64_hex_16(&mut out, id);
    out
}

#[inline]
pub(crate) fn next_message_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[inline]
fn push_u64_hex_16(out: &mut String, mut value: u64) {
    let mut buf = [b'0'; 16];
    for slot in buf.iter_mut().rev() {
        *slot = HEX[(value & 0x0f) as usize];
        value >>= 4;
    }
    for byte in buf {
        out.push(char::from(byte));
    }
}

/// Render a JSON value as display text.
///
/// Strings are returned verbatim, `null` becomes empty, everything else is
/// serialized compactly.
pub(crate) fn json_display_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Largest char boundary of `text` that is `<= index`.
#[inline]
pub(crate) fn floor_char_boundary(text: &str, index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    let mut i = index;
    while i > 0 && !text.is_char_boundary(i) {
        i -= 1;
    }
    i
}

/// Normalize an id taken from untrusted text: trimmed, non-empty, bounded,
/// and limited to id-safe ASCII.
#[inline]
pub(crate) fn normalize_call_id(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.len() > 128 {
        return None;
    }
    if !trimmed
        .as_bytes()
        .iter()
        .copied()
        .all(|byte| byte.is_ascii_alphanumeric() || matches!(byte, b'_' | b'-' | b'.' | b':'))
    {
        return None;
    }
    Some(trimmed.to_string())
}

/// `base` joined with an absolute `path`, tolerating a trailing slash on
/// `base` and a missing leading slash on `path`.
pub(crate) fn join_url(base: &str, path: &str) -> Result<url::Url, crate::error::ChatError> {
    let base = base.trim_end_matches('/');
    let mut joined = String::with_capacity(base.len() + path.len() + 1);
    joined.push_str(base);
    if !path.starts_with('/') {
        joined.push('/');
    }
    joined.push_str(path);
    url::Url::parse(&joined)
        .map_err(|err| crate::error::ChatError::Config(format!("invalid URL '{joined}': {err}")))
}
