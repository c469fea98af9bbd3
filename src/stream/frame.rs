/// Line-oriented SSE frame parser for agent event streams.
///
/// Every `data: <json>` line carries one complete event. Chunks may split
/// lines, JSON payloads and multi-byte UTF-8 sequences anywhere; the parser
/// buffers the unfinished tail and resumes on the next chunk.
use bytes::Bytes;
use futures_util::Stream;
use memchr::memchr_iter;
use smallvec::SmallVec;

use super::AgentEvent;
use crate::error::ChatError;

const DATA_PREFIX: &str = "data:";
const COMPACT_THRESHOLD: usize = 8 * 1024;

struct PendingEvents {
    events: SmallVec<[AgentEvent; 8]>,
    head: usize,
}

impl PendingEvents {
    #[inline]
    fn new() -> Self {
        Self {
            events: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<AgentEvent> {
        if self.head >= self.events.len() {
            return None;
        }
        let event = std::mem::replace(&mut self.events[self.head], AgentEvent::StepFinish);
        self.head += 1;
        if self.head == self.events.len() {
            self.events.clear();
            self.head = 0;
        }
        Some(event)
    }

    #[inline]
    fn extend_from_vec(&mut self, parsed: &mut Vec<AgentEvent>) {
        if parsed.is_empty() {
            return;
        }
        self.events.reserve(parsed.len());
        self.events.extend(parsed.drain(..));
    }
}

// ---------------------------------------------------------------------------
// FrameParser: incremental line parser
// ---------------------------------------------------------------------------

/// Incremental agent-event frame parser.
///
/// Malformed payloads are dropped without surfacing an error: when a frame
/// is lost the next well-formed line resumes normal operation.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: String,
    read_offset: usize,
    utf8_remainder: Vec<u8>,
}

impl FrameParser {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed decoded text and return the events it completes.
    pub fn feed(&mut self, chunk: &str) -> Vec<AgentEvent> {
        let mut out = Vec::new();
        self.feed_into(chunk, &mut out);
        out
    }

    /// Feed decoded text and append complete events into `out`.
    pub fn feed_into(&mut self, chunk: &str, out: &mut Vec<AgentEvent>) {
        self.buffer.push_str(chunk);
        let mut processed_up_to = self.read_offset;
        let scan_start = processed_up_to;
        for rel_pos in memchr_iter(b'\n', &self.buffer.as_bytes()[scan_start..]) {
            let line_end = scan_start + rel_pos;
            process_line(&self.buffer[processed_up_to..line_end], out);
            processed_up_to = line_end + 1;
        }

        self.read_offset = processed_up_to;
        if self.read_offset == self.buffer.len() {
            self.buffer.clear();
            self.read_offset = 0;
            return;
        }
        let should_compact = self.read_offset > 0
            && (self.read_offset >= self.buffer.len() / 2
                || self.read_offset >= COMPACT_THRESHOLD);
        if should_compact {
            self.buffer.drain(..self.read_offset);
            self.read_offset = 0;
        }
    }

    /// Feed raw bytes; an incomplete trailing UTF-8 sequence is held until the
    /// next call. Invalid sequences decode as U+FFFD.
    pub fn feed_bytes(&mut self, bytes: &[u8], out: &mut Vec<AgentEvent>) {
        if self.utf8_remainder.is_empty() {
            let tail = self.decode_into(bytes, out);
            self.utf8_remainder.extend_from_slice(tail);
            return;
        }

        let mut joined = std::mem::take(&mut self.utf8_remainder);
        joined.extend_from_slice(bytes);
        let tail_len = self.decode_into(&joined, out).len();
        let tail_start = joined.len() - tail_len;
        joined.drain(..tail_start);
        self.utf8_remainder = joined;
    }

    /// Decode as much of `bytes` as possible, returning the undecodable tail
    /// (an incomplete sequence at the very end).
    fn decode_into<'a>(&mut self, mut bytes: &'a [u8], out: &mut Vec<AgentEvent>) -> &'a [u8] {
        loop {
            match std::str::from_utf8(bytes) {
                Ok(text) => {
                    self.feed_into(text, out);
                    return &[];
                }
                Err(err) => {
                    let valid_up_to = err.valid_up_to();
                    if let Ok(text) = std::str::from_utf8(&bytes[..valid_up_to]) {
                        self.feed_into(text, out);
                    }
                    match err.error_len() {
                        None => return &bytes[valid_up_to..],
                        Some(invalid_len) => {
                            self.feed_into("\u{FFFD}", out);
                            bytes = &bytes[valid_up_to + invalid_len..];
                        }
                    }
                }
            }
        }
    }

    /// Flush at end of input: the retained fragment is processed as a final
    /// line even without a trailing newline.
    pub fn finish(&mut self, out: &mut Vec<AgentEvent>) {
        if !self.utf8_remainder.is_empty() {
            let remainder = std::mem::take(&mut self.utf8_remainder);
            let text = String::from_utf8_lossy(&remainder).into_owned();
            self.feed_into(&text, out);
        }
        if self.read_offset < self.buffer.len() {
            process_line(&self.buffer[self.read_offset..], out);
        }
        self.buffer.clear();
        self.read_offset = 0;
    }

    /// Bytes buffered but not yet terminated by a newline.
    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.buffer.len() - self.read_offset + self.utf8_remainder.len()
    }
}

fn process_line(line: &str, out: &mut Vec<AgentEvent>) {
    let line = line.strip_suffix('\r').unwrap_or(line);
    // Comments, `event:`/`id:` fields and keep-alives carry nothing for us.
    let Some(payload) = line.strip_prefix(DATA_PREFIX) else {
        return;
    };
    let payload = payload.strip_prefix(' ').unwrap_or(payload).trim();
    if payload.is_empty() || payload == "[DONE]" {
        return;
    }

    let frame = match serde_json::from_str::<serde_json::Value>(payload) {
        Ok(frame) => frame,
        Err(err) => {
            tracing::trace!("dropping malformed frame ({} bytes): {err}", payload.len());
            return;
        }
    };
    match AgentEvent::from_frame(&frame) {
        Some(event) => out.push(event),
        None => tracing::trace!("ignoring unrecognized frame: {payload}"),
    }
}

/// Encode one event as a `data:` frame followed by a blank line.
#[must_use]
pub fn encode_frame(event: &AgentEvent) -> String {
    let json = event.to_frame().to_string();
    let mut out = String::with_capacity(8 + json.len());
    out.push_str("data: ");
    out.push_str(&json);
    out.push_str("\n\n");
    out
}

// ---------------------------------------------------------------------------
// Stream utility
// ---------------------------------------------------------------------------

/// Turn a response byte stream into a stream of agent events.
///
/// A transport error is yielded once and ends the stream; events parsed
/// before it are delivered first. End of input flushes the parser.
pub fn agent_event_stream<S, E>(
    byte_stream: S,
) -> impl Stream<Item = Result<AgentEvent, ChatError>> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: Into<ChatError> + Send + 'static,
{
    use futures_util::StreamExt;

    struct State<S> {
        stream: std::pin::Pin<Box<S>>,
        parser: FrameParser,
        parsed: Vec<AgentEvent>,
        pending: PendingEvents,
        error: Option<ChatError>,
        done: bool,
    }

    let state = State {
        stream: Box::pin(byte_stream),
        parser: FrameParser::new(),
        parsed: Vec::with_capacity(8),
        pending: PendingEvents::new(),
        error: None,
        done: false,
    };

    futures_util::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                return Some((Ok(event), state));
            }
            if let Some(err) = state.error.take() {
                return Some((Err(err), state));
            }
            if state.done {
                return None;
            }

            match state.stream.as_mut().next().await {
                Some(Ok(bytes)) => {
                    state.parser.feed_bytes(&bytes, &mut state.parsed);
                }
                Some(Err(err)) => {
                    state.error = Some(err.into());
                    state.done = true;
                }
                None => {
                    state.parser.finish(&mut state.parsed);
                    state.done = true;
                }
            }
            state.pending.extend_from_vec(&mut state.parsed);
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use serde_json::json;

    #[test]
    fn test_parse_single_text_frame() {
        let mut parser = FrameParser::new();
        let events = parser.feed("data: {\"type\":\"text\",\"content\":\"hello\"}\n\n");
        assert_eq!(events, vec![AgentEvent::text("hello")]);
    }

    #[test]
    fn test_payload_split_across_chunks() {
        let mut parser = FrameParser::new();
        assert!(parser.feed("data: {\"typ").is_empty());
        let events = parser.feed("e\":\"text\",\"content\":\"hi\"}\n");
        assert_eq!(events, vec![AgentEvent::text("hi")]);
        assert_eq!(parser.pending_len(), 0);
    }

    #[test]
    fn test_three_chunks_match_single_chunk() {
        let line = "data: {\"type\":\"tool-call\",\"toolCallId\":\"t1\",\"toolName\":\"read-file\",\"args\":{\"path\":\"a.ts\"}}\n";
        let whole = FrameParser::new().feed(line);

        let mut parser = FrameParser::new();
        let mut split = Vec::new();
        parser.feed_into(&line[..10], &mut split);
        parser.feed_into(&line[10..40], &mut split);
        parser.feed_into(&line[40..], &mut split);

        assert_eq!(whole.len(), 1);
        assert_eq!(split, whole);
    }

    #[test]
    fn test_no_space_after_colon_and_crlf() {
        let mut parser = FrameParser::new();
        let events = parser.feed("data:{\"type\":\"finish\"}\r\n");
        assert_eq!(events, vec![AgentEvent::Finish]);
    }

    #[test]
    fn test_ignores_comments_and_other_fields() {
        let mut parser = FrameParser::new();
        let events = parser.feed(
            ": keep-alive\nevent: message\nid: 7\nretry: 100\ndata: {\"type\":\"step-finish\"}\n",
        );
        assert_eq!(events, vec![AgentEvent::StepFinish]);
    }

    #[test]
    fn test_malformed_line_is_dropped_and_stream_continues() {
        let mut parser = FrameParser::new();
        let events = parser.feed(
            "data: {\"type\":\"text\",\"content\":\ndata: [DONE]\ndata: {\"type\":\"text\",\"content\":\"ok\"}\n",
        );
        assert_eq!(events, vec![AgentEvent::text("ok")]);
    }

    #[test]
    fn test_multibyte_split_across_byte_chunks() {
        let line = "data: {\"type\":\"text\",\"content\":\"héllo → 世界\"}\n".as_bytes();
        let split_at = line
            .iter()
            .position(|&b| b == 0xC3)
            .map(|pos| pos + 1)
            .unwrap();

        let mut parser = FrameParser::new();
        let mut out = Vec::new();
        parser.feed_bytes(&line[..split_at], &mut out);
        assert!(out.is_empty());
        parser.feed_bytes(&line[split_at..], &mut out);
        assert_eq!(out, vec![AgentEvent::text("héllo → 世界")]);
    }

    #[test]
    fn test_invalid_utf8_does_not_stall() {
        let mut parser = FrameParser::new();
        let mut out = Vec::new();
        parser.feed_bytes(b"data: \xFF\n", &mut out);
        parser.feed_bytes(b"data: {\"type\":\"finish\"}\n", &mut out);
        assert_eq!(out, vec![AgentEvent::Finish]);
    }

    #[test]
    fn test_finish_flushes_unterminated_line() {
        let mut parser = FrameParser::new();
        let mut out = parser.feed("data: {\"type\":\"finish\"}");
        assert!(out.is_empty());
        parser.finish(&mut out);
        assert_eq!(out, vec![AgentEvent::Finish]);
    }

    #[test]
    fn test_compaction_keeps_partial_tail() {
        let mut parser = FrameParser::new();
        let mut input = String::new();
        for _ in 0..400 {
            input.push_str("data: {\"type\":\"text\",\"content\":\"xxxxxxxxxxxxxxxx\"}\n");
        }
        input.push_str("data: {\"type\":\"te");
        let events = parser.feed(&input);
        assert_eq!(events.len(), 400);
        let events = parser.feed("xt\",\"content\":\"tail\"}\n");
        assert_eq!(events, vec![AgentEvent::text("tail")]);
    }

    #[test]
    fn test_encode_frame_round_trips_through_parser() {
        let event = AgentEvent::ToolCall {
            id: "t1".to_string(),
            name: "git-commit".to_string(),
            args: json!({"message": "wip"}).as_object().cloned().unwrap(),
        };
        let wire = encode_frame(&event);
        assert!(wire.starts_with("data: {"));
        assert!(wire.ends_with("\n\n"));
        assert_eq!(FrameParser::new().feed(&wire), vec![event]);
    }

    #[tokio::test]
    async fn test_event_stream_over_byte_chunks() {
        let chunks = vec![
            Ok::<Bytes, ChatError>(Bytes::from_static(b"data: {\"type\":\"text\",\"con")),
            Ok(Bytes::from_static(b"tent\":\"a\"}\ndata: {\"type\":\"text\",\"content\":\"b\"}\n")),
            Ok(Bytes::from_static(b"data: {\"type\":\"finish\"}")),
        ];
        let events: Vec<_> = agent_event_stream(futures_util::stream::iter(chunks))
            .map(|item| item.unwrap())
            .collect()
            .await;
        assert_eq!(
            events,
            vec![
                AgentEvent::text("a"),
                AgentEvent::text("b"),
                AgentEvent::Finish
            ]
        );
    }

    #[tokio::test]
    async fn test_event_stream_surfaces_transport_error_after_parsed_events() {
        let chunks = vec![
            Ok::<Bytes, ChatError>(Bytes::from_static(
                b"data: {\"type\":\"text\",\"content\":\"partial\"}\n",
            )),
            Err(ChatError::Transport("connection reset".to_string())),
            Ok(Bytes::from_static(b"data: {\"type\":\"finish\"}\n")),
        ];
        let items: Vec<_> = agent_event_stream(futures_util::stream::iter(chunks))
            .collect()
            .await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), &AgentEvent::text("partial"));
        assert!(matches!(items[1], Err(ChatError::Transport(_))));
    }
}
