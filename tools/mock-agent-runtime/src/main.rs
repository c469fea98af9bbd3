use std::convert::Infallible;
use std::env;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use http::{header, HeaderValue, Method, Request, Response, StatusCode};
use http_body_util::BodyExt;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use tokio::net::TcpListener;

const DEFAULT_RUNTIME_PORT: u16 = 4111;
const CHAT_PATH: &str = "/api/chat";
const THREADS_PATH: &str = "/api/memory/threads";

#[derive(Copy, Clone)]
enum MockScenario {
    Text,
    Tools,
    Embedded,
    Error,
}

impl MockScenario {
    fn name(self) -> &'static str {
        match self {
            MockScenario::Text => "text",
            MockScenario::Tools => "tools",
            MockScenario::Embedded => "embedded",
            MockScenario::Error => "error",
        }
    }
}

struct RequestStats {
    turns: AtomicU64,
    listings: AtomicU64,
}

struct MockState {
    scenario: MockScenario,
    stats: RequestStats,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let port = env_u16("RUNTIME_PORT", DEFAULT_RUNTIME_PORT);
    let state = Arc::new(MockState {
        scenario: parse_scenario(),
        stats: RequestStats {
            turns: AtomicU64::new(0),
            listings: AtomicU64::new(0),
        },
    });

    let listener = TcpListener::bind(("127.0.0.1", port))
        .await
        .unwrap_or_else(|err| panic!("failed to bind mock runtime on 127.0.0.1:{port}: {err}"));
    eprintln!(
        "mock agent runtime on 127.0.0.1:{port}, scenario {}",
        state.scenario.name()
    );

    let conn_builder = AutoBuilder::new(TokioExecutor::new());
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                eprintln!("accept error: {err}");
                continue;
            }
        };
        let io = TokioIo::new(stream);
        let conn_builder = conn_builder.clone();
        let service_state = Arc::clone(&state);
        let service = service_fn(move |request: Request<Incoming>| {
            let state_ref = Arc::clone(&service_state);
            async move { Ok::<_, Infallible>(handle_request(request, &state_ref).await) }
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder.serve_connection(io, service).await {
                eprintln!("mock runtime connection error from {remote_addr}: {err}");
            }
        });
    }
}

fn env_u16(name: &str, default: u16) -> u16 {
    env::var(name)
        .ok()
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(default)
}

fn parse_scenario() -> MockScenario {
    match env::var("MOCK_SCENARIO").as_deref() {
        Ok("tools") => MockScenario::Tools,
        Ok("embedded") => MockScenario::Embedded,
        Ok("error") => MockScenario::Error,
        Ok("text") | Err(_) => MockScenario::Text,
        Ok(other) => {
            eprintln!("unknown MOCK_SCENARIO '{other}', fallback to text");
            MockScenario::Text
        }
    }
}

async fn handle_request(request: Request<Incoming>, state: &Arc<MockState>) -> Response<Full<Bytes>> {
    let (parts, body) = request.into_parts();
    drain_request_body(body).await;

    let method = parts.method;
    let path = parts.uri.path();

    if method == Method::GET && path == "/_mock/stats" {
        let body = format!(
            "{{\"scenario\":\"{}\",\"turns\":{},\"listings\":{}}}",
            state.scenario.name(),
            state.stats.turns.load(Ordering::Relaxed),
            state.stats.listings.load(Ordering::Relaxed),
        );
        return simple_response(StatusCode::OK, "application/json", Bytes::from(body));
    }

    if method == Method::GET && path == THREADS_PATH {
        state.stats.listings.fetch_add(1, Ordering::Relaxed);
        return simple_response_static(StatusCode::OK, "application/json", THREAD_LISTING);
    }
    if method == Method::GET && path.starts_with(THREADS_PATH) && path.ends_with("/messages") {
        state.stats.listings.fetch_add(1, Ordering::Relaxed);
        return simple_response_static(StatusCode::OK, "application/json", MESSAGE_LISTING);
    }

    if method == Method::POST && path == CHAT_PATH {
        state.stats.turns.fetch_add(1, Ordering::Relaxed);
        return turn_response(state.scenario);
    }

    if method != Method::POST && method != Method::GET {
        return simple_response_static(
            StatusCode::METHOD_NOT_ALLOWED,
            "application/json",
            br#"{"error":"method not allowed"}"#,
        );
    }
    simple_response_static(
        StatusCode::NOT_FOUND,
        "application/json",
        br#"{"error":"not found"}"#,
    )
}

async fn drain_request_body(mut body: Incoming) {
    while let Some(frame_result) = body.frame().await {
        if frame_result.is_err() {
            break;
        }
    }
}

fn turn_response(scenario: MockScenario) -> Response<Full<Bytes>> {
    let body = match scenario {
        MockScenario::Text => STREAM_TEXT,
        MockScenario::Tools => STREAM_TOOLS,
        MockScenario::Embedded => STREAM_EMBEDDED,
        MockScenario::Error => {
            return simple_response_static(
                StatusCode::SERVICE_UNAVAILABLE,
                "application/json",
                br#"{"error":"mock agent unavailable"}"#,
            );
        }
    };
    let mut response = simple_response_static(StatusCode::OK, "text/event-stream", body);
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    response
}

fn simple_response(
    status: StatusCode,
    content_type: &'static str,
    body: Bytes,
) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static(content_type));
    response
}

fn simple_response_static(
    status: StatusCode,
    content_type: &'static str,
    body: &'static [u8],
) -> Response<Full<Bytes>> {
    simple_response(status, content_type, Bytes::from_static(body))
}

const STREAM_TEXT: &[u8] = b": keep-alive\n\ndata: {\"type\":\"text\",\"content\":\"Hello \"}\n\ndata: {\"type\":\"text\",\"content\":\"from the mock runtime.\"}\n\ndata: {\"type\":\"finish\"}\n\ndata: [DONE]\n\n";
const STREAM_TOOLS: &[u8] = b"data: {\"type\":\"text\",\"content\":\"Let me check\"}\n\ndata: {\"type\":\"tool-call\",\"toolCallId\":\"t1\",\"toolName\":\"read-file\",\"args\":{\"path\":\"a.ts\"}}\n\ndata: {\"type\":\"tool-result\",\"toolCallId\":\"t1\",\"result\":\"contents\",\"isError\":false}\n\ndata: {\"type\":\"step-finish\"}\n\ndata: {\"type\":\"text\",\"content\":\" done\"}\n\ndata: {\"type\":\"finish\"}\n\n";
const STREAM_EMBEDDED: &[u8] = b"data: {\"type\":\"text\",\"content\":\"Checking status. {\\\"name\\\":\\\"git-\"}\n\ndata: {\"type\":\"text\",\"content\":\"status\\\",\\\"arguments\\\":{}} Then \"}\n\ndata: {\"type\":\"text\",\"content\":\"<function_calls><invoke name=\\\"read-file\\\"><parameter name=\\\"path\\\">a.ts</parameter></invoke></function_calls> done.\"}\n\ndata: {\"type\":\"finish\"}\n\n";

const THREAD_LISTING: &[u8] = br#"[{"id":"th-mock","title":"Mock thread","resourceId":"default","createdAt":"2025-03-01T10:00:00Z","updatedAt":"2025-03-01T10:05:00Z"}]"#;
const MESSAGE_LISTING: &[u8] = br#"{"messages":[{"id":"u1","role":"user","content":"read a.ts","createdAt":"2025-03-01T10:00:00Z"},{"id":"a1","role":"assistant","content":{"format":2,"parts":[{"type":"text","text":"Let me check"},{"type":"tool-invocation","toolInvocation":{"state":"result","toolCallId":"t1","toolName":"read-file","args":{"path":"a.ts"},"result":"contents"}},{"type":"text","text":" done"}]},"createdAt":"2025-03-01T10:00:05Z"}]}"#;
