use std::time::Duration;

use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::StatusCode;

use super::{ByteStream, TurnRequest, TurnTransport};
use crate::config::RuntimeConfig;
use crate::error::ChatError;
use crate::util::join_url;

pub(crate) fn build_reqwest_client(config: &RuntimeConfig) -> Result<reqwest::Client, ChatError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(config.http_pool_max_idle_per_host)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(reqwest::redirect::Policy::none())
        .timeout(Duration::from_secs(config.timeout));

    if !config.http_use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| ChatError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// POSTs turns to the agent runtime's chat endpoint and streams the SSE body.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpTransport {
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] for an unusable endpoint URL and
    /// [`ChatError::Transport`] when the HTTP client cannot be built.
    pub fn new(config: &RuntimeConfig) -> Result<Self, ChatError> {
        Ok(Self {
            client: build_reqwest_client(config)?,
            endpoint: join_url(&config.base_url, &config.chat_path)?,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }
}

#[async_trait::async_trait]
impl TurnTransport for HttpTransport {
    async fn open(&self, request: &TurnRequest) -> Result<ByteStream, ChatError> {
        tracing::debug!(endpoint = %self.endpoint, agent_type = %request.agent_type, "opening turn stream");
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(ACCEPT, "text/event-stream")
            .header(CONTENT_TYPE, "application/json")
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            return Err(ChatError::Upstream {
                status: status.as_u16(),
                message: upstream_error_message(status, &body),
            });
        }

        Ok(Box::pin(
            response
                .bytes_stream()
                .map(|chunk| chunk.map_err(ChatError::from)),
        ))
    }
}

/// The `error` string of a JSON error body, else the status line.
fn upstream_error_message(status: StatusCode, body: &[u8]) -> String {
    let from_body = serde_json::from_slice::<serde_json::Value>(body)
        .ok()
        .and_then(|value| match value.get("error") {
            Some(serde_json::Value::String(message)) => Some(message.clone()),
            Some(serde_json::Value::Object(error)) => error
                .get("message")
                .and_then(serde_json::Value::as_str)
                .map(ToOwned::to_owned),
            _ => None,
        })
        .filter(|message| !message.trim().is_empty());
    from_body.unwrap_or_else(|| match status.canonical_reason() {
        Some(reason) => format!("{} {reason}", status.as_u16()),
        None => status.as_u16().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_prefers_json_error_field() {
        assert_eq!(
            upstream_error_message(StatusCode::BAD_REQUEST, br#"{"error":"unknown agent"}"#),
            "unknown agent"
        );
        assert_eq!(
            upstream_error_message(
                StatusCode::TOO_MANY_REQUESTS,
                br#"{"error":{"message":"slow down","type":"rate_limit"}}"#
            ),
            "slow down"
        );
    }

    #[test]
    fn error_message_falls_back_to_status_line() {
        assert_eq!(
            upstream_error_message(StatusCode::BAD_GATEWAY, b"<html>oops</html>"),
            "502 Bad Gateway"
        );
        assert_eq!(
            upstream_error_message(StatusCode::INTERNAL_SERVER_ERROR, br#"{"error":""}"#),
            "500 Internal Server Error"
        );
    }

    #[test]
    fn endpoint_joins_base_and_path() {
        let config = RuntimeConfig {
            base_url: "http://localhost:4111/".to_string(),
            ..RuntimeConfig::default()
        };
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.endpoint().as_str(), "http://localhost:4111/api/chat");
    }
}
