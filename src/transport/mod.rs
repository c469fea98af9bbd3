//! Opening the event stream of one agent turn.

mod http_transport;

use std::collections::BTreeMap;
use std::pin::Pin;

use bytes::Bytes;
use futures_util::Stream;
use serde::Serialize;

use crate::error::ChatError;

pub(crate) use http_transport::build_reqwest_client;
pub use http_transport::HttpTransport;

/// Raw response body of a turn, chunked as it arrives.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ChatError>> + Send>>;

/// Body posted to the agent runtime to start a turn.
#[derive(Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnRequest {
    pub message: String,
    /// Sent as `null` when the runtime should pick the thread.
    pub thread_id: Option<String>,
    pub resource_id: String,
    pub agent_type: String,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub routing_params: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub credentials: BTreeMap<String, String>,
}

impl std::fmt::Debug for TurnRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnRequest")
            .field("thread_id", &self.thread_id)
            .field("resource_id", &self.resource_id)
            .field("agent_type", &self.agent_type)
            .field("message_len", &self.message.len())
            .field("routing_params", &self.routing_params)
            .field("credentials", &self.credentials.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Something that can start a turn and hand back its response body.
#[async_trait::async_trait]
pub trait TurnTransport: Send + Sync {
    /// Start the turn. A non-success response is an error; the body stream
    /// is only returned once the runtime has accepted the request.
    async fn open(&self, request: &TurnRequest) -> Result<ByteStream, ChatError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn request_serializes_camel_case_and_skips_empty_maps() {
        let request = TurnRequest {
            message: "hi".to_string(),
            thread_id: Some("th1".to_string()),
            resource_id: "user-1".to_string(),
            agent_type: "ideation".to_string(),
            routing_params: serde_json::Map::new(),
            credentials: BTreeMap::new(),
        };
        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "message": "hi",
                "threadId": "th1",
                "resourceId": "user-1",
                "agentType": "ideation"
            })
        );
    }

    #[test]
    fn missing_thread_id_serializes_as_null() {
        let request = TurnRequest {
            message: "hi".to_string(),
            thread_id: None,
            resource_id: "user-1".to_string(),
            agent_type: "coding".to_string(),
            routing_params: serde_json::Map::new(),
            credentials: BTreeMap::new(),
        };
        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["threadId"], serde_json::Value::Null);
        assert!(value.as_object().unwrap().contains_key("threadId"));
    }

    #[test]
    fn debug_output_hides_credential_values() {
        let request = TurnRequest {
            message: "hi".to_string(),
            thread_id: Some("th1".to_string()),
            resource_id: "r".to_string(),
            agent_type: "coding".to_string(),
            routing_params: serde_json::Map::new(),
            credentials: BTreeMap::from([("github_token".to_string(), "ghp_secret".to_string())]),
        };
        let rendered = format!("{request:?}");
        assert!(rendered.contains("github_token"));
        assert!(!rendered.contains("ghp_secret"));
    }
}
