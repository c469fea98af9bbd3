use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::ThreadStore;
use crate::config::AppConfig;
use crate::error::ChatError;
use crate::transcript::{RawMessage, Thread};
use crate::transport::build_reqwest_client;
use crate::util::join_url;

/// Reads threads from the runtime's memory API:
/// `GET {threads}?resourceid=..` and `GET {threads}/{id}/messages`.
#[derive(Debug, Clone)]
pub struct HttpThreadStore {
    client: reqwest::Client,
    threads_url: url::Url,
    agent_id: Option<String>,
}

/// Listing endpoints answer either with a bare array or an envelope.
#[derive(Deserialize)]
#[serde(untagged)]
enum Listing<T> {
    Bare(Vec<T>),
    Threads { threads: Vec<T> },
    Messages { messages: Vec<T> },
}

impl<T> Listing<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            Listing::Bare(items)
            | Listing::Threads { threads: items }
            | Listing::Messages { messages: items } => items,
        }
    }
}

impl HttpThreadStore {
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] for an unusable store URL and
    /// [`ChatError::Transport`] when the HTTP client cannot be built.
    pub fn new(config: &AppConfig) -> Result<Self, ChatError> {
        Ok(Self {
            client: build_reqwest_client(&config.runtime)?,
            threads_url: join_url(config.store_base_url(), &config.store.threads_path)?,
            agent_id: config.store.agent_id.clone(),
        })
    }

    fn messages_url(&self, thread_id: &str) -> Result<url::Url, ChatError> {
        let mut url = self.threads_url.clone();
        url.path_segments_mut()
            .map_err(|()| ChatError::Config("store URL cannot be a base URL".to_string()))?
            .pop_if_empty()
            .push(thread_id)
            .push("messages");
        Ok(url)
    }

    async fn get_listing<T: DeserializeOwned>(&self, mut url: url::Url) -> Result<Vec<T>, ChatError> {
        if let Some(agent_id) = &self.agent_id {
            url.query_pairs_mut().append_pair("agentId", agent_id);
        }
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|err| ChatError::Store(format!("GET {url}: {err}")))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ChatError::Store(format!("GET {url}: HTTP {}", status.as_u16())));
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| ChatError::Store(format!("GET {url}: {err}")))?;
        serde_json::from_slice::<Listing<T>>(&body)
            .map(Listing::into_vec)
            .map_err(|err| ChatError::Store(format!("GET {url}: unexpected body: {err}")))
    }
}

#[async_trait::async_trait]
impl ThreadStore for HttpThreadStore {
    async fn list_threads(&self, resource_id: &str) -> Result<Vec<Thread>, ChatError> {
        let mut url = self.threads_url.clone();
        url.query_pairs_mut().append_pair("resourceid", resource_id);
        self.get_listing(url).await
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<RawMessage>, ChatError> {
        let url = self.messages_url(thread_id)?;
        self.get_listing(url).await
    }
}
