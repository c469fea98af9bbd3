//! Driving one agent turn from request to settled message.
//!
//! [`SessionController::start`] spawns a task that owns the turn's parser,
//! registry and reducer. Callers get a [`TurnHandle`] for cancellation and a
//! `watch` channel of message snapshots; nothing else is shared.

pub mod workspace;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{AppConfig, FeaturesConfig};
use crate::error::ChatError;
use crate::observability::log_turn_complete;
use crate::store::{HttpThreadStore, ThreadListCache, ThreadStore};
use crate::stream::{agent_event_stream, AgentEvent};
use crate::transcript::{Applied, ChatMessage, ExtractionMode, TranscriptReducer};
use crate::transport::{HttpTransport, TurnRequest, TurnTransport};
use crate::util::next_message_id;

pub use workspace::ChatWorkspace;

// ---------------------------------------------------------------------------
// Turn input and outcome
// ---------------------------------------------------------------------------

/// What the user submitted, plus where to route it.
#[derive(Debug, Clone)]
pub struct TurnInput {
    /// Empty when the runtime should choose the thread; sent as `null`.
    pub thread_id: String,
    pub resource_id: String,
    pub agent_type: String,
    pub message: String,
    pub routing_params: serde_json::Map<String, serde_json::Value>,
    pub credentials: BTreeMap<String, String>,
}

impl TurnInput {
    #[must_use]
    pub fn new(
        thread_id: impl Into<String>,
        resource_id: impl Into<String>,
        agent_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: thread_id.into(),
            resource_id: resource_id.into(),
            agent_type: agent_type.into(),
            message: message.into(),
            routing_params: serde_json::Map::new(),
            credentials: BTreeMap::new(),
        }
    }

    /// Input for `agent_type` carrying that agent's routing params and the
    /// configured credentials.
    #[must_use]
    pub fn from_config(
        config: &AppConfig,
        thread_id: impl Into<String>,
        agent_type: &str,
        message: impl Into<String>,
    ) -> Self {
        let mut input = Self::new(
            thread_id,
            config.store.resource_id.clone(),
            agent_type,
            message,
        );
        if let Some(agent) = config.agent(agent_type) {
            input.routing_params = agent.routing_params.clone();
        }
        input.credentials = config.credentials.clone();
        input
    }

    #[must_use]
    pub fn with_routing_params(mut self, params: serde_json::Map<String, serde_json::Value>) -> Self {
        self.routing_params = params;
        self
    }

    #[must_use]
    pub fn with_credential(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.credentials.insert(key.into(), value.into());
        self
    }

    fn to_request(&self) -> TurnRequest {
        TurnRequest {
            message: self.message.clone(),
            thread_id: Some(self.thread_id.clone()).filter(|id| !id.is_empty()),
            resource_id: self.resource_id.clone(),
            agent_type: self.agent_type.clone(),
            routing_params: self.routing_params.clone(),
            credentials: self.credentials.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnStatus {
    Finished,
    /// Stopped by the user; partial content is kept.
    Cancelled,
    /// The message now reads `Error: <reason>`.
    Failed(String),
}

#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub message: ChatMessage,
    pub status: TurnStatus,
}

/// Receives every snapshot of a turn from inside the turn task.
pub trait TurnObserver: Send + Sync {
    fn on_snapshot(&self, message: &ChatMessage);

    /// Called once with the final message, before the thread list refresh.
    fn on_settled(&self, _outcome: &TurnOutcome) {}
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable cancel switch for one turn.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }
}

#[derive(Debug)]
pub struct TurnHandle {
    message_id: String,
    thread_id: String,
    cancel: CancelHandle,
    snapshots: watch::Receiver<ChatMessage>,
    task: JoinHandle<TurnOutcome>,
}

impl TurnHandle {
    #[must_use]
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    #[must_use]
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Stop the turn. Events already applied stay in the message.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    #[must_use]
    pub fn canceller(&self) -> CancelHandle {
        self.cancel.clone()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ChatMessage> {
        self.snapshots.clone()
    }

    /// Latest published state of the assistant message.
    #[must_use]
    pub fn snapshot(&self) -> ChatMessage {
        self.snapshots.borrow().clone()
    }

    /// Wait for the turn to settle.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Internal`] if the turn task panicked or was aborted.
    pub async fn wait(self) -> Result<TurnOutcome, ChatError> {
        self.task
            .await
            .map_err(|err| ChatError::Internal(format!("turn task failed: {err}")))
    }
}

// ---------------------------------------------------------------------------
// Controller
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SessionController {
    transport: Arc<dyn TurnTransport>,
    store: Arc<dyn ThreadStore>,
    cache: Arc<ThreadListCache>,
    mode: ExtractionMode,
}

impl std::fmt::Debug for SessionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionController")
            .field("mode", &self.mode)
            .finish_non_exhaustive()
    }
}

impl SessionController {
    #[must_use]
    pub fn new(
        transport: Arc<dyn TurnTransport>,
        store: Arc<dyn ThreadStore>,
        cache: Arc<ThreadListCache>,
        features: &FeaturesConfig,
    ) -> Self {
        Self {
            transport,
            store,
            cache,
            mode: ExtractionMode::from_flag(features.enable_embedded_extraction),
        }
    }

    /// Controller backed by the HTTP runtime and store named in `config`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Config`] or [`ChatError::Transport`] when either
    /// client cannot be built.
    pub fn from_config(config: &AppConfig) -> Result<Self, ChatError> {
        Ok(Self::new(
            Arc::new(HttpTransport::new(&config.runtime)?),
            Arc::new(HttpThreadStore::new(config)?),
            Arc::new(ThreadListCache::new()),
            &config.features,
        ))
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ThreadStore> {
        &self.store
    }

    #[must_use]
    pub fn cache(&self) -> &Arc<ThreadListCache> {
        &self.cache
    }

    #[must_use]
    pub fn mode(&self) -> ExtractionMode {
        self.mode
    }

    /// Start a turn on the current tokio runtime.
    #[must_use]
    pub fn start(&self, input: TurnInput) -> TurnHandle {
        self.start_observed(input, None)
    }

    #[must_use]
    pub fn start_observed(
        &self,
        input: TurnInput,
        observer: Option<Arc<dyn TurnObserver>>,
    ) -> TurnHandle {
        let message_id = next_message_id();
        let reducer = TranscriptReducer::new(message_id.clone(), self.mode);
        let (snapshot_tx, snapshot_rx) = watch::channel(reducer.snapshot());
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let turn = Turn {
            transport: Arc::clone(&self.transport),
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            request: input.to_request(),
            reducer,
            snapshots: snapshot_tx,
            cancel: cancel_rx,
            observer,
        };
        let task = tokio::spawn(turn.run());

        TurnHandle {
            message_id,
            thread_id: input.thread_id,
            cancel: CancelHandle(Arc::new(cancel_tx)),
            snapshots: snapshot_rx,
            task,
        }
    }
}

// ---------------------------------------------------------------------------
// Turn task
// ---------------------------------------------------------------------------

struct Turn {
    transport: Arc<dyn TurnTransport>,
    store: Arc<dyn ThreadStore>,
    cache: Arc<ThreadListCache>,
    request: TurnRequest,
    reducer: TranscriptReducer,
    snapshots: watch::Sender<ChatMessage>,
    cancel: watch::Receiver<bool>,
    observer: Option<Arc<dyn TurnObserver>>,
}

enum Step<T> {
    Cancelled,
    Ready(T),
}

/// Resolves once cancel is requested; never if every sender is gone.
async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    if cancel.wait_for(|requested| *requested).await.is_err() {
        std::future::pending::<()>().await;
    }
}

impl Turn {
    async fn run(mut self) -> TurnOutcome {
        let started = Instant::now();
        let thread_id = self.request.thread_id.clone().unwrap_or_default();
        tracing::info!(
            thread_id = %thread_id,
            agent_type = %self.request.agent_type,
            message_id = %self.reducer.message_id(),
            "turn started"
        );

        let status = self.drive().await;
        let outcome = TurnOutcome {
            message: self.reducer.snapshot(),
            status,
        };
        self.snapshots.send_replace(outcome.message.clone());
        if let Some(observer) = &self.observer {
            observer.on_settled(&outcome);
        }

        if let Err(err) = self
            .cache
            .refresh(self.store.as_ref(), &self.request.resource_id)
            .await
        {
            tracing::warn!(
                resource_id = %self.request.resource_id,
                "thread list refresh failed: {err}"
            );
        }

        log_turn_complete(&thread_id, &outcome, started.elapsed());
        outcome
    }

    async fn drive(&mut self) -> TurnStatus {
        let opened = tokio::select! {
            biased;
            () = cancelled(&mut self.cancel) => Step::Cancelled,
            opened = self.transport.open(&self.request) => Step::Ready(opened),
        };
        let body = match opened {
            Step::Cancelled => return self.cancel_turn(),
            Step::Ready(Ok(body)) => body,
            Step::Ready(Err(err)) => return self.fail_turn(&err),
        };

        let mut events = Box::pin(agent_event_stream(body));
        loop {
            let next = tokio::select! {
                biased;
                () = cancelled(&mut self.cancel) => Step::Cancelled,
                next = events.next() => Step::Ready(next),
            };
            let event = match next {
                Step::Cancelled => return self.cancel_turn(),
                Step::Ready(Some(Ok(event))) => event,
                Step::Ready(Some(Err(err))) => return self.fail_turn(&err),
                Step::Ready(None) => {
                    tracing::warn!(
                        message_id = %self.reducer.message_id(),
                        "stream ended without finish"
                    );
                    self.reducer.finalize();
                    return TurnStatus::Finished;
                }
            };

            let failure = match &event {
                AgentEvent::Error { message } => Some(message.clone()),
                _ => None,
            };
            match self.reducer.apply(event) {
                Applied::Updated => self.publish(),
                Applied::Finished => {
                    return failure.map_or(TurnStatus::Finished, TurnStatus::Failed);
                }
                Applied::Ignored => {}
            }
        }
    }

    fn cancel_turn(&mut self) -> TurnStatus {
        tracing::info!(message_id = %self.reducer.message_id(), "turn cancelled");
        self.reducer.finalize();
        TurnStatus::Cancelled
    }

    fn fail_turn(&mut self, err: &ChatError) -> TurnStatus {
        tracing::warn!(message_id = %self.reducer.message_id(), "turn failed: {err}");
        let reason = err.reason();
        self.reducer.fail(&reason);
        TurnStatus::Failed(reason)
    }

    fn publish(&self) {
        let snapshot = self.reducer.snapshot();
        if let Some(observer) = &self.observer {
            observer.on_snapshot(&snapshot);
        }
        self.snapshots.send_replace(snapshot);
    }
}
