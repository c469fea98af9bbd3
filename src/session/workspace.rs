//! In-memory projection of the threads a user has open.
//!
//! Each thread keeps its messages and, while a turn streams into it, the id
//! of the assistant message being built. A thread with an active turn is
//! never reloaded from the store.

use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::{SessionController, TurnHandle, TurnInput, TurnObserver, TurnOutcome};
use crate::error::ChatError;
use crate::transcript::{normalize_history, ChatMessage, Thread};
use crate::util::next_message_id;

#[derive(Debug, Default)]
struct ThreadView {
    messages: Vec<ChatMessage>,
    active_turn: Option<String>,
}

impl ThreadView {
    /// Replace the message with the same id, or append it.
    fn upsert(&mut self, message: &ChatMessage) {
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => existing.clone_from(message),
            None => self.messages.push(message.clone()),
        }
    }
}

#[derive(Debug, Default)]
struct WorkspaceState {
    threads: FxHashMap<String, ThreadView>,
    visible: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ChatWorkspace {
    controller: SessionController,
    state: Arc<Mutex<WorkspaceState>>,
}

/// Mirrors a turn's snapshots into its thread.
struct Projection {
    state: Arc<Mutex<WorkspaceState>>,
    thread_id: String,
}

impl TurnObserver for Projection {
    fn on_snapshot(&self, message: &ChatMessage) {
        let mut state = self.state.lock();
        state
            .threads
            .entry(self.thread_id.clone())
            .or_default()
            .upsert(message);
    }

    fn on_settled(&self, outcome: &TurnOutcome) {
        let mut state = self.state.lock();
        let view = state.threads.entry(self.thread_id.clone()).or_default();
        view.upsert(&outcome.message);
        if view.active_turn.as_deref() == Some(outcome.message.id.as_str()) {
            view.active_turn = None;
        }
    }
}

impl ChatWorkspace {
    #[must_use]
    pub fn new(controller: SessionController) -> Self {
        Self {
            controller,
            state: Arc::new(Mutex::new(WorkspaceState::default())),
        }
    }

    #[must_use]
    pub fn controller(&self) -> &SessionController {
        &self.controller
    }

    /// Create an empty thread, make it visible, and return its id.
    pub fn new_thread(&self) -> String {
        let thread_id = next_message_id();
        let mut state = self.state.lock();
        state.threads.insert(thread_id.clone(), ThreadView::default());
        state.visible = Some(thread_id.clone());
        thread_id
    }

    /// Make `thread_id` visible and return its messages.
    ///
    /// History is loaded from the store unless a turn is streaming into the
    /// thread, in which case the in-memory messages are returned as they are.
    ///
    /// # Errors
    ///
    /// Propagates [`ChatError::Store`] from the history fetch.
    pub async fn open_thread(&self, thread_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
        {
            let mut state = self.state.lock();
            state.visible = Some(thread_id.to_string());
            if let Some(view) = state.threads.get(thread_id) {
                if view.active_turn.is_some() {
                    return Ok(view.messages.clone());
                }
            }
        }

        let raw = self.controller.store().list_messages(thread_id).await?;
        let history = normalize_history(&raw, self.controller.mode());

        let mut state = self.state.lock();
        let view = state.threads.entry(thread_id.to_string()).or_default();
        // A turn may have started while the history was in flight.
        if view.active_turn.is_some() {
            tracing::debug!(thread_id, "turn started during reload; keeping live messages");
            return Ok(view.messages.clone());
        }
        view.messages = history;
        Ok(view.messages.clone())
    }

    /// Append the user's message and start the turn that answers it.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::Protocol`] if the thread already has a turn in
    /// flight.
    pub fn submit(&self, input: TurnInput) -> Result<TurnHandle, ChatError> {
        let thread_id = input.thread_id.clone();
        let mut state = self.state.lock();
        let view = state.threads.entry(thread_id.clone()).or_default();
        if let Some(active) = &view.active_turn {
            return Err(ChatError::Protocol(format!(
                "thread {thread_id} already has turn {active} in flight"
            )));
        }
        view.messages
            .push(ChatMessage::user(next_message_id(), input.message.clone()));

        let observer = Arc::new(Projection {
            state: Arc::clone(&self.state),
            thread_id: thread_id.clone(),
        });
        // The turn task blocks on this lock before its first snapshot lands,
        // so the placeholder is always in place first.
        let handle = self.controller.start_observed(input, Some(observer));
        let view = state.threads.entry(thread_id).or_default();
        view.active_turn = Some(handle.message_id().to_string());
        view.upsert(&handle.snapshot());
        Ok(handle)
    }

    #[must_use]
    pub fn messages(&self, thread_id: &str) -> Vec<ChatMessage> {
        self.state
            .lock()
            .threads
            .get(thread_id)
            .map(|view| view.messages.clone())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn is_streaming(&self, thread_id: &str) -> bool {
        self.state
            .lock()
            .threads
            .get(thread_id)
            .is_some_and(|view| view.active_turn.is_some())
    }

    #[must_use]
    pub fn visible_thread(&self) -> Option<String> {
        self.state.lock().visible.clone()
    }

    /// Cached thread list for `resource_id`, if one was fetched.
    #[must_use]
    pub fn threads(&self, resource_id: &str) -> Option<Arc<Vec<Thread>>> {
        self.controller.cache().get(resource_id)
    }

    /// # Errors
    ///
    /// Propagates the store error; the cached list is left untouched.
    pub async fn refresh_threads(&self, resource_id: &str) -> Result<Arc<Vec<Thread>>, ChatError> {
        self.controller
            .cache()
            .refresh(self.controller.store().as_ref(), resource_id)
            .await
    }
}
