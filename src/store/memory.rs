use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use super::ThreadStore;
use crate::error::ChatError;
use crate::transcript::{RawMessage, Thread};

/// In-process store for tests and offline use.
#[derive(Debug, Default)]
pub struct MemoryThreadStore {
    threads: RwLock<Vec<Thread>>,
    messages: RwLock<FxHashMap<String, Vec<RawMessage>>>,
    failing: AtomicBool,
}

impl MemoryThreadStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a thread by id.
    pub fn insert_thread(&self, thread: Thread) {
        let mut threads = self.threads.write();
        match threads.iter_mut().find(|existing| existing.id == thread.id) {
            Some(existing) => *existing = thread,
            None => threads.push(thread),
        }
    }

    pub fn push_message(&self, thread_id: &str, message: RawMessage) {
        self.messages
            .write()
            .entry(thread_id.to_string())
            .or_default()
            .push(message);
    }

    /// Make every call fail with [`ChatError::Store`] until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    fn check_available(&self) -> Result<(), ChatError> {
        if self.failing.load(Ordering::Relaxed) {
            return Err(ChatError::Store("memory store unavailable".to_string()));
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ThreadStore for MemoryThreadStore {
    async fn list_threads(&self, resource_id: &str) -> Result<Vec<Thread>, ChatError> {
        self.check_available()?;
        Ok(self
            .threads
            .read()
            .iter()
            .filter(|thread| thread.resource_id == resource_id)
            .cloned()
            .collect())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<RawMessage>, ChatError> {
        self.check_available()?;
        Ok(self
            .messages
            .read()
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }
}
