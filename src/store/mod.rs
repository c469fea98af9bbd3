//! Persisted threads and their history, as served by the agent runtime's
//! memory store.

mod http;
mod memory;

use std::sync::Arc;

use parking_lot::RwLock;
use rustc_hash::FxHashMap;

use crate::error::ChatError;
use crate::transcript::{RawMessage, Thread};

pub use http::HttpThreadStore;
pub use memory::MemoryThreadStore;

#[async_trait::async_trait]
pub trait ThreadStore: Send + Sync {
    /// Threads owned by `resource_id`.
    async fn list_threads(&self, resource_id: &str) -> Result<Vec<Thread>, ChatError>;

    /// Stored messages of one thread, oldest first.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<RawMessage>, ChatError>;
}

/// Last known thread list per resource id.
#[derive(Debug, Default)]
pub struct ThreadListCache {
    entries: RwLock<FxHashMap<String, Arc<Vec<Thread>>>>,
}

impl ThreadListCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn get(&self, resource_id: &str) -> Option<Arc<Vec<Thread>>> {
        self.entries.read().get(resource_id).cloned()
    }

    /// Store `threads` for `resource_id`, most recently updated first.
    pub fn replace(&self, resource_id: &str, mut threads: Vec<Thread>) -> Arc<Vec<Thread>> {
        threads.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        let threads = Arc::new(threads);
        self.entries
            .write()
            .insert(resource_id.to_string(), Arc::clone(&threads));
        threads
    }

    pub fn invalidate(&self, resource_id: &str) {
        self.entries.write().remove(resource_id);
    }

    /// Fetch the list from `store` and cache it.
    ///
    /// # Errors
    ///
    /// Propagates the store error; the cached entry is left untouched.
    pub async fn refresh(
        &self,
        store: &dyn ThreadStore,
        resource_id: &str,
    ) -> Result<Arc<Vec<Thread>>, ChatError> {
        let threads = store.list_threads(resource_id).await?;
        Ok(self.replace(resource_id, threads))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn thread(id: &str, updated_minute: u32) -> Thread {
        Thread {
            id: id.to_string(),
            title: String::new(),
            resource_id: "r1".to_string(),
            created_at: Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0).unwrap(),
            updated_at: Utc.with_ymd_and_hms(2025, 3, 1, 10, updated_minute, 0).unwrap(),
        }
    }

    #[test]
    fn replace_orders_newest_first() {
        let cache = ThreadListCache::new();
        cache.replace("r1", vec![thread("old", 1), thread("new", 30), thread("mid", 10)]);
        let ids: Vec<_> = cache
            .get("r1")
            .unwrap()
            .iter()
            .map(|t| t.id.clone())
            .collect();
        assert_eq!(ids, vec!["new", "mid", "old"]);
        assert!(cache.get("r2").is_none());
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_entry() {
        let store = MemoryThreadStore::new();
        let cache = ThreadListCache::new();
        cache.replace("r1", vec![thread("kept", 1)]);
        store.set_failing(true);
        assert!(cache.refresh(&store, "r1").await.is_err());
        assert_eq!(cache.get("r1").unwrap()[0].id, "kept");

        store.set_failing(false);
        store.insert_thread(thread("fresh", 5));
        let refreshed = cache.refresh(&store, "r1").await.unwrap();
        assert_eq!(refreshed[0].id, "fresh");
    }
}
