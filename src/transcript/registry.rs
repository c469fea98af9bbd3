use rustc_hash::FxHashMap;

use super::{ToolCallState, ToolCallStatus};

/// Ordered map from tool-call id to its state, scoped to one turn.
///
/// Entries are addressed by a stable slot index so message parts can refer
/// to a call without copying it; a status change is visible to every
/// snapshot taken afterwards.
#[derive(Debug, Default)]
pub struct ToolCallRegistry {
    entries: Vec<ToolCallState>,
    index: FxHashMap<String, usize>,
}

impl ToolCallRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the entry for `id` in `calling` state, or return the existing one.
    pub fn begin(
        &mut self,
        id: &str,
        name: &str,
        input: serde_json::Map<String, serde_json::Value>,
    ) -> &ToolCallState {
        let slot = self.begin_slot(id, name, input).0;
        &self.entries[slot]
    }

    /// Like [`Self::begin`] but returns `(slot, created)`.
    pub(crate) fn begin_slot(
        &mut self,
        id: &str,
        name: &str,
        input: serde_json::Map<String, serde_json::Value>,
    ) -> (usize, bool) {
        if let Some(&slot) = self.index.get(id) {
            return (slot, false);
        }
        let slot = self.entries.len();
        self.entries.push(ToolCallState::calling(id, name, input));
        self.index.insert(id.to_string(), slot);
        (slot, true)
    }

    /// Transition `id` to `complete`. Returns whether a transition happened.
    pub fn complete(&mut self, id: &str, output: serde_json::Value) -> bool {
        let Some(entry) = self.open_entry_mut(id) else {
            return false;
        };
        entry.status = ToolCallStatus::Complete;
        entry.output = Some(output);
        true
    }

    /// Transition `id` to `error`. Returns whether a transition happened.
    pub fn fail(&mut self, id: &str, error: impl Into<String>) -> bool {
        let Some(entry) = self.open_entry_mut(id) else {
            return false;
        };
        entry.status = ToolCallStatus::Error;
        entry.error = Some(error.into());
        true
    }

    fn open_entry_mut(&mut self, id: &str) -> Option<&mut ToolCallState> {
        let slot = *self.index.get(id)?;
        let entry = &mut self.entries[slot];
        if entry.status.is_terminal() {
            return None;
        }
        Some(entry)
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ToolCallState> {
        self.index.get(id).map(|&slot| &self.entries[slot])
    }

    #[must_use]
    pub fn slot_of(&self, id: &str) -> Option<usize> {
        self.index.get(id).copied()
    }

    #[must_use]
    pub(crate) fn by_slot(&self, slot: usize) -> Option<&ToolCallState> {
        self.entries.get(slot)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.index.contains_key(id)
    }

    /// All calls in first-seen order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ToolCallState> {
        self.entries.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn reset(&mut self) {
        self.entries.clear();
        self.index.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn begin_is_idempotent() {
        let mut registry = ToolCallRegistry::new();
        registry.begin("t1", "read-file", args(json!({"path": "a.ts"})));
        let again = registry.begin("t1", "other", args(json!({})));
        assert_eq!(again.name, "read-file");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn complete_then_fail_keeps_first_terminal_state() {
        let mut registry = ToolCallRegistry::new();
        registry.begin("t1", "read-file", args(json!({})));
        assert!(registry.complete("t1", json!("contents")));
        assert!(!registry.fail("t1", "boom"));
        assert!(!registry.complete("t1", json!("other")));

        let entry = registry.get("t1").unwrap();
        assert_eq!(entry.status, ToolCallStatus::Complete);
        assert_eq!(entry.output, Some(json!("contents")));
        assert!(entry.error.is_none());
    }

    #[test]
    fn fail_sets_error_text() {
        let mut registry = ToolCallRegistry::new();
        registry.begin("t1", "git-push", args(json!({})));
        assert!(registry.fail("t1", "rejected"));
        let entry = registry.get("t1").unwrap();
        assert_eq!(entry.status, ToolCallStatus::Error);
        assert_eq!(entry.error.as_deref(), Some("rejected"));
        assert!(entry.output.is_none());
    }

    #[test]
    fn unknown_ids_are_noops() {
        let mut registry = ToolCallRegistry::new();
        assert!(!registry.complete("missing", json!(1)));
        assert!(!registry.fail("missing", "x"));
        assert!(registry.is_empty());
    }

    #[test]
    fn snapshot_is_first_seen_order() {
        let mut registry = ToolCallRegistry::new();
        registry.begin("b", "two", args(json!({})));
        registry.begin("a", "one", args(json!({})));
        registry.complete("a", json!(null));
        let ids: Vec<_> = registry.snapshot().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(registry.slot_of("a"), Some(1));
    }

    #[test]
    fn reset_clears_entries() {
        let mut registry = ToolCallRegistry::new();
        registry.begin("t1", "x", args(json!({})));
        registry.reset();
        assert!(registry.is_empty());
        assert!(!registry.contains("t1"));
    }
}
