use parking_lot::Mutex;
use serde_json::Value;
use std::collections::HashMap;

use super::types::Checkpoint;
use crate::core::interrupt::InterruptEvent;

/// Live checkpoint of one run, shared by every scope and nested run.
///
/// Critical sections are short and never await, so a synchronous lock is used.
#[derive(Debug, Default)]
pub struct CheckpointState {
    inner: Mutex<Checkpoint>,
}

impl CheckpointState {
    pub fn new(checkpoint: Checkpoint) -> Self {
        Self {
            inner: Mutex::new(checkpoint),
        }
    }

    pub fn execute_id(&self) -> i64 {
        self.inner.lock().execute_id
    }

    pub fn snapshot(&self) -> Checkpoint {
        self.inner.lock().clone()
    }

    pub fn completed(&self, address: &str) -> Option<HashMap<String, Value>> {
        self.inner.lock().completed.get(address).cloned()
    }

    pub fn record_completed(&self, address: &str, output: HashMap<String, Value>) {
        self.inner.lock().completed.insert(address.to_string(), output);
    }

    pub fn is_skipped(&self, address: &str) -> bool {
        self.inner.lock().skipped.contains(address)
    }

    pub fn record_skipped(&self, address: &str) {
        self.inner.lock().skipped.insert(address.to_string());
    }

    /// Record an interrupt unless the same event is already pending.
    pub fn add_pending(&self, address: &str, event: InterruptEvent) -> bool {
        let mut inner = self.inner.lock();
        if inner.pending_events.values().any(|e| e.id == event.id) {
            return false;
        }
        inner.pending_events.insert(address.to_string(), event);
        true
    }

    pub fn pending(&self) -> Vec<InterruptEvent> {
        self.inner.lock().pending()
    }

    pub fn has_pending(&self) -> bool {
        !self.inner.lock().pending_events.is_empty()
    }

    /// See [`Checkpoint::accept_resume`].
    pub fn accept_resume(&self, target: &str, data: String) -> Option<InterruptEvent> {
        self.inner.lock().accept_resume(target, data)
    }

    /// Consume the resume payload staged for `address`.
    pub fn take_resume_data(&self, address: &str) -> Option<String> {
        self.inner.lock().resume_data.remove(address)
    }

    pub fn intermediate(&self, address: &str, key: &str) -> Option<Value> {
        self.inner
            .lock()
            .intermediate_results
            .get(address)
            .and_then(|m| m.get(key))
            .cloned()
    }

    pub fn set_intermediate(&self, address: &str, key: &str, value: Value) {
        self.inner
            .lock()
            .intermediate_results
            .entry(address.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    pub fn remove_intermediate(&self, address: &str, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock();
        let entry = inner.intermediate_results.get_mut(address)?;
        let removed = entry.remove(key);
        if entry.is_empty() {
            inner.intermediate_results.remove(address);
        }
        removed
    }

    pub fn clear_intermediate(&self, address: &str) {
        self.inner.lock().intermediate_results.remove(address);
    }

    /// Drop every per-node record under a scope prefix, once that scope is done for good.
    pub fn clear_scope(&self, prefix: &str) {
        let mut inner = self.inner.lock();
        inner.completed.retain(|k, _| !k.starts_with(prefix));
        inner.skipped.retain(|k| !k.starts_with(prefix));
        inner.intermediate_results.retain(|k, _| !k.starts_with(prefix));
    }
}
