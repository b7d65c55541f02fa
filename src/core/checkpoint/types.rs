use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::core::interrupt::InterruptEvent;

/// Qualified node key: scope prefixes for sub-workflows and composite items
/// followed by the node key, e.g. `sub_1/batch_1[2]/recv`.
pub type Address = String;

/// Everything needed to continue an interrupted run in another process.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Checkpoint {
    pub execute_id: i64,
    pub created_at: DateTime<Utc>,
    /// Inputs the run was started with.
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
    #[serde(default)]
    pub completed: HashMap<Address, HashMap<String, Value>>,
    #[serde(default)]
    pub skipped: BTreeSet<Address>,
    #[serde(default)]
    pub pending_events: BTreeMap<Address, InterruptEvent>,
    #[serde(default)]
    pub intermediate_results: HashMap<Address, HashMap<String, Value>>,
    /// Accepted resume payloads not yet consumed by their node.
    #[serde(default)]
    pub resume_data: HashMap<Address, String>,
}

impl Checkpoint {
    pub fn new(execute_id: i64, inputs: HashMap<String, Value>) -> Self {
        Self {
            execute_id,
            created_at: Utc::now(),
            inputs,
            ..Default::default()
        }
    }

    /// Find the pending event `target` names: its address, its node key or its event id.
    pub fn find_pending(&self, target: &str) -> Option<(&Address, &InterruptEvent)> {
        self.pending_events
            .get_key_value(target)
            .or_else(|| {
                self.pending_events
                    .iter()
                    .find(|(_, e)| e.node_key == target || e.id.to_string() == target)
            })
    }

    /// Clear the pending event `target` names and stage `data` for its node.
    ///
    /// Returns `None` when nothing is pending for `target`, which is how a
    /// second resume of the same interrupt is detected.
    pub fn accept_resume(&mut self, target: &str, data: String) -> Option<InterruptEvent> {
        let address = self.find_pending(target)?.0.clone();
        let event = self.pending_events.remove(&address)?;
        self.resume_data.insert(address, data);
        Some(event)
    }

    pub fn pending(&self) -> Vec<InterruptEvent> {
        self.pending_events.values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::interrupt::InterruptEventType;
    use crate::schema::NodeType;

    fn event(id: i64, key: &str) -> InterruptEvent {
        InterruptEvent {
            id,
            node_key: key.into(),
            node_type: NodeType::InputReceiver,
            node_title: "Input".into(),
            node_icon: None,
            interrupt_data: String::new(),
            event_type: InterruptEventType::Input,
        }
    }

    #[test]
    fn test_accept_resume_by_key_address_and_id() {
        let mut cp = Checkpoint::new(1, HashMap::new());
        cp.pending_events.insert("recv".into(), event(10, "recv"));
        cp.pending_events.insert("sub/recv2".into(), event(11, "recv2"));
        cp.pending_events.insert("batch[0]/ask".into(), event(12, "ask"));

        assert_eq!(cp.accept_resume("recv", "a".into()).map(|e| e.id), Some(10));
        assert_eq!(cp.accept_resume("recv2", "b".into()).map(|e| e.id), Some(11));
        assert_eq!(cp.accept_resume("12", "c".into()).map(|e| e.id), Some(12));
        assert!(cp.pending_events.is_empty());
        assert_eq!(cp.resume_data.get("sub/recv2").map(String::as_str), Some("b"));
        assert_eq!(cp.resume_data.get("batch[0]/ask").map(String::as_str), Some("c"));
    }

    #[test]
    fn test_second_resume_rejected() {
        let mut cp = Checkpoint::new(1, HashMap::new());
        cp.pending_events.insert("recv".into(), event(10, "recv"));
        assert!(cp.accept_resume("recv", "x".into()).is_some());
        assert!(cp.accept_resume("recv", "y".into()).is_none());
        assert_eq!(cp.resume_data.get("recv").map(String::as_str), Some("x"));
    }
}
