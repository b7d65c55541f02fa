use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use super::callback::{StructuredCallbackInput, StructuredCallbackOutput};
use super::interrupt::InterruptEvent;
use crate::schema::{NodeKey, NodeType};

/// Progress of a run, in the order it happens.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum WorkflowEvent {
    WorkflowStarted {
        execute_id: i64,
        resumed: bool,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        execute_id: i64,
        node_key: NodeKey,
        node_type: NodeType,
        node_name: String,
        input: Box<StructuredCallbackInput>,
        timestamp: DateTime<Utc>,
    },
    /// Incremental text from a streaming node.
    NodeStreamDelta {
        execute_id: i64,
        node_key: NodeKey,
        delta: String,
        index: usize,
    },
    NodeFinished {
        execute_id: i64,
        node_key: NodeKey,
        node_type: NodeType,
        output: Box<StructuredCallbackOutput>,
        timestamp: DateTime<Utc>,
    },
    NodeSkipped {
        execute_id: i64,
        node_key: NodeKey,
        timestamp: DateTime<Utc>,
    },
    NodeFailed {
        execute_id: i64,
        node_key: NodeKey,
        node_type: NodeType,
        error: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowInterrupted {
        execute_id: i64,
        events: Vec<InterruptEvent>,
        timestamp: DateTime<Utc>,
    },
    WorkflowSucceeded {
        execute_id: i64,
        output: HashMap<String, Value>,
        answer: Option<String>,
        timestamp: DateTime<Utc>,
    },
    WorkflowFailed {
        execute_id: i64,
        error: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowCanceled {
        execute_id: i64,
        timestamp: DateTime<Utc>,
    },
}

impl WorkflowEvent {
    pub fn execute_id(&self) -> i64 {
        match self {
            WorkflowEvent::WorkflowStarted { execute_id, .. }
            | WorkflowEvent::NodeStarted { execute_id, .. }
            | WorkflowEvent::NodeStreamDelta { execute_id, .. }
            | WorkflowEvent::NodeFinished { execute_id, .. }
            | WorkflowEvent::NodeSkipped { execute_id, .. }
            | WorkflowEvent::NodeFailed { execute_id, .. }
            | WorkflowEvent::WorkflowInterrupted { execute_id, .. }
            | WorkflowEvent::WorkflowSucceeded { execute_id, .. }
            | WorkflowEvent::WorkflowFailed { execute_id, .. }
            | WorkflowEvent::WorkflowCanceled { execute_id, .. } => *execute_id,
        }
    }

    /// Whether this is the last event of a run attempt.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowEvent::WorkflowInterrupted { .. }
                | WorkflowEvent::WorkflowSucceeded { .. }
                | WorkflowEvent::WorkflowFailed { .. }
                | WorkflowEvent::WorkflowCanceled { .. }
        )
    }
}

/// Sender side of a run's bounded event channel. Emission becomes a no-op
/// once the consumer has signalled it no longer listens.
#[derive(Clone)]
pub struct EventEmitter {
    tx: mpsc::Sender<WorkflowEvent>,
    active: Arc<AtomicBool>,
}

impl EventEmitter {
    pub fn new(tx: mpsc::Sender<WorkflowEvent>, active: Arc<AtomicBool>) -> Self {
        Self { tx, active }
    }

    /// A connected emitter with its receiver.
    pub fn channel(buffer: usize) -> (Self, mpsc::Receiver<WorkflowEvent>, Arc<AtomicBool>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        let active = Arc::new(AtomicBool::new(true));
        (Self::new(tx, active.clone()), rx, active)
    }

    #[inline(always)]
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub async fn emit(&self, event: WorkflowEvent) {
        if self.is_active() && self.tx.send(event).await.is_err() {
            self.active.store(false, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn started() -> WorkflowEvent {
        WorkflowEvent::WorkflowStarted {
            execute_id: 1,
            resumed: false,
            timestamp: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_event_emitter_active() {
        let (emitter, mut rx, _) = EventEmitter::channel(4);
        assert!(emitter.is_active());
        emitter.emit(started()).await;
        let evt = rx.recv().await.unwrap();
        assert!(matches!(evt, WorkflowEvent::WorkflowStarted { execute_id: 1, .. }));
        assert!(!evt.is_terminal());
    }

    #[tokio::test]
    async fn test_event_emitter_inactive() {
        let (emitter, mut rx, active) = EventEmitter::channel(4);
        active.store(false, Ordering::Relaxed);
        emitter.emit(started()).await;
        drop(emitter);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_send_after_rx_drop_deactivates() {
        let (emitter, rx, _) = EventEmitter::channel(4);
        drop(rx);
        emitter.emit(started()).await;
        assert!(!emitter.is_active());
    }

    #[test]
    fn test_event_serialized_with_tag() {
        let value = serde_json::to_value(WorkflowEvent::WorkflowCanceled {
            execute_id: 9,
            timestamp: Utc::now(),
        })
        .unwrap();
        assert_eq!(value["event"], "workflow_canceled");
        assert_eq!(value["execute_id"], 9);
    }
}
