//! Handle to a running workflow.

use futures::Stream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::core::event_bus::WorkflowEvent;
use crate::core::status::ExecutionStatus;

/// Events and status of one run attempt.
///
/// Events are delivered over a bounded channel. A run blocks on a full channel
/// while the handle still listens, so callers either drain events
/// ([`next_event`](Self::next_event), [`into_event_stream`](Self::into_event_stream),
/// [`collect`](Self::collect)) or stop listening with [`wait`](Self::wait).
pub struct WorkflowHandle {
    execute_id: i64,
    events: mpsc::Receiver<WorkflowEvent>,
    listening: Arc<AtomicBool>,
    status_rx: watch::Receiver<ExecutionStatus>,
    cancel: CancellationToken,
    cancellable: bool,
}

impl WorkflowHandle {
    pub(crate) fn new(
        execute_id: i64,
        events: mpsc::Receiver<WorkflowEvent>,
        listening: Arc<AtomicBool>,
        status_rx: watch::Receiver<ExecutionStatus>,
        cancel: CancellationToken,
        cancellable: bool,
    ) -> Self {
        Self {
            execute_id,
            events,
            listening,
            status_rx,
            cancel,
            cancellable,
        }
    }

    pub fn execute_id(&self) -> i64 {
        self.execute_id
    }

    /// Next event, or `None` once the run has finished and every event was read.
    pub async fn next_event(&mut self) -> Option<WorkflowEvent> {
        self.events.recv().await
    }

    pub fn into_event_stream(self) -> impl Stream<Item = WorkflowEvent> + Send {
        futures::stream::unfold(self.events, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
    }

    /// Current status, without waiting.
    pub fn status(&self) -> ExecutionStatus {
        self.status_rx.borrow().clone()
    }

    /// Ask the run to stop. Returns `false` when the run was started as not cancellable.
    pub fn cancel(&self) -> bool {
        if !self.cancellable {
            return false;
        }
        tracing::info!(execute_id = self.execute_id, "cancel requested");
        self.cancel.cancel();
        true
    }

    /// Stop listening for events and wait for the terminal status.
    pub async fn wait(self) -> ExecutionStatus {
        self.listening.store(false, Ordering::Relaxed);
        drop(self.events);
        wait_terminal(self.status_rx).await
    }

    /// Read every event of the run, then return them with the terminal status.
    pub async fn collect(mut self) -> (Vec<WorkflowEvent>, ExecutionStatus) {
        let mut events = Vec::new();
        while let Some(event) = self.events.recv().await {
            events.push(event);
        }
        (events, wait_terminal(self.status_rx).await)
    }
}

async fn wait_terminal(mut rx: watch::Receiver<ExecutionStatus>) -> ExecutionStatus {
    loop {
        let status = rx.borrow_and_update().clone();
        if status.is_terminal() {
            return status;
        }
        if rx.changed().await.is_err() {
            return rx.borrow().clone();
        }
    }
}
