//! Per-run state threaded through every node invocation.

use parking_lot::RwLock;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::checkpoint::{Address, CheckpointState};
use super::collaborators::Collaborators;
use super::config::EngineConfig;
use super::event_bus::{EventEmitter, WorkflowEvent};
use super::execute_config::{ChatMessage, ChatRole, ExecuteConfig, WorkflowMode};
use super::interrupt::{InterruptEvent, InterruptEventType};
use crate::error::{NodeError, NodeResult};
use crate::schema::{NodeKey, NodeSchema, NodeType, WorkflowSchema};

/// Intermediate-results key marking a node that already raised an interrupt.
const INTERRUPT_MARKER: &str = "&interrupted";

/// Outputs of nodes visible to a scope, keyed by node key.
pub type VisibleOutputs = HashMap<NodeKey, HashMap<String, Value>>;

/// Values computed once per run and shared by every node.
#[derive(Default)]
pub struct RequestCache {
    entries: RwLock<HashMap<String, Arc<dyn Any + Send + Sync>>>,
}

impl RequestCache {
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        self.entries
            .read()
            .get(key)
            .and_then(|v| v.downcast_ref::<T>())
            .cloned()
    }

    /// Return the cached value, computing it under the write lock on first use.
    pub fn get_or_init<T, F>(&self, key: &str, init: F) -> T
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> T,
    {
        if let Some(hit) = self.get::<T>(key) {
            return hit;
        }
        let mut entries = self.entries.write();
        if let Some(hit) = entries.get(key).and_then(|v| v.downcast_ref::<T>()) {
            return hit.clone();
        }
        let value = init();
        entries.insert(key.to_string(), Arc::new(value.clone()));
        value
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeInfo {
    pub key: NodeKey,
    pub node_type: NodeType,
    pub name: String,
    pub icon: Option<String>,
}

impl From<&NodeSchema> for NodeInfo {
    fn from(node: &NodeSchema) -> Self {
        Self {
            key: node.key.clone(),
            node_type: node.node_type,
            name: node.name.clone(),
            icon: node.icon.clone(),
        }
    }
}

/// Position of the active invocation inside a batch or loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchInfo {
    pub composite_key: NodeKey,
    pub index: usize,
}

struct RunShared {
    root_execute_id: i64,
    exe_cfg: Arc<ExecuteConfig>,
    checkpoint: Arc<CheckpointState>,
    collaborators: Arc<Collaborators>,
    emitter: EventEmitter,
    engine_config: Arc<EngineConfig>,
    cache: RequestCache,
}

/// Cheap to clone; nested scopes derive their own view with [`for_node`](Self::for_node),
/// [`composite_item`](Self::composite_item) and [`sub_workflow`](Self::sub_workflow).
#[derive(Clone)]
pub struct ExecutionContext {
    run: Arc<RunShared>,
    execute_id: i64,
    schema: Arc<WorkflowSchema>,
    prefix: String,
    streaming: bool,
    cancel: CancellationToken,
    node: Option<NodeInfo>,
    batch: Option<BatchInfo>,
    visible: Arc<VisibleOutputs>,
}

impl ExecutionContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        execute_id: i64,
        exe_cfg: Arc<ExecuteConfig>,
        schema: Arc<WorkflowSchema>,
        checkpoint: Arc<CheckpointState>,
        collaborators: Arc<Collaborators>,
        emitter: EventEmitter,
        engine_config: Arc<EngineConfig>,
        cancel: CancellationToken,
    ) -> Self {
        let streaming = schema.require_streaming() || exe_cfg.is_streaming();
        Self {
            run: Arc::new(RunShared {
                root_execute_id: execute_id,
                exe_cfg,
                checkpoint,
                collaborators,
                emitter,
                engine_config,
                cache: RequestCache::default(),
            }),
            execute_id,
            schema,
            prefix: String::new(),
            streaming,
            cancel,
            node: None,
            batch: None,
            visible: Arc::new(VisibleOutputs::new()),
        }
    }

    /// View for invoking `node` in the current scope.
    pub fn for_node(&self, node: &NodeSchema) -> Self {
        Self {
            node: Some(NodeInfo::from(node)),
            ..self.clone()
        }
    }

    pub fn with_visible(mut self, visible: Arc<VisibleOutputs>) -> Self {
        self.visible = visible;
        self
    }

    /// Scope for item `index` of the active composite node.
    pub fn composite_item(&self, index: usize, visible: Arc<VisibleOutputs>) -> Self {
        let composite_key = self.node_key().to_string();
        Self {
            prefix: format!("{}[{}]/", self.address(), index),
            node: None,
            batch: Some(BatchInfo {
                composite_key,
                index,
            }),
            visible,
            cancel: self.cancel.child_token(),
            ..self.clone()
        }
    }

    /// Scope for the embedded workflow of the active sub-workflow node.
    pub fn sub_workflow(&self, execute_id: i64, schema: Arc<WorkflowSchema>) -> Self {
        let streaming = schema.require_streaming() || self.run.exe_cfg.is_streaming();
        Self {
            prefix: format!("{}/", self.address()),
            execute_id,
            schema,
            streaming,
            node: None,
            batch: None,
            visible: Arc::new(VisibleOutputs::new()),
            cancel: self.cancel.child_token(),
            run: self.run.clone(),
        }
    }

    pub fn root_execute_id(&self) -> i64 {
        self.run.root_execute_id
    }

    /// Execute id of the innermost workflow, which differs from the root inside sub-workflows.
    pub fn execute_id(&self) -> i64 {
        self.execute_id
    }

    pub fn node(&self) -> Option<&NodeInfo> {
        self.node.as_ref()
    }

    pub fn node_key(&self) -> &str {
        self.node.as_ref().map(|n| n.key.as_str()).unwrap_or("")
    }

    pub fn batch(&self) -> Option<&BatchInfo> {
        self.batch.as_ref()
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Checkpoint address of the active node, or of the scope itself outside a node.
    pub fn address(&self) -> Address {
        format!("{}{}", self.prefix, self.node_key())
    }

    pub fn address_of(&self, node_key: &str) -> Address {
        format!("{}{}", self.prefix, node_key)
    }

    pub fn exe_cfg(&self) -> &ExecuteConfig {
        &self.run.exe_cfg
    }

    pub fn schema(&self) -> &Arc<WorkflowSchema> {
        &self.schema
    }

    pub fn checkpoint(&self) -> &Arc<CheckpointState> {
        &self.run.checkpoint
    }

    pub fn collaborators(&self) -> &Collaborators {
        &self.run.collaborators
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.run.engine_config
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn visible(&self) -> &Arc<VisibleOutputs> {
        &self.visible
    }

    pub fn cache(&self) -> &RequestCache {
        &self.run.cache
    }

    pub async fn emit(&self, event: WorkflowEvent) {
        self.run.emitter.emit(event).await;
    }

    pub async fn gen_id(&self) -> NodeResult<i64> {
        Ok(self.run.collaborators.id_generator.gen_id().await?)
    }

    pub fn intermediate(&self, key: &str) -> Option<Value> {
        self.run.checkpoint.intermediate(&self.address(), key)
    }

    pub fn set_intermediate(&self, key: &str, value: Value) {
        self.run
            .checkpoint
            .set_intermediate(&self.address(), key, value);
    }

    pub fn remove_intermediate(&self, key: &str) -> Option<Value> {
        self.run.checkpoint.remove_intermediate(&self.address(), key)
    }

    /// Resume payload accepted for the active node. Consuming it also clears
    /// the interrupt marker, so a later interrupt mints a fresh event.
    pub fn take_resume_data(&self) -> Option<String> {
        let data = self.run.checkpoint.take_resume_data(&self.address())?;
        self.remove_intermediate(INTERRUPT_MARKER);
        Some(data)
    }

    /// The event this node raised earlier in the run, if it is being re-entered
    /// without resume data.
    pub fn replay_interrupt(&self) -> Option<InterruptEvent> {
        let raw = self.intermediate(INTERRUPT_MARKER)?;
        serde_json::from_value(raw).ok()
    }

    /// Mint an interrupt event for the active node and remember it.
    ///
    /// Failing to mint an id is fatal for the invocation.
    pub async fn raise_interrupt(
        &self,
        event_type: InterruptEventType,
        interrupt_data: String,
    ) -> NodeResult<InterruptEvent> {
        let node = self
            .node
            .as_ref()
            .ok_or_else(|| NodeError::ExecutionError("interrupt outside a node".into()))?;
        let id = self.gen_id().await?;
        let event = InterruptEvent {
            id,
            node_key: node.key.clone(),
            node_type: node.node_type,
            node_title: node.name.clone(),
            node_icon: node.icon.clone(),
            interrupt_data,
            event_type,
        };
        self.set_intermediate(INTERRUPT_MARKER, serde_json::to_value(&event)?);
        tracing::info!(
            execute_id = self.execute_id,
            node_key = %node.key,
            event_id = id,
            "node raised interrupt"
        );
        Ok(event)
    }

    /// The last `rounds` rounds of conversation, oldest first.
    ///
    /// Only chat-flow runs carry history; the run-wide cap applies.
    pub fn chat_history(&self, rounds: u32) -> Vec<ChatMessage> {
        let cfg = self.exe_cfg();
        if cfg.workflow_mode != WorkflowMode::ChatFlow {
            return Vec::new();
        }
        let rounds = match cfg.max_history_rounds {
            Some(cap) => rounds.min(cap),
            None => rounds,
        };
        if rounds == 0 {
            return Vec::new();
        }
        self.cache()
            .get_or_init(&format!("chat_history:{}", rounds), || {
                last_rounds(&cfg.conversation_history, rounds as usize)
            })
    }
}

/// A round starts at a user message; everything from the `rounds`-th last one is kept.
fn last_rounds(history: &[ChatMessage], rounds: usize) -> Vec<ChatMessage> {
    let mut seen = 0;
    let mut start = history.len();
    for (i, message) in history.iter().enumerate().rev() {
        if message.role == ChatRole::User {
            seen += 1;
            start = i;
            if seen == rounds {
                break;
            }
        }
    }
    history[start..].to_vec()
}


#[cfg(test)]
mod tests {
    use super::test_support::context;
    use super::*;
    use crate::schema::config::{NodeConfig, ReceiverConfig};
    use serde_json::json;

    fn receiver() -> NodeSchema {
        NodeSchema::new("recv", "Ask", NodeConfig::InputReceiver(ReceiverConfig::default()))
    }

    #[test]
    fn test_request_cache_computes_once() {
        let cache = RequestCache::default();
        let mut calls = 0;
        let a: u32 = cache.get_or_init("k", || {
            calls += 1;
            7
        });
        let b: u32 = cache.get_or_init("k", || 99);
        assert_eq!((a, b, calls), (7, 7, 1));
        assert_eq!(cache.get::<String>("k"), None);
    }

    #[test]
    fn test_addresses_nest() {
        let (ctx, _rx) = context(ExecuteConfig::default());
        let batch = ctx.for_node(&NodeSchema::new(
            "batch",
            "Batch",
            NodeConfig::Batch(Default::default()),
        ));
        let item = batch.composite_item(2, Arc::new(VisibleOutputs::new()));
        let leaf = item.for_node(&receiver());
        assert_eq!(leaf.address(), "batch[2]/recv");
        assert_eq!(leaf.batch().map(|b| b.index), Some(2));

        let sub = leaf.sub_workflow(55, Arc::new(WorkflowSchema::default()));
        assert_eq!(sub.address_of("x"), "batch[2]/recv/x");
        assert_eq!(sub.execute_id(), 55);
        assert_eq!(sub.root_execute_id(), 1);
    }

    #[tokio::test]
    async fn test_interrupt_replay_keeps_id() {
        let (ctx, _rx) = context(ExecuteConfig::default());
        let ctx = ctx.for_node(&receiver());
        assert!(ctx.replay_interrupt().is_none());

        let event = ctx
            .raise_interrupt(InterruptEventType::Input, "{}".into())
            .await
            .unwrap();
        assert_eq!(event.id, 1000);
        assert_eq!(ctx.replay_interrupt(), Some(event.clone()));

        ctx.checkpoint().add_pending(&ctx.address(), event);
        assert!(ctx.take_resume_data().is_none());
        assert!(ctx.checkpoint().accept_resume("recv", "{\"a\":1}".into()).is_some());
        assert_eq!(ctx.take_resume_data().as_deref(), Some("{\"a\":1}"));
        assert!(ctx.replay_interrupt().is_none());
        assert!(ctx.take_resume_data().is_none());
    }

    #[test]
    fn test_chat_history_only_in_chat_flow() {
        let history = vec![
            ChatMessage::user("q1"),
            ChatMessage::assistant("a1"),
            ChatMessage::user("q2"),
            ChatMessage::assistant("a2"),
            ChatMessage::user("q3"),
            ChatMessage::assistant("a3"),
        ];
        let (plain, _rx) = context(ExecuteConfig {
            conversation_history: history.clone(),
            ..Default::default()
        });
        assert!(plain.chat_history(5).is_empty());

        let (chat, _rx) = context(ExecuteConfig {
            workflow_mode: WorkflowMode::ChatFlow,
            conversation_history: history,
            max_history_rounds: Some(2),
            ..Default::default()
        });
        let window = chat.chat_history(5);
        assert_eq!(window.len(), 4);
        assert_eq!(window[0].content, "q2");
        assert_eq!(chat.chat_history(1), vec![ChatMessage::user("q3"), ChatMessage::assistant("a3")]);
        assert!(chat.chat_history(0).is_empty());
    }

    #[test]
    fn test_intermediate_scoped_to_node() {
        let (ctx, _rx) = context(ExecuteConfig::default());
        let a = ctx.for_node(&receiver());
        a.set_intermediate("k", json!(1));
        assert_eq!(a.intermediate("k"), Some(json!(1)));
        assert_eq!(ctx.intermediate("k"), None);
    }
}
