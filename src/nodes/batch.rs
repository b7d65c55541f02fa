//! Batch and loop composites: run the child scope once per item.
//!
//! Each item sees the composite's inputs with every fanned-out array replaced
//! by its element, plus `index`. Item outputs are picked by the composite's
//! output bindings and wrapped in one-element arrays. Each item yields one
//! callback record; the records merge in item order into the composite's
//! output. Finished items are remembered in the checkpoint, so a resumed run
//! only repeats the ones that were interrupted.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use super::executor::NodeExecutor;
use crate::compiler::Scope;
use crate::core::config::EngineConfig;
use crate::core::dispatcher::{ScopeDispatcher, ScopeOutcome};
use crate::core::execution_context::ExecutionContext;
use crate::core::interrupt::{InterruptEvent, NodeOutcome, NodeOutput};
use crate::core::callback::{
    concat_callback_inputs, concat_callback_outputs, StructuredCallbackInput, StructuredCallbackOutput,
};
use crate::error::{NodeError, NodeResult};
use crate::schema::config::{BatchConfig, LoopConfig, LoopMode};
use crate::schema::{FieldMapping, FieldSource, NodeKey, NodeSchema};

pub const INDEX_INPUT: &str = "index";

enum Plan {
    Batch(BatchConfig),
    Loop(LoopConfig),
}

/// One item's result: its callback record, or the interrupts it raised.
enum ItemResult {
    Done(StructuredCallbackOutput),
    Interrupted(Vec<InterruptEvent>),
}

/// Runs the child scope for one item. Cheap to clone into spawned tasks.
#[derive(Clone)]
struct ItemRunner {
    scope: Arc<Scope>,
    output_sources: Arc<Vec<FieldMapping>>,
}

impl ItemRunner {
    async fn run(&self, index: usize, item_input: HashMap<String, Value>, ctx: ExecutionContext) -> NodeResult<ItemResult> {
        let record_key = format!("item_{}", index);
        if let Some(stored) = ctx.intermediate(&record_key) {
            return Ok(ItemResult::Done(serde_json::from_value(stored)?));
        }

        let mut visible = ctx.visible().as_ref().clone();
        visible.insert(ctx.node_key().to_string(), item_input);
        let item_ctx = ctx.composite_item(index, Arc::new(visible));

        let outcome = ScopeDispatcher::new(self.scope.clone(), item_ctx.clone(), HashMap::new())
            .run()
            .await
            .map_err(NodeError::from_nested)?;

        match outcome {
            ScopeOutcome::Interrupted(events) => Ok(ItemResult::Interrupted(events)),
            ScopeOutcome::Completed { results, callbacks } => {
                let record = self.item_record(&results, &callbacks, &item_ctx);
                ctx.set_intermediate(&record_key, serde_json::to_value(&record)?);
                Ok(ItemResult::Done(record))
            }
        }
    }

    /// The item's wrapped outputs, with the text, warnings and error of the
    /// last node in the item scope that reported.
    fn item_record(
        &self,
        results: &HashMap<NodeKey, HashMap<String, Value>>,
        callbacks: &HashMap<NodeKey, StructuredCallbackOutput>,
        item_ctx: &ExecutionContext,
    ) -> StructuredCallbackOutput {
        let last = self
            .scope
            .nodes
            .iter()
            .rev()
            .find_map(|n| callbacks.get(&n.schema.key))
            .cloned()
            .unwrap_or_default();
        StructuredCallbackOutput {
            output: self.pick_outputs(results, item_ctx),
            raw_output: last.raw_output,
            answer: last.answer,
            error: last.error,
            warnings: last.warnings,
            ..Default::default()
        }
    }

    fn pick_outputs(
        &self,
        results: &HashMap<NodeKey, HashMap<String, Value>>,
        item_ctx: &ExecutionContext,
    ) -> HashMap<String, Value> {
        self.output_sources
            .iter()
            .map(|mapping| {
                let value = match &mapping.source {
                    FieldSource::Literal(v) => v.clone(),
                    FieldSource::Ref(r) => results
                        .get(&r.from_node_key)
                        .or_else(|| item_ctx.visible().get(&r.from_node_key))
                        .and_then(|output| r.lookup(output))
                        .cloned()
                        .unwrap_or(Value::Null),
                };
                (mapping.name.clone(), Value::Array(vec![value]))
            })
            .collect()
    }
}

pub struct CompositeNodeExecutor {
    plan: Plan,
    runner: ItemRunner,
    engine_config: Arc<EngineConfig>,
}

impl CompositeNodeExecutor {
    pub fn batch(node: &NodeSchema, config: BatchConfig, scope: Arc<Scope>, engine_config: &Arc<EngineConfig>) -> Self {
        Self::build(node, Plan::Batch(config), scope, engine_config)
    }

    pub fn looping(node: &NodeSchema, config: LoopConfig, scope: Arc<Scope>, engine_config: &Arc<EngineConfig>) -> Self {
        Self::build(node, Plan::Loop(config), scope, engine_config)
    }

    fn build(node: &NodeSchema, plan: Plan, scope: Arc<Scope>, engine_config: &Arc<EngineConfig>) -> Self {
        Self {
            plan,
            runner: ItemRunner {
                scope,
                output_sources: Arc::new(node.output_sources.clone()),
            },
            engine_config: engine_config.clone(),
        }
    }

    fn arrays(&self) -> &[String] {
        match &self.plan {
            Plan::Batch(c) => &c.input_arrays,
            Plan::Loop(c) => &c.input_arrays,
        }
    }

    /// Number of items to run for `input`.
    fn item_count(&self, input: &HashMap<String, Value>) -> NodeResult<usize> {
        let limits = &self.engine_config;
        match &self.plan {
            Plan::Batch(c) => {
                let len = shortest_array(input, &c.input_arrays)?;
                let cap = c
                    .batch_size
                    .unwrap_or(limits.max_batch_size)
                    .min(limits.max_batch_size);
                if len > cap {
                    tracing::warn!(len, cap, "batch input truncated");
                }
                Ok(len.min(cap))
            }
            Plan::Loop(c) => {
                let count = match c.mode {
                    LoopMode::Array => shortest_array(input, &c.input_arrays)?,
                    LoopMode::Count => {
                        let name = c.count_input.as_deref().unwrap_or_default();
                        read_count(input, name)?
                    }
                };
                if count > limits.max_loop_iterations {
                    return Err(NodeError::InputValidationError(format!(
                        "loop of {} iterations exceeds the limit of {}",
                        count, limits.max_loop_iterations
                    )));
                }
                Ok(count)
            }
        }
    }

    fn item_input(&self, input: &HashMap<String, Value>, index: usize) -> HashMap<String, Value> {
        let mut item = input.clone();
        for name in self.arrays() {
            if let Some(element) = input.get(name).and_then(|v| v.get(index)) {
                item.insert(name.clone(), element.clone());
            }
        }
        item.insert(INDEX_INPUT.to_string(), json!(index));
        item
    }

    async fn run_batch(
        &self,
        config: &BatchConfig,
        input: &HashMap<String, Value>,
        count: usize,
        ctx: &ExecutionContext,
    ) -> NodeResult<Vec<ItemResult>> {
        let concurrency = config
            .concurrency
            .unwrap_or(self.engine_config.batch_concurrency)
            .max(1);
        let semaphore = Arc::new(Semaphore::new(concurrency));
        let mut join_set = JoinSet::new();

        for index in 0..count {
            let runner = self.runner.clone();
            let item_input = self.item_input(input, index);
            let ctx = ctx.clone();
            let semaphore = semaphore.clone();
            join_set.spawn(async move {
                let result = match semaphore.acquire_owned().await {
                    Ok(_permit) => runner.run(index, item_input, ctx).await,
                    Err(_) => Err(NodeError::Canceled),
                };
                (index, result)
            });
        }

        let mut slots: Vec<Option<ItemResult>> = (0..count).map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            let (index, result) = joined.map_err(|e| {
                if e.is_panic() {
                    NodeError::Panicked(e.to_string())
                } else {
                    NodeError::Canceled
                }
            })?;
            slots[index] = Some(result?);
        }
        Ok(slots.into_iter().flatten().collect())
    }

    async fn run_loop(
        &self,
        input: &HashMap<String, Value>,
        count: usize,
        ctx: &ExecutionContext,
    ) -> NodeResult<Vec<ItemResult>> {
        let mut items = Vec::with_capacity(count);
        for index in 0..count {
            let result = self
                .runner
                .run(index, self.item_input(input, index), ctx.clone())
                .await?;
            let interrupted = matches!(result, ItemResult::Interrupted(_));
            items.push(result);
            if interrupted {
                break;
            }
        }
        Ok(items)
    }

    async fn run(&self, input: HashMap<String, Value>, ctx: &ExecutionContext) -> NodeResult<NodeOutcome> {
        let count = self.item_count(&input)?;
        tracing::debug!(node_key = ctx.node_key(), count, "composite fan-out");

        let items = match &self.plan {
            Plan::Batch(config) => self.run_batch(config, &input, count, ctx).await?,
            Plan::Loop(_) => self.run_loop(&input, count, ctx).await?,
        };

        let mut records = Vec::with_capacity(items.len());
        let mut interrupts = Vec::new();
        for item in items {
            match item {
                ItemResult::Done(record) => records.push(record),
                ItemResult::Interrupted(events) => interrupts.extend(events),
            }
        }
        if !interrupts.is_empty() {
            return Ok(NodeOutcome::Interrupted(interrupts));
        }

        let item_inputs: Vec<StructuredCallbackInput> = (0..records.len())
            .map(|index| StructuredCallbackInput {
                input: wrap_values(self.item_input(&input, index)),
                extra: HashMap::new(),
            })
            .collect();
        let batched_input = concat_callback_inputs(item_inputs)?.map(|merged| merged.input);
        let merged = concat_callback_outputs(records)?.unwrap_or_default();

        let mut output = merged.output;
        for mapping in self.runner.output_sources.iter() {
            output
                .entry(mapping.name.clone())
                .or_insert_with(|| Value::Array(Vec::new()));
        }

        let address = ctx.address();
        ctx.checkpoint().clear_scope(&format!("{}[", address));
        ctx.checkpoint().clear_intermediate(&address);

        let mut result = NodeOutput::new(output).with_warnings(merged.warnings);
        result.answer = merged.answer;
        result.raw_output = merged.raw_output;
        result.error = merged.error;
        result.input = batched_input;
        result.extra.insert("item_count".to_string(), json!(count));
        Ok(NodeOutcome::Completed(result))
    }
}

/// Wrap every value in a one-element array so item records concatenate into arrays.
fn wrap_values(map: HashMap<String, Value>) -> HashMap<String, Value> {
    map.into_iter()
        .map(|(k, v)| (k, Value::Array(vec![v])))
        .collect()
}

fn shortest_array(input: &HashMap<String, Value>, names: &[String]) -> NodeResult<usize> {
    let mut len: Option<usize> = None;
    for name in names {
        let items = match input.get(name) {
            Some(Value::Array(items)) => items,
            Some(Value::Null) | None => return Err(NodeError::MissingInput(name.clone())),
            Some(other) => {
                return Err(NodeError::InputValidationError(format!(
                    "{} must be an array, got {}",
                    name, other
                )))
            }
        };
        len = Some(len.map_or(items.len(), |l| l.min(items.len())));
    }
    Ok(len.unwrap_or(0))
}

fn read_count(input: &HashMap<String, Value>, name: &str) -> NodeResult<usize> {
    let value = input
        .get(name)
        .ok_or_else(|| NodeError::MissingInput(name.to_string()))?;
    let count = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    count
        .map(|c| c as usize)
        .ok_or_else(|| NodeError::InputValidationError(format!("{} is not a count: {}", name, value)))
}

#[async_trait]
impl NodeExecutor for CompositeNodeExecutor {
    async fn invoke(&self, input: HashMap<String, Value>, ctx: &ExecutionContext) -> NodeOutcome {
        match self.run(input, ctx).await {
            Ok(outcome) => outcome,
            Err(e) => NodeOutcome::Failed(e),
        }
    }
}
