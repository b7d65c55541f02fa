use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

use crate::compiler::compiled_workflow::CompiledWorkflow;
use crate::compiler::WorkflowCompiler;
use crate::core::config::EngineConfig;
use crate::error::WorkflowResult;
use crate::schema::WorkflowSchema;

#[derive(Debug, Clone, Hash, Eq, PartialEq)]
pub struct CacheKey {
    pub workflow_id: i64,
    pub version: String,
}

impl CacheKey {
    pub fn new(workflow_id: i64, version: impl Into<String>) -> Self {
        Self {
            workflow_id,
            version: version.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub misses: u64,
}

struct CacheEntry {
    compiled: Arc<CompiledWorkflow>,
    last_accessed: u64,
}

/// Compiled workflows by workflow id and version.
///
/// A cached pipeline is reused only while the submitted schema is equal to the
/// one it was compiled from; a changed schema under the same key replaces it.
pub struct CompiledWorkflowCache {
    entries: DashMap<CacheKey, CacheEntry>,
    engine_config: EngineConfig,
    max_entries: usize,
    clock: AtomicU64,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CompiledWorkflowCache {
    pub fn new(engine_config: EngineConfig) -> Self {
        Self {
            entries: DashMap::new(),
            engine_config,
            max_entries: usize::MAX,
            clock: AtomicU64::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Bound the cache; the least recently used entry is evicted first.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries.max(1);
        self
    }

    pub fn get_or_compile(
        &self,
        workflow_id: i64,
        version: &str,
        schema: WorkflowSchema,
    ) -> WorkflowResult<Arc<CompiledWorkflow>> {
        let key = CacheKey::new(workflow_id, version);
        if let Some(mut entry) = self.entries.get_mut(&key) {
            if entry.compiled.schema().is_equal(&schema) {
                entry.last_accessed = self.tick();
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(entry.compiled.clone());
            }
            tracing::debug!(workflow_id, version, "schema changed, recompiling");
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let compiled = WorkflowCompiler::compile(schema, self.engine_config.clone())?;
        self.entries.insert(
            key,
            CacheEntry {
                compiled: compiled.clone(),
                last_accessed: self.tick(),
            },
        );
        self.evict_over_capacity();
        Ok(compiled)
    }

    pub fn get(&self, workflow_id: i64, version: &str) -> Option<Arc<CompiledWorkflow>> {
        self.entries
            .get(&CacheKey::new(workflow_id, version))
            .map(|e| e.compiled.clone())
    }

    pub fn invalidate(&self, workflow_id: i64, version: &str) -> bool {
        self.entries
            .remove(&CacheKey::new(workflow_id, version))
            .is_some()
    }

    /// Drop every cached version of a workflow.
    pub fn invalidate_workflow(&self, workflow_id: i64) -> usize {
        let before = self.entries.len();
        self.entries.retain(|k, _| k.workflow_id != workflow_id);
        before - self.entries.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn evict_over_capacity(&self) {
        while self.entries.len() > self.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|e| e.last_accessed)
                .map(|e| e.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}
