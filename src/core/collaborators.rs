use std::sync::Arc;

use super::checkpoint::{CheckpointStore, MemoryCheckpointStore};
use super::id_generator::{IdGenerator, SnowflakeIdGenerator};
use crate::error::{NodeError, NodeResult};
use crate::llm::ModelRegistry;
use crate::service::{KnowledgeService, PluginService};

/// External services a run talks to. Fixed once the run is built.
#[derive(Clone)]
pub struct Collaborators {
    pub id_generator: Arc<dyn IdGenerator>,
    pub checkpoint_store: Arc<dyn CheckpointStore>,
    pub knowledge: Option<Arc<dyn KnowledgeService>>,
    pub plugins: Option<Arc<dyn PluginService>>,
    pub models: ModelRegistry,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Collaborators {
    pub fn builder() -> CollaboratorsBuilder {
        CollaboratorsBuilder::default()
    }

    pub fn knowledge(&self) -> NodeResult<&Arc<dyn KnowledgeService>> {
        self.knowledge
            .as_ref()
            .ok_or(NodeError::CollaboratorMissing("knowledge"))
    }

    pub fn plugins(&self) -> NodeResult<&Arc<dyn PluginService>> {
        self.plugins
            .as_ref()
            .ok_or(NodeError::CollaboratorMissing("plugins"))
    }
}

#[derive(Default)]
pub struct CollaboratorsBuilder {
    id_generator: Option<Arc<dyn IdGenerator>>,
    checkpoint_store: Option<Arc<dyn CheckpointStore>>,
    knowledge: Option<Arc<dyn KnowledgeService>>,
    plugins: Option<Arc<dyn PluginService>>,
    models: ModelRegistry,
}

impl CollaboratorsBuilder {
    pub fn id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = Some(id_generator);
        self
    }

    pub fn checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoint_store = Some(store);
        self
    }

    pub fn knowledge(mut self, knowledge: Arc<dyn KnowledgeService>) -> Self {
        self.knowledge = Some(knowledge);
        self
    }

    pub fn plugins(mut self, plugins: Arc<dyn PluginService>) -> Self {
        self.plugins = Some(plugins);
        self
    }

    pub fn models(mut self, models: ModelRegistry) -> Self {
        self.models = models;
        self
    }

    pub fn build(self) -> Collaborators {
        Collaborators {
            id_generator: self
                .id_generator
                .unwrap_or_else(|| Arc::new(SnowflakeIdGenerator::default())),
            checkpoint_store: self
                .checkpoint_store
                .unwrap_or_else(|| Arc::new(MemoryCheckpointStore::new())),
            knowledge: self.knowledge,
            plugins: self.plugins,
            models: self.models,
        }
    }
}
