/// Hot-reload assistant registry using ArcSwap
///
/// Every update swaps the whole map pointer, so conversations that already
/// hold an `Arc<Assistant>` keep running on the definition they started with
/// while new conversations pick up the replacement.

use crate::assistant::{storage::AssistantStorage, types::Assistant};
use crate::llm::ModelRegistry;
use crate::runtime::graph::validate_assistant;
use anyhow::Result;
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

#[derive(Debug)]
pub struct AssistantRegistry {
    /// assistant id -> validated definition
    assistants: ArcSwap<HashMap<String, Arc<Assistant>>>,
    storage: AssistantStorage,
    /// Model references are resolved against this registry on `register`
    models: Arc<ModelRegistry>,
}

impl AssistantRegistry {
    pub fn new(storage: AssistantStorage, models: Arc<ModelRegistry>) -> Self {
        Self {
            assistants: ArcSwap::new(Arc::new(HashMap::new())),
            storage,
            models,
        }
    }

    pub fn storage(&self) -> &AssistantStorage {
        &self.storage
    }

    /// Load every stored definition; invalid ones are skipped with a warning
    pub async fn init_from_storage(&self) -> Result<()> {
        let stored = self.storage.load_all().await?;
        let mut loaded = HashMap::new();

        for (id, assistant) in stored {
            match validate_assistant(&assistant) {
                Ok(()) => {
                    loaded.insert(id, Arc::new(assistant));
                }
                Err(e) => tracing::warn!("⚠️ Skipping invalid stored assistant '{}': {}", id, e),
            }
        }

        self.assistants.store(Arc::new(loaded));
        tracing::info!(
            "Initialized assistant registry with {} assistants",
            self.assistants.load().len()
        );
        Ok(())
    }

    /// Validate, persist and hot-load a definition
    pub async fn register(&self, assistant: Assistant) -> Result<Arc<Assistant>> {
        validate_assistant(&assistant)?;
        self.models.check_assistant(&assistant)?;
        self.storage.save(&assistant).await?;

        let id = assistant.id().to_string();
        let assistant = Arc::new(assistant);
        self.swap_in(&id, Arc::clone(&assistant));

        tracing::info!("🔥 Registered {} '{}'", assistant.kind(), id);
        Ok(assistant)
    }

    fn swap_in(&self, id: &str, assistant: Arc<Assistant>) {
        self.assistants.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(id.to_string(), Arc::clone(&assistant));
            next
        });
    }

    /// Lock-free read
    pub fn get(&self, id: &str) -> Option<Arc<Assistant>> {
        self.assistants.load().get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.assistants.load().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Remove from memory and storage; `false` when the id was unknown
    pub async fn remove(&self, id: &str) -> Result<bool> {
        let previous = self.assistants.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.remove(id);
            next
        });
        if previous.contains_key(id) {
            tracing::info!("Removed assistant from registry: {}", id);
        }

        self.storage.delete(id).await
    }
}
