/// Model registry
///
/// Lock-free map of model id -> implementation, swapped atomically on
/// registration the same way the assistant registry is.

use crate::assistant::types::{Agent, Assistant, Flow, StepKind};
use crate::error::{Result, WayflowError};
use crate::llm::{LlmConfig, LlmModel, ScriptedModel};
use arc_swap::ArcSwap;
use std::{collections::HashMap, sync::Arc};

#[derive(Default)]
pub struct ModelRegistry {
    models: ArcSwap<HashMap<String, Arc<dyn LlmModel>>>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.model_ids())
            .finish()
    }
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a model under `model_id`
    pub fn register(&self, model_id: impl Into<String>, model: Arc<dyn LlmModel>) {
        let model_id = model_id.into();
        self.models.rcu(|current| {
            let mut next = HashMap::clone(current);
            next.insert(model_id.clone(), Arc::clone(&model));
            next
        });
        tracing::info!("🧠 Registered model: {}", model_id);
    }

    pub fn model_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.models.load().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Resolve a config to a callable model
    pub fn resolve(&self, config: &LlmConfig) -> Result<Arc<dyn LlmModel>> {
        match config {
            LlmConfig::Scripted { responses } => Ok(Arc::new(ScriptedModel::new(responses.clone()))),
            LlmConfig::Registered { model_id } => self
                .models
                .load()
                .get(model_id)
                .cloned()
                .ok_or_else(|| WayflowError::ModelNotFound(model_id.clone())),
        }
    }

    /// Fail early when a config points at an unknown model
    pub fn check(&self, config: &LlmConfig) -> Result<()> {
        self.resolve(config).map(|_| ())
    }

    /// Check every model reference of an assistant, nested ones included
    pub fn check_assistant(&self, assistant: &Assistant) -> Result<()> {
        match assistant {
            Assistant::Agent(agent) => self.check_agent(agent),
            Assistant::Flow(flow) => self.check_flow(flow),
        }
    }

    fn check_agent(&self, agent: &Agent) -> Result<()> {
        self.check(&agent.llm)
    }

    fn check_flow(&self, flow: &Flow) -> Result<()> {
        for step in &flow.steps {
            match &step.kind {
                StepKind::PromptExecution { llm, .. } => self.check(llm)?,
                StepKind::AgentExecution { agent } => self.check_agent(agent)?,
                StepKind::FlowExecution { flow } | StepKind::Map { flow, .. } => self.check_flow(flow)?,
                _ => {}
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::LlmCompletion;

    #[test]
    fn registered_models_resolve_by_id() {
        let registry = ModelRegistry::new();
        registry.register("echo", Arc::new(ScriptedModel::new(vec![LlmCompletion::text("ok")])));

        assert!(registry
            .resolve(&LlmConfig::Registered { model_id: "echo".into() })
            .is_ok());
        let err = registry
            .resolve(&LlmConfig::Registered { model_id: "missing".into() })
            .err()
            .unwrap();
        assert!(matches!(err, WayflowError::ModelNotFound(id) if id == "missing"));
        assert_eq!(registry.model_ids(), vec!["echo".to_string()]);
    }

    #[test]
    fn nested_model_references_are_checked() {
        let registry = ModelRegistry::new();
        let flow: Assistant = serde_json::from_value(serde_json::json!({
            "component_type": "Flow",
            "id": "outer",
            "name": "Outer",
            "start_step": "start",
            "steps": [
                { "name": "start", "step_type": "start" },
                { "name": "inner", "step_type": "flow_execution", "flow": {
                    "id": "inner",
                    "name": "Inner",
                    "start_step": "start",
                    "steps": [
                        { "name": "start", "step_type": "start" },
                        { "name": "ask", "step_type": "prompt_execution", "prompt": "hi",
                          "llm": { "type": "registered", "model_id": "nope" } },
                        { "name": "end", "step_type": "complete" }
                    ],
                    "control_flow_edges": [
                        { "source_step": "start", "destination_step": "ask" },
                        { "source_step": "ask", "destination_step": "end" }
                    ]
                }},
                { "name": "end", "step_type": "complete" }
            ],
            "control_flow_edges": [
                { "source_step": "start", "destination_step": "inner" },
                { "source_step": "inner", "destination_step": "end" }
            ]
        }))
        .unwrap();

        let err = registry.check_assistant(&flow).unwrap_err();
        assert!(matches!(err, WayflowError::ModelNotFound(id) if id == "nope"));

        registry.register("nope", Arc::new(ScriptedModel::new(vec![LlmCompletion::text("ok")])));
        assert!(registry.check_assistant(&flow).is_ok());
    }

    #[tokio::test]
    async fn concurrent_registrations_are_all_kept() {
        let registry = Arc::new(ModelRegistry::new());
        let tasks: Vec<_> = (0..16)
            .map(|i| {
                let registry = Arc::clone(&registry);
                tokio::task::spawn_blocking(move || {
                    registry.register(format!("model-{}", i), Arc::new(ScriptedModel::new(vec![])));
                })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(registry.model_ids().len(), 16);
    }
}
