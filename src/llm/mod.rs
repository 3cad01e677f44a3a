/// Language model seam
///
/// The runtime never talks to a provider directly: agents and prompt steps
/// reference an `LlmConfig`, which the `ModelRegistry` resolves to an
/// `LlmModel` implementation. The crate ships a deterministic scripted model;
/// embedders register their own provider clients by id.

pub mod registry;
pub mod scripted;

use crate::assistant::types::Tool;
use crate::conversation::messages::Message;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub use registry::ModelRegistry;
pub use scripted::ScriptedModel;

/// How an assistant obtains its model
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LlmConfig {
    /// Replays canned completions, one per model call
    Scripted { responses: Vec<LlmCompletion> },
    /// Model registered in the `ModelRegistry` under `model_id`
    Registered { model_id: String },
}

/// Everything a model sees for one generation
#[derive(Debug, Clone)]
pub struct LlmPrompt {
    /// Zero-based count of earlier calls made by the same agent
    pub call_index: usize,
    pub system_prompt: String,
    pub messages: Vec<Message>,
    pub tools: Vec<Tool>,
}

/// A tool call proposed by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub name: String,
    #[serde(default)]
    pub arguments: Value,
}

/// One model generation: text, tool calls, or both
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LlmCompletion {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
}

impl LlmCompletion {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(name: impl Into<String>, arguments: Value) -> Self {
        Self {
            text: None,
            tool_calls: vec![ToolCall {
                name: name.into(),
                arguments,
            }],
        }
    }
}

/// A text-generation backend
#[async_trait]
pub trait LlmModel: Send + Sync {
    async fn generate(&self, prompt: &LlmPrompt) -> Result<LlmCompletion>;
}
