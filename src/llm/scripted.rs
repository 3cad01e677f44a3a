/// Deterministic scripted model
///
/// Response N answers the agent's N-th model call (`LlmPrompt::call_index`).
/// The index lives in the persisted agent state, so the model keeps nothing
/// of its own and replays identically after a conversation is reloaded.

use crate::error::{Result, WayflowError};
use crate::llm::{LlmCompletion, LlmModel, LlmPrompt};
use async_trait::async_trait;

#[derive(Debug, Clone)]
pub struct ScriptedModel {
    responses: Vec<LlmCompletion>,
}

impl ScriptedModel {
    pub fn new(responses: Vec<LlmCompletion>) -> Self {
        Self { responses }
    }
}

#[async_trait]
impl LlmModel for ScriptedModel {
    async fn generate(&self, prompt: &LlmPrompt) -> Result<LlmCompletion> {
        // Past the end of the script the last response repeats
        let completion = self
            .responses
            .get(prompt.call_index)
            .or_else(|| self.responses.last())
            .cloned()
            .ok_or_else(|| WayflowError::Llm("scripted model has no responses".to_string()))?;

        tracing::debug!("🤖 Scripted model call {} -> {:?}", prompt.call_index, completion);
        Ok(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::messages::Message;

    fn prompt(call_index: usize, messages: Vec<Message>) -> LlmPrompt {
        LlmPrompt {
            call_index,
            system_prompt: String::new(),
            messages,
            tools: Vec::new(),
        }
    }

    #[tokio::test]
    async fn replays_by_call_index() {
        let model = ScriptedModel::new(vec![
            LlmCompletion::text("first"),
            LlmCompletion::text("second"),
        ]);

        // History contents do not move the script forward
        let first = model
            .generate(&prompt(0, vec![Message::agent("welcome"), Message::agent("notice")]))
            .await
            .unwrap();
        assert_eq!(first.text.as_deref(), Some("first"));

        let second = model.generate(&prompt(1, Vec::new())).await.unwrap();
        assert_eq!(second.text.as_deref(), Some("second"));

        let repeated = model.generate(&prompt(7, Vec::new())).await.unwrap();
        assert_eq!(repeated.text.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn empty_script_is_an_error() {
        let model = ScriptedModel::new(Vec::new());
        let err = model.generate(&prompt(0, Vec::new())).await.unwrap_err();
        assert!(matches!(err, WayflowError::Llm(_)));
    }
}
