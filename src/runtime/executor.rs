/// Step execution handlers
///
/// Runs the leaf step kinds of a flow against its value store:
/// - Message steps post to the conversation or wait for the user
/// - Tool steps run server tools inline or hand client tools to the caller
/// - Prompt steps make a single model call
/// - Branching, templating and JSON extraction transform values
/// - API call steps perform an HTTP request
///
/// Composite steps (sub-flows, sub-agents, map) are driven by the engine.

use crate::assistant::descriptors::{
    step_inputs, GENERATED_OUTPUT, HTTP_RESPONSE, HTTP_STATUS_CODE, JSON_TEXT, NEXT_STEP_NAME,
    OUTPUT_MESSAGE, TOOL_OUTPUT, USER_PROVIDED_INPUT,
};
use crate::assistant::types::{Step, StepKind, Tool, DEFAULT_BRANCH, NEXT_BRANCH};
use crate::conversation::conversation::{FlowState, ResumeInput, StepWait};
use crate::conversation::messages::{Message, MessageList, ToolRequest};
use crate::conversation::status::ExecutionStatus;
use crate::error::{Result, WayflowError};
use crate::llm::{LlmConfig, LlmPrompt, ModelRegistry};
use crate::tools::{execute_server_tool, prepare_arguments, template::render_template};
use serde_json::{json, Value};
use std::{collections::HashMap, sync::Arc};

/// What the flow does after a step
#[derive(Debug)]
pub enum StepOutcome {
    /// Follow the named branch
    Next(String),
    /// The flow reached a terminal step
    Complete,
    /// The conversation has to yield to the caller
    Suspend(ExecutionStatus),
}

impl StepOutcome {
    fn next() -> Self {
        StepOutcome::Next(NEXT_BRANCH.to_string())
    }
}

/// Short label of a step kind for logs
pub fn kind_name(kind: &StepKind) -> &'static str {
    match kind {
        StepKind::Start { .. } => "start",
        StepKind::Complete => "complete",
        StepKind::OutputMessage { .. } => "output_message",
        StepKind::InputMessage { .. } => "input_message",
        StepKind::ToolExecution { .. } => "tool_execution",
        StepKind::PromptExecution { .. } => "prompt_execution",
        StepKind::AgentExecution { .. } => "agent_execution",
        StepKind::FlowExecution { .. } => "flow_execution",
        StepKind::Branching { .. } => "branching",
        StepKind::TemplateRendering { .. } => "template_rendering",
        StepKind::ExtractValueFromJson { .. } => "extract_value_from_json",
        StepKind::Map { .. } => "map",
        StepKind::ApiCall { .. } => "api_call",
    }
}

/// Read a step's inputs from the value store, applying defaults
pub fn gather_inputs(step: &Step, values: &HashMap<String, Value>) -> Result<HashMap<String, Value>> {
    let mut inputs = HashMap::new();
    for descriptor in step_inputs(step) {
        let key = step.input_key(&descriptor.name);
        let value = match values.get(key) {
            Some(value) => value.clone(),
            None => descriptor.default.clone().ok_or_else(|| WayflowError::MissingInput {
                component: step.name.clone(),
                name: key.to_string(),
            })?,
        };
        inputs.insert(descriptor.name, value);
    }
    Ok(inputs)
}

/// Write a step output to the value store
pub fn write_output(step: &Step, state: &mut FlowState, name: &str, value: Value) {
    let key = step.output_key(name).to_string();
    tracing::debug!("  📝 {}.{} -> {}", step.name, name, key);
    state.values.insert(key, value);
}

/// Handler of the leaf step kinds
#[derive(Debug)]
pub struct StepExecutor {
    models: Arc<ModelRegistry>,
    http: reqwest::Client,
}

impl StepExecutor {
    pub fn new(models: Arc<ModelRegistry>) -> Self {
        Self {
            models,
            http: reqwest::Client::new(),
        }
    }

    /// Execute (or resume) a single step
    pub async fn execute_step(
        &self,
        step: &Step,
        state: &mut FlowState,
        messages: &mut MessageList,
        resume: ResumeInput,
    ) -> Result<StepOutcome> {
        match &step.kind {
            StepKind::Start { .. } => Ok(StepOutcome::next()),
            StepKind::Complete => Ok(StepOutcome::Complete),
            StepKind::OutputMessage { message } => {
                let inputs = gather_inputs(step, &state.values)?;
                let text = render_template(message, &inputs)?;
                messages.push(Message::agent(text.clone()));
                write_output(step, state, OUTPUT_MESSAGE, Value::String(text));
                Ok(StepOutcome::next())
            }
            StepKind::InputMessage { message } => {
                self.execute_input_message(step, message.as_deref(), state, messages, resume)
            }
            StepKind::ToolExecution { tool } => {
                self.execute_tool_step(step, tool, state, messages, resume).await
            }
            StepKind::PromptExecution { prompt, llm } => {
                self.execute_prompt_step(step, prompt, llm, state).await
            }
            StepKind::Branching { branches } => {
                let inputs = gather_inputs(step, &state.values)?;
                let selector = match inputs.get(NEXT_STEP_NAME) {
                    Some(Value::String(s)) => s.clone(),
                    Some(other) => other.to_string(),
                    None => String::new(),
                };
                let branch = branches
                    .get(&selector)
                    .cloned()
                    .unwrap_or_else(|| DEFAULT_BRANCH.to_string());
                tracing::debug!("🔀 Step '{}' selected branch '{}' for '{}'", step.name, branch, selector);
                Ok(StepOutcome::Next(branch))
            }
            StepKind::TemplateRendering { template } => {
                let inputs = gather_inputs(step, &state.values)?;
                let text = render_template(template, &inputs)?;
                write_output(step, state, GENERATED_OUTPUT, Value::String(text));
                Ok(StepOutcome::next())
            }
            StepKind::ExtractValueFromJson { outputs } => {
                self.execute_extract_step(step, outputs, state)
            }
            StepKind::ApiCall {
                url,
                method,
                headers,
                body,
            } => {
                self.execute_api_call_step(step, url, method, headers, body.as_deref(), state)
                    .await
            }
            StepKind::AgentExecution { .. } | StepKind::FlowExecution { .. } | StepKind::Map { .. } => {
                tracing::error!("❌ Composite step '{}' reached the leaf executor", step.name);
                Err(WayflowError::InvalidDefinition {
                    component: step.name.clone(),
                    reason: format!("{} steps are run by the engine", kind_name(&step.kind)),
                })
            }
        }
    }

    fn execute_input_message(
        &self,
        step: &Step,
        message: Option<&str>,
        state: &mut FlowState,
        messages: &mut MessageList,
        resume: ResumeInput,
    ) -> Result<StepOutcome> {
        if matches!(state.waiting, Some(StepWait::UserInput)) {
            let ResumeInput::UserMessage(content) = resume else {
                return Err(WayflowError::AwaitingUserMessage);
            };
            state.waiting = None;
            write_output(step, state, USER_PROVIDED_INPUT, Value::String(content));
            return Ok(StepOutcome::next());
        }

        let outbound = match message {
            Some(template) => {
                let inputs = gather_inputs(step, &state.values)?;
                let message = Message::agent(render_template(template, &inputs)?);
                messages.push(message.clone());
                Some(message)
            }
            None => None,
        };

        state.waiting = Some(StepWait::UserInput);
        tracing::info!("⏸️ Step '{}' is waiting for a user message", step.name);
        Ok(StepOutcome::Suspend(ExecutionStatus::UserMessageRequest { message: outbound }))
    }

    async fn execute_tool_step(
        &self,
        step: &Step,
        tool: &Tool,
        state: &mut FlowState,
        messages: &mut MessageList,
        resume: ResumeInput,
    ) -> Result<StepOutcome> {
        if let Some(StepWait::Tool { tool_request_id }) = &state.waiting {
            let result = resume
                .tool_result(tool_request_id)
                .ok_or_else(|| WayflowError::AwaitingToolResults(vec![tool_request_id.clone()]))?;
            let content = result.content.clone();
            state.waiting = None;
            write_output(step, state, TOOL_OUTPUT, content);
            return Ok(StepOutcome::next());
        }

        let inputs = gather_inputs(step, &state.values)?;
        let args = prepare_arguments(tool, &Value::Object(inputs.into_iter().collect()))?;

        if tool.is_client() {
            let request = ToolRequest::new(&tool.name, args);
            messages.push(Message::tool_requests("", vec![request.clone()]));
            state.waiting = Some(StepWait::Tool {
                tool_request_id: request.tool_request_id.clone(),
            });
            tracing::info!("⏸️ Step '{}' requested client tool '{}'", step.name, tool.name);
            return Ok(StepOutcome::Suspend(ExecutionStatus::ToolRequest {
                tool_requests: vec![request],
            }));
        }

        let output = execute_server_tool(tool, &args).await?;
        write_output(step, state, TOOL_OUTPUT, output);
        Ok(StepOutcome::next())
    }

    async fn execute_prompt_step(
        &self,
        step: &Step,
        prompt: &str,
        llm: &LlmConfig,
        state: &mut FlowState,
    ) -> Result<StepOutcome> {
        let inputs = gather_inputs(step, &state.values)?;
        let rendered = render_template(prompt, &inputs)?;
        let model = self.models.resolve(llm)?;

        let completion = model
            .generate(&LlmPrompt {
                call_index: 0,
                system_prompt: String::new(),
                messages: vec![Message::user(rendered)],
                tools: Vec::new(),
            })
            .await?;

        write_output(
            step,
            state,
            GENERATED_OUTPUT,
            Value::String(completion.text.unwrap_or_default()),
        );
        Ok(StepOutcome::next())
    }

    fn execute_extract_step(
        &self,
        step: &Step,
        outputs: &HashMap<String, String>,
        state: &mut FlowState,
    ) -> Result<StepOutcome> {
        let inputs = gather_inputs(step, &state.values)?;
        let document = match inputs.get(JSON_TEXT) {
            Some(Value::String(text)) => serde_json::from_str(text)?,
            Some(other) => other.clone(),
            None => Value::Null,
        };

        let mut names: Vec<&String> = outputs.keys().collect();
        names.sort();
        for name in names {
            let path = &outputs[name];
            let matches = jsonpath_lib::select(&document, path).map_err(|e| {
                WayflowError::InvalidDefinition {
                    component: step.name.clone(),
                    reason: format!("invalid JSONPath '{}': {:?}", path, e),
                }
            })?;
            let value = match matches.first() {
                Some(value) => (*value).clone(),
                None => {
                    tracing::warn!("⚠️ JSONPath '{}' matched nothing in step '{}'", path, step.name);
                    Value::Null
                }
            };
            write_output(step, state, name, value);
        }

        Ok(StepOutcome::next())
    }

    async fn execute_api_call_step(
        &self,
        step: &Step,
        url: &str,
        method: &str,
        headers: &HashMap<String, String>,
        body: Option<&str>,
        state: &mut FlowState,
    ) -> Result<StepOutcome> {
        let inputs = gather_inputs(step, &state.values)?;
        let url = render_template(url, &inputs)?;

        tracing::debug!("🌍 HTTP Request: {} {}", method, url);

        let mut request_builder = match method.to_uppercase().as_str() {
            "GET" => self.http.get(&url),
            "POST" => self.http.post(&url),
            "PUT" => self.http.put(&url),
            "DELETE" => self.http.delete(&url),
            "PATCH" => self.http.patch(&url),
            _ => {
                return Err(WayflowError::InvalidDefinition {
                    component: step.name.clone(),
                    reason: format!("unsupported HTTP method: {}", method),
                })
            }
        };

        for (name, template) in headers {
            request_builder = request_builder.header(name.as_str(), render_template(template, &inputs)?);
        }

        if let Some(template) = body {
            let rendered = render_template(template, &inputs)?;
            request_builder = match serde_json::from_str::<Value>(&rendered) {
                Ok(json_body) => request_builder.json(&json_body),
                Err(_) => request_builder
                    .header("Content-Type", "text/plain")
                    .body(rendered),
            };
        }

        let response = request_builder.send().await?;
        let status = response.status();
        let response_text = response.text().await?;
        let response_data =
            serde_json::from_str::<Value>(&response_text).unwrap_or(Value::String(response_text));

        if status.is_success() {
            tracing::info!("✅ HTTP request completed: {} {} (status: {})", method, url, status);
        } else {
            tracing::warn!("⚠️ HTTP request returned {}: {} {}", status, method, url);
        }

        write_output(step, state, HTTP_STATUS_CODE, json!(status.as_u16()));
        write_output(step, state, HTTP_RESPONSE, response_data);
        Ok(StepOutcome::next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::types::{Property, ToolKind};
    use crate::llm::LlmCompletion;

    fn executor() -> StepExecutor {
        StepExecutor::new(Arc::new(ModelRegistry::new()))
    }

    fn state(pairs: &[(&str, Value)]) -> FlowState {
        FlowState::new(pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect())
    }

    #[tokio::test]
    async fn output_message_posts_and_maps_output() {
        let mut step = Step::new("greet", StepKind::OutputMessage { message: "Hi {{who}}".into() });
        step.input_mapping.insert("who".into(), "user_name".into());
        step.output_mapping.insert(OUTPUT_MESSAGE.into(), "greeting".into());

        let mut flow_state = state(&[("user_name", json!("Ada"))]);
        let mut messages = MessageList::new();
        let outcome = executor()
            .execute_step(&step, &mut flow_state, &mut messages, ResumeInput::None)
            .await
            .unwrap();

        assert!(matches!(outcome, StepOutcome::Next(branch) if branch == NEXT_BRANCH));
        assert_eq!(messages.as_slice().last().unwrap().content, "Hi Ada");
        assert_eq!(flow_state.values["greeting"], json!("Hi Ada"));
    }

    #[tokio::test]
    async fn missing_step_input_is_reported() {
        let step = Step::new("greet", StepKind::OutputMessage { message: "Hi {{who}}".into() });
        let err = executor()
            .execute_step(&step, &mut state(&[]), &mut MessageList::new(), ResumeInput::None)
            .await
            .unwrap_err();
        assert!(matches!(err, WayflowError::MissingInput { name, .. } if name == "who"));
    }

    #[tokio::test]
    async fn input_message_suspends_then_stores_reply() {
        let step = Step::new("ask", StepKind::InputMessage { message: Some("Your name?".into()) });
        let executor = executor();
        let mut flow_state = state(&[]);
        let mut messages = MessageList::new();

        let outcome = executor
            .execute_step(&step, &mut flow_state, &mut messages, ResumeInput::None)
            .await
            .unwrap();
        let StepOutcome::Suspend(ExecutionStatus::UserMessageRequest { message }) = outcome else {
            panic!("expected a user message request");
        };
        assert_eq!(message.unwrap().content, "Your name?");

        let outcome = executor
            .execute_step(&step, &mut flow_state, &mut messages, ResumeInput::UserMessage("Ada".into()))
            .await
            .unwrap();
        assert!(matches!(outcome, StepOutcome::Next(_)));
        assert_eq!(flow_state.values[USER_PROVIDED_INPUT], json!("Ada"));
        assert!(flow_state.waiting.is_none());
    }

    #[tokio::test]
    async fn client_tool_step_round_trip() {
        let step = Step::new(
            "weather",
            StepKind::ToolExecution {
                tool: Tool {
                    name: "get_weather".into(),
                    description: String::new(),
                    parameters: vec![Property::string("city")],
                    kind: ToolKind::Client,
                },
            },
        );
        let executor = executor();
        let mut flow_state = state(&[("city", json!("Oslo"))]);
        let mut messages = MessageList::new();

        let outcome = executor
            .execute_step(&step, &mut flow_state, &mut messages, ResumeInput::None)
            .await
            .unwrap();
        let StepOutcome::Suspend(ExecutionStatus::ToolRequest { tool_requests }) = outcome else {
            panic!("expected a tool request");
        };
        assert_eq!(tool_requests[0].args, json!({"city": "Oslo"}));

        let result = crate::conversation::messages::ToolResult::new(
            &tool_requests[0].tool_request_id,
            json!("sunny"),
        );
        executor
            .execute_step(&step, &mut flow_state, &mut messages, ResumeInput::ToolResults(vec![result]))
            .await
            .unwrap();
        assert_eq!(flow_state.values[TOOL_OUTPUT], json!("sunny"));
    }

    #[tokio::test]
    async fn branching_falls_back_to_default() {
        let step = Step::new(
            "route",
            StepKind::Branching {
                branches: HashMap::from([("yes".to_string(), "approve".to_string())]),
            },
        );
        let executor = executor();

        let outcome = executor
            .execute_step(&step, &mut state(&[(NEXT_STEP_NAME, json!("yes"))]), &mut MessageList::new(), ResumeInput::None)
            .await
            .unwrap();
        assert!(matches!(outcome, StepOutcome::Next(b) if b == "approve"));

        let outcome = executor
            .execute_step(&step, &mut state(&[(NEXT_STEP_NAME, json!("maybe"))]), &mut MessageList::new(), ResumeInput::None)
            .await
            .unwrap();
        assert!(matches!(outcome, StepOutcome::Next(b) if b == DEFAULT_BRANCH));
    }

    #[tokio::test]
    async fn extract_values_with_jsonpath() {
        let step = Step::new(
            "extract",
            StepKind::ExtractValueFromJson {
                outputs: HashMap::from([
                    ("city".to_string(), "$.location.city".to_string()),
                    ("first_tag".to_string(), "$.tags[0]".to_string()),
                ]),
            },
        );
        let mut flow_state = state(&[(
            JSON_TEXT,
            json!(r#"{"location": {"city": "Lima"}, "tags": ["a", "b"]}"#),
        )]);
        executor()
            .execute_step(&step, &mut flow_state, &mut MessageList::new(), ResumeInput::None)
            .await
            .unwrap();
        assert_eq!(flow_state.values["city"], json!("Lima"));
        assert_eq!(flow_state.values["first_tag"], json!("a"));
    }

    #[tokio::test]
    async fn prompt_step_uses_model_text() {
        let step = Step::new(
            "summarize",
            StepKind::PromptExecution {
                prompt: "Summarize {{text}}".into(),
                llm: LlmConfig::Scripted {
                    responses: vec![LlmCompletion::text("short")],
                },
            },
        );
        let mut flow_state = state(&[("text", json!("a long text"))]);
        executor()
            .execute_step(&step, &mut flow_state, &mut MessageList::new(), ResumeInput::None)
            .await
            .unwrap();
        assert_eq!(flow_state.values[GENERATED_OUTPUT], json!("short"));
    }
}
