/// Agent execution loop
///
/// An agent alternates between model calls and tool runs until it answers in
/// text, calls `submit_result`, or has to wait for client tool results.

use crate::assistant::types::{Agent, CallerInputMode};
use crate::conversation::conversation::{AgentState, ResumeInput};
use crate::conversation::messages::{Message, MessageList, ToolRequest, ToolResult};
use crate::conversation::status::ExecutionStatus;
use crate::error::{Result, WayflowError};
use crate::llm::LlmPrompt;
use crate::runtime::engine::ExecutionEngine;
use crate::tools::{
    execute_server_tool, prepare_arguments, resolve_tool, submit_result_tool,
    template::render_template, SUBMIT_RESULT_TOOL,
};
use serde_json::{json, Value};
use std::collections::HashMap;

const SKIPPED_AFTER_SUBMIT: &str = "not executed: the result was already submitted";

impl ExecutionEngine {
    /// Run (or resume) an agent.
    ///
    /// `nested` agents run as a flow step: they always get `submit_result`
    /// so they can hand control back to the flow.
    pub(crate) async fn run_agent(
        &self,
        agent: &Agent,
        inputs: &HashMap<String, Value>,
        state: &mut AgentState,
        messages: &mut MessageList,
        resume: ResumeInput,
        nested: bool,
    ) -> Result<ExecutionStatus> {
        let expects_user = agent.caller_input_mode == CallerInputMode::Always;
        if matches!(resume, ResumeInput::UserMessage(_)) {
            state.iterations = 0;
        }

        if !state.started {
            state.started = true;
            let mut outbound = None;
            if let Some(template) = &agent.initial_message {
                let message = Message::agent(render_template(template, inputs)?);
                messages.push(message.clone());
                outbound = Some(message);
            }
            if expects_user && (outbound.is_some() || !messages.has_user_message()) {
                tracing::info!("💬 Agent '{}' is waiting for the first user message", agent.id);
                return Ok(ExecutionStatus::UserMessageRequest { message: outbound });
            }
        }

        let model = self.models().resolve(&agent.llm)?;
        let system_prompt = render_template(&agent.system_prompt, inputs)?;
        let offer_submit = nested || !agent.outputs.is_empty();
        let submit_tool = submit_result_tool(&agent.outputs);
        let mut tools = agent.tools.clone();
        if offer_submit {
            tools.push(submit_tool.clone());
        }

        loop {
            if state.iterations >= agent.max_iterations {
                if !expects_user {
                    return Err(WayflowError::MaxIterationsExceeded {
                        agent: agent.id.clone(),
                        max_iterations: agent.max_iterations,
                    });
                }
                tracing::warn!("⚠️ Agent '{}' reached {} iterations", agent.id, agent.max_iterations);
                let notice = Message::agent(format!(
                    "I could not finish within {} steps. How would you like me to continue?",
                    agent.max_iterations
                ));
                messages.push(notice.clone());
                return Ok(ExecutionStatus::UserMessageRequest {
                    message: Some(notice),
                });
            }
            state.iterations += 1;

            tracing::debug!("🤖 Agent '{}' iteration {}", agent.id, state.iterations);
            let call_index = state.model_calls;
            state.model_calls += 1;
            let completion = model
                .generate(&LlmPrompt {
                    call_index,
                    system_prompt: system_prompt.clone(),
                    messages: messages.as_slice().to_vec(),
                    tools: tools.clone(),
                })
                .await?;

            if completion.tool_calls.is_empty() {
                let message = Message::agent(completion.text.unwrap_or_default());
                messages.push(message.clone());

                if expects_user {
                    return Ok(ExecutionStatus::UserMessageRequest {
                        message: Some(message),
                    });
                }
                if agent.outputs.is_empty() {
                    return Ok(ExecutionStatus::Finished {
                        output_values: HashMap::new(),
                        complete_step_name: None,
                    });
                }
                messages.push(Message::system(format!(
                    "Call `{}` with the required outputs to finish.",
                    SUBMIT_RESULT_TOOL
                )));
                continue;
            }

            let requests: Vec<ToolRequest> = completion
                .tool_calls
                .iter()
                .map(|call| ToolRequest::new(&call.name, call.arguments.clone()))
                .collect();
            messages.push(Message::tool_requests(
                completion.text.unwrap_or_default(),
                requests.clone(),
            ));

            let mut client_requests = Vec::new();
            let mut submitted: Option<serde_json::Map<String, Value>> = None;
            for mut request in requests {
                if submitted.is_some() {
                    push_error(messages, &request, SKIPPED_AFTER_SUBMIT);
                    continue;
                }

                if offer_submit && request.name == SUBMIT_RESULT_TOOL {
                    match prepare_arguments(&submit_tool, &request.args) {
                        Ok(Value::Object(outputs)) => {
                            messages.push(Message::tool_result(ToolResult::new(
                                &request.tool_request_id,
                                json!("submitted"),
                            )));
                            submitted = Some(outputs);
                        }
                        Ok(_) => push_error(messages, &request, "arguments must be an object"),
                        Err(e) => push_error(messages, &request, &e.to_string()),
                    }
                    continue;
                }

                let tool = match resolve_tool(&agent.tools, &request.name) {
                    Ok(tool) => tool,
                    Err(e) => {
                        tracing::warn!("⚠️ Agent '{}' called an unknown tool '{}'", agent.id, request.name);
                        push_error(messages, &request, &e.to_string());
                        continue;
                    }
                };

                let args = match prepare_arguments(tool, &request.args) {
                    Ok(args) => args,
                    Err(e) => {
                        push_error(messages, &request, &e.to_string());
                        continue;
                    }
                };

                if tool.is_client() {
                    request.args = args;
                    client_requests.push(request);
                    continue;
                }

                match execute_server_tool(tool, &args).await {
                    Ok(output) => messages.push(Message::tool_result(ToolResult::new(
                        &request.tool_request_id,
                        output,
                    ))),
                    Err(e) => push_error(messages, &request, &e.to_string()),
                }
            }

            if let Some(outputs) = submitted {
                // Client calls of the same turn are never handed out
                for request in &client_requests {
                    push_error(messages, request, SKIPPED_AFTER_SUBMIT);
                }
                tracing::info!("🏁 Agent '{}' submitted its result", agent.id);
                return Ok(ExecutionStatus::Finished {
                    output_values: outputs.into_iter().collect(),
                    complete_step_name: None,
                });
            }

            if !client_requests.is_empty() {
                tracing::info!(
                    "⏸️ Agent '{}' requested {} client tool call(s)",
                    agent.id,
                    client_requests.len()
                );
                return Ok(ExecutionStatus::ToolRequest {
                    tool_requests: client_requests,
                });
            }
        }
    }
}

/// Feed a tool failure back to the model as the tool's result
fn push_error(messages: &mut MessageList, request: &ToolRequest, error: &str) {
    messages.push(Message::tool_result(ToolResult::new(
        &request.tool_request_id,
        json!({ "error": error }),
    )));
}
