/// Conversation execution engine
///
/// Drives agents and flows until they finish or have to yield to the caller.
/// Flows walk their petgraph control-flow graph one step at a time; composite
/// steps (sub-flows, sub-agents, map) recurse into nested resumable state so
/// a suspension deep inside a sub-flow resumes exactly where it stopped.

use crate::assistant::descriptors::{assistant_inputs, flow_inputs, validate_inputs, ITERATED_INPUT, MAP_ITEM};
use crate::assistant::types::{
    Agent, Assistant, Flow, ParallelPolicy, Step, StepKind, ValueType, NEXT_BRANCH,
};
use crate::conversation::conversation::{
    AgentState, Conversation, ExecutionState, FlowState, MapState, ResumeInput, StepWait,
};
use crate::conversation::messages::MessageList;
use crate::conversation::status::ExecutionStatus;
use crate::error::{Result, WayflowError};
use crate::llm::ModelRegistry;
use crate::runtime::executor::{gather_inputs, kind_name, write_output, StepExecutor, StepOutcome};
use crate::runtime::graph::{validate_assistant, FlowGraph};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{self, StreamExt};
use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Default per-flow step budget of one `execute()` call
pub const DEFAULT_MAX_FLOW_STEPS: usize = 1000;

#[derive(Debug, Clone)]
pub struct ExecutionEngine {
    executor: Arc<StepExecutor>,
    models: Arc<ModelRegistry>,
    max_flow_steps: usize,
}

impl ExecutionEngine {
    pub fn new(models: Arc<ModelRegistry>) -> Self {
        Self {
            executor: Arc::new(StepExecutor::new(Arc::clone(&models))),
            models,
            max_flow_steps: DEFAULT_MAX_FLOW_STEPS,
        }
    }

    pub fn with_max_flow_steps(mut self, max_flow_steps: usize) -> Self {
        self.max_flow_steps = max_flow_steps;
        self
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.models
    }

    /// Validate the definition, its model references and the inputs, then
    /// create a conversation ready to execute
    pub fn start_conversation(
        &self,
        assistant: &Assistant,
        inputs: HashMap<String, Value>,
    ) -> Result<Conversation> {
        validate_assistant(assistant)?;
        self.models.check_assistant(assistant)?;
        let values = validate_inputs(assistant.id(), &assistant_inputs(assistant), &inputs)?;

        let conversation = Conversation::new(assistant.clone(), values);
        tracing::info!(
            "🆕 Started conversation {} on {} '{}'",
            conversation.id,
            assistant.kind(),
            assistant.id()
        );
        Ok(conversation)
    }

    /// Advance the conversation until it finishes or needs the caller.
    ///
    /// On error the conversation is left untouched, so the call can be
    /// retried once the cause is fixed.
    pub async fn execute(&self, conversation: &mut Conversation) -> Result<ExecutionStatus> {
        conversation.ensure_runnable()?;

        let start_time = std::time::Instant::now();
        let resume = conversation.resume_input();
        let mut messages = conversation.messages.clone();
        let mut state = conversation.state.clone();

        tracing::info!("🚀 Executing conversation {}", conversation.id);

        let result = match (&conversation.assistant, &mut state) {
            (Assistant::Agent(agent), ExecutionState::Agent(agent_state)) => {
                self.run_agent(agent, &conversation.inputs, agent_state, &mut messages, resume, false)
                    .await
            }
            (Assistant::Flow(flow), ExecutionState::Flow(flow_state)) => {
                self.run_flow(flow, flow_state, &mut messages, resume).await
            }
            (assistant, _) => Err(WayflowError::InvalidDefinition {
                component: assistant.id().to_string(),
                reason: "conversation state does not match the assistant kind".to_string(),
            }),
        };

        match result {
            Ok(status) => {
                tracing::info!(
                    "✅ Conversation {} yielded {} in {:?}",
                    conversation.id,
                    status_label(&status),
                    start_time.elapsed()
                );
                conversation.commit(status.clone(), messages, state);
                Ok(status)
            }
            Err(e) => {
                tracing::error!(
                    "❌ Conversation {} failed after {:?}: {}",
                    conversation.id,
                    start_time.elapsed(),
                    e
                );
                Err(e)
            }
        }
    }

    /// Run (or resume) a flow on its own value store
    pub(crate) fn run_flow<'a>(
        &'a self,
        flow: &'a Flow,
        state: &'a mut FlowState,
        messages: &'a mut MessageList,
        resume: ResumeInput,
    ) -> BoxFuture<'a, Result<ExecutionStatus>> {
        async move {
            let graph = FlowGraph::build(flow)?;
            let mut current = state
                .current_step
                .clone()
                .unwrap_or_else(|| flow.start_step.clone());
            let mut resume = resume;
            let mut executed = 0usize;

            tracing::debug!("🔄 Running flow '{}' from step '{}'", flow.id, current);

            loop {
                if executed >= self.max_flow_steps {
                    return Err(WayflowError::StepLimitExceeded {
                        flow: flow.id.clone(),
                        limit: self.max_flow_steps,
                    });
                }
                executed += 1;

                let step = graph.step(&current)?;
                state.current_step = Some(current.clone());

                match self.run_step(step, state, messages, std::mem::take(&mut resume)).await? {
                    StepOutcome::Next(branch) => {
                        current = graph.next_step(&step.name, &branch)?.to_string();
                    }
                    StepOutcome::Complete => {
                        let output_values = flow_outputs(flow, state)?;
                        tracing::info!("🎉 Flow '{}' completed at step '{}'", flow.id, step.name);
                        return Ok(ExecutionStatus::Finished {
                            output_values,
                            complete_step_name: Some(step.name.clone()),
                        });
                    }
                    StepOutcome::Suspend(status) => return Ok(status),
                }
            }
        }
        .boxed()
    }

    async fn run_step(
        &self,
        step: &Step,
        state: &mut FlowState,
        messages: &mut MessageList,
        resume: ResumeInput,
    ) -> Result<StepOutcome> {
        let step_start_time = std::time::Instant::now();
        tracing::info!("📍 Executing step '{}' (type: {})", step.name, kind_name(&step.kind));

        let result = match &step.kind {
            StepKind::FlowExecution { flow } => {
                self.run_sub_flow(step, flow, state, messages, resume).await
            }
            StepKind::AgentExecution { agent } => {
                self.run_sub_agent(step, agent, state, messages, resume).await
            }
            StepKind::Map {
                flow,
                unpack_input,
                parallel,
            } => match parallel {
                ParallelPolicy::Sequential => {
                    self.run_map_sequential(step, flow, unpack_input, state, messages, resume)
                        .await
                }
                ParallelPolicy::Parallel { max_workers } => {
                    self.run_map_parallel(step, flow, unpack_input, *max_workers, state, messages)
                        .await
                }
            },
            _ => self.executor.execute_step(step, state, messages, resume).await,
        };

        match &result {
            Ok(StepOutcome::Suspend(status)) => {
                tracing::info!("⏸️ Step '{}' suspended with {}", step.name, status_label(status));
            }
            Ok(_) => {
                tracing::info!("✅ Step '{}' completed in {:?}", step.name, step_start_time.elapsed());
            }
            Err(e) => {
                tracing::error!("❌ Step '{}' failed in {:?}: {}", step.name, step_start_time.elapsed(), e);
            }
        }

        result
    }

    async fn run_sub_flow(
        &self,
        step: &Step,
        flow: &Flow,
        state: &mut FlowState,
        messages: &mut MessageList,
        resume: ResumeInput,
    ) -> Result<StepOutcome> {
        let mut sub_state = match state.waiting.take() {
            Some(StepWait::SubFlow { state: sub_state }) => *sub_state,
            _ => {
                let inputs = gather_inputs(step, &state.values)?;
                FlowState::new(validate_inputs(&flow.id, &flow_inputs(flow), &inputs)?)
            }
        };

        match self.run_flow(flow, &mut sub_state, messages, resume).await? {
            ExecutionStatus::Finished { output_values, .. } => {
                write_outputs(step, state, output_values);
                Ok(StepOutcome::Next(NEXT_BRANCH.to_string()))
            }
            suspended => {
                state.waiting = Some(StepWait::SubFlow {
                    state: Box::new(sub_state),
                });
                Ok(StepOutcome::Suspend(suspended))
            }
        }
    }

    async fn run_sub_agent(
        &self,
        step: &Step,
        agent: &Agent,
        state: &mut FlowState,
        messages: &mut MessageList,
        resume: ResumeInput,
    ) -> Result<StepOutcome> {
        let mut agent_state = match state.waiting.take() {
            Some(StepWait::SubAgent { state: agent_state }) => agent_state,
            _ => AgentState::default(),
        };
        let inputs = gather_inputs(step, &state.values)?;

        match self
            .run_agent(agent, &inputs, &mut agent_state, messages, resume, true)
            .await?
        {
            ExecutionStatus::Finished { output_values, .. } => {
                write_outputs(step, state, output_values);
                Ok(StepOutcome::Next(NEXT_BRANCH.to_string()))
            }
            suspended => {
                state.waiting = Some(StepWait::SubAgent { state: agent_state });
                Ok(StepOutcome::Suspend(suspended))
            }
        }
    }

    /// One sub-flow run per item, one at a time; any iteration may suspend
    async fn run_map_sequential(
        &self,
        step: &Step,
        flow: &Flow,
        unpack_input: &HashMap<String, String>,
        state: &mut FlowState,
        messages: &mut MessageList,
        resume: ResumeInput,
    ) -> Result<StepOutcome> {
        let mut map_state = match state.waiting.take() {
            Some(StepWait::Map { state: map_state }) => *map_state,
            _ => {
                let items = iterated_items(step, state)?;
                let current = match items.first() {
                    Some(item) => FlowState::new(unpack_item(flow, unpack_input, item)?),
                    None => FlowState::default(),
                };
                MapState {
                    index: 0,
                    items,
                    collected: Vec::new(),
                    current,
                }
            }
        };

        let mut resume = resume;
        while map_state.index < map_state.items.len() {
            tracing::debug!(
                "🔁 Map step '{}' item {}/{}",
                step.name,
                map_state.index + 1,
                map_state.items.len()
            );
            let status = self
                .run_flow(flow, &mut map_state.current, messages, std::mem::take(&mut resume))
                .await?;

            match status {
                ExecutionStatus::Finished { output_values, .. } => {
                    map_state.collected.push(output_values);
                    map_state.index += 1;
                    if let Some(item) = map_state.items.get(map_state.index) {
                        map_state.current = FlowState::new(unpack_item(flow, unpack_input, item)?);
                    }
                }
                suspended => {
                    state.waiting = Some(StepWait::Map {
                        state: Box::new(map_state),
                    });
                    return Ok(StepOutcome::Suspend(suspended));
                }
            }
        }

        write_outputs(step, state, collect_map_outputs(flow, &map_state.collected));
        Ok(StepOutcome::Next(NEXT_BRANCH.to_string()))
    }

    /// Concurrent sub-flow runs bounded by `max_workers`.
    ///
    /// Messages produced by the iterations land in completion order; the
    /// collected outputs keep item order.
    async fn run_map_parallel(
        &self,
        step: &Step,
        flow: &Flow,
        unpack_input: &HashMap<String, String>,
        max_workers: usize,
        state: &mut FlowState,
        messages: &mut MessageList,
    ) -> Result<StepOutcome> {
        let items = iterated_items(step, state)?;
        let count = items.len();
        tracing::debug!("⚡ Map step '{}' running {} items on {} workers", step.name, count, max_workers);

        let runs: Vec<Result<(usize, HashMap<String, Value>, MessageList)>> =
            stream::iter(items.into_iter().enumerate())
                .map(|(index, item)| self.run_map_item(step, flow, unpack_input, index, item))
                .buffer_unordered(max_workers.max(1))
                .collect()
                .await;

        let mut collected: Vec<HashMap<String, Value>> = vec![HashMap::new(); count];
        for run in runs {
            let (index, outputs, produced) = run?;
            messages.extend(produced);
            collected[index] = outputs;
        }

        write_outputs(step, state, collect_map_outputs(flow, &collected));
        Ok(StepOutcome::Next(NEXT_BRANCH.to_string()))
    }
}

impl ExecutionEngine {
    /// One iteration of a parallel map; it must not suspend
    async fn run_map_item(
        &self,
        step: &Step,
        flow: &Flow,
        unpack_input: &HashMap<String, String>,
        index: usize,
        item: Value,
    ) -> Result<(usize, HashMap<String, Value>, MessageList)> {
        let mut sub_state = FlowState::new(unpack_item(flow, unpack_input, &item)?);
        let mut produced = MessageList::new();
        match self
            .run_flow(flow, &mut sub_state, &mut produced, ResumeInput::None)
            .await?
        {
            ExecutionStatus::Finished { output_values, .. } => Ok((index, output_values, produced)),
            _ => Err(WayflowError::SuspensionNotSupported {
                step: step.name.clone(),
            }),
        }
    }
}

fn status_label(status: &ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Finished { .. } => "Finished",
        ExecutionStatus::UserMessageRequest { .. } => "UserMessageRequest",
        ExecutionStatus::ToolRequest { .. } => "ToolRequest",
    }
}

fn write_outputs(step: &Step, state: &mut FlowState, outputs: HashMap<String, Value>) {
    for (name, value) in outputs {
        write_output(step, state, &name, value);
    }
}

/// Declared outputs of a finished flow, or its whole value store
fn flow_outputs(flow: &Flow, state: &FlowState) -> Result<HashMap<String, Value>> {
    if flow.outputs.is_empty() {
        return Ok(state.values.clone());
    }

    flow.outputs
        .iter()
        .map(|output| {
            let value = state
                .values
                .get(&output.name)
                .cloned()
                .or_else(|| output.default.clone())
                .ok_or_else(|| WayflowError::MissingInput {
                    component: flow.id.clone(),
                    name: output.name.clone(),
                })?;
            Ok((output.name.clone(), value))
        })
        .collect()
}

fn iterated_items(step: &Step, state: &FlowState) -> Result<Vec<Value>> {
    let inputs = gather_inputs(step, &state.values)?;
    match inputs.get(ITERATED_INPUT) {
        Some(Value::Array(items)) => Ok(items.clone()),
        other => Err(WayflowError::InputTypeMismatch {
            component: step.name.clone(),
            name: ITERATED_INPUT.to_string(),
            expected: "array".to_string(),
            found: other
                .map(ValueType::describe)
                .unwrap_or("nothing")
                .to_string(),
        }),
    }
}

/// Sub-flow inputs for one map item
fn unpack_item(
    flow: &Flow,
    unpack_input: &HashMap<String, String>,
    item: &Value,
) -> Result<HashMap<String, Value>> {
    let mut provided = HashMap::new();
    if unpack_input.is_empty() {
        provided.insert(MAP_ITEM.to_string(), item.clone());
    } else {
        for (name, path) in unpack_input {
            let matches = jsonpath_lib::select(item, path).map_err(|e| {
                WayflowError::InvalidDefinition {
                    component: flow.id.clone(),
                    reason: format!("invalid JSONPath '{}': {:?}", path, e),
                }
            })?;
            let value = matches
                .first()
                .map(|v| (*v).clone())
                .ok_or_else(|| WayflowError::MissingInput {
                    component: flow.id.clone(),
                    name: name.clone(),
                })?;
            provided.insert(name.clone(), value);
        }
    }

    validate_inputs(&flow.id, &flow_inputs(flow), &provided)
}

/// Per-output arrays in item order
fn collect_map_outputs(flow: &Flow, collected: &[HashMap<String, Value>]) -> HashMap<String, Value> {
    let names: BTreeSet<String> = if flow.outputs.is_empty() {
        collected.iter().flat_map(|o| o.keys().cloned()).collect()
    } else {
        flow.outputs.iter().map(|o| o.name.clone()).collect()
    };

    names
        .into_iter()
        .map(|name| {
            let values = collected
                .iter()
                .map(|outputs| outputs.get(&name).cloned().unwrap_or(Value::Null))
                .collect();
            (name, Value::Array(values))
        })
        .collect()
}
