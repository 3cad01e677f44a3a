/// Conversation state machine
///
/// A conversation is the mutable context of one run of an assistant. It owns
/// the message history, the last status returned by `execute()`, the request
/// the caller still has to satisfy and the resumable position of the agent or
/// flow. Everything here is serde-serialisable so a suspended conversation
/// can be persisted and picked up by another process.

use crate::assistant::types::Assistant;
use crate::conversation::messages::{Message, MessageList, ToolRequest, ToolResult};
use crate::conversation::status::{ConversationPhase, ExecutionStatus};
use crate::error::{Result, WayflowError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Request the caller has to answer before the next `execute()`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Pending {
    UserMessage {
        #[serde(default)]
        received: Option<String>,
    },
    ToolResults {
        requests: Vec<ToolRequest>,
        #[serde(default)]
        results: Vec<ToolResult>,
    },
}

/// What a resumed assistant receives from the caller
#[derive(Debug, Clone, Default, PartialEq)]
pub enum ResumeInput {
    #[default]
    None,
    UserMessage(String),
    ToolResults(Vec<ToolResult>),
}

impl ResumeInput {
    pub fn tool_result(&self, tool_request_id: &str) -> Option<&ToolResult> {
        match self {
            ResumeInput::ToolResults(results) => {
                results.iter().find(|r| r.tool_request_id == tool_request_id)
            }
            _ => None,
        }
    }
}

/// Resumable position of an agent loop
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Model calls since the last user message
    pub iterations: u32,
    /// Model calls over the agent's whole lifetime
    #[serde(default)]
    pub model_calls: usize,
    /// Initial message already handled
    pub started: bool,
}

/// Resumable position of a flow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FlowState {
    /// Step being executed; `None` until the flow starts
    #[serde(default)]
    pub current_step: Option<String>,
    /// Value store shared by the steps of this flow
    #[serde(default)]
    pub values: HashMap<String, Value>,
    /// What the current step is suspended on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub waiting: Option<StepWait>,
}

impl FlowState {
    pub fn new(values: HashMap<String, Value>) -> Self {
        Self {
            current_step: None,
            values,
            waiting: None,
        }
    }
}

/// Suspension point of a single step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepWait {
    UserInput,
    Tool { tool_request_id: String },
    SubFlow { state: Box<FlowState> },
    SubAgent { state: AgentState },
    Map { state: Box<MapState> },
}

/// Progress of a sequential map step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapState {
    pub index: usize,
    pub items: Vec<Value>,
    /// Outputs of the finished iterations, in item order
    pub collected: Vec<HashMap<String, Value>>,
    /// Sub-flow state of the item at `index`
    pub current: FlowState,
}

/// Resumable position of the top-level assistant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionState {
    Agent(AgentState),
    Flow(FlowState),
}

/// Mutable execution context of one assistant run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    /// Snapshot of the definition the conversation was started on
    pub assistant: Assistant,
    /// Validated inputs (defaults applied)
    pub inputs: HashMap<String, Value>,
    pub messages: MessageList,
    /// Last status returned by `execute()`
    #[serde(default)]
    pub status: Option<ExecutionStatus>,
    #[serde(default)]
    pub pending: Option<Pending>,
    pub state: ExecutionState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// Fresh conversation; inputs must already be validated
    pub fn new(assistant: Assistant, inputs: HashMap<String, Value>) -> Self {
        let state = match &assistant {
            Assistant::Agent(_) => ExecutionState::Agent(AgentState::default()),
            Assistant::Flow(_) => ExecutionState::Flow(FlowState::new(inputs.clone())),
        };
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            assistant,
            inputs,
            messages: MessageList::new(),
            status: None,
            pending: None,
            state,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn phase(&self) -> ConversationPhase {
        if matches!(self.status, Some(ExecutionStatus::Finished { .. })) {
            return ConversationPhase::Finished;
        }
        match &self.pending {
            Some(Pending::UserMessage { received: None }) => ConversationPhase::AwaitingUser,
            Some(Pending::ToolResults { requests, results }) if results.len() < requests.len() => {
                ConversationPhase::AwaitingTool
            }
            _ => ConversationPhase::Running,
        }
    }

    /// Ids of requested tool calls that have no result yet
    pub fn missing_tool_results(&self) -> Vec<String> {
        match &self.pending {
            Some(Pending::ToolResults { requests, results }) => requests
                .iter()
                .filter(|r| !results.iter().any(|res| res.tool_request_id == r.tool_request_id))
                .map(|r| r.tool_request_id.clone())
                .collect(),
            _ => Vec::new(),
        }
    }

    /// Submit the user's reply (or seed an agent conversation before its
    /// first execution)
    pub fn append_user_message(&mut self, content: impl Into<String>) -> Result<()> {
        let content = content.into();
        let phase = self.phase();
        match &mut self.pending {
            Some(Pending::UserMessage { received }) if received.is_none() => {
                *received = Some(content.clone());
            }
            None if self.status.is_none() => {}
            _ => {
                return Err(WayflowError::UnexpectedSubmission {
                    submitted: "user message",
                    phase: phase.to_string(),
                })
            }
        }

        self.messages.push(Message::user(content));
        self.updated_at = Utc::now();
        tracing::debug!("📨 User message submitted to conversation {}", self.id);
        Ok(())
    }

    /// Submit the result of one outstanding client tool request
    pub fn append_tool_result(&mut self, result: ToolResult) -> Result<()> {
        let phase = self.phase();
        let Some(Pending::ToolResults { requests, results }) = &mut self.pending else {
            return Err(WayflowError::UnexpectedSubmission {
                submitted: "tool result",
                phase: phase.to_string(),
            });
        };
        if phase != ConversationPhase::AwaitingTool {
            return Err(WayflowError::UnexpectedSubmission {
                submitted: "tool result",
                phase: phase.to_string(),
            });
        }

        let outstanding = requests.iter().any(|r| r.tool_request_id == result.tool_request_id)
            && !results.iter().any(|r| r.tool_request_id == result.tool_request_id);
        if !outstanding {
            return Err(WayflowError::UnknownToolRequest(result.tool_request_id));
        }

        results.push(result.clone());
        self.messages.push(Message::tool_result(result));
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Input handed to the assistant on the next `execute()`
    pub(crate) fn resume_input(&self) -> ResumeInput {
        match &self.pending {
            Some(Pending::UserMessage { received: Some(content) }) => {
                ResumeInput::UserMessage(content.clone())
            }
            Some(Pending::ToolResults { results, .. }) => ResumeInput::ToolResults(results.clone()),
            _ => ResumeInput::None,
        }
    }

    /// Fail unless the conversation can run right now
    pub(crate) fn ensure_runnable(&self) -> Result<()> {
        match self.phase() {
            ConversationPhase::Running => Ok(()),
            ConversationPhase::Finished => Err(WayflowError::ConversationFinished(self.id.clone())),
            ConversationPhase::AwaitingUser => Err(WayflowError::AwaitingUserMessage),
            ConversationPhase::AwaitingTool => {
                Err(WayflowError::AwaitingToolResults(self.missing_tool_results()))
            }
        }
    }

    /// Record a successful execution
    pub(crate) fn commit(&mut self, status: ExecutionStatus, messages: MessageList, state: ExecutionState) {
        self.pending = match &status {
            ExecutionStatus::Finished { .. } => None,
            ExecutionStatus::UserMessageRequest { .. } => Some(Pending::UserMessage { received: None }),
            ExecutionStatus::ToolRequest { tool_requests } => Some(Pending::ToolResults {
                requests: tool_requests.clone(),
                results: Vec::new(),
            }),
        };
        self.messages = messages;
        self.state = state;
        self.status = Some(status);
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::types::Agent;
    use crate::llm::LlmConfig;
    use serde_json::json;

    fn conversation() -> Conversation {
        let agent = Agent {
            id: "helper".into(),
            name: "Helper".into(),
            description: String::new(),
            llm: LlmConfig::Scripted { responses: vec![] },
            system_prompt: String::new(),
            tools: vec![],
            inputs: vec![],
            outputs: vec![],
            initial_message: None,
            max_iterations: 3,
            caller_input_mode: Default::default(),
        };
        Conversation::new(Assistant::Agent(agent), HashMap::new())
    }

    #[test]
    fn seeding_before_first_execute_is_allowed_once_running() {
        let mut conv = conversation();
        assert_eq!(conv.phase(), ConversationPhase::Running);
        conv.append_user_message("hello").unwrap();
        assert_eq!(conv.messages.len(), 1);
        assert_eq!(conv.resume_input(), ResumeInput::None);
    }

    #[test]
    fn user_message_satisfies_request_exactly_once() {
        let mut conv = conversation();
        let messages = conv.messages.clone();
        let state = conv.state.clone();
        conv.commit(ExecutionStatus::UserMessageRequest { message: None }, messages, state);

        assert_eq!(conv.phase(), ConversationPhase::AwaitingUser);
        assert!(matches!(conv.ensure_runnable(), Err(WayflowError::AwaitingUserMessage)));

        conv.append_user_message("hi").unwrap();
        assert_eq!(conv.phase(), ConversationPhase::Running);
        assert_eq!(conv.resume_input(), ResumeInput::UserMessage("hi".into()));

        let err = conv.append_user_message("again").unwrap_err();
        assert!(matches!(err, WayflowError::UnexpectedSubmission { .. }));
        assert_eq!(conv.messages.len(), 1);
    }

    #[test]
    fn tool_results_are_matched_by_id() {
        let mut conv = conversation();
        let first = ToolRequest::new("lookup", json!({"q": "a"}));
        let second = ToolRequest::new("lookup", json!({"q": "b"}));
        let messages = conv.messages.clone();
        let state = conv.state.clone();
        conv.commit(
            ExecutionStatus::ToolRequest {
                tool_requests: vec![first.clone(), second.clone()],
            },
            messages,
            state,
        );

        let err = conv
            .append_tool_result(ToolResult::new("nope", json!(1)))
            .unwrap_err();
        assert!(matches!(err, WayflowError::UnknownToolRequest(id) if id == "nope"));

        conv.append_tool_result(ToolResult::new(&first.tool_request_id, json!("a")))
            .unwrap();
        assert_eq!(conv.missing_tool_results(), vec![second.tool_request_id.clone()]);
        assert!(matches!(
            conv.ensure_runnable(),
            Err(WayflowError::AwaitingToolResults(ids)) if ids == vec![second.tool_request_id.clone()]
        ));

        let duplicate = conv.append_tool_result(ToolResult::new(&first.tool_request_id, json!("a")));
        assert!(matches!(duplicate, Err(WayflowError::UnknownToolRequest(_))));

        conv.append_tool_result(ToolResult::new(&second.tool_request_id, json!("b")))
            .unwrap();
        assert_eq!(conv.phase(), ConversationPhase::Running);
        assert_eq!(conv.messages.len(), 2);
    }

    #[test]
    fn finished_conversation_rejects_everything() {
        let mut conv = conversation();
        let messages = conv.messages.clone();
        let state = conv.state.clone();
        conv.commit(
            ExecutionStatus::Finished {
                output_values: HashMap::new(),
                complete_step_name: None,
            },
            messages,
            state,
        );
        assert_eq!(conv.phase(), ConversationPhase::Finished);
        assert!(matches!(conv.ensure_runnable(), Err(WayflowError::ConversationFinished(_))));
        assert!(conv.append_user_message("late").is_err());
    }

    #[test]
    fn suspended_conversation_round_trips_through_json() {
        let mut conv = conversation();
        let messages = conv.messages.clone();
        conv.commit(
            ExecutionStatus::UserMessageRequest { message: None },
            messages,
            ExecutionState::Agent(AgentState { iterations: 2, model_calls: 5, started: true }),
        );
        let json = serde_json::to_string(&conv).unwrap();
        let back: Conversation = serde_json::from_str(&json).unwrap();
        assert_eq!(back.phase(), ConversationPhase::AwaitingUser);
        assert_eq!(back.state, conv.state);
    }
}
