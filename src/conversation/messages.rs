/// Conversation message history
///
/// Messages are append-only: the list exposes no way to remove or edit an
/// entry once it has been pushed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Who (or what) produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    System,
    Agent,
    User,
    ToolRequest,
    ToolResult,
}

/// A pending invocation of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRequest {
    pub tool_request_id: String,
    pub name: String,
    #[serde(default)]
    pub args: Value,
}

impl ToolRequest {
    pub fn new(name: impl Into<String>, args: Value) -> Self {
        Self {
            tool_request_id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            args,
        }
    }
}

/// Result of a tool invocation, matched to its request by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub tool_request_id: String,
    pub content: Value,
}

impl ToolResult {
    pub fn new(tool_request_id: impl Into<String>, content: Value) -> Self {
        Self {
            tool_request_id: tool_request_id.into(),
            content,
        }
    }
}

/// A single entry of the conversation history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub message_type: MessageType,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_requests: Vec<ToolRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_result: Option<ToolResult>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    fn build(message_type: MessageType, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            message_type,
            content,
            tool_requests: Vec::new(),
            tool_result: None,
            created_at: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::build(MessageType::User, content.into())
    }

    pub fn agent(content: impl Into<String>) -> Self {
        Self::build(MessageType::Agent, content.into())
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::build(MessageType::System, content.into())
    }

    /// Agent turn that asks for one or more tools to be run
    pub fn tool_requests(content: impl Into<String>, requests: Vec<ToolRequest>) -> Self {
        let mut message = Self::build(MessageType::ToolRequest, content.into());
        message.tool_requests = requests;
        message
    }

    pub fn tool_result(result: ToolResult) -> Self {
        let content = match &result.content {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        let mut message = Self::build(MessageType::ToolResult, content);
        message.tool_result = Some(result);
        message
    }
}

/// Ordered, append-only message history
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageList {
    messages: Vec<Message>,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, message: Message) {
        tracing::debug!("💬 Appending {:?} message {}", message.message_type, message.id);
        self.messages.push(message);
    }

    /// Append every message of `other`, preserving its order
    pub fn extend(&mut self, other: MessageList) {
        for message in other.messages {
            self.push(message);
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Message> {
        self.messages.iter()
    }

    pub fn last_user_message(&self) -> Option<&Message> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.message_type == MessageType::User)
    }

    pub fn has_user_message(&self) -> bool {
        self.last_user_message().is_some()
    }

    /// Find the result submitted for a given tool request
    pub fn tool_result_for(&self, tool_request_id: &str) -> Option<&ToolResult> {
        self.messages
            .iter()
            .rev()
            .filter_map(|m| m.tool_result.as_ref())
            .find(|r| r.tool_request_id == tool_request_id)
    }
}
