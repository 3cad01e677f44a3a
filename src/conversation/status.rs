/// Execution status returned by every successful `execute()` call

use crate::conversation::messages::{Message, ToolRequest};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Why the assistant stopped advancing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionStatus {
    /// Terminal: the assistant produced its outputs
    Finished {
        output_values: HashMap<String, Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        complete_step_name: Option<String>,
    },
    /// The caller must submit a user message before executing again
    UserMessageRequest {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<Message>,
    },
    /// The caller must submit one result per tool request
    ToolRequest { tool_requests: Vec<ToolRequest> },
}

impl ExecutionStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, ExecutionStatus::Finished { .. })
    }
}

/// Where a conversation currently stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationPhase {
    /// Ready to execute
    Running,
    /// Waiting for a user message
    AwaitingUser,
    /// Waiting for client tool results
    AwaitingTool,
    /// Terminal
    Finished,
}

impl std::fmt::Display for ConversationPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            ConversationPhase::Running => "running",
            ConversationPhase::AwaitingUser => "awaiting a user message",
            ConversationPhase::AwaitingTool => "awaiting tool results",
            ConversationPhase::Finished => "finished",
        };
        f.write_str(label)
    }
}
