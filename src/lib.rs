/// WayFlow: conversation runtime for agents and step-graph flows
///
/// A conversation is advanced by `execute()` until the assistant finishes or
/// needs something from the caller: a user message or the results of client
/// tool calls. The caller supplies it and executes again; the conversation
/// resumes exactly where it stopped, however deeply nested.

// Error taxonomy shared by every layer
pub mod error;

// Core configuration and setup
pub mod config;

// SQLite pool setup and schema
pub mod database;

// Assistant definitions, descriptors, import/export, storage and registry
pub mod assistant;

// Messages, statuses, resumable conversation state and persistence
pub mod conversation;

// Language model seam
pub mod llm;

// Server tools and sandboxed templates
pub mod tools;

// Agent loop, flow engine and step handlers
pub mod runtime;

// HTTP API layer
pub mod api;

// Server setup and initialization
pub mod server;

pub mod cli;

pub use assistant::{Agent, Assistant, Flow, Step, StepKind};
pub use conversation::{
    Conversation, ConversationPhase, ExecutionStatus, Message, MessageType, ToolRequest, ToolResult,
};
pub use error::{Result, WayflowError};
pub use llm::{LlmCompletion, LlmConfig, LlmModel, ModelRegistry, ScriptedModel};
pub use runtime::ExecutionEngine;
pub use server::start_server;
