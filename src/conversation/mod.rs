/// Conversation layer
///
/// - Append-only message history
/// - Execution statuses and lifecycle phases
/// - Resumable conversation state
/// - SQLite persistence with an in-memory cache

pub mod conversation;
pub mod messages;
pub mod status;
pub mod store;

pub use conversation::{Conversation, Pending, ResumeInput};
pub use messages::{Message, MessageList, MessageType, ToolRequest, ToolResult};
pub use status::{ConversationPhase, ExecutionStatus};
pub use store::ConversationStore;
