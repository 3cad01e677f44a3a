/// Runtime error taxonomy
///
/// Every failure the conversation runtime can surface to a caller. Validation,
/// security and lookup failures are kept apart so the HTTP layer (and embedders)
/// can map them without string matching.

/// Errors raised while validating assistants or driving conversations
#[derive(Debug, thiserror::Error)]
pub enum WayflowError {
    /// An input name that the assistant does not declare
    #[error("unknown input descriptor '{name}' for '{component}'")]
    UnknownInput { component: String, name: String },

    /// A required input with neither a value nor a default
    #[error("missing value for input '{name}' of '{component}'")]
    MissingInput { component: String, name: String },

    /// A value that does not match the declared JSON type
    #[error("input '{name}' of '{component}' expects {expected}, got {found}")]
    InputTypeMismatch {
        component: String,
        name: String,
        expected: String,
        found: String,
    },

    /// Structural problem in a flow or agent definition
    #[error("invalid definition '{component}': {reason}")]
    InvalidDefinition { component: String, reason: String },

    /// Template construct rejected by the sandbox policy
    #[error("unsafe template construct: {0}")]
    UnsafeTemplate(String),

    /// Template failed to parse or render
    #[error("template error: {0}")]
    Template(String),

    /// Tool name that does not resolve in the current toolbox
    #[error("tool not found: {0}")]
    ToolNotFound(String),

    /// Submitted tool result for a request that is not outstanding
    #[error("no outstanding tool request with id '{0}'")]
    UnknownToolRequest(String),

    /// Model id with no registered implementation
    #[error("model not registered: {0}")]
    ModelNotFound(String),

    /// Conversation id with no stored record
    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    /// `execute()` on a conversation that already returned `Finished`
    #[error("conversation {0} has already finished")]
    ConversationFinished(String),

    /// `execute()` while a requested user message has not been submitted
    #[error("conversation is waiting for a user message")]
    AwaitingUserMessage,

    /// `execute()` while requested tool results are still missing
    #[error("conversation is waiting for tool results: {}", .0.join(", "))]
    AwaitingToolResults(Vec<String>),

    /// Submission that the current phase does not accept
    #[error("conversation does not accept a {submitted} while {phase}")]
    UnexpectedSubmission {
        submitted: &'static str,
        phase: String,
    },

    /// Server tool failure
    #[error("tool '{tool}' failed: {message}")]
    ToolExecution { tool: String, message: String },

    /// Model call failure
    #[error("llm error: {0}")]
    Llm(String),

    #[error("agent '{agent}' exceeded {max_iterations} iterations")]
    MaxIterationsExceeded { agent: String, max_iterations: u32 },

    #[error("flow '{flow}' exceeded {limit} steps in a single execution")]
    StepLimitExceeded { flow: String, limit: usize },

    /// A parallel map sub-flow tried to suspend
    #[error("map step '{step}' cannot suspend while running in parallel")]
    SuspensionNotSupported { step: String },

    #[error("http call failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl WayflowError {
    /// Short machine-readable category used by the HTTP layer
    pub fn kind(&self) -> ErrorKind {
        match self {
            WayflowError::UnknownInput { .. }
            | WayflowError::MissingInput { .. }
            | WayflowError::InputTypeMismatch { .. }
            | WayflowError::InvalidDefinition { .. }
            | WayflowError::Template(_) => ErrorKind::Validation,
            WayflowError::UnsafeTemplate(_) => ErrorKind::Security,
            WayflowError::ToolNotFound(_)
            | WayflowError::UnknownToolRequest(_)
            | WayflowError::ModelNotFound(_)
            | WayflowError::ConversationNotFound(_) => ErrorKind::Lookup,
            WayflowError::ConversationFinished(_)
            | WayflowError::AwaitingUserMessage
            | WayflowError::AwaitingToolResults(_)
            | WayflowError::UnexpectedSubmission { .. } => ErrorKind::State,
            _ => ErrorKind::Execution,
        }
    }
}

/// Coarse error categories
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Security,
    Lookup,
    State,
    Execution,
}

pub type Result<T> = std::result::Result<T, WayflowError>;
