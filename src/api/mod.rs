/// HTTP API Layer
///
/// REST endpoints for assistant management and for driving conversations:
/// - Assistant CRUD with hot reload and Agent-Spec export
/// - Conversation start, execute, user message and tool result submission

pub mod assistants;
pub mod conversations;

use crate::assistant::AssistantRegistry;
use crate::conversation::ConversationStore;
use crate::error::{ErrorKind, WayflowError};
use crate::runtime::ExecutionEngine;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde_json::json;
use std::sync::Arc;

pub use assistants::create_assistant_routes;
pub use conversations::create_conversation_routes;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<AssistantRegistry>,
    pub conversations: Arc<ConversationStore>,
    pub engine: Arc<ExecutionEngine>,
}

/// Error returned by every handler
#[derive(Debug)]
pub enum ApiError {
    Runtime(WayflowError),
    NotFound(String),
    BadRequest(String),
    Conflict(String),
    Internal(anyhow::Error),
}

impl From<WayflowError> for ApiError {
    fn from(e: WayflowError) -> Self {
        ApiError::Runtime(e)
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        match e.downcast::<WayflowError>() {
            Ok(runtime) => ApiError::Runtime(runtime),
            Err(other) => ApiError::Internal(other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind, message) = match self {
            ApiError::Runtime(e) => {
                let (status, kind) = match e.kind() {
                    ErrorKind::Validation => (StatusCode::BAD_REQUEST, "validation"),
                    ErrorKind::Security => (StatusCode::BAD_REQUEST, "security"),
                    ErrorKind::Lookup => (StatusCode::NOT_FOUND, "lookup"),
                    ErrorKind::State => (StatusCode::CONFLICT, "state"),
                    ErrorKind::Execution => (StatusCode::INTERNAL_SERVER_ERROR, "execution"),
                };
                (status, kind, e.to_string())
            }
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, "not_found", message),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, "bad_request", message),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, "conflict", message),
            ApiError::Internal(e) => {
                tracing::error!("❌ Internal error: {:#}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "internal", e.to_string())
            }
        };

        (status, Json(json!({ "error": message, "kind": kind }))).into_response()
    }
}
