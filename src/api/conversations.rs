/// Conversation REST API endpoints
///
/// A conversation is started on a registered assistant, then driven by
/// alternating `execute` calls with user messages or tool results. Each
/// handler holds the conversation's lock for the whole mutation, works on a
/// copy, and replaces the cached conversation only once the copy is saved.

use crate::api::{ApiError, AppState};
use crate::conversation::{
    store::{ConversationSummary, SharedConversation},
    Conversation, ConversationPhase, ExecutionStatus, Message, ToolResult,
};
use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    #[serde(default)]
    pub inputs: HashMap<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct UserMessageRequest {
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct ToolResultRequest {
    pub tool_request_id: String,
    pub content: Value,
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub assistant_id: Option<String>,
}

/// Public view of a conversation
#[derive(Debug, Serialize)]
pub struct ConversationView {
    pub id: String,
    pub assistant_id: String,
    pub phase: ConversationPhase,
    pub status: Option<ExecutionStatus>,
    /// Outstanding client tool requests, if any
    pub missing_tool_results: Vec<String>,
    pub messages: Vec<Message>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Conversation> for ConversationView {
    fn from(conversation: &Conversation) -> Self {
        Self {
            id: conversation.id.clone(),
            assistant_id: conversation.assistant.id().to_string(),
            phase: conversation.phase(),
            status: conversation.status.clone(),
            missing_tool_results: conversation.missing_tool_results(),
            messages: conversation.messages.as_slice().to_vec(),
            created_at: conversation.created_at,
            updated_at: conversation.updated_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub conversation_id: String,
    pub phase: ConversationPhase,
    #[serde(flatten)]
    pub status: ExecutionStatus,
    pub execution_time_ms: u64,
}

pub fn create_conversation_routes() -> Router<AppState> {
    Router::new()
        .route("/api/assistants/{id}/conversations", post(start_conversation))
        .route("/api/conversations", get(list_conversations))
        .route("/api/conversations/{id}", get(get_conversation).delete(delete_conversation))
        .route("/api/conversations/{id}/execute", post(execute_conversation))
        .route("/api/conversations/{id}/messages", post(append_user_message))
        .route("/api/conversations/{id}/tool_results", post(append_tool_result))
}

async fn load(state: &AppState, id: &str) -> Result<SharedConversation, ApiError> {
    state
        .conversations
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("conversation '{}' not found", id)))
}

/// POST /api/assistants/{id}/conversations
/// Body: `{"inputs": {...}}`
async fn start_conversation(
    State(state): State<AppState>,
    Path(assistant_id): Path<String>,
    Json(request): Json<StartRequest>,
) -> Result<Json<ConversationView>, ApiError> {
    let assistant = state
        .registry
        .get(&assistant_id)
        .ok_or_else(|| ApiError::NotFound(format!("assistant '{}' not found", assistant_id)))?;

    let conversation = state.engine.start_conversation(&assistant, request.inputs)?;
    let shared = state.conversations.insert(conversation).await?;
    let conversation = shared.lock().await;
    Ok(Json(ConversationView::from(&*conversation)))
}

/// GET /api/conversations?assistant_id=...
async fn list_conversations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let summaries = state.conversations.list(query.assistant_id.as_deref()).await?;
    Ok(Json(summaries))
}

/// GET /api/conversations/{id}
async fn get_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ConversationView>, ApiError> {
    let shared = load(&state, &id).await?;
    let conversation = shared.lock().await;
    Ok(Json(ConversationView::from(&*conversation)))
}

/// DELETE /api/conversations/{id}
async fn delete_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.conversations.delete(&id).await? {
        Ok(Json(serde_json::json!({ "message": "Conversation deleted successfully" })))
    } else {
        Err(ApiError::NotFound(format!("conversation '{}' not found", id)))
    }
}

/// POST /api/conversations/{id}/execute
async fn execute_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ExecuteResponse>, ApiError> {
    let shared = load(&state, &id).await?;
    let mut cached = shared.lock().await;
    let mut conversation = cached.clone();

    let start_time = std::time::Instant::now();
    let status = match state.engine.execute(&mut conversation).await {
        Ok(status) => status,
        Err(e) => {
            tracing::warn!("❌ Execution of conversation {} failed: {}", id, e);
            return Err(e.into());
        }
    };
    state.conversations.save(&conversation).await?;
    let phase = conversation.phase();
    *cached = conversation;

    Ok(Json(ExecuteResponse {
        conversation_id: id,
        phase,
        status,
        execution_time_ms: start_time.elapsed().as_millis() as u64,
    }))
}

/// POST /api/conversations/{id}/messages
/// Body: `{"content": "..."}`
async fn append_user_message(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UserMessageRequest>,
) -> Result<Json<ConversationView>, ApiError> {
    let shared = load(&state, &id).await?;
    let mut cached = shared.lock().await;
    let mut conversation = cached.clone();

    conversation.append_user_message(request.content)?;
    state.conversations.save(&conversation).await?;
    let view = ConversationView::from(&conversation);
    *cached = conversation;
    Ok(Json(view))
}

/// POST /api/conversations/{id}/tool_results
/// Body: `{"tool_request_id": "...", "content": <any JSON>}`
async fn append_tool_result(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<ToolResultRequest>,
) -> Result<Json<ConversationView>, ApiError> {
    let shared = load(&state, &id).await?;
    let mut cached = shared.lock().await;
    let mut conversation = cached.clone();

    conversation.append_tool_result(ToolResult::new(request.tool_request_id, request.content))?;
    state.conversations.save(&conversation).await?;
    let view = ConversationView::from(&conversation);
    *cached = conversation;
    Ok(Json(view))
}
