/// Assistant management REST API endpoints
///
/// CRUD on agent and flow definitions. Every change is validated and
/// hot-reloaded into the registry; running conversations keep their snapshot.

use crate::api::{ApiError, AppState};
use crate::assistant::{loader, types::Assistant};
use axum::{
    extract::{Path, Query, State},
    http::header,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Response for create/update operations
#[derive(Debug, Serialize)]
pub struct AssistantResponse {
    pub id: String,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ExportQuery {
    #[serde(default)]
    pub format: Option<String>,
}

pub fn create_assistant_routes() -> Router<AppState> {
    Router::new()
        .route("/api/assistants", get(list_assistants).post(create_assistant))
        .route(
            "/api/assistants/{id}",
            get(get_assistant).put(update_assistant).delete(delete_assistant),
        )
        .route("/api/assistants/{id}/export", get(export_assistant))
}

/// POST /api/assistants
/// Body: an Agent or Flow definition (`component_type` tagged)
async fn create_assistant(
    State(state): State<AppState>,
    Json(assistant): Json<Assistant>,
) -> Result<Json<AssistantResponse>, ApiError> {
    if assistant.id().is_empty() || assistant.name().is_empty() {
        return Err(ApiError::BadRequest("assistant id and name are required".into()));
    }
    if state.registry.storage().get(assistant.id()).await?.is_some() {
        return Err(ApiError::Conflict(format!("assistant '{}' already exists", assistant.id())));
    }

    let assistant = state.registry.register(assistant).await?;
    tracing::info!("🔥 Created {} '{}' ({})", assistant.kind(), assistant.id(), assistant.name());

    Ok(Json(AssistantResponse {
        id: assistant.id().to_string(),
        message: format!("{} '{}' created successfully", assistant.kind(), assistant.name()),
    }))
}

/// GET /api/assistants
async fn list_assistants(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let assistants = state.registry.storage().list().await?;
    Ok(Json(json!({ "assistants": assistants })))
}

/// GET /api/assistants/{id}
async fn get_assistant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Assistant>, ApiError> {
    let assistant = state
        .registry
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("assistant '{}' not found", id)))?;
    Ok(Json((*assistant).clone()))
}

/// PUT /api/assistants/{id}
async fn update_assistant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(assistant): Json<Assistant>,
) -> Result<Json<AssistantResponse>, ApiError> {
    if assistant.id() != id {
        return Err(ApiError::BadRequest(format!(
            "definition id '{}' does not match '{}'",
            assistant.id(),
            id
        )));
    }
    if state.registry.storage().get(&id).await?.is_none() {
        return Err(ApiError::NotFound(format!("assistant '{}' not found", id)));
    }

    let assistant = state.registry.register(assistant).await?;
    tracing::info!("🔥 Hot-reloaded {} '{}'", assistant.kind(), id);

    Ok(Json(AssistantResponse {
        id,
        message: format!("{} '{}' updated successfully", assistant.kind(), assistant.name()),
    }))
}

/// DELETE /api/assistants/{id}
async fn delete_assistant(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    if state.registry.remove(&id).await? {
        tracing::info!("Deleted assistant: {}", id);
        Ok(Json(json!({ "message": "Assistant deleted successfully" })))
    } else {
        Err(ApiError::NotFound(format!("assistant '{}' not found", id)))
    }
}

/// GET /api/assistants/{id}/export?format=json|yaml
async fn export_assistant(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<ExportQuery>,
) -> Result<Response, ApiError> {
    let format = match query.format.as_deref() {
        None => loader::Format::Json,
        Some(name) => loader::Format::parse(name)
            .ok_or_else(|| ApiError::BadRequest(format!("unsupported export format '{}'", name)))?,
    };
    let assistant = state
        .registry
        .get(&id)
        .ok_or_else(|| ApiError::NotFound(format!("assistant '{}' not found", id)))?;

    let body = loader::to_string(&assistant, format)?;
    Ok(([(header::CONTENT_TYPE, format.content_type())], body).into_response())
}
