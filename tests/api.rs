//! HTTP API exercised through the router without binding a socket.

use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;
use wayflow::{database, llm::ModelRegistry, server};

async fn app() -> Router {
    let pool = database::in_memory().await.unwrap();
    let state = server::build_state(pool, Arc::new(ModelRegistry::new()), 100)
        .await
        .unwrap();
    server::build_router(state)
}

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut request = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(body) => {
            request = request.header(header::CONTENT_TYPE, "application/json");
            Body::from(body.to_string())
        }
        None => Body::empty(),
    };

    let response = app.clone().oneshot(request.body(body).unwrap()).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or_else(|_| {
        Value::String(String::from_utf8_lossy(&bytes).into_owned())
    });
    (status, value)
}

fn echo_agent() -> Value {
    json!({
        "component_type": "Agent",
        "id": "echo",
        "name": "Echo",
        "system_prompt": "You repeat what {{user_name}} says.",
        "llm": { "type": "scripted", "responses": [
            { "text": "You said something." },
            { "tool_calls": [{ "name": "submit_result", "arguments": { "summary": "done" } }] }
        ]},
        "outputs": [{ "name": "summary", "type": "string" }]
    })
}

#[tokio::test]
async fn health_check_responds() {
    let app = app().await;
    let (status, body) = send(&app, Method::GET, "/healthz", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!("ok"));
}

#[tokio::test]
async fn assistant_crud_and_export() {
    let app = app().await;

    let (status, body) = send(&app, Method::POST, "/api/assistants", Some(echo_agent())).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["id"], "echo");

    let (status, _) = send(&app, Method::POST, "/api/assistants", Some(echo_agent())).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, body) = send(&app, Method::GET, "/api/assistants", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["assistants"].as_array().unwrap().len(), 1);

    let mut renamed = echo_agent();
    renamed["name"] = json!("Echo v2");
    let (status, _) = send(&app, Method::PUT, "/api/assistants/echo", Some(renamed)).await;
    assert_eq!(status, StatusCode::OK);
    let (_, body) = send(&app, Method::GET, "/api/assistants/echo", None).await;
    assert_eq!(body["name"], "Echo v2");
    assert_eq!(body["component_type"], "Agent");

    let (status, body) = send(&app, Method::GET, "/api/assistants/echo/export?format=yaml", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.as_str().unwrap().contains("component_type: Agent"));

    let (status, _) = send(&app, Method::GET, "/api/assistants/echo/export?format=xml", None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(&app, Method::DELETE, "/api/assistants/echo", None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, Method::GET, "/api/assistants/echo", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unsafe_template_is_rejected() {
    let app = app().await;
    let mut agent = echo_agent();
    agent["system_prompt"] = json!("{{user_name.__class__}}");

    let (status, body) = send(&app, Method::POST, "/api/assistants", Some(agent)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    assert_eq!(body["kind"], "security");
}

#[tokio::test]
async fn conversation_lifecycle_over_http() {
    let app = app().await;
    send(&app, Method::POST, "/api/assistants", Some(echo_agent())).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/assistants/echo/conversations",
        Some(json!({ "inputs": { "user_name": "Ada" } })),
    )
    .await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["phase"], "running");
    let id = body["id"].as_str().unwrap().to_string();

    // With no user message yet the agent hands the turn straight to the caller
    let (status, body) = send(&app, Method::POST, &format!("/api/conversations/{}/execute", id), None).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], "user_message_request");
    assert!(body.get("message").is_none());
    assert_eq!(body["phase"], "awaiting_user");

    let (status, body) = send(&app, Method::POST, &format!("/api/conversations/{}/execute", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["kind"], "state");

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/conversations/{}/tool_results", id),
        Some(json!({ "tool_request_id": "nope", "content": 1 })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(
        &app,
        Method::POST,
        &format!("/api/conversations/{}/messages", id),
        Some(json!({ "content": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    // Agent answers in text and hands the turn back
    let (_, body) = send(&app, Method::POST, &format!("/api/conversations/{}/execute", id), None).await;
    assert_eq!(body["status"], "user_message_request");
    assert_eq!(body["message"]["content"], "You said something.");

    send(
        &app,
        Method::POST,
        &format!("/api/conversations/{}/messages", id),
        Some(json!({ "content": "please wrap up" })),
    )
    .await;
    let (_, body) = send(&app, Method::POST, &format!("/api/conversations/{}/execute", id), None).await;
    assert_eq!(body["status"], "finished");
    assert_eq!(body["output_values"], json!({ "summary": "done" }));

    let (status, body) = send(&app, Method::GET, &format!("/api/conversations/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["phase"], "finished");
    let types: Vec<&str> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["message_type"].as_str().unwrap())
        .collect();
    assert_eq!(types, vec!["user", "agent", "user", "tool_request", "tool_result"]);

    let (status, body) = send(&app, Method::GET, "/api/conversations?assistant_id=echo", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body.as_array().unwrap().len(), 1);
    assert_eq!(body[0]["phase"], "finished");
}

#[tokio::test]
async fn unknown_resources_map_to_not_found() {
    let app = app().await;

    let (status, _) = send(&app, Method::GET, "/api/conversations/missing", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        &app,
        Method::POST,
        "/api/assistants/missing/conversations",
        Some(json!({})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn start_with_bad_inputs_is_a_validation_error() {
    let app = app().await;
    send(&app, Method::POST, "/api/assistants", Some(echo_agent())).await;

    let (status, body) = send(
        &app,
        Method::POST,
        "/api/assistants/echo/conversations",
        Some(json!({ "inputs": { "user_name": "Ada", "extra": true } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "validation");
}

#[tokio::test]
async fn unregistered_model_is_a_lookup_error() {
    let app = app().await;
    let mut agent = echo_agent();
    agent["llm"] = json!({ "type": "registered", "model_id": "nope" });

    let (status, body) = send(&app, Method::POST, "/api/assistants", Some(agent)).await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{}", body);
    assert_eq!(body["kind"], "lookup");

    let (status, _) = send(&app, Method::GET, "/api/assistants/echo", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn failed_save_leaves_the_conversation_unchanged() {
    let pool = database::in_memory().await.unwrap();
    let state = server::build_state(pool.clone(), Arc::new(ModelRegistry::new()), 100)
        .await
        .unwrap();
    let app = server::build_router(state);
    send(&app, Method::POST, "/api/assistants", Some(echo_agent())).await;

    let (_, body) = send(
        &app,
        Method::POST,
        "/api/assistants/echo/conversations",
        Some(json!({ "inputs": { "user_name": "Ada" } })),
    )
    .await;
    let id = body["id"].as_str().unwrap().to_string();

    // The row disappears behind the server's back; the cached copy stays
    sqlx::query("DELETE FROM conversations WHERE id = ?")
        .bind(&id)
        .execute(&pool)
        .await
        .unwrap();

    let (status, body) = send(
        &app,
        Method::POST,
        &format!("/api/conversations/{}/messages", id),
        Some(json!({ "content": "hello" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND, "{}", body);

    let (status, body) = send(&app, Method::GET, &format!("/api/conversations/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["messages"], json!([]));
    assert_eq!(body["phase"], "running");
}
