/// Server setup and initialization
///
/// Wires together storage, the assistant registry, the conversation store,
/// the execution engine and the HTTP routes.

use crate::{
    api::{create_assistant_routes, create_conversation_routes, AppState},
    assistant::{loader, AssistantRegistry, AssistantStorage},
    config::Config,
    conversation::ConversationStore,
    database,
    llm::ModelRegistry,
    runtime::ExecutionEngine,
};
use anyhow::{Context, Result};
use axum::{routing::get, Router};
use sqlx::sqlite::SqlitePool;
use std::{path::Path, sync::Arc};
use tokio::net::TcpListener;

/// Build the shared state on an already-initialised pool
pub async fn build_state(
    pool: SqlitePool,
    models: Arc<ModelRegistry>,
    max_flow_steps: usize,
) -> Result<AppState> {
    tracing::info!("📊 Initializing assistant registry");
    let registry = Arc::new(AssistantRegistry::new(
        AssistantStorage::new(pool.clone()),
        Arc::clone(&models),
    ));
    registry
        .init_from_storage()
        .await
        .context("Failed to load assistants from storage")?;

    tracing::info!("🚀 Initializing execution engine (max {} flow steps)", max_flow_steps);
    let engine = Arc::new(ExecutionEngine::new(models).with_max_flow_steps(max_flow_steps));

    Ok(AppState {
        registry,
        conversations: Arc::new(ConversationStore::new(pool)),
        engine,
    })
}

/// Router with every endpoint mounted on the given state
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(health_check))
        .merge(create_assistant_routes())
        .merge(create_conversation_routes())
        .with_state(state)
}

/// Create the main Axum application with all routes
pub async fn create_app(config: Config) -> Result<Router> {
    tracing::info!("📁 Opening database in {}", config.database.data_dir);
    let pool = database::open(&config.database.data_dir).await?;

    let models = Arc::new(ModelRegistry::new());
    let state = build_state(pool, models, config.runtime.max_flow_steps).await?;

    if let Some(dir) = &config.runtime.assistants_dir {
        register_dir(&state.registry, Path::new(dir)).await?;
    }

    tracing::info!("✅ Application initialized with {} assistants", state.registry.ids().len());
    Ok(build_router(state))
}

/// Register every assistant file found in `dir`
pub async fn register_dir(registry: &AssistantRegistry, dir: &Path) -> Result<usize> {
    tracing::info!("📥 Loading assistants from {}", dir.display());
    let assistants = loader::load_dir(dir)?;
    let count = assistants.len();
    for assistant in assistants {
        let id = assistant.id().to_string();
        registry
            .register(assistant)
            .await
            .with_context(|| format!("Failed to register assistant '{}'", id))?;
    }
    Ok(count)
}

/// Install the fmt subscriber; a second call is a no-op
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .try_init();
}

/// Start the HTTP server with the given configuration
pub async fn start_server(config: Config) -> Result<()> {
    init_tracing();
    tracing::info!("Starting WayFlow server...");

    let app = create_app(config.clone()).await?;

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    tracing::info!("Server listening on http://{}", bind_addr);
    axum::serve(listener, app.into_make_service()).await?;

    Ok(())
}

async fn health_check() -> &'static str {
    "ok"
}
