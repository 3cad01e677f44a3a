/// SQLite database bootstrap
///
/// Opens the runtime database (`{data_dir}/wayflow.db`) and creates the
/// tables for assistant definitions and conversations.

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;

/// Open (or create) the database file under `data_dir`
pub async fn open(data_dir: &str) -> Result<SqlitePool> {
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("Failed to create data directory '{}'", data_dir))?;
    let db_path = Path::new(data_dir).join("wayflow.db");

    tracing::info!("🗄️ Opening database: {}", db_path.display());

    let options = SqliteConnectOptions::new()
        .filename(&db_path)
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(options)
        .await
        .with_context(|| format!("Failed to open database '{}'", db_path.display()))?;

    init_schema(&pool).await?;
    tracing::info!("✅ Database ready: {}", db_path.display());

    Ok(pool)
}

/// Private in-memory database for tests
///
/// A single connection keeps every query on the same in-memory database.
pub async fn in_memory() -> Result<SqlitePool> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .context("Failed to open in-memory database")?;
    init_schema(&pool).await?;
    Ok(pool)
}

/// Create tables and indexes (idempotent)
pub async fn init_schema(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS assistants (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            kind TEXT NOT NULL,
            definition JSON NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS conversations (
            id TEXT PRIMARY KEY,
            assistant_id TEXT NOT NULL,
            phase TEXT NOT NULL,
            state JSON NOT NULL,
            created_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_assistants_name ON assistants(name)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_conversations_assistant ON conversations(assistant_id)",
    )
    .execute(pool)
    .await?;

    Ok(())
}
