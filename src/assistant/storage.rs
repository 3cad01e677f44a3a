/// SQLite persistence layer for assistant definitions
///
/// Definitions are stored as JSON with indexed lookup fields.

use crate::assistant::types::Assistant;
use anyhow::Result;
use sqlx::{sqlite::SqlitePool, Row};
use std::collections::HashMap;

#[derive(Debug, Clone)]
pub struct AssistantStorage {
    pool: SqlitePool,
}

impl AssistantStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Store a new assistant or replace an existing one
    pub async fn save(&self, assistant: &Assistant) -> Result<()> {
        let definition_json = serde_json::to_string(assistant)?;

        sqlx::query(
            r#"
            INSERT INTO assistants (id, name, kind, definition, updated_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(id) DO UPDATE SET
                name = excluded.name,
                kind = excluded.kind,
                definition = excluded.definition,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(assistant.id())
        .bind(assistant.name())
        .bind(assistant.kind())
        .bind(&definition_json)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<Assistant>> {
        let row = sqlx::query("SELECT definition FROM assistants WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => {
                let definition_json: String = row.get("definition");
                Ok(Some(serde_json::from_str(&definition_json)?))
            }
            None => Ok(None),
        }
    }

    pub async fn list(&self) -> Result<Vec<AssistantMetadata>> {
        let rows = sqlx::query(
            "SELECT id, name, kind, created_at, updated_at FROM assistants ORDER BY updated_at DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| AssistantMetadata {
                id: row.get("id"),
                name: row.get("name"),
                kind: row.get("kind"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// All definitions keyed by id, for registry start-up
    pub async fn load_all(&self) -> Result<HashMap<String, Assistant>> {
        let rows = sqlx::query("SELECT id, definition FROM assistants")
            .fetch_all(&self.pool)
            .await?;

        let mut assistants = HashMap::new();
        for row in rows {
            let id: String = row.get("id");
            let definition_json: String = row.get("definition");
            assistants.insert(id, serde_json::from_str(&definition_json)?);
        }

        Ok(assistants)
    }

    pub async fn delete(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM assistants WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}

/// Assistant listing entry
#[derive(Debug, serde::Serialize)]
pub struct AssistantMetadata {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub created_at: String,
    pub updated_at: String,
}
