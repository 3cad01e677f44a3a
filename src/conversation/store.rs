/// Conversation persistence
///
/// Conversations are cached in memory behind one `tokio::sync::Mutex` each,
/// so only one `execute()` runs per conversation at a time, and written to
/// SQLite as JSON after every mutation. Cache misses load lazily. Rows are
/// created once by `insert`; `save` only updates, so a deleted conversation
/// is never written back.

use crate::conversation::Conversation;
use crate::error::WayflowError;
use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::{sqlite::SqlitePool, Row};
use std::{collections::HashMap, sync::Arc};
use tokio::sync::{Mutex, RwLock};

pub type SharedConversation = Arc<Mutex<Conversation>>;

#[derive(Debug)]
pub struct ConversationStore {
    pool: SqlitePool,
    cache: RwLock<HashMap<String, SharedConversation>>,
}

/// Listing entry
#[derive(Debug, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub assistant_id: String,
    pub phase: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ConversationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Persist a new conversation and make it available to `get`
    pub async fn insert(&self, conversation: Conversation) -> Result<SharedConversation> {
        let (phase, state_json) = encode(&conversation)?;
        sqlx::query(
            r#"
            INSERT INTO conversations (id, assistant_id, phase, state, created_at, updated_at)
            VALUES (?, ?, ?, ?, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)
            "#,
        )
        .bind(&conversation.id)
        .bind(conversation.assistant.id())
        .bind(&phase)
        .bind(&state_json)
        .execute(&self.pool)
        .await?;

        let id = conversation.id.clone();
        let shared = Arc::new(Mutex::new(conversation));
        self.cache.write().await.insert(id.clone(), Arc::clone(&shared));
        tracing::info!("🗂️ Stored conversation {}", id);
        Ok(shared)
    }

    /// Cached conversation, loading it from the database on a miss
    pub async fn get(&self, id: &str) -> Result<Option<SharedConversation>> {
        {
            let cache = self.cache.read().await;
            if let Some(conversation) = cache.get(id) {
                return Ok(Some(Arc::clone(conversation)));
            }
        }

        let mut cache = self.cache.write().await;
        // Another task may have loaded it meanwhile
        if let Some(conversation) = cache.get(id) {
            return Ok(Some(Arc::clone(conversation)));
        }

        let row = sqlx::query("SELECT state FROM conversations WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else {
            return Ok(None);
        };

        let state_json: String = row.get("state");
        let conversation: Conversation = serde_json::from_str(&state_json)
            .with_context(|| format!("Corrupt conversation record '{}'", id))?;
        tracing::debug!("📥 Loaded conversation {} from storage", id);

        let shared = Arc::new(Mutex::new(conversation));
        cache.insert(id.to_string(), Arc::clone(&shared));
        Ok(Some(shared))
    }

    /// Write the current state of a stored conversation
    pub async fn save(&self, conversation: &Conversation) -> Result<()> {
        let (phase, state_json) = encode(conversation)?;
        let result = sqlx::query(
            "UPDATE conversations SET phase = ?, state = ?, updated_at = CURRENT_TIMESTAMP WHERE id = ?",
        )
        .bind(&phase)
        .bind(&state_json)
        .bind(&conversation.id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(WayflowError::ConversationNotFound(conversation.id.clone()).into());
        }
        Ok(())
    }

    pub async fn list(&self, assistant_id: Option<&str>) -> Result<Vec<ConversationSummary>> {
        let rows = match assistant_id {
            Some(assistant_id) => {
                sqlx::query(
                    "SELECT id, assistant_id, phase, created_at, updated_at FROM conversations \
                     WHERE assistant_id = ? ORDER BY updated_at DESC",
                )
                .bind(assistant_id)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, assistant_id, phase, created_at, updated_at FROM conversations \
                     ORDER BY updated_at DESC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows
            .into_iter()
            .map(|row| ConversationSummary {
                id: row.get("id"),
                assistant_id: row.get("assistant_id"),
                phase: row.get("phase"),
                created_at: row.get("created_at"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Drop a conversation from the database and the cache.
    ///
    /// Waits for the cached conversation's lock, so a mutation in progress
    /// finishes first and any later `save` fails.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let cached = self.cache.read().await.get(id).cloned();
        let _guard = match &cached {
            Some(shared) => Some(shared.lock().await),
            None => None,
        };

        let result = sqlx::query("DELETE FROM conversations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        self.cache.write().await.remove(id);

        tracing::info!("🗑️ Deleted conversation {}", id);
        Ok(result.rows_affected() > 0)
    }

    /// Forget cached entries (next `get` reloads from the database)
    pub async fn evict_all(&self) {
        self.cache.write().await.clear();
    }
}

/// Phase label and JSON snapshot stored for a conversation
fn encode(conversation: &Conversation) -> Result<(String, String)> {
    let state_json = serde_json::to_string(conversation)?;
    let phase = serde_json::to_value(conversation.phase())?
        .as_str()
        .unwrap_or_default()
        .to_string();
    Ok((phase, state_json))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assistant::types::{Assistant, ControlFlowEdge, Flow, Step, StepKind};
    use crate::conversation::ConversationPhase;

    fn flow() -> Assistant {
        Assistant::Flow(Flow {
            id: "noop".into(),
            name: "Noop".into(),
            description: String::new(),
            start_step: "start".into(),
            steps: vec![
                Step::new("start", StepKind::Start { inputs: vec![] }),
                Step::new("end", StepKind::Complete),
            ],
            control_flow_edges: vec![ControlFlowEdge::new("start", "end")],
            outputs: vec![],
        })
    }

    #[tokio::test]
    async fn conversations_survive_cache_eviction() {
        let pool = crate::database::in_memory().await.unwrap();
        let store = ConversationStore::new(pool);

        let conversation = Conversation::new(flow(), HashMap::new());
        let id = conversation.id.clone();
        let shared = store.insert(conversation).await.unwrap();
        shared.lock().await.append_user_message("seed").unwrap();
        {
            let guard = shared.lock().await;
            store.save(&guard).await.unwrap();
        }

        store.evict_all().await;
        let reloaded = store.get(&id).await.unwrap().unwrap();
        let reloaded = reloaded.lock().await;
        assert_eq!(reloaded.messages.len(), 1);
        assert_eq!(reloaded.phase(), ConversationPhase::Running);

        let listed = store.list(Some("noop")).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].phase, "running");
        assert!(store.get("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_waits_for_holder_and_blocks_later_saves() {
        let pool = crate::database::in_memory().await.unwrap();
        let store = Arc::new(ConversationStore::new(pool));

        let conversation = Conversation::new(flow(), HashMap::new());
        let id = conversation.id.clone();
        let shared = store.insert(conversation).await.unwrap();

        let mut guard = shared.lock().await;
        let deleting = tokio::spawn({
            let store = Arc::clone(&store);
            let id = id.clone();
            async move { store.delete(&id).await }
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!deleting.is_finished());

        guard.append_user_message("late").unwrap();
        store.save(&guard).await.unwrap();
        drop(guard);
        assert!(deleting.await.unwrap().unwrap());

        // A handle obtained before the delete cannot write the row back
        let err = store.save(&*shared.lock().await).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<WayflowError>(),
            Some(WayflowError::ConversationNotFound(missing)) if missing == &id
        ));
        assert!(store.get(&id).await.unwrap().is_none());
        assert!(store.list(None).await.unwrap().is_empty());
        assert!(!store.delete(&id).await.unwrap());
    }
}
