//! Postgres-backed conversation store
//!
//! Schema is created on first use so deployments need no migration step.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use std::sync::Arc;
use tokio::sync::OnceCell;
use uuid::Uuid;

use crate::error::WorkflowError;
use crate::models::{Checkpoint, NodeId, Turn, TurnRole, WorkflowState};
use crate::store::ConversationStore;
use crate::Result;

pub struct PostgresStore {
    pool: PgPool,
    schema_ready: Arc<OnceCell<()>>,
}

impl PostgresStore {
    /// Lazily connect; the pool dials on first query, not here.
    pub fn connect(url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect_lazy(url)
            .map_err(|e| {
                WorkflowError::DatabaseError(format!("Failed to parse database URL: {}", e))
            })?;

        Ok(Self {
            pool,
            schema_ready: Arc::new(OnceCell::new()),
        })
    }

    async fn ensure_schema(&self) -> Result<()> {
        self.schema_ready
            .get_or_try_init(|| async {
                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS conversation_turns (
                      id BIGSERIAL PRIMARY KEY,
                      conversation_id UUID NOT NULL,
                      role TEXT NOT NULL,
                      content TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE INDEX IF NOT EXISTS idx_conversation_turns_scope
                    ON conversation_turns (conversation_id, id);
                    "#,
                )
                .execute(&self.pool)
                .await?;

                sqlx::query(
                    r#"
                    CREATE TABLE IF NOT EXISTS workflow_checkpoints (
                      conversation_id UUID PRIMARY KEY,
                      awaiting TEXT NOT NULL,
                      state JSONB NOT NULL,
                      state_hash TEXT NOT NULL,
                      created_at TIMESTAMPTZ NOT NULL
                    );
                    "#,
                )
                .execute(&self.pool)
                .await?;

                Ok::<(), sqlx::Error>(())
            })
            .await
            .map_err(|e| {
                WorkflowError::DatabaseError(format!(
                    "Failed to initialize conversation store schema: {}",
                    e
                ))
            })?;

        Ok(())
    }

    fn role_to_db(role: TurnRole) -> &'static str {
        match role {
            TurnRole::User => "user",
            TurnRole::Agent => "agent",
            TurnRole::System => "system",
        }
    }

    fn role_from_db(role: &str) -> TurnRole {
        match role.to_lowercase().as_str() {
            "user" => TurnRole::User,
            "agent" => TurnRole::Agent,
            "system" => TurnRole::System,
            _ => TurnRole::User,
        }
    }
}

#[async_trait]
impl ConversationStore for PostgresStore {
    async fn save_turn(&self, conversation_id: Uuid, turn: Turn) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query(
            r#"
            INSERT INTO conversation_turns (conversation_id, role, content, created_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(conversation_id)
        .bind(Self::role_to_db(turn.role))
        .bind(&turn.text)
        .bind(turn.timestamp)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            WorkflowError::DatabaseError(format!("Failed to insert conversation turn: {}", e))
        })?;

        Ok(())
    }

    async fn load_history(&self, conversation_id: Uuid) -> Result<Vec<Turn>> {
        self.ensure_schema().await?;

        let rows = sqlx::query(
            r#"
            SELECT role, content, created_at
            FROM conversation_turns
            WHERE conversation_id = $1
            ORDER BY id ASC
            "#,
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            WorkflowError::DatabaseError(format!("Failed to load conversation history: {}", e))
        })?;

        let mut turns = Vec::with_capacity(rows.len());
        for row in rows {
            let db_role: String = row.try_get("role").unwrap_or_else(|_| "user".to_string());

            turns.push(Turn {
                role: Self::role_from_db(&db_role),
                text: row.try_get("content").unwrap_or_default(),
                timestamp: row
                    .try_get("created_at")
                    .unwrap_or_else(|_| chrono::Utc::now()),
            });
        }

        Ok(turns)
    }

    async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<()> {
        self.ensure_schema().await?;

        let state = serde_json::to_value(&checkpoint.state)?;

        sqlx::query(
            r#"
            INSERT INTO workflow_checkpoints (conversation_id, awaiting, state, state_hash, created_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (conversation_id)
            DO UPDATE SET awaiting = $2, state = $3, state_hash = $4, created_at = $5
            "#,
        )
        .bind(checkpoint.conversation_id)
        .bind(checkpoint.awaiting.as_str())
        .bind(state)
        .bind(&checkpoint.state_hash)
        .bind(checkpoint.created_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            WorkflowError::DatabaseError(format!("Failed to save checkpoint: {}", e))
        })?;

        Ok(())
    }

    async fn load_checkpoint(&self, conversation_id: Uuid) -> Result<Option<Checkpoint>> {
        self.ensure_schema().await?;

        let row = sqlx::query(
            r#"
            SELECT awaiting, state, state_hash, created_at
            FROM workflow_checkpoints
            WHERE conversation_id = $1
            "#,
        )
        .bind(conversation_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            WorkflowError::DatabaseError(format!("Failed to load checkpoint: {}", e))
        })?;

        let Some(row) = row else {
            return Ok(None);
        };

        // A checkpoint that cannot be decoded must surface as corrupted,
        // never as absent.
        let awaiting_name: String = row
            .try_get("awaiting")
            .map_err(|_| WorkflowError::CheckpointCorrupted(conversation_id))?;
        let awaiting = NodeId::from_name(&awaiting_name)
            .ok_or(WorkflowError::CheckpointCorrupted(conversation_id))?;

        let state_value: serde_json::Value = row
            .try_get("state")
            .map_err(|_| WorkflowError::CheckpointCorrupted(conversation_id))?;
        let state: WorkflowState = serde_json::from_value(state_value)
            .map_err(|_| WorkflowError::CheckpointCorrupted(conversation_id))?;

        let state_hash: String = row
            .try_get("state_hash")
            .map_err(|_| WorkflowError::CheckpointCorrupted(conversation_id))?;
        let created_at = row
            .try_get("created_at")
            .unwrap_or_else(|_| chrono::Utc::now());

        Ok(Some(Checkpoint {
            conversation_id,
            state,
            awaiting,
            state_hash,
            created_at,
        }))
    }

    async fn delete_checkpoint(&self, conversation_id: Uuid) -> Result<()> {
        self.ensure_schema().await?;

        sqlx::query("DELETE FROM workflow_checkpoints WHERE conversation_id = $1")
            .bind(conversation_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                WorkflowError::DatabaseError(format!("Failed to delete checkpoint: {}", e))
            })?;

        Ok(())
    }
}
