//! Conversation persistence layer
//!
//! Durable home for conversation turns and adjudication checkpoints.
//! In-memory by default; Postgres when DATABASE_URL is configured.

pub mod postgres;

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::env;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::{Checkpoint, Turn, WorkflowState};
use crate::Result;

pub use postgres::PostgresStore;

/// Trait for conversation persistence
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn save_turn(&self, conversation_id: Uuid, turn: Turn) -> Result<()>;
    async fn load_history(&self, conversation_id: Uuid) -> Result<Vec<Turn>>;
    async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<()>;
    async fn load_checkpoint(&self, conversation_id: Uuid) -> Result<Option<Checkpoint>>;
    async fn delete_checkpoint(&self, conversation_id: Uuid) -> Result<()>;
}

/// In-memory store for development and tests
pub struct InMemoryStore {
    turns: Arc<RwLock<HashMap<Uuid, Vec<Turn>>>>,
    checkpoints: Arc<RwLock<HashMap<Uuid, Checkpoint>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            turns: Arc::new(RwLock::new(HashMap::new())),
            checkpoints: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConversationStore for InMemoryStore {
    async fn save_turn(&self, conversation_id: Uuid, turn: Turn) -> Result<()> {
        let mut turns = self.turns.write().await;
        turns
            .entry(conversation_id)
            .or_insert_with(Vec::new)
            .push(turn);
        Ok(())
    }

    async fn load_history(&self, conversation_id: Uuid) -> Result<Vec<Turn>> {
        let turns = self.turns.read().await;
        Ok(turns.get(&conversation_id).cloned().unwrap_or_default())
    }

    async fn save_checkpoint(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.insert(checkpoint.conversation_id, checkpoint);
        Ok(())
    }

    async fn load_checkpoint(&self, conversation_id: Uuid) -> Result<Option<Checkpoint>> {
        let checkpoints = self.checkpoints.read().await;
        Ok(checkpoints.get(&conversation_id).cloned())
    }

    async fn delete_checkpoint(&self, conversation_id: Uuid) -> Result<()> {
        let mut checkpoints = self.checkpoints.write().await;
        checkpoints.remove(&conversation_id);
        Ok(())
    }
}

/// Compute SHA256 hash of a workflow state for checkpoint integrity
/// Uses zero-copy streaming serialization into hasher
pub fn compute_state_hash(state: &WorkflowState) -> String {
    let mut hasher = Sha256::new();

    // Stream JSON directly into hasher (no intermediate String)
    if serde_json::to_writer(&mut HashWriter(&mut hasher), state).is_err() {
        return String::new();
    }

    hex::encode(hasher.finalize())
}

/// Adapter to allow writing into Sha256 via std::io::Write
struct HashWriter<'a, H: Digest>(&'a mut H);

impl<'a, H: Digest> Write for HashWriter<'a, H> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.update(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// Pick the store backend from the environment. Postgres when a database
/// URL is present and parses; in-memory otherwise.
pub fn store_from_env() -> Arc<dyn ConversationStore> {
    let database_url = env::var("POSTGRES_URL")
        .or_else(|_| env::var("DATABASE_URL"))
        .ok();

    if let Some(url) = database_url {
        match PostgresStore::connect(&url) {
            Ok(store) => {
                info!("Conversation store backend: postgres");
                return Arc::new(store);
            }
            Err(error) => {
                warn!(
                    "Failed to initialize postgres store, falling back to in-memory: {}",
                    error
                );
            }
        }
    }

    info!("Conversation store backend: in-memory");
    Arc::new(InMemoryStore::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::NodeId;

    fn sample_state(conversation_id: Uuid) -> WorkflowState {
        WorkflowState::new(conversation_id, "sample input".to_string(), Vec::new())
    }

    #[tokio::test]
    async fn turns_load_in_insert_order() {
        let store = InMemoryStore::new();
        let conversation_id = Uuid::new_v4();

        store
            .save_turn(conversation_id, Turn::user("first"))
            .await
            .unwrap();
        store
            .save_turn(conversation_id, Turn::agent("second"))
            .await
            .unwrap();

        let history = store.load_history(conversation_id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].text, "first");
        assert_eq!(history[1].text, "second");
    }

    #[tokio::test]
    async fn history_is_scoped_per_conversation() {
        let store = InMemoryStore::new();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();

        store.save_turn(a, Turn::user("for a")).await.unwrap();

        assert_eq!(store.load_history(a).await.unwrap().len(), 1);
        assert!(store.load_history(b).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn checkpoint_round_trips_and_deletes() {
        let store = InMemoryStore::new();
        let conversation_id = Uuid::new_v4();
        let state = sample_state(conversation_id);
        let checkpoint = Checkpoint {
            conversation_id,
            state_hash: compute_state_hash(&state),
            state,
            awaiting: NodeId::Adjudication,
            created_at: chrono::Utc::now(),
        };

        store.save_checkpoint(checkpoint.clone()).await.unwrap();

        let loaded = store
            .load_checkpoint(conversation_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(loaded.state, checkpoint.state);
        assert_eq!(loaded.awaiting, NodeId::Adjudication);
        assert_eq!(loaded.state_hash, compute_state_hash(&loaded.state));

        store.delete_checkpoint(conversation_id).await.unwrap();
        assert!(store
            .load_checkpoint(conversation_id)
            .await
            .unwrap()
            .is_none());
    }

    #[test]
    fn state_hash_is_stable_across_serde_round_trips() {
        let state = sample_state(Uuid::new_v4());
        let json = serde_json::to_string(&state).unwrap();
        let restored: WorkflowState = serde_json::from_str(&json).unwrap();

        assert_eq!(compute_state_hash(&state), compute_state_hash(&restored));
    }

    #[test]
    fn state_hash_tracks_content_changes() {
        let mut state = sample_state(Uuid::new_v4());
        let before = compute_state_hash(&state);

        state.draft = Some("tampered".to_string());

        assert_ne!(before, compute_state_hash(&state));
    }
}
