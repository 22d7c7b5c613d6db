//! Error types for the support workflow orchestrator

use thiserror::Error;
use uuid::Uuid;

/// Result type alias for workflow operations
pub type Result<T> = std::result::Result<T, WorkflowError>;

#[derive(Error, Debug)]
pub enum WorkflowError {

    // =============================
    // Core Pipeline Errors
    // =============================

    #[error("Screening error: {0}")]
    ScreeningError(String),

    #[error("Classification error: {0}")]
    ClassificationError(String),

    #[error("Agent error: {0}")]
    AgentError(String),

    #[error("Compliance error: {0}")]
    ComplianceError(String),

    #[error("Adjudication error: {0}")]
    AdjudicationError(String),

    #[error("State persistence error: {0}")]
    StateError(String),

    #[error("LLM error: {0}")]
    LlmError(String),

    #[error("Retrieval error: {0}")]
    RetrievalError(String),

    #[error("Detection error: {0}")]
    DetectionError(String),

    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Unknown error: {0}")]
    Unknown(String),

    // =============================
    // Traversal Control Errors
    // =============================

    #[error("Conversation {0} already has a traversal in flight")]
    ConversationBusy(Uuid),

    #[error("No checkpoint found for conversation {0}")]
    CheckpointNotFound(Uuid),

    #[error("Checkpoint for conversation {0} failed integrity verification")]
    CheckpointCorrupted(Uuid),

    #[error("Internal invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Traversal cancelled at node boundary")]
    Cancelled,

    #[error("Collaborator call timed out: {0}")]
    Timeout(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("UUID parse error: {0}")]
    UuidError(#[from] uuid::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
