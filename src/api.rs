//! REST API Server for the Support Workflow Orchestrator
//!
//! Exposes message processing and adjudication over HTTP
//! Integrates with agent-desk and supervisor UIs

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;

use crate::error::WorkflowError;
use crate::models::AdjudicationDecision;
use crate::orchestrator::Orchestrator;

/// =============================
/// Request Models
/// =============================

#[derive(Debug, Deserialize)]
pub struct ProcessRequest {
    /// Accepts a UUID or any stable external key (chat id, ticket id).
    pub conversation_id: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub struct ResolveRequest {
    pub conversation_id: String,
    #[serde(flatten)]
    pub decision: AdjudicationDecision,
}

/// =============================
/// Response Wrapper
/// =============================

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub timestamp: String,
}

impl ApiResponse {
    pub fn success<T: Serialize>(data: T) -> Self {
        Self {
            success: true,
            data: serde_json::to_value(data).ok(),
            error: None,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message),
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// =============================
/// API State
/// =============================

#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// =============================
/// Helpers — Conversation Keys
/// =============================

fn stable_uuid_from_string(input: &str) -> uuid::Uuid {
    use sha2::{Digest, Sha256};

    let hash = Sha256::digest(input.as_bytes());
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&hash[..16]);

    // Set UUID version (4) and variant (RFC4122) bits.
    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    uuid::Uuid::from_bytes(bytes)
}

fn conversation_uuid(value: &str) -> uuid::Uuid {
    uuid::Uuid::parse_str(value).unwrap_or_else(|_| stable_uuid_from_string(value))
}

/// =============================
/// Error Mapping
/// =============================

fn error_response(error: WorkflowError) -> (StatusCode, Json<ApiResponse>) {
    let (status, message) = match &error {
        WorkflowError::ConversationBusy(_) => (
            StatusCode::CONFLICT,
            "A message for this conversation is already being processed".to_string(),
        ),
        WorkflowError::CheckpointNotFound(_) => (
            StatusCode::NOT_FOUND,
            "No adjudication is pending for this conversation".to_string(),
        ),
        WorkflowError::CheckpointCorrupted(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "The held response failed integrity verification".to_string(),
        ),
        WorkflowError::AdjudicationError(message) => (StatusCode::CONFLICT, message.clone()),
        WorkflowError::Timeout(_) => (
            StatusCode::GATEWAY_TIMEOUT,
            "Processing timed out".to_string(),
        ),
        WorkflowError::Cancelled => (
            StatusCode::SERVICE_UNAVAILABLE,
            "Processing was cancelled".to_string(),
        ),
        // Internal details stay out of client responses.
        WorkflowError::InvariantViolation(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal processing error".to_string(),
        ),
        other => (
            StatusCode::INTERNAL_SERVER_ERROR,
            format!("Message processing failed: {}", other),
        ),
    };
    (status, Json(ApiResponse::error(message)))
}

/// =============================
/// Health Endpoint
/// =============================

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// =============================
/// Message Endpoint
/// =============================

async fn process_message(
    State(state): State<ApiState>,
    Json(req): Json<ProcessRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    if req.message.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(ApiResponse::error("Message must not be empty".into())),
        );
    }

    let conversation_id = match req.conversation_id.as_deref() {
        Some(value) if !value.trim().is_empty() => conversation_uuid(value),
        _ => uuid::Uuid::new_v4(),
    };
    info!(conversation_id = %conversation_id, "Received message request");

    match state
        .orchestrator
        .process_message(conversation_id, &req.message)
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "conversation_id": conversation_id,
                "status": outcome.status,
                "response": outcome.response,
                "intent": outcome.intent,
                "confidence": outcome.confidence,
            }))),
        ),
        Err(e) => error_response(e),
    }
}

/// =============================
/// Adjudication Endpoints
/// =============================

async fn resolve_adjudication(
    State(state): State<ApiState>,
    Json(req): Json<ResolveRequest>,
) -> (StatusCode, Json<ApiResponse>) {
    let conversation_id = conversation_uuid(&req.conversation_id);
    info!(conversation_id = %conversation_id, "Received adjudication decision");

    match state
        .orchestrator
        .resume_adjudication(conversation_id, req.decision)
        .await
    {
        Ok(outcome) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "conversation_id": conversation_id,
                "response": outcome.response,
            }))),
        ),
        Err(e) => error_response(e),
    }
}

async fn pending_adjudications(State(state): State<ApiState>) -> Json<ApiResponse> {
    let pending = state.orchestrator.pending_adjudications().await;
    Json(ApiResponse::success(serde_json::json!({
        "pending": pending,
    })))
}

/// =============================
/// Conversation Endpoints
/// =============================

async fn conversation_history(
    State(state): State<ApiState>,
    Path(id): Path<String>,
) -> (StatusCode, Json<ApiResponse>) {
    let conversation_id = conversation_uuid(&id);

    match state.orchestrator.history(conversation_id).await {
        Ok(turns) => (
            StatusCode::OK,
            Json(ApiResponse::success(serde_json::json!({
                "conversation_id": conversation_id,
                "turns": turns,
            }))),
        ),
        Err(e) => error_response(e),
    }
}

async fn statistics(State(state): State<ApiState>) -> Json<ApiResponse> {
    let stats = state.orchestrator.statistics().await;
    Json(ApiResponse::success(stats))
}

/// =============================
/// Router
/// =============================

pub fn create_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    Router::new()
        .route("/health", get(health))
        .route("/api/v1/messages/process", post(process_message))
        .route("/api/v1/adjudications/resolve", post(resolve_adjudication))
        .route("/api/v1/adjudications/pending", get(pending_adjudications))
        .route("/api/v1/conversations/:id/history", get(conversation_history))
        .route("/api/v1/statistics", get(statistics))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// =============================
/// Server Startup
/// =============================

pub async fn start_server(
    orchestrator: Arc<Orchestrator>,
    port: u16,
) -> std::result::Result<(), Box<dyn std::error::Error>> {
    let router = create_router(orchestrator);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", port)).await?;

    info!("API Server listening on http://0.0.0.0:{}", port);
    info!("Local: http://127.0.0.1:{}", port);

    axum::serve(listener, router).await?;

    Ok(())
}
