//! Support Workflow Orchestrator
//!
//! A production-grade message-routing core for financial customer support:
//! - Screens every inbound message (PII masking, injection detection, limits)
//! - Classifies intent into a closed label set with one bounded re-prompt
//! - Routes to specialist agents; product drafts always pass compliance
//! - Suspends non-compliant drafts behind a durable human-adjudication gate
//! - Persists conversation turns and checkpoints
//!
//! TRAVERSAL:
//! INPUT → GUARDRAIL → CLASSIFY → AGENT → [COMPLIANCE → ADJUDICATION?] → RESPONSE

pub mod api;
pub mod config;
pub mod detectors;
pub mod error;
pub mod llm;
pub mod models;
pub mod nodes;
pub mod orchestrator;
pub mod retrieval;
pub mod routing;
pub mod store;

pub use error::Result;

// Re-export common types
pub use models::*;
pub use orchestrator::{Orchestrator, WorkflowStatistics};
