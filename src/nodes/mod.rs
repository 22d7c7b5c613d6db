//! Workflow nodes
//!
//! The closed set of processing stages. Each node consumes the workflow
//! state and tells the orchestrator how to proceed: advance, halt with a
//! final response, or suspend for human adjudication.

pub mod account;
pub mod adjudication;
pub mod classifier;
pub mod compliance;
pub mod escalation;
pub mod guardrail;
pub mod knowledge;
pub mod product;

use async_trait::async_trait;
use std::future::Future;
use std::time::Duration;
use tracing::warn;

use crate::models::{NodeId, NodeResult, WorkflowState};
use crate::Result;

pub use account::{AccountDirectory, AccountNode, AccountSnapshot, DemoAccountDirectory};
pub use adjudication::AdjudicationNode;
pub use classifier::ClassifierNode;
pub use compliance::ComplianceNode;
pub use escalation::EscalationNode;
pub use guardrail::GuardrailNode;
pub use knowledge::KnowledgeNode;
pub use product::ProductNode;

/// Draft used when a generative collaborator stays down after its retry.
/// The draft is routed onward like any other; for product flows that means
/// it still passes compliance review.
pub const DEGRADED_DRAFT_TEXT: &str =
    "I'm sorry, I wasn't able to fully process your request just now. \
     Please try again shortly, or contact our support team if it's urgent.";

/// Node contract: consume the state, decide what happens next.
#[async_trait]
pub trait WorkflowNode: Send + Sync {
    fn id(&self) -> NodeId;
    async fn handle(&self, state: WorkflowState) -> Result<NodeResult>;
}

/// Retry an idempotent collaborator call once after a short backoff.
pub(crate) async fn call_with_retry<T, F, Fut>(backoff: Duration, operation: F) -> Result<T>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    match operation().await {
        Ok(value) => Ok(value),
        Err(first) => {
            warn!("Collaborator call failed, retrying once: {}", first);
            tokio::time::sleep(backoff).await;
            operation().await
        }
    }
}
