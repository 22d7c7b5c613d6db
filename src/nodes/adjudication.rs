//! Human-adjudication gate
//!
//! Entered only with a needs_review verdict. The gate suspends the
//! traversal; the orchestrator checkpoints it and later applies the
//! external decision through `resolve`. A resolved workflow is final and
//! can never be suspended again.

use async_trait::async_trait;
use tracing::info;

use crate::error::WorkflowError;
use crate::models::{
    AdjudicationDecision, AdjudicationPhase, ComplianceVerdict, NodeId, NodeResult,
    WorkflowState,
};
use crate::nodes::compliance::{append_disclaimers, assemble_disclaimers};
use crate::nodes::WorkflowNode;
use crate::Result;

#[derive(Debug, Default)]
pub struct AdjudicationNode;

impl AdjudicationNode {
    pub fn new() -> Self {
        Self
    }

    /// Apply an external decision to a suspended state. Returns the updated
    /// state and the final response text; the caller owns persistence.
    pub fn resolve(
        mut state: WorkflowState,
        decision: AdjudicationDecision,
    ) -> Result<(WorkflowState, String)> {
        if state.adjudication != AdjudicationPhase::Suspended || state.terminal {
            return Err(WorkflowError::AdjudicationError(
                "conversation is not awaiting adjudication".to_string(),
            ));
        }

        let draft = state.draft.clone().ok_or_else(|| {
            WorkflowError::InvariantViolation("suspended state lost its draft".to_string())
        })?;

        let text = match decision {
            AdjudicationDecision::Approve => {
                state.compliance = ComplianceVerdict::Approved;
                draft
            }
            AdjudicationDecision::Override { replacement_text } => {
                // The held draft stays rejected on record; only the
                // adjudicator's replacement goes out.
                state.compliance = ComplianceVerdict::Rejected;
                state.draft = Some(replacement_text.clone());
                replacement_text
            }
        };

        let disclaimers = assemble_disclaimers(&text, state.product_type);
        let final_text = append_disclaimers(&text, &disclaimers);

        state.disclaimers = disclaimers;
        state.adjudication = AdjudicationPhase::Resolved;
        state.terminal = true;

        Ok((state, final_text))
    }
}

#[async_trait]
impl WorkflowNode for AdjudicationNode {
    fn id(&self) -> NodeId {
        NodeId::Adjudication
    }

    async fn handle(&self, mut state: WorkflowState) -> Result<NodeResult> {
        if state.adjudication == AdjudicationPhase::Resolved || state.terminal {
            return Err(WorkflowError::InvariantViolation(
                "resolved workflow cannot be suspended again".to_string(),
            ));
        }
        if state.compliance != ComplianceVerdict::NeedsReview {
            return Err(WorkflowError::InvariantViolation(
                "adjudication entered without a needs_review verdict".to_string(),
            ));
        }

        info!(
            conversation_id = %state.conversation_id,
            reasons = ?state.compliance_reasons,
            "Suspending for human adjudication"
        );
        state.adjudication = AdjudicationPhase::Suspended;

        Ok(NodeResult::Suspend { state })
    }
}
