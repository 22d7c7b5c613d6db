//! Escalation node
//!
//! Deterministic hand-off to a human team. Priority, team and response
//! window come from keyword assessment; no generative call.

use async_trait::async_trait;
use chrono::Utc;

use crate::models::{FinalResponse, NodeId, NodeResult, WorkflowState};
use crate::nodes::WorkflowNode;
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Priority {
    Urgent,
    High,
    Medium,
    Low,
}

impl Priority {
    fn label(self) -> &'static str {
        match self {
            Priority::Urgent => "urgent",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        }
    }

    fn team(self) -> &'static str {
        match self {
            Priority::Urgent => "Security & Fraud Team",
            Priority::High => "Senior Support Team",
            Priority::Medium => "Support Specialists",
            Priority::Low => "Support Team",
        }
    }

    fn response_window(self) -> &'static str {
        match self {
            Priority::Urgent => "15 minutes",
            Priority::High => "1 hour",
            Priority::Medium => "4 hours",
            Priority::Low => "24 hours",
        }
    }
}

const URGENT_KEYWORDS: &[&str] = &[
    "urgent",
    "emergency",
    "critical",
    "immediate",
    "lost",
    "stolen",
    "fraud",
    "unauthorized",
    "cannot access",
    "locked out",
    "security breach",
];

const HIGH_KEYWORDS: &[&str] = &[
    "complaint",
    "disappointed",
    "unhappy",
    "unacceptable",
    "refused",
    "denied",
    "failed",
    "issue",
    "problem",
    "wrong",
    "error",
    "mistake",
];

const MEDIUM_KEYWORDS: &[&str] = &[
    "help", "question", "need", "want", "prefer", "change", "update", "modify",
];

#[derive(Debug, Default)]
pub struct EscalationNode;

impl EscalationNode {
    pub fn new() -> Self {
        Self
    }

    fn assess_priority(text: &str) -> Priority {
        let lowered = text.to_lowercase();
        let hit = |keywords: &[&str]| keywords.iter().any(|kw| lowered.contains(kw));

        if hit(URGENT_KEYWORDS) {
            Priority::Urgent
        } else if hit(HIGH_KEYWORDS) {
            Priority::High
        } else if hit(MEDIUM_KEYWORDS) {
            Priority::Medium
        } else {
            Priority::Low
        }
    }

    fn reference(state: &WorkflowState) -> String {
        let short = state.conversation_id.simple().to_string()[..8].to_uppercase();
        format!("ESC-{}-{}", short, Utc::now().format("%Y%m%d%H%M"))
    }

    fn render(priority: Priority, reference: &str) -> String {
        let mut reply = format!(
            "I understand, and I've raised this with our {}.\n\n\
             • Reference: {}\n\
             • Priority: {}\n\
             • Expected response: within {}\n\n\
             Please quote the reference if you contact us in the meantime.",
            priority.team(),
            reference,
            priority.label(),
            priority.response_window()
        );

        if priority == Priority::Urgent {
            reply.push_str(
                "\n\nIf a card is lost or stolen, you can freeze it instantly in the app.",
            );
        }

        reply
    }
}

#[async_trait]
impl WorkflowNode for EscalationNode {
    fn id(&self) -> NodeId {
        NodeId::Escalation
    }

    async fn handle(&self, mut state: WorkflowState) -> Result<NodeResult> {
        let priority = Self::assess_priority(state.sanitized()?);
        let reference = Self::reference(&state);
        let reply = Self::render(priority, &reference);

        state.draft = Some(reply.clone());

        Ok(NodeResult::Halt {
            state,
            response: FinalResponse::new(reply),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn sanitized_state(text: &str) -> WorkflowState {
        let mut state = WorkflowState::new(Uuid::new_v4(), text, Vec::new());
        state.sanitized_text = Some(text.to_string());
        state
    }

    async fn reply_for(text: &str) -> String {
        match EscalationNode::new().handle(sanitized_state(text)).await.unwrap() {
            NodeResult::Halt { response, .. } => response.text,
            other => panic!("expected halt, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn fraud_reports_go_to_the_security_team_fastest() {
        let reply = reply_for("Someone made an unauthorized payment, this is fraud!").await;

        assert!(reply.contains("Security & Fraud Team"));
        assert!(reply.contains("15 minutes"));
        assert!(reply.contains("freeze it instantly"));
    }

    #[tokio::test]
    async fn complaints_are_high_priority() {
        let reply = reply_for("I want to make a complaint, this is unacceptable").await;

        assert!(reply.contains("Senior Support Team"));
        assert!(reply.contains("1 hour"));
    }

    #[tokio::test]
    async fn general_requests_for_help_are_medium_priority() {
        let reply = reply_for("I would like some help changing my address").await;

        assert!(reply.contains("Support Specialists"));
        assert!(reply.contains("4 hours"));
    }

    #[tokio::test]
    async fn everything_else_is_low_priority() {
        let reply = reply_for("Good morning").await;

        assert!(reply.contains("Support Team"));
        assert!(reply.contains("24 hours"));
    }

    #[tokio::test]
    async fn every_escalation_carries_a_reference() {
        let reply = reply_for("complaint").await;
        assert!(reply.contains("Reference: ESC-"));
    }

    #[test]
    fn priority_assessment_is_keyword_ordered() {
        // Urgent keywords win even when weaker ones are present too.
        assert_eq!(
            EscalationNode::assess_priority("urgent help with a question"),
            Priority::Urgent
        );
        assert_eq!(
            EscalationNode::assess_priority("a problem with my card"),
            Priority::High
        );
    }
}
