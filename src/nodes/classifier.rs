//! Intent classification node
//!
//! Places the sanitized message into the closed intent set via the
//! generative collaborator. One corrective re-prompt is allowed; a second
//! failure degrades to complaint_escalation rather than erroring.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::WorkflowConfig;
use crate::llm::LlmClient;
use crate::models::{
    IntentLabel, NodeId, NodeResult, Sentiment, TurnRole, WorkflowState,
};
use crate::nodes::WorkflowNode;
use crate::routing::route;
use crate::Result;

pub struct ClassifierNode {
    llm: Arc<dyn LlmClient>,
    config: Arc<WorkflowConfig>,
}

#[derive(Debug, PartialEq)]
struct ParsedClassification {
    intent: IntentLabel,
    confidence: Option<f32>,
    sentiment: Option<Sentiment>,
}

impl ClassifierNode {
    pub fn new(llm: Arc<dyn LlmClient>, config: Arc<WorkflowConfig>) -> Self {
        Self { llm, config }
    }

    /// History block plus the current message, quoted so the model treats it
    /// as data rather than instructions.
    fn build_user_prompt(state: &WorkflowState, window: usize) -> Result<String> {
        let sanitized = state.sanitized()?;

        let mut prompt = String::new();
        let skip = state.turns.len().saturating_sub(window);
        let recent = &state.turns[skip..];

        if !recent.is_empty() {
            prompt.push_str("PREVIOUS CONVERSATION:\n");
            for turn in recent {
                let speaker = match turn.role {
                    TurnRole::User => "Customer",
                    TurnRole::Agent => "Agent",
                    TurnRole::System => "System",
                };
                prompt.push_str(speaker);
                prompt.push_str(": ");
                prompt.push_str(&turn.text);
                prompt.push('\n');
            }
            prompt.push('\n');
        }

        prompt.push_str("CURRENT CUSTOMER MESSAGE: \"");
        prompt.push_str(sanitized);
        prompt.push_str("\"\n\n");

        prompt.push_str(
            "Classify the message into exactly one of these intents:\n\
             - account_data: balances, transactions, statements, personal account details\n\
             - knowledge_general: product information, how-to questions, policies, fees\n\
             - product_acquisition: opening accounts, applying for cards, loans, or mortgages\n\
             - complaint_escalation: complaints, dissatisfaction, requests for a human\n\n\
             Reply in exactly this format:\n\
             INTENT: <label>\n\
             CONFIDENCE: <0.0-1.0>\n\
             SENTIMENT: <positive|neutral|negative>\n\
             EXPLANATION: <brief explanation>",
        );

        Ok(prompt)
    }

    fn parse_reply(reply: &str) -> Option<ParsedClassification> {
        let mut intent = None;
        let mut confidence = None;
        let mut sentiment = None;

        for line in reply.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("INTENT:") {
                intent = IntentLabel::parse(rest);
            } else if let Some(rest) = line.strip_prefix("CONFIDENCE:") {
                confidence = rest.trim().parse::<f32>().ok().map(|c| c.clamp(0.0, 1.0));
            } else if let Some(rest) = line.strip_prefix("SENTIMENT:") {
                sentiment = Sentiment::parse(rest);
            }
        }

        intent.map(|intent| ParsedClassification {
            intent,
            confidence,
            sentiment,
        })
    }

    /// One classification attempt. `None` means the reply was unusable,
    /// whether malformed or a transport failure.
    async fn attempt(&self, system: &str, user_prompt: &str) -> Option<(ParsedClassification, f32)> {
        match self.llm.complete(user_prompt, system).await {
            Ok(completion) => {
                let model_confidence = completion.confidence;
                Self::parse_reply(&completion.text).map(|parsed| (parsed, model_confidence))
            }
            Err(error) => {
                warn!("Classifier completion failed: {}", error);
                None
            }
        }
    }
}

#[async_trait]
impl WorkflowNode for ClassifierNode {
    fn id(&self) -> NodeId {
        NodeId::Classifier
    }

    async fn handle(&self, mut state: WorkflowState) -> Result<NodeResult> {
        let user_prompt = Self::build_user_prompt(&state, self.config.history_window)?;

        let mut outcome = self
            .attempt(&self.config.prompts.classifier_system, &user_prompt)
            .await;

        if outcome.is_none() {
            debug!(
                conversation_id = %state.conversation_id,
                "First classification unusable, issuing corrective re-prompt"
            );
            outcome = self
                .attempt(&self.config.prompts.classifier_reprompt, &user_prompt)
                .await;
        }

        match outcome {
            Some((parsed, model_confidence)) => {
                state.intent = Some(parsed.intent);
                state.intent_confidence =
                    Some(parsed.confidence.unwrap_or(model_confidence));
                state.sentiment = parsed.sentiment;
            }
            None => {
                warn!(
                    conversation_id = %state.conversation_id,
                    "Classification failed twice, degrading to escalation"
                );
                state.intent = Some(IntentLabel::ComplaintEscalation);
                state.intent_confidence = Some(0.0);
                state.sentiment = None;
            }
        }

        // intent was just set on every path above
        let intent = state.intent.ok_or_else(|| {
            crate::error::WorkflowError::InvariantViolation(
                "classifier finished without an intent".to_string(),
            )
        })?;

        Ok(NodeResult::Continue {
            state,
            next: route(intent),
        })
    }
}
