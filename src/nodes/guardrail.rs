//! Guardrail screening stage
//!
//! First node of every traversal. Masks PII, consults the external
//! injection detector, then applies local heuristics. Blocked input halts
//! with a fixed rejection; the classifier never sees it.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::WorkflowConfig;
use crate::detectors::{InjectionDetector, PiiDetector};
use crate::models::{FinalResponse, InjectionRisk, NodeId, NodeResult, WorkflowState};
use crate::nodes::{call_with_retry, WorkflowNode};
use crate::Result;

/// Fixed rejection for blocked input. Never echoes or paraphrases the
/// message that triggered it.
pub const SAFE_REJECTION_TEXT: &str =
    "I'm sorry, but I can't help with that request. If you think this is a \
     mistake, please contact our support team directly.";

/// Heuristic blocklist, matched against the lowercased sanitized text.
/// Runs on every message, and is the only screening layer left when the
/// external detector is down.
const HEURISTIC_BLOCKLIST: &[&str] = &[
    "ignore previous instructions",
    "ignore all previous instructions",
    "system prompt",
    "developer mode",
    "you are now",
    "act as a pirate",
    "forget you are",
    "unrestrained ai",
    "system override",
    "disable_content_filter",
    "base64",
    "encoded string",
    "launder money",
    "money laundering",
    "forge a check",
    "bypass 2fa",
];

pub struct GuardrailNode {
    pii: Arc<dyn PiiDetector>,
    injection: Arc<dyn InjectionDetector>,
    config: Arc<WorkflowConfig>,
}

impl GuardrailNode {
    pub fn new(
        pii: Arc<dyn PiiDetector>,
        injection: Arc<dyn InjectionDetector>,
        config: Arc<WorkflowConfig>,
    ) -> Self {
        Self {
            pii,
            injection,
            config,
        }
    }

    fn heuristic_hit(text: &str) -> Option<&'static str> {
        let lowered = text.to_lowercase();
        HEURISTIC_BLOCKLIST
            .iter()
            .find(|phrase| lowered.contains(*phrase))
            .copied()
    }
}

#[async_trait]
impl WorkflowNode for GuardrailNode {
    fn id(&self) -> NodeId {
        NodeId::Guardrail
    }

    async fn handle(&self, mut state: WorkflowState) -> Result<NodeResult> {
        // Masking first, so nothing downstream (including the detector)
        // ever sees raw PII.
        let mask = self.pii.detect_and_mask(&state.raw_input);
        if !mask.entities_found.is_empty() {
            info!(
                conversation_id = %state.conversation_id,
                entities = ?mask.entities_found,
                "Masked PII in inbound message"
            );
        }
        let sanitized = mask.masked_text;
        state.sanitized_text = Some(sanitized.clone());

        let mut blocked_reason: Option<String> = None;

        match call_with_retry(self.config.retry_backoff, || {
            self.injection.assess(&sanitized)
        })
        .await
        {
            Ok(assessment) => match assessment.risk {
                InjectionRisk::Confirmed => {
                    warn!(
                        conversation_id = %state.conversation_id,
                        categories = ?assessment.categories,
                        "Injection detector confirmed an attack"
                    );
                    blocked_reason = Some("confirmed injection".to_string());
                }
                InjectionRisk::Suspected => {
                    // Suspicion alone does not block; the heuristics below
                    // make the call.
                    warn!(
                        conversation_id = %state.conversation_id,
                        categories = ?assessment.categories,
                        "Injection detector reported suspected risk"
                    );
                }
                InjectionRisk::None => {}
            },
            Err(error) => {
                warn!(
                    conversation_id = %state.conversation_id,
                    "Injection detector unreachable, degrading to heuristics: {}",
                    error
                );
                state.screening_degraded = true;
            }
        }

        if blocked_reason.is_none() {
            if let Some(phrase) = Self::heuristic_hit(&sanitized) {
                blocked_reason = Some(format!("blocklist phrase: {}", phrase));
            } else if sanitized.chars().count() > self.config.max_input_chars {
                blocked_reason = Some("input exceeds maximum length".to_string());
            }
        }

        if let Some(reason) = blocked_reason {
            info!(
                conversation_id = %state.conversation_id,
                reason = %reason,
                "Screening blocked the message"
            );
            return Ok(NodeResult::Halt {
                state,
                response: FinalResponse::new(SAFE_REJECTION_TEXT),
            });
        }

        Ok(NodeResult::Continue {
            state,
            next: NodeId::Classifier,
        })
    }
}
