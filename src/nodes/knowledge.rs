//! Knowledge node
//!
//! Two-tier answering: a curated FAQ first, then retrieval-grounded
//! generation. The generative call only ever sees retrieved context; with
//! no relevant fragments it is skipped entirely.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::WorkflowConfig;
use crate::llm::LlmClient;
use crate::models::{FinalResponse, Fragment, NodeId, NodeResult, WorkflowState};
use crate::nodes::{call_with_retry, WorkflowNode, DEGRADED_DRAFT_TEXT};
use crate::retrieval::VectorIndex;
use crate::Result;

/// Reply when nothing retrievable is close enough to ground an answer.
pub const UNGROUNDED_TEXT: &str =
    "I wasn't able to find reliable information to answer that, and I'd \
     rather not guess. Our support team can help you directly.";

struct FaqEntry {
    question: &'static str,
    keywords: &'static [&'static str],
    answer: &'static str,
}

const FAQ_ENTRIES: &[FaqEntry] = &[
    FaqEntry {
        question: "how do i open an account",
        keywords: &["open", "account", "new", "create", "start", "join"],
        answer: "Opening an account takes about 10 minutes:\n\
                 1. Download our mobile app or visit our website\n\
                 2. Provide your personal details and a photo ID\n\
                 3. Complete the identity check\n\
                 4. Accept the terms and pick your account type\n\
                 5. Your account is ready to use straight away\n\
                 Your card arrives within 3-5 working days.",
    },
    FaqEntry {
        question: "how do i contact support",
        keywords: &["contact", "support", "phone", "call", "reach", "speak", "human"],
        answer: "You can reach our support team:\n\
                 • Phone: 0800 123 4567, 8am-8pm, 7 days a week\n\
                 • In-app chat: 24/7\n\
                 • Email: support@example-bank.co.uk\n\
                 For lost or stolen cards the emergency line is open around the clock.",
    },
    FaqEntry {
        question: "what fees do you charge",
        keywords: &["fees", "fee", "charge", "charges", "cost", "costs"],
        answer: "Everyday banking is fee-free:\n\
                 • No monthly account fee\n\
                 • No fees on UK card payments\n\
                 • Free UK bank transfers\n\
                 International payments cost £10, and card use abroad carries a \
                 2.99% conversion charge.",
    },
    FaqEntry {
        question: "what are your interest rates",
        keywords: &["interest", "rate", "rates", "aer", "apr"],
        answer: "Our current rates:\n\
                 • Instant access savings: 4.5% AER\n\
                 • Fixed rate bonds: 5.1% AER (1 year), 4.8% AER (2 year)\n\
                 • Credit cards: representative 21.9% APR\n\
                 • Mortgages: from 3.99% APR\n\
                 Rates are variable unless stated otherwise.",
    },
    FaqEntry {
        question: "is my money safe",
        keywords: &["safe", "safety", "security", "secure", "protected", "fscs", "protection"],
        answer: "Yes. Eligible deposits are protected up to £85,000 by the Financial \
                 Services Compensation Scheme (FSCS). We also use end-to-end encryption, \
                 biometric login and real-time fraud monitoring.",
    },
    FaqEntry {
        question: "what can the mobile app do",
        keywords: &["app", "mobile", "features"],
        answer: "The mobile app lets you:\n\
                 • Check balances and transactions in real time\n\
                 • Freeze and unfreeze your cards instantly\n\
                 • Set budgets and savings goals\n\
                 • Pay people and manage standing orders\n\
                 • Chat with support 24/7.",
    },
];

pub struct KnowledgeNode {
    llm: Arc<dyn LlmClient>,
    index: Arc<dyn VectorIndex>,
    config: Arc<WorkflowConfig>,
}

impl KnowledgeNode {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        index: Arc<dyn VectorIndex>,
        config: Arc<WorkflowConfig>,
    ) -> Self {
        Self { llm, index, config }
    }

    fn normalize(text: &str) -> String {
        text.to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect::<String>()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Tier 1: exact question match, else at least two overlapping keywords.
    fn faq_answer(question: &str) -> Option<&'static str> {
        let normalized = Self::normalize(question);

        if let Some(entry) = FAQ_ENTRIES.iter().find(|e| e.question == normalized) {
            return Some(entry.answer);
        }

        let words: HashSet<&str> = normalized.split(' ').collect();
        FAQ_ENTRIES
            .iter()
            .find(|entry| {
                entry
                    .keywords
                    .iter()
                    .filter(|kw| words.contains(**kw))
                    .count()
                    >= 2
            })
            .map(|entry| entry.answer)
    }

    fn context_block(fragments: &[Fragment]) -> String {
        let mut context = String::new();
        for (i, fragment) in fragments.iter().enumerate() {
            context.push_str(&format!("[{}] {}", i + 1, fragment.text));
            if let Some(source) = &fragment.source {
                context.push_str(&format!(" (source: {})", source));
            }
            context.push_str("\n\n");
        }
        context
    }
}

#[async_trait]
impl WorkflowNode for KnowledgeNode {
    fn id(&self) -> NodeId {
        NodeId::Knowledge
    }

    async fn handle(&self, mut state: WorkflowState) -> Result<NodeResult> {
        let question = state.sanitized()?.to_string();

        if let Some(answer) = Self::faq_answer(&question) {
            debug!(conversation_id = %state.conversation_id, "FAQ answered without retrieval");
            state.draft = Some(answer.to_string());
            return Ok(NodeResult::Halt {
                state,
                response: FinalResponse::new(answer),
            });
        }

        let fragments = call_with_retry(self.config.retry_backoff, || {
            self.index.nearest(&question, self.config.retrieval_k)
        })
        .await?;

        let relevant: Vec<Fragment> = fragments
            .into_iter()
            .filter(|f| f.distance <= self.config.max_fragment_distance)
            .collect();

        if relevant.is_empty() {
            debug!(
                conversation_id = %state.conversation_id,
                "No fragment within the relevance cutoff, answering ungrounded-safe"
            );
            state.draft = Some(UNGROUNDED_TEXT.to_string());
            return Ok(NodeResult::Halt {
                state,
                response: FinalResponse::new(UNGROUNDED_TEXT),
            });
        }

        let prompt = format!(
            "CONTEXT:\n{}CUSTOMER QUESTION: \"{}\"\n\n\
             Answer using only the numbered context above. If the context does \
             not contain the answer, say you don't have that information.",
            Self::context_block(&relevant),
            question
        );

        let reply = match call_with_retry(self.config.retry_backoff, || {
            self.llm.complete(&prompt, &self.config.prompts.knowledge_system)
        })
        .await
        {
            Ok(completion) => completion.text,
            Err(error) => {
                warn!(
                    conversation_id = %state.conversation_id,
                    "Grounded generation failed after retry, degrading: {}",
                    error
                );
                DEGRADED_DRAFT_TEXT.to_string()
            }
        };

        state.draft = Some(reply.clone());
        Ok(NodeResult::Halt {
            state,
            response: FinalResponse::new(reply),
        })
    }
}
