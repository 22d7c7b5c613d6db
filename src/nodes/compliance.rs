//! Compliance review node
//!
//! Reviews product drafts before they reach the customer: denylist scan
//! first, then a generative policy check, then deterministic disclaimer
//! assembly. Fails closed; a draft this node cannot clear goes to human
//! adjudication, never to the customer.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::WorkflowConfig;
use crate::error::WorkflowError;
use crate::llm::LlmClient;
use crate::models::{
    ComplianceVerdict, FinalResponse, NodeId, NodeResult, ProductType, WorkflowState,
};
use crate::nodes::{call_with_retry, WorkflowNode};
use crate::Result;

/// Phrases a regulated draft may never assert, matched on word boundaries.
const PROHIBITED_PHRASES: &[&str] = &[
    "guaranteed",
    "risk-free",
    "no risk",
    "can't lose",
    "zero risk",
    "100% safe",
    "definitely",
    "promise",
];

const INVESTMENT_DISCLAIMER: &str =
    "Investments can go down as well as up, and you may get back less than you put in.";
const LOAN_DISCLAIMER: &str = "Subject to status and affordability assessment.";
const CREDIT_DISCLAIMER: &str = "Representative APR - your rate may differ.";
const SAVINGS_DISCLAIMER: &str = "Interest rates are variable and subject to change.";
const GENERAL_DISCLAIMER: &str =
    "This is product information, not financial advice. Please consider whether a \
     product is right for your circumstances.";
const DEBT_ADVICE_LINE: &str =
    "We understand this may be a difficult situation. Free debt advice is available \
     from MoneyHelper or StepChange.";

const SENSITIVE_TOPICS: &[&str] = &[
    "debt",
    "bankruptcy",
    "foreclosure",
    "repossession",
    "default",
    "arrears",
];

pub struct ComplianceNode {
    llm: Arc<dyn LlmClient>,
    config: Arc<WorkflowConfig>,
}

impl ComplianceNode {
    pub fn new(llm: Arc<dyn LlmClient>, config: Arc<WorkflowConfig>) -> Self {
        Self { llm, config }
    }

    fn build_prompt(draft: &str) -> String {
        format!(
            "DRAFT CUSTOMER RESPONSE:\n\"{}\"\n\n\
             Review the draft against the principles above. Reply exactly in this format:\n\
             COMPLIANT: <YES or NO>\n\
             ISSUES: <comma-separated or NONE>\n\
             WARNINGS: <comma-separated or NONE>\n\
             SUGGESTIONS: <one line>",
            draft
        )
    }

    fn parse_verdict(reply: &str) -> Option<(bool, Vec<String>)> {
        let mut compliant = None;
        let mut issues = Vec::new();

        for line in reply.lines() {
            let line = line.trim();
            if let Some(rest) = line.strip_prefix("COMPLIANT:") {
                match rest.trim().to_uppercase().as_str() {
                    "YES" => compliant = Some(true),
                    "NO" => compliant = Some(false),
                    _ => {}
                }
            } else if let Some(rest) = line.strip_prefix("ISSUES:") {
                issues = rest
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("none"))
                    .collect();
            }
        }

        compliant.map(|c| (c, issues))
    }

    fn needs_review(
        mut state: WorkflowState,
        reasons: Vec<String>,
    ) -> Result<NodeResult> {
        warn!(
            conversation_id = %state.conversation_id,
            reasons = ?reasons,
            "Draft held for human adjudication"
        );
        state.compliance = ComplianceVerdict::NeedsReview;
        state.compliance_reasons = reasons;
        Ok(NodeResult::Continue {
            state,
            next: NodeId::Adjudication,
        })
    }
}

#[async_trait]
impl WorkflowNode for ComplianceNode {
    fn id(&self) -> NodeId {
        NodeId::Compliance
    }

    async fn handle(&self, mut state: WorkflowState) -> Result<NodeResult> {
        let draft = state.draft.clone().ok_or_else(|| {
            WorkflowError::InvariantViolation(
                "compliance review entered without a draft".to_string(),
            )
        })?;

        let hits = denylist_hits(&draft);
        if !hits.is_empty() {
            return Self::needs_review(state, hits);
        }

        let prompt = Self::build_prompt(&draft);
        let verdict = call_with_retry(self.config.retry_backoff, || {
            self.llm
                .complete(&prompt, &self.config.prompts.compliance_system)
        })
        .await;

        let completion = match verdict {
            Ok(completion) => completion,
            Err(error) => {
                warn!(
                    conversation_id = %state.conversation_id,
                    "Policy check unreachable, failing closed: {}",
                    error
                );
                return Self::needs_review(
                    state,
                    vec!["policy check unavailable".to_string()],
                );
            }
        };

        match Self::parse_verdict(&completion.text) {
            Some((true, _)) => {
                let disclaimers = assemble_disclaimers(&draft, state.product_type);
                let final_text = append_disclaimers(&draft, &disclaimers);

                info!(
                    conversation_id = %state.conversation_id,
                    disclaimers = disclaimers.len(),
                    "Draft approved"
                );
                state.compliance = ComplianceVerdict::Approved;
                state.disclaimers = disclaimers;

                Ok(NodeResult::Halt {
                    state,
                    response: FinalResponse::new(final_text),
                })
            }
            Some((false, issues)) => {
                let reasons = if issues.is_empty() {
                    vec!["policy check flagged the draft".to_string()]
                } else {
                    issues
                };
                Self::needs_review(state, reasons)
            }
            None => Self::needs_review(
                state,
                vec!["policy check returned an unusable verdict".to_string()],
            ),
        }
    }
}

//
// ================= Denylist =================
//

fn word_bounded(lowered: &str, start: usize, end: usize) -> bool {
    let before_ok = lowered[..start]
        .chars()
        .next_back()
        .map_or(true, |c| !c.is_alphanumeric());
    let after_ok = lowered[end..]
        .chars()
        .next()
        .map_or(true, |c| !c.is_alphanumeric());
    before_ok && after_ok
}

/// "not guaranteed" and "no loan is guaranteed" are not violations; look at
/// up to three preceding words for the negation.
fn negated_before(lowered: &str, index: usize) -> bool {
    let preceding: Vec<&str> = lowered[..index].split_whitespace().rev().take(3).collect();
    matches!(
        preceding.first(),
        Some(&"not") | Some(&"never") | Some(&"isn't") | Some(&"aren't")
    ) || preceding.contains(&"no")
}

pub(crate) fn denylist_hits(draft: &str) -> Vec<String> {
    let lowered = draft.to_lowercase();
    let mut hits = Vec::new();

    for phrase in PROHIBITED_PHRASES {
        let mut offending = false;
        let mut start = 0;
        while let Some(pos) = lowered[start..].find(phrase) {
            let abs = start + pos;
            let end = abs + phrase.len();
            if word_bounded(&lowered, abs, end) && !negated_before(&lowered, abs) {
                offending = true;
                break;
            }
            start = end;
        }
        if offending {
            hits.push(format!("prohibited phrase: {}", phrase));
        }
    }

    hits
}

//
// ================= Disclaimers =================
//

fn product_disclaimer(product_type: ProductType) -> &'static str {
    match product_type {
        ProductType::Investment => INVESTMENT_DISCLAIMER,
        ProductType::Loan => LOAN_DISCLAIMER,
        ProductType::Credit => CREDIT_DISCLAIMER,
        ProductType::Savings => SAVINGS_DISCLAIMER,
    }
}

fn push_unique(list: &mut Vec<String>, disclaimer: &str) {
    if !list.iter().any(|d| d == disclaimer) {
        list.push(disclaimer.to_string());
    }
}

/// Deterministic disclaimer selection: recorded product type, content
/// keywords, then sensitive topics. Same input always yields the same list,
/// first occurrence wins on duplicates, and the list is never empty.
pub fn assemble_disclaimers(draft: &str, product_type: Option<ProductType>) -> Vec<String> {
    let lowered = draft.to_lowercase();
    let mut disclaimers = Vec::new();

    if let Some(product_type) = product_type {
        push_unique(&mut disclaimers, product_disclaimer(product_type));
    }

    if ["invest", "return", "profit"].iter().any(|kw| lowered.contains(kw)) {
        push_unique(&mut disclaimers, INVESTMENT_DISCLAIMER);
    }
    if ["loan", "borrow", "mortgage"].iter().any(|kw| lowered.contains(kw)) {
        push_unique(&mut disclaimers, LOAN_DISCLAIMER);
    }
    if ["credit", "apr", "interest rate"].iter().any(|kw| lowered.contains(kw)) {
        push_unique(&mut disclaimers, CREDIT_DISCLAIMER);
    }

    if SENSITIVE_TOPICS.iter().any(|topic| lowered.contains(topic)) {
        push_unique(&mut disclaimers, DEBT_ADVICE_LINE);
    }

    if disclaimers.is_empty() {
        disclaimers.push(GENERAL_DISCLAIMER.to_string());
    }

    disclaimers
}

pub fn append_disclaimers(draft: &str, disclaimers: &[String]) -> String {
    if disclaimers.is_empty() {
        return draft.to_string();
    }

    let mut text = String::from(draft);
    text.push_str("\n\nImportant information:");
    for disclaimer in disclaimers {
        text.push_str("\n• ");
        text.push_str(disclaimer);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlm, MockReply};
    use uuid::Uuid;

    const APPROVING_REPLY: &str = "COMPLIANT: YES\nISSUES: NONE\nWARNINGS: NONE\nSUGGESTIONS: none";

    fn node(llm: MockLlm) -> ComplianceNode {
        ComplianceNode::new(Arc::new(llm), Arc::new(WorkflowConfig::default()))
    }

    fn state_with_draft(draft: &str, product_type: Option<ProductType>) -> WorkflowState {
        let mut state = WorkflowState::new(Uuid::new_v4(), "customer message", Vec::new());
        state.sanitized_text = Some("customer message".to_string());
        state.draft = Some(draft.to_string());
        state.product_type = product_type;
        state
    }

    #[tokio::test]
    async fn clean_draft_is_approved_with_its_product_disclaimer() {
        let result = node(MockLlm::scripted([APPROVING_REPLY]))
            .handle(state_with_draft(
                "The Instant Access Saver pays 4.25% AER variable.",
                Some(ProductType::Savings),
            ))
            .await
            .unwrap();

        match result {
            NodeResult::Halt { state, response } => {
                assert_eq!(state.compliance, ComplianceVerdict::Approved);
                assert!(response.text.contains("Important information:"));
                assert!(response.text.contains(SAVINGS_DISCLAIMER));
            }
            other => panic!("expected halt, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn prohibited_phrase_skips_the_policy_check_and_needs_review() {
        // A scripted failure would surface as "policy check unavailable";
        // the denylist reason proves the generative check never ran.
        let llm = MockLlm::with_script(vec![MockReply::Failure, MockReply::Failure]);

        let result = node(llm)
            .handle(state_with_draft(
                "These returns are guaranteed, you can't lose.",
                Some(ProductType::Investment),
            ))
            .await
            .unwrap();

        match result {
            NodeResult::Continue { state, next } => {
                assert_eq!(next, NodeId::Adjudication);
                assert_eq!(state.compliance, ComplianceVerdict::NeedsReview);
                assert!(state
                    .compliance_reasons
                    .iter()
                    .any(|r| r.contains("guaranteed")));
            }
            other => panic!("expected continue, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn negated_guarantee_is_not_a_violation() {
        let result = node(MockLlm::scripted([APPROVING_REPLY]))
            .handle(state_with_draft(
                "Returns are not guaranteed and can vary over time.",
                Some(ProductType::Investment),
            ))
            .await
            .unwrap();

        match result {
            NodeResult::Halt { state, .. } => {
                assert_eq!(state.compliance, ComplianceVerdict::Approved);
            }
            other => panic!("expected halt, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn policy_no_holds_the_draft_with_its_issues() {
        let llm = MockLlm::scripted([
            "COMPLIANT: NO\nISSUES: overpromising, missing risk warning\nWARNINGS: NONE\nSUGGESTIONS: soften",
        ]);

        let result = node(llm)
            .handle(state_with_draft(
                "This bond suits everyone.",
                Some(ProductType::Savings),
            ))
            .await
            .unwrap();

        match result {
            NodeResult::Continue { state, next } => {
                assert_eq!(next, NodeId::Adjudication);
                assert_eq!(
                    state.compliance_reasons,
                    vec!["overpromising", "missing risk warning"]
                );
            }
            other => panic!("expected continue, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn policy_outage_fails_closed() {
        let llm = MockLlm::with_script(vec![MockReply::Failure, MockReply::Failure]);

        let result = node(llm)
            .handle(state_with_draft(
                "A perfectly reasonable draft.",
                Some(ProductType::Savings),
            ))
            .await
            .unwrap();

        match result {
            NodeResult::Continue { state, next } => {
                assert_eq!(next, NodeId::Adjudication);
                assert_eq!(
                    state.compliance_reasons,
                    vec!["policy check unavailable"]
                );
            }
            other => panic!("expected continue, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unusable_verdict_fails_closed() {
        let llm = MockLlm::scripted(["sure, looks great to me!"]);

        let result = node(llm)
            .handle(state_with_draft("Draft text.", None))
            .await
            .unwrap();

        match result {
            NodeResult::Continue { state, .. } => {
                assert_eq!(state.compliance, ComplianceVerdict::NeedsReview);
            }
            other => panic!("expected continue, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn missing_draft_is_an_invariant_violation() {
        let mut state = WorkflowState::new(Uuid::new_v4(), "m", Vec::new());
        state.sanitized_text = Some("m".to_string());

        let result = node(MockLlm::scripted([APPROVING_REPLY])).handle(state).await;
        assert!(matches!(
            result,
            Err(WorkflowError::InvariantViolation(_))
        ));
    }

    #[test]
    fn denylist_matches_on_word_boundaries() {
        assert!(denylist_hits("We promise big gains").len() == 1);
        // "compromise" must not trip "promise".
        assert!(denylist_hits("We reached a compromise").is_empty());
        assert!(denylist_hits("This is risk-free and 100% safe").len() == 2);
    }

    #[test]
    fn denylist_honours_negated_phrasing() {
        assert!(denylist_hits("Returns are not guaranteed").is_empty());
        assert!(denylist_hits("No loan is guaranteed in advance").is_empty());
        assert!(!denylist_hits("Returns are guaranteed").is_empty());
    }

    #[test]
    fn disclaimer_assembly_is_deterministic_and_deduplicated() {
        let draft = "Invest for strong returns with our credit products.";
        let first = assemble_disclaimers(draft, Some(ProductType::Investment));
        let second = assemble_disclaimers(draft, Some(ProductType::Investment));

        assert_eq!(first, second);
        assert_eq!(
            first.iter().filter(|d| *d == INVESTMENT_DISCLAIMER).count(),
            1
        );
        assert!(first.contains(&CREDIT_DISCLAIMER.to_string()));
    }

    #[test]
    fn sensitive_topics_add_the_debt_advice_line() {
        let disclaimers = assemble_disclaimers(
            "A consolidation loan can help with existing debt.",
            Some(ProductType::Loan),
        );
        assert!(disclaimers.contains(&DEBT_ADVICE_LINE.to_string()));
    }

    #[test]
    fn approved_product_text_always_carries_a_disclaimer() {
        let disclaimers = assemble_disclaimers("A neutral description.", None);
        assert_eq!(disclaimers, vec![GENERAL_DISCLAIMER.to_string()]);
    }
}
