//! Product recommendation node
//!
//! Recommends from the static product catalog. The inferred product type is
//! recorded in state before anything else runs, so disclaimer assembly after
//! a suspension still sees it. Product never halts; every draft, degraded
//! ones included, continues into compliance review.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

use crate::config::WorkflowConfig;
use crate::llm::LlmClient;
use crate::models::{NodeId, NodeResult, ProductType, WorkflowState};
use crate::nodes::{call_with_retry, WorkflowNode, DEGRADED_DRAFT_TEXT};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CatalogCategory {
    Mortgages,
    Savings,
    CreditCards,
    Loans,
}

struct ProductOffer {
    name: &'static str,
    category: CatalogCategory,
    headline: &'static str,
}

const PRODUCT_CATALOG: &[ProductOffer] = &[
    ProductOffer {
        name: "Fixed Rate Mortgage",
        category: CatalogCategory::Mortgages,
        headline: "from 3.99% APR, 2 to 10 year fixes, 5% minimum deposit",
    },
    ProductOffer {
        name: "Tracker Mortgage",
        category: CatalogCategory::Mortgages,
        headline: "base rate + 1.5%, 10% minimum deposit, no early repayment charge",
    },
    ProductOffer {
        name: "Instant Access Saver",
        category: CatalogCategory::Savings,
        headline: "up to 4.25% AER variable, open from £1, withdraw any time",
    },
    ProductOffer {
        name: "Fixed Rate Bond",
        category: CatalogCategory::Savings,
        headline: "up to 5.10% AER, 1 or 2 year terms, from £1,000",
    },
    ProductOffer {
        name: "Cashback Credit Card",
        category: CatalogCategory::CreditCards,
        headline: "1% cashback on spending, representative 21.9% APR, no annual fee",
    },
    ProductOffer {
        name: "Balance Transfer Card",
        category: CatalogCategory::CreditCards,
        headline: "0% on transfers for 24 months, 3% transfer fee",
    },
    ProductOffer {
        name: "Personal Loan",
        category: CatalogCategory::Loans,
        headline: "from 6.9% APR, £1,000 to £35,000 over 1 to 7 years",
    },
];

const MORTGAGE_KEYWORDS: &[&str] = &["mortgage", "remortgage", "house", "home", "property"];
const LOAN_KEYWORDS: &[&str] = &["loan", "borrow", "borrowing", "finance"];
const CREDIT_KEYWORDS: &[&str] = &["card", "credit", "cashback", "balance transfer", "apr"];
const SAVINGS_KEYWORDS: &[&str] = &["save", "saving", "savings", "saver", "bond", "isa"];
const INVEST_KEYWORDS: &[&str] = &["invest", "investment", "investing", "stocks", "shares", "funds", "returns"];

pub struct ProductNode {
    llm: Arc<dyn LlmClient>,
    config: Arc<WorkflowConfig>,
}

impl ProductNode {
    pub fn new(llm: Arc<dyn LlmClient>, config: Arc<WorkflowConfig>) -> Self {
        Self { llm, config }
    }

    fn infer_product_type(text: &str) -> Option<ProductType> {
        let lowered = text.to_lowercase();
        let hit = |keywords: &[&str]| keywords.iter().any(|kw| lowered.contains(kw));

        if hit(MORTGAGE_KEYWORDS) || hit(LOAN_KEYWORDS) {
            Some(ProductType::Loan)
        } else if hit(CREDIT_KEYWORDS) {
            Some(ProductType::Credit)
        } else if hit(SAVINGS_KEYWORDS) {
            Some(ProductType::Savings)
        } else if hit(INVEST_KEYWORDS) {
            Some(ProductType::Investment)
        } else {
            None
        }
    }

    fn candidates(product_type: Option<ProductType>) -> Vec<&'static ProductOffer> {
        let keep = |category: CatalogCategory| -> bool {
            match product_type {
                Some(ProductType::Loan) => {
                    matches!(category, CatalogCategory::Mortgages | CatalogCategory::Loans)
                }
                Some(ProductType::Savings) => category == CatalogCategory::Savings,
                Some(ProductType::Credit) => category == CatalogCategory::CreditCards,
                // No dedicated investment shelf; recommend across the catalog.
                Some(ProductType::Investment) | None => true,
            }
        };

        PRODUCT_CATALOG.iter().filter(|p| keep(p.category)).collect()
    }

    fn build_prompt(question: &str, candidates: &[&ProductOffer]) -> String {
        let mut prompt = String::from("AVAILABLE PRODUCTS:\n");
        for offer in candidates {
            prompt.push_str(&format!("• {}: {}\n", offer.name, offer.headline));
        }
        prompt.push_str(&format!(
            "\nCUSTOMER MESSAGE: \"{}\"\n\n\
             Reply exactly in this format:\n\
             RECOMMENDED PRODUCTS: <product names from the list>\n\
             REASONING: <why these fit the customer>\n\
             KEY BENEFITS: <short summary>\n\
             NEXT STEPS: <how the customer proceeds>\n\
             CONFIDENCE: <0.0-1.0>",
            question
        ));
        prompt
    }

    /// Turn the structured reply into customer-facing prose. A reply that
    /// misses the format is used as-is rather than dropped.
    fn render_draft(reply: &str) -> String {
        let field = |name: &str| {
            reply
                .lines()
                .find_map(|line| line.trim().strip_prefix(name))
                .map(str::trim)
                .filter(|v| !v.is_empty())
        };

        match (field("RECOMMENDED PRODUCTS:"), field("REASONING:")) {
            (Some(products), Some(reasoning)) => {
                let mut draft = format!(
                    "Based on what you've told me, I'd suggest: {}.\n\n{}",
                    products, reasoning
                );
                if let Some(benefits) = field("KEY BENEFITS:") {
                    draft.push_str(&format!("\n\nKey benefits: {}", benefits));
                }
                if let Some(next_steps) = field("NEXT STEPS:") {
                    draft.push_str(&format!("\n\nNext steps: {}", next_steps));
                }
                draft
            }
            _ => reply.trim().to_string(),
        }
    }
}

#[async_trait]
impl WorkflowNode for ProductNode {
    fn id(&self) -> NodeId {
        NodeId::Product
    }

    async fn handle(&self, mut state: WorkflowState) -> Result<NodeResult> {
        let question = state.sanitized()?.to_string();

        // Recorded before the generative call so a later suspension still
        // knows which disclaimers apply.
        state.product_type = Self::infer_product_type(&question);

        let candidates = Self::candidates(state.product_type);
        let prompt = Self::build_prompt(&question, &candidates);

        let draft = match call_with_retry(self.config.retry_backoff, || {
            self.llm.complete(&prompt, &self.config.prompts.product_system)
        })
        .await
        {
            Ok(completion) => Self::render_draft(&completion.text),
            Err(error) => {
                warn!(
                    conversation_id = %state.conversation_id,
                    "Product generation failed after retry, degrading: {}",
                    error
                );
                DEGRADED_DRAFT_TEXT.to_string()
            }
        };

        state.draft = Some(draft);

        Ok(NodeResult::Continue {
            state,
            next: NodeId::Compliance,
        })
    }
}
