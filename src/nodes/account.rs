//! Account data node
//!
//! Deterministic agent over the account directory. Classifies the request
//! by keyword and formats the reply from the account snapshot; no
//! generative call is involved.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::models::{FinalResponse, NodeId, NodeResult, WorkflowState};
use crate::nodes::WorkflowNode;
use crate::Result;

/// Account snapshot lookup. Production wires this to the core banking
/// surface; the demo directory serves fixed data.
pub trait AccountDirectory: Send + Sync {
    fn snapshot(&self, conversation_id: Uuid) -> AccountSnapshot;
}

#[derive(Debug, Clone)]
pub struct AccountSnapshot {
    pub account_ref: String,
    pub account_type: String,
    pub balance: f64,
    pub recent_transactions: Vec<TransactionRecord>,
}

#[derive(Debug, Clone)]
pub struct TransactionRecord {
    pub date: String,
    pub description: String,
    pub amount: String,
}

/// Fixed-data directory for demos and tests.
#[derive(Debug, Default)]
pub struct DemoAccountDirectory;

impl AccountDirectory for DemoAccountDirectory {
    fn snapshot(&self, conversation_id: Uuid) -> AccountSnapshot {
        let short = conversation_id.simple().to_string()[..8].to_uppercase();
        let day = |days_ago: i64| {
            (Utc::now() - Duration::days(days_ago))
                .format("%d %b")
                .to_string()
        };

        AccountSnapshot {
            account_ref: format!("ACC-001-{}", short),
            account_type: "Current".to_string(),
            balance: 5432.50,
            recent_transactions: vec![
                TransactionRecord {
                    date: day(1),
                    description: "Sainsbury's".to_string(),
                    amount: "-£87.50".to_string(),
                },
                TransactionRecord {
                    date: day(3),
                    description: "Salary".to_string(),
                    amount: "+£2,500.00".to_string(),
                },
                TransactionRecord {
                    date: day(5),
                    description: "Amazon".to_string(),
                    amount: "-£45.99".to_string(),
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AccountQuery {
    Balance,
    Transactions,
    Statement,
    Details,
    General,
}

/// Static keyword lists — zero allocation
const BALANCE_KEYWORDS: &[&str] = &["balance", "how much", "account total"];
const TRANSACTION_KEYWORDS: &[&str] = &["transaction", "history", "recent", "activity", "spending"];
const STATEMENT_KEYWORDS: &[&str] = &["statement", "download", "pdf"];
const DETAILS_KEYWORDS: &[&str] = &["details", "information", "account info", "account number"];

pub struct AccountNode {
    directory: Arc<dyn AccountDirectory>,
}

impl AccountNode {
    pub fn new(directory: Arc<dyn AccountDirectory>) -> Self {
        Self { directory }
    }

    fn classify_query(text: &str) -> AccountQuery {
        let lowered = text.to_lowercase();
        let hit = |keywords: &[&str]| keywords.iter().any(|kw| lowered.contains(kw));

        if hit(BALANCE_KEYWORDS) {
            AccountQuery::Balance
        } else if hit(TRANSACTION_KEYWORDS) {
            AccountQuery::Transactions
        } else if hit(STATEMENT_KEYWORDS) {
            AccountQuery::Statement
        } else if hit(DETAILS_KEYWORDS) {
            AccountQuery::Details
        } else {
            AccountQuery::General
        }
    }

    fn render(query: AccountQuery, snapshot: &AccountSnapshot) -> String {
        let balance = format_gbp(snapshot.balance);

        match query {
            AccountQuery::Balance => format!(
                "Your current account balance is {}. If you'd like a breakdown \
                 of recent activity, just ask for your transactions.",
                balance
            ),
            AccountQuery::Transactions => {
                let mut reply = String::from("Here are your most recent transactions:\n");
                for tx in &snapshot.recent_transactions {
                    reply.push_str(&format!(
                        "• {}  {}  {}\n",
                        tx.date, tx.description, tx.amount
                    ));
                }
                reply.push_str(&format!("\nYour current balance is {}.", balance));
                reply
            }
            AccountQuery::Statement => "I've sent your latest statement to your registered \
                 contact details. It usually arrives within a few minutes; check your spam \
                 folder if it doesn't show up."
                .to_string(),
            AccountQuery::Details => format!(
                "Here are your account details:\n• Account reference: {}\n\
                 • Account type: {}\n• Current balance: {}",
                snapshot.account_ref, snapshot.account_type, balance
            ),
            AccountQuery::General => format!(
                "Your {} account ({}) is in good standing with a balance of {}. \
                 You can ask about your balance, recent transactions, or request a statement.",
                snapshot.account_type, snapshot.account_ref, balance
            ),
        }
    }
}

#[async_trait]
impl WorkflowNode for AccountNode {
    fn id(&self) -> NodeId {
        NodeId::Account
    }

    async fn handle(&self, mut state: WorkflowState) -> Result<NodeResult> {
        let query = Self::classify_query(state.sanitized()?);
        let snapshot = self.directory.snapshot(state.conversation_id);
        let reply = Self::render(query, &snapshot);

        state.draft = Some(reply.clone());

        Ok(NodeResult::Halt {
            state,
            response: FinalResponse::new(reply),
        })
    }
}

fn format_gbp(amount: f64) -> String {
    let negative = amount < 0.0;
    let pence = (amount.abs() * 100.0).round() as u64;
    let pounds = (pence / 100).to_string();
    let rem = pence % 100;

    let mut grouped = String::with_capacity(pounds.len() + pounds.len() / 3);
    for (i, c) in pounds.chars().enumerate() {
        if i > 0 && (pounds.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(c);
    }

    format!("{}£{}.{:02}", if negative { "-" } else { "" }, grouped, rem)
}
