//! Core data models for the support workflow

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

//
// ================= Enums =================
//

/// Who produced a conversation turn.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TurnRole {
    User,
    Agent,
    System,
}

/// Closed set of intent labels. Anything the classifier cannot place in this
/// set degrades to `ComplaintEscalation`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum IntentLabel {
    AccountData,
    KnowledgeGeneral,
    ProductAcquisition,
    ComplaintEscalation,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Neutral,
    Negative,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComplianceVerdict {
    NotApplicable,
    Approved,
    NeedsReview,
    Rejected,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProductType {
    Investment,
    Loan,
    Credit,
    Savings,
}

/// Lifecycle of the human-adjudication gate for one conversation turn.
/// `Resolved` is final; a resolved workflow is never suspended again.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AdjudicationPhase {
    Inactive,
    Suspended,
    Resolved,
}

/// Risk level reported by the injection detector.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InjectionRisk {
    None,
    Suspected,
    Confirmed,
}

//
// ================= Nodes =================
//

/// Closed set of node identities in the workflow graph.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeId {
    Guardrail,
    Classifier,
    Account,
    Knowledge,
    Product,
    Compliance,
    Escalation,
    Adjudication,
}

impl NodeId {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeId::Guardrail => "guardrail",
            NodeId::Classifier => "classifier",
            NodeId::Account => "account",
            NodeId::Knowledge => "knowledge",
            NodeId::Product => "product",
            NodeId::Compliance => "compliance",
            NodeId::Escalation => "escalation",
            NodeId::Adjudication => "adjudication",
        }
    }

    pub fn from_name(name: &str) -> Option<NodeId> {
        match name {
            "guardrail" => Some(NodeId::Guardrail),
            "classifier" => Some(NodeId::Classifier),
            "account" => Some(NodeId::Account),
            "knowledge" => Some(NodeId::Knowledge),
            "product" => Some(NodeId::Product),
            "compliance" => Some(NodeId::Compliance),
            "escalation" => Some(NodeId::Escalation),
            "adjudication" => Some(NodeId::Adjudication),
            _ => None,
        }
    }
}

/// Outcome of executing one node. Exactly one of the three is possible per
/// execution; the orchestrator owns the transition that follows.
#[derive(Debug, Clone)]
pub enum NodeResult {
    Continue { state: WorkflowState, next: NodeId },
    Halt { state: WorkflowState, response: FinalResponse },
    Suspend { state: WorkflowState },
}

//
// ================= Turns =================
//

/// One persisted history entry. User turns store the sanitized text so masked
/// PII never re-enters a prompt through history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Turn {
    pub role: TurnRole,
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn new(role: TurnRole, text: impl Into<String>) -> Self {
        Self {
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::new(TurnRole::User, text)
    }

    pub fn agent(text: impl Into<String>) -> Self {
        Self::new(TurnRole::Agent, text)
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::new(TurnRole::System, text)
    }
}

//
// ================= Workflow State =================
//

/// Serializable snapshot of one conversation turn moving through the graph.
///
/// The step counter increases by exactly one per executed node and is never
/// reset within a traversal; it survives suspension via the checkpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkflowState {
    pub conversation_id: Uuid,
    pub turns: Vec<Turn>,
    pub raw_input: String,
    /// Set only by the guardrail; every later stage reads this, never raw_input.
    pub sanitized_text: Option<String>,
    pub intent: Option<IntentLabel>,
    pub intent_confidence: Option<f32>,
    pub sentiment: Option<Sentiment>,
    pub product_type: Option<ProductType>,
    pub draft: Option<String>,
    pub compliance: ComplianceVerdict,
    pub compliance_reasons: Vec<String>,
    pub disclaimers: Vec<String>,
    pub adjudication: AdjudicationPhase,
    pub screening_degraded: bool,
    pub terminal: bool,
    pub step: u32,
}

impl WorkflowState {
    pub fn new(conversation_id: Uuid, raw_input: impl Into<String>, turns: Vec<Turn>) -> Self {
        Self {
            conversation_id,
            turns,
            raw_input: raw_input.into(),
            sanitized_text: None,
            intent: None,
            intent_confidence: None,
            sentiment: None,
            product_type: None,
            draft: None,
            compliance: ComplianceVerdict::NotApplicable,
            compliance_reasons: Vec::new(),
            disclaimers: Vec::new(),
            adjudication: AdjudicationPhase::Inactive,
            screening_degraded: false,
            terminal: false,
            step: 0,
        }
    }

    /// Sanitized text, or an invariant error when a stage runs before screening.
    pub fn sanitized(&self) -> crate::Result<&str> {
        self.sanitized_text.as_deref().ok_or_else(|| {
            crate::error::WorkflowError::InvariantViolation(
                "stage executed before guardrail produced sanitized text".to_string(),
            )
        })
    }
}

//
// ================= Checkpoint =================
//

/// Durable record of a suspended traversal. Keyed by conversation id, written
/// and consumed only by the orchestrator, deleted once the workflow advances
/// past the suspension point.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Checkpoint {
    pub conversation_id: Uuid,
    pub state: WorkflowState,
    pub awaiting: NodeId,
    pub state_hash: String,
    pub created_at: DateTime<Utc>,
}

//
// ================= Final Response =================
//

/// Terminal response for one traversal. The only streaming surface is
/// `chunks()`: a finite, lazy sequence that can be restarted by calling it
/// again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinalResponse {
    pub text: String,
}

impl FinalResponse {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn chunks(&self, chunk_chars: usize) -> ResponseChunks<'_> {
        ResponseChunks {
            rest: &self.text,
            chunk_chars: chunk_chars.max(1),
        }
    }
}

/// Iterator over fixed-size response chunks, split on char boundaries.
pub struct ResponseChunks<'a> {
    rest: &'a str,
    chunk_chars: usize,
}

impl<'a> Iterator for ResponseChunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<&'a str> {
        if self.rest.is_empty() {
            return None;
        }
        let split = self
            .rest
            .char_indices()
            .nth(self.chunk_chars)
            .map(|(idx, _)| idx)
            .unwrap_or(self.rest.len());
        let (head, tail) = self.rest.split_at(split);
        self.rest = tail;
        Some(head)
    }
}

//
// ================= Caller Contract =================
//

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Final,
    Pending,
}

/// Outcome of `process_message`: either a terminal response or a pending
/// adjudication marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub status: ProcessStatus,
    pub response: Option<String>,
    pub intent: Option<IntentLabel>,
    pub confidence: Option<f32>,
}

/// Outcome of `resume_adjudication`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeOutcome {
    pub response: String,
}

/// External adjudicator decision: approve the suspended draft, or replace it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "decision", rename_all = "lowercase")]
pub enum AdjudicationDecision {
    Approve,
    Override { replacement_text: String },
}

//
// ================= Collaborator I/O =================
//

/// Reply from the generative collaborator.
#[derive(Debug, Clone)]
pub struct Completion {
    pub text: String,
    pub confidence: f32,
}

/// Result of PII masking. Masking transforms, it never blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct PiiMask {
    pub masked_text: String,
    pub entities_found: Vec<String>,
}

/// Verdict of the external injection detector.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InjectionAssessment {
    pub risk: InjectionRisk,
    pub categories: Vec<String>,
}

/// One retrieved fragment, with its vector distance (lower is closer).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fragment {
    pub text: String,
    pub source: Option<String>,
    pub distance: f32,
}

//
// ================= Display =================
//

impl fmt::Display for IntentLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IntentLabel::AccountData => "account_data",
            IntentLabel::KnowledgeGeneral => "knowledge_general",
            IntentLabel::ProductAcquisition => "product_acquisition",
            IntentLabel::ComplaintEscalation => "complaint_escalation",
        };
        write!(f, "{}", s)
    }
}

impl IntentLabel {
    /// Parse a classifier reply label. Returns `None` for anything outside
    /// the closed set; the caller decides how to degrade.
    pub fn parse(label: &str) -> Option<IntentLabel> {
        match label.trim().to_lowercase().as_str() {
            "account_data" => Some(IntentLabel::AccountData),
            "knowledge_general" => Some(IntentLabel::KnowledgeGeneral),
            "product_acquisition" => Some(IntentLabel::ProductAcquisition),
            "complaint_escalation" => Some(IntentLabel::ComplaintEscalation),
            _ => None,
        }
    }

    pub const ALL: [IntentLabel; 4] = [
        IntentLabel::AccountData,
        IntentLabel::KnowledgeGeneral,
        IntentLabel::ProductAcquisition,
        IntentLabel::ComplaintEscalation,
    ];
}

impl Sentiment {
    pub fn parse(value: &str) -> Option<Sentiment> {
        match value.trim().to_lowercase().as_str() {
            "positive" => Some(Sentiment::Positive),
            "neutral" => Some(Sentiment::Neutral),
            "negative" => Some(Sentiment::Negative),
            _ => None,
        }
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl fmt::Display for ComplianceVerdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ComplianceVerdict::NotApplicable => "not_applicable",
            ComplianceVerdict::Approved => "approved",
            ComplianceVerdict::NeedsReview => "needs_review",
            ComplianceVerdict::Rejected => "rejected",
        };
        write!(f, "{}", s)
    }
}

impl fmt::Display for ProductType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProductType::Investment => "investment",
            ProductType::Loan => "loan",
            ProductType::Credit => "credit",
            ProductType::Savings => "savings",
        };
        write!(f, "{}", s)
    }
}
