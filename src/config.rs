//! Workflow configuration
//!
//! Everything tunable is gathered here and injected at construction time.
//! Prompt templates are part of the config: immutable once built, never
//! global mutable state.

use std::time::Duration;

/// Tunables for one orchestrator instance.
#[derive(Debug, Clone)]
pub struct WorkflowConfig {
    /// Inputs longer than this are blocked by the guardrail.
    pub max_input_chars: usize,
    /// How many recent turns the classifier prompt carries.
    pub history_window: usize,
    /// Top-K fragments requested from the vector index.
    pub retrieval_k: usize,
    /// Fragments farther than this are treated as irrelevant.
    pub max_fragment_distance: f32,
    /// Upper bound on a single node execution, collaborator calls included.
    pub node_timeout: Duration,
    /// Pause before the single retry of a failed collaborator call.
    pub retry_backoff: Duration,
    /// Chunk size for the terminal response stream.
    pub response_chunk_chars: usize,
    pub prompts: PromptTemplates,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self {
            max_input_chars: 10_000,
            history_window: 10,
            retrieval_k: 6,
            max_fragment_distance: 1.25,
            node_timeout: Duration::from_secs(20),
            retry_backoff: Duration::from_millis(250),
            response_chunk_chars: 240,
            prompts: PromptTemplates::default(),
        }
    }
}

impl WorkflowConfig {
    /// Defaults with environment overrides applied. Unset or unparseable
    /// variables keep the default.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(value) = env_usize("WORKFLOW_MAX_INPUT_CHARS") {
            config.max_input_chars = value;
        }
        if let Some(value) = env_usize("WORKFLOW_HISTORY_WINDOW") {
            config.history_window = value;
        }
        if let Some(value) = env_usize("WORKFLOW_RETRIEVAL_K") {
            config.retrieval_k = value;
        }
        if let Some(value) = env_f32("WORKFLOW_MAX_FRAGMENT_DISTANCE") {
            config.max_fragment_distance = value;
        }
        if let Some(value) = env_u64("WORKFLOW_NODE_TIMEOUT_MS") {
            config.node_timeout = Duration::from_millis(value);
        }
        if let Some(value) = env_u64("WORKFLOW_RETRY_BACKOFF_MS") {
            config.retry_backoff = Duration::from_millis(value);
        }
        if let Some(value) = env_usize("WORKFLOW_RESPONSE_CHUNK_CHARS") {
            config.response_chunk_chars = value;
        }

        config
    }
}

/// System prompts and corrective instructions for the generative calls.
#[derive(Debug, Clone)]
pub struct PromptTemplates {
    pub classifier_system: String,
    pub classifier_reprompt: String,
    pub knowledge_system: String,
    pub product_system: String,
    pub compliance_system: String,
}

impl Default for PromptTemplates {
    fn default() -> Self {
        Self {
            classifier_system: "You are an expert intent classifier for a UK financial services company (FCA regulated).\n\
                Your job is to analyze customer messages and determine their intent accurately.\n\
                Guidelines:\n\
                - Be precise and confident in your classifications\n\
                - Consider context from conversation history\n\
                - Detect sentiment (positive, neutral, negative)\n\
                - Use the exact format requested"
                .to_string(),
            classifier_reprompt: "Your previous reply did not contain a valid intent label. \
                Respond again using the exact format requested, choosing INTENT only from \
                account_data, knowledge_general, product_acquisition, complaint_escalation."
                .to_string(),
            knowledge_system: "You are a helpful bank support agent. Answer the customer's question \
                using ONLY the retrieved context supplied in the prompt. If the context does not \
                contain the answer, say that you cannot find the information and suggest contacting support. \
                Never invent figures, rates, or policies."
                .to_string(),
            product_system: "You are a financial product recommendation specialist for a UK bank (FCA regulated).\n\
                Recommend suitable products based on customer needs.\n\
                - Provide clear, fair, and not misleading information\n\
                - Explain product features and benefits clearly\n\
                - Don't promise guaranteed returns\n\
                - Disclose representative APR where applicable"
                .to_string(),
            compliance_system: "You are an FCA compliance expert for a UK financial services company.\n\
                Review customer-facing content for regulatory compliance.\n\
                - Communications must be clear, fair and not misleading (PRIN 7)\n\
                - Customers' interests must be paramount (PRIN 6)\n\
                - Risk warnings must be prominent and clear\n\
                - No guarantees or promises unless absolutely certain\n\
                Be thorough and strict - compliance violations can result in significant penalties."
                .to_string(),
        }
    }
}

fn env_usize(name: &str) -> Option<usize> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_f32(name: &str) -> Option<f32> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_limits() {
        let config = WorkflowConfig::default();
        assert_eq!(config.max_input_chars, 10_000);
        assert_eq!(config.retrieval_k, 6);
        assert!(config.node_timeout > Duration::ZERO);
    }

    #[test]
    fn unparseable_overrides_keep_defaults() {
        std::env::set_var("WORKFLOW_RETRIEVAL_K", "not-a-number");
        let config = WorkflowConfig::from_env();
        assert_eq!(config.retrieval_k, 6);
        std::env::remove_var("WORKFLOW_RETRIEVAL_K");
    }
}
