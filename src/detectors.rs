//! Safety detectors
//!
//! PII masking runs locally against a fixed pattern table. Injection
//! assessment delegates to an external detection service; the guardrail
//! degrades to heuristics when that service is unreachable.

use async_trait::async_trait;
use lazy_static::lazy_static;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::error;

use crate::error::WorkflowError;
use crate::models::{InjectionAssessment, InjectionRisk, PiiMask};
use crate::Result;

//
// ================= PII masking =================
//

/// PII detector contract: replace detected spans with category tokens.
pub trait PiiDetector: Send + Sync {
    fn detect_and_mask(&self, text: &str) -> PiiMask;
}

lazy_static! {
    /// Category label → pattern. Card numbers run first so phone patterns
    /// never bite into a grouped card number.
    static ref PII_PATTERNS: Vec<(&'static str, Regex)> = vec![
        (
            "CARD_NUMBER",
            Regex::new(r"\b(?:\d{4}[-\s]?){3}\d{4}\b").unwrap(),
        ),
        (
            "EMAIL",
            Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap(),
        ),
        (
            "PHONE",
            Regex::new(r"(?:\+44\s?|\b0)(?:7\d{3}|\d{4})\s?\d{6}\b").unwrap(),
        ),
        (
            "NAME",
            Regex::new(r"\b(?:Mr|Mrs|Ms|Dr|Miss)\.?\s+[A-Z][a-z]+\b").unwrap(),
        ),
    ];
}

/// Pattern-table masker. Transforms only; blocking is never a masking concern.
#[derive(Debug, Default)]
pub struct RegexPiiDetector;

impl PiiDetector for RegexPiiDetector {
    fn detect_and_mask(&self, text: &str) -> PiiMask {
        let mut masked = text.to_string();
        let mut entities_found = Vec::new();

        for (label, pattern) in PII_PATTERNS.iter() {
            if pattern.is_match(&masked) {
                masked = pattern
                    .replace_all(&masked, format!("[{}]", label))
                    .into_owned();
                entities_found.push((*label).to_string());
            }
        }

        PiiMask {
            masked_text: masked,
            entities_found,
        }
    }
}

//
// ================= Injection detection =================
//

/// External injection-detector contract.
#[async_trait]
pub trait InjectionDetector: Send + Sync {
    async fn assess(&self, text: &str) -> Result<InjectionAssessment>;
}

/// HTTP client for the detection service (connection-pooled).
pub struct HttpInjectionDetector {
    client: Client,
    base_url: String,
}

impl HttpInjectionDetector {
    pub fn new(base_url: String) -> Self {
        let client = Client::builder()
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(8)
            .build()
            .expect("Failed to build HTTP client");

        Self { client, base_url }
    }
}

#[async_trait]
impl InjectionDetector for HttpInjectionDetector {
    async fn assess(&self, text: &str) -> Result<InjectionAssessment> {
        let url = format!("{}/v1/assess", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&AssessRequest { text })
            .send()
            .await
            .map_err(|e| {
                error!("Injection detector request failed: {}", e);
                WorkflowError::DetectionError(format!("detector unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(WorkflowError::DetectionError(format!(
                "detector returned {}",
                status
            )));
        }

        let body: AssessResponse = response.json().await.map_err(|e| {
            WorkflowError::DetectionError(format!("detector response parse error: {}", e))
        })?;

        Ok(InjectionAssessment {
            risk: body.risk,
            categories: body.categories,
        })
    }
}

#[derive(Debug, Serialize)]
struct AssessRequest<'a> {
    text: &'a str,
}

#[derive(Debug, Deserialize)]
struct AssessResponse {
    risk: InjectionRisk,
    #[serde(default)]
    categories: Vec<String>,
}

/// Scripted detector double. Fails the configured number of times before
/// returning the fixed assessment; `unreachable()` never recovers.
pub struct MockInjectionDetector {
    assessment: InjectionAssessment,
    failures_remaining: AtomicUsize,
}

impl MockInjectionDetector {
    pub fn benign() -> Self {
        Self::with_assessment(InjectionAssessment {
            risk: InjectionRisk::None,
            categories: Vec::new(),
        })
    }

    pub fn confirming(categories: Vec<String>) -> Self {
        Self::with_assessment(InjectionAssessment {
            risk: InjectionRisk::Confirmed,
            categories,
        })
    }

    pub fn with_assessment(assessment: InjectionAssessment) -> Self {
        Self {
            assessment,
            failures_remaining: AtomicUsize::new(0),
        }
    }

    pub fn unreachable() -> Self {
        let mut detector = Self::benign();
        detector.failures_remaining = AtomicUsize::new(usize::MAX);
        detector
    }

    pub fn failing_times(failures: usize, then: InjectionAssessment) -> Self {
        Self {
            assessment: then,
            failures_remaining: AtomicUsize::new(failures),
        }
    }
}

#[async_trait]
impl InjectionDetector for MockInjectionDetector {
    async fn assess(&self, _text: &str) -> Result<InjectionAssessment> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            if remaining != usize::MAX {
                self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            }
            return Err(WorkflowError::DetectionError(
                "scripted detector outage".to_string(),
            ));
        }
        Ok(self.assessment.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn card_numbers_mask_to_the_category_token() {
        let detector = RegexPiiDetector;
        let mask = detector.detect_and_mask("My card 4532 1234 5678 9010 was declined");

        assert_eq!(mask.masked_text, "My card [CARD_NUMBER] was declined");
        assert_eq!(mask.entities_found, vec!["CARD_NUMBER"]);
    }

    #[test]
    fn emails_and_phones_mask_together() {
        let detector = RegexPiiDetector;
        let mask = detector
            .detect_and_mask("Reach me at jane.doe@example.co.uk or 07700 900123 please");

        assert_eq!(mask.masked_text, "Reach me at [EMAIL] or [PHONE] please");
        assert_eq!(mask.entities_found, vec!["EMAIL", "PHONE"]);
    }

    #[test]
    fn titled_names_are_masked() {
        let detector = RegexPiiDetector;
        let mask = detector.detect_and_mask("This is Mr Smith from accounts");

        assert_eq!(mask.masked_text, "This is [NAME] from accounts");
    }

    #[test]
    fn clean_text_passes_through_untouched() {
        let detector = RegexPiiDetector;
        let mask = detector.detect_and_mask("What are your opening hours?");

        assert_eq!(mask.masked_text, "What are your opening hours?");
        assert!(mask.entities_found.is_empty());
    }

    #[test]
    fn bare_digit_runs_are_not_phone_numbers() {
        let detector = RegexPiiDetector;
        let mask = detector.detect_and_mask("Order reference 123456 has shipped");

        assert_eq!(mask.masked_text, "Order reference 123456 has shipped");
    }

    #[tokio::test]
    async fn mock_detector_recovers_after_scripted_failures() {
        let detector = MockInjectionDetector::failing_times(
            1,
            InjectionAssessment {
                risk: InjectionRisk::Suspected,
                categories: vec!["jailbreak".to_string()],
            },
        );

        assert!(detector.assess("x").await.is_err());
        let assessment = detector.assess("x").await.unwrap();
        assert_eq!(assessment.risk, InjectionRisk::Suspected);
    }

    #[tokio::test]
    async fn unreachable_detector_never_recovers() {
        let detector = MockInjectionDetector::unreachable();
        assert!(detector.assess("x").await.is_err());
        assert!(detector.assess("x").await.is_err());
    }
}
