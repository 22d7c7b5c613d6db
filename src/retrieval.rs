//! Retrieval collaborator
//!
//! Nearest-neighbour lookup over the grounding corpus. Embedding happens
//! behind the index boundary; callers hand over query text and get back
//! scored fragments, nearest first.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::error;

use crate::error::WorkflowError;
use crate::models::Fragment;
use crate::Result;

/// Vector index contract: top-k nearest fragments for a query.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    async fn nearest(&self, query: &str, k: usize) -> Result<Vec<Fragment>>;
}

//
// ================= HTTP Index =================
//

/// HTTP client for a remote vector index (connection-pooled).
pub struct HttpVectorIndex {
    client: Client,
    base_url: String,
}

impl HttpVectorIndex {
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
impl VectorIndex for HttpVectorIndex {
    async fn nearest(&self, query: &str, k: usize) -> Result<Vec<Fragment>> {
        let url = format!("{}/v1/nearest", self.base_url.trim_end_matches('/'));

        let response = self
            .client
            .post(&url)
            .json(&NearestRequest { query, k })
            .send()
            .await
            .map_err(|e| {
                error!("Vector index request failed: {}", e);
                WorkflowError::RetrievalError(format!("index unreachable: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(WorkflowError::RetrievalError(format!(
                "index returned {}",
                status
            )));
        }

        let body: NearestResponse = response.json().await.map_err(|e| {
            WorkflowError::RetrievalError(format!("index response parse error: {}", e))
        })?;

        Ok(body.fragments)
    }
}

#[derive(Debug, Serialize)]
struct NearestRequest<'a> {
    query: &'a str,
    k: usize,
}

#[derive(Debug, Deserialize)]
struct NearestResponse {
    fragments: Vec<Fragment>,
}

//
// ================= In-Memory Index =================
//

/// Keyword-overlap index over seeded documents. Deterministic; serves the
/// demo binary and tests without an embedding service.
pub struct InMemoryVectorIndex {
    documents: Vec<(String, String)>,
    failures_remaining: AtomicUsize,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self {
            documents: Vec::new(),
            failures_remaining: AtomicUsize::new(0),
        }
    }

    pub fn with_documents<I, S>(documents: I) -> Self
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        Self {
            documents: documents
                .into_iter()
                .map(|(text, source)| (text.into(), source.into()))
                .collect(),
            failures_remaining: AtomicUsize::new(0),
        }
    }

    /// Fail the next `failures` lookups before serving. Exercises the
    /// retry-once policy for idempotent reads.
    pub fn failing_times(mut self, failures: usize) -> Self {
        self.failures_remaining = AtomicUsize::new(failures);
        self
    }

    fn keywords(text: &str) -> HashSet<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| w.len() > 2)
            .map(|w| w.to_string())
            .collect()
    }
}

impl Default for InMemoryVectorIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl VectorIndex for InMemoryVectorIndex {
    async fn nearest(&self, query: &str, k: usize) -> Result<Vec<Fragment>> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.store(remaining - 1, Ordering::SeqCst);
            return Err(WorkflowError::RetrievalError(
                "scripted index outage".to_string(),
            ));
        }

        let query_words = Self::keywords(query);
        if query_words.is_empty() {
            return Ok(Vec::new());
        }

        let mut scored: Vec<Fragment> = self
            .documents
            .iter()
            .map(|(text, source)| {
                let doc_words = Self::keywords(text);
                let overlap = query_words.intersection(&doc_words).count();
                // Zero overlap sits beyond any relevance cutoff.
                let distance = if overlap == 0 {
                    2.0
                } else {
                    1.0 - (overlap as f32 / query_words.len() as f32)
                };
                Fragment {
                    text: text.clone(),
                    source: Some(source.clone()),
                    distance,
                }
            })
            .collect();

        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k);
        Ok(scored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_index() -> InMemoryVectorIndex {
        InMemoryVectorIndex::with_documents(vec![
            (
                "Savings accounts pay variable interest rates up to 4.25% AER",
                "savings-guide",
            ),
            (
                "Mortgages require a deposit of at least 5% of the property value",
                "mortgage-guide",
            ),
            ("Branch opening hours are 9am to 5pm on weekdays", "branch-info"),
        ])
    }

    #[tokio::test]
    async fn nearest_orders_by_ascending_distance() {
        let index = seeded_index();
        let fragments = index
            .nearest("what interest rates do savings accounts pay", 3)
            .await
            .unwrap();

        assert_eq!(fragments[0].source.as_deref(), Some("savings-guide"));
        for pair in fragments.windows(2) {
            assert!(pair[0].distance <= pair[1].distance);
        }
    }

    #[tokio::test]
    async fn nearest_respects_k() {
        let index = seeded_index();
        let fragments = index.nearest("savings interest", 1).await.unwrap();
        assert_eq!(fragments.len(), 1);
    }

    #[tokio::test]
    async fn unrelated_documents_score_beyond_the_cutoff() {
        let index = seeded_index();
        let fragments = index
            .nearest("quarterly cheese production volumes", 3)
            .await
            .unwrap();

        assert!(fragments.iter().all(|f| f.distance > 1.25));
    }

    #[tokio::test]
    async fn scripted_outage_clears_after_the_configured_failures() {
        let index = seeded_index().failing_times(1);

        assert!(index.nearest("savings", 3).await.is_err());
        assert!(index.nearest("savings", 3).await.is_ok());
    }
}
