use support_agent_orchestrator::{
    api::start_server,
    config::WorkflowConfig,
    detectors::{HttpInjectionDetector, InjectionDetector, MockInjectionDetector, RegexPiiDetector},
    llm::{GeminiClient, LlmClient, MockLlm},
    nodes::DemoAccountDirectory,
    orchestrator::Orchestrator,
    retrieval::{HttpVectorIndex, InMemoryVectorIndex, VectorIndex},
    store::store_from_env,
};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    // Load environment variables
    dotenv::dotenv().ok();

    let llm: Arc<dyn LlmClient> = match std::env::var("GEMINI_API_KEY") {
        Ok(key) if !key.trim().is_empty() => Arc::new(GeminiClient::new(key)),
        _ => {
            eprintln!("⚠️  GEMINI_API_KEY not set in .env");
            eprintln!("📌 Falling back to the scripted mock model");
            Arc::new(MockLlm::scripted::<[String; 0], String>([]))
        }
    };

    let injection: Arc<dyn InjectionDetector> = match std::env::var("DETECTOR_URL") {
        Ok(url) if !url.trim().is_empty() => Arc::new(HttpInjectionDetector::new(url)),
        _ => {
            eprintln!("⚠️  DETECTOR_URL not set; screening runs on heuristics only");
            Arc::new(MockInjectionDetector::benign())
        }
    };

    let index: Arc<dyn VectorIndex> = match std::env::var("RETRIEVAL_URL") {
        Ok(url) if !url.trim().is_empty() => Arc::new(HttpVectorIndex::new(url)),
        _ => {
            eprintln!("⚠️  RETRIEVAL_URL not set; using the built-in document set");
            Arc::new(InMemoryVectorIndex::with_documents(default_documents()))
        }
    };

    let api_port: u16 = std::env::var("PORT")
        .or_else(|_| std::env::var("API_PORT"))
        .unwrap_or_else(|_| "8080".to_string())
        .parse()?;

    info!("🚀 Support Workflow Orchestrator - API Server");
    info!("📍 Port: {}", api_port);

    // Create orchestrator
    let orchestrator = Arc::new(Orchestrator::new(
        llm,
        Arc::new(RegexPiiDetector),
        injection,
        index,
        Arc::new(DemoAccountDirectory),
        store_from_env(),
        WorkflowConfig::from_env(),
    ));

    info!("✅ Orchestrator initialized");
    info!("📡 Starting API server...");

    // Start API server
    start_server(orchestrator, api_port).await?;

    Ok(())
}

/// Fallback retrieval corpus for running without an external index.
fn default_documents() -> Vec<(String, String)> {
    [
        (
            "Overdraft interest is charged daily at 39.9% EAR on arranged \
             overdrafts. An unarranged overdraft may affect your credit score.",
            "overdraft-guide",
        ),
        (
            "You can request a replacement debit card in the app from Cards, \
             then Replace card. Replacements arrive within 3 to 5 working days.",
            "card-services",
        ),
        (
            "Faster Payments to other UK banks usually arrive within two hours. \
             Payments above 25,000 pounds may be held for additional checks.",
            "payments-guide",
        ),
        (
            "To close an account, settle any outstanding balance first and \
             withdraw remaining funds. Closure completes within 7 working days.",
            "account-closure",
        ),
    ]
    .into_iter()
    .map(|(text, source)| (text.to_string(), source.to_string()))
    .collect()
}
