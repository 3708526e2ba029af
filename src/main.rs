// =============================================================================
// TailGuard — Main Entry Point
// =============================================================================
//
// Autonomous tail-risk insurance decision engine: aggregates DeFi risk
// signals, prices premiums, evaluates claim triggers, and drives a
// trust-gated decision loop against an external ledger.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod audit;
mod claims;
mod config;
mod decision_loop;
mod errors;
mod ledger;
mod pricing;
mod reasoning;
mod rebalance;
mod signals;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::claims::ClaimEvaluator;
use crate::config::RuntimeConfig;
use crate::decision_loop::DecisionLoop;
use crate::ledger::LedgerSim;
use crate::pricing::PremiumPricer;
use crate::reasoning::{LlmReasoner, ReasoningService, TemplateReasoner};
use crate::signals::{sources::default_sources, RiskAggregator};
use crate::types::ReasoningMode;

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = RuntimeConfig::load_or_default(CONFIG_PATH);

    info!(
        agent_id = config.agent_id,
        agent_name = %config.agent_name,
        poll_interval_secs = config.poll_interval_secs,
        reasoning_mode = %config.reasoning_mode,
        auto_claim = config.auto_claim_enabled,
        "TailGuard decision engine starting up"
    );

    // ── 2. Reasoning service (selected by configuration) ─────────────────
    let reasoner: Arc<dyn ReasoningService> = match config.reasoning_mode {
        ReasoningMode::Template => Arc::new(TemplateReasoner),
        ReasoningMode::Llm => {
            let api_key = std::env::var("OPENAI_API_KEY").unwrap_or_default();
            if api_key.is_empty() {
                warn!("reasoning_mode is 'llm' but OPENAI_API_KEY is empty — calls will degrade to templates");
            }
            Arc::new(LlmReasoner::new(api_key, config.llm_model.clone()))
        }
    };

    // ── 3. Ledger collaborators ──────────────────────────────────────────
    // The in-memory simulator stands in for the on-chain client; real
    // transport plugs in behind the same traits.
    let ledger = Arc::new(LedgerSim::new(config.demo_trust_score_bps));
    if config.seed_demo_policies {
        ledger.seed_demo_policies();
    }

    // ── 4. Engines & shared state ────────────────────────────────────────
    let aggregator = Arc::new(RiskAggregator::new(
        default_sources(),
        Duration::from_secs(config.signal_timeout_secs),
    ));
    let pricer = Arc::new(PremiumPricer::new(
        reasoner.clone(),
        config.quote_validity_secs,
    ));
    let evaluator = Arc::new(ClaimEvaluator::new(reasoner));

    let state = Arc::new(AppState::new(
        config,
        aggregator,
        pricer,
        evaluator,
        ledger.clone(),
    ));

    // ── 5. Decision loop ─────────────────────────────────────────────────
    let decision_loop = Arc::new(DecisionLoop::new(
        state.clone(),
        ledger.clone(),
        ledger.clone(),
        ledger,
    ));
    state.attach_loop(decision_loop.clone());
    decision_loop.start();

    // ── 6. API server ────────────────────────────────────────────────────
    let api_state = state.clone();
    let bind_addr =
        std::env::var("TAILGUARD_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".into());

    tokio::spawn(async move {
        let app = api::rest::router(api_state);
        let listener = tokio::net::TcpListener::bind(&bind_addr)
            .await
            .expect("Failed to bind API server");
        info!(addr = %bind_addr, "API server listening");
        axum::serve(listener, app)
            .await
            .expect("API server failed");
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping gracefully");

    decision_loop.stop();

    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "Failed to save runtime config on shutdown");
    }

    info!("TailGuard shut down complete.");
    Ok(())
}
