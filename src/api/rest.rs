// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. Public endpoints (health) require no
// authentication. All other endpoints require a valid Bearer token checked
// via the `AuthBearer` extractor.
//
// Failures are always typed JSON (`{"error": ...}`) with a matching status
// code, never an unhandled fault.
//
// CORS is configured permissively for development; tighten allowed origins
// in production.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::api::auth::AuthBearer;
use crate::app_state::AppState;
use crate::errors::EngineError;
use crate::rebalance::RebalancePlanner;
use crate::types::RiskCategory;

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // ── Public ──────────────────────────────────────────────────
        .route("/api/v1/health", get(health))
        // ── Authenticated ───────────────────────────────────────────
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/risk", get(composite_risk))
        .route("/api/v1/quote", post(quote))
        .route("/api/v1/claims/evaluate", post(evaluate_claim))
        .route("/api/v1/rebalance-plan", get(rebalance_plan))
        .route("/api/v1/stats", get(cycle_stats))
        .route("/api/v1/decisions", get(decisions))
        .route("/api/v1/control/start", post(control_start))
        .route("/api/v1/control/stop", post(control_stop))
        // ── Middleware & State ──────────────────────────────────────
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Error mapping
// =============================================================================

fn error_response(error: &EngineError) -> (StatusCode, axum::Json<serde_json::Value>) {
    let status = match error {
        EngineError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        EngineError::PolicyNotFound(_) => StatusCode::NOT_FOUND,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        axum::Json(serde_json::json!({ "error": error.to_string() })),
    )
}

// =============================================================================
// Health (public)
// =============================================================================

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let config = state.runtime_config.read();
    Json(serde_json::json!({
        "status": "ok",
        "agent": config.agent_name,
        "agent_id": config.agent_id,
        "state_version": state.current_state_version(),
        "server_time": chrono::Utc::now().timestamp_millis(),
    }))
}

// =============================================================================
// Full state snapshot (authenticated)
// =============================================================================

async fn full_state(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    Json(state.build_snapshot())
}

// =============================================================================
// Composite risk (authenticated)
// =============================================================================

async fn composite_risk(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    // Serves the cached reading, refreshing through the guarded path when
    // stale. Total: a degraded signal set still yields a composite.
    let composite = state.composite().await;
    Json(composite)
}

// =============================================================================
// Premium quote (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct QuoteRequest {
    coverage_amount: f64,
    risk_category: String,
    #[serde(default = "default_duration_days")]
    duration_days: u32,
}

fn default_duration_days() -> u32 {
    30
}

async fn quote(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<QuoteRequest>,
) -> impl IntoResponse {
    let category = RiskCategory::parse(&req.risk_category);
    let composite = state.composite().await;

    match state
        .pricer
        .quote(req.coverage_amount, category, req.duration_days, &composite)
        .await
    {
        Ok(quote) => Json(quote).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

// =============================================================================
// Claim evaluation (authenticated)
// =============================================================================

#[derive(Deserialize)]
struct EvaluateClaimRequest {
    policy_id: u64,
    trigger_price: f64,
    original_price: f64,
}

async fn evaluate_claim(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
    Json(req): Json<EvaluateClaimRequest>,
) -> impl IntoResponse {
    let policy = match state.policy_store.get_policy(req.policy_id).await {
        Ok(Some(policy)) => policy,
        Ok(None) => {
            return error_response(&EngineError::PolicyNotFound(req.policy_id)).into_response();
        }
        Err(e) => {
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                axum::Json(serde_json::json!({ "error": format!("{e:#}") })),
            )
                .into_response();
        }
    };

    match state
        .evaluator
        .evaluate(&policy, req.trigger_price, req.original_price)
        .await
    {
        Ok(decision) => Json(decision).into_response(),
        Err(e) => error_response(&e).into_response(),
    }
}

// =============================================================================
// Rebalance plan (authenticated)
// =============================================================================

async fn rebalance_plan(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let composite = state.composite().await;
    Json(RebalancePlanner::plan(&composite))
}

// =============================================================================
// Cycle stats (authenticated)
// =============================================================================

async fn cycle_stats(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.decision_loop() {
        Some(decision_loop) => Json(decision_loop.stats_snapshot()).into_response(),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(serde_json::json!({ "error": "decision loop not attached" })),
        )
            .into_response(),
    }
}

// =============================================================================
// Claim decisions audit trail (authenticated)
// =============================================================================

async fn decisions(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let claims = state.recent_claims.read().clone();
    Json(claims)
}

// =============================================================================
// Loop control (authenticated)
// =============================================================================

async fn control_start(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.decision_loop() {
        Some(decision_loop) => {
            let started = decision_loop.start();
            info!(started, "loop start requested via API");
            Json(serde_json::json!({
                "started": started,
                "loop_state": decision_loop.current_state().to_string(),
            }))
            .into_response()
        }
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(serde_json::json!({ "error": "decision loop not attached" })),
        )
            .into_response(),
    }
}

async fn control_stop(
    _auth: AuthBearer,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    match state.decision_loop() {
        Some(decision_loop) => {
            let stopped = decision_loop.stop();
            info!(stopped, "loop stop requested via API");
            Json(serde_json::json!({
                "stopped": stopped,
                "loop_state": decision_loop.current_state().to_string(),
            }))
            .into_response()
        }
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            axum::Json(serde_json::json!({ "error": "decision loop not attached" })),
        )
            .into_response(),
    }
}
