// =============================================================================
// Central Application State — TailGuard Decision Engine
// =============================================================================
//
// The single source of truth for the engine. The decision loop and the API
// layer both hold `Arc<AppState>`; subsystem engines manage their own
// interior mutability.
//
// Thread safety:
//   - Atomic counter for lock-free version tracking.
//   - parking_lot::RwLock for all mutable shared collections.
//   - The composite cache is written only by the decision loop or by an
//     on-demand refresh guarded by a single async mutex; readers always get
//     a clone (copy-on-read), never a partially-updated reading.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::Serialize;

use crate::audit::ClaimAudit;
use crate::claims::ClaimEvaluator;
use crate::config::RuntimeConfig;
use crate::decision_loop::{CycleStatsSnapshot, DecisionLoop};
use crate::ledger::PolicyStore;
use crate::pricing::PremiumPricer;
use crate::rebalance::RebalancePlan;
use crate::signals::{CompositeRisk, RiskAggregator};
use crate::types::LoopState;

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;
/// Maximum number of recent claim audits to retain.
const MAX_RECENT_CLAIMS: usize = 100;

// =============================================================================
// Error Record
// =============================================================================

/// A recorded error event for the API error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    /// Human-readable error message.
    pub message: String,
    /// ISO 8601 timestamp.
    pub at: String,
}

// =============================================================================
// AppState
// =============================================================================

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    /// Monotonically increasing version counter, incremented on every
    /// meaningful state mutation.
    pub state_version: AtomicU64,

    // ── Configuration ───────────────────────────────────────────────────
    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    // ── Engines ─────────────────────────────────────────────────────────
    pub aggregator: Arc<RiskAggregator>,
    pub pricer: Arc<PremiumPricer>,
    pub evaluator: Arc<ClaimEvaluator>,
    pub policy_store: Arc<dyn PolicyStore>,

    // ── Composite cache ─────────────────────────────────────────────────
    latest_composite: RwLock<Option<CompositeRisk>>,
    refresh_lock: tokio::sync::Mutex<()>,

    // ── Rebalance ───────────────────────────────────────────────────────
    latest_plan: RwLock<Option<RebalancePlan>>,

    // ── Audit trails ────────────────────────────────────────────────────
    pub recent_claims: RwLock<Vec<ClaimAudit>>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    // ── Decision loop handle (set once after construction) ──────────────
    decision_loop: RwLock<Option<Arc<DecisionLoop>>>,

    // ── Timing ──────────────────────────────────────────────────────────
    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(
        config: RuntimeConfig,
        aggregator: Arc<RiskAggregator>,
        pricer: Arc<PremiumPricer>,
        evaluator: Arc<ClaimEvaluator>,
        policy_store: Arc<dyn PolicyStore>,
    ) -> Self {
        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            aggregator,
            pricer,
            evaluator,
            policy_store,
            latest_composite: RwLock::new(None),
            refresh_lock: tokio::sync::Mutex::new(()),
            latest_plan: RwLock::new(None),
            recent_claims: RwLock::new(Vec::new()),
            recent_errors: RwLock::new(Vec::new()),
            decision_loop: RwLock::new(None),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Decision loop handle ────────────────────────────────────────────

    /// Attach the decision loop after both sides are constructed.
    pub fn attach_loop(&self, decision_loop: Arc<DecisionLoop>) {
        *self.decision_loop.write() = Some(decision_loop);
    }

    pub fn decision_loop(&self) -> Option<Arc<DecisionLoop>> {
        self.decision_loop.read().clone()
    }

    // ── Composite cache ─────────────────────────────────────────────────

    /// Replace the cached composite reading. Called by the loop and by the
    /// on-demand refresh path only.
    pub fn store_composite(&self, composite: CompositeRisk) {
        *self.latest_composite.write() = Some(composite);
        self.increment_version();
    }

    /// Copy-on-read snapshot of the cached reading, if any.
    pub fn cached_composite(&self) -> Option<CompositeRisk> {
        self.latest_composite.read().clone()
    }

    /// Return a fresh composite reading, refreshing the cache when stale.
    ///
    /// Concurrent callers serialise on the refresh mutex so at most one
    /// aggregation runs at a time; the rest pick up the refreshed cache.
    pub async fn composite(&self) -> CompositeRisk {
        let ttl = chrono::Duration::seconds(
            self.runtime_config.read().risk_cache_ttl_secs as i64,
        );

        if let Some(cached) = self.cached_composite() {
            if cached.age() <= ttl {
                return cached;
            }
        }

        let _guard = self.refresh_lock.lock().await;
        if let Some(cached) = self.cached_composite() {
            if cached.age() <= ttl {
                return cached;
            }
        }

        let composite = self.aggregator.aggregate().await;
        self.store_composite(composite.clone());
        composite
    }

    // ── Rebalance plan ──────────────────────────────────────────────────

    pub fn store_plan(&self, plan: RebalancePlan) {
        *self.latest_plan.write() = Some(plan);
        self.increment_version();
    }

    pub fn latest_plan(&self) -> Option<RebalancePlan> {
        self.latest_plan.read().clone()
    }

    // ── Audit trails ────────────────────────────────────────────────────

    /// Record an error message. The ring buffer is capped; oldest entries
    /// are evicted when the limit is reached.
    pub fn push_error(&self, message: String) {
        let record = ErrorRecord {
            message,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        drop(errors);

        self.increment_version();
    }

    /// Record a claim audit. The ring buffer is capped; oldest entries are
    /// evicted when the limit is reached.
    pub fn push_claim_audit(&self, audit: ClaimAudit) {
        let mut claims = self.recent_claims.write();
        claims.push(audit);
        while claims.len() > MAX_RECENT_CLAIMS {
            claims.remove(0);
        }
        drop(claims);

        self.increment_version();
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Build a complete, serialisable snapshot of the engine state for the
    /// REST surface.
    pub fn build_snapshot(&self) -> EngineSnapshot {
        let config = self.runtime_config.read();
        let (loop_state, cycle_stats) = match self.decision_loop() {
            Some(dl) => (dl.current_state(), Some(dl.stats_snapshot())),
            None => (LoopState::Idle, None),
        };

        EngineSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            agent_id: config.agent_id,
            agent_name: config.agent_name.clone(),
            loop_state: loop_state.to_string(),
            cycle_stats,
            composite: self.cached_composite(),
            rebalance_plan: self.latest_plan(),
            recent_claims: self.recent_claims.read().clone(),
            recent_errors: self.recent_errors.read().clone(),
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}

// =============================================================================
// Serialisable snapshot
// =============================================================================

/// Full engine state snapshot sent to API clients.
#[derive(Debug, Clone, Serialize)]
pub struct EngineSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub agent_id: u64,
    pub agent_name: String,
    pub loop_state: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub cycle_stats: Option<CycleStatsSnapshot>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub composite: Option<CompositeRisk>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub rebalance_plan: Option<RebalancePlan>,

    pub recent_claims: Vec<ClaimAudit>,
    pub recent_errors: Vec<ErrorRecord>,
    pub uptime_secs: u64,
}
