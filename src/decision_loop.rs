// =============================================================================
// Decision Loop — autonomous monitoring and execution
// =============================================================================
//
// One long-lived task drives strictly sequential cycles:
//   1. Read the agent's trust score; below the configured minimum the cycle
//      is log-only. Hard gate, never bypassed.
//   2. If the volatility refresh interval has elapsed, aggregate signals and
//      push the reading to the ledger. The refresh timestamp is recorded
//      only after an accepted submission.
//   3. Scan the active-policy index; evaluate any policy whose trigger
//      condition the current price meets; submit at most one payout per
//      policy, guarded by a per-policy in-flight marker.
//
// Stopping cancels only the idle wait between cycles — an in-flight cycle
// always runs to completion so a claim submission is never left half-issued.
// No error escapes a cycle: the outer catch counts it, logs it, and the next
// cycle proceeds on schedule.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::app_state::AppState;
use crate::audit::ClaimAudit;
use crate::claims::ClaimDecision;
use crate::config::RuntimeConfig;
use crate::errors::EngineError;
use crate::ledger::{ActionSubmitter, LedgerAction, PriceFeed, TrustOracle};
use crate::rebalance::RebalancePlanner;
use crate::types::{LoopState, Policy, PolicyStatus};

// =============================================================================
// Cycle statistics
// =============================================================================

/// Process-wide loop counters. Written only by the loop (single writer);
/// observers read snapshots.
#[derive(Default)]
pub struct CycleStats {
    cycles: AtomicU64,
    vol_updates: AtomicU64,
    claims_assessed: AtomicU64,
    claims_paid: AtomicU64,
    claims_rejected: AtomicU64,
    errors: AtomicU64,
    last_volatility_update_at: RwLock<Option<DateTime<Utc>>>,
}

/// Serialisable snapshot of [`CycleStats`].
#[derive(Debug, Clone, Serialize)]
pub struct CycleStatsSnapshot {
    pub cycles: u64,
    pub vol_updates: u64,
    pub claims_assessed: u64,
    pub claims_paid: u64,
    pub claims_rejected: u64,
    pub errors: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_volatility_update_at: Option<String>,
    pub running: bool,
}

// =============================================================================
// DecisionLoop
// =============================================================================

pub struct DecisionLoop {
    state: Arc<AppState>,
    submitter: Arc<dyn ActionSubmitter>,
    trust_oracle: Arc<dyn TrustOracle>,
    price_feed: Arc<dyn PriceFeed>,

    loop_state: RwLock<LoopState>,
    /// Wakes the idle wait between cycles on stop. Permit semantics: a stop
    /// issued mid-cycle is not lost.
    shutdown: Notify,
    stats: CycleStats,

    /// Policy ids with a payout submission currently in flight. Checked and
    /// set under one lock so the read-check-then-set is atomic.
    in_flight: Mutex<HashSet<u64>>,

    /// Monotonic timestamp of the last *accepted* volatility submission.
    last_vol_push: RwLock<Option<Instant>>,
}

impl DecisionLoop {
    pub fn new(
        state: Arc<AppState>,
        submitter: Arc<dyn ActionSubmitter>,
        trust_oracle: Arc<dyn TrustOracle>,
        price_feed: Arc<dyn PriceFeed>,
    ) -> Self {
        Self {
            state,
            submitter,
            trust_oracle,
            price_feed,
            loop_state: RwLock::new(LoopState::Idle),
            shutdown: Notify::new(),
            stats: CycleStats::default(),
            in_flight: Mutex::new(HashSet::new()),
            last_vol_push: RwLock::new(None),
        }
    }

    pub fn current_state(&self) -> LoopState {
        *self.loop_state.read()
    }

    pub fn stats_snapshot(&self) -> CycleStatsSnapshot {
        CycleStatsSnapshot {
            cycles: self.stats.cycles.load(Ordering::Relaxed),
            vol_updates: self.stats.vol_updates.load(Ordering::Relaxed),
            claims_assessed: self.stats.claims_assessed.load(Ordering::Relaxed),
            claims_paid: self.stats.claims_paid.load(Ordering::Relaxed),
            claims_rejected: self.stats.claims_rejected.load(Ordering::Relaxed),
            errors: self.stats.errors.load(Ordering::Relaxed),
            last_volatility_update_at: self
                .stats
                .last_volatility_update_at
                .read()
                .map(|t| t.to_rfc3339()),
            running: self.current_state() == LoopState::Running,
        }
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Start the loop. Returns false if it is already running or stopping.
    pub fn start(self: &Arc<Self>) -> bool {
        {
            let mut state = self.loop_state.write();
            match *state {
                LoopState::Idle | LoopState::Stopped => *state = LoopState::Running,
                LoopState::Running | LoopState::Stopping => return false,
            }
        }

        let this = self.clone();
        tokio::spawn(async move { this.run().await });
        true
    }

    /// Request a stop. Cancels the idle wait between cycles; a cycle in
    /// progress runs to completion first. Returns false if not running.
    pub fn stop(&self) -> bool {
        {
            let mut state = self.loop_state.write();
            if *state != LoopState::Running {
                return false;
            }
            *state = LoopState::Stopping;
        }
        info!("decision loop stop requested");
        self.shutdown.notify_one();
        true
    }

    async fn run(self: Arc<Self>) {
        let interval_secs = self.state.runtime_config.read().poll_interval_secs;
        info!(interval_secs, "decision loop started");

        loop {
            if self.current_state() != LoopState::Running {
                break;
            }

            self.run_once().await;

            let interval = self.state.runtime_config.read().poll_interval_secs;
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
                _ = self.shutdown.notified() => break,
            }
        }

        *self.loop_state.write() = LoopState::Stopped;
        info!("decision loop stopped");
    }

    /// One cycle, with the outer catch: any error is counted, logged, and
    /// absorbed so the next cycle proceeds on schedule.
    pub async fn run_once(&self) {
        let cycle = self.stats.cycles.fetch_add(1, Ordering::Relaxed) + 1;

        if let Err(e) = self.run_cycle(cycle).await {
            self.stats.errors.fetch_add(1, Ordering::Relaxed);
            self.state.push_error(format!("cycle {cycle}: {e:#}"));
            error!(cycle, error = %e, "decision cycle failed — continuing on schedule");
        }
    }

    // ── Cycle body ──────────────────────────────────────────────────────

    async fn run_cycle(&self, cycle: u64) -> Result<()> {
        let config = self.state.runtime_config.read().clone();
        debug!(cycle, "decision cycle starting");

        // 1. Hard trust gate.
        let read_timeout = Duration::from_secs(config.ledger_read_timeout_secs);
        let trust = tokio::time::timeout(read_timeout, self.trust_oracle.get_score(config.agent_id))
            .await
            .map_err(|_| anyhow::anyhow!("trust score fetch timed out"))?
            .context("fetching trust score")?;

        if trust < config.min_trust_score_bps {
            warn!(
                trust_bps = trust,
                min_bps = config.min_trust_score_bps,
                "trust score below minimum — skipping autonomous actions this cycle"
            );
            return Ok(());
        }

        // 2. Volatility refresh on its own, slower cadence. A failed
        //    submission is counted and retried next cycle; the claim scan
        //    still runs.
        let refresh_due = self.last_vol_push.read().map_or(true, |t| {
            t.elapsed().as_secs() >= config.volatility_update_interval_secs
        });
        if refresh_due {
            if let Err(e) = self.refresh_and_push_volatility(&config).await {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.state.push_error(format!("volatility update: {e:#}"));
                warn!(error = %e, "volatility update failed — will retry next cycle");
            }
        }

        // 3. Claim scan.
        if config.auto_claim_enabled {
            self.scan_policies(&config).await?;
        }

        Ok(())
    }

    async fn refresh_and_push_volatility(&self, config: &RuntimeConfig) -> Result<()> {
        let composite = self.state.aggregator.aggregate().await;
        self.state.store_composite(composite.clone());

        // Elevated risk also refreshes the defensive allocation plan.
        if composite.risk_level >= 60 {
            self.state.store_plan(RebalancePlanner::plan(&composite));
        }

        let action = LedgerAction::VolatilityUpdate {
            agent_id: config.agent_id,
            risk_level: composite.risk_level,
            black_swan: composite.black_swan_active,
            multiplier_bps: composite.multiplier_bps(),
        };

        let submit = self.submitter.submit(action);
        let confirmation =
            match tokio::time::timeout(Duration::from_secs(config.submit_timeout_secs), submit)
                .await
            {
                Ok(Ok(confirmation)) => confirmation,
                Ok(Err(e)) => {
                    return Err(EngineError::SubmissionFailed(format!("{e:#}")).into());
                }
                Err(_) => {
                    return Err(
                        EngineError::SubmissionFailed("submission timed out".to_string()).into(),
                    );
                }
            };

        // Timestamp recorded only after an accepted submission.
        *self.last_vol_push.write() = Some(Instant::now());
        *self.stats.last_volatility_update_at.write() = Some(Utc::now());
        self.stats.vol_updates.fetch_add(1, Ordering::Relaxed);

        info!(
            confirmation_id = %confirmation,
            risk_level = composite.risk_level,
            black_swan = composite.black_swan_active,
            "volatility pushed to ledger"
        );
        Ok(())
    }

    async fn scan_policies(&self, config: &RuntimeConfig) -> Result<()> {
        let read_timeout = Duration::from_secs(config.ledger_read_timeout_secs);
        let ids = tokio::time::timeout(read_timeout, self.state.policy_store.active_policy_ids())
            .await
            .map_err(|_| anyhow::anyhow!("active policy listing timed out"))?
            .context("listing active policies")?;

        debug!(count = ids.len(), "scanning active policies");

        // Sequential per policy: the in-flight marker check stays race-free
        // with a single writer per instant.
        for id in ids {
            if let Err(e) = self.assess_policy(id, config).await {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.state.push_error(format!("policy {id}: {e:#}"));
                warn!(policy_id = id, error = %e, "policy scan error — continuing with next policy");
            }
        }
        Ok(())
    }

    async fn assess_policy(&self, id: u64, config: &RuntimeConfig) -> Result<()> {
        let read_timeout = Duration::from_secs(config.ledger_read_timeout_secs);
        let Some(policy) = tokio::time::timeout(read_timeout, self.state.policy_store.get_policy(id))
            .await
            .map_err(|_| anyhow::anyhow!("policy read timed out"))?
            .context("reading policy")?
        else {
            debug!(policy_id = id, "policy missing from store — skipping");
            return Ok(());
        };

        if policy.status != PolicyStatus::Active {
            return Ok(());
        }
        if policy.expiry <= Utc::now() {
            debug!(policy_id = id, "policy expired — skipping");
            return Ok(());
        }
        if policy.original_price <= 0.0 {
            anyhow::bail!("policy has non-positive reference price");
        }

        let price = tokio::time::timeout(read_timeout, self.price_feed.spot_price(&policy.asset))
            .await
            .map_err(|_| anyhow::anyhow!("spot price fetch timed out"))?
            .with_context(|| format!("spot price for {}", policy.asset))?;

        let price_drop = (policy.original_price - price) / policy.original_price;
        if price_drop < policy.trigger_threshold() {
            return Ok(());
        }

        self.stats.claims_assessed.fetch_add(1, Ordering::Relaxed);
        let decision = self
            .state
            .evaluator
            .evaluate(&policy, price, policy.original_price)
            .await?;

        info!(
            policy_id = id,
            triggered = decision.triggered,
            confidence = decision.confidence,
            payout = decision.payout_amount,
            "claim assessed"
        );

        if decision.executable(config.min_claim_confidence) {
            self.execute_claim(&policy, &decision, config).await;
        } else if decision.triggered {
            // Assessed but not executed — distinct from rejected.
            info!(
                policy_id = id,
                confidence = decision.confidence,
                "confidence below execution gate — assessed, not executed"
            );
            self.state
                .push_claim_audit(ClaimAudit::assessed_not_executed(&decision));
        } else {
            self.stats.claims_rejected.fetch_add(1, Ordering::Relaxed);
            self.state.push_claim_audit(ClaimAudit::not_triggered(&decision));
        }

        Ok(())
    }

    /// Submit one claim payout, at most once per policy at any instant.
    /// The marker is cleared on completion, success or failure.
    pub async fn execute_claim(
        &self,
        policy: &Policy,
        decision: &ClaimDecision,
        config: &RuntimeConfig,
    ) {
        {
            let mut in_flight = self.in_flight.lock();
            if !in_flight.insert(policy.id) {
                debug!(policy_id = policy.id, "claim submission already in flight — skipping");
                return;
            }
        }

        let action = LedgerAction::ClaimPayout {
            agent_id: config.agent_id,
            policy_id: policy.id,
            payout_amount: decision.payout_amount,
        };

        let submit = self.submitter.submit(action);
        let result =
            match tokio::time::timeout(Duration::from_secs(config.submit_timeout_secs), submit)
                .await
            {
                Ok(inner) => inner,
                Err(_) => Err(anyhow::anyhow!("submission timed out")),
            };

        match result {
            Ok(confirmation) => {
                self.stats.claims_paid.fetch_add(1, Ordering::Relaxed);
                info!(
                    policy_id = policy.id,
                    confirmation_id = %confirmation,
                    payout = decision.payout_amount,
                    "claim paid"
                );
                self.state
                    .push_claim_audit(ClaimAudit::executed(decision, confirmation));
            }
            Err(e) => {
                self.stats.claims_rejected.fetch_add(1, Ordering::Relaxed);
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.state
                    .push_error(format!("claim payout for policy {}: {e:#}", policy.id));
                error!(policy_id = policy.id, error = %e, "claim submission failed");
                self.state
                    .push_claim_audit(ClaimAudit::submission_failed(decision, format!("{e:#}")));
            }
        }

        self.in_flight.lock().remove(&policy.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::ClaimOutcome;
    use crate::claims::ClaimEvaluator;
    use crate::ledger::{LedgerSim, PolicyStore};
    use crate::pricing::PremiumPricer;
    use crate::reasoning::TemplateReasoner;
    use crate::signals::{RiskAggregator, RiskSignal, SignalSource};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct FixedSource {
        score: u8,
    }

    #[async_trait]
    impl SignalSource for FixedSource {
        fn name(&self) -> &'static str {
            "realized_vol"
        }
        fn weight(&self) -> f64 {
            1.0
        }
        async fn fetch(&self) -> anyhow::Result<RiskSignal> {
            Ok(RiskSignal {
                name: "realized_vol".to_string(),
                raw_value: self.score as f64,
                score: self.score,
                weight: 1.0,
                description: "fixed".to_string(),
            })
        }
    }

    /// Submitter that sleeps, tracking the maximum number of concurrent
    /// calls it observed.
    struct SlowSubmitter {
        calls: AtomicUsize,
        concurrent: AtomicUsize,
        max_concurrent: AtomicUsize,
    }

    impl SlowSubmitter {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                concurrent: AtomicUsize::new(0),
                max_concurrent: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ActionSubmitter for SlowSubmitter {
        async fn submit(&self, _action: LedgerAction) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let now = self.concurrent.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_concurrent.fetch_max(now, Ordering::SeqCst);

            tokio::time::sleep(Duration::from_millis(100)).await;

            self.concurrent.fetch_sub(1, Ordering::SeqCst);
            Ok("slow-confirmation".to_string())
        }
    }

    /// Submitter whose failure mode can be toggled between cycles.
    struct FlakySubmitter {
        fail: std::sync::atomic::AtomicBool,
        calls: AtomicUsize,
    }

    impl FlakySubmitter {
        fn failing() -> Self {
            Self {
                fail: std::sync::atomic::AtomicBool::new(true),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ActionSubmitter for FlakySubmitter {
        async fn submit(&self, _action: LedgerAction) -> anyhow::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("ledger unavailable")
            }
            Ok("flaky-confirmation".to_string())
        }
    }

    /// Trust oracle that always errors.
    struct BrokenOracle;

    #[async_trait]
    impl TrustOracle for BrokenOracle {
        async fn get_score(&self, _agent_id: u64) -> anyhow::Result<u32> {
            anyhow::bail!("oracle RPC down")
        }
    }

    fn test_config() -> RuntimeConfig {
        let mut config = RuntimeConfig::default();
        config.poll_interval_secs = 1;
        config.submit_timeout_secs = 5;
        config
    }

    fn test_state(policy_store: Arc<dyn PolicyStore>) -> Arc<AppState> {
        let reasoner = Arc::new(TemplateReasoner);
        let aggregator = Arc::new(RiskAggregator::new(
            vec![Arc::new(FixedSource { score: 40 })],
            Duration::from_secs(1),
        ));
        let pricer = Arc::new(PremiumPricer::new(reasoner.clone(), 3600));
        let evaluator = Arc::new(ClaimEvaluator::new(reasoner));
        Arc::new(AppState::new(
            test_config(),
            aggregator,
            pricer,
            evaluator,
            policy_store,
        ))
    }

    fn seeded_ledger(trust_bps: u32, eth_price: f64) -> Arc<LedgerSim> {
        let ledger = Arc::new(LedgerSim::new(trust_bps));
        ledger.seed_demo_policies();
        ledger.set_price("ETH", eth_price);
        ledger
    }

    fn loop_with(ledger: Arc<LedgerSim>) -> Arc<DecisionLoop> {
        let state = test_state(ledger.clone());
        Arc::new(DecisionLoop::new(
            state,
            ledger.clone(),
            ledger.clone(),
            ledger,
        ))
    }

    #[tokio::test]
    async fn test_trust_gate_blocks_all_autonomous_action() {
        // ETH crashed 50% — every policy would trigger — but trust is low.
        let ledger = seeded_ledger(1000, 1600.0);
        let decision_loop = loop_with(ledger.clone());

        decision_loop.run_once().await;

        let stats = decision_loop.stats_snapshot();
        assert_eq!(stats.cycles, 1);
        assert_eq!(stats.claims_assessed, 0, "gated cycle must not assess claims");
        assert_eq!(stats.vol_updates, 0, "gated cycle must not push volatility");
        assert!(ledger.submissions().is_empty(), "gated cycle must not submit");
        assert_eq!(stats.errors, 0, "a trust gate skip is not an error");
    }

    #[tokio::test]
    async fn test_cycle_pays_triggered_claims_exactly_once() {
        // ETH down 50% from the 3200 reference: all three demo policies
        // (20%/30%/15% thresholds) trigger at full confidence.
        let ledger = seeded_ledger(8000, 1600.0);
        let decision_loop = loop_with(ledger.clone());

        decision_loop.run_once().await;

        let stats = decision_loop.stats_snapshot();
        assert_eq!(stats.claims_assessed, 3);
        assert_eq!(stats.claims_paid, 3);
        assert_eq!(stats.vol_updates, 1);
        // 1 volatility push + 3 payouts.
        assert_eq!(ledger.submissions().len(), 4);

        // Paid policies leave the active index; the next cycle pays nothing.
        decision_loop.run_once().await;
        let stats = decision_loop.stats_snapshot();
        assert_eq!(stats.claims_paid, 3, "no policy may be paid twice");
        assert_eq!(ledger.submissions().len(), 4);
    }

    #[tokio::test]
    async fn test_executed_claims_are_audited() {
        let ledger = seeded_ledger(8000, 1600.0);
        let decision_loop = loop_with(ledger.clone());

        decision_loop.run_once().await;

        let state = decision_loop.state.clone();
        let audits = state.recent_claims.read().clone();
        assert_eq!(audits.len(), 3);
        assert!(audits.iter().all(|a| a.outcome == ClaimOutcome::Executed));
        assert!(audits.iter().all(|a| a.confirmation_id.is_some()));
    }

    #[tokio::test]
    async fn test_quiet_market_assesses_nothing() {
        // ETH only 5% down: no trigger condition is met.
        let ledger = seeded_ledger(8000, 3040.0);
        let decision_loop = loop_with(ledger.clone());

        decision_loop.run_once().await;

        let stats = decision_loop.stats_snapshot();
        assert_eq!(stats.claims_assessed, 0);
        assert_eq!(stats.claims_paid, 0);
        // Only the volatility push goes out.
        assert_eq!(ledger.submissions().len(), 1);
    }

    #[tokio::test]
    async fn test_slow_submitter_sees_single_inflight_call_per_policy() {
        let ledger = seeded_ledger(8000, 1600.0);
        let state = test_state(ledger.clone());
        let submitter = Arc::new(SlowSubmitter::new());
        let decision_loop = Arc::new(DecisionLoop::new(
            state,
            submitter.clone(),
            ledger.clone(),
            ledger.clone(),
        ));

        let policy = ledger.get_policy(1).await.unwrap().unwrap();
        let decision = decision_loop
            .state
            .evaluator
            .evaluate(&policy, 1600.0, policy.original_price)
            .await
            .unwrap();
        let config = test_config();

        // Two concurrent execution attempts for the same policy: the
        // in-flight marker must collapse them to one submission.
        let (a, b) = {
            let dl_a = decision_loop.clone();
            let dl_b = decision_loop.clone();
            let (policy_a, decision_a, config_a) = (policy.clone(), decision.clone(), config.clone());
            let (policy_b, decision_b, config_b) = (policy.clone(), decision.clone(), config.clone());
            (
                tokio::spawn(async move {
                    dl_a.execute_claim(&policy_a, &decision_a, &config_a).await
                }),
                tokio::spawn(async move {
                    dl_b.execute_claim(&policy_b, &decision_b, &config_b).await
                }),
            )
        };
        a.await.unwrap();
        b.await.unwrap();

        assert_eq!(
            submitter.calls.load(Ordering::SeqCst),
            1,
            "only one submission may be issued while one is in flight"
        );
        assert_eq!(submitter.max_concurrent.load(Ordering::SeqCst), 1);

        // The marker is cleared on completion, so a later cycle may retry.
        decision_loop
            .execute_claim(&policy, &decision, &config)
            .await;
        assert_eq!(submitter.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_cycle_error_is_counted_and_loop_survives() {
        let ledger = seeded_ledger(8000, 1600.0);
        let state = test_state(ledger.clone());
        let decision_loop = Arc::new(DecisionLoop::new(
            state,
            ledger.clone(),
            Arc::new(BrokenOracle),
            ledger,
        ));

        decision_loop.run_once().await;
        decision_loop.run_once().await;

        let stats = decision_loop.stats_snapshot();
        assert_eq!(stats.cycles, 2, "cycles keep running after a failure");
        assert_eq!(stats.errors, 2);
        assert!(!decision_loop.state.recent_errors.read().is_empty());
    }

    #[tokio::test]
    async fn test_refresh_timestamp_recorded_only_after_accepted_submission() {
        let ledger = seeded_ledger(8000, 3040.0);
        let state = test_state(ledger.clone());
        let submitter = Arc::new(FlakySubmitter::failing());
        let decision_loop = Arc::new(DecisionLoop::new(
            state,
            submitter.clone(),
            ledger.clone(),
            ledger,
        ));

        decision_loop.run_once().await;
        let stats = decision_loop.stats_snapshot();
        assert_eq!(stats.vol_updates, 0);
        assert!(stats.last_volatility_update_at.is_none());
        assert_eq!(stats.errors, 1);

        // Once the ledger recovers, the very next cycle retries the push
        // because no refresh timestamp was recorded.
        submitter.fail.store(false, Ordering::SeqCst);
        decision_loop.run_once().await;
        let stats = decision_loop.stats_snapshot();
        assert_eq!(stats.vol_updates, 1);
        assert!(stats.last_volatility_update_at.is_some());
        assert_eq!(submitter.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_payout_counts_rejected_and_clears_marker() {
        let ledger = seeded_ledger(8000, 1600.0);
        let state = test_state(ledger.clone());
        let submitter = Arc::new(FlakySubmitter::failing());
        let decision_loop = Arc::new(DecisionLoop::new(
            state,
            submitter.clone(),
            ledger.clone(),
            ledger.clone(),
        ));

        let policy = ledger.get_policy(1).await.unwrap().unwrap();
        let decision = decision_loop
            .state
            .evaluator
            .evaluate(&policy, 1600.0, policy.original_price)
            .await
            .unwrap();
        let config = test_config();

        decision_loop
            .execute_claim(&policy, &decision, &config)
            .await;

        let stats = decision_loop.stats_snapshot();
        assert_eq!(stats.claims_paid, 0);
        assert_eq!(stats.claims_rejected, 1);
        assert_eq!(stats.errors, 1);

        let audits = decision_loop.state.recent_claims.read().clone();
        assert_eq!(audits.len(), 1);
        assert_eq!(audits[0].outcome, ClaimOutcome::SubmissionFailed);
        assert!(audits[0].error.is_some());

        assert!(
            decision_loop.in_flight.lock().is_empty(),
            "in-flight marker must be cleared after a failed submission"
        );
    }

    #[tokio::test]
    async fn test_start_stop_state_machine() {
        let ledger = seeded_ledger(8000, 3040.0);
        let decision_loop = loop_with(ledger);

        assert_eq!(decision_loop.current_state(), LoopState::Idle);
        assert!(decision_loop.start());
        assert!(!decision_loop.start(), "double start must be refused");

        // Let the first cycle run, then stop; the idle wait is cancelled.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(decision_loop.stop());

        for _ in 0..100 {
            if decision_loop.current_state() == LoopState::Stopped {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(decision_loop.current_state(), LoopState::Stopped);
        assert!(!decision_loop.stop(), "stop on a stopped loop is a no-op");

        // A stopped loop can be started again.
        assert!(decision_loop.start());
        decision_loop.stop();
    }
}
