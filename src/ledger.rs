// =============================================================================
// Ledger collaborators — traits for every external dependency of the loop
// =============================================================================
//
// The engine never talks to a chain, a database, or a price provider
// directly from the decision path; it depends on these interfaces. Transport
// concerns (signing, gas, retry tuning) live behind the implementations.
//
// `LedgerSim` is the in-memory implementation used in demo mode and in
// tests: policies behind an RwLock keyed by id with an explicit active
// index, uuid confirmation ids, and a configurable trust score.

use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{Policy, PolicyStatus, RiskCategory};

// =============================================================================
// Actions
// =============================================================================

/// A state change proposed to the external ledger.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LedgerAction {
    /// Push a fresh composite reading to the on-ledger volatility oracle.
    VolatilityUpdate {
        agent_id: u64,
        risk_level: u8,
        black_swan: bool,
        multiplier_bps: u32,
    },
    /// Pay out a triggered claim.
    ClaimPayout {
        agent_id: u64,
        policy_id: u64,
        payout_amount: f64,
    },
}

// =============================================================================
// Collaborator traits
// =============================================================================

/// Submits actions to the external ledger. Idempotent submission is the
/// caller's responsibility, not this collaborator's.
#[async_trait]
pub trait ActionSubmitter: Send + Sync {
    /// Submit an action; returns a confirmation identifier on acceptance.
    async fn submit(&self, action: LedgerAction) -> Result<String>;
}

/// Basis-point trust score gate for autonomous action.
#[async_trait]
pub trait TrustOracle: Send + Sync {
    /// Current trust score for the agent, in [0, 10000].
    async fn get_score(&self, agent_id: u64) -> Result<u32>;
}

/// Read-only policy lookup with an explicit active-policy index.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get_policy(&self, id: u64) -> Result<Option<Policy>>;

    /// Ids of all currently-active policies. An explicit index, not a
    /// probe over a dense id range.
    async fn active_policy_ids(&self) -> Result<Vec<u64>>;
}

/// Spot price lookup for insured assets.
#[async_trait]
pub trait PriceFeed: Send + Sync {
    async fn spot_price(&self, asset: &str) -> Result<f64>;
}

// =============================================================================
// LedgerSim
// =============================================================================

/// In-memory ledger standing in for the on-chain client.
pub struct LedgerSim {
    policies: RwLock<HashMap<u64, Policy>>,
    prices: RwLock<HashMap<String, f64>>,
    trust_score_bps: RwLock<u32>,
    submissions: RwLock<Vec<(String, LedgerAction)>>,
}

impl LedgerSim {
    pub fn new(trust_score_bps: u32) -> Self {
        Self {
            policies: RwLock::new(HashMap::new()),
            prices: RwLock::new(HashMap::new()),
            trust_score_bps: RwLock::new(trust_score_bps),
            submissions: RwLock::new(Vec::new()),
        }
    }

    pub fn insert_policy(&self, policy: Policy) {
        self.policies.write().insert(policy.id, policy);
    }

    pub fn set_price(&self, asset: &str, price: f64) {
        self.prices.write().insert(asset.to_string(), price);
    }

    pub fn set_trust_score(&self, bps: u32) {
        *self.trust_score_bps.write() = bps;
    }

    /// Submissions accepted so far, oldest first.
    pub fn submissions(&self) -> Vec<(String, LedgerAction)> {
        self.submissions.read().clone()
    }

    /// Seed a small policy book so unattended dry runs have something to
    /// monitor.
    pub fn seed_demo_policies(&self) {
        let now = Utc::now();
        let demo = [
            (1u64, "0x7c3a9f41", 250_000.0, RiskCategory::DefiProtocol, 2000u32, 3200.0),
            (2, "0xb81e02dd", 1_000_000.0, RiskCategory::Bridge, 3000, 3200.0),
            (3, "0x44f6a7c0", 500_000.0, RiskCategory::StablecoinDepeg, 1500, 3200.0),
        ];

        for (id, holder, coverage, category, threshold_bps, price) in demo {
            self.insert_policy(Policy {
                id,
                holder: holder.to_string(),
                coverage_amount: coverage,
                category,
                asset: "ETH".to_string(),
                original_price: price,
                trigger_threshold_bps: threshold_bps,
                created_at: now,
                expiry: now + Duration::days(90),
                status: PolicyStatus::Active,
            });
        }
        self.set_price("ETH", 3200.0);
        info!(count = demo.len(), "demo policies seeded");
    }
}

#[async_trait]
impl ActionSubmitter for LedgerSim {
    async fn submit(&self, action: LedgerAction) -> Result<String> {
        let confirmation_id = Uuid::new_v4().to_string();

        // Mirror the ledger's own state transition so a paid policy does
        // not stay eligible on the next scan.
        if let LedgerAction::ClaimPayout { policy_id, .. } = &action {
            if let Some(policy) = self.policies.write().get_mut(policy_id) {
                policy.status = PolicyStatus::Claimed;
            }
        }

        info!(confirmation_id = %confirmation_id, action = ?action, "simulated ledger submission");
        self.submissions
            .write()
            .push((confirmation_id.clone(), action));
        Ok(confirmation_id)
    }
}

#[async_trait]
impl TrustOracle for LedgerSim {
    async fn get_score(&self, agent_id: u64) -> Result<u32> {
        let score = *self.trust_score_bps.read();
        debug!(agent_id, score, "trust score read");
        Ok(score)
    }
}

#[async_trait]
impl PolicyStore for LedgerSim {
    async fn get_policy(&self, id: u64) -> Result<Option<Policy>> {
        Ok(self.policies.read().get(&id).cloned())
    }

    async fn active_policy_ids(&self) -> Result<Vec<u64>> {
        let mut ids: Vec<u64> = self
            .policies
            .read()
            .values()
            .filter(|p| p.status == PolicyStatus::Active)
            .map(|p| p.id)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }
}

#[async_trait]
impl PriceFeed for LedgerSim {
    async fn spot_price(&self, asset: &str) -> Result<f64> {
        self.prices
            .read()
            .get(asset)
            .copied()
            .ok_or_else(|| anyhow::anyhow!("no price for asset {asset}"))
    }
}
