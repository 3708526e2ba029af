// =============================================================================
// Rebalance Planner — tiered defensive capital allocation
// =============================================================================
//
// Three fixed tiers selected by composite risk level:
//   >= 80  emergency  — full flight to stablecoins
//   >= 60  defensive  — reduce volatile exposure
//   else   cautious   — slight defensive tilt
//
// Allocation vectors are configuration tables, not computed, and each sums
// to 1.0. Swap execution against a DEX aggregator is a separate concern;
// this component only plans.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::signals::CompositeRisk;

/// Risk level at which the defensive tier starts.
const DEFENSIVE_THRESHOLD: u8 = 60;
/// Risk level at which the emergency tier starts.
const EMERGENCY_THRESHOLD: u8 = 80;

const EMERGENCY_ALLOCATION: [(&str, f64); 4] =
    [("USDC", 0.70), ("USDT", 0.20), ("DAI", 0.10), ("ETH", 0.00)];
const DEFENSIVE_ALLOCATION: [(&str, f64); 4] =
    [("USDC", 0.40), ("USDT", 0.20), ("DAI", 0.10), ("ETH", 0.30)];
const CAUTIOUS_ALLOCATION: [(&str, f64); 4] =
    [("USDC", 0.20), ("USDT", 0.10), ("DAI", 0.05), ("ETH", 0.65)];

// =============================================================================
// RebalancePlan
// =============================================================================

/// One entry in the plan's top-signal summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TopSignal {
    pub name: String,
    pub score: u8,
}

/// Target allocation plan produced for a composite reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub triggered_at_risk_level: u8,
    pub action: String,
    pub target_allocation: HashMap<String, f64>,
    /// Up to three highest-scoring signals, ties broken by name ascending
    /// so output is deterministic across runs with equal scores.
    pub top_signals: Vec<TopSignal>,
}

// =============================================================================
// RebalancePlanner
// =============================================================================

pub struct RebalancePlanner;

impl RebalancePlanner {
    /// Build the allocation plan for the given composite reading.
    pub fn plan(composite: &CompositeRisk) -> RebalancePlan {
        let risk_level = composite.risk_level;

        let (table, action) = if risk_level >= EMERGENCY_THRESHOLD {
            (
                &EMERGENCY_ALLOCATION,
                "EMERGENCY: Full flight to stablecoins",
            )
        } else if risk_level >= DEFENSIVE_THRESHOLD {
            (
                &DEFENSIVE_ALLOCATION,
                "DEFENSIVE: Reducing volatile exposure 70%",
            )
        } else {
            (&CAUTIOUS_ALLOCATION, "CAUTIOUS: Slight defensive tilt")
        };

        if risk_level >= DEFENSIVE_THRESHOLD {
            warn!(risk_level, action, "rebalance plan triggered");
        }

        let mut ranked: Vec<TopSignal> = composite
            .signals
            .values()
            .map(|s| TopSignal {
                name: s.name.clone(),
                score: s.score,
            })
            .collect();
        ranked.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.name.cmp(&b.name)));
        ranked.truncate(3);

        RebalancePlan {
            triggered_at_risk_level: risk_level,
            action: action.to_string(),
            target_allocation: table
                .iter()
                .map(|(asset, share)| (asset.to_string(), *share))
                .collect(),
            top_signals: ranked,
        }
    }
}
