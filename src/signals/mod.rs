// =============================================================================
// Signals Module
// =============================================================================
//
// Risk-signal pipeline for the decision engine:
// - Six independent signal sources (on-chain + off-chain market feeds)
// - Concurrent aggregation with per-source failure isolation
// - Weighted 0-100 composite risk score with regime classification

pub mod aggregator;
pub mod sources;

pub use aggregator::{CompositeRisk, RiskAggregator};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

// =============================================================================
// Canonical signal set
// =============================================================================

pub const REALIZED_VOL: &str = "realized_vol";
pub const FUNDING_RATES: &str = "funding_rates";
pub const LIQUIDATION_VOL: &str = "liquidation_vol";
pub const TVL_DRAWDOWN: &str = "tvl_drawdown";
pub const STABLECOIN_DEPEG: &str = "stablecoin_depeg";
pub const BRIDGE_ANOMALY: &str = "bridge_anomaly";

// =============================================================================
// RiskSignal
// =============================================================================

/// A single normalised risk signal. Immutable once produced; one instance
/// per source per aggregation cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSignal {
    pub name: String,
    /// Raw signal value in source-native units (vol %, USD, bps, ...).
    pub raw_value: f64,
    /// Normalised 0-100 contribution score.
    pub score: u8,
    /// Weight in the composite, in [0, 1].
    pub weight: f64,
    pub description: String,
}

impl RiskSignal {
    /// Neutral stand-in used when a source fails or times out. One failing
    /// source must never abort or bias the others.
    pub fn neutral_fallback(name: &str, weight: f64) -> Self {
        Self {
            name: name.to_string(),
            raw_value: 0.0,
            score: 25,
            weight,
            description: "Signal unavailable — using neutral baseline".to_string(),
        }
    }
}

// =============================================================================
// SignalSource
// =============================================================================

/// One external data feed producing a normalised risk signal.
///
/// Implementations own their HTTP clients and provider-specific parsing.
/// A source may retry or degrade internally, but the aggregator treats any
/// returned error (or a timeout) as "unavailable" and substitutes the
/// neutral fallback for that source only.
#[async_trait]
pub trait SignalSource: Send + Sync {
    /// Canonical signal name (one of the constants above).
    fn name(&self) -> &'static str;

    /// Weight of this signal in the composite score.
    fn weight(&self) -> f64;

    /// Fetch and normalise the current reading.
    async fn fetch(&self) -> anyhow::Result<RiskSignal>;
}
