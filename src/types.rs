// =============================================================================
// Shared types used across the TailGuard decision engine
// =============================================================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of an insurance policy. Owned by the external ledger;
/// the engine only reads it and proposes transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PolicyStatus {
    Active,
    Expired,
    Claimed,
    Cancelled,
}

impl std::fmt::Display for PolicyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "ACTIVE"),
            Self::Expired => write!(f, "EXPIRED"),
            Self::Claimed => write!(f, "CLAIMED"),
            Self::Cancelled => write!(f, "CANCELLED"),
        }
    }
}

/// Risk category a policy insures against. Determines the base premium rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RiskCategory {
    DefiProtocol,
    StablecoinDepeg,
    Bridge,
    Liquidation,
    OracleManipulation,
    GovernanceAttack,
    General,
}

impl RiskCategory {
    /// Parse a category label. Unknown labels fall back to `General` so a
    /// quote request never fails on an unrecognised category.
    pub fn parse(label: &str) -> Self {
        match label {
            "defi-protocol" => Self::DefiProtocol,
            "stablecoin-depeg" => Self::StablecoinDepeg,
            "bridge" => Self::Bridge,
            "liquidation" => Self::Liquidation,
            "oracle-manipulation" => Self::OracleManipulation,
            "governance-attack" => Self::GovernanceAttack,
            _ => Self::General,
        }
    }
}

impl std::fmt::Display for RiskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::DefiProtocol => write!(f, "defi-protocol"),
            Self::StablecoinDepeg => write!(f, "stablecoin-depeg"),
            Self::Bridge => write!(f, "bridge"),
            Self::Liquidation => write!(f, "liquidation"),
            Self::OracleManipulation => write!(f, "oracle-manipulation"),
            Self::GovernanceAttack => write!(f, "governance-attack"),
            Self::General => write!(f, "general"),
        }
    }
}

/// Discrete risk bucket derived from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskRecommendation {
    Low,
    Moderate,
    Elevated,
    High,
    BlackSwan,
}

impl RiskRecommendation {
    /// Map a composite risk level to its regime bucket.
    ///
    /// Thresholds: `<20` Low, `<40` Moderate, `<60` Elevated, `<80` High,
    /// `>=80` BlackSwan.
    pub fn from_risk_level(level: u8) -> Self {
        match level {
            0..=19 => Self::Low,
            20..=39 => Self::Moderate,
            40..=59 => Self::Elevated,
            60..=79 => Self::High,
            _ => Self::BlackSwan,
        }
    }
}

impl std::fmt::Display for RiskRecommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "LOW"),
            Self::Moderate => write!(f, "MODERATE"),
            Self::Elevated => write!(f, "ELEVATED"),
            Self::High => write!(f, "HIGH"),
            Self::BlackSwan => write!(f, "BLACK_SWAN"),
        }
    }
}

/// An insurance policy as read from the ledger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    pub id: u64,
    /// Policyholder identifier (address on the ledger).
    pub holder: String,
    /// Covered amount in USD.
    pub coverage_amount: f64,
    pub category: RiskCategory,
    /// Asset whose price drop triggers the payout (e.g. "ETH").
    pub asset: String,
    /// Reference price captured at policy creation.
    pub original_price: f64,
    /// Minimum price drop, in basis points of the reference price, required
    /// for a claim to be valid (e.g. 2000 = 20%).
    pub trigger_threshold_bps: u32,
    pub created_at: DateTime<Utc>,
    pub expiry: DateTime<Utc>,
    pub status: PolicyStatus,
}

impl Policy {
    /// Trigger threshold as a fraction (e.g. 0.20 for 2000 bps).
    pub fn trigger_threshold(&self) -> f64 {
        self.trigger_threshold_bps as f64 / 10_000.0
    }
}

/// Lifecycle state of the decision loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopState {
    Idle,
    Running,
    Stopping,
    Stopped,
}

impl Default for LoopState {
    fn default() -> Self {
        Self::Idle
    }
}

impl std::fmt::Display for LoopState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::Running => write!(f, "Running"),
            Self::Stopping => write!(f, "Stopping"),
            Self::Stopped => write!(f, "Stopped"),
        }
    }
}

/// Which reasoning implementation the engine uses for justifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReasoningMode {
    /// Deterministic templated reasoning built from the numeric inputs.
    Template,
    /// LLM-backed reasoning over HTTP.
    Llm,
}

impl Default for ReasoningMode {
    fn default() -> Self {
        Self::Template
    }
}

impl std::fmt::Display for ReasoningMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Template => write!(f, "template"),
            Self::Llm => write!(f, "llm"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recommendation_thresholds() {
        assert_eq!(RiskRecommendation::from_risk_level(0), RiskRecommendation::Low);
        assert_eq!(RiskRecommendation::from_risk_level(19), RiskRecommendation::Low);
        assert_eq!(RiskRecommendation::from_risk_level(20), RiskRecommendation::Moderate);
        assert_eq!(RiskRecommendation::from_risk_level(39), RiskRecommendation::Moderate);
        assert_eq!(RiskRecommendation::from_risk_level(40), RiskRecommendation::Elevated);
        assert_eq!(RiskRecommendation::from_risk_level(59), RiskRecommendation::Elevated);
        assert_eq!(RiskRecommendation::from_risk_level(60), RiskRecommendation::High);
        assert_eq!(RiskRecommendation::from_risk_level(79), RiskRecommendation::High);
        assert_eq!(RiskRecommendation::from_risk_level(80), RiskRecommendation::BlackSwan);
        assert_eq!(RiskRecommendation::from_risk_level(100), RiskRecommendation::BlackSwan);
    }

    #[test]
    fn test_unknown_category_falls_back_to_general() {
        assert_eq!(RiskCategory::parse("bridge"), RiskCategory::Bridge);
        assert_eq!(RiskCategory::parse("quantum-rug"), RiskCategory::General);
        assert_eq!(RiskCategory::parse(""), RiskCategory::General);
    }

    #[test]
    fn test_trigger_threshold_fraction() {
        let policy = Policy {
            id: 1,
            holder: "0xabc".to_string(),
            coverage_amount: 100_000.0,
            category: RiskCategory::Bridge,
            asset: "ETH".to_string(),
            original_price: 100.0,
            trigger_threshold_bps: 2000,
            created_at: Utc::now(),
            expiry: Utc::now(),
            status: PolicyStatus::Active,
        };
        assert!((policy.trigger_threshold() - 0.20).abs() < 1e-12);
    }
}
