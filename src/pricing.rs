// =============================================================================
// Premium Pricer — composite-risk-adjusted insurance quoting
// =============================================================================
//
// Pricing model:
//   base_rate_bps   = BASE_RATES[category]           (annual, basis points)
//   adjusted_rate   = round(base_rate * multiplier) * duration_discount
//   premium         = coverage * adjusted_rate / 10000 * (duration / 365)
//
// Duration discounts: x0.85 for >= 180 days, x0.92 for >= 90 days.
// A quote never fails because reasoning generation failed — the reasoner
// degrades to a deterministic template and the quote is flagged.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::reasoning::{template_quote_reasoning, QuoteContext, ReasoningService};
use crate::signals::{
    CompositeRisk, BRIDGE_ANOMALY, LIQUIDATION_VOL, REALIZED_VOL, STABLECOIN_DEPEG,
};
use crate::types::RiskCategory;

/// Maximum number of risk factors attached to a quote.
const MAX_RISK_FACTORS: usize = 5;

// =============================================================================
// PremiumQuote
// =============================================================================

/// A premium quote, valid until `valid_until`. Re-quoting after expiry must
/// recompute from a fresh composite reading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PremiumQuote {
    pub coverage_amount: f64,
    pub premium_amount: f64,
    /// Annualised premium rate in basis points, after all adjustments.
    pub premium_rate_bps: u32,
    pub risk_level: u8,
    pub risk_factors: Vec<String>,
    pub valid_until: DateTime<Utc>,
    pub reasoning: String,
    /// True when the reasoning collaborator failed and the deterministic
    /// template was used instead.
    pub reasoning_degraded: bool,
}

// =============================================================================
// PremiumPricer
// =============================================================================

pub struct PremiumPricer {
    reasoning: Arc<dyn ReasoningService>,
    quote_validity: Duration,
}

impl PremiumPricer {
    pub fn new(reasoning: Arc<dyn ReasoningService>, quote_validity_secs: u64) -> Self {
        Self {
            reasoning,
            quote_validity: Duration::seconds(quote_validity_secs as i64),
        }
    }

    /// Base annual premium rate by category, in basis points.
    pub fn base_rate_bps(category: RiskCategory) -> u32 {
        match category {
            RiskCategory::DefiProtocol => 200,
            RiskCategory::StablecoinDepeg => 50,
            RiskCategory::Bridge => 300,
            RiskCategory::Liquidation => 150,
            RiskCategory::OracleManipulation => 250,
            RiskCategory::GovernanceAttack => 100,
            RiskCategory::General => 175,
        }
    }

    /// Price a quote against the given composite reading.
    pub async fn quote(
        &self,
        coverage_amount: f64,
        category: RiskCategory,
        duration_days: u32,
        composite: &CompositeRisk,
    ) -> Result<PremiumQuote, EngineError> {
        if coverage_amount <= 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "coverage amount must be positive, got {coverage_amount}"
            )));
        }
        if duration_days == 0 || duration_days > 365 {
            return Err(EngineError::InvalidInput(format!(
                "duration must be 1-365 days, got {duration_days}"
            )));
        }

        let base_rate_bps = Self::base_rate_bps(category);
        let risk_adjusted_bps =
            (base_rate_bps as f64 * composite.premium_multiplier).round();

        let duration_discount = if duration_days >= 180 {
            0.85
        } else if duration_days >= 90 {
            0.92
        } else {
            1.0
        };
        let premium_rate_bps = (risk_adjusted_bps * duration_discount).round() as u32;

        let premium_amount = coverage_amount * premium_rate_bps as f64 / 10_000.0
            * (duration_days as f64 / 365.0);
        let premium_amount = (premium_amount * 100.0).round() / 100.0;

        let risk_factors = Self::identify_risk_factors(category, composite);

        let ctx = QuoteContext {
            coverage_amount,
            category,
            duration_days,
            risk_level: composite.risk_level,
            premium_multiplier: composite.premium_multiplier,
            base_rate_bps,
            adjusted_rate_bps: premium_rate_bps,
            premium_amount,
            signal_summary: composite
                .signals
                .values()
                .map(|s| format!("{}: {}/100 — {}", s.name, s.score, s.description))
                .collect(),
        };

        let (reasoning, reasoning_degraded) = match self.reasoning.explain_quote(&ctx).await {
            Ok(text) => (text, false),
            Err(e) => {
                warn!(error = %e, "quote reasoning failed — using deterministic template");
                (template_quote_reasoning(&ctx), true)
            }
        };

        debug!(
            coverage = coverage_amount,
            category = %category,
            duration_days,
            rate_bps = premium_rate_bps,
            premium = premium_amount,
            "premium quoted"
        );

        Ok(PremiumQuote {
            coverage_amount,
            premium_amount,
            premium_rate_bps,
            risk_level: composite.risk_level,
            risk_factors,
            valid_until: Utc::now() + self.quote_validity,
            reasoning,
            reasoning_degraded,
        })
    }

    /// Category-specific factors plus signal-conditional additions, capped
    /// at [`MAX_RISK_FACTORS`] in priority order.
    fn identify_risk_factors(category: RiskCategory, composite: &CompositeRisk) -> Vec<String> {
        let mut factors: Vec<String> = match category {
            RiskCategory::DefiProtocol => {
                vec!["Smart contract exploit risk", "Flash loan attack vector"]
            }
            RiskCategory::StablecoinDepeg => vec![
                "Collateral backing uncertainty",
                "Regulatory intervention risk",
            ],
            RiskCategory::Bridge => vec![
                "Cross-chain message validation",
                "Validator key compromise",
            ],
            RiskCategory::Liquidation => {
                vec!["Leverage cascade risk", "Oracle price manipulation"]
            }
            RiskCategory::OracleManipulation => {
                vec!["Price feed manipulation", "Sandwich attack exposure"]
            }
            RiskCategory::GovernanceAttack => {
                vec!["Flash loan governance", "Voter apathy risk"]
            }
            RiskCategory::General => vec!["General DeFi protocol risk"],
        }
        .into_iter()
        .map(String::from)
        .collect();

        if composite.signal_score(REALIZED_VOL) > 50 {
            factors.push("Elevated realized volatility".to_string());
        }
        if composite.signal_score(LIQUIDATION_VOL) > 40 {
            factors.push("Active liquidation cascades".to_string());
        }
        if composite.signal_score(STABLECOIN_DEPEG) > 20 {
            factors.push("Stablecoin peg stress detected".to_string());
        }
        if composite.signal_score(BRIDGE_ANOMALY) > 30 {
            factors.push("Bridge outflow anomaly".to_string());
        }

        factors.truncate(MAX_RISK_FACTORS);
        factors
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reasoning::TemplateReasoner;
    use crate::signals::RiskSignal;
    use std::collections::HashMap;

    fn composite_with_level(level: u8) -> CompositeRisk {
        CompositeRisk::from_signals(HashMap::from([(
            "realized_vol".to_string(),
            RiskSignal {
                name: "realized_vol".to_string(),
                raw_value: level as f64,
                score: level,
                weight: 1.0,
                description: "test".to_string(),
            },
        )]))
    }

    fn composite_with_scores(scores: &[(&str, u8)]) -> CompositeRisk {
        CompositeRisk::from_signals(
            scores
                .iter()
                .map(|(name, score)| {
                    (
                        name.to_string(),
                        RiskSignal {
                            name: name.to_string(),
                            raw_value: *score as f64,
                            score: *score,
                            weight: 1.0 / scores.len() as f64,
                            description: "test".to_string(),
                        },
                    )
                })
                .collect(),
        )
    }

    fn pricer() -> PremiumPricer {
        PremiumPricer::new(Arc::new(TemplateReasoner), 3600)
    }

    #[tokio::test]
    async fn test_bridge_quote_at_baseline_multiplier() {
        // coverage $1M, bridge (300 bps base), multiplier 1.0, 30 days:
        // rate stays 300 bps, premium = 1,000,000 * 300/10000 * 30/365.
        let composite = composite_with_level(0);
        assert!((composite.premium_multiplier - 1.0).abs() < 1e-12);

        let quote = pricer()
            .quote(1_000_000.0, RiskCategory::Bridge, 30, &composite)
            .await
            .unwrap();

        assert_eq!(quote.premium_rate_bps, 300);
        assert!(
            (quote.premium_amount - 2465.75).abs() < 0.01,
            "expected ~2465.75, got {}",
            quote.premium_amount
        );
        assert!(!quote.reasoning_degraded);
        assert!(quote.valid_until > Utc::now());
    }

    #[tokio::test]
    async fn test_duration_discounts() {
        let composite = composite_with_level(0);
        let pricer = pricer();

        let short = pricer
            .quote(1_000_000.0, RiskCategory::Bridge, 30, &composite)
            .await
            .unwrap();
        let medium = pricer
            .quote(1_000_000.0, RiskCategory::Bridge, 90, &composite)
            .await
            .unwrap();
        let long = pricer
            .quote(1_000_000.0, RiskCategory::Bridge, 200, &composite)
            .await
            .unwrap();

        assert_eq!(short.premium_rate_bps, 300);
        assert_eq!(medium.premium_rate_bps, 276, "300 * 0.92 = 276");
        assert_eq!(long.premium_rate_bps, 255, "300 * 0.85 = 255");
    }

    #[tokio::test]
    async fn test_rate_scales_with_multiplier() {
        let calm = pricer()
            .quote(100_000.0, RiskCategory::DefiProtocol, 30, &composite_with_level(0))
            .await
            .unwrap();
        let stressed = pricer()
            .quote(100_000.0, RiskCategory::DefiProtocol, 30, &composite_with_level(100))
            .await
            .unwrap();

        assert_eq!(calm.premium_rate_bps, 200);
        assert_eq!(stressed.premium_rate_bps, 1000, "200 bps * 5.0x = 1000 bps");
        assert!(stressed.premium_amount > calm.premium_amount);
    }

    #[tokio::test]
    async fn test_risk_factor_priority_and_cap() {
        // All four signal conditions firing on a two-factor category: the
        // list must cap at 5, dropping the lowest-priority addition.
        let composite = composite_with_scores(&[
            (REALIZED_VOL, 60),
            (LIQUIDATION_VOL, 50),
            (STABLECOIN_DEPEG, 30),
            (BRIDGE_ANOMALY, 40),
        ]);
        let quote = pricer()
            .quote(50_000.0, RiskCategory::Bridge, 30, &composite)
            .await
            .unwrap();

        assert_eq!(quote.risk_factors.len(), 5);
        assert_eq!(quote.risk_factors[0], "Cross-chain message validation");
        assert_eq!(quote.risk_factors[2], "Elevated realized volatility");
        assert_eq!(quote.risk_factors[4], "Stablecoin peg stress detected");
        assert!(!quote
            .risk_factors
            .contains(&"Bridge outflow anomaly".to_string()));
    }

    #[tokio::test]
    async fn test_quiet_signals_add_no_factors() {
        let composite = composite_with_scores(&[
            (REALIZED_VOL, 50),
            (LIQUIDATION_VOL, 40),
            (STABLECOIN_DEPEG, 20),
            (BRIDGE_ANOMALY, 30),
        ]);
        let quote = pricer()
            .quote(50_000.0, RiskCategory::General, 30, &composite)
            .await
            .unwrap();

        // Thresholds are strict: at-threshold scores do not fire.
        assert_eq!(quote.risk_factors, vec!["General DeFi protocol risk"]);
    }

    #[tokio::test]
    async fn test_invalid_inputs_rejected() {
        let composite = composite_with_level(10);
        let pricer = pricer();

        let err = pricer
            .quote(0.0, RiskCategory::General, 30, &composite)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));

        let err = pricer
            .quote(1000.0, RiskCategory::General, 0, &composite)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn test_reasoning_failure_degrades_not_fails() {
        struct FailingReasoner;

        #[async_trait::async_trait]
        impl ReasoningService for FailingReasoner {
            async fn explain_quote(&self, _: &QuoteContext) -> anyhow::Result<String> {
                anyhow::bail!("provider down")
            }
            async fn assess_claim(
                &self,
                _: &crate::reasoning::ClaimContext,
            ) -> anyhow::Result<crate::reasoning::ClaimAssessment> {
                anyhow::bail!("provider down")
            }
        }

        let pricer = PremiumPricer::new(Arc::new(FailingReasoner), 3600);
        let quote = pricer
            .quote(1_000_000.0, RiskCategory::Bridge, 30, &composite_with_level(0))
            .await
            .expect("quote must not fail on reasoning failure");

        assert!(quote.reasoning_degraded);
        assert!(quote.reasoning.contains("300 bps/year"));
    }
}
