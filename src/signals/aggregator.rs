// =============================================================================
// Risk Aggregator — weighted composite of independent signal sources
// =============================================================================
//
// Fans out to every configured source concurrently, isolates per-source
// failures behind a neutral fallback, and folds the surviving readings into
// a single 0-100 composite risk level with a regime classification.
//
// `aggregate` is a total function: it never fails and never lets one broken
// feed abort or bias the others. Retries, if any, belong to the sources.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::types::RiskRecommendation;

use super::{RiskSignal, SignalSource};

// =============================================================================
// CompositeRisk
// =============================================================================

/// Immutable composite reading produced once per aggregation cycle.
///
/// Invariants:
///   - `risk_level` is the weight-normalised rounded mean of the signal
///     scores, clamped to [0, 100].
///   - `black_swan_active` iff `risk_level >= 80`.
///   - `premium_multiplier = 1.0 + (risk_level / 100) * 4.0`, so it lies
///     in [1.0, 5.0].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompositeRisk {
    pub risk_level: u8,
    pub black_swan_active: bool,
    pub signals: HashMap<String, RiskSignal>,
    pub premium_multiplier: f64,
    pub recommendation: RiskRecommendation,
    pub generated_at: DateTime<Utc>,
}

impl CompositeRisk {
    /// Build the composite from a complete signal map.
    pub fn from_signals(signals: HashMap<String, RiskSignal>) -> Self {
        let total_weight: f64 = signals.values().map(|s| s.weight).sum();
        let weighted_sum: f64 = signals.values().map(|s| s.score as f64 * s.weight).sum();

        let risk_level = if total_weight > 0.0 {
            (weighted_sum / total_weight).round().clamp(0.0, 100.0) as u8
        } else {
            0
        };

        let black_swan_active = risk_level >= 80;
        let premium_multiplier = 1.0 + (risk_level as f64 / 100.0) * 4.0;

        Self {
            risk_level,
            black_swan_active,
            signals,
            premium_multiplier,
            recommendation: RiskRecommendation::from_risk_level(risk_level),
            generated_at: Utc::now(),
        }
    }

    /// Score of a named signal, or 0 when the signal is absent.
    pub fn signal_score(&self, name: &str) -> u8 {
        self.signals.get(name).map(|s| s.score).unwrap_or(0)
    }

    /// Premium multiplier encoded in basis points (10000 = 1.0x).
    pub fn multiplier_bps(&self) -> u32 {
        (self.premium_multiplier * 10_000.0).round() as u32
    }

    /// Age of this reading.
    pub fn age(&self) -> chrono::Duration {
        Utc::now() - self.generated_at
    }
}

// =============================================================================
// RiskAggregator
// =============================================================================

/// Aggregates the configured signal set into a [`CompositeRisk`].
pub struct RiskAggregator {
    sources: Vec<Arc<dyn SignalSource>>,
    /// Independent timeout applied to each source fetch.
    fetch_timeout: Duration,
}

impl RiskAggregator {
    pub fn new(sources: Vec<Arc<dyn SignalSource>>, fetch_timeout: Duration) -> Self {
        Self {
            sources,
            fetch_timeout,
        }
    }

    /// Fetch all signals concurrently and compute the composite.
    ///
    /// A source that errors or exceeds the timeout is replaced by the
    /// neutral fallback for that source only.
    pub async fn aggregate(&self) -> CompositeRisk {
        let fetches = self.sources.iter().map(|source| {
            let source = source.clone();
            let fetch_timeout = self.fetch_timeout;
            async move {
                let name = source.name();
                let weight = source.weight();
                match tokio::time::timeout(fetch_timeout, source.fetch()).await {
                    Ok(Ok(signal)) => {
                        debug!(signal = name, score = signal.score, "signal fetched");
                        signal
                    }
                    Ok(Err(e)) => {
                        let err = EngineError::SignalUnavailable {
                            name: name.to_string(),
                            reason: format!("{e:#}"),
                        };
                        warn!(error = %err, "signal failed — neutral fallback");
                        RiskSignal::neutral_fallback(name, weight)
                    }
                    Err(_) => {
                        warn!(
                            signal = name,
                            timeout_secs = fetch_timeout.as_secs(),
                            "signal timed out — neutral fallback"
                        );
                        RiskSignal::neutral_fallback(name, weight)
                    }
                }
            }
        });

        let signals: HashMap<String, RiskSignal> = join_all(fetches)
            .await
            .into_iter()
            .map(|s| (s.name.clone(), s))
            .collect();

        let composite = CompositeRisk::from_signals(signals);
        debug!(
            risk_level = composite.risk_level,
            black_swan = composite.black_swan_active,
            recommendation = %composite.recommendation,
            "composite risk computed"
        );
        composite
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::SignalSource;
    use async_trait::async_trait;

    /// Source returning a fixed score.
    struct FixedSource {
        name: &'static str,
        weight: f64,
        score: u8,
    }

    #[async_trait]
    impl SignalSource for FixedSource {
        fn name(&self) -> &'static str {
            self.name
        }
        fn weight(&self) -> f64 {
            self.weight
        }
        async fn fetch(&self) -> anyhow::Result<RiskSignal> {
            Ok(RiskSignal {
                name: self.name.to_string(),
                raw_value: self.score as f64,
                score: self.score,
                weight: self.weight,
                description: "fixed".to_string(),
            })
        }
    }

    /// Source that always errors.
    struct BrokenSource {
        name: &'static str,
        weight: f64,
    }

    #[async_trait]
    impl SignalSource for BrokenSource {
        fn name(&self) -> &'static str {
            self.name
        }
        fn weight(&self) -> f64 {
            self.weight
        }
        async fn fetch(&self) -> anyhow::Result<RiskSignal> {
            anyhow::bail!("provider down")
        }
    }

    /// Source that hangs past any reasonable timeout.
    struct HangingSource {
        name: &'static str,
        weight: f64,
    }

    #[async_trait]
    impl SignalSource for HangingSource {
        fn name(&self) -> &'static str {
            self.name
        }
        fn weight(&self) -> f64 {
            self.weight
        }
        async fn fetch(&self) -> anyhow::Result<RiskSignal> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("sleep should outlive the fetch timeout")
        }
    }

    fn fixed(name: &'static str, weight: f64, score: u8) -> Arc<dyn SignalSource> {
        Arc::new(FixedSource {
            name,
            weight,
            score,
        })
    }

    fn signal_map(entries: &[(&str, f64, u8)]) -> HashMap<String, RiskSignal> {
        entries
            .iter()
            .map(|(name, weight, score)| {
                (
                    name.to_string(),
                    RiskSignal {
                        name: name.to_string(),
                        raw_value: *score as f64,
                        score: *score,
                        weight: *weight,
                        description: String::new(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_composite_is_weighted_mean() {
        // (80*0.5 + 20*0.25 + 40*0.25) / 1.0 = 55
        let composite = CompositeRisk::from_signals(signal_map(&[
            ("a", 0.5, 80),
            ("b", 0.25, 20),
            ("c", 0.25, 40),
        ]));
        assert_eq!(composite.risk_level, 55);
    }

    #[test]
    fn test_composite_bounded_for_any_scores() {
        for scores in [[0u8, 0, 0], [100, 100, 100], [3, 97, 51]] {
            let composite = CompositeRisk::from_signals(signal_map(&[
                ("a", 0.2, scores[0]),
                ("b", 0.7, scores[1]),
                ("c", 0.1, scores[2]),
            ]));
            assert!(composite.risk_level <= 100);
        }
    }

    #[test]
    fn test_black_swan_boundary() {
        let at_79 = CompositeRisk::from_signals(signal_map(&[("a", 1.0, 79)]));
        assert!(!at_79.black_swan_active);
        assert_eq!(at_79.recommendation, RiskRecommendation::High);

        let at_80 = CompositeRisk::from_signals(signal_map(&[("a", 1.0, 80)]));
        assert!(at_80.black_swan_active);
        assert_eq!(at_80.recommendation, RiskRecommendation::BlackSwan);
    }

    #[test]
    fn test_premium_multiplier_endpoints_and_monotonicity() {
        let calm = CompositeRisk::from_signals(signal_map(&[("a", 1.0, 0)]));
        assert!((calm.premium_multiplier - 1.0).abs() < 1e-12);

        let panic = CompositeRisk::from_signals(signal_map(&[("a", 1.0, 100)]));
        assert!((panic.premium_multiplier - 5.0).abs() < 1e-12);
        assert_eq!(panic.multiplier_bps(), 50_000);

        let mut prev = 0.0;
        for level in 0..=100u8 {
            let c = CompositeRisk::from_signals(signal_map(&[("a", 1.0, level)]));
            assert!(
                c.premium_multiplier >= prev,
                "multiplier must be non-decreasing in risk level"
            );
            prev = c.premium_multiplier;
        }
    }

    #[tokio::test]
    async fn test_one_failing_source_degrades_to_neutral_fallback() {
        let aggregator = RiskAggregator::new(
            vec![
                fixed("a", 0.5, 60),
                Arc::new(BrokenSource {
                    name: "b",
                    weight: 0.5,
                }),
            ],
            Duration::from_secs(5),
        );

        let composite = aggregator.aggregate().await;
        let fallback = &composite.signals["b"];
        assert_eq!(fallback.score, 25);
        assert!(fallback.description.contains("unavailable"));
        // (60*0.5 + 25*0.5) / 1.0 = 42.5 -> 43 (rounded)
        assert_eq!(composite.risk_level, 43);
    }

    #[tokio::test]
    async fn test_failure_shifts_composite_by_at_most_weight_bound() {
        let healthy = RiskAggregator::new(
            vec![fixed("a", 0.8, 70), fixed("b", 0.2, 70)],
            Duration::from_secs(5),
        );
        let degraded = RiskAggregator::new(
            vec![
                fixed("a", 0.8, 70),
                Arc::new(BrokenSource {
                    name: "b",
                    weight: 0.2,
                }),
            ],
            Duration::from_secs(5),
        );

        let all_ok = healthy.aggregate().await.risk_level as f64;
        let one_down = degraded.aggregate().await.risk_level as f64;

        // The failing source can move the composite by at most
        // weight_b * 100 / total_weight (plus rounding).
        let bound = 0.2 * 100.0 / 1.0;
        assert!(
            (all_ok - one_down).abs() <= bound + 1.0,
            "composite moved {} with a bound of {}",
            (all_ok - one_down).abs(),
            bound
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_source_times_out_without_blocking_others() {
        let aggregator = RiskAggregator::new(
            vec![
                fixed("a", 0.5, 90),
                Arc::new(HangingSource {
                    name: "b",
                    weight: 0.5,
                }),
            ],
            Duration::from_millis(200),
        );

        let composite = aggregator.aggregate().await;
        assert_eq!(composite.signals["b"].score, 25);
        assert_eq!(composite.signals["a"].score, 90);
    }

    #[tokio::test]
    async fn test_zero_sources_yield_floor_composite() {
        let aggregator = RiskAggregator::new(vec![], Duration::from_secs(1));
        let composite = aggregator.aggregate().await;
        assert_eq!(composite.risk_level, 0);
        assert!(!composite.black_swan_active);
        assert_eq!(composite.recommendation, RiskRecommendation::Low);
    }
}
