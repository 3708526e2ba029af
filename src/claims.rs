// =============================================================================
// Claim Evaluator — deterministic trigger math with reasoning-backed gating
// =============================================================================
//
// The payout decision is pure arithmetic:
//   actual_drop  = (original_price - trigger_price) / original_price
//   triggered    iff actual_drop >= trigger_threshold
//   payout_ratio = min(1.0, 0.5 + 2.0 * (actual_drop - trigger_threshold))
//
// The reasoning collaborator supplies confidence + justification on top.
// Whether a triggered decision is *executed* is the caller's business: the
// gate is `triggered && confidence >= min_confidence`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::EngineError;
use crate::reasoning::{ClaimContext, ReasoningService};
use crate::types::Policy;

// =============================================================================
// ClaimDecision
// =============================================================================

/// Outcome of evaluating one policy against current prices.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimDecision {
    pub policy_id: u64,
    pub triggered: bool,
    /// Fraction of coverage paid out, in [0, 1].
    pub payout_ratio: f64,
    pub payout_amount: f64,
    /// Reasoning confidence in [0, 1]; gates autonomous execution.
    pub confidence: f64,
    pub reasoning: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rejection_reason: Option<String>,
    /// True when the reasoning collaborator failed and a conservative
    /// zero-confidence assessment was substituted.
    pub reasoning_degraded: bool,
}

impl ClaimDecision {
    /// Execution gate: a decision is acted upon only when it triggered with
    /// sufficient confidence. Below the bar it stays assessed-but-not-
    /// executed, which is distinct from rejected.
    pub fn executable(&self, min_confidence: f64) -> bool {
        self.triggered && self.confidence >= min_confidence
    }
}

// =============================================================================
// ClaimEvaluator
// =============================================================================

pub struct ClaimEvaluator {
    reasoning: Arc<dyn ReasoningService>,
}

impl ClaimEvaluator {
    pub fn new(reasoning: Arc<dyn ReasoningService>) -> Self {
        Self { reasoning }
    }

    /// Evaluate a policy's trigger against a price pair.
    pub async fn evaluate(
        &self,
        policy: &Policy,
        trigger_price: f64,
        original_price: f64,
    ) -> Result<ClaimDecision, EngineError> {
        if original_price <= 0.0 {
            return Err(EngineError::InvalidInput(format!(
                "original price must be positive, got {original_price}"
            )));
        }

        let trigger_threshold = policy.trigger_threshold();
        let actual_drop = (original_price - trigger_price) / original_price;
        let triggered = actual_drop >= trigger_threshold;

        let (payout_ratio, payout_amount, rejection_reason) = if triggered {
            let excess = actual_drop - trigger_threshold;
            let ratio = (0.5 + excess * 2.0).min(1.0);
            let amount = (policy.coverage_amount * ratio * 100.0).round() / 100.0;
            (ratio, amount, None)
        } else {
            (
                0.0,
                0.0,
                Some(format!(
                    "Price dropped {:.1}% but trigger requires {:.1}%",
                    actual_drop * 100.0,
                    trigger_threshold * 100.0,
                )),
            )
        };

        let ctx = ClaimContext {
            policy_id: policy.id,
            coverage_amount: policy.coverage_amount,
            asset: policy.asset.clone(),
            original_price,
            trigger_price,
            actual_drop,
            trigger_threshold,
            triggered,
        };

        // Reasoning failure must never fail the decision: fall back to a
        // conservative zero-confidence verdict that cannot clear the gate.
        let (confidence, reasoning, reasoning_degraded) =
            match self.reasoning.assess_claim(&ctx).await {
                Ok(assessment) => (assessment.confidence, assessment.reasoning, false),
                Err(e) => {
                    let err = EngineError::ReasoningUnavailable(format!("{e:#}"));
                    warn!(
                        policy_id = policy.id,
                        error = %err,
                        "claim reasoning failed — conservative fallback, manual review required"
                    );
                    (
                        0.0,
                        "Reasoning service unavailable — manual review required".to_string(),
                        true,
                    )
                }
            };

        debug!(
            policy_id = policy.id,
            triggered,
            payout_ratio,
            confidence,
            "claim evaluated"
        );

        Ok(ClaimDecision {
            policy_id: policy.id,
            triggered,
            payout_ratio,
            payout_amount,
            confidence,
            reasoning,
            rejection_reason,
            reasoning_degraded,
        })
    }
}
