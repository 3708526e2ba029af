// =============================================================================
// Claim Audit — auditable record of every claim assessment
// =============================================================================
//
// Every assessed claim produces exactly one audit record. The outcome
// distinguishes a decision that triggered but fell below the confidence
// gate (assessed-but-not-executed) from one whose trigger condition failed
// (not triggered) and from one whose submission failed — these are
// different facts and must stay distinguishable after the fact.

use serde::Serialize;

use crate::claims::ClaimDecision;

/// What happened to an assessed claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClaimOutcome {
    /// Triggered, gate passed, payout submitted and accepted.
    Executed,
    /// Triggered, but confidence fell below the execution gate.
    AssessedNotExecuted,
    /// Trigger condition not met.
    NotTriggered,
    /// Gate passed but the ledger submission failed.
    SubmissionFailed,
}

/// Complete auditable record of one claim assessment.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimAudit {
    /// Unique identifier for this record (UUID v4).
    pub id: String,

    pub policy_id: u64,
    pub outcome: ClaimOutcome,
    pub triggered: bool,
    pub confidence: f64,
    pub payout_ratio: f64,
    pub payout_amount: f64,
    pub reasoning: String,

    /// Ledger confirmation id, present only when executed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confirmation_id: Option<String>,

    /// Submission error, present only when submission failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// ISO 8601 timestamp of when this record was created.
    pub created_at: String,
}

impl ClaimAudit {
    fn base(decision: &ClaimDecision, outcome: ClaimOutcome) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            policy_id: decision.policy_id,
            outcome,
            triggered: decision.triggered,
            confidence: decision.confidence,
            payout_ratio: decision.payout_ratio,
            payout_amount: decision.payout_amount,
            reasoning: decision.reasoning.clone(),
            confirmation_id: None,
            error: None,
            created_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    pub fn executed(decision: &ClaimDecision, confirmation_id: impl Into<String>) -> Self {
        let mut record = Self::base(decision, ClaimOutcome::Executed);
        record.confirmation_id = Some(confirmation_id.into());
        record
    }

    pub fn assessed_not_executed(decision: &ClaimDecision) -> Self {
        Self::base(decision, ClaimOutcome::AssessedNotExecuted)
    }

    pub fn not_triggered(decision: &ClaimDecision) -> Self {
        Self::base(decision, ClaimOutcome::NotTriggered)
    }

    pub fn submission_failed(decision: &ClaimDecision, error: impl Into<String>) -> Self {
        let mut record = Self::base(decision, ClaimOutcome::SubmissionFailed);
        record.error = Some(error.into());
        record
    }
}
