// =============================================================================
// Error taxonomy surfaced to callers of the engine
// =============================================================================
//
// Only failures a caller can act on are typed here. Per-source signal
// failures are recovered inside the aggregator and never surface; reasoning
// failures degrade to deterministic templates and surface only as a flag on
// the output.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Caller supplied an input the engine cannot evaluate (e.g. a
    /// non-positive reference price). Not recovered.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A named signal source failed or timed out. Recovered locally with a
    /// neutral fallback; carried here only for logging at the source seam.
    #[error("signal '{name}' unavailable: {reason}")]
    SignalUnavailable { name: String, reason: String },

    /// The reasoning collaborator failed. Recovered with deterministic
    /// template text; surfaced only as a degraded-output flag.
    #[error("reasoning service unavailable: {0}")]
    ReasoningUnavailable(String),

    /// An action submission to the ledger failed. Counted in cycle stats;
    /// the cycle continues.
    #[error("action submission failed: {0}")]
    SubmissionFailed(String),

    /// Requested policy does not exist on the ledger.
    #[error("policy {0} not found")]
    PolicyNotFound(u64),
}
