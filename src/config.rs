// =============================================================================
// Runtime Configuration — Hot-reloadable engine settings with atomic save
// =============================================================================
//
// Central configuration hub for the TailGuard engine.  Every tunable
// parameter lives here so that the engine can be reconfigured at runtime
// without a restart.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::types::ReasoningMode;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_agent_id() -> u64 {
    1
}

fn default_agent_name() -> String {
    "TailGuard".to_string()
}

fn default_poll_interval_secs() -> u64 {
    60
}

fn default_volatility_update_interval_secs() -> u64 {
    300
}

fn default_min_trust_score_bps() -> u32 {
    6000
}

fn default_signal_timeout_secs() -> u64 {
    10
}

fn default_submit_timeout_secs() -> u64 {
    30
}

fn default_ledger_read_timeout_secs() -> u64 {
    10
}

fn default_risk_cache_ttl_secs() -> u64 {
    60
}

fn default_quote_validity_secs() -> u64 {
    3600
}

fn default_min_claim_confidence() -> f64 {
    0.7
}

fn default_llm_model() -> String {
    "gpt-4o".to_string()
}

fn default_demo_trust_score_bps() -> u32 {
    8200
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// All tunable engine parameters, loaded from `runtime_config.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // ── Agent identity ──────────────────────────────────────────────────
    /// Agent identifier on the external ledger.
    #[serde(default = "default_agent_id")]
    pub agent_id: u64,

    /// Display name used in logs and the health endpoint.
    #[serde(default = "default_agent_name")]
    pub agent_name: String,

    // ── Decision loop ───────────────────────────────────────────────────
    /// Seconds between decision cycles.
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,

    /// Seconds between composite-risk refreshes pushed to the ledger.
    /// Must be >= `poll_interval_secs`; the loop refreshes on the first
    /// cycle after the interval elapses.
    #[serde(default = "default_volatility_update_interval_secs")]
    pub volatility_update_interval_secs: u64,

    /// Minimum trust score (basis points, 0-10000) required for any
    /// autonomous action. Below this the loop is log-only.
    #[serde(default = "default_min_trust_score_bps")]
    pub min_trust_score_bps: u32,

    /// Whether the loop may evaluate and pay claims autonomously.
    #[serde(default = "default_true")]
    pub auto_claim_enabled: bool,

    /// Minimum reasoning confidence required to execute a triggered claim.
    #[serde(default = "default_min_claim_confidence")]
    pub min_claim_confidence: f64,

    // ── Timeouts ────────────────────────────────────────────────────────
    /// Per-source timeout for a signal fetch. A source that exceeds this
    /// degrades to the neutral fallback.
    #[serde(default = "default_signal_timeout_secs")]
    pub signal_timeout_secs: u64,

    /// Timeout for a single ledger action submission.
    #[serde(default = "default_submit_timeout_secs")]
    pub submit_timeout_secs: u64,

    /// Timeout for ledger reads (trust score, policies, spot prices).
    #[serde(default = "default_ledger_read_timeout_secs")]
    pub ledger_read_timeout_secs: u64,

    // ── Risk surface ────────────────────────────────────────────────────
    /// How long a cached composite reading stays fresh for API callers.
    #[serde(default = "default_risk_cache_ttl_secs")]
    pub risk_cache_ttl_secs: u64,

    /// How long a premium quote remains valid.
    #[serde(default = "default_quote_validity_secs")]
    pub quote_validity_secs: u64,

    // ── Reasoning ───────────────────────────────────────────────────────
    /// Which reasoning implementation to use. Selected here explicitly,
    /// never inferred from which credentials happen to be present.
    #[serde(default)]
    pub reasoning_mode: ReasoningMode,

    /// Model identifier for the LLM reasoner.
    #[serde(default = "default_llm_model")]
    pub llm_model: String,

    // ── Demo ledger ─────────────────────────────────────────────────────
    /// Trust score reported by the in-memory ledger simulator.
    #[serde(default = "default_demo_trust_score_bps")]
    pub demo_trust_score_bps: u32,

    /// Seed a small set of demo policies into the simulator at startup.
    #[serde(default = "default_true")]
    pub seed_demo_policies: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        // serde's field defaults are the single source of truth.
        serde_json::from_str("{}").expect("empty config object must deserialize")
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("parsing config file {}", path.display()))?;
        info!(path = %path.display(), "runtime config loaded");
        Ok(config)
    }

    /// Save configuration atomically (tmp + rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let tmp = path.with_extension("json.tmp");

        let raw = serde_json::to_string_pretty(self).context("serialising runtime config")?;
        std::fs::write(&tmp, raw)
            .with_context(|| format!("writing temp config {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("renaming {} -> {}", tmp.display(), path.display()))?;

        info!(path = %path.display(), "runtime config saved");
        Ok(())
    }

    /// Load from file, falling back to defaults (with a warning) on any error.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        match Self::load(path.as_ref()) {
            Ok(config) => config,
            Err(e) => {
                warn!(error = %e, "failed to load config, using defaults");
                Self::default()
            }
        }
    }
}
