//! Typed configuration (spec §6 "Config keys"). Loaded by `opencawt-node`
//! from a JSON file (or defaults for local dev) — see DESIGN.md for why
//! config-file-format parsing beyond a single `serde_json::from_str` stays
//! out of scope while the keys themselves are still faithfully modelled.

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolanaMode {
    Stub,
    Rpc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrandMode {
    Stub,
    Live,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SoftCapMode {
    Warn,
    Enforce,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RateLimitsConfig {
    pub filing_per_24h: u32,
    pub evidence_per_hour: u32,
    pub submissions_per_hour: u32,
    pub ballots_per_hour: u32,
}

impl Default for RateLimitsConfig {
    fn default() -> Self {
        Self {
            filing_per_24h: 10,
            evidence_per_hour: 30,
            submissions_per_hour: 20,
            ballots_per_hour: 20,
        }
    }
}

/// Session-engine timing parameters (spec §4.6 table). Every default below
/// is the value the spec pins as "must be faithfully preserved".
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RulesConfig {
    pub session_starts_after_seconds: i64,
    pub defence_assignment_cutoff_seconds: i64,
    pub named_defendant_exclusive_seconds: i64,
    pub named_defendant_response_seconds: i64,
    pub juror_readiness_seconds: i64,
    pub stage_submission_seconds: i64,
    pub juror_vote_seconds: i64,
    pub voting_hard_timeout_seconds: i64,
    pub juror_panel_size: usize,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            session_starts_after_seconds: 3600,
            defence_assignment_cutoff_seconds: 2700,
            named_defendant_exclusive_seconds: 900,
            named_defendant_response_seconds: 24 * 3600,
            juror_readiness_seconds: 60,
            stage_submission_seconds: 1800,
            juror_vote_seconds: 900,
            // Open Question decision (DESIGN.md #3): longer than the
            // per-juror voting window so it only bites under repeated
            // replacement churn.
            voting_hard_timeout_seconds: 3600,
            juror_panel_size: 11,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LimitsConfig {
    pub max_submission_chars_per_phase: usize,
    pub max_evidence_chars_per_item: usize,
    pub max_evidence_chars_per_case: usize,
    pub max_evidence_items_per_case: usize,
    pub max_claim_summary_chars: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_submission_chars_per_phase: 20_000,
            max_evidence_chars_per_item: 10_000,
            max_evidence_chars_per_case: 200_000,
            max_evidence_items_per_case: 50,
            max_claim_summary_chars: 2_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    pub api_host: String,
    pub api_port: u16,
    pub db_path: String,
    pub cors_origin: String,
    pub is_production: bool,
    pub solana_mode: SolanaMode,
    pub seal_worker_mode: SolanaMode,
    pub drand_mode: DrandMode,
    pub worker_token: String,
    /// Base URL of the mint worker's `/mint` endpoint (spec §6). Only
    /// consulted when `seal_worker_mode` is `Rpc`; `Stub` mode dispatches
    /// in-process via `opencawt_mint::InMemoryMintWorker` instead.
    pub mint_worker_url: String,
    /// Base URL of the drand HTTP relay (spec §4.4). Only consulted when
    /// `drand_mode` is `Live`.
    pub drand_base_url: String,
    pub system_api_key: String,
    pub helius_webhook_token: Option<String>,
    pub treasury_address: Option<String>,
    pub soft_daily_case_cap: u32,
    pub soft_cap_mode: SoftCapMode,
    pub rate_limits: RateLimitsConfig,
    pub rules: RulesConfig,
    pub limits: LimitsConfig,
    pub engine_tick_ms: u64,
    pub seal_sweep_interval_secs: u64,
    pub seal_max_attempts: u32,
    pub webhook_signing_key: String,
    /// Base URL used to build the `externalUrl` a seal job hands the mint
    /// worker (spec §6: "absolute HTTPS"). Not itself a spec config key —
    /// an ambient concern the HTTP surface also needs for building links.
    pub public_base_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_host: "127.0.0.1".to_string(),
            api_port: 8080,
            db_path: "./opencawt-data".to_string(),
            cors_origin: "*".to_string(),
            is_production: false,
            solana_mode: SolanaMode::Stub,
            seal_worker_mode: SolanaMode::Stub,
            drand_mode: DrandMode::Stub,
            worker_token: "dev-worker-token".to_string(),
            mint_worker_url: "http://127.0.0.1:8081".to_string(),
            drand_base_url: "https://api.drand.sh".to_string(),
            system_api_key: "dev-system-key".to_string(),
            helius_webhook_token: None,
            treasury_address: None,
            soft_daily_case_cap: 500,
            soft_cap_mode: SoftCapMode::Warn,
            rate_limits: RateLimitsConfig::default(),
            rules: RulesConfig::default(),
            limits: LimitsConfig::default(),
            engine_tick_ms: 1_000,
            seal_sweep_interval_secs: 30,
            seal_max_attempts: 8,
            webhook_signing_key: "dev-webhook-signing-key".to_string(),
            public_base_url: "https://opencawt.example".to_string(),
        }
    }
}

impl Config {
    /// Load from a JSON file, falling back to defaults field-by-field is
    /// not attempted — the file must be a complete `Config` (spec §6 lists
    /// config keys as an enumerated, not partial, set). For local dev, skip
    /// `--config` entirely and use `Config::default()`.
    pub fn load_from_path(path: &std::path::Path) -> Result<Self, crate::error::OpenCawtError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| crate::error::OpenCawtError::Internal(format!("reading config: {e}")))?;
        serde_json::from_str(&text)
            .map_err(|e| crate::error::OpenCawtError::Internal(format!("parsing config: {e}")))
    }
}
