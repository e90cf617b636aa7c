//! `SealJob` and `UsedTreasuryTx` (spec §3, §4.8).

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SealJobStatus {
    Queued,
    Minting,
    Minted,
    Failed,
}

/// What a seal job is sealing — a closed case's verdict, or an accepted
/// notarised agreement (spec §4.9 routes the agreement flow through "the
/// same seal pipeline").
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SealSubject {
    Case { case_id: String },
    Agreement { proposal_id: String },
}

impl SealSubject {
    pub fn subject_id(&self) -> &str {
        match self {
            SealSubject::Case { case_id } => case_id,
            SealSubject::Agreement { proposal_id } => proposal_id,
        }
    }
}

/// At most one seal job per subject (spec §3: "at most one seal job per
/// case"; generalised here to cover agreements too, enforced at the store
/// layer via a uniqueness check on `subject_id`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SealJob {
    pub job_id: String,
    pub subject: SealSubject,
    pub status: SealJobStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub payload_hash: String,
    pub request_json: String,
    pub response_json: Option<String>,
    /// `canonical_hash_hex` of the terminal worker response, set once the
    /// job reaches `minted`/`failed`. Used to distinguish an identical
    /// replay from a conflicting finalisation attempt (spec §4.8).
    pub response_hash: Option<String>,
    pub claimed_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl SealJob {
    /// A `lastError` beginning with `NON_RETRYABLE:` is never retried
    /// (spec §3, §4.8).
    pub fn is_non_retryable(&self) -> bool {
        self.last_error
            .as_deref()
            .is_some_and(|e| e.starts_with("NON_RETRYABLE:"))
    }
}

/// Prevents filing-payment replay (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct UsedTreasuryTx {
    pub tx_sig: String,
    pub case_id: String,
    pub agent_id: String,
    pub amount_lamports: u64,
    pub created_at: Timestamp,
}
