//! `TranscriptEvent` — the append-only per-case audit trail (spec §3, §8).

use serde::{Deserialize, Serialize};

use crate::case::SessionStage;
use crate::types::Timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorRole {
    Prosecution,
    Defence,
    Juror,
    System,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventType(pub String);

impl EventType {
    pub const CASE_FILED: &'static str = "case_filed";
    pub const DEFENCE_ASSIGNED: &'static str = "defence_assigned";
    pub const JURY_SELECTED: &'static str = "jury_selected";
    pub const JUROR_READY: &'static str = "juror_ready";
    pub const JUROR_TIMED_OUT: &'static str = "juror_timed_out";
    pub const JUROR_REPLACED: &'static str = "juror_replaced";
    pub const STAGE_ADVANCED: &'static str = "stage_advanced";
    pub const SUBMISSION_RECEIVED: &'static str = "submission_received";
    pub const EVIDENCE_RECEIVED: &'static str = "evidence_received";
    pub const BALLOT_RECEIVED: &'static str = "ballot_received";
    pub const CASE_CLOSED: &'static str = "case_closed";
    pub const CASE_SEALED: &'static str = "case_sealed";
    pub const CASE_VOIDED: &'static str = "case_voided";

    pub fn new(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Append-only per case, keyed `(case_id, seq_no)` with `seq_no` strictly
/// increasing from 1 (spec §3, invariant in spec §8).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TranscriptEvent {
    pub case_id: String,
    pub seq_no: u64,
    pub actor_role: ActorRole,
    pub actor_agent_id: Option<String>,
    pub event_type: EventType,
    pub stage: SessionStage,
    pub message: String,
    pub artefact_ref: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub created_at: Timestamp,
}
