//! The `Case` entity and its tagged-variant companions (spec §3, §4.6).
//!
//! `Case` is the primary entity; `CaseRuntime` mirrors its authoritative
//! deadline state and is always updated in the same transaction as the
//! case row (spec §3 CaseRuntime, §9 "implicit transactional scoping").

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseStatus {
    Draft,
    Filed,
    JurySelected,
    Voting,
    Closed,
    Sealed,
    Void,
}

/// The session stage machine (spec §4.6). Distinct from `CaseStatus`:
/// `CaseStatus` is the coarse lifecycle exposed to clients; `SessionStage`
/// is the engine's fine-grained position within the `filed`/`voting`
/// window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStage {
    PreSession,
    JuryReadiness,
    OpeningAddresses,
    Evidence,
    ClosingAddresses,
    SummingUp,
    Voting,
    Closed,
    Void,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefenceState {
    /// No defendant named; open to volunteers within the defence window.
    Open,
    /// A specific defendant was named and has an exclusive response window.
    NamedExclusive,
    /// A defence agent has accepted and is bound to the case.
    Assigned,
    /// The defence window closed without an assignment.
    Unassigned,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaseSealStatus {
    Pending,
    Minting,
    Sealed,
    Failed,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    ForProsecution,
    ForDefence,
    Void,
}

/// Reasons a case can void (spec §4.6/§4.7/§8). Kept as an open string set
/// rather than a closed enum so the class buckets used for analytics
/// (`no_defence`, `other_timeout`) can be derived without a code change —
/// same "free string, registry governs meaning" idiom the teacher used for
/// `ClaimLane`'s provider classes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidReason(pub String);

impl VoidReason {
    pub const MISSING_DEFENCE_ASSIGNMENT: &'static str = "missing_defence_assignment";
    pub const VOTING_TIMEOUT: &'static str = "voting_timeout";
    pub const MISSING_OPENING_SUBMISSION: &'static str = "missing_opening_submission";
    pub const MISSING_EVIDENCE_SUBMISSION: &'static str = "missing_evidence_submission";
    pub const MISSING_CLOSING_SUBMISSION: &'static str = "missing_closing_submission";
    pub const MISSING_SUMMING_SUBMISSION: &'static str = "missing_summing_submission";
    pub const INCONCLUSIVE_VERDICT: &'static str = "inconclusive_verdict";

    pub fn new(reason: &str) -> Self {
        Self(reason.to_string())
    }

    /// Aggregated analytics class for a void reason (spec §4.6: "aggregated
    /// class: no_defence/other_timeout as appropriate").
    pub fn class(&self) -> &'static str {
        match self.0.as_str() {
            Self::MISSING_DEFENCE_ASSIGNMENT => "no_defence",
            _ => "other_timeout",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefenceInviteStatus {
    None,
    Queued,
    Delivered,
    Failed,
}

/// The dispute record. Owns its claims, submissions, evidence, ballots,
/// jury-panel members, runtime row, transcript events, and seal job.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Case {
    pub case_id: String,
    pub public_slug: String,
    pub status: CaseStatus,
    pub session_stage: SessionStage,
    pub prosecution_agent_id: String,
    pub defendant_agent_id: Option<String>,
    pub defence_agent_id: Option<String>,
    pub defence_state: DefenceState,
    pub replacement_count_ready: u32,
    pub replacement_count_vote: u32,
    pub filed_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    // ── Deterministic-selection artefacts (spec §4.5) ──────────────────────
    pub drand_round: Option<u64>,
    pub drand_randomness: Option<String>,
    pub pool_snapshot_hash: Option<String>,
    pub selection_proof_hash: Option<String>,
    // ── Verdict / seal artefacts (spec §4.7, §4.8) ─────────────────────────
    pub verdict_hash: Option<String>,
    pub outcome: Option<Outcome>,
    pub seal_status: CaseSealStatus,
    pub seal_asset_id: Option<String>,
    pub seal_tx_sig: Option<String>,
    pub seal_uri: Option<String>,
    pub metadata_uri: Option<String>,
    pub sealed_at: Option<Timestamp>,
    pub void_reason: Option<VoidReason>,
    pub voided_at: Option<Timestamp>,
    // ── Treasury / payment (spec §3 UsedTreasuryTx) ────────────────────────
    pub treasury_tx_sig: Option<String>,
    // ── Sequence / versioning ───────────────────────────────────────────────
    pub last_event_seq_no: u64,
    pub ruleset_version: u32,
    // ── Defence invite delivery tracking (spec §4.10) ──────────────────────
    pub defence_invite_status: DefenceInviteStatus,
    pub defence_invite_attempts: u32,
    pub defence_invite_last_error: Option<String>,
}

impl Case {
    pub fn new(
        case_id: String,
        public_slug: String,
        prosecution_agent_id: String,
        defendant_agent_id: Option<String>,
        now: Timestamp,
        ruleset_version: u32,
    ) -> Self {
        let defence_state = if defendant_agent_id.is_some() {
            DefenceState::NamedExclusive
        } else {
            DefenceState::Open
        };
        Self {
            case_id,
            public_slug,
            status: CaseStatus::Draft,
            session_stage: SessionStage::PreSession,
            prosecution_agent_id,
            defendant_agent_id,
            defence_agent_id: None,
            defence_state,
            replacement_count_ready: 0,
            replacement_count_vote: 0,
            filed_at: None,
            created_at: now,
            updated_at: now,
            drand_round: None,
            drand_randomness: None,
            pool_snapshot_hash: None,
            selection_proof_hash: None,
            verdict_hash: None,
            outcome: None,
            seal_status: CaseSealStatus::Pending,
            seal_asset_id: None,
            seal_tx_sig: None,
            seal_uri: None,
            metadata_uri: None,
            sealed_at: None,
            void_reason: None,
            voided_at: None,
            treasury_tx_sig: None,
            last_event_seq_no: 0,
            ruleset_version,
            defence_invite_status: DefenceInviteStatus::None,
            defence_invite_attempts: 0,
            defence_invite_last_error: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            CaseStatus::Closed | CaseStatus::Sealed | CaseStatus::Void
        )
    }
}

/// Mirrors the case's authoritative deadline state (spec §3 CaseRuntime).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CaseRuntime {
    pub case_id: String,
    pub current_stage: SessionStage,
    pub stage_started_at: Timestamp,
    pub stage_deadline_at: Option<Timestamp>,
    pub scheduled_session_start_at: Option<Timestamp>,
    pub voting_hard_deadline_at: Option<Timestamp>,
    pub void_reason: Option<VoidReason>,
    pub voided_at: Option<Timestamp>,
}

impl CaseRuntime {
    pub fn new(case_id: String, now: Timestamp) -> Self {
        Self {
            case_id,
            current_stage: SessionStage::PreSession,
            stage_started_at: now,
            stage_deadline_at: None,
            scheduled_session_start_at: None,
            voting_hard_deadline_at: None,
            void_reason: None,
            voided_at: None,
        }
    }
}
