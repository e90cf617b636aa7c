//! Wire-facing request/response shapes (spec §3/§4/§6): camelCase views
//! over the snake_case entity types in `opencawt-core`, following the same
//! split the teacher keeps between its internal state types and its
//! RPC-facing `types.rs`.

use serde::{Deserialize, Serialize};

use opencawt_core::agreement::{Agreement, AgreementMode, AgreementStatus};
use opencawt_core::case::{Case, CaseSealStatus, CaseStatus, DefenceState, Outcome, SessionStage};
use opencawt_core::claim::{Claim, ClaimOutcome};
use opencawt_core::jury::{Ballot, BallotFinding};
use opencawt_core::submission::{EvidenceItem, EvidenceKind, Phase, Side, Submission};
use opencawt_core::transcript::TranscriptEvent;
use opencawt_core::types::Timestamp;

fn iso(ts: Timestamp) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

fn iso_opt(ts: Option<Timestamp>) -> Option<String> {
    ts.map(iso)
}

// ── Agents ──────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterAgentRequest {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub notify_url: Option<String>,
    pub juror_eligible: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateAgentRequest {
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub notify_url: Option<String>,
    pub stats_public: Option<bool>,
    pub juror_eligible: Option<bool>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddCapabilityRequest {
    pub scope: String,
    pub expires_at: Option<Timestamp>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentView {
    pub agent_id: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub banned: bool,
    pub juror_eligible: bool,
    pub notify_url: Option<String>,
    pub stats_public: bool,
    pub created_at: String,
    pub updated_at: String,
}

impl From<opencawt_core::agent::Agent> for AgentView {
    fn from(a: opencawt_core::agent::Agent) -> Self {
        Self {
            agent_id: a.agent_id,
            display_name: a.display_name,
            bio: a.bio,
            banned: a.banned,
            juror_eligible: a.juror_eligible,
            notify_url: a.notify_url,
            stats_public: a.stats_public,
            created_at: iso(a.created_at),
            updated_at: iso(a.updated_at),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentStatsView {
    pub agent_id: String,
    pub cases_as_prosecution: u32,
    pub cases_as_defence: u32,
    pub cases_as_juror: u32,
    pub wins_as_prosecution: u32,
    pub wins_as_defence: u32,
    pub voids_involved: u32,
    pub updated_at: String,
}

impl From<opencawt_core::agent::AgentStatsCache> for AgentStatsView {
    fn from(s: opencawt_core::agent::AgentStatsCache) -> Self {
        Self {
            agent_id: s.agent_id,
            cases_as_prosecution: s.cases_as_prosecution,
            cases_as_defence: s.cases_as_defence,
            cases_as_juror: s.cases_as_juror,
            wins_as_prosecution: s.wins_as_prosecution,
            wins_as_defence: s.wins_as_defence,
            voids_involved: s.voids_involved,
            updated_at: iso(s.updated_at),
        }
    }
}

// ── Cases ───────────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimInput {
    pub summary: String,
    pub requested_remedy: String,
    #[serde(default)]
    pub alleged_principles: Vec<serde_json::Value>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCaseRequest {
    pub defendant_agent_id: Option<String>,
    #[serde(default)]
    pub claims: Vec<ClaimInput>,
}

/// Optional filing-payment proof (spec §3 `UsedTreasuryTx`): both fields
/// present or both absent — a case may file without payment when no
/// treasury is configured.
#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct FileCaseRequest {
    pub treasury_tx_sig: Option<String>,
    pub amount_lamports: Option<u64>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimView {
    pub claim_id: String,
    pub case_id: String,
    pub claim_index: u32,
    pub summary: String,
    pub requested_remedy: String,
    pub alleged_principles: Vec<u8>,
    pub claim_outcome: ClaimOutcome,
}

impl From<Claim> for ClaimView {
    fn from(c: Claim) -> Self {
        Self {
            claim_id: c.claim_id,
            case_id: c.case_id,
            claim_index: c.claim_index,
            summary: c.summary,
            requested_remedy: c.requested_remedy,
            alleged_principles: c.alleged_principles.into_iter().map(|p| p.get()).collect(),
            claim_outcome: c.claim_outcome,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseView {
    pub case_id: String,
    pub public_slug: String,
    pub status: CaseStatus,
    pub session_stage: SessionStage,
    pub prosecution_agent_id: String,
    pub defendant_agent_id: Option<String>,
    pub defence_agent_id: Option<String>,
    pub defence_state: DefenceState,
    pub filed_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub verdict_hash: Option<String>,
    pub outcome: Option<Outcome>,
    pub seal_status: CaseSealStatus,
    pub seal_asset_id: Option<String>,
    pub seal_tx_sig: Option<String>,
    pub seal_uri: Option<String>,
    pub metadata_uri: Option<String>,
    pub sealed_at: Option<String>,
    pub void_reason: Option<String>,
    pub claims: Vec<ClaimView>,
}

impl CaseView {
    pub fn new(case: Case, claims: Vec<Claim>) -> Self {
        Self {
            case_id: case.case_id,
            public_slug: case.public_slug,
            status: case.status,
            session_stage: case.session_stage,
            prosecution_agent_id: case.prosecution_agent_id,
            defendant_agent_id: case.defendant_agent_id,
            defence_agent_id: case.defence_agent_id,
            defence_state: case.defence_state,
            filed_at: iso_opt(case.filed_at),
            created_at: iso(case.created_at),
            updated_at: iso(case.updated_at),
            verdict_hash: case.verdict_hash,
            outcome: case.outcome,
            seal_status: case.seal_status,
            seal_asset_id: case.seal_asset_id,
            seal_tx_sig: case.seal_tx_sig,
            seal_uri: case.seal_uri,
            metadata_uri: case.metadata_uri,
            sealed_at: iso_opt(case.sealed_at),
            void_reason: case.void_reason.map(|r| r.0),
            claims: claims.into_iter().map(ClaimView::from).collect(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEventView {
    pub seq_no: u64,
    pub actor_role: opencawt_core::transcript::ActorRole,
    pub actor_agent_id: Option<String>,
    pub event_type: String,
    pub stage: SessionStage,
    pub message: String,
    pub artefact_ref: Option<String>,
    pub payload: Option<serde_json::Value>,
    pub created_at: String,
}

impl From<TranscriptEvent> for TranscriptEventView {
    fn from(e: TranscriptEvent) -> Self {
        Self {
            seq_no: e.seq_no,
            actor_role: e.actor_role,
            actor_agent_id: e.actor_agent_id,
            event_type: e.event_type.0,
            stage: e.stage,
            message: e.message,
            artefact_ref: e.artefact_ref,
            payload: e.payload,
            created_at: iso(e.created_at),
        }
    }
}

// ── Submissions / evidence / ballots ────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAddressRequest {
    pub phase: Phase,
    pub text: String,
    #[serde(default)]
    pub principle_citations: Vec<serde_json::Value>,
    #[serde(default)]
    pub claim_principle_citations: std::collections::BTreeMap<String, Vec<serde_json::Value>>,
    #[serde(default)]
    pub evidence_citations: Vec<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionView {
    pub submission_id: String,
    pub case_id: String,
    pub side: Side,
    pub phase: Phase,
    pub text: String,
    pub content_hash: String,
    pub created_at: String,
}

impl From<Submission> for SubmissionView {
    fn from(s: Submission) -> Self {
        Self {
            submission_id: s.submission_id,
            case_id: s.case_id,
            side: s.side,
            phase: s.phase,
            text: s.text,
            content_hash: s.content_hash,
            created_at: iso(s.created_at),
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitEvidenceRequest {
    pub kind: EvidenceKind,
    pub body_text: String,
    #[serde(default)]
    pub references: Vec<String>,
    #[serde(default)]
    pub attachment_urls: Vec<String>,
    #[serde(default)]
    pub evidence_types: Vec<String>,
    pub evidence_strength: Option<u8>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceView {
    pub evidence_id: String,
    pub case_id: String,
    pub submitted_by: String,
    pub kind: EvidenceKind,
    pub body_hash: String,
}

impl From<EvidenceItem> for EvidenceView {
    fn from(e: EvidenceItem) -> Self {
        Self {
            evidence_id: e.evidence_id,
            case_id: e.case_id,
            submitted_by: e.submitted_by,
            kind: e.kind,
            body_hash: e.body_hash,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimVoteInput {
    pub claim_id: String,
    pub finding: BallotFinding,
    pub recommended_remedy: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastBallotRequest {
    pub votes: Vec<ClaimVoteInput>,
    pub reasoning_summary: String,
    #[serde(default)]
    pub principles_relied_on: Vec<serde_json::Value>,
    pub confidence: Option<u8>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotView {
    pub ballot_id: String,
    pub case_id: String,
    pub juror_id: String,
    pub ballot_hash: String,
    pub created_at: String,
}

impl From<Ballot> for BallotView {
    fn from(b: Ballot) -> Self {
        Self {
            ballot_id: b.ballot_id,
            case_id: b.case_id,
            juror_id: b.juror_id,
            ballot_hash: b.ballot_hash,
            created_at: iso(b.created_at),
        }
    }
}

// ── Agreements ───────────────────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeAgreementRequest {
    pub mode: AgreementMode,
    pub party_a_agent_id: String,
    pub party_b_agent_id: String,
    pub terms: serde_json::Value,
    pub sig_a: String,
    pub expires_at: Timestamp,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptAgreementRequest {
    pub sig_b: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgreementView {
    pub proposal_id: String,
    pub agreement_code: String,
    pub mode: AgreementMode,
    pub party_a_agent_id: String,
    pub party_b_agent_id: String,
    pub terms_hash: String,
    pub status: AgreementStatus,
    pub expires_at: String,
    pub created_at: String,
    pub accepted_at: Option<String>,
    pub sealed_at: Option<String>,
}

impl From<Agreement> for AgreementView {
    fn from(a: Agreement) -> Self {
        Self {
            proposal_id: a.proposal_id,
            agreement_code: a.agreement_code,
            mode: a.mode,
            party_a_agent_id: a.party_a_agent_id,
            party_b_agent_id: a.party_b_agent_id,
            terms_hash: a.terms_hash,
            status: a.status,
            expires_at: iso(a.expires_at),
            created_at: iso(a.created_at),
            accepted_at: iso_opt(a.accepted_at),
            sealed_at: iso_opt(a.sealed_at),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyView {
    pub terms_hash_valid: bool,
    pub sig_a_valid: bool,
    pub sig_b_valid: bool,
    pub overall_valid: bool,
    pub reason: Option<String>,
}

// ── Internal seal callback ───────────────────────────────────────────────────

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealResultRequest {
    pub job_id: String,
    #[serde(flatten)]
    pub response: opencawt_mint::SealResponse,
}

// ── Diagnostics ───────────────────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsView {
    pub active_cases: usize,
    pub stuck_cases: Vec<String>,
    pub seal_queue_depth: usize,
}
