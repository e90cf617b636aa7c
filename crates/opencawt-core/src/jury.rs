//! `JuryPanelMember` and `Ballot` entities (spec §3, §4.5, §4.6).

use serde::{Deserialize, Serialize};

use crate::types::{PrincipleId, Timestamp};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    PendingReady,
    Ready,
    TimedOut,
    Replaced,
    ActiveVoting,
    Voted,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionRunKind {
    Initial,
    Replacement,
}

/// Primary key `(case_id, juror_id)`. A replaced juror keeps its row and is
/// cross-linked to the replacement via `replaced_by_juror_id` (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct JuryPanelMember {
    pub case_id: String,
    pub juror_id: String,
    pub score_hash: String,
    pub member_status: MemberStatus,
    pub ready_deadline_at: Option<Timestamp>,
    pub voting_deadline_at: Option<Timestamp>,
    pub replacement_of_juror_id: Option<String>,
    pub replaced_by_juror_id: Option<String>,
    pub selection_run_id: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BallotFinding {
    Proven,
    NotProven,
    Insufficient,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClaimVote {
    pub claim_id: String,
    pub finding: BallotFinding,
    pub recommended_remedy: Option<String>,
}

/// Uniqueness `(case_id, juror_id)` — exactly one ballot per juror per case
/// (spec §3, §8 "Ballot uniqueness").
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Ballot {
    pub ballot_id: String,
    pub case_id: String,
    pub juror_id: String,
    pub votes: Vec<ClaimVote>,
    pub reasoning_summary: String,
    pub vote: Option<String>,
    pub principles_relied_on: Vec<PrincipleId>,
    pub confidence: Option<u8>,
    pub ballot_hash: String,
    pub signature: String,
    pub created_at: Timestamp,
}
