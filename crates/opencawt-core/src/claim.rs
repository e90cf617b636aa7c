//! The `Claim` entity (spec §3) — one or more per case.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::types::PrincipleId;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimOutcome {
    ForProsecution,
    ForDefence,
    Undecided,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Claim {
    pub claim_id: String,
    pub case_id: String,
    pub claim_index: u32,
    pub summary: String,
    pub requested_remedy: String,
    pub alleged_principles: BTreeSet<PrincipleId>,
    pub claim_outcome: ClaimOutcome,
}

impl Claim {
    pub fn new(
        claim_id: String,
        case_id: String,
        claim_index: u32,
        summary: String,
        requested_remedy: String,
        alleged_principles: BTreeSet<PrincipleId>,
    ) -> Self {
        Self {
            claim_id,
            case_id,
            claim_index,
            summary,
            requested_remedy,
            alleged_principles,
            claim_outcome: ClaimOutcome::Undecided,
        }
    }
}
