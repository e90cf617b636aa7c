//! opencawt-jury — deterministic jury scoring, selection, and replacement
//! (spec §4.5).
//!
//! `select_jury` is the crate's headline testable property: called twice
//! with identical inputs it must return byte-identical output, so any
//! observer can reproduce a panel from `(randomness, case_id, eligible
//! set)` alone without trusting the service that ran it.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use opencawt_beacon::DrandRound;
use opencawt_core::ident::new_id;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionRunKind {
    Initial,
    Replacement,
}

/// One candidate's score in a selection run, ordered `(score_hash asc,
/// agent_id asc)` as the tie-break (spec §4.5 step 3).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoredCandidate {
    pub agent_id: String,
    pub score_hash: String,
}

impl Ord for ScoredCandidate {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (&self.score_hash, &self.agent_id).cmp(&(&other.score_hash, &other.agent_id))
    }
}
impl PartialOrd for ScoredCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// Canonical-hashable record of how a selection was computed, so any
/// observer can independently recompute and compare (spec §4.5 step 4).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SelectionProof {
    pub case_id: String,
    pub drand_round: u64,
    pub drand_randomness: String,
    pub pool_snapshot_hash: String,
    pub jury_size: usize,
    pub ordered_candidates: Vec<ScoredCandidate>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct JurySelection {
    pub pool_snapshot_hash: String,
    pub selected: Vec<String>,
    pub scored_candidates: Vec<ScoredCandidate>,
    pub selection_proof: SelectionProof,
    pub selection_proof_hash: String,
}

/// `scoreHash = sha256hex(randomness || caseId || agentId)` (spec §4.5 step 2).
fn score_hash(randomness: &str, case_id: &str, agent_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(randomness.as_bytes());
    hasher.update(case_id.as_bytes());
    hasher.update(agent_id.as_bytes());
    hex::encode(hasher.finalize())
}

/// Implements spec §4.5 steps 1-5 exactly.
pub fn select_jury(
    case_id: &str,
    eligible: &BTreeSet<String>,
    drand: &DrandRound,
    jury_size: usize,
) -> JurySelection {
    let sorted_eligible: Vec<&String> = eligible.iter().collect();
    let pool_snapshot_hash = opencawt_crypto::canonical_hash_hex(&sorted_eligible);

    let mut candidates: Vec<ScoredCandidate> = eligible
        .iter()
        .map(|agent_id| ScoredCandidate {
            agent_id: agent_id.clone(),
            score_hash: score_hash(&drand.randomness, case_id, agent_id),
        })
        .collect();
    candidates.sort();

    let selected: Vec<String> = candidates
        .iter()
        .take(jury_size)
        .map(|c| c.agent_id.clone())
        .collect();

    let selection_proof = SelectionProof {
        case_id: case_id.to_string(),
        drand_round: drand.round,
        drand_randomness: drand.randomness.clone(),
        pool_snapshot_hash: pool_snapshot_hash.clone(),
        jury_size,
        ordered_candidates: candidates.clone(),
    };
    let selection_proof_hash = opencawt_crypto::canonical_hash_hex(&selection_proof);

    JurySelection {
        pool_snapshot_hash,
        selected,
        scored_candidates: candidates,
        selection_proof,
        selection_proof_hash,
    }
}

/// Walk `scored_candidates` for the next candidate not already in `used`
/// (spec §4.5: "the next-lowest unused candidate from scoredCandidates is
/// promoted"). Used for both readiness and voting replacement.
pub fn replacement_at<'a>(
    selection: &'a JurySelection,
    used: &BTreeSet<String>,
) -> Option<&'a ScoredCandidate> {
    selection
        .scored_candidates
        .iter()
        .find(|c| !used.contains(&c.agent_id))
}

/// Mint a fresh selection-run id, tagged by kind for auditability (spec
/// §4.5: "a fresh selectionRunId ... linked to each promoted juror").
pub fn new_selection_run_id(kind: SelectionRunKind) -> String {
    match kind {
        SelectionRunKind::Initial => new_id("selrun_initial"),
        SelectionRunKind::Replacement => new_id("selrun_replacement"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencawt_beacon::ChainInfo;

    fn drand(randomness: &str) -> DrandRound {
        DrandRound {
            round: 42,
            randomness: randomness.to_string(),
            chain_info: ChainInfo {
                public_key: "pk".into(),
                period: 30,
                genesis_time: 0,
                hash: "chain".into(),
            },
        }
    }

    fn pool(n: usize) -> BTreeSet<String> {
        (0..n).map(|i| format!("agent_{i:03}")).collect()
    }

    #[test]
    fn selection_is_deterministic() {
        let eligible = pool(20);
        let d = drand("abc123");
        let a = select_jury("case_1", &eligible, &d, 11);
        let b = select_jury("case_1", &eligible, &d, 11);
        assert_eq!(a, b);
    }

    #[test]
    fn selects_requested_size_ordered_by_score_then_agent_id() {
        let eligible = pool(20);
        let d = drand("seed-xyz");
        let sel = select_jury("case_1", &eligible, &d, 11);
        assert_eq!(sel.selected.len(), 11);
        let mut sorted_candidates = sel.scored_candidates.clone();
        sorted_candidates.sort();
        assert_eq!(sel.scored_candidates, sorted_candidates);
    }

    #[test]
    fn different_case_ids_produce_different_orderings() {
        let eligible = pool(20);
        let d = drand("seed-xyz");
        let a = select_jury("case_1", &eligible, &d, 11);
        let b = select_jury("case_2", &eligible, &d, 11);
        assert_ne!(a.selected, b.selected);
    }

    #[test]
    fn replacement_skips_used_candidates() {
        let eligible = pool(15);
        let d = drand("seed-r");
        let sel = select_jury("case_1", &eligible, &d, 11);
        let mut used: BTreeSet<String> = sel.selected.iter().cloned().collect();
        let first_replacement = replacement_at(&sel, &used).expect("replacement available");
        assert!(!used.contains(&first_replacement.agent_id));
        used.insert(first_replacement.agent_id.clone());
        let second_replacement = replacement_at(&sel, &used).expect("another replacement available");
        assert_ne!(first_replacement.agent_id, second_replacement.agent_id);
    }

    #[test]
    fn replacement_exhausted_returns_none() {
        let eligible = pool(11);
        let d = drand("seed-exhaust");
        let sel = select_jury("case_1", &eligible, &d, 11);
        let used: BTreeSet<String> = sel.scored_candidates.iter().map(|c| c.agent_id.clone()).collect();
        assert!(replacement_at(&sel, &used).is_none());
    }
}
