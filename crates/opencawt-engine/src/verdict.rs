//! Verdict engine (spec §4.7).
//!
//! `compute_verdict` is pure: every input is a value the caller already
//! holds (claims, ballots, artefact hashes), so the session engine can run
//! it inside the same transaction scope as the `closed` transition without
//! any store access of its own.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use opencawt_core::claim::{Claim, ClaimOutcome};
use opencawt_core::jury::{Ballot, BallotFinding};

/// Tie-break order the verdict engine applies when a claim's findings are
/// evenly split (spec §9 Open Question, decided in DESIGN.md): `proven` beats
/// `not_proven` beats `insufficient`. Recorded in the bundle so the choice
/// is observable, per the spec's own instruction.
pub const TIE_BREAK_POLICY: &str = "proven_first";

fn finding_rank(f: BallotFinding) -> u8 {
    match f {
        BallotFinding::Proven => 0,
        BallotFinding::NotProven => 1,
        BallotFinding::Insufficient => 2,
    }
}

/// Fixed ordinal ordering used to break modal-remedy ties (spec §4.7 step 3).
/// Remedies are free-form strings; ties are broken by first-seen order among
/// the remedies achieving the modal count, which is itself deterministic
/// because ballots are processed in a fixed order (by `juror_id`).
fn remedy_tie_break_order(remedies: &[String]) -> BTreeMap<String, usize> {
    let mut order = BTreeMap::new();
    for (i, r) in remedies.iter().enumerate() {
        order.entry(r.clone()).or_insert(i);
    }
    order
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverallOutcome {
    ForProsecution,
    ForDefence,
    Inconclusive,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ClaimTally {
    pub claim_id: String,
    pub proven: u32,
    pub not_proven: u32,
    pub insufficient: u32,
    pub finding: BallotFinding,
    pub majority_remedy: Option<String>,
}

/// Integrity artefacts carried into the verdict bundle so it can be
/// independently recomputed (spec §4.7 step 6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerdictArtefacts {
    pub drand_round: u64,
    pub drand_randomness: String,
    pub pool_snapshot_hash: String,
    pub jury_selection_proof_hash: String,
    pub submission_hashes: Vec<String>,
    pub evidence_hashes: Vec<String>,
    pub ballot_hashes: Vec<String>,
    pub closed_at: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VerdictBundle {
    pub case_id: String,
    pub claim_tallies: Vec<ClaimTally>,
    pub overall_outcome: OverallOutcome,
    pub artefacts: VerdictArtefacts,
    pub tie_break_policy: String,
}

pub struct VerdictOutcome {
    pub bundle: VerdictBundle,
    pub verdict_hash: String,
    pub claim_outcomes: Vec<(String, ClaimOutcome)>,
}

/// Implements spec §4.7 steps 1-6.
pub fn compute_verdict(
    case_id: &str,
    claims: &[Claim],
    ballots: &[Ballot],
    artefacts: VerdictArtefacts,
) -> VerdictOutcome {
    let mut sorted_ballots = ballots.to_vec();
    sorted_ballots.sort_by(|a, b| a.juror_id.cmp(&b.juror_id));

    let mut claim_tallies = Vec::with_capacity(claims.len());
    let mut claim_outcomes = Vec::with_capacity(claims.len());

    for claim in claims {
        let mut proven = 0u32;
        let mut not_proven = 0u32;
        let mut insufficient = 0u32;
        let mut remedies_by_finding: BTreeMap<BallotFinding, Vec<String>> = BTreeMap::new();

        for ballot in &sorted_ballots {
            for vote in &ballot.votes {
                if vote.claim_id != claim.claim_id {
                    continue;
                }
                match vote.finding {
                    BallotFinding::Proven => proven += 1,
                    BallotFinding::NotProven => not_proven += 1,
                    BallotFinding::Insufficient => insufficient += 1,
                }
                if let Some(remedy) = &vote.recommended_remedy {
                    remedies_by_finding
                        .entry(vote.finding)
                        .or_default()
                        .push(remedy.clone());
                }
            }
        }

        // Majority category, ties broken by finding_rank (step 2).
        let counts = [
            (BallotFinding::Proven, proven),
            (BallotFinding::NotProven, not_proven),
            (BallotFinding::Insufficient, insufficient),
        ];
        let max_count = counts.iter().map(|(_, c)| *c).max().unwrap_or(0);
        let finding = counts
            .iter()
            .filter(|(_, c)| *c == max_count)
            .min_by_key(|(f, _)| finding_rank(*f))
            .map(|(f, _)| *f)
            .unwrap_or(BallotFinding::Insufficient);

        // Modal remedy among ballots whose finding matched the claim outcome
        // (step 3), ties broken by first-seen order in juror_id-sorted
        // ballot processing.
        let majority_remedy = remedies_by_finding.get(&finding).and_then(|remedies| {
            if remedies.is_empty() {
                return None;
            }
            let tie_break = remedy_tie_break_order(remedies);
            let mut counts: BTreeMap<String, usize> = BTreeMap::new();
            for r in remedies {
                *counts.entry(r.clone()).or_insert(0) += 1;
            }
            let max = counts.values().copied().max().unwrap_or(0);
            counts
                .into_iter()
                .filter(|(_, c)| *c == max)
                .min_by_key(|(r, _)| tie_break.get(r).copied().unwrap_or(usize::MAX))
                .map(|(r, _)| r)
        });

        claim_tallies.push(ClaimTally {
            claim_id: claim.claim_id.clone(),
            proven,
            not_proven,
            insufficient,
            finding,
            majority_remedy,
        });

        let claim_outcome = match finding {
            BallotFinding::Proven => ClaimOutcome::ForProsecution,
            BallotFinding::NotProven => ClaimOutcome::ForDefence,
            BallotFinding::Insufficient => ClaimOutcome::Undecided,
        };
        claim_outcomes.push((claim.claim_id.clone(), claim_outcome));
    }

    // Overall outcome (step 4): majority of claims proven/not_proven, else
    // inconclusive.
    let total = claim_tallies.len();
    let proven_claims = claim_tallies
        .iter()
        .filter(|t| t.finding == BallotFinding::Proven)
        .count();
    let not_proven_claims = claim_tallies
        .iter()
        .filter(|t| t.finding == BallotFinding::NotProven)
        .count();

    let overall_outcome = if total > 0 && proven_claims * 2 > total {
        OverallOutcome::ForProsecution
    } else if total > 0 && not_proven_claims * 2 > total {
        OverallOutcome::ForDefence
    } else {
        OverallOutcome::Inconclusive
    };

    let bundle = VerdictBundle {
        case_id: case_id.to_string(),
        claim_tallies,
        overall_outcome,
        artefacts,
        tie_break_policy: TIE_BREAK_POLICY.to_string(),
    };
    let verdict_hash = opencawt_crypto::canonical_hash_hex(&bundle);

    VerdictOutcome {
        bundle,
        verdict_hash,
        claim_outcomes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencawt_core::jury::ClaimVote;
    use std::collections::BTreeSet;

    fn claim(id: &str) -> Claim {
        Claim::new(
            id.to_string(),
            "case_1".to_string(),
            0,
            "summary".to_string(),
            "remedy".to_string(),
            BTreeSet::new(),
        )
    }

    fn ballot(juror: &str, claim_id: &str, finding: BallotFinding, remedy: &str) -> Ballot {
        Ballot {
            ballot_id: format!("ballot_{juror}"),
            case_id: "case_1".to_string(),
            juror_id: juror.to_string(),
            votes: vec![ClaimVote {
                claim_id: claim_id.to_string(),
                finding,
                recommended_remedy: Some(remedy.to_string()),
            }],
            reasoning_summary: "because".to_string(),
            vote: None,
            principles_relied_on: vec![],
            confidence: None,
            ballot_hash: "hash".to_string(),
            signature: "sig".to_string(),
            created_at: 0,
        }
    }

    fn artefacts() -> VerdictArtefacts {
        VerdictArtefacts {
            drand_round: 1,
            drand_randomness: "r".to_string(),
            pool_snapshot_hash: "p".to_string(),
            jury_selection_proof_hash: "s".to_string(),
            submission_hashes: vec![],
            evidence_hashes: vec![],
            ballot_hashes: vec![],
            closed_at: 0,
        }
    }

    #[test]
    fn unanimous_proven_is_for_prosecution() {
        let claims = vec![claim("c1")];
        let ballots = vec![
            ballot("j1", "c1", BallotFinding::Proven, "restitution"),
            ballot("j2", "c1", BallotFinding::Proven, "restitution"),
            ballot("j3", "c1", BallotFinding::Proven, "restitution"),
        ];
        let outcome = compute_verdict("case_1", &claims, &ballots, artefacts());
        assert_eq!(outcome.bundle.overall_outcome, OverallOutcome::ForProsecution);
        assert_eq!(outcome.bundle.claim_tallies[0].majority_remedy, Some("restitution".to_string()));
    }

    #[test]
    fn evenly_split_tie_breaks_toward_proven() {
        let claims = vec![claim("c1")];
        let ballots = vec![
            ballot("j1", "c1", BallotFinding::Proven, "a"),
            ballot("j2", "c1", BallotFinding::NotProven, "b"),
        ];
        let outcome = compute_verdict("case_1", &claims, &ballots, artefacts());
        assert_eq!(outcome.bundle.claim_tallies[0].finding, BallotFinding::Proven);
    }

    #[test]
    fn no_majority_across_claims_is_inconclusive() {
        let claims = vec![claim("c1"), claim("c2")];
        let ballots = vec![
            ballot("j1", "c1", BallotFinding::Proven, "a"),
            ballot("j1", "c2", BallotFinding::NotProven, "a"),
        ];
        let outcome = compute_verdict("case_1", &claims, &ballots, artefacts());
        assert_eq!(outcome.bundle.overall_outcome, OverallOutcome::Inconclusive);
    }

    #[test]
    fn verdict_hash_is_deterministic() {
        let claims = vec![claim("c1")];
        let ballots = vec![ballot("j1", "c1", BallotFinding::Proven, "a")];
        let a = compute_verdict("case_1", &claims, &ballots, artefacts());
        let b = compute_verdict("case_1", &claims, &ballots, artefacts());
        assert_eq!(a.verdict_hash, b.verdict_hash);
    }
}
