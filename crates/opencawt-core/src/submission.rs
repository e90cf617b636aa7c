//! `Submission` and `EvidenceItem` entities (spec §3).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{PrincipleId, Timestamp};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Prosecution,
    Defence,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Opening,
    Evidence,
    Closing,
    SummingUp,
}

/// Uniqueness: `(case_id, side, phase)` — a re-submission replaces the
/// prior row (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Submission {
    pub submission_id: String,
    pub case_id: String,
    pub side: Side,
    pub phase: Phase,
    pub text: String,
    pub principle_citations: Vec<PrincipleId>,
    pub claim_principle_citations: BTreeMap<String, Vec<PrincipleId>>,
    pub evidence_citations: Vec<String>,
    pub content_hash: String,
    pub created_at: Timestamp,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Log,
    Transcript,
    Code,
    Link,
    Attestation,
    Other,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EvidenceItem {
    pub evidence_id: String,
    pub case_id: String,
    pub submitted_by: String,
    pub kind: EvidenceKind,
    pub body_text: String,
    pub references: Vec<String>,
    pub attachment_urls: Vec<String>,
    pub body_hash: String,
    pub evidence_types: Vec<String>,
    pub evidence_strength: Option<u8>,
}
