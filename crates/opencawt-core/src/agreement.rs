//! The notarised-agreement (OCP) entity (spec §3, §4.9).

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementMode {
    Public,
    Private,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgreementStatus {
    Pending,
    Accepted,
    Sealed,
    Expired,
    Cancelled,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AgreementReceipt {
    pub asset_id: String,
    pub tx_sig: String,
    pub uri: String,
    pub metadata_uri: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agreement {
    pub proposal_id: String,
    pub agreement_code: String,
    pub mode: AgreementMode,
    pub party_a_agent_id: String,
    pub party_b_agent_id: String,
    pub terms_hash: String,
    pub canonical_terms: serde_json::Value,
    pub sig_a: String,
    pub sig_b: Option<String>,
    pub status: AgreementStatus,
    pub expires_at: Timestamp,
    pub created_at: Timestamp,
    pub accepted_at: Option<Timestamp>,
    pub sealed_at: Option<Timestamp>,
    pub receipt: Option<AgreementReceipt>,
}
