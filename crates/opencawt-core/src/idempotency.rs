//! `IdempotencyRecord` (spec §3, §4.2).

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    InProgress,
    Complete,
}

/// Unique on `(agent_id, method, path, idempotency_key)` (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub agent_id: String,
    pub method: String,
    pub path: String,
    pub idempotency_key: String,
    pub request_hash: String,
    pub response_status: u16,
    pub response_json: Option<String>,
    pub status: IdempotencyStatus,
    pub expires_at: Timestamp,
}
