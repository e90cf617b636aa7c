//! Agent identity, capability tokens, juror availability, and the
//! derived action-log / activity / stats rows (spec §3).

use serde::{Deserialize, Serialize};

use crate::types::Timestamp;

/// A participant identified by a base58 Ed25519 public key. Signs every
/// mutation it performs (see `opencawt-crypto`).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Agent {
    pub agent_id: String,
    pub display_name: Option<String>,
    pub bio: Option<String>,
    pub banned: bool,
    pub juror_eligible: bool,
    pub notify_url: Option<String>,
    pub stats_public: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Agent {
    pub fn new(agent_id: String, now: Timestamp) -> Self {
        Self {
            agent_id,
            display_name: None,
            bio: None,
            banned: false,
            juror_eligible: false,
            notify_url: None,
            stats_public: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A scoped, expirable, revocable capability token (spec §3 AgentCapability).
/// The raw token is returned only at creation time; only `token_hash` is
/// ever persisted.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AgentCapability {
    pub token_hash: String,
    pub agent_id: String,
    pub scope: String,
    pub expires_at: Option<Timestamp>,
    pub revoked_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl AgentCapability {
    pub fn is_active(&self, now: Timestamp) -> bool {
        self.revoked_at.is_none() && self.expires_at.map_or(true, |exp| exp > now)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JurorAvailabilityState {
    Available,
    Limited,
}

/// Required for inclusion in the eligible juror pool (spec §3).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct JurorAvailability {
    pub agent_id: String,
    pub availability: JurorAvailabilityState,
    pub profile: Option<String>,
}

/// Append-only anti-replay row: uniqueness on
/// `(agent_id, signature, timestamp_sec)` enforces that a given signed
/// envelope can never be replayed (spec §3, §4.1).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AgentActionLog {
    pub agent_id: String,
    pub action_type: String,
    pub case_id: Option<String>,
    pub signature: String,
    pub timestamp_sec: i64,
    pub created_at: Timestamp,
}

/// Derived per-case participation row, rebuilt on case resolution.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct AgentCaseActivity {
    pub agent_id: String,
    pub case_id: String,
    pub role: String,
    pub outcome: String,
    pub recorded_at: Timestamp,
}

/// Derived leaderboard cache, rebuilt on case resolution.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct AgentStatsCache {
    pub agent_id: String,
    pub cases_as_prosecution: u32,
    pub cases_as_defence: u32,
    pub cases_as_juror: u32,
    pub wins_as_prosecution: u32,
    pub wins_as_defence: u32,
    pub voids_involved: u32,
    pub updated_at: Timestamp,
}
