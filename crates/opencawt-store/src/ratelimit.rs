//! Sliding-window rate limiting (spec §4.3, §6 `RATE_LIMITED`).
//!
//! Each call is one row keyed `action | agent_id | timestamp_be`, so a
//! window check is a prefix scan over `action | agent_id` filtered by key
//! suffix rather than a counter that would need separate decay logic.

use opencawt_core::error::OpenCawtError;
use opencawt_core::types::Timestamp;

use crate::db::StoreDb;

fn storage_err(e: impl std::fmt::Display) -> OpenCawtError {
    OpenCawtError::Storage(e.to_string())
}

fn prefix(action: &str, agent_id: &str) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(action.as_bytes());
    out.push(0u8);
    out.extend_from_slice(agent_id.as_bytes());
    out.push(0u8);
    out
}

fn event_key(action: &str, agent_id: &str, now: Timestamp, nonce: u32) -> Vec<u8> {
    let mut out = prefix(action, agent_id);
    out.extend_from_slice(&now.to_be_bytes());
    out.extend_from_slice(&nonce.to_be_bytes());
    out
}

/// Count events for `(action, agent_id)` with timestamp >= `window_start`.
pub fn count_in_window(
    db: &StoreDb,
    action: &str,
    agent_id: &str,
    window_start: Timestamp,
) -> Result<u32, OpenCawtError> {
    let tree = db.rate_limit_tree();
    let p = prefix(action, agent_id);
    let mut n = 0u32;
    for item in tree.scan_prefix(&p) {
        let (k, _) = item.map_err(storage_err)?;
        let ts_bytes: [u8; 8] = k[p.len()..p.len() + 8]
            .try_into()
            .map_err(|_| OpenCawtError::Internal("malformed rate-limit key".into()))?;
        let ts = Timestamp::from_be_bytes(ts_bytes);
        if ts >= window_start {
            n += 1;
        }
    }
    Ok(n)
}

/// Record a single call. `nonce` only needs to disambiguate calls landing
/// in the same second for the same agent/action; callers pass a
/// monotonically increasing counter or a small random value.
pub fn record_event(
    db: &StoreDb,
    action: &str,
    agent_id: &str,
    now: Timestamp,
    nonce: u32,
) -> Result<(), OpenCawtError> {
    let tree = db.rate_limit_tree();
    tree.insert(event_key(action, agent_id, now, nonce), b"".as_ref())
        .map_err(storage_err)?;
    Ok(())
}

/// Drop rows older than `older_than` across all actions/agents, bounding
/// tree growth. Called from the periodic sweep alongside
/// `idempotency::sweep_expired`.
pub fn sweep_older_than(db: &StoreDb, older_than: Timestamp) -> Result<u64, OpenCawtError> {
    let tree = db.rate_limit_tree();
    let mut removed = 0u64;
    let mut stale_keys = Vec::new();
    for item in tree.iter() {
        let (k, _) = item.map_err(storage_err)?;
        // timestamp occupies the 8 bytes before the trailing 4-byte nonce.
        if k.len() < 12 {
            continue;
        }
        let ts_bytes: [u8; 8] = k[k.len() - 12..k.len() - 4]
            .try_into()
            .map_err(|_| OpenCawtError::Internal("malformed rate-limit key".into()))?;
        let ts = Timestamp::from_be_bytes(ts_bytes);
        if ts < older_than {
            stale_keys.push(k.to_vec());
        }
    }
    for k in stale_keys {
        tree.remove(k).map_err(storage_err)?;
        removed += 1;
    }
    Ok(removed)
}
