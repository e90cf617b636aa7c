//! Idempotency-key claim/complete/release pipeline (spec §4.2).
//!
//! Unique on `(agent_id, method, path, idempotency_key)`. A claim is an
//! atomic insert-if-absent (`compare_and_swap` against `None`) so two
//! concurrent requests bearing the same key race safely: exactly one wins
//! the `Claimed` outcome, the other observes `InProgress` or the completed
//! response.

use opencawt_core::error::OpenCawtError;
use opencawt_core::idempotency::{IdempotencyRecord, IdempotencyStatus};
use opencawt_core::types::Timestamp;

use crate::db::StoreDb;

fn storage_err(e: impl std::fmt::Display) -> OpenCawtError {
    OpenCawtError::Storage(e.to_string())
}

fn ser_err(e: impl std::fmt::Display) -> OpenCawtError {
    OpenCawtError::Serialization(e.to_string())
}

fn key(agent_id: &str, method: &str, path: &str, idempotency_key: &str) -> Vec<u8> {
    let mut out = Vec::new();
    for part in [agent_id, method, path, idempotency_key] {
        out.extend_from_slice(part.as_bytes());
        out.push(0u8);
    }
    out
}

pub enum IdempotencyOutcome {
    /// No prior record: caller owns this key and must call `complete` or
    /// `release` when done.
    Claimed,
    /// A record with the same request hash is mid-flight.
    InProgress,
    /// The same request already completed; caller should replay the stored
    /// response verbatim rather than re-executing the mutation.
    AlreadyComplete { status: u16, body_json: Option<String> },
    /// The key was reused with a different payload (spec §6
    /// `IDEMPOTENCY_KEY_REUSED_WITH_DIFFERENT_PAYLOAD`).
    ConflictDifferentPayload,
}

pub fn begin_claim(
    db: &StoreDb,
    agent_id: &str,
    method: &str,
    path: &str,
    idempotency_key: &str,
    request_hash: &str,
    now: Timestamp,
    ttl_seconds: i64,
) -> Result<IdempotencyOutcome, OpenCawtError> {
    let tree = db.idempotency_tree();
    let k = key(agent_id, method, path, idempotency_key);

    let record = IdempotencyRecord {
        agent_id: agent_id.to_string(),
        method: method.to_string(),
        path: path.to_string(),
        idempotency_key: idempotency_key.to_string(),
        request_hash: request_hash.to_string(),
        response_status: 0,
        response_json: None,
        status: IdempotencyStatus::InProgress,
        expires_at: now + ttl_seconds,
    };
    let encoded = bincode::serialize(&record).map_err(ser_err)?;

    match tree
        .compare_and_swap(&k, None::<&[u8]>, Some(encoded))
        .map_err(storage_err)?
    {
        Ok(()) => Ok(IdempotencyOutcome::Claimed),
        Err(_) => {
            let existing_bytes = tree.get(&k).map_err(storage_err)?.ok_or_else(|| {
                OpenCawtError::Internal("idempotency record vanished after CAS race".into())
            })?;
            let existing: IdempotencyRecord = bincode::deserialize(&existing_bytes).map_err(ser_err)?;

            if existing.request_hash != request_hash {
                return Ok(IdempotencyOutcome::ConflictDifferentPayload);
            }
            match existing.status {
                IdempotencyStatus::InProgress => Ok(IdempotencyOutcome::InProgress),
                IdempotencyStatus::Complete => Ok(IdempotencyOutcome::AlreadyComplete {
                    status: existing.response_status,
                    body_json: existing.response_json,
                }),
            }
        }
    }
}

pub fn complete(
    db: &StoreDb,
    agent_id: &str,
    method: &str,
    path: &str,
    idempotency_key: &str,
    response_status: u16,
    response_json: Option<String>,
    now: Timestamp,
    ttl_seconds: i64,
) -> Result<(), OpenCawtError> {
    let tree = db.idempotency_tree();
    let k = key(agent_id, method, path, idempotency_key);
    let existing_bytes = tree.get(&k).map_err(storage_err)?;
    let mut record: IdempotencyRecord = match existing_bytes {
        Some(b) => bincode::deserialize(&b).map_err(ser_err)?,
        None => {
            return Err(OpenCawtError::Internal(
                "complete called without a prior claim".into(),
            ))
        }
    };
    record.status = IdempotencyStatus::Complete;
    record.response_status = response_status;
    record.response_json = response_json;
    record.expires_at = now + ttl_seconds;
    tree.insert(&k, bincode::serialize(&record).map_err(ser_err)?)
        .map_err(storage_err)?;
    Ok(())
}

/// Release a claim without completing it — used when the handler itself
/// fails before producing a response, so a retry is not permanently stuck
/// behind an `InProgress` row.
pub fn release(
    db: &StoreDb,
    agent_id: &str,
    method: &str,
    path: &str,
    idempotency_key: &str,
) -> Result<(), OpenCawtError> {
    let tree = db.idempotency_tree();
    let k = key(agent_id, method, path, idempotency_key);
    tree.remove(&k).map_err(storage_err)?;
    Ok(())
}

/// Sweep idempotency records past their `expires_at` (spec §4.2: records
/// expire after the window and may be reused).
pub fn sweep_expired(db: &StoreDb, now: Timestamp) -> Result<u64, OpenCawtError> {
    let tree = db.idempotency_tree();
    let mut removed = 0u64;
    let mut stale_keys = Vec::new();
    for item in tree.iter() {
        let (k, bytes) = item.map_err(storage_err)?;
        let record: IdempotencyRecord = bincode::deserialize(&bytes).map_err(ser_err)?;
        if record.expires_at <= now {
            stale_keys.push(k.to_vec());
        }
    }
    for k in stale_keys {
        tree.remove(k).map_err(storage_err)?;
        removed += 1;
    }
    Ok(removed)
}
