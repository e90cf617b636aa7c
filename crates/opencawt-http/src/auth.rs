//! Signed-mutation pipeline (spec §4.1, §4.2): header extraction, signature
//! and freshness verification, nonce replay rejection via the action log,
//! and the idempotency-key claim/replay/complete lifecycle wrapped around a
//! handler's own transaction. Grounded on the teacher's tower-layer CORS
//! composition (`RpcServer::start`), generalised from a pure before-stage
//! concern to the before/after shape spec §4.2 requires.

use std::future::Future;

use axum::http::{HeaderMap, StatusCode};
use opencawt_core::error::OpenCawtError;
use opencawt_core::types::Timestamp;
use opencawt_store::idempotency::{self, IdempotencyOutcome};

use crate::error::ApiError;
use crate::state::AppState;

const IDEMPOTENCY_TTL_SECONDS: i64 = 24 * 3600;

pub struct AuthedAgent {
    pub agent_id: String,
    pub timestamp: Timestamp,
    pub signature: String,
    pub idempotency_key: Option<String>,
    pub body_sha256: String,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, OpenCawtError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .ok_or(OpenCawtError::MissingAuthHeaders)
}

/// Verify the `OCPv1` signed-mutation envelope over `(method, path, body)`
/// and reject a previously-seen `(agent_id, signature, timestamp)` triple
/// (spec §4.1: "the action log doubles as the nonce/replay guard").
pub fn authenticate(
    state: &AppState,
    method: &str,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
    now: Timestamp,
) -> Result<AuthedAgent, OpenCawtError> {
    let agent_id = header_str(headers, "x-agent-id")?.to_string();
    let timestamp: Timestamp = header_str(headers, "x-timestamp")?
        .parse()
        .map_err(|_| OpenCawtError::Malformed("X-Timestamp must be an integer".to_string()))?;
    let nonce = header_str(headers, "x-nonce")?.to_string();
    let body_sha256 = header_str(headers, "x-body-sha256")?.to_string();
    let signature = header_str(headers, "x-signature")?.to_string();
    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let computed_hash = opencawt_crypto::canonical::sha256_hex_bytes(body);
    if computed_hash != body_sha256 {
        return Err(OpenCawtError::SignatureInvalid);
    }
    if !opencawt_crypto::signing::timestamp_is_fresh(now, timestamp) {
        return Err(OpenCawtError::TimestampExpired);
    }

    let signing_string = opencawt_crypto::build_signing_string(method, path, timestamp, &nonce, &body_sha256);
    opencawt_crypto::verify_message(&agent_id, signing_string.as_bytes(), &signature)?;

    if state.store.action_log_contains(&agent_id, &signature, timestamp)? {
        return Err(OpenCawtError::NonceReused);
    }

    match state.store.get_agent(&agent_id)? {
        Some(agent) if agent.banned => return Err(OpenCawtError::AgentBanned),
        Some(_) => {}
        None => return Err(OpenCawtError::AgentNotFound(agent_id)),
    }

    Ok(AuthedAgent {
        agent_id,
        timestamp,
        signature,
        idempotency_key,
        body_sha256,
    })
}

/// Same as [`authenticate`] but for the one endpoint that creates the agent
/// identity itself (spec §4.1 bootstrap case): the signature is checked
/// cryptographically, but the "agent already exists and isn't banned" check
/// is skipped since there is no row yet.
pub fn authenticate_self_signed(
    state: &AppState,
    method: &str,
    path: &str,
    headers: &HeaderMap,
    body: &[u8],
    now: Timestamp,
) -> Result<AuthedAgent, OpenCawtError> {
    let agent_id = header_str(headers, "x-agent-id")?.to_string();
    let timestamp: Timestamp = header_str(headers, "x-timestamp")?
        .parse()
        .map_err(|_| OpenCawtError::Malformed("X-Timestamp must be an integer".to_string()))?;
    let nonce = header_str(headers, "x-nonce")?.to_string();
    let body_sha256 = header_str(headers, "x-body-sha256")?.to_string();
    let signature = header_str(headers, "x-signature")?.to_string();
    let idempotency_key = headers
        .get("idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string());

    let computed_hash = opencawt_crypto::canonical::sha256_hex_bytes(body);
    if computed_hash != body_sha256 {
        return Err(OpenCawtError::SignatureInvalid);
    }
    if !opencawt_crypto::signing::timestamp_is_fresh(now, timestamp) {
        return Err(OpenCawtError::TimestampExpired);
    }
    let signing_string = opencawt_crypto::build_signing_string(method, path, timestamp, &nonce, &body_sha256);
    opencawt_crypto::verify_message(&agent_id, signing_string.as_bytes(), &signature)?;
    if state.store.action_log_contains(&agent_id, &signature, timestamp)? {
        return Err(OpenCawtError::NonceReused);
    }

    Ok(AuthedAgent {
        agent_id,
        timestamp,
        signature,
        idempotency_key,
        body_sha256,
    })
}

/// Record the action-log row that makes `(agent_id, signature, timestamp)`
/// un-replayable (spec §3 `AgentActionLog`). Called once a mutation has
/// actually been applied — never on an idempotent replay.
pub fn record_action(
    state: &AppState,
    authed: &AuthedAgent,
    action_type: &str,
    case_id: Option<String>,
    now: Timestamp,
) -> Result<(), OpenCawtError> {
    state.store.put_action_log(&opencawt_core::agent::AgentActionLog {
        agent_id: authed.agent_id.clone(),
        action_type: action_type.to_string(),
        case_id,
        signature: authed.signature.clone(),
        timestamp_sec: authed.timestamp,
        created_at: now,
    })
}

/// Enforce a per-agent sliding-window rate limit (spec §4.3): reject with
/// `RATE_LIMITED` once `count_in_window` over the trailing `window_secs`
/// reaches `limit`. Callers check this before mutating and call
/// [`record_rate_limit_event`] only once the mutation actually succeeds, so
/// a request that fails for some other reason doesn't consume quota.
pub fn enforce_rate_limit(
    state: &AppState,
    action: &str,
    agent_id: &str,
    window_secs: i64,
    limit: u32,
    now: Timestamp,
) -> Result<(), OpenCawtError> {
    let window_start = now - window_secs;
    let count = opencawt_store::ratelimit::count_in_window(&state.store, action, agent_id, window_start)?;
    if count >= limit {
        return Err(OpenCawtError::RateLimited {
            action: action.to_string(),
            retry_after_s: window_secs as u64,
        });
    }
    Ok(())
}

/// Record one rate-limited call. `rand::random` disambiguates calls from the
/// same agent/action landing within the same wall-clock second.
pub fn record_rate_limit_event(
    state: &AppState,
    action: &str,
    agent_id: &str,
    now: Timestamp,
) -> Result<(), OpenCawtError> {
    opencawt_store::ratelimit::record_event(&state.store, action, agent_id, now, rand::random())
}

/// Wrap `fut` in the idempotency-key claim/replay/complete lifecycle (spec
/// §4.2). A request without an `Idempotency-Key` header runs `fut` directly.
pub async fn with_idempotency<Fut>(
    state: &AppState,
    authed: &AuthedAgent,
    method: &str,
    path: &str,
    now: Timestamp,
    fut: Fut,
) -> Result<(StatusCode, serde_json::Value), ApiError>
where
    Fut: Future<Output = Result<(StatusCode, serde_json::Value), OpenCawtError>>,
{
    let Some(key) = authed.idempotency_key.clone() else {
        let (status, body) = fut.await?;
        return Ok((status, body));
    };

    match idempotency::begin_claim(
        &state.store,
        &authed.agent_id,
        method,
        path,
        &key,
        &authed.body_sha256,
        now,
        IDEMPOTENCY_TTL_SECONDS,
    )? {
        IdempotencyOutcome::Claimed => match fut.await {
            Ok((status, body)) => {
                idempotency::complete(
                    &state.store,
                    &authed.agent_id,
                    method,
                    path,
                    &key,
                    status.as_u16(),
                    Some(body.to_string()),
                    now,
                    IDEMPOTENCY_TTL_SECONDS,
                )?;
                Ok((status, body))
            }
            Err(e) => {
                idempotency::release(&state.store, &authed.agent_id, method, path, &key)?;
                Err(e.into())
            }
        },
        IdempotencyOutcome::InProgress => Err(OpenCawtError::IdempotencyInProgress.into()),
        IdempotencyOutcome::ConflictDifferentPayload => {
            Err(OpenCawtError::IdempotencyKeyReusedWithDifferentPayload.into())
        }
        IdempotencyOutcome::AlreadyComplete { status, body_json } => {
            let status = StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
            let body = body_json
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or(serde_json::Value::Null);
            Ok((status, body))
        }
    }
}
