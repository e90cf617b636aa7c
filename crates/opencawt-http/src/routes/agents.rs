//! Agent identity, profile, and capability-token endpoints (spec §3 Agent,
//! AgentCapability).

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, patch, post};
use axum::{Json, Router};

use opencawt_core::agent::{Agent, AgentCapability};
use opencawt_core::error::OpenCawtError;

use crate::auth::{self, with_idempotency};
use crate::dto::{AddCapabilityRequest, AgentStatsView, AgentView, RegisterAgentRequest, UpdateAgentRequest};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/agents", post(register_agent))
        .route("/agents/:agent_id", get(get_agent))
        .route("/agents/:agent_id", patch(update_agent))
        .route("/agents/:agent_id/capabilities", post(add_capability))
        .route("/agents/:agent_id/stats", get(get_agent_stats))
}

async fn register_agent(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let now = state.clock.now();
    let authed = auth::authenticate_self_signed(&state, "POST", "/agents", &headers, &body, now)?;
    let req: RegisterAgentRequest = serde_json::from_slice(&body)
        .map_err(|e| OpenCawtError::Malformed(e.to_string()))?;

    let (status, value) = with_idempotency(&state, &authed, "POST", "/agents", now, async {
        if state.store.agent_exists(&authed.agent_id) {
            return Err(OpenCawtError::Malformed("agent already registered".to_string()));
        }
        let mut agent = Agent::new(authed.agent_id.clone(), now);
        agent.display_name = req.display_name.clone();
        agent.bio = req.bio.clone();
        agent.notify_url = req.notify_url.clone();
        agent.juror_eligible = req.juror_eligible.unwrap_or(false);
        state.store.put_agent(&agent)?;
        auth::record_action(&state, &authed, "agent_register", None, now)?;
        let value = serde_json::to_value(AgentView::from(agent)).map_err(|e| OpenCawtError::Serialization(e.to_string()))?;
        Ok((StatusCode::CREATED, value))
    })
    .await?;
    Ok((status, Json(value)))
}

async fn get_agent(State(state): State<AppState>, Path(agent_id): Path<String>) -> ApiResult<Json<AgentView>> {
    let agent = state
        .store
        .get_agent(&agent_id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::from(OpenCawtError::AgentNotFound(agent_id)))?;
    Ok(Json(AgentView::from(agent)))
}

async fn update_agent(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let now = state.clock.now();
    let path = format!("/agents/{agent_id}");
    let authed = auth::authenticate(&state, "PATCH", &path, &headers, &body, now)?;
    if authed.agent_id != agent_id {
        return Err(ApiError::from(OpenCawtError::Malformed(
            "an agent may only update its own profile".to_string(),
        )));
    }
    let req: UpdateAgentRequest =
        serde_json::from_slice(&body).map_err(|e| OpenCawtError::Malformed(e.to_string()))?;

    let (status, value) = with_idempotency(&state, &authed, "PATCH", &path, now, async {
        let mut agent = state
            .store
            .get_agent(&agent_id)?
            .ok_or_else(|| OpenCawtError::AgentNotFound(agent_id.clone()))?;
        if let Some(v) = req.display_name.clone() {
            agent.display_name = Some(v);
        }
        if let Some(v) = req.bio.clone() {
            agent.bio = Some(v);
        }
        if let Some(v) = req.notify_url.clone() {
            agent.notify_url = Some(v);
        }
        if let Some(v) = req.stats_public {
            agent.stats_public = v;
        }
        if let Some(v) = req.juror_eligible {
            agent.juror_eligible = v;
        }
        agent.updated_at = now;
        state.store.put_agent(&agent)?;
        auth::record_action(&state, &authed, "agent_update", None, now)?;
        let value = serde_json::to_value(AgentView::from(agent)).map_err(|e| OpenCawtError::Serialization(e.to_string()))?;
        Ok((StatusCode::OK, value))
    })
    .await?;
    Ok((status, Json(value)))
}

/// Leaderboard-cache lookup (spec §3 `AgentStatsCache`): rebuilt by the
/// session engine on every case resolution, read here verbatim. An agent
/// with no resolved cases yet simply has all-zero counters.
async fn get_agent_stats(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
) -> ApiResult<Json<AgentStatsView>> {
    state
        .store
        .get_agent(&agent_id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::from(OpenCawtError::AgentNotFound(agent_id.clone())))?;
    let stats = state
        .store
        .get_stats_cache(&agent_id)
        .map_err(ApiError::from)?
        .unwrap_or_else(|| opencawt_core::agent::AgentStatsCache {
            agent_id: agent_id.clone(),
            ..Default::default()
        });
    Ok(Json(AgentStatsView::from(stats)))
}

#[derive(serde::Serialize)]
#[serde(rename_all = "camelCase")]
struct CapabilityIssued {
    token: String,
    scope: String,
    expires_at: Option<opencawt_core::types::Timestamp>,
}

async fn add_capability(
    State(state): State<AppState>,
    Path(agent_id): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let now = state.clock.now();
    let path = format!("/agents/{agent_id}/capabilities");
    let authed = auth::authenticate(&state, "POST", &path, &headers, &body, now)?;
    if authed.agent_id != agent_id {
        return Err(ApiError::from(OpenCawtError::Malformed(
            "an agent may only mint capability tokens for itself".to_string(),
        )));
    }
    let req: AddCapabilityRequest =
        serde_json::from_slice(&body).map_err(|e| OpenCawtError::Malformed(e.to_string()))?;

    let (status, value) = with_idempotency(&state, &authed, "POST", &path, now, async {
        let raw_token = opencawt_core::ident::new_id("cap");
        let token_hash = opencawt_crypto::canonical::sha256_hex_bytes(raw_token.as_bytes());
        let capability = AgentCapability {
            token_hash,
            agent_id: agent_id.clone(),
            scope: req.scope.clone(),
            expires_at: req.expires_at,
            revoked_at: None,
            created_at: now,
        };
        state.store.put_capability(&capability)?;
        auth::record_action(&state, &authed, "agent_capability_issue", None, now)?;
        let value = serde_json::to_value(CapabilityIssued {
            token: raw_token,
            scope: capability.scope,
            expires_at: capability.expires_at,
        })
        .map_err(|e| OpenCawtError::Serialization(e.to_string()))?;
        Ok((StatusCode::CREATED, value))
    })
    .await?;
    Ok((status, Json(value)))
}
