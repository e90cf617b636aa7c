//! Worker-to-service callback (spec §4.8, §6): the mint worker posts the
//! terminal result of a seal job back here. Authenticated by a static
//! bearer token, not the agent-signed-mutation envelope — the worker has
//! no `Agent` row of its own.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::{Json, Router};

use opencawt_core::error::OpenCawtError;
use opencawt_core::seal::SealSubject;
use opencawt_core::transcript::{ActorRole, EventType, TranscriptEvent};
use opencawt_engine::agreements::apply_mint_outcome_to_agreement;
use opencawt_engine::seal::{apply_mint_outcome_to_case, dispatch_post_seal_notifications};

use crate::dto::SealResultRequest;
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/internal/seal-result", post(seal_result))
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

async fn seal_result(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let now = state.clock.now();
    match bearer_token(&headers) {
        Some(token) if token == state.config.worker_token => {}
        _ => return Err(ApiError::from(OpenCawtError::MissingAuthHeaders)),
    }

    let req: SealResultRequest =
        serde_json::from_slice(&body).map_err(|e| OpenCawtError::Malformed(e.to_string()))?;
    let response_hash = opencawt_crypto::canonical_hash_hex(&req.response);

    let job = state
        .store
        .get_seal_job(&req.job_id)?
        .ok_or_else(|| OpenCawtError::Internal(format!("seal job not found: {}", req.job_id)))?;

    let (case, agreement) = match &job.subject {
        SealSubject::Case { case_id } => (state.store.get_case(case_id)?, None),
        SealSubject::Agreement { proposal_id } => (None, state.store.get_agreement(proposal_id)?),
    };
    let case_after = case.map(|c| apply_mint_outcome_to_case(c, &req.response, now));
    let agreement_after = agreement.map(|a| apply_mint_outcome_to_agreement(a, &req.response, now));

    let result = opencawt_engine::seal::handle_worker_callback(
        &state.store,
        &req.job_id,
        &req.response,
        &response_hash,
        now,
        case_after.clone(),
        agreement_after,
    )?;

    if !result.replayed {
        if let Some(case) = case_after {
            let event_type = match &req.response {
                opencawt_mint::SealResponse::Minted { .. } => EventType::new(EventType::CASE_SEALED),
                opencawt_mint::SealResponse::Failed { .. } => EventType::new("seal_failed"),
            };
            let event = TranscriptEvent {
                case_id: case.case_id.clone(),
                seq_no: case.last_event_seq_no,
                actor_role: ActorRole::System,
                actor_agent_id: None,
                event_type,
                stage: case.session_stage,
                message: "mint worker reported a seal outcome".to_string(),
                artefact_ref: case.seal_uri.clone(),
                payload: None,
                created_at: now,
            };
            // `handle_worker_callback` already persisted `case_after` via
            // `apply_seal_callback_tx`; only the transcript event, which
            // isn't part of that transaction's tree set, is appended here.
            state.store.append_transcript_event(&event)?;
            dispatch_post_seal_notifications(state.store.clone(), state.webhooks.clone(), case);
        }
    }

    Ok((StatusCode::OK, Json(serde_json::json!({ "jobId": result.job.job_id, "status": result.job.status }))))
}
