//! Notarised-agreement (OCP) endpoints: propose / accept / verify (spec
//! §4.9).

use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};

use opencawt_core::error::OpenCawtError;
use opencawt_engine::agreements::{self, Lookup, ProposeRequest};

use crate::auth::{self, with_idempotency};
use crate::dto::{AcceptAgreementRequest, AgreementView, ProposeAgreementRequest, VerifyView};
use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/agreements/propose", post(propose))
        .route("/agreements/:proposal_id/accept", post(accept))
        .route("/verify", get(verify))
}

async fn propose(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let now = state.clock.now();
    let path = "/agreements/propose";
    let authed = auth::authenticate(&state, "POST", path, &headers, &body, now)?;
    let req: ProposeAgreementRequest =
        serde_json::from_slice(&body).map_err(|e| OpenCawtError::Malformed(e.to_string()))?;

    let (status, value) = with_idempotency(&state, &authed, "POST", path, now, async {
        let agreement = agreements::propose(
            &state.store,
            ProposeRequest {
                mode: req.mode,
                party_a_agent_id: req.party_a_agent_id.clone(),
                party_b_agent_id: req.party_b_agent_id.clone(),
                terms: req.terms.clone(),
                sig_a: req.sig_a.clone(),
                expires_at: req.expires_at,
            },
            now,
        )?;
        auth::record_action(&state, &authed, "agreement_propose", None, now)?;
        let value = serde_json::to_value(AgreementView::from(agreement))
            .map_err(|e| OpenCawtError::Serialization(e.to_string()))?;
        Ok((StatusCode::CREATED, value))
    })
    .await?;
    Ok((status, Json(value)))
}

async fn accept(
    State(state): State<AppState>,
    axum::extract::Path(proposal_id): axum::extract::Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let now = state.clock.now();
    let path = format!("/agreements/{proposal_id}/accept");
    let authed = auth::authenticate(&state, "POST", &path, &headers, &body, now)?;
    let req: AcceptAgreementRequest =
        serde_json::from_slice(&body).map_err(|e| OpenCawtError::Malformed(e.to_string()))?;

    let (status, value) = with_idempotency(&state, &authed, "POST", &path, now, async {
        // Authorisation here is cryptographic, not caller identity: `accept`
        // verifies `sigB` against the proposal's own `partyBAgentId`, so the
        // signed-mutation envelope only needs to prove *some* registered
        // agent relayed the call, not that it was party B's own HTTP call.
        let agreement = agreements::accept(
            &state.store,
            &proposal_id,
            req.sig_b.clone(),
            now,
            &state.config.public_base_url,
        )?;
        auth::record_action(&state, &authed, "agreement_accept", None, now)?;
        let value = serde_json::to_value(AgreementView::from(agreement))
            .map_err(|e| OpenCawtError::Serialization(e.to_string()))?;
        Ok((StatusCode::OK, value))
    })
    .await?;
    Ok((status, Json(value)))
}

#[derive(serde::Deserialize)]
pub struct VerifyQuery {
    proposal_id: Option<String>,
    code: Option<String>,
}

async fn verify(
    State(state): State<AppState>,
    Query(q): Query<VerifyQuery>,
) -> ApiResult<Json<VerifyView>> {
    let lookup = match (&q.proposal_id, &q.code) {
        (Some(id), _) => Lookup::ByProposalId(id),
        (None, Some(code)) => Lookup::ByCode(code),
        (None, None) => {
            return Err(OpenCawtError::MissingField("proposalId or code".to_string()).into())
        }
    };
    let result = agreements::verify(&state.store, lookup)?;
    Ok(Json(VerifyView {
        terms_hash_valid: result.terms_hash_valid,
        sig_a_valid: result.sig_a_valid,
        sig_b_valid: result.sig_b_valid,
        overall_valid: result.overall_valid,
        reason: result.reason,
    }))
}
