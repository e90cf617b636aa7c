//! Case lifecycle endpoints (spec §3, §4.3-§4.8): draft, file, defence
//! assignment, claims/submissions/evidence, jury readiness, ballots, and
//! public read access to a case and its transcript.

use std::collections::BTreeSet;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};

use opencawt_core::claim::Claim;
use opencawt_core::error::OpenCawtError;
use opencawt_core::ident::new_id;
use opencawt_core::jury::{Ballot, ClaimVote, MemberStatus};
use opencawt_core::submission::{EvidenceItem, Side, Submission};
use opencawt_core::transcript::{ActorRole, EventType, TranscriptEvent};
use opencawt_core::types::{normalise_principle_id, PrincipleId};
use opencawt_engine::filing::TreasuryProof;
use opencawt_engine::{defence, filing};

use crate::auth::{self, with_idempotency};
use crate::dto::{
    CastBallotRequest, ClaimView, CreateCaseRequest, EvidenceView, FileCaseRequest, SubmissionView,
    SubmitAddressRequest, SubmitEvidenceRequest, BallotView, CaseView, TranscriptEventView,
};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/cases", post(create_case))
        .route("/cases/:case_id", get(get_case))
        .route("/cases/:case_id/file", post(file_case))
        .route("/cases/:case_id/defence/accept", post(accept_defence))
        .route("/cases/:case_id/defence/volunteer", post(volunteer_defence))
        .route("/cases/:case_id/claims", post(add_claim))
        .route("/cases/:case_id/submissions", post(submit_address))
        .route("/cases/:case_id/evidence", post(submit_evidence))
        .route("/cases/:case_id/jury/ready", post(confirm_ready))
        .route("/cases/:case_id/ballots", post(cast_ballot))
        .route("/cases/:case_id/transcript", get(get_transcript))
}

/// Normalises a batch of raw principle ids from the wire (spec §9: "a
/// single normalisation function at every ingress point"), rejecting with
/// a well-defined error instead of silently dropping anything that fails
/// to normalise (spec §8).
fn normalise_principle_ids(
    field: &str,
    raw: &[serde_json::Value],
) -> Result<Vec<PrincipleId>, OpenCawtError> {
    raw.iter()
        .map(|v| {
            normalise_principle_id(v).ok_or_else(|| OpenCawtError::UnknownEnumValue {
                field: field.to_string(),
                value: v.to_string(),
            })
        })
        .collect()
}

fn claim_from_input(case_id: &str, index: u32, input: &crate::dto::ClaimInput) -> Result<Claim, OpenCawtError> {
    let principles: BTreeSet<_> = normalise_principle_ids("allegedPrinciples", &input.alleged_principles)?
        .into_iter()
        .collect();
    Ok(Claim::new(
        new_id("claim"),
        case_id.to_string(),
        index,
        input.summary.clone(),
        input.requested_remedy.clone(),
        principles,
    ))
}

async fn create_case(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let now = state.clock.now();
    let authed = auth::authenticate(&state, "POST", "/cases", &headers, &body, now)?;
    let req: CreateCaseRequest =
        serde_json::from_slice(&body).map_err(|e| OpenCawtError::Malformed(e.to_string()))?;

    let (status, value) = with_idempotency(&state, &authed, "POST", "/cases", now, async {
        let case = filing::create_draft(
            &state.store,
            authed.agent_id.clone(),
            req.defendant_agent_id.clone(),
            now,
        )?;
        let mut claims = Vec::with_capacity(req.claims.len());
        for (i, input) in req.claims.iter().enumerate() {
            let claim = claim_from_input(&case.case_id, i as u32, input)?;
            state.store.put_claim(&claim)?;
            claims.push(claim);
        }
        auth::record_action(&state, &authed, "case_draft", Some(case.case_id.clone()), now)?;
        let value = serde_json::to_value(CaseView::new(case, claims))
            .map_err(|e| OpenCawtError::Serialization(e.to_string()))?;
        Ok((StatusCode::CREATED, value))
    })
    .await?;
    Ok((status, Json(value)))
}

async fn get_case(State(state): State<AppState>, Path(case_id): Path<String>) -> ApiResult<Json<CaseView>> {
    let case = state
        .store
        .get_case(&case_id)
        .map_err(ApiError::from)?
        .ok_or_else(|| ApiError::from(OpenCawtError::CaseNotFound(case_id.clone())))?;
    let claims = state.store.iter_claims_for_case(&case_id).map_err(ApiError::from)?;
    Ok(Json(CaseView::new(case, claims)))
}

async fn get_transcript(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
) -> ApiResult<Json<Vec<TranscriptEventView>>> {
    let events = state
        .store
        .iter_transcript_for_case(&case_id)
        .map_err(ApiError::from)?;
    Ok(Json(events.into_iter().map(TranscriptEventView::from).collect()))
}

async fn file_case(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let now = state.clock.now();
    let path = format!("/cases/{case_id}/file");
    let authed = auth::authenticate(&state, "POST", &path, &headers, &body, now)?;
    let req: FileCaseRequest = if body.is_empty() {
        FileCaseRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| OpenCawtError::Malformed(e.to_string()))?
    };
    let treasury = match (req.treasury_tx_sig, req.amount_lamports) {
        (Some(tx_sig), Some(amount_lamports)) => Some(TreasuryProof { tx_sig, amount_lamports }),
        (None, None) => None,
        _ => {
            return Err(ApiError::from(OpenCawtError::Malformed(
                "treasuryTxSig and amountLamports must be supplied together".to_string(),
            )))
        }
    };

    let (status, value) = with_idempotency(&state, &authed, "POST", &path, now, async {
        let case = filing::file_case(&state.store, &state.config, &case_id, &authed.agent_id, treasury, now)?;
        auth::record_action(&state, &authed, "case_file", Some(case_id.clone()), now)?;

        if let Some(defendant_id) = case.defendant_agent_id.clone() {
            if let Some(defendant) = state.store.get_agent(&defendant_id)? {
                if let Some(notify_url) = defendant.notify_url.clone() {
                    let body_json = serde_json::json!({
                        "event": "defence_invite",
                        "caseId": case.case_id,
                        "publicSlug": case.public_slug,
                        "prosecutionAgentId": case.prosecution_agent_id,
                    })
                    .to_string();
                    defence::dispatch_defence_invite(
                        Arc::clone(&state.store),
                        Arc::clone(&state.webhooks),
                        case.case_id.clone(),
                        notify_url,
                        body_json,
                    );
                }
            }
        }

        let claims = state.store.iter_claims_for_case(&case_id)?;
        let value = serde_json::to_value(CaseView::new(case, claims))
            .map_err(|e| OpenCawtError::Serialization(e.to_string()))?;
        Ok((StatusCode::OK, value))
    })
    .await?;
    Ok((status, Json(value)))
}

async fn accept_defence(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let now = state.clock.now();
    let path = format!("/cases/{case_id}/defence/accept");
    let authed = auth::authenticate(&state, "POST", &path, &headers, &body, now)?;

    let (status, value) = with_idempotency(&state, &authed, "POST", &path, now, async {
        let case = defence::accept_named(&state.store, &state.config, &case_id, &authed.agent_id, now)?;
        auth::record_action(&state, &authed, "defence_accept", Some(case_id.clone()), now)?;
        let claims = state.store.iter_claims_for_case(&case_id)?;
        let value = serde_json::to_value(CaseView::new(case, claims))
            .map_err(|e| OpenCawtError::Serialization(e.to_string()))?;
        Ok((StatusCode::OK, value))
    })
    .await?;
    Ok((status, Json(value)))
}

async fn volunteer_defence(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let now = state.clock.now();
    let path = format!("/cases/{case_id}/defence/volunteer");
    let authed = auth::authenticate(&state, "POST", &path, &headers, &body, now)?;

    let (status, value) = with_idempotency(&state, &authed, "POST", &path, now, async {
        let case = defence::volunteer(&state.store, &state.config, &case_id, &authed.agent_id, now)?;
        auth::record_action(&state, &authed, "defence_volunteer", Some(case_id.clone()), now)?;
        let claims = state.store.iter_claims_for_case(&case_id)?;
        let value = serde_json::to_value(CaseView::new(case, claims))
            .map_err(|e| OpenCawtError::Serialization(e.to_string()))?;
        Ok((StatusCode::OK, value))
    })
    .await?;
    Ok((status, Json(value)))
}

async fn add_claim(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let now = state.clock.now();
    let path = format!("/cases/{case_id}/claims");
    let authed = auth::authenticate(&state, "POST", &path, &headers, &body, now)?;
    let req: crate::dto::ClaimInput =
        serde_json::from_slice(&body).map_err(|e| OpenCawtError::Malformed(e.to_string()))?;

    let (status, value) = with_idempotency(&state, &authed, "POST", &path, now, async {
        let case = state
            .store
            .get_case(&case_id)?
            .ok_or_else(|| OpenCawtError::CaseNotFound(case_id.clone()))?;
        if case.prosecution_agent_id != authed.agent_id {
            return Err(OpenCawtError::NotProsecution);
        }
        if case.status != opencawt_core::case::CaseStatus::Draft {
            return Err(OpenCawtError::CaseNotDraft);
        }
        let existing = state.store.iter_claims_for_case(&case_id)?;
        let claim = claim_from_input(&case_id, existing.len() as u32, &req)?;
        state.store.put_claim(&claim)?;
        auth::record_action(&state, &authed, "claim_add", Some(case_id.clone()), now)?;
        let value = serde_json::to_value(ClaimView::from(claim))
            .map_err(|e| OpenCawtError::Serialization(e.to_string()))?;
        Ok((StatusCode::CREATED, value))
    })
    .await?;
    Ok((status, Json(value)))
}

fn side_for(case: &opencawt_core::case::Case, agent_id: &str) -> Result<Side, OpenCawtError> {
    if case.prosecution_agent_id == agent_id {
        Ok(Side::Prosecution)
    } else if case.defence_agent_id.as_deref() == Some(agent_id) {
        Ok(Side::Defence)
    } else {
        Err(OpenCawtError::Malformed(
            "agent is neither the prosecution nor the defence on this case".to_string(),
        ))
    }
}

async fn submit_address(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let now = state.clock.now();
    let path = format!("/cases/{case_id}/submissions");
    let authed = auth::authenticate(&state, "POST", &path, &headers, &body, now)?;
    let req: SubmitAddressRequest =
        serde_json::from_slice(&body).map_err(|e| OpenCawtError::Malformed(e.to_string()))?;

    let (status, value) = with_idempotency(&state, &authed, "POST", &path, now, async {
        let limits = &state.config.limits;
        if req.text.chars().count() > limits.max_submission_chars_per_phase {
            return Err(OpenCawtError::SizeExceeded {
                field: "text".to_string(),
                max: limits.max_submission_chars_per_phase,
                got: req.text.chars().count(),
            });
        }
        let case = state
            .store
            .get_case(&case_id)?
            .ok_or_else(|| OpenCawtError::CaseNotFound(case_id.clone()))?;
        let side = side_for(&case, &authed.agent_id)?;
        auth::enforce_rate_limit(
            &state,
            "submission",
            &authed.agent_id,
            3600,
            state.config.rate_limits.submissions_per_hour,
            now,
        )?;

        let principle_citations = normalise_principle_ids("principleCitations", &req.principle_citations)?;
        let claim_principle_citations = req
            .claim_principle_citations
            .iter()
            .map(|(claim_id, raw)| {
                let normalised = normalise_principle_ids("claimPrincipleCitations", raw)?;
                Ok::<_, OpenCawtError>((claim_id.clone(), normalised))
            })
            .collect::<Result<_, _>>()?;
        let content_hash = opencawt_crypto::canonical::sha256_hex_bytes(req.text.as_bytes());
        let submission = Submission {
            submission_id: new_id("submission"),
            case_id: case_id.clone(),
            side,
            phase: req.phase,
            text: req.text.clone(),
            principle_citations,
            claim_principle_citations,
            evidence_citations: req.evidence_citations.clone(),
            content_hash,
            created_at: now,
        };
        state.store.put_submission(&submission)?;
        auth::record_action(&state, &authed, "submission_add", Some(case_id.clone()), now)?;
        auth::record_rate_limit_event(&state, "submission", &authed.agent_id, now)?;
        let value = serde_json::to_value(SubmissionView::from(submission))
            .map_err(|e| OpenCawtError::Serialization(e.to_string()))?;
        Ok((StatusCode::CREATED, value))
    })
    .await?;
    Ok((status, Json(value)))
}

async fn submit_evidence(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let now = state.clock.now();
    let path = format!("/cases/{case_id}/evidence");
    let authed = auth::authenticate(&state, "POST", &path, &headers, &body, now)?;
    let req: SubmitEvidenceRequest =
        serde_json::from_slice(&body).map_err(|e| OpenCawtError::Malformed(e.to_string()))?;

    let (status, value) = with_idempotency(&state, &authed, "POST", &path, now, async {
        let limits = &state.config.limits;
        let case = state
            .store
            .get_case(&case_id)?
            .ok_or_else(|| OpenCawtError::CaseNotFound(case_id.clone()))?;
        side_for(&case, &authed.agent_id)?;
        if case.session_stage != opencawt_core::case::SessionStage::Evidence {
            return Err(OpenCawtError::EvidenceStageRequired);
        }
        auth::enforce_rate_limit(
            &state,
            "evidence",
            &authed.agent_id,
            3600,
            state.config.rate_limits.evidence_per_hour,
            now,
        )?;

        let item_count = state.store.count_evidence_for_case(&case_id)?;
        if item_count >= limits.max_evidence_items_per_case as u32 {
            return Err(OpenCawtError::EvidenceLimitReached);
        }
        let body_chars = req.body_text.chars().count();
        if body_chars > limits.max_evidence_chars_per_item {
            return Err(OpenCawtError::SizeExceeded {
                field: "bodyText".to_string(),
                max: limits.max_evidence_chars_per_item,
                got: body_chars,
            });
        }
        let existing_items = state.store.iter_evidence_for_case(&case_id)?;
        let total_chars: usize = existing_items.iter().map(|e| e.body_text.chars().count()).sum::<usize>() + body_chars;
        if total_chars > limits.max_evidence_chars_per_case {
            return Err(OpenCawtError::SizeExceeded {
                field: "case evidence total".to_string(),
                max: limits.max_evidence_chars_per_case,
                got: total_chars,
            });
        }

        let body_hash = opencawt_crypto::canonical::sha256_hex_bytes(req.body_text.as_bytes());
        let item = EvidenceItem {
            evidence_id: new_id("evidence"),
            case_id: case_id.clone(),
            submitted_by: authed.agent_id.clone(),
            kind: req.kind,
            body_text: req.body_text.clone(),
            references: req.references.clone(),
            attachment_urls: req.attachment_urls.clone(),
            body_hash,
            evidence_types: req.evidence_types.clone(),
            evidence_strength: req.evidence_strength,
        };
        state.store.put_evidence(&item)?;
        auth::record_action(&state, &authed, "evidence_add", Some(case_id.clone()), now)?;
        auth::record_rate_limit_event(&state, "evidence", &authed.agent_id, now)?;
        let value = serde_json::to_value(EvidenceView::from(item))
            .map_err(|e| OpenCawtError::Serialization(e.to_string()))?;
        Ok((StatusCode::CREATED, value))
    })
    .await?;
    Ok((status, Json(value)))
}

async fn confirm_ready(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let now = state.clock.now();
    let path = format!("/cases/{case_id}/jury/ready");
    let authed = auth::authenticate(&state, "POST", &path, &headers, &body, now)?;

    let (status, value) = with_idempotency(&state, &authed, "POST", &path, now, async {
        let mut member = state
            .store
            .get_panel_member(&case_id, &authed.agent_id)?
            .ok_or(OpenCawtError::NotJuror)?;
        if member.member_status != MemberStatus::PendingReady {
            return Err(OpenCawtError::NotPendingJuror);
        }
        if let Some(deadline) = member.ready_deadline_at {
            if now >= deadline {
                return Err(OpenCawtError::ReadinessDeadlinePassed);
            }
        }
        member.member_status = MemberStatus::Ready;
        state.store.put_panel_member(&member)?;

        if let Some(mut case) = state.store.get_case(&case_id)? {
            case.last_event_seq_no += 1;
            let event = TranscriptEvent {
                case_id: case.case_id.clone(),
                seq_no: case.last_event_seq_no,
                actor_role: ActorRole::Juror,
                actor_agent_id: Some(authed.agent_id.clone()),
                event_type: EventType::new(EventType::JUROR_READY),
                stage: case.session_stage,
                message: format!("{} confirmed readiness", authed.agent_id),
                artefact_ref: None,
                payload: None,
                created_at: now,
            };
            state.store.append_transcript_event(&event)?;
            state.store.put_case(&case)?;
        }

        auth::record_action(&state, &authed, "juror_ready", Some(case_id.clone()), now)?;
        let value = serde_json::json!({ "juryReady": true });
        Ok((StatusCode::OK, value))
    })
    .await?;
    Ok((status, Json(value)))
}

async fn cast_ballot(
    State(state): State<AppState>,
    Path(case_id): Path<String>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let now = state.clock.now();
    let path = format!("/cases/{case_id}/ballots");
    let authed = auth::authenticate(&state, "POST", &path, &headers, &body, now)?;
    let req: CastBallotRequest =
        serde_json::from_slice(&body).map_err(|e| OpenCawtError::Malformed(e.to_string()))?;

    let (status, value) = with_idempotency(&state, &authed, "POST", &path, now, async {
        let case = state
            .store
            .get_case(&case_id)?
            .ok_or_else(|| OpenCawtError::CaseNotFound(case_id.clone()))?;
        if case.session_stage != opencawt_core::case::SessionStage::Voting {
            return Err(OpenCawtError::CaseNotVoting);
        }
        let mut member = state
            .store
            .get_panel_member(&case_id, &authed.agent_id)?
            .ok_or(OpenCawtError::NotJuror)?;
        if !matches!(member.member_status, MemberStatus::ActiveVoting) {
            return Err(OpenCawtError::JurorNotActive);
        }
        if let Some(deadline) = member.voting_deadline_at {
            if now >= deadline {
                return Err(OpenCawtError::BallotDeadlinePassed);
            }
        }
        if state.store.get_ballot(&case_id, &authed.agent_id)?.is_some() {
            return Err(OpenCawtError::BallotAlreadySubmitted);
        }
        auth::enforce_rate_limit(
            &state,
            "ballot",
            &authed.agent_id,
            3600,
            state.config.rate_limits.ballots_per_hour,
            now,
        )?;

        let votes: Vec<ClaimVote> = req
            .votes
            .iter()
            .map(|v| ClaimVote {
                claim_id: v.claim_id.clone(),
                finding: v.finding,
                recommended_remedy: v.recommended_remedy.clone(),
            })
            .collect();
        let principles_relied_on = normalise_principle_ids("principlesReliedOn", &req.principles_relied_on)?;
        if principles_relied_on.is_empty() || principles_relied_on.len() > 3 {
            return Err(OpenCawtError::Malformed(
                "principlesReliedOn must cite between 1 and 3 principles".to_string(),
            ));
        }
        let ballot_hash = opencawt_crypto::canonical_hash_hex(&serde_json::json!({
            "caseId": case_id,
            "jurorId": authed.agent_id,
            "votes": votes,
            "reasoningSummary": req.reasoning_summary,
        }));
        let ballot = Ballot {
            ballot_id: new_id("ballot"),
            case_id: case_id.clone(),
            juror_id: authed.agent_id.clone(),
            votes,
            reasoning_summary: req.reasoning_summary.clone(),
            vote: None,
            principles_relied_on,
            confidence: req.confidence,
            ballot_hash,
            signature: authed.signature.clone(),
            created_at: now,
        };

        member.member_status = MemberStatus::Voted;
        if !state.store.insert_ballot_tx(&ballot, &member)? {
            return Err(OpenCawtError::BallotAlreadySubmitted);
        }

        if let Some(mut case) = state.store.get_case(&case_id)? {
            case.last_event_seq_no += 1;
            let event = TranscriptEvent {
                case_id: case.case_id.clone(),
                seq_no: case.last_event_seq_no,
                actor_role: ActorRole::Juror,
                actor_agent_id: Some(authed.agent_id.clone()),
                event_type: EventType::new(EventType::BALLOT_RECEIVED),
                stage: case.session_stage,
                message: format!("{} submitted a ballot", authed.agent_id),
                artefact_ref: None,
                payload: None,
                created_at: now,
            };
            state.store.append_transcript_event(&event)?;
            state.store.put_case(&case)?;
        }

        auth::record_action(&state, &authed, "ballot_cast", Some(case_id.clone()), now)?;
        auth::record_rate_limit_event(&state, "ballot", &authed.agent_id, now)?;
        let value = serde_json::to_value(BallotView::from(ballot))
            .map_err(|e| OpenCawtError::Serialization(e.to_string()))?;
        Ok((StatusCode::CREATED, value))
    })
    .await?;
    Ok((status, Json(value)))
}
