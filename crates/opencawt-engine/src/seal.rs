//! Seal job pipeline (spec §4.8): at-most-once queuing, conditional
//! claiming, idempotent worker callbacks, retry selection.

use std::sync::Arc;

use opencawt_core::agreement::Agreement;
use opencawt_core::case::{Case, CaseSealStatus, CaseStatus};
use opencawt_core::error::OpenCawtError;
use opencawt_core::seal::{SealJob, SealJobStatus, SealSubject};
use opencawt_core::types::Timestamp;
use opencawt_store::StoreDb;

use crate::webhook::WebhookSender;

pub struct SealCallbackResult {
    pub replayed: bool,
    pub job: SealJob,
}

/// Apply a terminal mint-worker response to the case it seals (spec §4.7,
/// §4.8). Shared by the HTTP worker-callback route and the node's seal
/// sweeper so both apply the same `sealStatus`/`seal*` field transition.
pub fn apply_mint_outcome_to_case(mut case: Case, response: &opencawt_mint::SealResponse, now: Timestamp) -> Case {
    case.last_event_seq_no += 1;
    match response {
        opencawt_mint::SealResponse::Minted {
            asset_id,
            tx_sig,
            sealed_uri,
            metadata_uri,
            ..
        } => {
            case.seal_status = CaseSealStatus::Sealed;
            case.seal_asset_id = Some(asset_id.clone());
            case.seal_tx_sig = Some(tx_sig.clone());
            case.seal_uri = Some(sealed_uri.clone());
            case.metadata_uri = Some(metadata_uri.clone());
            case.sealed_at = Some(now);
            if case.status == CaseStatus::Closed {
                case.status = CaseStatus::Sealed;
            }
        }
        opencawt_mint::SealResponse::Failed { .. } => {
            case.seal_status = CaseSealStatus::Failed;
        }
    }
    case.updated_at = now;
    case
}

/// Creates exactly one seal job per subject (spec §3, §4.8). `job_id` is
/// minted by the caller (rather than here) so the id embedded in
/// `request_json` — already addressed to the worker before this call —
/// matches the job this function actually persists. Returns `Ok(None)` if a
/// job already exists for this subject rather than erroring — callers that
/// require exclusivity should check `get_seal_job_for_subject` first if they
/// need to distinguish "already exists" from "just created".
pub fn enqueue_seal_job(
    store: &StoreDb,
    job_id: String,
    subject: SealSubject,
    payload_hash: String,
    request_json: String,
    now: Timestamp,
    case_after_pending: Option<opencawt_core::case::Case>,
) -> Result<Option<SealJob>, OpenCawtError> {
    if store
        .get_seal_job_for_subject(subject.subject_id())?
        .is_some()
    {
        return Ok(None);
    }

    let job = SealJob {
        job_id,
        subject,
        status: SealJobStatus::Queued,
        attempts: 0,
        last_error: None,
        payload_hash,
        request_json,
        response_json: None,
        response_hash: None,
        claimed_at: None,
        completed_at: None,
        created_at: now,
    };

    match case_after_pending {
        Some(case) => {
            let created = store.enqueue_seal_job_tx(&job, &case)?;
            if !created {
                return Ok(None);
            }
        }
        None => {
            store.put_seal_job(&job)?;
        }
    }
    Ok(Some(job))
}

/// Conditionally claim a queued/failed-and-retryable job for minting
/// (spec §4.8: "the conditional ensures at-most-one claim across
/// concurrent pickers").
pub fn claim_job(store: &StoreDb, job_id: &str, now: Timestamp) -> Result<Option<SealJob>, OpenCawtError> {
    store.claim_seal_job(job_id, now)
}

/// Apply a worker callback. Idempotent: replays the stored response if the
/// job is already terminal and the payload hash matches; fails
/// `SEAL_JOB_ALREADY_FINALISED` if it differs (spec §4.8).
///
/// Exactly one of `case`/`agreement` should be `Some`, matching the job's
/// `subject` (a case-sealing job updates the case row, an agreement-sealing
/// job updates the agreement row — spec §4.9 routes agreements "through the
/// same seal pipeline" as cases but the two subjects are stored separately).
pub fn handle_worker_callback(
    store: &StoreDb,
    job_id: &str,
    incoming_response: &opencawt_mint::SealResponse,
    incoming_response_hash: &str,
    now: Timestamp,
    case: Option<opencawt_core::case::Case>,
    agreement: Option<Agreement>,
) -> Result<SealCallbackResult, OpenCawtError> {
    let mut job = store
        .get_seal_job(job_id)?
        .ok_or_else(|| OpenCawtError::Internal(format!("seal job not found: {job_id}")))?;

    if matches!(job.status, SealJobStatus::Minted | SealJobStatus::Failed) && job.completed_at.is_some()
    {
        if job.response_hash.as_deref() == Some(incoming_response_hash) {
            return Ok(SealCallbackResult { replayed: true, job });
        }
        return Err(OpenCawtError::SealJobAlreadyFinalised);
    }

    let response_json =
        serde_json::to_string(incoming_response).map_err(|e| OpenCawtError::Serialization(e.to_string()))?;
    job.response_json = Some(response_json);
    job.response_hash = Some(incoming_response_hash.to_string());
    job.completed_at = Some(now);

    match incoming_response {
        opencawt_mint::SealResponse::Minted { .. } => {
            job.status = SealJobStatus::Minted;
        }
        opencawt_mint::SealResponse::Failed {
            error_code,
            error_message,
        } => {
            job.status = SealJobStatus::Failed;
            let prefix = if incoming_response.is_non_retryable_failure() {
                "NON_RETRYABLE:"
            } else {
                ""
            };
            job.last_error = Some(format!("{prefix}{error_code}: {error_message}"));
        }
    }

    match (case, agreement) {
        (Some(case), _) => store.apply_seal_callback_tx(&job, &case)?,
        (None, Some(agreement)) => store.apply_seal_callback_for_agreement_tx(&job, &agreement)?,
        (None, None) => store.put_seal_job(&job)?,
    }

    Ok(SealCallbackResult { replayed: false, job })
}

/// Retry-selection predicate from spec §4.8 verbatim: `status IN (queued,
/// failed) AND lastError NOT LIKE 'NON_RETRYABLE:%' AND attempts <
/// maxAttempts`, restricted to jobs claimed/created more than
/// `older_than_minutes` ago.
pub fn sweep_retryable(
    store: &StoreDb,
    now: Timestamp,
    older_than_minutes: i64,
    max_attempts: u32,
) -> Result<Vec<SealJob>, OpenCawtError> {
    let cutoff = now - older_than_minutes * 60;
    let mut candidates = store.iter_retryable_seal_jobs()?;
    candidates.retain(|job| job.attempts < max_attempts && job.created_at <= cutoff);
    candidates.sort_by_key(|j| j.created_at);
    Ok(candidates)
}

/// Fire-and-forget post-seal notification (spec §4.10: "post-seal
/// notifications") to the prosecution and, if assigned, the defence agent's
/// `notifyUrl`. Grounded on `defence::dispatch_defence_invite`'s shape, but
/// simpler: there is no per-case delivery-status field to write back for a
/// seal notification, only a best-effort log on exhaustion.
///
/// Called once per terminal (non-replayed) seal callback, from both the
/// worker-callback HTTP route and the in-process seal sweeper, so a case
/// sealed via either path notifies its parties exactly once.
pub fn dispatch_post_seal_notifications(store: Arc<StoreDb>, webhooks: Arc<WebhookSender>, case: Case) {
    if !matches!(case.status, CaseStatus::Sealed | CaseStatus::Closed) {
        return;
    }
    let body = serde_json::json!({
        "type": "case.sealed",
        "caseId": case.case_id,
        "publicSlug": case.public_slug,
        "outcome": case.outcome,
        "sealStatus": case.seal_status,
        "sealAssetId": case.seal_asset_id,
        "sealUri": case.seal_uri,
        "metadataUri": case.metadata_uri,
        "sealedAt": case.sealed_at,
    });
    let Ok(body_json) = serde_json::to_string(&body) else {
        tracing::error!(case_id = %case.case_id, "failed to serialize post-seal notification body");
        return;
    };

    let mut recipients = vec![case.prosecution_agent_id.clone()];
    if let Some(defence) = &case.defence_agent_id {
        recipients.push(defence.clone());
    }

    for agent_id in recipients {
        let store = Arc::clone(&store);
        let webhooks = Arc::clone(&webhooks);
        let body_json = body_json.clone();
        let case_id = case.case_id.clone();
        tokio::spawn(async move {
            let notify_url = match store.get_agent(&agent_id) {
                Ok(Some(agent)) => agent.notify_url,
                Ok(None) => None,
                Err(e) => {
                    tracing::error!(case_id, agent_id, error = %e, "failed to load agent for post-seal notification");
                    None
                }
            };
            let Some(notify_url) = notify_url else { return };
            let outcome = webhooks.send(&notify_url, &body_json).await;
            if outcome.status != opencawt_core::case::DefenceInviteStatus::Delivered {
                tracing::warn!(case_id, agent_id, attempts = outcome.attempts, error = ?outcome.last_error, "post-seal notification delivery failed");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencawt_core::case::{Case, CaseSealStatus};
    use tempfile::TempDir;

    fn store() -> (TempDir, StoreDb) {
        let dir = TempDir::new().unwrap();
        let db = StoreDb::open(dir.path()).unwrap();
        (dir, db)
    }

    fn bare_case() -> Case {
        Case::new(
            "case_1".into(),
            "SLUG000001".into(),
            "agent_pros".into(),
            None,
            0,
            1,
        )
    }

    #[test]
    fn enqueue_is_at_most_once_per_subject() {
        let (_dir, db) = store();
        let mut case = bare_case();
        case.seal_status = CaseSealStatus::Pending;
        let subject = SealSubject::Case { case_id: "case_1".into() };
        let first = enqueue_seal_job(&db, "job_1".into(), subject.clone(), "hash1".into(), "{}".into(), 0, Some(case.clone())).unwrap();
        assert!(first.is_some());
        let second = enqueue_seal_job(&db, "job_2".into(), subject, "hash2".into(), "{}".into(), 1, Some(case)).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn claim_is_exclusive_across_concurrent_pickers() {
        let (_dir, db) = store();
        let case = bare_case();
        let subject = SealSubject::Case { case_id: "case_1".into() };
        let job = enqueue_seal_job(&db, "job_1".into(), subject, "hash".into(), "{}".into(), 0, Some(case)).unwrap().unwrap();

        let first = claim_job(&db, &job.job_id, 10).unwrap();
        assert!(first.is_some());
        // A second claim against the now-minting job must fail.
        let second = claim_job(&db, &job.job_id, 11).unwrap();
        assert!(second.is_none());
    }

    #[test]
    fn worker_callback_replays_identical_payload() {
        let (_dir, db) = store();
        let case = bare_case();
        let subject = SealSubject::Case { case_id: "case_1".into() };
        let job = enqueue_seal_job(&db, "job_1".into(), subject, "hash".into(), "{}".into(), 0, Some(case.clone())).unwrap().unwrap();
        claim_job(&db, &job.job_id, 1).unwrap();

        let resp = opencawt_mint::SealResponse::Minted {
            asset_id: "a".into(),
            tx_sig: "t".into(),
            sealed_uri: "https://x/u".into(),
            metadata_uri: "https://x/m".into(),
            sealed_at_iso: "now".into(),
        };
        let r1 = handle_worker_callback(&db, &job.job_id, &resp, "replayhash", 2, Some(case.clone()), None).unwrap();
        assert!(!r1.replayed);
        let r2 = handle_worker_callback(&db, &job.job_id, &resp, "replayhash", 3, Some(case), None).unwrap();
        assert!(r2.replayed);
    }

    #[test]
    fn worker_callback_rejects_mismatched_replay() {
        let (_dir, db) = store();
        let case = bare_case();
        let subject = SealSubject::Case { case_id: "case_1".into() };
        let job = enqueue_seal_job(&db, "job_1".into(), subject, "hash".into(), "{}".into(), 0, Some(case.clone())).unwrap().unwrap();
        claim_job(&db, &job.job_id, 1).unwrap();

        let resp = opencawt_mint::SealResponse::Minted {
            asset_id: "a".into(),
            tx_sig: "t".into(),
            sealed_uri: "https://x/u".into(),
            metadata_uri: "https://x/m".into(),
            sealed_at_iso: "now".into(),
        };
        handle_worker_callback(&db, &job.job_id, &resp, "hash-a", 2, Some(case.clone()), None).unwrap();
        let err = handle_worker_callback(&db, &job.job_id, &resp, "hash-b", 3, Some(case), None).unwrap_err();
        assert!(matches!(err, OpenCawtError::SealJobAlreadyFinalised));
    }

    #[test]
    fn non_retryable_failures_are_excluded_from_sweep() {
        let (_dir, db) = store();
        let case = bare_case();
        let subject = SealSubject::Case { case_id: "case_1".into() };
        let job = enqueue_seal_job(&db, "job_1".into(), subject, "hash".into(), "{}".into(), 0, Some(case.clone())).unwrap().unwrap();
        claim_job(&db, &job.job_id, 1).unwrap();

        let resp = opencawt_mint::SealResponse::Failed {
            error_code: "QUOTA_EXHAUSTED".into(),
            error_message: "no quota".into(),
        };
        handle_worker_callback(&db, &job.job_id, &resp, "hash", 2, Some(case), None).unwrap();

        let sweep = sweep_retryable(&db, 1000, 0, 8).unwrap();
        assert!(sweep.is_empty());
    }

    #[test]
    fn worker_callback_seals_an_agreement_subject() {
        use opencawt_core::agreement::{Agreement, AgreementMode, AgreementStatus};

        let (_dir, db) = store();
        let agreement = Agreement {
            proposal_id: "proposal_1".into(),
            agreement_code: "CODE000001".into(),
            mode: AgreementMode::Public,
            party_a_agent_id: "agent_a".into(),
            party_b_agent_id: "agent_b".into(),
            terms_hash: "termshash".into(),
            canonical_terms: serde_json::json!({}),
            sig_a: "sig_a".into(),
            sig_b: Some("sig_b".into()),
            status: AgreementStatus::Accepted,
            expires_at: 1_700_000_000,
            created_at: 0,
            accepted_at: Some(1),
            sealed_at: None,
            receipt: None,
        };
        db.put_agreement(&agreement).unwrap();

        let subject = SealSubject::Agreement { proposal_id: "proposal_1".into() };
        let job = enqueue_seal_job(&db, "job_1".into(), subject, "termshash".into(), "{}".into(), 0, None)
            .unwrap()
            .unwrap();
        claim_job(&db, &job.job_id, 1).unwrap();

        let resp = opencawt_mint::SealResponse::Minted {
            asset_id: "asset_1".into(),
            tx_sig: "tx_1".into(),
            sealed_uri: "https://x/u".into(),
            metadata_uri: "https://x/m".into(),
            sealed_at_iso: "now".into(),
        };
        let agreement_after = crate::agreements::apply_mint_outcome_to_agreement(agreement, &resp, 2);
        let result = handle_worker_callback(&db, &job.job_id, &resp, "hash", 2, None, Some(agreement_after))
            .unwrap();
        assert!(!result.replayed);

        let stored = db.get_agreement("proposal_1").unwrap().expect("agreement persisted");
        assert_eq!(stored.status, AgreementStatus::Sealed);
        assert_eq!(stored.sealed_at, Some(2));
        let receipt = stored.receipt.expect("receipt populated");
        assert_eq!(receipt.asset_id, "asset_1");
        assert_eq!(receipt.tx_sig, "tx_1");
    }
}
