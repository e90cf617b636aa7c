//! Seal job dispatch loop (spec §4.8, §5: "a second background loop sweeps
//! the seal-job queue"). Distinct from `opencawt_http::routes::internal`'s
//! worker callback: that route absorbs a worker calling back into this
//! service; this loop is the other direction — it is this service calling
//! out to the worker. Both converge on the same
//! `opencawt_engine::seal::handle_worker_callback`, so a claim dispatched
//! here and a callback posted independently by a real out-of-process worker
//! are handled identically.

use std::sync::Arc;
use std::time::Duration;

use opencawt_core::case::CaseStatus;
use opencawt_core::error::OpenCawtError;
use opencawt_core::seal::SealSubject;
use opencawt_core::transcript::{ActorRole, EventType, TranscriptEvent};
use opencawt_mint::{MintBackend, SealRequest};
use opencawt_store::StoreDb;

use crate::agreements::apply_mint_outcome_to_agreement;
use crate::clock::Clock;
use crate::seal::{apply_mint_outcome_to_case, claim_job, dispatch_post_seal_notifications, handle_worker_callback, sweep_retryable};
use crate::webhook::WebhookSender;

/// Drives queued/retryable seal jobs to completion against a
/// [`MintWorkerClient`] (spec §4.8 "Retry policy"). Grounded on the same
/// spawn/stop shape as `SessionEngine` (spec §9: "an explicit engine object
/// with start()/stop()").
pub struct SealSweeper {
    store: Arc<StoreDb>,
    clock: Arc<dyn Clock>,
    worker: Arc<MintBackend>,
    webhooks: Arc<WebhookSender>,
    interval_secs: u64,
    max_attempts: u32,
    /// How long a job must sit before it's eligible for a retry sweep
    /// (spec §4.8: "Exponential-ish backoff via the olderThanMinutes
    /// filter"). Freshly queued jobs (age 0) are always eligible.
    older_than_minutes: i64,
}

pub struct SealSweeperHandle {
    stop: Arc<tokio::sync::Notify>,
    join: tokio::task::JoinHandle<()>,
}

impl SealSweeperHandle {
    pub async fn stop(self) {
        self.stop.notify_one();
        let _ = self.join.await;
    }
}

impl SealSweeper {
    pub fn new(
        store: Arc<StoreDb>,
        clock: Arc<dyn Clock>,
        worker: Arc<MintBackend>,
        webhooks: Arc<WebhookSender>,
        interval_secs: u64,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            clock,
            worker,
            webhooks,
            interval_secs,
            max_attempts,
            older_than_minutes: 0,
        }
    }

    /// Freshly queued jobs dispatch immediately (age filter 0); only jobs
    /// that already failed once back off by this many minutes before the
    /// next attempt is eligible.
    pub fn with_retry_backoff_minutes(mut self, minutes: i64) -> Self {
        self.older_than_minutes = minutes;
        self
    }

    pub fn start(self: Arc<Self>) -> SealSweeperHandle {
        let stop = Arc::new(tokio::sync::Notify::new());
        let stop_rx = stop.clone();
        let sweeper = self.clone();
        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(sweeper.interval_secs.max(1)));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = sweeper.tick().await {
                            tracing::error!(error = %e, "seal sweeper tick failed");
                        }
                    }
                    _ = stop_rx.notified() => break,
                }
            }
        });
        SealSweeperHandle { stop, join }
    }

    /// One sweep: claim every eligible job, dispatch it to the worker, and
    /// apply whatever terminal response comes back. A job that the worker
    /// fails to reach at all is left `minting` — the next sweep's claim
    /// will simply find it already claimed and skip it until an operator
    /// intervenes, matching spec §4.6's "the engine never swallows poison".
    pub async fn tick(&self) -> Result<(), OpenCawtError> {
        let now = self.clock.now();
        let candidates = sweep_retryable(&self.store, now, self.older_than_minutes, self.max_attempts)?;
        for job in candidates {
            if let Err(e) = self.dispatch_one(&job.job_id, now).await {
                tracing::error!(job_id = %job.job_id, error = %e, "seal dispatch failed, retrying next sweep");
            }
        }
        Ok(())
    }

    async fn dispatch_one(&self, job_id: &str, now: i64) -> Result<(), OpenCawtError> {
        let Some(claimed) = claim_job(&self.store, job_id, now)? else {
            return Ok(());
        };

        let request: SealRequest = serde_json::from_str(&claimed.request_json)
            .map_err(|e| OpenCawtError::Serialization(e.to_string()))?;
        let response = self.worker.mint(&request).await?;
        let response_hash = opencawt_crypto::canonical_hash_hex(&response);

        let (case, agreement) = match &claimed.subject {
            SealSubject::Case { case_id } => (self.store.get_case(case_id)?, None),
            SealSubject::Agreement { proposal_id } => (None, self.store.get_agreement(proposal_id)?),
        };
        let case_after = case.map(|c| apply_mint_outcome_to_case(c, &response, now));
        let agreement_after = agreement.map(|a| apply_mint_outcome_to_agreement(a, &response, now));

        let result = handle_worker_callback(
            &self.store,
            job_id,
            &response,
            &response_hash,
            now,
            case_after.clone(),
            agreement_after,
        )?;

        if !result.replayed {
            if let Some(case) = case_after {
                let event_type = match &response {
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
                    message: "seal sweeper dispatched job to mint worker".to_string(),
                    artefact_ref: case.seal_uri.clone(),
                    payload: None,
                    created_at: now,
                };
                self.store.append_transcript_event(&event)?;
                debug_assert!(matches!(
                    case.status,
                    CaseStatus::Sealed | CaseStatus::Closed
                ));
                dispatch_post_seal_notifications(Arc::clone(&self.store), Arc::clone(&self.webhooks), case);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FakeClock;
    use crate::seal::enqueue_seal_job;
    use opencawt_core::case::{Case, CaseSealStatus};
    use opencawt_mint::{InMemoryMintWorker, SealRequest, SealResponse};
    use tempfile::TempDir;

    fn store() -> (TempDir, StoreDb) {
        let dir = TempDir::new().unwrap();
        let db = StoreDb::open(dir.path()).unwrap();
        (dir, db)
    }

    fn bare_case() -> Case {
        Case::new("case_1".into(), "SLUG000001".into(), "agent_pros".into(), None, 0, 1)
    }

    fn queue_job(db: &StoreDb, case: Case) {
        let subject = SealSubject::Case { case_id: case.case_id.clone() };
        let request = SealRequest {
            job_id: "job_1".into(),
            subject_kind: "case".into(),
            subject_id: case.case_id.clone(),
            payload_hash: "hash".into(),
            external_url: "https://opencawt.example/cases/case_1".into(),
            metadata: serde_json::json!({}),
        };
        let request_json = serde_json::to_string(&request).unwrap();
        enqueue_seal_job(db, "job_1".into(), subject, "hash".into(), request_json, 0, Some(case)).unwrap();
    }

    #[tokio::test]
    async fn sweep_claims_and_mints_a_queued_job() {
        let (_dir, db) = store();
        let db = Arc::new(db);
        let mut case = bare_case();
        case.seal_status = CaseSealStatus::Pending;
        queue_job(&db, case);

        let worker = Arc::new(MintBackend::Stub(InMemoryMintWorker::new()));
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(100));
        let webhooks = Arc::new(WebhookSender::new(b"key".to_vec()));
        let sweeper = SealSweeper::new(Arc::clone(&db), clock, worker, webhooks, 30, 8);

        sweeper.tick().await.unwrap();

        let job = db.get_seal_job("job_1").unwrap().unwrap();
        assert_eq!(job.status, opencawt_core::seal::SealJobStatus::Minted);
        let case_after = db.get_case("case_1").unwrap().unwrap();
        assert_eq!(case_after.seal_status, CaseSealStatus::Sealed);
    }

    #[tokio::test]
    async fn sweep_records_a_non_retryable_failure_without_retrying() {
        let (_dir, db) = store();
        let db = Arc::new(db);
        let mut case = bare_case();
        case.seal_status = CaseSealStatus::Pending;
        queue_job(&db, case);

        let stub = InMemoryMintWorker::new();
        stub.push(SealResponse::Failed {
            error_code: "QUOTA_EXHAUSTED".into(),
            error_message: "no quota".into(),
        });
        let worker = Arc::new(MintBackend::Stub(stub));
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(100));
        let webhooks = Arc::new(WebhookSender::new(b"key".to_vec()));
        let sweeper = SealSweeper::new(Arc::clone(&db), clock, worker, webhooks, 30, 8);

        sweeper.tick().await.unwrap();

        let job = db.get_seal_job("job_1").unwrap().unwrap();
        assert_eq!(job.status, opencawt_core::seal::SealJobStatus::Failed);
        assert!(job.last_error.unwrap().starts_with("NON_RETRYABLE:"));

        // A second tick must not re-dispatch a non-retryable failure.
        sweeper.tick().await.unwrap();
        let job = db.get_seal_job("job_1").unwrap().unwrap();
        assert_eq!(job.attempts, 1);
    }

    #[tokio::test]
    async fn a_sealed_case_triggers_a_best_effort_post_seal_notification() {
        use opencawt_core::agent::Agent;

        let (_dir, db) = store();
        let db = Arc::new(db);
        let mut agent = Agent::new("agent_pros".into(), 0);
        agent.notify_url = Some("http://127.0.0.1:1/webhooks".into());
        db.put_agent(&agent).unwrap();
        let mut case = bare_case();
        case.seal_status = CaseSealStatus::Pending;
        queue_job(&db, case);

        let worker = Arc::new(MintBackend::Stub(InMemoryMintWorker::new()));
        let clock: Arc<dyn Clock> = Arc::new(FakeClock::new(100));
        let webhooks = Arc::new(WebhookSender::new(b"key".to_vec()).with_retry_policy(1, 1));
        let sweeper = SealSweeper::new(Arc::clone(&db), clock, worker, webhooks, 30, 8);

        // Dispatch never blocks stage advancement on delivery, even when the
        // target host is unroutable; the case still seals synchronously.
        sweeper.tick().await.unwrap();
        let case_after = db.get_case("case_1").unwrap().unwrap();
        assert_eq!(case_after.seal_status, CaseSealStatus::Sealed);

        // Give the fire-and-forget notification task a chance to run and
        // fail without panicking the sweeper.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
