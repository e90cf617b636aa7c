//! Session state machine (spec §4.6, "the hardest subsystem"): the engine
//! tick that drives every filed case through `pre_session → jury_readiness →
//! opening_addresses → evidence → closing_addresses → summing_up → voting →
//! closed` (or `void`), one transition per case per tick.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use opencawt_beacon::BeaconClient;
use opencawt_core::case::{
    Case, CaseRuntime, CaseSealStatus, CaseStatus, DefenceState, Outcome, SessionStage, VoidReason,
};
use opencawt_core::config::Config;
use opencawt_core::error::OpenCawtError;
use opencawt_core::ident::new_id;
use opencawt_core::jury::{JuryPanelMember, MemberStatus};
use opencawt_core::seal::SealSubject;
use opencawt_core::submission::{Phase, Side};
use opencawt_core::transcript::{ActorRole, EventType, TranscriptEvent};
use opencawt_core::types::Timestamp;
use opencawt_jury::{new_selection_run_id, replacement_at, select_jury, JurySelection, SelectionRunKind};
use opencawt_store::StoreDb;

use crate::clock::Clock;
use crate::seal::enqueue_seal_job;
use crate::verdict::{compute_verdict, OverallOutcome, VerdictArtefacts};

/// Drives every open case's stage machine on a timer (spec §4.6). Grounded
/// on the teacher's background-task spawn in its node binary and its
/// engine's one-transition-per-tick, single-transaction-commit discipline,
/// generalised here from "apply one staged mutation" to "advance one case".
pub struct SessionEngine {
    store: Arc<StoreDb>,
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
    beacon: Arc<BeaconClient>,
    /// Case-wide closing lock (spec §4.6 "Concurrency and closure"): prevents
    /// two overlapping `voting → closed` transitions for the same case.
    closing: Mutex<HashSet<String>>,
}

/// Releases `case_id`'s entry in `closing` on drop, including on panic —
/// the same `Drop`-based cleanup idiom `KeyPair` uses for zeroizing key
/// material.
struct ClosingGuard<'a> {
    closing: &'a Mutex<HashSet<String>>,
    case_id: String,
}

impl Drop for ClosingGuard<'_> {
    fn drop(&mut self) {
        self.closing
            .lock()
            .expect("lock not poisoned")
            .remove(&self.case_id);
    }
}

pub struct EngineHandle {
    stop: Arc<tokio::sync::Notify>,
    join: tokio::task::JoinHandle<()>,
}

impl EngineHandle {
    pub async fn stop(self) {
        self.stop.notify_one();
        let _ = self.join.await;
    }
}

impl SessionEngine {
    pub fn new(
        store: Arc<StoreDb>,
        config: Arc<Config>,
        clock: Arc<dyn Clock>,
        beacon: Arc<BeaconClient>,
    ) -> Self {
        Self {
            store,
            config,
            clock,
            beacon,
            closing: Mutex::new(HashSet::new()),
        }
    }

    pub fn start(self: Arc<Self>) -> EngineHandle {
        let stop = Arc::new(tokio::sync::Notify::new());
        let stop_rx = stop.clone();
        let engine = self.clone();
        let tick_ms = engine.config.engine_tick_ms.max(1);
        let join = tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_millis(tick_ms));
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if let Err(e) = engine.tick().await {
                            tracing::error!(error = %e, "session engine tick failed");
                        }
                    }
                    _ = stop_rx.notified() => break,
                }
            }
        });
        EngineHandle { stop, join }
    }

    /// One full sweep over every non-terminal case (spec §4.6: "one logical
    /// timer loop observes every case not yet closed|sealed|void"). A
    /// per-case error is logged and left for the next tick — "partial work
    /// is impossible because every transition is a single transaction"
    /// (spec §4.6 Failure semantics).
    pub async fn tick(&self) -> Result<(), OpenCawtError> {
        for case in self.store.iter_active_cases()? {
            if let Err(e) = self.advance_case(&case.case_id).await {
                tracing::error!(case_id = %case.case_id, error = %e, "advance_case failed, retrying next tick");
            }
        }
        Ok(())
    }

    async fn advance_case(&self, case_id: &str) -> Result<(), OpenCawtError> {
        let Some(case) = self.store.get_case(case_id)? else {
            return Ok(());
        };
        if case.is_terminal() {
            return Ok(());
        }
        let Some(runtime) = self.store.get_case_runtime(case_id)? else {
            return Ok(());
        };
        let now = self.clock.now();

        match case.session_stage {
            SessionStage::PreSession => self.advance_pre_session(case, runtime, now).await,
            SessionStage::JuryReadiness => self.advance_jury_readiness(case, runtime, now),
            SessionStage::OpeningAddresses => self.advance_stage(
                case,
                runtime,
                now,
                Phase::Opening,
                SessionStage::Evidence,
                VoidReason::MISSING_OPENING_SUBMISSION,
            ),
            SessionStage::Evidence => self.advance_stage(
                case,
                runtime,
                now,
                Phase::Evidence,
                SessionStage::ClosingAddresses,
                VoidReason::MISSING_EVIDENCE_SUBMISSION,
            ),
            SessionStage::ClosingAddresses => self.advance_stage(
                case,
                runtime,
                now,
                Phase::Closing,
                SessionStage::SummingUp,
                VoidReason::MISSING_CLOSING_SUBMISSION,
            ),
            SessionStage::SummingUp => self.advance_summing_up(case, runtime, now),
            SessionStage::Voting => self.advance_voting(case, runtime, now),
            SessionStage::Closed | SessionStage::Void => Ok(()),
        }
    }

    // ── pre_session ─────────────────────────────────────────────────────────

    async fn advance_pre_session(
        &self,
        mut case: Case,
        runtime: CaseRuntime,
        now: Timestamp,
    ) -> Result<(), OpenCawtError> {
        // Filing itself (draft → filed) is a signed-mutation handler
        // transition, not a tick; a still-draft case has nothing for the
        // engine to do yet.
        if case.status != CaseStatus::Filed {
            return Ok(());
        }
        let filed_at = case.filed_at.unwrap_or(now);

        match case.defence_state {
            DefenceState::NamedExclusive => {
                let exclusive_deadline = filed_at + self.config.rules.named_defendant_exclusive_seconds;
                let response_deadline = filed_at + self.config.rules.named_defendant_response_seconds;
                if now >= response_deadline {
                    return self.void_case(
                        case,
                        runtime,
                        VoidReason::new(VoidReason::MISSING_DEFENCE_ASSIGNMENT),
                        now,
                    );
                }
                if now >= exclusive_deadline && case.defence_state == DefenceState::NamedExclusive {
                    case.defence_state = DefenceState::Open;
                    case.updated_at = now;
                    self.store.put_case(&case)?;
                }
                Ok(())
            }
            DefenceState::Open => {
                let cutoff = filed_at + self.config.rules.defence_assignment_cutoff_seconds;
                if now >= cutoff {
                    return self.void_case(
                        case,
                        runtime,
                        VoidReason::new(VoidReason::MISSING_DEFENCE_ASSIGNMENT),
                        now,
                    );
                }
                Ok(())
            }
            DefenceState::Unassigned => self.void_case(
                case,
                runtime,
                VoidReason::new(VoidReason::MISSING_DEFENCE_ASSIGNMENT),
                now,
            ),
            DefenceState::Assigned => {
                let Some(start_at) = runtime.scheduled_session_start_at else {
                    return Ok(());
                };
                if now < start_at {
                    return Ok(());
                }
                self.begin_jury_selection(case, runtime, now).await
            }
        }
    }

    /// `pre_session → jury_readiness`: fetch the drand round, select the
    /// panel (spec §4.5), and open a `readyDeadlineAt` window per juror.
    async fn begin_jury_selection(
        &self,
        mut case: Case,
        mut runtime: CaseRuntime,
        now: Timestamp,
    ) -> Result<(), OpenCawtError> {
        let eligible: BTreeSet<String> = self
            .store
            .iter_eligible_jurors()?
            .into_iter()
            .map(|(agent, _)| agent.agent_id)
            .filter(|id| {
                *id != case.prosecution_agent_id
                    && case.defence_agent_id.as_deref() != Some(id.as_str())
                    && case.defendant_agent_id.as_deref() != Some(id.as_str())
            })
            .collect();

        let panel_size = self.config.rules.juror_panel_size;
        let drand = self.beacon.round_after(now).await?;
        let selection = select_jury(&case.case_id, &eligible, &drand, panel_size);

        if selection.selected.len() < panel_size {
            return self.void_case(case, runtime, VoidReason::new(VoidReason::VOTING_TIMEOUT), now);
        }

        case.drand_round = Some(drand.round);
        case.drand_randomness = Some(drand.randomness.clone());
        case.pool_snapshot_hash = Some(selection.pool_snapshot_hash.clone());
        case.selection_proof_hash = Some(selection.selection_proof_hash.clone());
        case.status = CaseStatus::JurySelected;
        case.session_stage = SessionStage::JuryReadiness;
        case.updated_at = now;

        let ready_deadline = now + self.config.rules.juror_readiness_seconds;
        let run_id = new_selection_run_id(SelectionRunKind::Initial);
        for candidate in selection.scored_candidates.iter().take(panel_size) {
            let member = JuryPanelMember {
                case_id: case.case_id.clone(),
                juror_id: candidate.agent_id.clone(),
                score_hash: candidate.score_hash.clone(),
                member_status: MemberStatus::PendingReady,
                ready_deadline_at: Some(ready_deadline),
                voting_deadline_at: None,
                replacement_of_juror_id: None,
                replaced_by_juror_id: None,
                selection_run_id: run_id.clone(),
            };
            self.store.put_panel_member(&member)?;
        }
        self.store_selection(&case.case_id, &selection)?;

        runtime.current_stage = SessionStage::JuryReadiness;
        runtime.stage_started_at = now;
        runtime.stage_deadline_at = Some(ready_deadline);

        let event = self.build_event(
            &mut case,
            ActorRole::System,
            EventType::JURY_SELECTED,
            SessionStage::JuryReadiness,
            "jury panel selected",
            Some(serde_json::json!({"selectionProofHash": selection.selection_proof_hash})),
            now,
        );
        self.store.transition_case(&case, &runtime, &event)
    }

    // ── jury_readiness ──────────────────────────────────────────────────────

    fn advance_jury_readiness(
        &self,
        mut case: Case,
        mut runtime: CaseRuntime,
        now: Timestamp,
    ) -> Result<(), OpenCawtError> {
        let mut members = self.store.iter_panel_for_case(&case.case_id)?;
        let Some(selection) = self.load_selection(&case.case_id)? else {
            return Err(OpenCawtError::Internal(format!(
                "missing jury selection for case {}",
                case.case_id
            )));
        };

        let mut used: BTreeSet<String> = members.iter().map(|m| m.juror_id.clone()).collect();
        let mut new_members = Vec::new();
        let mut exhausted = false;

        for member in members.iter_mut() {
            if member.member_status != MemberStatus::PendingReady {
                continue;
            }
            if !member.ready_deadline_at.is_some_and(|d| now >= d) {
                continue;
            }
            member.member_status = MemberStatus::TimedOut;
            match replacement_at(&selection, &used) {
                Some(candidate) => {
                    used.insert(candidate.agent_id.clone());
                    let replacement = JuryPanelMember {
                        case_id: case.case_id.clone(),
                        juror_id: candidate.agent_id.clone(),
                        score_hash: candidate.score_hash.clone(),
                        member_status: MemberStatus::PendingReady,
                        ready_deadline_at: Some(now + self.config.rules.juror_readiness_seconds),
                        voting_deadline_at: None,
                        replacement_of_juror_id: Some(member.juror_id.clone()),
                        replaced_by_juror_id: None,
                        selection_run_id: new_selection_run_id(SelectionRunKind::Replacement),
                    };
                    member.replaced_by_juror_id = Some(replacement.juror_id.clone());
                    new_members.push(replacement);
                    case.replacement_count_ready += 1;
                }
                None => exhausted = true,
            }
        }

        for member in &members {
            self.store.put_panel_member(member)?;
        }
        for member in &new_members {
            self.store.put_panel_member(member)?;
        }

        if exhausted {
            return self.void_case(case, runtime, VoidReason::new(VoidReason::VOTING_TIMEOUT), now);
        }

        let refreshed = self.store.iter_panel_for_case(&case.case_id)?;
        let ready_count = refreshed
            .iter()
            .filter(|m| m.member_status == MemberStatus::Ready)
            .count();
        if ready_count < self.config.rules.juror_panel_size {
            if !new_members.is_empty() {
                self.store.put_case(&case)?;
            }
            return Ok(());
        }

        case.session_stage = SessionStage::OpeningAddresses;
        case.updated_at = now;
        runtime.current_stage = SessionStage::OpeningAddresses;
        runtime.stage_started_at = now;
        runtime.stage_deadline_at = Some(now + self.config.rules.stage_submission_seconds);

        let event = self.build_event(
            &mut case,
            ActorRole::System,
            EventType::STAGE_ADVANCED,
            SessionStage::OpeningAddresses,
            "jury ready, opening addresses begin",
            None,
            now,
        );
        self.store.transition_case(&case, &runtime, &event)
    }

    // ── opening / evidence / closing (generic stage advance) ────────────────

    /// A stage completes when both sides have an accepted submission for it,
    /// or voids at the deadline if one side never submitted (spec §4.6
    /// "Stage advance").
    fn advance_stage(
        &self,
        mut case: Case,
        mut runtime: CaseRuntime,
        now: Timestamp,
        phase: Phase,
        next_stage: SessionStage,
        void_reason: &'static str,
    ) -> Result<(), OpenCawtError> {
        let prosecution = self.store.get_submission(&case.case_id, Side::Prosecution, phase)?;
        let defence = self.store.get_submission(&case.case_id, Side::Defence, phase)?;
        let both_present = prosecution.is_some() && defence.is_some();
        let deadline_passed = runtime.stage_deadline_at.is_some_and(|d| now >= d);

        if !both_present && !deadline_passed {
            return Ok(());
        }
        if !both_present {
            return self.void_case(case, runtime, VoidReason::new(void_reason), now);
        }

        case.session_stage = next_stage;
        case.updated_at = now;
        runtime.current_stage = next_stage;
        runtime.stage_started_at = now;
        runtime.stage_deadline_at = Some(now + self.config.rules.stage_submission_seconds);

        let event = self.build_event(
            &mut case,
            ActorRole::System,
            EventType::STAGE_ADVANCED,
            next_stage,
            format!("advanced to {next_stage:?}"),
            None,
            now,
        );
        self.store.transition_case(&case, &runtime, &event)
    }

    // ── summing_up → voting ──────────────────────────────────────────────────

    fn advance_summing_up(
        &self,
        mut case: Case,
        mut runtime: CaseRuntime,
        now: Timestamp,
    ) -> Result<(), OpenCawtError> {
        let prosecution = self.store.get_submission(&case.case_id, Side::Prosecution, Phase::SummingUp)?;
        let defence = self.store.get_submission(&case.case_id, Side::Defence, Phase::SummingUp)?;
        let both_present = prosecution.is_some() && defence.is_some();
        let deadline_passed = runtime.stage_deadline_at.is_some_and(|d| now >= d);

        if !both_present && !deadline_passed {
            return Ok(());
        }
        if !both_present {
            return self.void_case(
                case,
                runtime,
                VoidReason::new(VoidReason::MISSING_SUMMING_SUBMISSION),
                now,
            );
        }

        let voting_deadline = now + self.config.rules.juror_vote_seconds;
        let hard_deadline = now + self.config.rules.voting_hard_timeout_seconds;

        for mut member in self.store.iter_panel_for_case(&case.case_id)? {
            if member.member_status == MemberStatus::Ready {
                member.member_status = MemberStatus::ActiveVoting;
                member.voting_deadline_at = Some(voting_deadline);
                self.store.put_panel_member(&member)?;
            }
        }

        case.status = CaseStatus::Voting;
        case.session_stage = SessionStage::Voting;
        case.updated_at = now;
        runtime.current_stage = SessionStage::Voting;
        runtime.stage_started_at = now;
        runtime.stage_deadline_at = Some(voting_deadline);
        runtime.voting_hard_deadline_at = Some(hard_deadline);

        let event = self.build_event(
            &mut case,
            ActorRole::System,
            EventType::STAGE_ADVANCED,
            SessionStage::Voting,
            "summing up complete, voting begins",
            None,
            now,
        );
        self.store.transition_case(&case, &runtime, &event)
    }

    // ── voting ───────────────────────────────────────────────────────────────

    fn advance_voting(
        &self,
        mut case: Case,
        runtime: CaseRuntime,
        now: Timestamp,
    ) -> Result<(), OpenCawtError> {
        let selection = self.load_selection(&case.case_id)?;
        let hard_timed_out = runtime.voting_hard_deadline_at.is_some_and(|d| now >= d);
        let mut members = self.store.iter_panel_for_case(&case.case_id)?;
        let mut used: BTreeSet<String> = members.iter().map(|m| m.juror_id.clone()).collect();
        let mut new_members = Vec::new();

        for member in members.iter_mut() {
            if member.member_status != MemberStatus::ActiveVoting {
                continue;
            }
            if self.store.get_ballot(&case.case_id, &member.juror_id)?.is_some() {
                member.member_status = MemberStatus::Voted;
                continue;
            }
            let past_own_deadline = member.voting_deadline_at.is_some_and(|d| now >= d);
            if !past_own_deadline && !hard_timed_out {
                continue;
            }
            member.member_status = MemberStatus::TimedOut;
            if hard_timed_out {
                // Hard cap reached: unvoted jurors are non-responsive, no
                // further replacement (spec §4.6 voting hard timeout).
                continue;
            }
            if let Some(selection) = &selection {
                if let Some(candidate) = replacement_at(selection, &used) {
                    used.insert(candidate.agent_id.clone());
                    let replacement = JuryPanelMember {
                        case_id: case.case_id.clone(),
                        juror_id: candidate.agent_id.clone(),
                        score_hash: candidate.score_hash.clone(),
                        member_status: MemberStatus::ActiveVoting,
                        ready_deadline_at: None,
                        voting_deadline_at: Some(now + self.config.rules.juror_vote_seconds),
                        replacement_of_juror_id: Some(member.juror_id.clone()),
                        replaced_by_juror_id: None,
                        selection_run_id: new_selection_run_id(SelectionRunKind::Replacement),
                    };
                    member.replaced_by_juror_id = Some(replacement.juror_id.clone());
                    new_members.push(replacement);
                    case.replacement_count_vote += 1;
                }
            }
        }

        for member in &members {
            self.store.put_panel_member(member)?;
        }
        for member in &new_members {
            self.store.put_panel_member(member)?;
        }
        if !new_members.is_empty() {
            self.store.put_case(&case)?;
        }

        let refreshed = self.store.iter_panel_for_case(&case.case_id)?;
        let all_settled = refreshed
            .iter()
            .all(|m| m.member_status != MemberStatus::ActiveVoting);
        if !all_settled {
            return Ok(());
        }

        self.close_case(case, runtime, now)
    }

    // ── voting → closed ──────────────────────────────────────────────────────

    /// `voting → closed`: run the verdict engine and enqueue the seal job in
    /// the same transaction scope boundary (spec §4.6 "atomic close → seal
    /// enqueue"). Guarded by `closing` so two overlapping calls for the same
    /// case never both run; the guard is idempotent — a duplicate call
    /// observes the already-closed/voided case and returns (spec §4.6
    /// "Concurrency and closure").
    fn close_case(&self, mut case: Case, mut runtime: CaseRuntime, now: Timestamp) -> Result<(), OpenCawtError> {
        {
            let mut closing = self.closing.lock().expect("lock not poisoned");
            if !closing.insert(case.case_id.clone()) {
                return Ok(());
            }
        }
        let _guard = ClosingGuard {
            closing: &self.closing,
            case_id: case.case_id.clone(),
        };

        if let Some(current) = self.store.get_case(&case.case_id)? {
            if current.is_terminal() {
                return Ok(());
            }
            case = current;
        }

        let claims = self.store.iter_claims_for_case(&case.case_id)?;
        let ballots = self.store.iter_ballots_for_case(&case.case_id)?;
        let submissions = self.store.iter_submissions_for_case(&case.case_id)?;
        let evidence = self.store.iter_evidence_for_case(&case.case_id)?;

        let artefacts = VerdictArtefacts {
            drand_round: case.drand_round.unwrap_or(0),
            drand_randomness: case.drand_randomness.clone().unwrap_or_default(),
            pool_snapshot_hash: case.pool_snapshot_hash.clone().unwrap_or_default(),
            jury_selection_proof_hash: case.selection_proof_hash.clone().unwrap_or_default(),
            submission_hashes: submissions.iter().map(|s| s.content_hash.clone()).collect(),
            evidence_hashes: evidence.iter().map(|e| e.body_hash.clone()).collect(),
            ballot_hashes: ballots.iter().map(|b| b.ballot_hash.clone()).collect(),
            closed_at: now,
        };
        let outcome = compute_verdict(&case.case_id, &claims, &ballots, artefacts);

        if outcome.bundle.overall_outcome == OverallOutcome::Inconclusive {
            return self.void_case(case, runtime, VoidReason::new(VoidReason::INCONCLUSIVE_VERDICT), now);
        }

        for (claim_id, claim_outcome) in &outcome.claim_outcomes {
            if let Some(mut claim) = self.store.get_claim(&case.case_id, claim_id)? {
                claim.claim_outcome = *claim_outcome;
                self.store.put_claim(&claim)?;
            }
        }

        case.verdict_hash = Some(outcome.verdict_hash.clone());
        case.outcome = Some(match outcome.bundle.overall_outcome {
            OverallOutcome::ForProsecution => Outcome::ForProsecution,
            OverallOutcome::ForDefence => Outcome::ForDefence,
            OverallOutcome::Inconclusive => unreachable!("inconclusive handled above"),
        });
        case.status = CaseStatus::Closed;
        case.session_stage = SessionStage::Closed;
        case.seal_status = CaseSealStatus::Pending;
        case.updated_at = now;

        runtime.current_stage = SessionStage::Closed;
        runtime.stage_started_at = now;
        runtime.stage_deadline_at = None;

        let event = self.build_event(
            &mut case,
            ActorRole::System,
            EventType::CASE_CLOSED,
            SessionStage::Closed,
            "case closed, verdict computed",
            Some(serde_json::json!({"verdictHash": outcome.verdict_hash})),
            now,
        );
        self.store.transition_case(&case, &runtime, &event)?;

        let job_id = new_id("sealjob");
        let request = opencawt_mint::SealRequest {
            job_id: job_id.clone(),
            subject_kind: "case".to_string(),
            subject_id: case.case_id.clone(),
            payload_hash: outcome.verdict_hash.clone(),
            external_url: format!("{}/cases/{}", self.config.public_base_url, case.public_slug),
            metadata: serde_json::to_value(&outcome.bundle).unwrap_or(serde_json::Value::Null),
        };
        let request_json =
            serde_json::to_string(&request).map_err(|e| OpenCawtError::Serialization(e.to_string()))?;

        self.record_case_activity(&case, now)?;

        enqueue_seal_job(
            &self.store,
            job_id,
            SealSubject::Case { case_id: case.case_id.clone() },
            outcome.verdict_hash,
            request_json,
            now,
            Some(case),
        )?;
        Ok(())
    }

    // ── void ─────────────────────────────────────────────────────────────────

    fn void_case(
        &self,
        mut case: Case,
        mut runtime: CaseRuntime,
        reason: VoidReason,
        now: Timestamp,
    ) -> Result<(), OpenCawtError> {
        case.status = CaseStatus::Void;
        case.session_stage = SessionStage::Void;
        case.void_reason = Some(reason.clone());
        case.voided_at = Some(now);
        case.seal_status = CaseSealStatus::Failed;
        case.updated_at = now;

        runtime.current_stage = SessionStage::Void;
        runtime.stage_started_at = now;
        runtime.stage_deadline_at = None;
        runtime.void_reason = Some(reason.clone());
        runtime.voided_at = Some(now);

        let event = self.build_event(
            &mut case,
            ActorRole::System,
            EventType::CASE_VOIDED,
            SessionStage::Void,
            format!("case voided: {}", reason.0),
            Some(serde_json::json!({"reason": reason.0, "class": reason.class()})),
            now,
        );
        self.store.transition_case(&case, &runtime, &event)?;
        self.record_case_activity(&case, now)
    }

    // ── helpers ──────────────────────────────────────────────────────────────

    fn build_event(
        &self,
        case: &mut Case,
        actor_role: ActorRole,
        event_type: &str,
        stage: SessionStage,
        message: impl Into<String>,
        payload: Option<serde_json::Value>,
        now: Timestamp,
    ) -> TranscriptEvent {
        case.last_event_seq_no += 1;
        TranscriptEvent {
            case_id: case.case_id.clone(),
            seq_no: case.last_event_seq_no,
            actor_role,
            actor_agent_id: None,
            event_type: EventType::new(event_type),
            stage,
            message: message.into(),
            artefact_ref: None,
            payload,
            created_at: now,
        }
    }

    /// Rebuilds `AgentCaseActivity`/`AgentStatsCache` for every participant
    /// once a case reaches a terminal status (spec §3: "derived from
    /// closed/sealed/void cases; rebuilt on case resolution and used for the
    /// leaderboard"). Called from both `close_case` and `void_case` — the
    /// two paths that can make a case terminal.
    fn record_case_activity(&self, case: &Case, now: Timestamp) -> Result<(), OpenCawtError> {
        use opencawt_core::agent::{AgentCaseActivity, AgentStatsCache};

        let outcome_label = match (case.status, case.outcome) {
            (CaseStatus::Void, _) => "void",
            (_, Some(Outcome::ForProsecution)) => "for_prosecution",
            (_, Some(Outcome::ForDefence)) => "for_defence",
            _ => "void",
        };

        let mut participants: Vec<(String, &'static str)> = vec![(case.prosecution_agent_id.clone(), "prosecution")];
        if let Some(defence) = &case.defence_agent_id {
            participants.push((defence.clone(), "defence"));
        }
        for member in self.store.iter_panel_for_case(&case.case_id)? {
            if matches!(
                member.member_status,
                MemberStatus::Ready | MemberStatus::ActiveVoting | MemberStatus::Voted
            ) {
                participants.push((member.juror_id.clone(), "juror"));
            }
        }

        for (agent_id, role) in participants {
            self.store.put_case_activity(&AgentCaseActivity {
                agent_id: agent_id.clone(),
                case_id: case.case_id.clone(),
                role: role.to_string(),
                outcome: outcome_label.to_string(),
                recorded_at: now,
            })?;

            let mut stats = self
                .store
                .get_stats_cache(&agent_id)?
                .unwrap_or_else(|| AgentStatsCache {
                    agent_id: agent_id.clone(),
                    ..Default::default()
                });
            match role {
                "prosecution" => {
                    stats.cases_as_prosecution += 1;
                    if outcome_label == "for_prosecution" {
                        stats.wins_as_prosecution += 1;
                    }
                }
                "defence" => {
                    stats.cases_as_defence += 1;
                    if outcome_label == "for_defence" {
                        stats.wins_as_defence += 1;
                    }
                }
                _ => stats.cases_as_juror += 1,
            }
            if outcome_label == "void" {
                stats.voids_involved += 1;
            }
            stats.updated_at = now;
            self.store.put_stats_cache(&stats)?;
        }
        Ok(())
    }

    /// Replacement lookups must walk the exact `scoredCandidates` ordering
    /// produced at selection time (spec §4.5), not a recomputed one — the
    /// eligible pool can change under the case's feet as agents register or
    /// get banned. Persisted via the store's generic `meta` tree keyed per
    /// case, alongside the hash-bearing fields already on `Case` itself.
    fn store_selection(&self, case_id: &str, selection: &JurySelection) -> Result<(), OpenCawtError> {
        let bytes = serde_json::to_vec(selection).map_err(|e| OpenCawtError::Serialization(e.to_string()))?;
        self.store.put_meta(&format!("jury_selection:{case_id}"), &bytes)
    }

    fn load_selection(&self, case_id: &str) -> Result<Option<JurySelection>, OpenCawtError> {
        match self.store.get_meta(&format!("jury_selection:{case_id}"))? {
            Some(bytes) => Ok(Some(
                serde_json::from_slice(&bytes).map_err(|e| OpenCawtError::Serialization(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencawt_core::agent::{Agent, JurorAvailability, JurorAvailabilityState};
    use opencawt_core::case::{CaseSealStatus, DefenceState};
    use opencawt_core::config::DrandMode;
    use opencawt_core::ident::new_public_code;
    use opencawt_core::submission::Submission;
    use tempfile::TempDir;

    use crate::clock::FakeClock;

    fn harness() -> (TempDir, Arc<StoreDb>, Arc<Config>, FakeClock, Arc<BeaconClient>) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StoreDb::open(dir.path()).unwrap());
        let mut config = Config::default();
        config.rules.session_starts_after_seconds = 0;
        config.rules.defence_assignment_cutoff_seconds = 100;
        config.rules.juror_readiness_seconds = 50;
        config.rules.stage_submission_seconds = 50;
        config.rules.juror_vote_seconds = 50;
        config.rules.voting_hard_timeout_seconds = 200;
        config.rules.juror_panel_size = 3;
        let clock = FakeClock::new(1_000);
        let beacon = Arc::new(BeaconClient::new(DrandMode::Stub, "http://unused"));
        (dir, store, Arc::new(config), clock, beacon)
    }

    fn seed_jurors(store: &StoreDb, n: usize) {
        for i in 0..n {
            let agent_id = format!("juror_{i:03}");
            let mut agent = Agent::new(agent_id.clone(), 0);
            agent.juror_eligible = true;
            store.put_agent(&agent).unwrap();
            store
                .put_juror_availability(&JurorAvailability {
                    agent_id,
                    availability: JurorAvailabilityState::Available,
                    profile: None,
                })
                .unwrap();
        }
    }

    fn filed_case(store: &StoreDb, now: Timestamp) -> Case {
        let mut case = Case::new(
            "case_1".to_string(),
            new_public_code(),
            "agent_pros".to_string(),
            None,
            now,
            1,
        );
        case.status = CaseStatus::Filed;
        case.defence_state = DefenceState::Assigned;
        case.defence_agent_id = Some("agent_def".to_string());
        case.filed_at = Some(now);
        store.put_case(&case).unwrap();

        let mut runtime = CaseRuntime::new(case.case_id.clone(), now);
        runtime.scheduled_session_start_at = Some(now);
        store.put_case_runtime(&runtime).unwrap();
        case
    }

    #[tokio::test]
    async fn pre_session_without_defence_assignment_voids() {
        let (_dir, store, config, clock, beacon) = harness();
        let mut case = Case::new("case_1".to_string(), new_public_code(), "agent_pros".to_string(), None, 1_000, 1);
        case.status = CaseStatus::Filed;
        case.filed_at = Some(1_000);
        store.put_case(&case).unwrap();
        store
            .put_case_runtime(&CaseRuntime::new(case.case_id.clone(), 1_000))
            .unwrap();

        let engine = SessionEngine::new(store.clone(), config.clone(), Arc::new(clock.clone()), beacon);
        clock.advance(1_000); // past the 100s open-defence cutoff
        engine.advance_case(&case.case_id).await.unwrap();

        let after = store.get_case(&case.case_id).unwrap().unwrap();
        assert_eq!(after.status, CaseStatus::Void);
        assert_eq!(
            after.void_reason.unwrap().0,
            VoidReason::MISSING_DEFENCE_ASSIGNMENT
        );
    }

    #[tokio::test]
    async fn jury_selection_starts_once_session_start_is_reached() {
        let (_dir, store, config, clock, beacon) = harness();
        seed_jurors(&store, 10);
        let case = filed_case(&store, 1_000);

        let engine = SessionEngine::new(store.clone(), config.clone(), Arc::new(clock.clone()), beacon);
        engine.advance_case(&case.case_id).await.unwrap();

        let after = store.get_case(&case.case_id).unwrap().unwrap();
        assert_eq!(after.session_stage, SessionStage::JuryReadiness);
        assert_eq!(after.status, CaseStatus::JurySelected);
        let panel = store.iter_panel_for_case(&case.case_id).unwrap();
        assert_eq!(panel.len(), 3);
    }

    #[tokio::test]
    async fn readiness_timeout_replaces_jurors_and_then_proceeds() {
        let (_dir, store, config, clock, beacon) = harness();
        seed_jurors(&store, 10);
        let case = filed_case(&store, 1_000);
        let engine = SessionEngine::new(store.clone(), config.clone(), Arc::new(clock.clone()), beacon);
        engine.advance_case(&case.case_id).await.unwrap();

        // Nobody confirms readiness; advance past the readiness deadline.
        clock.advance(51);
        engine.advance_case(&case.case_id).await.unwrap();

        let panel = store.iter_panel_for_case(&case.case_id).unwrap();
        let timed_out = panel.iter().filter(|m| m.member_status == MemberStatus::TimedOut).count();
        let pending = panel.iter().filter(|m| m.member_status == MemberStatus::PendingReady).count();
        assert_eq!(timed_out, 3);
        assert_eq!(pending, 3);
        let after = store.get_case(&case.case_id).unwrap().unwrap();
        assert_eq!(after.replacement_count_ready, 3);
        assert_eq!(after.session_stage, SessionStage::JuryReadiness);
    }

    #[tokio::test]
    async fn readiness_exhaustion_voids_with_voting_timeout() {
        let (_dir, store, config, clock, beacon) = harness();
        // Exactly panel_size jurors: no alternates exist for replacement.
        seed_jurors(&store, 3);
        let case = filed_case(&store, 1_000);
        let engine = SessionEngine::new(store.clone(), config.clone(), Arc::new(clock.clone()), beacon);
        engine.advance_case(&case.case_id).await.unwrap();

        clock.advance(51);
        engine.advance_case(&case.case_id).await.unwrap();

        let after = store.get_case(&case.case_id).unwrap().unwrap();
        assert_eq!(after.status, CaseStatus::Void);
        assert_eq!(after.void_reason.unwrap().0, VoidReason::VOTING_TIMEOUT);
    }

    #[tokio::test]
    async fn missing_opening_submission_voids_at_deadline() {
        let (_dir, store, config, clock, beacon) = harness();
        seed_jurors(&store, 3);
        let case = filed_case(&store, 1_000);
        let engine = SessionEngine::new(store.clone(), config.clone(), Arc::new(clock.clone()), beacon);
        engine.advance_case(&case.case_id).await.unwrap();

        // Bring all three jurors to `ready` to cross into opening_addresses.
        for member in store.iter_panel_for_case(&case.case_id).unwrap() {
            let mut m = member;
            m.member_status = MemberStatus::Ready;
            store.put_panel_member(&m).unwrap();
        }
        engine.advance_case(&case.case_id).await.unwrap();
        let after = store.get_case(&case.case_id).unwrap().unwrap();
        assert_eq!(after.session_stage, SessionStage::OpeningAddresses);

        // Neither side submits; cross the stage deadline.
        clock.advance(51);
        engine.advance_case(&case.case_id).await.unwrap();
        let after = store.get_case(&case.case_id).unwrap().unwrap();
        assert_eq!(after.status, CaseStatus::Void);
        assert_eq!(after.void_reason.unwrap().0, VoidReason::MISSING_OPENING_SUBMISSION);

        // Voiding rebuilds the leaderboard cache for both named parties.
        let pros_stats = store.get_stats_cache("agent_pros").unwrap().unwrap();
        assert_eq!(pros_stats.voids_involved, 1);
        let def_stats = store.get_stats_cache("agent_def").unwrap().unwrap();
        assert_eq!(def_stats.voids_involved, 1);
        let activity = store.iter_case_activity_for_agent("agent_pros").unwrap();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].outcome, "void");
    }

    #[tokio::test]
    async fn both_sides_submitting_advances_before_the_deadline() {
        let (_dir, store, config, clock, beacon) = harness();
        seed_jurors(&store, 3);
        let case = filed_case(&store, 1_000);
        let engine = SessionEngine::new(store.clone(), config.clone(), Arc::new(clock.clone()), beacon);
        engine.advance_case(&case.case_id).await.unwrap();
        for member in store.iter_panel_for_case(&case.case_id).unwrap() {
            let mut m = member;
            m.member_status = MemberStatus::Ready;
            store.put_panel_member(&m).unwrap();
        }
        engine.advance_case(&case.case_id).await.unwrap();

        for side in [Side::Prosecution, Side::Defence] {
            store
                .put_submission(&Submission {
                    submission_id: new_id("submission"),
                    case_id: case.case_id.clone(),
                    side,
                    phase: Phase::Opening,
                    text: "opening statement".to_string(),
                    principle_citations: vec![],
                    claim_principle_citations: Default::default(),
                    evidence_citations: vec![],
                    content_hash: "hash".to_string(),
                    created_at: 1_000,
                })
                .unwrap();
        }

        engine.advance_case(&case.case_id).await.unwrap();
        let after = store.get_case(&case.case_id).unwrap().unwrap();
        assert_eq!(after.session_stage, SessionStage::Evidence);
    }

    #[tokio::test]
    async fn case_wide_close_lock_makes_a_second_call_a_no_op() {
        let (_dir, store, config, clock, beacon) = harness();
        let case = Case::new("case_1".to_string(), new_public_code(), "agent_pros".to_string(), None, 1_000, 1);
        store.put_case(&case).unwrap();
        let runtime = CaseRuntime::new(case.case_id.clone(), 1_000);
        let engine = SessionEngine::new(store.clone(), config.clone(), Arc::new(clock.clone()), beacon);

        {
            let mut closing = engine.closing.lock().unwrap();
            closing.insert(case.case_id.clone());
        }
        // A case already marked closing is left untouched by a second call.
        engine.close_case(case.clone(), runtime, 1_000).unwrap();
        let after = store.get_case(&case.case_id).unwrap().unwrap();
        assert_eq!(after.status, CaseStatus::Draft);
        assert_eq!(after.seal_status, CaseSealStatus::Pending);
    }
}
