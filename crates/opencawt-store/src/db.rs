use std::path::Path;

use opencawt_core::agent::{Agent, AgentActionLog, AgentCapability, AgentCaseActivity, AgentStatsCache, JurorAvailability};
use opencawt_core::agreement::Agreement;
use opencawt_core::case::{Case, CaseRuntime};
use opencawt_core::claim::Claim;
use opencawt_core::error::OpenCawtError;
use opencawt_core::jury::{Ballot, JuryPanelMember};
use opencawt_core::seal::{SealJob, UsedTreasuryTx};
use opencawt_core::submission::{EvidenceItem, Phase, Side, Submission};
use opencawt_core::transcript::TranscriptEvent;

fn storage_err(e: impl std::fmt::Display) -> OpenCawtError {
    OpenCawtError::Storage(e.to_string())
}

fn ser_err(e: impl std::fmt::Display) -> OpenCawtError {
    OpenCawtError::Serialization(e.to_string())
}

/// Join key segments with a NUL separator. Every segment here is an
/// application-minted id (uuid/nanoid/hex) that never contains a NUL byte,
/// so the join is unambiguous and prefix-scannable per segment boundary.
fn join_key(parts: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, p) in parts.iter().enumerate() {
        if i > 0 {
            out.push(0u8);
        }
        out.extend_from_slice(p);
    }
    out
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, OpenCawtError> {
    bincode::serialize(value).map_err(ser_err)
}

fn decode<T: for<'de> serde::Deserialize<'de>>(bytes: &[u8]) -> Result<T, OpenCawtError> {
    bincode::deserialize(bytes).map_err(ser_err)
}

/// Persistent state database backed by sled (pure-Rust, no C dependencies).
///
/// Named trees, one per entity (spec §3):
///   agents, agent_capabilities, juror_availability,
///   cases, case_slugs (public_slug → case_id),
///   claims (case_id|claim_id), submissions (case_id|side|phase),
///   evidence (case_id|evidence_id),
///   jury_panel_members (case_id|juror_id), ballots (case_id|juror_id),
///   case_runtime, transcript_events (case_id|seq_no be),
///   seal_jobs, seal_jobs_by_subject (subject_id → job_id),
///   used_treasury_tx, idempotency_records (agent_id|method|path|key),
///   agent_action_log (agent_id|signature|timestamp_sec),
///   agent_case_activity (agent_id|case_id), agent_stats_cache,
///   agreements, agreement_codes (agreement_code → proposal_id),
///   rate_limit_events (action|agent_id|timestamp be), meta.
pub struct StoreDb {
    db: sled::Db,
    agents: sled::Tree,
    agent_capabilities: sled::Tree,
    juror_availability: sled::Tree,
    cases: sled::Tree,
    case_slugs: sled::Tree,
    claims: sled::Tree,
    submissions: sled::Tree,
    evidence: sled::Tree,
    jury_panel_members: sled::Tree,
    ballots: sled::Tree,
    case_runtime: sled::Tree,
    transcript_events: sled::Tree,
    seal_jobs: sled::Tree,
    seal_jobs_by_subject: sled::Tree,
    used_treasury_tx: sled::Tree,
    idempotency_records: sled::Tree,
    agent_action_log: sled::Tree,
    agent_case_activity: sled::Tree,
    agent_stats_cache: sled::Tree,
    agreements: sled::Tree,
    agreement_codes: sled::Tree,
    rate_limit_events: sled::Tree,
    meta: sled::Tree,
}

impl StoreDb {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, OpenCawtError> {
        let db = sled::open(path).map_err(storage_err)?;
        macro_rules! tree {
            ($name:literal) => {
                db.open_tree($name).map_err(storage_err)?
            };
        }
        Ok(Self {
            agents: tree!("agents"),
            agent_capabilities: tree!("agent_capabilities"),
            juror_availability: tree!("juror_availability"),
            cases: tree!("cases"),
            case_slugs: tree!("case_slugs"),
            claims: tree!("claims"),
            submissions: tree!("submissions"),
            evidence: tree!("evidence"),
            jury_panel_members: tree!("jury_panel_members"),
            ballots: tree!("ballots"),
            case_runtime: tree!("case_runtime"),
            transcript_events: tree!("transcript_events"),
            seal_jobs: tree!("seal_jobs"),
            seal_jobs_by_subject: tree!("seal_jobs_by_subject"),
            used_treasury_tx: tree!("used_treasury_tx"),
            idempotency_records: tree!("idempotency_records"),
            agent_action_log: tree!("agent_action_log"),
            agent_case_activity: tree!("agent_case_activity"),
            agent_stats_cache: tree!("agent_stats_cache"),
            agreements: tree!("agreements"),
            agreement_codes: tree!("agreement_codes"),
            rate_limit_events: tree!("rate_limit_events"),
            meta: tree!("meta"),
            db,
        })
    }

    pub fn flush(&self) -> Result<(), OpenCawtError> {
        self.db.flush().map_err(storage_err)?;
        Ok(())
    }

    // ── Agents ───────────────────────────────────────────────────────────────

    pub fn get_agent(&self, agent_id: &str) -> Result<Option<Agent>, OpenCawtError> {
        match self.agents.get(agent_id.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(decode(&b)?)),
            None => Ok(None),
        }
    }

    pub fn put_agent(&self, agent: &Agent) -> Result<(), OpenCawtError> {
        self.agents
            .insert(agent.agent_id.as_bytes(), encode(agent)?)
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn agent_exists(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id.as_bytes()).unwrap_or(false)
    }

    // ── Agent capabilities ──────────────────────────────────────────────────

    pub fn get_capability(&self, token_hash: &str) -> Result<Option<AgentCapability>, OpenCawtError> {
        match self.agent_capabilities.get(token_hash.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(decode(&b)?)),
            None => Ok(None),
        }
    }

    pub fn put_capability(&self, cap: &AgentCapability) -> Result<(), OpenCawtError> {
        self.agent_capabilities
            .insert(cap.token_hash.as_bytes(), encode(cap)?)
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Juror availability ──────────────────────────────────────────────────

    pub fn get_juror_availability(&self, agent_id: &str) -> Result<Option<JurorAvailability>, OpenCawtError> {
        match self.juror_availability.get(agent_id.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(decode(&b)?)),
            None => Ok(None),
        }
    }

    pub fn put_juror_availability(&self, row: &JurorAvailability) -> Result<(), OpenCawtError> {
        self.juror_availability
            .insert(row.agent_id.as_bytes(), encode(row)?)
            .map_err(storage_err)?;
        Ok(())
    }

    /// All agents currently registered as eligible jurors (spec §4.5 pool
    /// snapshot input): eligible agent with a non-limited availability row.
    pub fn iter_eligible_jurors(&self) -> Result<Vec<(Agent, JurorAvailability)>, OpenCawtError> {
        let mut out = Vec::new();
        for item in self.juror_availability.iter() {
            let (key, bytes) = item.map_err(storage_err)?;
            let avail: JurorAvailability = decode(&bytes)?;
            let agent_id = String::from_utf8_lossy(&key).to_string();
            if let Some(agent) = self.get_agent(&agent_id)? {
                if agent.juror_eligible && !agent.banned {
                    out.push((agent, avail));
                }
            }
        }
        Ok(out)
    }

    // ── Cases ────────────────────────────────────────────────────────────────

    pub fn get_case(&self, case_id: &str) -> Result<Option<Case>, OpenCawtError> {
        match self.cases.get(case_id.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(decode(&b)?)),
            None => Ok(None),
        }
    }

    pub fn get_case_by_slug(&self, public_slug: &str) -> Result<Option<Case>, OpenCawtError> {
        match self.case_slugs.get(public_slug.as_bytes()).map_err(storage_err)? {
            Some(id_bytes) => {
                let case_id = String::from_utf8_lossy(&id_bytes).to_string();
                self.get_case(&case_id)
            }
            None => Ok(None),
        }
    }

    pub fn put_case(&self, case: &Case) -> Result<(), OpenCawtError> {
        self.cases
            .insert(case.case_id.as_bytes(), encode(case)?)
            .map_err(storage_err)?;
        self.case_slugs
            .insert(case.public_slug.as_bytes(), case.case_id.as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    /// Cases filed by `agent_id` within the trailing 24h window, for the
    /// soft-cap check (spec §4.3).
    pub fn count_cases_filed_since(&self, agent_id: &str, since: i64) -> Result<u32, OpenCawtError> {
        let mut n = 0u32;
        for item in self.cases.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let case: Case = decode(&bytes)?;
            if case.prosecution_agent_id == agent_id {
                if let Some(filed_at) = case.filed_at {
                    if filed_at >= since {
                        n += 1;
                    }
                }
            }
        }
        Ok(n)
    }

    /// Cases filed by any agent within the trailing 24h window, for the
    /// service-wide soft cap (spec §4.3: "a day-granularity soft cap across
    /// the whole service"), distinct from the per-agent quota above.
    pub fn count_cases_filed_globally_since(&self, since: i64) -> Result<u32, OpenCawtError> {
        let mut n = 0u32;
        for item in self.cases.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let case: Case = decode(&bytes)?;
            if let Some(filed_at) = case.filed_at {
                if filed_at >= since {
                    n += 1;
                }
            }
        }
        Ok(n)
    }

    /// All non-terminal cases, for the scheduler sweep (spec §9).
    pub fn iter_active_cases(&self) -> Result<Vec<Case>, OpenCawtError> {
        let mut out = Vec::new();
        for item in self.cases.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let case: Case = decode(&bytes)?;
            if !case.is_terminal() {
                out.push(case);
            }
        }
        Ok(out)
    }

    // ── Case runtime ─────────────────────────────────────────────────────────

    pub fn get_case_runtime(&self, case_id: &str) -> Result<Option<CaseRuntime>, OpenCawtError> {
        match self.case_runtime.get(case_id.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(decode(&b)?)),
            None => Ok(None),
        }
    }

    pub fn put_case_runtime(&self, runtime: &CaseRuntime) -> Result<(), OpenCawtError> {
        self.case_runtime
            .insert(runtime.case_id.as_bytes(), encode(runtime)?)
            .map_err(storage_err)?;
        Ok(())
    }

    /// Commit a case and its runtime row atomically (spec §3: "CaseRuntime
    /// is always updated in the same transaction as the case row").
    pub fn put_case_and_runtime(&self, case: &Case, runtime: &CaseRuntime) -> Result<(), OpenCawtError> {
        use sled::Transactional;
        let case_bytes = encode(case)?;
        let runtime_bytes = encode(runtime)?;
        (&self.cases, &self.case_slugs, &self.case_runtime)
            .transaction(|(cases, slugs, runtimes)| {
                cases.insert(case.case_id.as_bytes(), case_bytes.clone())?;
                slugs.insert(case.public_slug.as_bytes(), case.case_id.as_bytes())?;
                runtimes.insert(runtime.case_id.as_bytes(), runtime_bytes.clone())?;
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError<sled::Error>| storage_err(e))
    }

    /// Commit a case transition alongside its runtime row and the single
    /// transcript event the transition produced, all in one transaction
    /// (spec §4.6: "a transcript event ... is appended in the same
    /// transaction so the audit trail cannot diverge from state").
    pub fn transition_case(
        &self,
        case: &Case,
        runtime: &CaseRuntime,
        event: &TranscriptEvent,
    ) -> Result<(), OpenCawtError> {
        use sled::Transactional;
        let case_bytes = encode(case)?;
        let runtime_bytes = encode(runtime)?;
        let event_bytes = encode(event)?;
        let event_key = join_key(&[event.case_id.as_bytes(), &event.seq_no.to_be_bytes()]);
        (
            &self.cases,
            &self.case_slugs,
            &self.case_runtime,
            &self.transcript_events,
        )
            .transaction(|(cases, slugs, runtimes, events)| {
                cases.insert(case.case_id.as_bytes(), case_bytes.clone())?;
                slugs.insert(case.public_slug.as_bytes(), case.case_id.as_bytes())?;
                runtimes.insert(runtime.case_id.as_bytes(), runtime_bytes.clone())?;
                events.insert(event_key.clone(), event_bytes.clone())?;
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError<sled::Error>| storage_err(e))
    }

    /// Enqueue exactly one seal job per subject and flip the case's
    /// `sealStatus` to `pending`, atomically (spec §4.8: "creates exactly
    /// one seal job per caseId ... on success, transitions the case
    /// sealStatus to pending").
    ///
    /// Returns `Ok(false)` without writing anything if a job already exists
    /// for this subject (the at-most-once guarantee is enforced by checking
    /// inside the same transaction that performs the insert).
    pub fn enqueue_seal_job_tx(
        &self,
        job: &SealJob,
        case: &Case,
    ) -> Result<bool, OpenCawtError> {
        use sled::Transactional;
        let job_bytes = encode(job)?;
        let case_bytes = encode(case)?;
        let subject_id = job.subject.subject_id().to_string();
        (
            &self.seal_jobs,
            &self.seal_jobs_by_subject,
            &self.cases,
            &self.case_slugs,
        )
            .transaction(move |(jobs, jobs_by_subject, cases, slugs)| {
                if jobs_by_subject.get(subject_id.as_bytes())?.is_some() {
                    return Ok(false);
                }
                jobs.insert(job.job_id.as_bytes(), job_bytes.clone())?;
                jobs_by_subject.insert(subject_id.as_bytes(), job.job_id.as_bytes())?;
                cases.insert(case.case_id.as_bytes(), case_bytes.clone())?;
                slugs.insert(case.public_slug.as_bytes(), case.case_id.as_bytes())?;
                Ok(true)
            })
            .map_err(|e: sled::transaction::TransactionError<sled::Error>| storage_err(e))
    }

    /// Conditionally claim a queued/failed job for minting: `status` must
    /// currently be `queued` or a retryable `failed`; bumps `attempts` and
    /// sets `status = minting`. The compare-and-swap on the job tree is
    /// sled's native conflict detection, so two concurrent pickers can
    /// never both win (spec §4.8: "the conditional ensures at-most-one
    /// claim across concurrent pickers").
    pub fn claim_seal_job(
        &self,
        job_id: &str,
        now: opencawt_core::types::Timestamp,
    ) -> Result<Option<SealJob>, OpenCawtError> {
        let existing_bytes = match self.seal_jobs.get(job_id.as_bytes()).map_err(storage_err)? {
            Some(b) => b,
            None => return Ok(None),
        };
        let mut job: SealJob = decode(&existing_bytes)?;
        use opencawt_core::seal::SealJobStatus;
        if !matches!(job.status, SealJobStatus::Queued | SealJobStatus::Failed) || job.is_non_retryable()
        {
            return Ok(None);
        }
        job.status = SealJobStatus::Minting;
        job.attempts += 1;
        job.claimed_at = Some(now);
        let new_bytes = encode(&job)?;
        let result = self
            .seal_jobs
            .compare_and_swap(job_id.as_bytes(), Some(existing_bytes), Some(new_bytes))
            .map_err(storage_err)?;
        match result {
            Ok(()) => Ok(Some(job)),
            Err(_) => Ok(None), // lost the race to another picker
        }
    }

    /// Apply a worker callback's terminal outcome to both the seal job and
    /// the case row in one transaction (spec §4.8 worker callback).
    pub fn apply_seal_callback_tx(&self, job: &SealJob, case: &Case) -> Result<(), OpenCawtError> {
        use sled::Transactional;
        let job_bytes = encode(job)?;
        let case_bytes = encode(case)?;
        (&self.seal_jobs, &self.cases, &self.case_slugs)
            .transaction(|(jobs, cases, slugs)| {
                jobs.insert(job.job_id.as_bytes(), job_bytes.clone())?;
                cases.insert(case.case_id.as_bytes(), case_bytes.clone())?;
                slugs.insert(case.public_slug.as_bytes(), case.case_id.as_bytes())?;
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError<sled::Error>| storage_err(e))
    }

    /// Insert a ballot and mark its panel member `voted`, enforcing
    /// `(case_id, juror_id)` ballot uniqueness inside the transaction
    /// itself (spec §8: "the first insert wins, subsequent inserts fail
    /// with BALLOT_ALREADY_SUBMITTED").
    pub fn insert_ballot_tx(
        &self,
        ballot: &Ballot,
        member: &JuryPanelMember,
    ) -> Result<bool, OpenCawtError> {
        use sled::Transactional;
        let ballot_key = join_key(&[ballot.case_id.as_bytes(), ballot.juror_id.as_bytes()]);
        let member_key = join_key(&[member.case_id.as_bytes(), member.juror_id.as_bytes()]);
        let ballot_bytes = encode(ballot)?;
        let member_bytes = encode(member)?;
        (&self.ballots, &self.jury_panel_members)
            .transaction(move |(ballots, members)| {
                if ballots.get(&ballot_key)?.is_some() {
                    return Ok(false);
                }
                ballots.insert(ballot_key.clone(), ballot_bytes.clone())?;
                members.insert(member_key.clone(), member_bytes.clone())?;
                Ok(true)
            })
            .map_err(|e: sled::transaction::TransactionError<sled::Error>| storage_err(e))
    }

    // ── Claims ───────────────────────────────────────────────────────────────

    pub fn put_claim(&self, claim: &Claim) -> Result<(), OpenCawtError> {
        let key = join_key(&[claim.case_id.as_bytes(), claim.claim_id.as_bytes()]);
        self.claims.insert(key, encode(claim)?).map_err(storage_err)?;
        Ok(())
    }

    pub fn get_claim(&self, case_id: &str, claim_id: &str) -> Result<Option<Claim>, OpenCawtError> {
        let key = join_key(&[case_id.as_bytes(), claim_id.as_bytes()]);
        match self.claims.get(key).map_err(storage_err)? {
            Some(b) => Ok(Some(decode(&b)?)),
            None => Ok(None),
        }
    }

    pub fn iter_claims_for_case(&self, case_id: &str) -> Result<Vec<Claim>, OpenCawtError> {
        let mut prefix = case_id.as_bytes().to_vec();
        prefix.push(0u8);
        let mut out = Vec::new();
        for item in self.claims.scan_prefix(prefix) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        out.sort_by_key(|c: &Claim| c.claim_index);
        Ok(out)
    }

    // ── Submissions ──────────────────────────────────────────────────────────

    fn submission_key(case_id: &str, side: Side, phase: Phase) -> Vec<u8> {
        join_key(&[case_id.as_bytes(), &[side as u8], &[phase as u8]])
    }

    pub fn put_submission(&self, submission: &Submission) -> Result<(), OpenCawtError> {
        let key = Self::submission_key(&submission.case_id, submission.side, submission.phase);
        self.submissions.insert(key, encode(submission)?).map_err(storage_err)?;
        Ok(())
    }

    pub fn get_submission(&self, case_id: &str, side: Side, phase: Phase) -> Result<Option<Submission>, OpenCawtError> {
        let key = Self::submission_key(case_id, side, phase);
        match self.submissions.get(key).map_err(storage_err)? {
            Some(b) => Ok(Some(decode(&b)?)),
            None => Ok(None),
        }
    }

    pub fn iter_submissions_for_case(&self, case_id: &str) -> Result<Vec<Submission>, OpenCawtError> {
        let mut prefix = case_id.as_bytes().to_vec();
        prefix.push(0u8);
        let mut out = Vec::new();
        for item in self.submissions.scan_prefix(prefix) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    // ── Evidence ─────────────────────────────────────────────────────────────

    pub fn put_evidence(&self, item: &EvidenceItem) -> Result<(), OpenCawtError> {
        let key = join_key(&[item.case_id.as_bytes(), item.evidence_id.as_bytes()]);
        self.evidence.insert(key, encode(item)?).map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_evidence_for_case(&self, case_id: &str) -> Result<Vec<EvidenceItem>, OpenCawtError> {
        let mut prefix = case_id.as_bytes().to_vec();
        prefix.push(0u8);
        let mut out = Vec::new();
        for item in self.evidence.scan_prefix(prefix) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    pub fn count_evidence_for_case(&self, case_id: &str) -> Result<u32, OpenCawtError> {
        Ok(self.iter_evidence_for_case(case_id)?.len() as u32)
    }

    // ── Jury panel members ───────────────────────────────────────────────────

    pub fn put_panel_member(&self, member: &JuryPanelMember) -> Result<(), OpenCawtError> {
        let key = join_key(&[member.case_id.as_bytes(), member.juror_id.as_bytes()]);
        self.jury_panel_members.insert(key, encode(member)?).map_err(storage_err)?;
        Ok(())
    }

    pub fn get_panel_member(&self, case_id: &str, juror_id: &str) -> Result<Option<JuryPanelMember>, OpenCawtError> {
        let key = join_key(&[case_id.as_bytes(), juror_id.as_bytes()]);
        match self.jury_panel_members.get(key).map_err(storage_err)? {
            Some(b) => Ok(Some(decode(&b)?)),
            None => Ok(None),
        }
    }

    pub fn iter_panel_for_case(&self, case_id: &str) -> Result<Vec<JuryPanelMember>, OpenCawtError> {
        let mut prefix = case_id.as_bytes().to_vec();
        prefix.push(0u8);
        let mut out = Vec::new();
        for item in self.jury_panel_members.scan_prefix(prefix) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    // ── Ballots ──────────────────────────────────────────────────────────────

    pub fn get_ballot(&self, case_id: &str, juror_id: &str) -> Result<Option<Ballot>, OpenCawtError> {
        let key = join_key(&[case_id.as_bytes(), juror_id.as_bytes()]);
        match self.ballots.get(key).map_err(storage_err)? {
            Some(b) => Ok(Some(decode(&b)?)),
            None => Ok(None),
        }
    }

    pub fn iter_ballots_for_case(&self, case_id: &str) -> Result<Vec<Ballot>, OpenCawtError> {
        let mut prefix = case_id.as_bytes().to_vec();
        prefix.push(0u8);
        let mut out = Vec::new();
        for item in self.ballots.scan_prefix(prefix) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    // ── Transcript events ────────────────────────────────────────────────────

    pub fn append_transcript_event(&self, event: &TranscriptEvent) -> Result<(), OpenCawtError> {
        let key = join_key(&[event.case_id.as_bytes(), &event.seq_no.to_be_bytes()]);
        self.transcript_events
            .insert(key, encode(event)?)
            .map_err(storage_err)?;
        Ok(())
    }

    /// Ordered ascending by `seq_no` (key encoding is big-endian, so sled's
    /// natural iteration order is already correct).
    pub fn iter_transcript_for_case(&self, case_id: &str) -> Result<Vec<TranscriptEvent>, OpenCawtError> {
        let mut prefix = case_id.as_bytes().to_vec();
        prefix.push(0u8);
        let mut out = Vec::new();
        for item in self.transcript_events.scan_prefix(prefix) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    // ── Seal jobs ────────────────────────────────────────────────────────────

    pub fn put_seal_job(&self, job: &SealJob) -> Result<(), OpenCawtError> {
        self.seal_jobs.insert(job.job_id.as_bytes(), encode(job)?).map_err(storage_err)?;
        self.seal_jobs_by_subject
            .insert(job.subject.subject_id().as_bytes(), job.job_id.as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    pub fn get_seal_job(&self, job_id: &str) -> Result<Option<SealJob>, OpenCawtError> {
        match self.seal_jobs.get(job_id.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(decode(&b)?)),
            None => Ok(None),
        }
    }

    /// At most one seal job per subject (spec §3): lookup before insert.
    pub fn get_seal_job_for_subject(&self, subject_id: &str) -> Result<Option<SealJob>, OpenCawtError> {
        match self.seal_jobs_by_subject.get(subject_id.as_bytes()).map_err(storage_err)? {
            Some(id_bytes) => {
                let job_id = String::from_utf8_lossy(&id_bytes).to_string();
                self.get_seal_job(&job_id)
            }
            None => Ok(None),
        }
    }

    pub fn iter_retryable_seal_jobs(&self) -> Result<Vec<SealJob>, OpenCawtError> {
        let mut out = Vec::new();
        for item in self.seal_jobs.iter() {
            let (_, bytes) = item.map_err(storage_err)?;
            let job: SealJob = decode(&bytes)?;
            if matches!(job.status, opencawt_core::seal::SealJobStatus::Queued | opencawt_core::seal::SealJobStatus::Failed)
                && !job.is_non_retryable()
            {
                out.push(job);
            }
        }
        Ok(out)
    }

    // ── Used treasury tx ─────────────────────────────────────────────────────

    pub fn used_treasury_tx_exists(&self, tx_sig: &str) -> bool {
        self.used_treasury_tx.contains_key(tx_sig.as_bytes()).unwrap_or(false)
    }

    pub fn put_used_treasury_tx(&self, row: &UsedTreasuryTx) -> Result<(), OpenCawtError> {
        self.used_treasury_tx
            .insert(row.tx_sig.as_bytes(), encode(row)?)
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Agent action log (replay guard) ─────────────────────────────────────

    /// Uniqueness on `(agent_id, signature, timestamp_sec)` (spec §3, §4.1).
    /// Returns `true` if this exact envelope was already recorded.
    pub fn action_log_contains(&self, agent_id: &str, signature: &str, timestamp_sec: i64) -> Result<bool, OpenCawtError> {
        let key = join_key(&[agent_id.as_bytes(), signature.as_bytes(), &timestamp_sec.to_be_bytes()]);
        Ok(self.agent_action_log.contains_key(key).map_err(storage_err)?)
    }

    pub fn put_action_log(&self, row: &AgentActionLog) -> Result<(), OpenCawtError> {
        let key = join_key(&[row.agent_id.as_bytes(), row.signature.as_bytes(), &row.timestamp_sec.to_be_bytes()]);
        self.agent_action_log.insert(key, encode(row)?).map_err(storage_err)?;
        Ok(())
    }

    // ── Agent case activity / stats cache ───────────────────────────────────

    pub fn put_case_activity(&self, row: &AgentCaseActivity) -> Result<(), OpenCawtError> {
        let key = join_key(&[row.agent_id.as_bytes(), row.case_id.as_bytes()]);
        self.agent_case_activity.insert(key, encode(row)?).map_err(storage_err)?;
        Ok(())
    }

    pub fn iter_case_activity_for_agent(&self, agent_id: &str) -> Result<Vec<AgentCaseActivity>, OpenCawtError> {
        let mut prefix = agent_id.as_bytes().to_vec();
        prefix.push(0u8);
        let mut out = Vec::new();
        for item in self.agent_case_activity.scan_prefix(prefix) {
            let (_, bytes) = item.map_err(storage_err)?;
            out.push(decode(&bytes)?);
        }
        Ok(out)
    }

    pub fn get_stats_cache(&self, agent_id: &str) -> Result<Option<AgentStatsCache>, OpenCawtError> {
        match self.agent_stats_cache.get(agent_id.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(decode(&b)?)),
            None => Ok(None),
        }
    }

    pub fn put_stats_cache(&self, stats: &AgentStatsCache) -> Result<(), OpenCawtError> {
        self.agent_stats_cache
            .insert(stats.agent_id.as_bytes(), encode(stats)?)
            .map_err(storage_err)?;
        Ok(())
    }

    // ── Agreements ───────────────────────────────────────────────────────────

    pub fn get_agreement(&self, proposal_id: &str) -> Result<Option<Agreement>, OpenCawtError> {
        match self.agreements.get(proposal_id.as_bytes()).map_err(storage_err)? {
            Some(b) => Ok(Some(decode(&b)?)),
            None => Ok(None),
        }
    }

    pub fn get_agreement_by_code(&self, agreement_code: &str) -> Result<Option<Agreement>, OpenCawtError> {
        match self.agreement_codes.get(agreement_code.as_bytes()).map_err(storage_err)? {
            Some(id_bytes) => {
                let proposal_id = String::from_utf8_lossy(&id_bytes).to_string();
                self.get_agreement(&proposal_id)
            }
            None => Ok(None),
        }
    }

    pub fn put_agreement(&self, agreement: &Agreement) -> Result<(), OpenCawtError> {
        self.agreements
            .insert(agreement.proposal_id.as_bytes(), encode(agreement)?)
            .map_err(storage_err)?;
        self.agreement_codes
            .insert(agreement.agreement_code.as_bytes(), agreement.proposal_id.as_bytes())
            .map_err(storage_err)?;
        Ok(())
    }

    /// Apply a worker callback's terminal outcome to both the seal job and
    /// the agreement it seals in one transaction (spec §4.9 "transition
    /// status → sealed on successful mint"), mirroring
    /// `apply_seal_callback_tx`'s case-row counterpart.
    pub fn apply_seal_callback_for_agreement_tx(
        &self,
        job: &SealJob,
        agreement: &Agreement,
    ) -> Result<(), OpenCawtError> {
        use sled::Transactional;
        let job_bytes = encode(job)?;
        let agreement_bytes = encode(agreement)?;
        (&self.seal_jobs, &self.agreements, &self.agreement_codes)
            .transaction(|(jobs, agreements, codes)| {
                jobs.insert(job.job_id.as_bytes(), job_bytes.clone())?;
                agreements.insert(agreement.proposal_id.as_bytes(), agreement_bytes.clone())?;
                codes.insert(agreement.agreement_code.as_bytes(), agreement.proposal_id.as_bytes())?;
                Ok(())
            })
            .map_err(|e: sled::transaction::TransactionError<sled::Error>| storage_err(e))
    }

    // ── Rate limiting (sliding window) ──────────────────────────────────────

    /// Record one event for `(action, agent_id)` at `now` and return the
    /// tree handle so the rate limiter module can scan the window.
    pub(crate) fn rate_limit_tree(&self) -> &sled::Tree {
        &self.rate_limit_events
    }

    // ── Idempotency ──────────────────────────────────────────────────────────

    pub(crate) fn idempotency_tree(&self) -> &sled::Tree {
        &self.idempotency_records
    }

    // ── Meta ─────────────────────────────────────────────────────────────────

    pub fn get_meta(&self, key: &str) -> Result<Option<Vec<u8>>, OpenCawtError> {
        self.meta
            .get(key.as_bytes())
            .map(|v| v.map(|iv| iv.to_vec()))
            .map_err(storage_err)
    }

    pub fn put_meta(&self, key: &str, value: &[u8]) -> Result<(), OpenCawtError> {
        self.meta.insert(key.as_bytes(), value).map_err(storage_err)?;
        Ok(())
    }
}
