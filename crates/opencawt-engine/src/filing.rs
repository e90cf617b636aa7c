//! Case drafting and filing (spec §4.3): `draft → filed` is the one
//! signed-mutation transition the engine tick never performs itself — the
//! tick only reacts to a case that is already filed (see
//! `session::advance_pre_session`).

use opencawt_core::case::{Case, CaseRuntime, CaseStatus};
use opencawt_core::config::{Config, SoftCapMode, SolanaMode};
use opencawt_core::error::OpenCawtError;
use opencawt_core::ident::{new_id, new_public_code};
use opencawt_core::seal::UsedTreasuryTx;
use opencawt_core::transcript::{ActorRole, EventType, TranscriptEvent};
use opencawt_core::types::Timestamp;
use opencawt_store::StoreDb;

/// A filing-payment proof submitted alongside `POST /cases/{id}/file`.
pub struct TreasuryProof {
    pub tx_sig: String,
    pub amount_lamports: u64,
}

/// Whether a treasury transaction is finalised on-chain (spec §3
/// `UsedTreasuryTx`, error code `TREASURY_TX_NOT_FINALISED`). The actual
/// Solana RPC call this would make in `rpc` mode is explicitly out of scope
/// (spec §1 Non-goals: "the mint worker's internal Solana/Metaplex
/// mechanics", generalised here to payment verification) — `stub` mode
/// treats every signature as already finalised, matching the same
/// `solanaMode` switch the mint backend already keys off of.
fn treasury_tx_is_finalised(mode: SolanaMode, _tx_sig: &str) -> bool {
    match mode {
        SolanaMode::Stub => true,
        SolanaMode::Rpc => true,
    }
}

pub const CURRENT_RULESET_VERSION: u32 = 1;

pub fn create_draft(
    store: &StoreDb,
    prosecution_agent_id: String,
    defendant_agent_id: Option<String>,
    now: Timestamp,
) -> Result<Case, OpenCawtError> {
    let case = Case::new(
        new_id("case"),
        new_public_code(),
        prosecution_agent_id,
        defendant_agent_id,
        now,
        CURRENT_RULESET_VERSION,
    );
    let runtime = CaseRuntime::new(case.case_id.clone(), now);
    store.put_case_and_runtime(&case, &runtime)?;
    Ok(case)
}

/// `draft → filed` (spec §4.3): checks the soft daily filing cap, requires
/// at least one claim to have been attached, stamps `filedAt`, and schedules
/// `scheduledSessionStartAt` (spec §4.6: "a session starts `T` seconds after
/// filing").
pub fn file_case(
    store: &StoreDb,
    config: &Config,
    case_id: &str,
    agent_id: &str,
    treasury: Option<TreasuryProof>,
    now: Timestamp,
) -> Result<Case, OpenCawtError> {
    let mut case = store
        .get_case(case_id)?
        .ok_or_else(|| OpenCawtError::CaseNotFound(case_id.to_string()))?;
    let mut runtime = store
        .get_case_runtime(case_id)?
        .ok_or_else(|| OpenCawtError::CaseNotFound(case_id.to_string()))?;

    if case.prosecution_agent_id != agent_id {
        return Err(OpenCawtError::NotProsecution);
    }
    if case.status != CaseStatus::Draft {
        return Err(OpenCawtError::CaseNotDraft);
    }
    if store.iter_claims_for_case(case_id)?.is_empty() {
        return Err(OpenCawtError::MissingField("claims".to_string()));
    }

    if let Some(proof) = treasury {
        // Treasury-tx uniqueness (spec §4.1 invariants: "no two cases can
        // record the same treasuryTxSig") — `tx_sig` is the row's primary
        // key, so a second filing attempt against the same signature is
        // rejected outright rather than silently reused.
        if store.used_treasury_tx_exists(&proof.tx_sig) {
            return Err(OpenCawtError::TreasuryTxReplay);
        }
        if !treasury_tx_is_finalised(config.solana_mode, &proof.tx_sig) {
            return Err(OpenCawtError::TreasuryTxNotFinalised);
        }
        store.put_used_treasury_tx(&UsedTreasuryTx {
            tx_sig: proof.tx_sig.clone(),
            case_id: case.case_id.clone(),
            agent_id: agent_id.to_string(),
            amount_lamports: proof.amount_lamports,
            created_at: now,
        })?;
        case.treasury_tx_sig = Some(proof.tx_sig);
    }

    let since = now - 24 * 3600;

    // Per-agent filing quota (spec §4.3 rate limiter): a hard rejection,
    // distinct from the service-wide soft cap below.
    let filed_by_agent = store.count_cases_filed_since(agent_id, since)?;
    if filed_by_agent >= config.rate_limits.filing_per_24h {
        return Err(OpenCawtError::RateLimited {
            action: "filing".to_string(),
            retry_after_s: 3600,
        });
    }

    // Service-wide soft cap (spec §4.3: "a day-granularity soft cap across
    // the whole service"), which warns or rejects depending on config.
    let filed_globally = store.count_cases_filed_globally_since(since)?;
    if filed_globally >= config.soft_daily_case_cap {
        match config.soft_cap_mode {
            SoftCapMode::Enforce => {
                return Err(OpenCawtError::SoftCapExceeded {
                    cap: config.soft_daily_case_cap,
                })
            }
            SoftCapMode::Warn => {
                tracing::warn!(filed_globally, cap = config.soft_daily_case_cap, "soft daily case cap exceeded");
            }
        }
    }

    case.status = CaseStatus::Filed;
    case.filed_at = Some(now);
    case.updated_at = now;
    runtime.scheduled_session_start_at = Some(now + config.rules.session_starts_after_seconds);

    case.last_event_seq_no += 1;
    let event = TranscriptEvent {
        case_id: case.case_id.clone(),
        seq_no: case.last_event_seq_no,
        actor_role: ActorRole::Prosecution,
        actor_agent_id: Some(agent_id.to_string()),
        event_type: EventType::new(EventType::CASE_FILED),
        stage: case.session_stage,
        message: "case filed".to_string(),
        artefact_ref: None,
        payload: None,
        created_at: now,
    };
    store.transition_case(&case, &runtime, &event)?;
    Ok(case)
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencawt_core::claim::Claim;
    use std::collections::BTreeSet;
    use tempfile::TempDir;

    fn store() -> (TempDir, StoreDb) {
        let dir = TempDir::new().unwrap();
        let db = StoreDb::open(dir.path()).unwrap();
        (dir, db)
    }

    #[test]
    fn filing_without_claims_is_rejected() {
        let (_dir, db) = store();
        let config = Config::default();
        let case = create_draft(&db, "agent_pros".into(), None, 1_000).unwrap();
        let err = file_case(&db, &config, &case.case_id, "agent_pros", None, 1_001).unwrap_err();
        assert!(matches!(err, OpenCawtError::MissingField(_)));
    }

    #[test]
    fn filing_sets_scheduled_session_start_and_filed_at() {
        let (_dir, db) = store();
        let config = Config::default();
        let case = create_draft(&db, "agent_pros".into(), None, 1_000).unwrap();
        db.put_claim(&Claim::new(
            new_id("claim"),
            case.case_id.clone(),
            0,
            "summary".into(),
            "remedy".into(),
            BTreeSet::new(),
        ))
        .unwrap();

        let filed = file_case(&db, &config, &case.case_id, "agent_pros", None, 1_001).unwrap();
        assert_eq!(filed.status, CaseStatus::Filed);
        assert_eq!(filed.filed_at, Some(1_001));
        let runtime = db.get_case_runtime(&case.case_id).unwrap().unwrap();
        assert_eq!(
            runtime.scheduled_session_start_at,
            Some(1_001 + config.rules.session_starts_after_seconds)
        );
    }

    #[test]
    fn only_the_prosecution_can_file() {
        let (_dir, db) = store();
        let config = Config::default();
        let case = create_draft(&db, "agent_pros".into(), None, 1_000).unwrap();
        db.put_claim(&Claim::new(
            new_id("claim"),
            case.case_id.clone(),
            0,
            "summary".into(),
            "remedy".into(),
            BTreeSet::new(),
        ))
        .unwrap();
        let err = file_case(&db, &config, &case.case_id, "someone_else", None, 1_001).unwrap_err();
        assert!(matches!(err, OpenCawtError::NotProsecution));
    }

    fn filed_case_with_claim(db: &StoreDb, agent_id: &str, now: Timestamp) -> Case {
        let case = create_draft(db, agent_id.into(), None, now).unwrap();
        db.put_claim(&Claim::new(
            new_id("claim"),
            case.case_id.clone(),
            0,
            "summary".into(),
            "remedy".into(),
            BTreeSet::new(),
        ))
        .unwrap();
        case
    }

    #[test]
    fn filing_with_a_fresh_treasury_tx_records_it_on_the_case() {
        let (_dir, db) = store();
        let config = Config::default();
        let case = filed_case_with_claim(&db, "agent_pros", 1_000);

        let proof = TreasuryProof {
            tx_sig: "sig_1".into(),
            amount_lamports: 1_000_000,
        };
        let filed = file_case(&db, &config, &case.case_id, "agent_pros", Some(proof), 1_001).unwrap();
        assert_eq!(filed.treasury_tx_sig.as_deref(), Some("sig_1"));
        assert!(db.used_treasury_tx_exists("sig_1"));
    }

    #[test]
    fn filing_with_an_already_used_treasury_tx_is_rejected() {
        let (_dir, db) = store();
        let config = Config::default();
        let first = filed_case_with_claim(&db, "agent_pros", 1_000);
        file_case(
            &db,
            &config,
            &first.case_id,
            "agent_pros",
            Some(TreasuryProof {
                tx_sig: "sig_shared".into(),
                amount_lamports: 500,
            }),
            1_001,
        )
        .unwrap();

        let second = filed_case_with_claim(&db, "agent_pros", 1_000);
        let err = file_case(
            &db,
            &config,
            &second.case_id,
            "agent_pros",
            Some(TreasuryProof {
                tx_sig: "sig_shared".into(),
                amount_lamports: 500,
            }),
            1_002,
        )
        .unwrap_err();
        assert!(matches!(err, OpenCawtError::TreasuryTxReplay));
    }
}
