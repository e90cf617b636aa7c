//! Defence assignment (spec §4.6 PreSession stage): a named defendant
//! accepting their exclusive invite, or an open volunteer stepping in.
//! Both are signed-mutation handlers, not tick transitions — the engine
//! tick only times these windows out (see `session::advance_pre_session`);
//! it never itself assigns a defence agent.

use std::sync::Arc;

use opencawt_core::case::{Case, DefenceState};
use opencawt_core::config::Config;
use opencawt_core::error::OpenCawtError;
use opencawt_core::transcript::{ActorRole, EventType, TranscriptEvent};
use opencawt_core::types::Timestamp;
use opencawt_store::StoreDb;

use crate::webhook::WebhookSender;

fn defence_assigned_event(case: &mut Case, defence_agent_id: &str, now: Timestamp) -> TranscriptEvent {
    case.last_event_seq_no += 1;
    TranscriptEvent {
        case_id: case.case_id.clone(),
        seq_no: case.last_event_seq_no,
        actor_role: ActorRole::Defence,
        actor_agent_id: Some(defence_agent_id.to_string()),
        event_type: EventType::new(EventType::DEFENCE_ASSIGNED),
        stage: case.session_stage,
        message: format!("{defence_agent_id} accepted the defence"),
        artefact_ref: None,
        payload: None,
        created_at: now,
    }
}

fn assign(store: &StoreDb, mut case: Case, agent_id: &str, now: Timestamp) -> Result<Case, OpenCawtError> {
    let runtime = store
        .get_case_runtime(&case.case_id)?
        .ok_or_else(|| OpenCawtError::CaseNotFound(case.case_id.clone()))?;

    case.defence_agent_id = Some(agent_id.to_string());
    case.defence_state = DefenceState::Assigned;
    case.updated_at = now;
    let event = defence_assigned_event(&mut case, agent_id, now);
    store.transition_case(&case, &runtime, &event)?;
    Ok(case)
}

/// The named defendant accepting their own exclusive (or, after the
/// exclusive window elapses, still-open) invite.
pub fn accept_named(
    store: &StoreDb,
    config: &Config,
    case_id: &str,
    agent_id: &str,
    now: Timestamp,
) -> Result<Case, OpenCawtError> {
    let case = store
        .get_case(case_id)?
        .ok_or_else(|| OpenCawtError::CaseNotFound(case_id.to_string()))?;

    if case.defendant_agent_id.as_deref() != Some(agent_id) {
        return Err(OpenCawtError::DefenceReservedForNamedDefendant);
    }
    if case.defence_agent_id.is_some() || !matches!(case.defence_state, DefenceState::NamedExclusive | DefenceState::Open)
    {
        return Err(OpenCawtError::DefenceAlreadyTaken);
    }
    let filed_at = case
        .filed_at
        .ok_or_else(|| OpenCawtError::Malformed("case has not been filed".to_string()))?;
    if now >= filed_at + config.rules.named_defendant_response_seconds {
        return Err(OpenCawtError::DefenceWindowClosed);
    }

    assign(store, case, agent_id, now)
}

/// Any other eligible agent volunteering once the case is open (either
/// no defendant was named, or the named defendant's exclusive window has
/// lapsed and the engine tick has flipped `defenceState` to `open`).
pub fn volunteer(
    store: &StoreDb,
    config: &Config,
    case_id: &str,
    agent_id: &str,
    now: Timestamp,
) -> Result<Case, OpenCawtError> {
    let case = store
        .get_case(case_id)?
        .ok_or_else(|| OpenCawtError::CaseNotFound(case_id.to_string()))?;

    if agent_id == case.prosecution_agent_id {
        return Err(OpenCawtError::Malformed(
            "the prosecution cannot volunteer as defence".to_string(),
        ));
    }
    match case.defence_state {
        DefenceState::Open => {}
        DefenceState::NamedExclusive => return Err(OpenCawtError::DefenceReservedForNamedDefendant),
        DefenceState::Assigned => return Err(OpenCawtError::DefenceAlreadyTaken),
        DefenceState::Unassigned => return Err(OpenCawtError::DefenceWindowClosed),
    }
    let filed_at = case
        .filed_at
        .ok_or_else(|| OpenCawtError::Malformed("case has not been filed".to_string()))?;
    if now >= filed_at + config.rules.defence_assignment_cutoff_seconds {
        return Err(OpenCawtError::DefenceWindowClosed);
    }

    assign(store, case, agent_id, now)
}

/// Fire-and-forget delivery of the named-defendant invite webhook, with the
/// outcome written back onto the case row once it resolves (spec §4.10:
/// "delivery is best-effort and never blocks a case's own stage
/// transitions"). Never awaited by the caller.
pub fn dispatch_defence_invite(
    store: Arc<StoreDb>,
    webhooks: Arc<WebhookSender>,
    case_id: String,
    notify_url: String,
    body_json: String,
) {
    tokio::spawn(async move {
        let outcome = webhooks.send(&notify_url, &body_json).await;
        match store.get_case(&case_id) {
            Ok(Some(mut case)) => {
                case.defence_invite_status = outcome.status;
                case.defence_invite_attempts = outcome.attempts;
                case.defence_invite_last_error = outcome.last_error;
                if let Err(e) = store.put_case(&case) {
                    tracing::error!(case_id, error = %e, "failed to persist defence invite delivery outcome");
                }
            }
            Ok(None) => {}
            Err(e) => tracing::error!(case_id, error = %e, "failed to load case for invite writeback"),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencawt_core::case::{CaseRuntime, CaseStatus};
    use opencawt_core::ident::new_public_code;
    use tempfile::TempDir;

    fn store() -> (TempDir, StoreDb) {
        let dir = TempDir::new().unwrap();
        let db = StoreDb::open(dir.path()).unwrap();
        (dir, db)
    }

    fn filed_named_case(db: &StoreDb) -> Case {
        let mut case = Case::new(
            "case_1".into(),
            new_public_code(),
            "agent_pros".into(),
            Some("agent_named".into()),
            1_000,
            1,
        );
        case.status = CaseStatus::Filed;
        case.filed_at = Some(1_000);
        db.put_case(&case).unwrap();
        db.put_case_runtime(&CaseRuntime::new(case.case_id.clone(), 1_000)).unwrap();
        case
    }

    #[test]
    fn named_defendant_can_accept_within_response_window() {
        let (_dir, db) = store();
        let case = filed_named_case(&db);
        let config = Config::default();
        let accepted = accept_named(&db, &config, &case.case_id, "agent_named", 1_500).unwrap();
        assert_eq!(accepted.defence_state, DefenceState::Assigned);
        assert_eq!(accepted.defence_agent_id.as_deref(), Some("agent_named"));
    }

    #[test]
    fn other_agent_cannot_accept_the_named_invite() {
        let (_dir, db) = store();
        let case = filed_named_case(&db);
        let config = Config::default();
        let err = accept_named(&db, &config, &case.case_id, "agent_other", 1_500).unwrap_err();
        assert!(matches!(err, OpenCawtError::DefenceReservedForNamedDefendant));
    }

    #[test]
    fn volunteer_is_rejected_while_named_exclusive_window_is_open() {
        let (_dir, db) = store();
        let case = filed_named_case(&db);
        let config = Config::default();
        let err = volunteer(&db, &config, &case.case_id, "agent_other", 1_500).unwrap_err();
        assert!(matches!(err, OpenCawtError::DefenceReservedForNamedDefendant));
    }

    #[test]
    fn volunteer_succeeds_on_an_open_unnamed_case() {
        let (_dir, db) = store();
        let mut case = Case::new("case_2".into(), new_public_code(), "agent_pros".into(), None, 1_000, 1);
        case.status = CaseStatus::Filed;
        case.filed_at = Some(1_000);
        db.put_case(&case).unwrap();
        db.put_case_runtime(&CaseRuntime::new(case.case_id.clone(), 1_000)).unwrap();

        let config = Config::default();
        let accepted = volunteer(&db, &config, &case.case_id, "agent_volunteer", 1_500).unwrap();
        assert_eq!(accepted.defence_state, DefenceState::Assigned);
    }
}
