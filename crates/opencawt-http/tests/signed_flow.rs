//! End-to-end HTTP tests driven through `tower::ServiceExt::oneshot`
//! (spec §8): real Ed25519-signed requests against the router returned by
//! `opencawt_http::build_router`, over a throwaway sled store and a
//! `FakeClock` so timestamps are deterministic.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use opencawt_core::config::Config;
use opencawt_crypto::KeyPair;
use opencawt_engine::clock::{Clock, FakeClock};
use opencawt_engine::webhook::WebhookSender;
use opencawt_http::{build_router, AppState};
use opencawt_store::StoreDb;
use tempfile::TempDir;
use tower::ServiceExt;

fn test_state(now: i64) -> (TempDir, AppState, FakeClock) {
    let dir = TempDir::new().unwrap();
    let store = Arc::new(StoreDb::open(dir.path()).unwrap());
    let clock = FakeClock::new(now);
    let state = AppState {
        store,
        config: Arc::new(Config::default()),
        clock: Arc::new(clock.clone()) as Arc<dyn Clock>,
        webhooks: Arc::new(WebhookSender::new(b"test-signing-key".to_vec())),
    };
    (dir, state, clock)
}

/// Build a signed mutation request per the `OCPv1` envelope (spec §4.1).
fn signed_request(
    key: &KeyPair,
    method: &str,
    path: &str,
    body: &serde_json::Value,
    now: i64,
    nonce: &str,
    idempotency_key: Option<&str>,
) -> Request<Body> {
    let body_bytes = serde_json::to_vec(body).unwrap();
    let body_sha256 = opencawt_crypto::canonical::sha256_hex_bytes(&body_bytes);
    let signing_string = opencawt_crypto::build_signing_string(method, path, now, nonce, &body_sha256);
    let signature = key.sign(signing_string.as_bytes());

    let mut builder = Request::builder()
        .method(method)
        .uri(path)
        .header("content-type", "application/json")
        .header("x-agent-id", &key.agent_id)
        .header("x-timestamp", now.to_string())
        .header("x-nonce", nonce)
        .header("x-body-sha256", &body_sha256)
        .header("x-signature", signature);
    if let Some(idem) = idempotency_key {
        builder = builder.header("idempotency-key", idem);
    }
    builder.body(Body::from(body_bytes)).unwrap()
}

async fn register_agent(router: &axum::Router, key: &KeyPair, now: i64) {
    let body = serde_json::json!({ "displayName": "prosecution bot" });
    let req = signed_request(key, "POST", "/agents", &body, now, "n-register", None);
    let res = router.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
}

async fn body_json(res: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn agent_self_registers_with_a_signed_envelope() {
    let (_dir, state, _clock) = test_state(1_700_000_000);
    let router = build_router(state.clone());
    let agent = KeyPair::generate();

    let body = serde_json::json!({ "displayName": "Arbiter Prime", "jurorEligible": true });
    let req = signed_request(&agent, "POST", "/agents", &body, 1_700_000_000, "n1", None);
    let res = router.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let value = body_json(res).await;
    assert_eq!(value["agentId"], agent.agent_id);
    assert_eq!(value["displayName"], "Arbiter Prime");

    let get_req = Request::builder()
        .method("GET")
        .uri(format!("/agents/{}", agent.agent_id))
        .body(Body::empty())
        .unwrap();
    let get_res = router.oneshot(get_req).await.unwrap();
    assert_eq!(get_res.status(), StatusCode::OK);
}

#[tokio::test]
async fn replaying_a_signature_is_rejected_as_a_reused_nonce() {
    let (_dir, state, _clock) = test_state(1_700_000_000);
    let router = build_router(state.clone());
    let agent = KeyPair::generate();

    let body = serde_json::json!({ "displayName": "Arbiter" });
    let req = signed_request(&agent, "POST", "/agents", &body, 1_700_000_000, "n1", None);
    let res = router.clone().oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);

    // A different agent id can't replay since action_log_contains() keys on
    // the specific (agent_id, signature, timestamp) triple, so reuse the
    // exact same signed bytes again (a genuine replay, e.g. a retried
    // proxy) against a route that doesn't require the bootstrap-only path.
    let req2 = signed_request(&agent, "POST", "/agents", &body, 1_700_000_000, "n1", None);
    let res2 = router.oneshot(req2).await.unwrap();
    assert_eq!(res2.status(), StatusCode::UNAUTHORIZED);
    let value = body_json(res2).await;
    assert_eq!(value["error"]["code"], "NONCE_REUSED");
}

#[tokio::test]
async fn idempotent_filing_replays_the_same_response_and_rejects_a_changed_payload() {
    let (_dir, state, clock) = test_state(1_700_000_000);
    let router = build_router(state.clone());
    let prosecution = KeyPair::generate();
    register_agent(&router, &prosecution, clock.now()).await;

    let create_body = serde_json::json!({
        "claims": [{ "summary": "breach of terms", "requestedRemedy": "refund" }],
    });
    let create_req = signed_request(&prosecution, "POST", "/cases", &create_body, clock.now(), "n-create", None);
    let create_res = router.clone().oneshot(create_req).await.unwrap();
    assert_eq!(create_res.status(), StatusCode::CREATED);
    let case = body_json(create_res).await;
    let case_id = case["caseId"].as_str().unwrap().to_string();

    let file_path = format!("/cases/{case_id}/file");
    let file_body = serde_json::json!({});
    let idem_key = "file-once";

    let req1 = signed_request(&prosecution, "POST", &file_path, &file_body, clock.now(), "n-file-1", Some(idem_key));
    let res1 = router.clone().oneshot(req1).await.unwrap();
    assert_eq!(res1.status(), StatusCode::OK);
    let first = body_json(res1).await;

    // Same key, byte-identical body, different nonce/signature: must replay
    // the exact first response rather than filing the case twice.
    let req2 = signed_request(&prosecution, "POST", &file_path, &file_body, clock.now(), "n-file-2", Some(idem_key));
    let res2 = router.clone().oneshot(req2).await.unwrap();
    assert_eq!(res2.status(), StatusCode::OK);
    let second = body_json(res2).await;
    assert_eq!(first, second);

    // Same key, different body: rejected rather than silently re-run.
    let changed_body = serde_json::json!({ "note": "resubmit" });
    let req3 = signed_request(&prosecution, "POST", &file_path, &changed_body, clock.now(), "n-file-3", Some(idem_key));
    let res3 = router.oneshot(req3).await.unwrap();
    assert_eq!(res3.status(), StatusCode::CONFLICT);
    let err = body_json(res3).await;
    assert_eq!(err["error"]["code"], "IDEMPOTENCY_KEY_REUSED_WITH_DIFFERENT_PAYLOAD");
}

#[tokio::test]
async fn stale_timestamp_is_rejected_outside_the_freshness_window() {
    let (_dir, state, _clock) = test_state(1_700_000_000);
    let router = build_router(state.clone());
    let agent = KeyPair::generate();

    let body = serde_json::json!({});
    // 301 seconds stale, one second past the +-5 minute freshness window.
    let req = signed_request(&agent, "POST", "/agents", &body, 1_700_000_000 - 301, "n1", None);
    let res = router.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn agreement_accept_then_verify_round_trips_over_http() {
    let (_dir, state, clock) = test_state(1_700_000_000);
    let router = build_router(state.clone());
    let relayer = KeyPair::generate();
    register_agent(&router, &relayer, clock.now()).await;

    let party_a = KeyPair::generate();
    let party_b = KeyPair::generate();
    let terms = serde_json::json!({ "clause": "pay 10 credits on delivery" });
    let terms_hash = opencawt_crypto::canonical_hash_hex(&terms);
    let expires_at = clock.now() + 3600;

    // `propose()` mints `proposalId`/`agreementCode` before checking `sigA`,
    // so a conforming client can't precompute that signature over ids it
    // doesn't know yet. Seed the pending agreement directly the same way
    // the engine's own unit tests do, then exercise accept/verify — the two
    // operations an external caller actually drives — over real HTTP.
    let proposal_id = opencawt_core::ident::new_id("proposal");
    let agreement_code = opencawt_core::ident::new_public_code();
    let digest = opencawt_engine::agreements::attestation_payload(
        &proposal_id,
        &terms_hash,
        &agreement_code,
        &party_a.agent_id,
        &party_b.agent_id,
        expires_at,
    );
    let sig_a = party_a.sign(&digest);
    let sig_b = party_b.sign(&digest);

    let agreement = opencawt_core::agreement::Agreement {
        proposal_id: proposal_id.clone(),
        agreement_code: agreement_code.clone(),
        mode: opencawt_core::agreement::AgreementMode::Public,
        party_a_agent_id: party_a.agent_id.clone(),
        party_b_agent_id: party_b.agent_id.clone(),
        terms_hash: terms_hash.clone(),
        canonical_terms: terms,
        sig_a,
        sig_b: None,
        status: opencawt_core::agreement::AgreementStatus::Pending,
        expires_at,
        created_at: clock.now(),
        accepted_at: None,
        sealed_at: None,
        receipt: None,
    };
    state.store.put_agreement(&agreement).unwrap();

    let accept_path = format!("/agreements/{proposal_id}/accept");
    let accept_body = serde_json::json!({ "sigB": sig_b });
    let accept_req = signed_request(&relayer, "POST", &accept_path, &accept_body, clock.now(), "n-accept", None);
    let accept_res = router.clone().oneshot(accept_req).await.unwrap();
    assert_eq!(accept_res.status(), StatusCode::OK);
    let accepted = body_json(accept_res).await;
    assert_eq!(accepted["status"], "accepted");

    let verify_req = Request::builder()
        .method("GET")
        .uri(format!("/verify?code={agreement_code}"))
        .body(Body::empty())
        .unwrap();
    let verify_res = router.oneshot(verify_req).await.unwrap();
    assert_eq!(verify_res.status(), StatusCode::OK);
    let verified = body_json(verify_res).await;
    assert_eq!(verified["overallValid"], true);
}

#[tokio::test]
async fn submission_rate_limit_rejects_the_second_call_within_the_hour() {
    let (_dir, mut state, clock) = test_state(1_700_000_000);
    let mut config = Config::default();
    config.rate_limits.submissions_per_hour = 1;
    state.config = Arc::new(config);
    let router = build_router(state.clone());
    let prosecution = KeyPair::generate();
    register_agent(&router, &prosecution, clock.now()).await;

    let create_body = serde_json::json!({
        "claims": [{ "summary": "breach of terms", "requestedRemedy": "refund" }],
    });
    let create_req = signed_request(&prosecution, "POST", "/cases", &create_body, clock.now(), "n-create", None);
    let create_res = router.clone().oneshot(create_req).await.unwrap();
    assert_eq!(create_res.status(), StatusCode::CREATED);
    let case = body_json(create_res).await;
    let case_id = case["caseId"].as_str().unwrap().to_string();

    let submit_path = format!("/cases/{case_id}/submissions");
    let first_body = serde_json::json!({ "phase": "opening", "text": "opening address" });
    let first_req = signed_request(&prosecution, "POST", &submit_path, &first_body, clock.now(), "n-sub-1", None);
    let first_res = router.clone().oneshot(first_req).await.unwrap();
    assert_eq!(first_res.status(), StatusCode::CREATED);

    let second_body = serde_json::json!({ "phase": "closing", "text": "closing address" });
    let second_req = signed_request(&prosecution, "POST", &submit_path, &second_body, clock.now(), "n-sub-2", None);
    let second_res = router.oneshot(second_req).await.unwrap();
    assert_eq!(second_res.status(), StatusCode::TOO_MANY_REQUESTS);
    let err = body_json(second_res).await;
    assert_eq!(err["error"]["code"], "RATE_LIMITED");
}

#[tokio::test]
async fn mint_worker_callback_requires_the_configured_bearer_token() {
    let (_dir, state, _clock) = test_state(1_700_000_000);
    let router = build_router(state.clone());

    let body = serde_json::json!({ "jobId": "job_does_not_exist", "status": "minted" });
    let req = Request::builder()
        .method("POST")
        .uri("/internal/seal-result")
        .header("content-type", "application/json")
        .header("authorization", "Bearer wrong-token")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap();
    let res = router.oneshot(req).await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}
