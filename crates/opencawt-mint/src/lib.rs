//! opencawt-mint — the mint worker's request/response contract (spec §6,
//! §2.11) plus an HTTP client and an in-memory stub worker for tests.
//!
//! The worker's own Solana/Metaplex mechanics are explicitly out of scope
//! (spec §1 Non-goals): this crate speaks only the `SealRequest`/
//! `SealResponse` wire contract a real worker would also speak.

use std::collections::VecDeque;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use opencawt_core::error::OpenCawtError;

/// What is being anchored — a closed case's verdict, or an accepted
/// notarised agreement (spec §4.9 shares the seal pipeline across both).
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SealRequest {
    pub job_id: String,
    pub subject_kind: String, // "case" | "agreement"
    pub subject_id: String,
    pub payload_hash: String,
    /// Must be absolute HTTPS (spec §6: "an externalUrl (which must be
    /// absolute HTTPS)"). Validated by the caller before a request is
    /// built — see [`SealRequest::validate`].
    pub external_url: String,
    pub metadata: serde_json::Value,
}

impl SealRequest {
    pub fn validate(&self) -> Result<(), OpenCawtError> {
        if !self.external_url.starts_with("https://") {
            return Err(OpenCawtError::Malformed(
                "externalUrl must be absolute HTTPS".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum SealResponse {
    Minted {
        #[serde(rename = "assetId")]
        asset_id: String,
        #[serde(rename = "txSig")]
        tx_sig: String,
        #[serde(rename = "sealedUri")]
        sealed_uri: String,
        #[serde(rename = "metadataUri")]
        metadata_uri: String,
        #[serde(rename = "sealedAtIso")]
        sealed_at_iso: String,
    },
    Failed {
        #[serde(rename = "errorCode")]
        error_code: String,
        #[serde(rename = "errorMessage")]
        error_message: String,
    },
}

impl SealResponse {
    /// Worker-signalled terminal errors are prefixed `NON_RETRYABLE:` when
    /// stored as a job's `lastError` (spec §3, §4.8).
    pub fn is_non_retryable_failure(&self) -> bool {
        matches!(
            self,
            SealResponse::Failed { error_code, .. }
                if matches!(error_code.as_str(), "QUOTA_EXHAUSTED" | "INVALID_METADATA" | "SUBJECT_REJECTED")
        )
    }
}

/// Thin reqwest client for `POST /mint`, authenticated via a static token
/// header (spec §6).
pub struct MintWorkerClient {
    http: reqwest::Client,
    base_url: String,
    worker_token: String,
}

impl MintWorkerClient {
    pub fn new(base_url: impl Into<String>, worker_token: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            worker_token: worker_token.into(),
        }
    }

    pub async fn mint(&self, request: &SealRequest) -> Result<SealResponse, OpenCawtError> {
        request.validate()?;
        let resp = self
            .http
            .post(format!("{}/mint", self.base_url))
            .header("Authorization", format!("Bearer {}", self.worker_token))
            .json(request)
            .send()
            .await
            .map_err(|e| OpenCawtError::MintWorkerFailed(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(OpenCawtError::MintWorkerFailed(format!(
                "worker returned status {}",
                resp.status()
            )));
        }
        resp.json::<SealResponse>()
            .await
            .map_err(|e| OpenCawtError::MintWorkerFailed(e.to_string()))
    }
}

/// Dispatches a [`SealRequest`] to whichever backend `seal_worker_mode`
/// (spec §6) selects. `Stub` never leaves the process — no config key for a
/// worker base URL is needed in that mode, matching spec §6's config-key
/// enumeration, which lists only the mode switch, not a URL.
pub enum MintBackend {
    Live(MintWorkerClient),
    Stub(InMemoryMintWorker),
}

impl MintBackend {
    pub async fn mint(&self, request: &SealRequest) -> Result<SealResponse, OpenCawtError> {
        match self {
            MintBackend::Live(client) => client.mint(request).await,
            MintBackend::Stub(worker) => worker.mint(request).await,
        }
    }
}

/// An in-memory stand-in for a real mint worker, used by `opencawt-http`
/// and `opencawt-node` integration tests in place of a network call (spec
/// §1 Non-goals: "the mint worker's internal Solana/Metaplex mechanics").
///
/// Scripted: callers queue up responses with [`InMemoryMintWorker::push`];
/// each call to [`InMemoryMintWorker::mint`] pops the next one, defaulting
/// to a successful mint if the queue is empty.
pub struct InMemoryMintWorker {
    scripted: Mutex<VecDeque<SealResponse>>,
}

impl Default for InMemoryMintWorker {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryMintWorker {
    pub fn new() -> Self {
        Self {
            scripted: Mutex::new(VecDeque::new()),
        }
    }

    pub fn push(&self, response: SealResponse) {
        self.scripted.lock().expect("lock not poisoned").push_back(response);
    }

    pub async fn mint(&self, request: &SealRequest) -> Result<SealResponse, OpenCawtError> {
        request.validate()?;
        let scripted = self.scripted.lock().expect("lock not poisoned").pop_front();
        Ok(scripted.unwrap_or_else(|| SealResponse::Minted {
            asset_id: format!("asset_{}", request.job_id),
            tx_sig: format!("tx_{}", request.job_id),
            sealed_uri: format!("https://opencawt.example/seal/{}", request.job_id),
            metadata_uri: format!("https://opencawt.example/metadata/{}", request.job_id),
            sealed_at_iso: "1970-01-01T00:00:00Z".to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req() -> SealRequest {
        SealRequest {
            job_id: "job_1".into(),
            subject_kind: "case".into(),
            subject_id: "case_1".into(),
            payload_hash: "deadbeef".into(),
            external_url: "https://opencawt.example/cases/case_1".into(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn rejects_non_https_external_url() {
        let mut r = req();
        r.external_url = "http://insecure.example".into();
        assert!(r.validate().is_err());
    }

    #[tokio::test]
    async fn in_memory_worker_defaults_to_minted() {
        let worker = InMemoryMintWorker::new();
        let resp = worker.mint(&req()).await.unwrap();
        assert!(matches!(resp, SealResponse::Minted { .. }));
    }

    #[tokio::test]
    async fn in_memory_worker_plays_back_scripted_responses_in_order() {
        let worker = InMemoryMintWorker::new();
        worker.push(SealResponse::Failed {
            error_code: "QUOTA_EXHAUSTED".into(),
            error_message: "daily mint quota exceeded".into(),
        });
        let resp = worker.mint(&req()).await.unwrap();
        assert!(resp.is_non_retryable_failure());
    }

    #[test]
    fn seal_response_round_trips_through_json() {
        let minted = SealResponse::Minted {
            asset_id: "a".into(),
            tx_sig: "t".into(),
            sealed_uri: "https://x/u".into(),
            metadata_uri: "https://x/m".into(),
            sealed_at_iso: "2025-01-01T00:00:00Z".into(),
        };
        let json = serde_json::to_string(&minted).unwrap();
        let back: SealResponse = serde_json::from_str(&json).unwrap();
        assert_eq!(minted, back);
    }
}
