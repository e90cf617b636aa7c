//! Outbound webhook delivery (spec §4.10): agent `notifyUrl`, defence
//! invites, post-seal notifications. Best-effort — delivery retries never
//! block a case's own stage transitions.

use std::time::Duration;

use opencawt_core::case::DefenceInviteStatus;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryOutcome {
    pub status: DefenceInviteStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
}

pub struct WebhookSender {
    http: reqwest::Client,
    signing_key: Vec<u8>,
    max_attempts: u32,
    backoff_base_ms: u64,
}

impl WebhookSender {
    pub fn new(signing_key: impl Into<Vec<u8>>) -> Self {
        Self {
            http: reqwest::Client::new(),
            signing_key: signing_key.into(),
            max_attempts: 3,
            backoff_base_ms: 200,
        }
    }

    pub fn with_retry_policy(mut self, max_attempts: u32, backoff_base_ms: u64) -> Self {
        self.max_attempts = max_attempts;
        self.backoff_base_ms = backoff_base_ms;
        self
    }

    /// POST `body_json` to `url` with an `X-OpenCawt-Signature` HMAC header
    /// (spec §4.10), retrying up to `self.max_attempts` times with bounded
    /// backoff. Never returns an `Err` — failure is reported in the
    /// returned `DeliveryOutcome` so a webhook problem never escalates into
    /// a request failure for the caller.
    pub async fn send(&self, url: &str, body_json: &str) -> DeliveryOutcome {
        let signature = opencawt_crypto::sign_webhook_body(&self.signing_key, body_json.as_bytes());
        let mut attempts = 0u32;
        let mut last_error = None;

        while attempts < self.max_attempts {
            attempts += 1;
            let result = self
                .http
                .post(url)
                .header("X-OpenCawt-Signature", &signature)
                .header("Content-Type", "application/json")
                .body(body_json.to_string())
                .send()
                .await;

            match result {
                Ok(resp) if resp.status().is_success() => {
                    return DeliveryOutcome {
                        status: DefenceInviteStatus::Delivered,
                        attempts,
                        last_error: None,
                    };
                }
                Ok(resp) => {
                    last_error = Some(format!("webhook returned status {}", resp.status()));
                }
                Err(e) => {
                    last_error = Some(e.to_string());
                }
            }

            if attempts < self.max_attempts {
                let backoff = self.backoff_base_ms * 2u64.pow(attempts - 1);
                tokio::time::sleep(Duration::from_millis(backoff)).await;
            }
        }

        tracing::warn!(url, attempts, error = ?last_error, "webhook delivery exhausted retries");
        DeliveryOutcome {
            status: DefenceInviteStatus::Failed,
            attempts,
            last_error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn delivery_to_an_unroutable_host_fails_after_retries() {
        let sender = WebhookSender::new(b"key".to_vec()).with_retry_policy(2, 1);
        let outcome = sender.send("http://127.0.0.1:1", "{}").await;
        assert_eq!(outcome.status, DefenceInviteStatus::Failed);
        assert_eq!(outcome.attempts, 2);
    }
}
