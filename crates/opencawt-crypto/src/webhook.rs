//! HMAC-SHA256 webhook signing (spec §4.10).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// `X-OpenCawt-Signature: sha256=<base64 hmac>` header value for a webhook
/// delivery body, keyed on the subscriber's per-subscription signing secret.
pub fn sign_webhook_body(signing_key: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(signing_key).expect("HMAC accepts any key length");
    mac.update(body);
    let tag = mac.finalize().into_bytes();
    format!("sha256={}", BASE64.encode(tag))
}

/// Verify a delivered `X-OpenCawt-Signature` header against the raw body and
/// the subscription's signing secret. Constant-time by way of `hmac`'s own
/// `verify_slice`.
pub fn verify_webhook_signature(signing_key: &[u8], body: &[u8], header_value: &str) -> bool {
    let Some(encoded) = header_value.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(tag) = BASE64.decode(encoded) else {
        return false;
    };
    let mut mac = HmacSha256::new_from_slice(signing_key).expect("HMAC accepts any key length");
    mac.update(body);
    mac.verify_slice(&tag).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_then_verify_round_trips() {
        let key = b"subscription-secret";
        let body = br#"{"event":"case.sealed"}"#;
        let sig = sign_webhook_body(key, body);
        assert!(sig.starts_with("sha256="));
        assert!(verify_webhook_signature(key, body, &sig));
    }

    #[test]
    fn tampered_body_fails_verification() {
        let key = b"subscription-secret";
        let sig = sign_webhook_body(key, b"original body");
        assert!(!verify_webhook_signature(key, b"tampered body", &sig));
    }

    #[test]
    fn malformed_header_is_rejected() {
        assert!(!verify_webhook_signature(b"key", b"body", "not-a-valid-header"));
    }
}
