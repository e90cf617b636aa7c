//! Ed25519 signing/verification and the `OCPv1` mutation signing string
//! (spec §4.1, §6).

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use opencawt_core::OpenCawtError;

/// `OCPv1 | METHOD | PATH | timestampSec | nonce | sha256hex(body)` (spec §4.1).
pub fn build_signing_string(
    method: &str,
    path: &str,
    timestamp_sec: i64,
    nonce: &str,
    body_sha256_hex: &str,
) -> String {
    format!("OCPv1|{method}|{path}|{timestamp_sec}|{nonce}|{body_sha256_hex}")
}

/// Sign `message` bytes with a raw 32-byte Ed25519 seed.
pub fn sign_message(secret_seed: &[u8; 32], message: &[u8]) -> String {
    let signing_key = SigningKey::from_bytes(secret_seed);
    let sig: Signature = signing_key.sign(message);
    BASE64.encode(sig.to_bytes())
}

/// Verify a base64 Ed25519 signature over `message` against an agent's
/// base58-encoded public key. Uses `ed25519-dalek`'s `Verifier` impl, which
/// performs the comparison internally rather than a manual byte loop
/// (spec §4.1: "verification must be constant-time on signature bytes").
pub fn verify_message(
    agent_id_b58: &str,
    message: &[u8],
    signature_b64: &str,
) -> Result<(), OpenCawtError> {
    let pubkey_bytes = bs58::decode(agent_id_b58)
        .into_vec()
        .map_err(|_| OpenCawtError::SignatureInvalid)?;
    let pubkey_arr: [u8; 32] = pubkey_bytes
        .try_into()
        .map_err(|_| OpenCawtError::SignatureInvalid)?;
    let verifying_key =
        VerifyingKey::from_bytes(&pubkey_arr).map_err(|_| OpenCawtError::SignatureInvalid)?;

    let sig_bytes = BASE64
        .decode(signature_b64)
        .map_err(|_| OpenCawtError::SignatureInvalid)?;
    let sig_arr: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| OpenCawtError::SignatureInvalid)?;
    let signature = Signature::from_bytes(&sig_arr);

    verifying_key
        .verify(message, &signature)
        .map_err(|_| OpenCawtError::SignatureInvalid)
}

/// Freshness check: `|now - ts| > 5 minutes` is rejected (spec §4.1).
pub fn timestamp_is_fresh(now: i64, ts: i64) -> bool {
    (now - ts).abs() <= 300
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::OsRng;

    #[test]
    fn sign_then_verify_round_trips() {
        let mut seed = [0u8; 32];
        use rand::RngCore;
        OsRng.fill_bytes(&mut seed);
        let signing_key = SigningKey::from_bytes(&seed);
        let agent_id = bs58::encode(signing_key.verifying_key().to_bytes()).into_string();

        let msg = b"hello opencawt";
        let sig = sign_message(&seed, msg);
        assert!(verify_message(&agent_id, msg, &sig).is_ok());
    }

    #[test]
    fn tampered_message_fails_verification() {
        let mut seed = [0u8; 32];
        use rand::RngCore;
        OsRng.fill_bytes(&mut seed);
        let signing_key = SigningKey::from_bytes(&seed);
        let agent_id = bs58::encode(signing_key.verifying_key().to_bytes()).into_string();

        let sig = sign_message(&seed, b"original");
        assert!(verify_message(&agent_id, b"tampered", &sig).is_err());
    }

    #[test]
    fn freshness_window_is_plus_minus_five_minutes() {
        assert!(timestamp_is_fresh(1000, 1000 - 300));
        assert!(timestamp_is_fresh(1000, 1000 + 300));
        assert!(!timestamp_is_fresh(1000, 1000 - 301));
        assert!(!timestamp_is_fresh(1000, 1000 + 301));
    }
}
