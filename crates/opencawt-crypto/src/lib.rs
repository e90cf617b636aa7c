//! opencawt-crypto — canonical JSON hashing, Ed25519 signing/verification,
//! the `OCPv1` mutation signing string, and HMAC webhook signing
//! (spec §4.1, §4.10).

pub mod canonical;
pub mod keypair;
pub mod signing;
pub mod webhook;

pub use canonical::{canonical_hash_hex, canonical_json};
pub use keypair::KeyPair;
pub use signing::{build_signing_string, sign_message, verify_message};
pub use webhook::{sign_webhook_body, verify_webhook_signature};
