use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroize;

/// An OpenCawt keypair: Ed25519 seed + derived base58 `agent_id`.
///
/// The seed is held as a plain array and wiped on drop — same shape as the
/// teacher's `KeyPair`, minus the heap allocation Dilithium's larger keys
/// required.
pub struct KeyPair {
    pub agent_id: String,
    seed: [u8; 32],
}

impl KeyPair {
    /// Generate a fresh Ed25519 keypair.
    pub fn generate() -> Self {
        let mut seed = [0u8; 32];
        OsRng.fill_bytes(&mut seed);
        let signing_key = SigningKey::from_bytes(&seed);
        let agent_id = bs58::encode(signing_key.verifying_key().to_bytes()).into_string();
        Self { agent_id, seed }
    }

    /// Restore a keypair from a raw 32-byte seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        let signing_key = SigningKey::from_bytes(&seed);
        let agent_id = bs58::encode(signing_key.verifying_key().to_bytes()).into_string();
        Self { agent_id, seed }
    }

    pub fn sign(&self, message: &[u8]) -> String {
        crate::signing::sign_message(&self.seed, message)
    }

    pub fn seed_bytes(&self) -> &[u8; 32] {
        &self.seed
    }
}

impl Drop for KeyPair {
    fn drop(&mut self) {
        self.seed.zeroize();
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeyPair {{ agent_id: {} }}", self.agent_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keypair_signs_verifiably() {
        let kp = KeyPair::generate();
        let sig = kp.sign(b"payload");
        assert!(crate::signing::verify_message(&kp.agent_id, b"payload", &sig).is_ok());
    }
}
