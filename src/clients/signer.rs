//! Key holder boundary

use async_trait::async_trait;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::error::SignError;

#[async_trait]
pub trait KeyProvider: Send + Sync {
    /// Fee payer and rate-limit identity.
    fn public_key(&self) -> [u8; 32];

    async fn sign(&self, message: &[u8]) -> Result<[u8; 64], SignError>;
}

/// In-process ed25519 key loaded from a hex seed.
pub struct LocalSigner {
    signing_key: SigningKey,
}

impl LocalSigner {
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    pub fn from_hex_seed(seed_hex: &str) -> Result<Self, SignError> {
        let seed_bytes = hex::decode(seed_hex.trim())
            .map_err(|err| SignError::InvalidKey(format!("seed is not hex: {err}")))?;
        let seed: [u8; 32] = seed_bytes
            .as_slice()
            .try_into()
            .map_err(|_| SignError::InvalidKey(format!("seed must be 32 bytes, got {}", seed_bytes.len())))?;
        Ok(Self::from_seed(seed))
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn verify(&self, message: &[u8], signature: &[u8; 64]) -> bool {
        self.verifying_key()
            .verify(message, &Signature::from_bytes(signature))
            .is_ok()
    }
}

#[async_trait]
impl KeyProvider for LocalSigner {
    fn public_key(&self) -> [u8; 32] {
        self.verifying_key().to_bytes()
    }

    async fn sign(&self, message: &[u8]) -> Result<[u8; 64], SignError> {
        Ok(self.signing_key.sign(message).to_bytes())
    }
}
