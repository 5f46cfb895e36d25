//! Ed25519 identity keypair
//!
//! One per registered account. Signs every JWT the account emits; the public
//! half is what the keyserver attestation binds to the account.

use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::crypto::random_bytes;
use crate::error::{ChatError, ChatResult};
use crate::identity::did::{encode_did_key, KeyKind};

pub struct IdentityKeyPair {
    signing: SigningKey,
}

impl IdentityKeyPair {
    /// Generate a new random keypair
    pub fn generate() -> Self {
        let seed: [u8; 32] = random_bytes();
        Self::from_seed(&seed)
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    /// Restore from a hex-encoded seed as held in the keychain.
    pub fn from_seed_hex(seed_hex: &str) -> ChatResult<Self> {
        let seed = crate::crypto::decode_key_hex(seed_hex)?;
        Ok(Self::from_seed(&seed))
    }

    pub fn seed_hex(&self) -> String {
        hex::encode(self.signing.to_bytes())
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing.verifying_key()
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.verifying_key().as_bytes())
    }

    pub fn did_key(&self) -> String {
        encode_did_key(KeyKind::Ed25519, self.verifying_key().as_bytes())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityKeyPair")
            .field("public_key", &self.public_key_hex())
            .finish()
    }
}

/// Verify an ed25519 signature against a raw public key.
pub fn verify_signature(public_key: &[u8; 32], message: &[u8], signature: &[u8]) -> ChatResult<()> {
    let key = VerifyingKey::from_bytes(public_key)
        .map_err(|e| ChatError::SignatureInvalid(format!("Invalid public key: {}", e)))?;
    let signature = Signature::from_slice(signature)
        .map_err(|e| ChatError::SignatureInvalid(format!("Malformed signature: {}", e)))?;
    key.verify(message, &signature)
        .map_err(|_| ChatError::SignatureInvalid("Signature does not match".to_string()))
}
