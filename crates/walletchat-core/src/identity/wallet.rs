//! Wallet signing seam
//!
//! The engine never signs identity attestations with its own keys. The user's
//! wallet does, through [`MessageSigner`]. Checking those signatures later is
//! chain-specific and goes through [`SignatureVerifier`].
//!
//! [`LocalWallet`] is an ed25519 stand-in for a real wallet. The CLI demo and
//! the tests use it.

use async_trait::async_trait;

use crate::error::{ChatError, ChatResult};
use crate::identity::did::AccountId;
use crate::identity::keypair::{verify_signature, IdentityKeyPair};

/// The user's external signing authority.
#[async_trait]
pub trait MessageSigner: Send + Sync {
    async fn sign_message(&self, message: &str) -> ChatResult<String>;
}

/// Chain-specific check of a wallet signature.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(&self, account: &AccountId, message: &str, signature: &str) -> ChatResult<()>;
}

/// Ed25519 wallet whose address is derived from its public key.
///
/// Signatures are `hex(public key ‖ signature)` so a verifier can recover the
/// key and check it against the address.
pub struct LocalWallet {
    keypair: IdentityKeyPair,
    account: String,
}

impl LocalWallet {
    /// Random wallet on `chain_id` (e.g. `eip155:1`).
    pub fn new(chain_id: &str) -> Self {
        Self::from_keypair(chain_id, IdentityKeyPair::generate())
    }

    pub fn from_seed(chain_id: &str, seed: &[u8; 32]) -> Self {
        Self::from_keypair(chain_id, IdentityKeyPair::from_seed(seed))
    }

    fn from_keypair(chain_id: &str, keypair: IdentityKeyPair) -> Self {
        let address = address_for(&keypair.verifying_key().to_bytes());
        Self {
            account: format!("{}:{}", chain_id, address),
            keypair,
        }
    }

    pub fn account(&self) -> &str {
        &self.account
    }
}

fn address_for(public_key: &[u8; 32]) -> String {
    let hash = blake3::hash(public_key);
    format!("0x{}", hex::encode(&hash.as_bytes()[..20]))
}

#[async_trait]
impl MessageSigner for LocalWallet {
    async fn sign_message(&self, message: &str) -> ChatResult<String> {
        let mut out = self.keypair.verifying_key().to_bytes().to_vec();
        out.extend_from_slice(&self.keypair.sign(message.as_bytes()));
        Ok(hex::encode(out))
    }
}

/// Verifies [`LocalWallet`] signatures.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalWalletVerifier;

#[async_trait]
impl SignatureVerifier for LocalWalletVerifier {
    async fn verify(&self, account: &AccountId, message: &str, signature: &str) -> ChatResult<()> {
        let bytes = hex::decode(signature)
            .map_err(|_| ChatError::SignatureInvalid("Wallet signature is not hex".to_string()))?;
        if bytes.len() != 96 {
            return Err(ChatError::SignatureInvalid(format!(
                "Wallet signature has {} bytes, expected 96",
                bytes.len()
            )));
        }
        let mut public_key = [0u8; 32];
        public_key.copy_from_slice(&bytes[..32]);

        if address_for(&public_key) != account.address {
            return Err(ChatError::SignatureInvalid(format!(
                "Wallet key does not belong to {}",
                account
            )));
        }
        verify_signature(&public_key, message.as_bytes(), &bytes[32..])
    }
}
