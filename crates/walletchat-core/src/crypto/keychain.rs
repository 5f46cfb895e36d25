//! Keychain-backed key management and envelope encode/decode.
//!
//! The keychain is a plain `Store<String>`: x25519 and ed25519 private keys
//! are stored hex-encoded under their public key hex, symmetric keys under the
//! topic they secure.

use std::sync::Arc;

use tracing::debug;

use super::envelope::{EncodeOptions, Envelope, EnvelopeType};
use super::{
    decode_key_hex, generate_x25519_private_key, shared_secret, topic_from_secret,
    x25519_public_key, SymCipher, SymKey, KEY_LENGTH,
};
use crate::error::{ChatError, ChatResult};
use crate::rpc::JsonRpcPayload;
use crate::store::{MemoryStore, Store};

pub struct Crypto {
    keychain: Arc<dyn Store<String>>,
}

impl Crypto {
    pub fn new(keychain: Arc<dyn Store<String>>) -> Self {
        Self { keychain }
    }

    /// Crypto with a throwaway in-memory keychain.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new("keychain")))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Raw keychain access
    // ═══════════════════════════════════════════════════════════════════════

    pub fn keychain_get(&self, key: &str) -> ChatResult<String> {
        self.keychain
            .get(key)?
            .ok_or_else(|| ChatError::KeyNotFound(key.to_string()))
    }

    pub fn keychain_set(&self, key: &str, value: &str) -> ChatResult<()> {
        self.keychain.set(key, value.to_string())
    }

    pub fn keychain_delete(&self, key: &str, reason: &str) -> ChatResult<()> {
        self.keychain.delete(key, reason)
    }

    pub fn keychain_has(&self, key: &str) -> ChatResult<bool> {
        self.keychain.contains(key)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Key pairs
    // ═══════════════════════════════════════════════════════════════════════

    /// Generate an x25519 key pair, keep the private half, return the public
    /// half as hex.
    pub fn generate_key_pair(&self) -> ChatResult<String> {
        let private = generate_x25519_private_key();
        let public = hex::encode(x25519_public_key(&private));
        self.keychain_set(&public, &hex::encode(private))?;
        Ok(public)
    }

    pub fn private_key(&self, public_key: &str) -> ChatResult<[u8; KEY_LENGTH]> {
        decode_key_hex(&self.keychain_get(public_key)?)
    }

    pub fn delete_key_pair(&self, public_key: &str) -> ChatResult<()> {
        self.keychain_delete(public_key, "key pair discarded")
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Symmetric keys
    // ═══════════════════════════════════════════════════════════════════════

    /// DH between our key `self_public_key` and `peer_public_key`; the result
    /// is stored under the derived topic (or `override_topic`).
    ///
    /// Returns the topic.
    pub fn generate_shared_key(
        &self,
        self_public_key: &str,
        peer_public_key: &str,
        override_topic: Option<&str>,
    ) -> ChatResult<String> {
        let private = self.private_key(self_public_key)?;
        let peer = decode_key_hex(peer_public_key)?;
        let sym_key = shared_secret(&private, &peer)?;
        self.set_sym_key(&sym_key, override_topic)
    }

    /// Store a symmetric key, returning the topic it is filed under.
    pub fn set_sym_key(&self, sym_key: &SymKey, override_topic: Option<&str>) -> ChatResult<String> {
        let topic = override_topic
            .map(str::to_string)
            .unwrap_or_else(|| topic_from_secret(sym_key));
        self.keychain_set(&topic, &hex::encode(sym_key))?;
        Ok(topic)
    }

    pub fn sym_key(&self, topic: &str) -> ChatResult<SymKey> {
        decode_key_hex(&self.keychain_get(topic)?)
    }

    pub fn has_sym_key(&self, topic: &str) -> bool {
        self.keychain_has(topic).unwrap_or(false)
    }

    pub fn delete_sym_key(&self, topic: &str) -> ChatResult<()> {
        self.keychain_delete(topic, "sym key discarded")
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Envelopes
    // ═══════════════════════════════════════════════════════════════════════

    /// Serialize and seal a payload for publishing on `topic`.
    pub fn encode(
        &self,
        topic: &str,
        payload: &JsonRpcPayload,
        opts: &EncodeOptions,
    ) -> ChatResult<String> {
        let plaintext = serde_json::to_vec(payload)?;
        let (kind, key) = match opts {
            EncodeOptions::Type0 => (EnvelopeType::Sealed, self.sym_key(topic)?),
            EncodeOptions::Type1 {
                sender_public_key,
                receiver_public_key,
            } => {
                let sender_private = self.private_key(sender_public_key)?;
                let receiver = decode_key_hex(receiver_public_key)?;
                (
                    EnvelopeType::SealedWithSender {
                        sender_public_key: decode_key_hex(sender_public_key)?,
                    },
                    shared_secret(&sender_private, &receiver)?,
                )
            }
        };

        let nonce = SymCipher::generate_nonce();
        let sealed = SymCipher::new(&key).encrypt(&plaintext, &nonce)?;
        Ok(Envelope {
            kind,
            nonce,
            sealed,
        }
        .to_base64())
    }

    /// Open an envelope received on `topic`.
    ///
    /// Type 1 envelopes are opened with the private half of
    /// `receiver_public_key`; type 0 with the topic's symmetric key.
    pub fn decode(
        &self,
        topic: &str,
        message: &str,
        receiver_public_key: Option<&str>,
    ) -> ChatResult<JsonRpcPayload> {
        let envelope = Envelope::from_base64(message)?;
        let key = match envelope.kind {
            EnvelopeType::Sealed => self.sym_key(topic)?,
            EnvelopeType::SealedWithSender { sender_public_key } => {
                let receiver = receiver_public_key.ok_or_else(|| {
                    ChatError::DecryptionFailed(
                        "Type 1 envelope requires a receiver key".to_string(),
                    )
                })?;
                let private = self.private_key(receiver)?;
                shared_secret(&private, &sender_public_key)?
            }
        };

        let plaintext = SymCipher::new(&key).decrypt(&envelope.sealed, &envelope.nonce)?;
        let payload = serde_json::from_slice(&plaintext)?;
        debug!(topic, "Decoded envelope");
        Ok(payload)
    }
}
