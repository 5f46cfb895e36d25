//! Key derivation, topic hashing and symmetric encryption
//!
//! Everything here that takes raw key bytes is a pure function: the same
//! inputs always produce the same topic or shared key. That property is what
//! lets two peers arrive at the same response and thread topics without ever
//! sending them.
//!
//! ```text
//! invite topic  = sha256(invitee invite public key)
//! shared key    = HKDF-SHA256(x25519(my_priv, their_pub))
//! derived topic = sha256(shared key)
//! ```
//!
//! Stateful key handling (the keychain, envelope encode/decode) lives in
//! [`keychain::Crypto`].

pub mod envelope;
pub mod keychain;

pub use envelope::{EncodeOptions, Envelope, EnvelopeType};
pub use keychain::Crypto;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    ChaCha20Poly1305, Nonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::{Digest, Sha256};
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519StaticSecret};

use crate::error::{ChatError, ChatResult};

/// Nonce size for ChaCha20-Poly1305 (12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Length of x25519 keys and derived symmetric keys
pub const KEY_LENGTH: usize = 32;

/// A derived 32-byte symmetric key
pub type SymKey = [u8; KEY_LENGTH];

/// Hash a hex-encoded public key into the topic its owner listens on.
pub fn topic_from_public_key(public_key_hex: &str) -> ChatResult<String> {
    let bytes = decode_key_hex(public_key_hex)?;
    Ok(hex::encode(Sha256::digest(bytes)))
}

/// Hash a symmetric key into the topic shared by its holders.
pub fn topic_from_secret(sym_key: &SymKey) -> String {
    hex::encode(Sha256::digest(sym_key))
}

/// x25519 exchange followed by HKDF-SHA256.
///
/// Symmetric: `shared_secret(a_priv, b_pub) == shared_secret(b_priv, a_pub)`.
pub fn shared_secret(
    my_private: &[u8; KEY_LENGTH],
    their_public: &[u8; KEY_LENGTH],
) -> ChatResult<SymKey> {
    let secret = X25519StaticSecret::from(*my_private);
    let public = X25519PublicKey::from(*their_public);
    let shared = secret.diffie_hellman(&public);

    let hk = Hkdf::<Sha256>::new(None, shared.as_bytes());
    let mut okm = [0u8; KEY_LENGTH];
    hk.expand(&[], &mut okm)
        .map_err(|e| ChatError::Crypto(format!("HKDF expand failed: {}", e)))?;
    Ok(okm)
}

/// Public half of an x25519 private key.
pub fn x25519_public_key(private: &[u8; KEY_LENGTH]) -> [u8; KEY_LENGTH] {
    X25519PublicKey::from(&X25519StaticSecret::from(*private)).to_bytes()
}

/// Fresh random x25519 private key.
pub fn generate_x25519_private_key() -> [u8; KEY_LENGTH] {
    random_bytes()
}

/// Digest used in chat receipts: hex sha256 of the message text.
pub fn hash_message(message: &str) -> String {
    hex::encode(Sha256::digest(message.as_bytes()))
}

/// Parse a 32-byte key from hex.
pub fn decode_key_hex(key_hex: &str) -> ChatResult<[u8; KEY_LENGTH]> {
    let bytes = hex::decode(key_hex)
        .map_err(|e| ChatError::Crypto(format!("Invalid key hex: {}", e)))?;
    bytes.try_into().map_err(|b: Vec<u8>| {
        ChatError::Crypto(format!("Invalid key length: expected 32, got {}", b.len()))
    })
}

pub(crate) fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::rng().fill_bytes(&mut bytes);
    bytes
}

/// ChaCha20-Poly1305 keyed by a topic's symmetric key.
///
/// The caller supplies the nonce so the envelope layer can place it in its
/// own wire position.
pub struct SymCipher {
    cipher: ChaCha20Poly1305,
}

impl SymCipher {
    pub fn new(key: &SymKey) -> Self {
        Self {
            cipher: ChaCha20Poly1305::new(key.into()),
        }
    }

    /// Generate a random 12-byte nonce.
    pub fn generate_nonce() -> [u8; NONCE_SIZE] {
        random_bytes()
    }

    pub fn encrypt(&self, plaintext: &[u8], nonce: &[u8; NONCE_SIZE]) -> ChatResult<Vec<u8>> {
        let nonce = Nonce::from_slice(nonce);
        self.cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| ChatError::Crypto(format!("Encryption failed: {}", e)))
    }

    pub fn decrypt(&self, ciphertext: &[u8], nonce: &[u8; NONCE_SIZE]) -> ChatResult<Vec<u8>> {
        let nonce = Nonce::from_slice(nonce);
        self.cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| ChatError::DecryptionFailed(format!("{}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_secret_is_symmetric() {
        let a = generate_x25519_private_key();
        let b = generate_x25519_private_key();
        let ab = shared_secret(&a, &x25519_public_key(&b)).unwrap();
        let ba = shared_secret(&b, &x25519_public_key(&a)).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(topic_from_secret(&ab), topic_from_secret(&ba));
    }

    #[test]
    fn test_shared_secret_differs_per_peer() {
        let a = generate_x25519_private_key();
        let b = generate_x25519_private_key();
        let c = generate_x25519_private_key();
        let ab = shared_secret(&a, &x25519_public_key(&b)).unwrap();
        let ac = shared_secret(&a, &x25519_public_key(&c)).unwrap();
        assert_ne!(ab, ac);
    }

    #[test]
    fn test_topic_from_public_key_is_sha256_hex() {
        let key = [7u8; 32];
        let topic = topic_from_public_key(&hex::encode(key)).unwrap();
        assert_eq!(topic, hex::encode(Sha256::digest(key)));
        assert_eq!(topic.len(), 64);
    }

    #[test]
    fn test_topic_from_public_key_rejects_bad_input() {
        assert!(topic_from_public_key("zz").is_err());
        assert!(topic_from_public_key("abcd").is_err());
    }

    #[test]
    fn test_hash_message_known_vector() {
        assert_eq!(
            hash_message("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sym_cipher_round_trip() {
        let key: SymKey = random_bytes();
        let cipher = SymCipher::new(&key);
        let nonce = SymCipher::generate_nonce();
        let ct = cipher.encrypt(b"hello", &nonce).unwrap();
        assert_eq!(cipher.decrypt(&ct, &nonce).unwrap(), b"hello");
    }

    #[test]
    fn test_sym_cipher_wrong_key_fails() {
        let nonce = SymCipher::generate_nonce();
        let ct = SymCipher::new(&random_bytes())
            .encrypt(b"secret", &nonce)
            .unwrap();
        let result = SymCipher::new(&random_bytes()).decrypt(&ct, &nonce);
        assert!(matches!(result, Err(ChatError::DecryptionFailed(_))));
    }
}
