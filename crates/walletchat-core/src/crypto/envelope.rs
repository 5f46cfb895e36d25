//! Relay envelope wire format
//!
//! ```text
//! type 0: [0x00][nonce (12)][ciphertext + tag]             key = topic sym key
//! type 1: [0x01][sender x25519 pub (32)][nonce (12)][ct]   key = DH(receiver, sender)
//! ```
//!
//! Type 1 is used only for the invite request, where the invitee has no
//! symmetric key yet and must derive one from the sender key carried in the
//! envelope. The whole envelope is base64 (standard alphabet) on the wire.

use base64::{engine::general_purpose::STANDARD, Engine};

use super::{KEY_LENGTH, NONCE_SIZE};
use crate::error::{ChatError, ChatResult};

const TYPE_0: u8 = 0;
const TYPE_1: u8 = 1;

/// Envelope discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeType {
    /// Sealed with the topic's symmetric key
    Sealed,
    /// Sealed with a DH key; carries the sender's public key
    SealedWithSender { sender_public_key: [u8; KEY_LENGTH] },
}

/// How [`super::Crypto::encode`] should seal a payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeOptions {
    Type0,
    Type1 {
        sender_public_key: String,
        receiver_public_key: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub kind: EnvelopeType,
    pub nonce: [u8; NONCE_SIZE],
    pub sealed: Vec<u8>,
}

impl Envelope {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + KEY_LENGTH + NONCE_SIZE + self.sealed.len());
        match &self.kind {
            EnvelopeType::Sealed => out.push(TYPE_0),
            EnvelopeType::SealedWithSender { sender_public_key } => {
                out.push(TYPE_1);
                out.extend_from_slice(sender_public_key);
            }
        }
        out.extend_from_slice(&self.nonce);
        out.extend_from_slice(&self.sealed);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> ChatResult<Self> {
        let (kind, rest) = match bytes.split_first() {
            Some((&TYPE_0, rest)) => (EnvelopeType::Sealed, rest),
            Some((&TYPE_1, rest)) => {
                if rest.len() < KEY_LENGTH {
                    return Err(ChatError::DecryptionFailed(
                        "Envelope too short to contain sender key".to_string(),
                    ));
                }
                let (key, rest) = rest.split_at(KEY_LENGTH);
                let mut sender_public_key = [0u8; KEY_LENGTH];
                sender_public_key.copy_from_slice(key);
                (EnvelopeType::SealedWithSender { sender_public_key }, rest)
            }
            Some((other, _)) => {
                return Err(ChatError::DecryptionFailed(format!(
                    "Unsupported envelope type: {}",
                    other
                )))
            }
            None => return Err(ChatError::DecryptionFailed("Empty envelope".to_string())),
        };

        if rest.len() < NONCE_SIZE {
            return Err(ChatError::DecryptionFailed(
                "Envelope too short to contain nonce".to_string(),
            ));
        }
        let (nonce_bytes, sealed) = rest.split_at(NONCE_SIZE);
        let mut nonce = [0u8; NONCE_SIZE];
        nonce.copy_from_slice(nonce_bytes);

        Ok(Self {
            kind,
            nonce,
            sealed: sealed.to_vec(),
        })
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.to_bytes())
    }

    pub fn from_base64(encoded: &str) -> ChatResult<Self> {
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| ChatError::DecryptionFailed(format!("Invalid base64: {}", e)))?;
        Self::from_bytes(&bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_type0_layout() {
        let envelope = Envelope {
            kind: EnvelopeType::Sealed,
            nonce: [1; NONCE_SIZE],
            sealed: vec![9, 9, 9],
        };
        let bytes = envelope.to_bytes();
        assert_eq!(bytes[0], 0);
        assert_eq!(&bytes[1..13], &[1; NONCE_SIZE]);
        assert_eq!(Envelope::from_base64(&envelope.to_base64()).unwrap(), envelope);
    }

    #[test]
    fn test_type1_carries_sender_key() {
        let envelope = Envelope {
            kind: EnvelopeType::SealedWithSender {
                sender_public_key: [5; KEY_LENGTH],
            },
            nonce: [2; NONCE_SIZE],
            sealed: vec![1, 2, 3, 4],
        };
        let bytes = envelope.to_bytes();
        assert_eq!(bytes[0], 1);
        assert_eq!(&bytes[1..33], &[5; KEY_LENGTH]);
        assert_eq!(Envelope::from_bytes(&bytes).unwrap(), envelope);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(Envelope::from_bytes(&[]).is_err());
        assert!(Envelope::from_bytes(&[7, 0, 0]).is_err());
        assert!(Envelope::from_bytes(&[0, 1, 2]).is_err());
        assert!(Envelope::from_bytes(&[1; 20]).is_err());
        assert!(Envelope::from_base64("not base64!").is_err());
    }
}
