//! DID encodings used in JWT claims
//!
//! - `did:key:z{base58btc(multicodec ‖ key)}` for ed25519 identity keys and
//!   x25519 key-exchange keys
//! - `did:pkh:{namespace}:{reference}:{address}` for blockchain accounts

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ChatResult};

const DID_KEY_PREFIX: &str = "did:key:";
const DID_PKH_PREFIX: &str = "did:pkh:";
const MULTIBASE_BASE58BTC: char = 'z';

/// Key type carried in a `did:key`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    Ed25519,
    X25519,
}

impl KeyKind {
    /// Unsigned-varint multicodec header.
    fn multicodec(&self) -> [u8; 2] {
        match self {
            KeyKind::Ed25519 => [0xed, 0x01],
            KeyKind::X25519 => [0xec, 0x01],
        }
    }
}

/// Encode a raw 32-byte public key as `did:key`.
pub fn encode_did_key(kind: KeyKind, public_key: &[u8; 32]) -> String {
    let mut bytes = Vec::with_capacity(34);
    bytes.extend_from_slice(&kind.multicodec());
    bytes.extend_from_slice(public_key);
    format!(
        "{}{}{}",
        DID_KEY_PREFIX,
        MULTIBASE_BASE58BTC,
        bs58::encode(bytes).into_string()
    )
}

/// Decode a `did:key` of the expected kind back to raw key bytes.
pub fn decode_did_key(kind: KeyKind, did: &str) -> ChatResult<[u8; 32]> {
    let multibase = did
        .strip_prefix(DID_KEY_PREFIX)
        .ok_or_else(|| ChatError::Jwt(format!("Not a did:key: {}", did)))?;
    let encoded = multibase
        .strip_prefix(MULTIBASE_BASE58BTC)
        .ok_or_else(|| ChatError::Jwt("did:key must use base58btc ('z') multibase".to_string()))?;
    let bytes = bs58::decode(encoded)
        .into_vec()
        .map_err(|_| ChatError::Jwt("Invalid base58 encoding in did:key".to_string()))?;

    let header = kind.multicodec();
    if bytes.len() != 34 || bytes[..2] != header {
        return Err(ChatError::Jwt(format!(
            "did:key is not a {:?} public key",
            kind
        )));
    }
    let mut key = [0u8; 32];
    key.copy_from_slice(&bytes[2..]);
    Ok(key)
}

/// Hex public key to `did:key`.
pub fn did_key_from_hex(kind: KeyKind, public_key_hex: &str) -> ChatResult<String> {
    let key = crate::crypto::decode_key_hex(public_key_hex)?;
    Ok(encode_did_key(kind, &key))
}

/// `did:key` to hex public key.
pub fn hex_from_did_key(kind: KeyKind, did: &str) -> ChatResult<String> {
    Ok(hex::encode(decode_did_key(kind, did)?))
}

pub fn compose_did_pkh(account: &str) -> String {
    format!("{}{}", DID_PKH_PREFIX, account)
}

pub fn account_from_did_pkh(did: &str) -> ChatResult<String> {
    let account = did
        .strip_prefix(DID_PKH_PREFIX)
        .ok_or_else(|| ChatError::Jwt(format!("Not a did:pkh: {}", did)))?;
    AccountId::parse(account)?;
    Ok(account.to_string())
}

/// Reject anything that is not `<namespace>:<reference>:<address>`.
pub fn validate_account(account: &str) -> ChatResult<()> {
    AccountId::parse(account).map(|_| ())
}

/// A chain-qualified account, e.g. `eip155:1:0xab16...`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId {
    pub namespace: String,
    pub reference: String,
    pub address: String,
}

impl AccountId {
    pub fn parse(account: &str) -> ChatResult<Self> {
        let mut parts = account.splitn(3, ':');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(namespace), Some(reference), Some(address))
                if !namespace.is_empty() && !reference.is_empty() && !address.is_empty() =>
            {
                Ok(Self {
                    namespace: namespace.to_string(),
                    reference: reference.to_string(),
                    address: address.to_string(),
                })
            }
            _ => Err(ChatError::InvalidParams(format!(
                "Invalid account: {} (expected namespace:reference:address)",
                account
            ))),
        }
    }

    /// `namespace:reference`
    pub fn chain_id(&self) -> String {
        format!("{}:{}", self.namespace, self.reference)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.namespace, self.reference, self.address)
    }
}

impl FromStr for AccountId {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
