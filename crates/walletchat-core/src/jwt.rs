//! DID/JWT codec
//!
//! Compact EdDSA JWTs whose issuer is the `did:key` of an account's identity
//! key. Token layout:
//!
//! ```text
//! base64url(header) . base64url(claims) . base64url(ed25519(header.claims))
//! ```
//!
//! Decoding is split from verification: [`decode`] only parses, so a
//! receiver can read `iss` and resolve the issuer's identity before checking
//! the signature with [`DecodedJwt::verify`].

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ChatResult};
use crate::identity::did::{decode_did_key, KeyKind};
use crate::identity::keypair::{verify_signature, IdentityKeyPair};
use crate::types::Media;

const JWT_ALG: &str = "EdDSA";
const JWT_TYP: &str = "JWT";
const JWT_DELIMITER: char = '.';

/// Purpose of a token; a token minted for one purpose is never accepted for
/// another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimAction {
    RegisterInvite,
    UnregisterInvite,
    UnregisterIdentity,
    InviteProposal,
    InviteApproval,
    ChatMessage,
    ChatReceipt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Issuer: ed25519 `did:key` of the signing identity
    pub iss: String,
    pub sub: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aud: Option<String>,
    /// Issued at, seconds
    pub iat: i64,
    /// Expiry, seconds
    pub exp: i64,
    pub act: ClaimAction,
    /// Keyserver URL the issuer's identity is registered with
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ksu: Option<String>,
    /// Ephemeral x25519 `did:key` (invite proposals)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pke: Option<String>,
    /// Account `did:pkh` (keyserver bindings)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pkh: Option<String>,
    /// Media attachment (chat messages)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub xma: Option<Media>,
}

impl JwtClaims {
    /// Claims issued now and valid for `ttl_secs`.
    pub fn new(act: ClaimAction, iss: impl Into<String>, sub: impl Into<String>, ttl_secs: i64) -> Self {
        let iat = now_secs();
        Self::issued_at(act, iss, sub, iat, ttl_secs)
    }

    pub fn issued_at(
        act: ClaimAction,
        iss: impl Into<String>,
        sub: impl Into<String>,
        iat: i64,
        ttl_secs: i64,
    ) -> Self {
        Self {
            iss: iss.into(),
            sub: sub.into(),
            aud: None,
            iat,
            exp: iat + ttl_secs,
            act,
            ksu: None,
            pke: None,
            pkh: None,
            xma: None,
        }
    }

    pub fn with_aud(mut self, aud: impl Into<String>) -> Self {
        self.aud = Some(aud.into());
        self
    }

    pub fn with_ksu(mut self, ksu: impl Into<String>) -> Self {
        self.ksu = Some(ksu.into());
        self
    }

    pub fn with_pke(mut self, pke: impl Into<String>) -> Self {
        self.pke = Some(pke.into());
        self
    }

    pub fn with_pkh(mut self, pkh: impl Into<String>) -> Self {
        self.pkh = Some(pkh.into());
        self
    }

    pub fn with_xma(mut self, xma: Option<Media>) -> Self {
        self.xma = xma;
        self
    }

    /// Fail unless the token was minted for `expected`.
    pub fn expect_action(&self, expected: ClaimAction) -> ChatResult<()> {
        if self.act != expected {
            return Err(ChatError::Jwt(format!(
                "Expected {:?} claim, got {:?}",
                expected, self.act
            )));
        }
        Ok(())
    }

    pub fn require_aud(&self) -> ChatResult<&str> {
        self.aud
            .as_deref()
            .ok_or_else(|| ChatError::Jwt("Missing aud claim".to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct JwtHeader {
    alg: String,
    typ: String,
}

/// Sign `claims` with the identity key.
pub fn encode(claims: &JwtClaims, keypair: &IdentityKeyPair) -> ChatResult<String> {
    let header = JwtHeader {
        alg: JWT_ALG.to_string(),
        typ: JWT_TYP.to_string(),
    };
    let header = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?);
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signing_input = format!("{}{}{}", header, JWT_DELIMITER, payload);
    let signature = URL_SAFE_NO_PAD.encode(keypair.sign(signing_input.as_bytes()));
    Ok(format!("{}{}{}", signing_input, JWT_DELIMITER, signature))
}

/// A parsed but not yet verified token.
#[derive(Debug, Clone)]
pub struct DecodedJwt {
    pub claims: JwtClaims,
    signing_input: String,
    signature: Vec<u8>,
}

/// Parse a token without checking its signature.
pub fn decode(token: &str) -> ChatResult<DecodedJwt> {
    let mut parts = token.split(JWT_DELIMITER);
    let (header, payload, signature) = match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(h), Some(p), Some(s), None) => (h, p, s),
        _ => return Err(ChatError::Jwt("Token must have three segments".to_string())),
    };

    let header: JwtHeader = serde_json::from_slice(&decode_segment(header)?)
        .map_err(|e| ChatError::Jwt(format!("Invalid header: {}", e)))?;
    if header.alg != JWT_ALG {
        return Err(ChatError::Jwt(format!("Unsupported alg: {}", header.alg)));
    }
    let claims: JwtClaims = serde_json::from_slice(&decode_segment(payload)?)
        .map_err(|e| ChatError::Jwt(format!("Invalid claims: {}", e)))?;

    let signing_input_len = token.len() - signature.len() - 1;
    Ok(DecodedJwt {
        claims,
        signing_input: token[..signing_input_len].to_string(),
        signature: decode_segment(signature)?,
    })
}

fn decode_segment(segment: &str) -> ChatResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| ChatError::Jwt(format!("Invalid base64url segment: {}", e)))
}

impl DecodedJwt {
    /// Raw ed25519 key named by `iss`.
    pub fn issuer_key(&self) -> ChatResult<[u8; 32]> {
        decode_did_key(KeyKind::Ed25519, &self.claims.iss)
    }

    /// Hex of the issuer key, the form the keyserver indexes identities by.
    pub fn issuer_key_hex(&self) -> ChatResult<String> {
        Ok(hex::encode(self.issuer_key()?))
    }

    pub fn verify_signature(&self, public_key: &[u8; 32]) -> ChatResult<()> {
        verify_signature(public_key, self.signing_input.as_bytes(), &self.signature)
    }

    pub fn check_expiry(&self, now: i64) -> ChatResult<()> {
        if self.claims.exp < now {
            return Err(ChatError::ExpiredAssertion(format!(
                "{:?} token expired at {}",
                self.claims.act, self.claims.exp
            )));
        }
        Ok(())
    }

    /// Check the signature against the `iss` key and the expiry against now.
    pub fn verify(&self) -> ChatResult<&JwtClaims> {
        self.verify_signature(&self.issuer_key()?)?;
        self.check_expiry(now_secs())?;
        Ok(&self.claims)
    }
}

/// Decode and verify against the issuer named in the token.
pub fn verify(token: &str) -> ChatResult<JwtClaims> {
    let decoded = decode(token)?;
    decoded.verify()?;
    Ok(decoded.claims)
}

/// Decode and verify against a known public key.
pub fn verify_with(token: &str, public_key: &[u8; 32]) -> ChatResult<JwtClaims> {
    let decoded = decode(token)?;
    decoded.verify_signature(public_key)?;
    decoded.check_expiry(now_secs())?;
    Ok(decoded.claims)
}

pub fn now_secs() -> i64 {
    chrono::Utc::now().timestamp()
}
