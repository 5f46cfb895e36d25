//! Identity attestation: the wallet-signed statement binding an identity key
//! to an account.
//!
//! The wallet signs a canonical sign-in message. The keyserver stores the
//! structured form (header, payload, signature), and any peer can rebuild the
//! message from the payload to check the wallet signature again.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::random_bytes;
use crate::error::{ChatError, ChatResult};
use crate::identity::did::{account_from_did_pkh, compose_did_pkh, hex_from_did_key, AccountId, KeyKind};
use crate::identity::wallet::SignatureVerifier;

const HEADER_TYPE: &str = "eip4361";
const SIGNATURE_TYPE: &str = "eip191";
const VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationHeader {
    pub t: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttestationPayload {
    /// Account `did:pkh`
    pub iss: String,
    /// Keyserver URL
    pub aud: String,
    pub domain: String,
    pub version: String,
    pub nonce: String,
    /// RFC 3339
    pub iat: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub statement: Option<String>,
    /// First entry is the identity key `did:key`
    pub resources: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttestationSignature {
    pub t: String,
    pub s: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityAttestation {
    pub h: AttestationHeader,
    pub p: AttestationPayload,
    pub s: AttestationSignature,
}

impl AttestationPayload {
    /// Build the payload to be signed for `account`.
    ///
    /// # Arguments
    ///
    /// * `account` - Account being bound
    /// * `identity_did_key` - `did:key` of the identity key
    /// * `keyserver_url` - Keyserver the attestation is posted to
    /// * `statement` - Human-readable line shown by the wallet
    /// * `ttl` - Validity window
    pub fn new(
        account: &str,
        identity_did_key: &str,
        keyserver_url: &str,
        statement: &str,
        ttl: Duration,
    ) -> ChatResult<Self> {
        AccountId::parse(account)?;
        let iat = Utc::now();
        let domain = keyserver_url
            .split_once("://")
            .map(|(_, rest)| rest)
            .unwrap_or(keyserver_url)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            iss: compose_did_pkh(account),
            aud: keyserver_url.to_string(),
            domain,
            version: VERSION.to_string(),
            nonce: hex::encode(random_bytes::<16>()),
            iat: iat.to_rfc3339(),
            exp: Some((iat + ttl).to_rfc3339()),
            statement: Some(statement.to_string()),
            resources: vec![identity_did_key.to_string()],
        })
    }

    pub fn account(&self) -> ChatResult<String> {
        account_from_did_pkh(&self.iss)
    }

    /// Hex identity key named by the first resource.
    pub fn identity_key(&self) -> ChatResult<String> {
        let did = self
            .resources
            .first()
            .ok_or_else(|| ChatError::Jwt("Attestation has no identity resource".to_string()))?;
        hex_from_did_key(KeyKind::Ed25519, did)
    }

    /// The exact text the wallet signs.
    pub fn format_message(&self) -> ChatResult<String> {
        let account = AccountId::parse(&self.account()?)?;
        let mut message = format!(
            "{} wants you to sign in with your {} account:\n{}\n",
            self.domain, account.namespace, account.address
        );
        if let Some(statement) = &self.statement {
            message.push_str(&format!("\n{}\n", statement));
        }
        message.push_str(&format!(
            "\nURI: {}\nVersion: {}\nChain ID: {}\nNonce: {}\nIssued At: {}",
            self.aud, self.version, account.reference, self.nonce, self.iat
        ));
        if let Some(exp) = &self.exp {
            message.push_str(&format!("\nExpiration Time: {}", exp));
        }
        if !self.resources.is_empty() {
            message.push_str("\nResources:");
            for resource in &self.resources {
                message.push_str(&format!("\n- {}", resource));
            }
        }
        Ok(message)
    }
}

impl IdentityAttestation {
    pub fn new(payload: AttestationPayload, signature: String) -> Self {
        Self {
            h: AttestationHeader {
                t: HEADER_TYPE.to_string(),
            },
            p: payload,
            s: AttestationSignature {
                t: SIGNATURE_TYPE.to_string(),
                s: signature,
            },
        }
    }

    pub fn check_expiry(&self, now: DateTime<Utc>) -> ChatResult<()> {
        let Some(exp) = &self.p.exp else {
            return Ok(());
        };
        let exp = DateTime::parse_from_rfc3339(exp)
            .map_err(|e| ChatError::Jwt(format!("Invalid attestation expiry: {}", e)))?;
        if exp < now {
            return Err(ChatError::ExpiredAssertion(format!(
                "Identity attestation for {} expired at {}",
                self.p.iss, exp
            )));
        }
        Ok(())
    }

    /// Check expiry and the wallet signature over the canonical message.
    pub async fn verify(&self, verifier: &dyn SignatureVerifier) -> ChatResult<()> {
        self.check_expiry(Utc::now())?;
        let account = AccountId::parse(&self.p.account()?)?;
        let message = self.p.format_message()?;
        verifier.verify(&account, &message, &self.s.s).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::keypair::IdentityKeyPair;

    fn payload() -> (AttestationPayload, IdentityKeyPair) {
        let identity = IdentityKeyPair::generate();
        let payload = AttestationPayload::new(
            "eip155:1:0xabc",
            &identity.did_key(),
            "https://keys.example.com",
            "Authorize chat",
            Duration::days(30),
        )
        .unwrap();
        (payload, identity)
    }

    #[test]
    fn test_payload_fields() {
        let (payload, identity) = payload();
        assert_eq!(payload.iss, "did:pkh:eip155:1:0xabc");
        assert_eq!(payload.domain, "keys.example.com");
        assert_eq!(payload.account().unwrap(), "eip155:1:0xabc");
        assert_eq!(payload.identity_key().unwrap(), identity.public_key_hex());
        assert_eq!(payload.nonce.len(), 32);
    }

    #[test]
    fn test_format_message() {
        let (payload, identity) = payload();
        let message = payload.format_message().unwrap();
        let lines: Vec<&str> = message.lines().collect();
        assert_eq!(
            lines[0],
            "keys.example.com wants you to sign in with your eip155 account:"
        );
        assert_eq!(lines[1], "0xabc");
        assert_eq!(lines[3], "Authorize chat");
        assert!(message.contains("\nURI: https://keys.example.com\n"));
        assert!(message.contains("\nChain ID: 1\n"));
        assert!(message.ends_with(&format!("Resources:\n- {}", identity.did_key())));
    }

    #[test]
    fn test_expiry() {
        let (mut payload, _) = payload();
        let attestation = IdentityAttestation::new(payload.clone(), "00".to_string());
        assert!(attestation.check_expiry(Utc::now()).is_ok());

        payload.exp = Some((Utc::now() - Duration::hours(1)).to_rfc3339());
        let attestation = IdentityAttestation::new(payload, "00".to_string());
        assert!(matches!(
            attestation.check_expiry(Utc::now()),
            Err(ChatError::ExpiredAssertion(_))
        ));
    }

    #[test]
    fn test_serialized_shape() {
        let (payload, _) = payload();
        let attestation = IdentityAttestation::new(payload, "sig".to_string());
        let json = serde_json::to_value(&attestation).unwrap();
        assert_eq!(json["h"]["t"], "eip4361");
        assert_eq!(json["s"]["t"], "eip191");
        assert_eq!(json["p"]["iss"], "did:pkh:eip155:1:0xabc");
    }
}
