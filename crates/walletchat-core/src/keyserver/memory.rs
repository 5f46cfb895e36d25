use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::debug;

use super::Keyserver;
use crate::error::{ChatError, ChatResult};
use crate::identity::attestation::IdentityAttestation;
use crate::identity::did::{account_from_did_pkh, decode_did_key, KeyKind};
use crate::identity::wallet::SignatureVerifier;
use crate::jwt::{self, ClaimAction, JwtClaims};

/// In-process keyserver.
///
/// Accepts an identity only if its wallet signature verifies, and an invite
/// binding only if it is signed by an identity registered for the same
/// account.
pub struct MemoryKeyserver {
    verifier: Arc<dyn SignatureVerifier>,
    /// identity key hex → attestation
    identities: RwLock<HashMap<String, IdentityAttestation>>,
    /// account → invite key did:key
    invites: RwLock<HashMap<String, String>>,
}

impl MemoryKeyserver {
    pub fn new(verifier: Arc<dyn SignatureVerifier>) -> Self {
        Self {
            verifier,
            identities: RwLock::new(HashMap::new()),
            invites: RwLock::new(HashMap::new()),
        }
    }

    /// Verify an account-bound JWT and return its claims plus the account.
    fn authorize(&self, id_auth: &str, act: ClaimAction) -> ChatResult<(JwtClaims, String)> {
        let decoded = jwt::decode(id_auth)?;
        decoded.verify()?;
        decoded.claims.expect_action(act)?;

        let pkh = decoded
            .claims
            .pkh
            .as_deref()
            .ok_or_else(|| ChatError::Jwt("Missing pkh claim".to_string()))?;
        let account = account_from_did_pkh(pkh)?;

        let identity_key = decoded.issuer_key_hex()?;
        let identities = self.identities.read();
        let attestation = identities
            .get(&identity_key)
            .ok_or_else(|| ChatError::IdentityNotFound(identity_key.clone()))?;
        if attestation.p.account()? != account {
            return Err(ChatError::SignatureInvalid(format!(
                "Identity {} is not registered for {}",
                identity_key, account
            )));
        }
        Ok((decoded.claims, account))
    }
}

#[async_trait]
impl Keyserver for MemoryKeyserver {
    async fn register_identity(&self, attestation: &IdentityAttestation) -> ChatResult<()> {
        attestation
            .verify(self.verifier.as_ref())
            .await
            .map_err(|e| ChatError::RegistrationFailed(e.to_string()))?;
        let identity_key = attestation
            .p
            .identity_key()
            .map_err(|e| ChatError::RegistrationFailed(e.to_string()))?;

        debug!(iss = %attestation.p.iss, %identity_key, "Keyserver stored identity");
        self.identities
            .write()
            .insert(identity_key, attestation.clone());
        Ok(())
    }

    async fn resolve_identity(&self, public_key: &str) -> ChatResult<IdentityAttestation> {
        self.identities
            .read()
            .get(public_key)
            .cloned()
            .ok_or_else(|| ChatError::IdentityNotFound(public_key.to_string()))
    }

    async fn unregister_identity(&self, id_auth: &str) -> ChatResult<()> {
        let (claims, account) = self
            .authorize(id_auth, ClaimAction::UnregisterIdentity)
            .map_err(|e| ChatError::Keyserver(e.to_string()))?;
        let identity_key = hex::encode(decode_did_key(KeyKind::Ed25519, &claims.iss)?);
        self.identities.write().remove(&identity_key);
        debug!(%account, "Keyserver removed identity");
        Ok(())
    }

    async fn register_invite(&self, id_auth: &str) -> ChatResult<()> {
        let (claims, account) = self
            .authorize(id_auth, ClaimAction::RegisterInvite)
            .map_err(|e| ChatError::RegistrationFailed(e.to_string()))?;
        decode_did_key(KeyKind::X25519, &claims.sub)
            .map_err(|e| ChatError::RegistrationFailed(e.to_string()))?;

        debug!(%account, "Keyserver stored invite key");
        self.invites.write().insert(account, claims.sub);
        Ok(())
    }

    async fn unregister_invite(&self, id_auth: &str) -> ChatResult<()> {
        let (_, account) = self
            .authorize(id_auth, ClaimAction::UnregisterInvite)
            .map_err(|e| ChatError::Keyserver(e.to_string()))?;
        self.invites.write().remove(&account);
        debug!(%account, "Keyserver removed invite key");
        Ok(())
    }

    async fn resolve_invite(&self, account: &str) -> ChatResult<String> {
        self.invites
            .read()
            .get(account)
            .cloned()
            .ok_or_else(|| ChatError::InviteKeyNotFound(account.to_string()))
    }
}
