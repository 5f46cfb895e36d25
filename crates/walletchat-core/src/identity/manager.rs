//! Identity and invite-key lifecycle per account.
//!
//! Each account owns one ed25519 identity key and at most one x25519 invite
//! key. Private halves stay in the keychain. Only the public halves go to the
//! keyserver.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::crypto::Crypto;
use crate::error::{ChatError, ChatResult};
use crate::identity::attestation::{AttestationPayload, IdentityAttestation};
use crate::identity::did::{compose_did_pkh, did_key_from_hex, hex_from_did_key, validate_account, KeyKind};
use crate::identity::keypair::IdentityKeyPair;
use crate::identity::wallet::MessageSigner;
use crate::jwt::{self, ClaimAction, JwtClaims};
use crate::keyserver::Keyserver;
use crate::store::Store;
use crate::types::{IdentityKeyRecord, InviteKeyRecord};

pub struct IdentityKeys {
    config: ChatConfig,
    keyserver: Arc<dyn Keyserver>,
    crypto: Arc<Crypto>,
    identity_keys: Arc<dyn Store<IdentityKeyRecord>>,
    invite_keys: Arc<dyn Store<InviteKeyRecord>>,
}

impl IdentityKeys {
    pub fn new(
        config: ChatConfig,
        keyserver: Arc<dyn Keyserver>,
        crypto: Arc<Crypto>,
        identity_keys: Arc<dyn Store<IdentityKeyRecord>>,
        invite_keys: Arc<dyn Store<InviteKeyRecord>>,
    ) -> Self {
        Self {
            config,
            keyserver,
            crypto,
            identity_keys,
            invite_keys,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Identity key
    // ═══════════════════════════════════════════════════════════════════════

    /// Register an identity key for `account`, or return the existing one.
    ///
    /// The wallet signs the attestation through `signer`. Nothing is stored
    /// locally until the keyserver accepts it, so a failed registration can
    /// simply be retried.
    ///
    /// # Returns
    ///
    /// The identity public key (hex).
    pub async fn register_identity(
        &self,
        account: &str,
        signer: &dyn MessageSigner,
    ) -> ChatResult<String> {
        validate_account(account)?;
        if let Some(existing) = self.identity_keys.get(account)? {
            debug!(%account, "Identity already registered");
            return Ok(existing.identity_key);
        }

        let keypair = IdentityKeyPair::generate();
        let payload = AttestationPayload::new(
            account,
            &keypair.did_key(),
            &self.config.keyserver_url,
            &self.config.attestation_statement,
            self.config.attestation_ttl(),
        )?;
        let signature = signer.sign_message(&payload.format_message()?).await?;
        self.keyserver
            .register_identity(&IdentityAttestation::new(payload, signature))
            .await?;

        let identity_key = keypair.public_key_hex();
        self.crypto.keychain_set(&identity_key, &keypair.seed_hex())?;
        self.identity_keys.set(
            account,
            IdentityKeyRecord {
                account: account.to_string(),
                identity_key: identity_key.clone(),
            },
        )?;
        info!(%account, %identity_key, "Registered identity");
        Ok(identity_key)
    }

    /// Identity public key (hex) registered for `account`.
    pub fn get_identity(&self, account: &str) -> ChatResult<String> {
        self.identity_keys
            .get(account)?
            .map(|record| record.identity_key)
            .ok_or_else(|| ChatError::IdentityNotFound(account.to_string()))
    }

    pub fn has_identity(&self, account: &str) -> bool {
        self.get_identity(account).is_ok()
    }

    fn identity_keypair(&self, account: &str) -> ChatResult<IdentityKeyPair> {
        let identity_key = self.get_identity(account)?;
        IdentityKeyPair::from_seed_hex(&self.crypto.keychain_get(&identity_key)?)
    }

    /// `did:key` of the account's identity key.
    pub fn identity_did_key(&self, account: &str) -> ChatResult<String> {
        did_key_from_hex(KeyKind::Ed25519, &self.get_identity(account)?)
    }

    /// Sign `claims` with the account's identity key.
    pub fn generate_id_auth(&self, account: &str, claims: &JwtClaims) -> ChatResult<String> {
        jwt::encode(claims, &self.identity_keypair(account)?)
    }

    /// Claims issued by `account` with the configured expiry and keyserver.
    pub fn claims(&self, account: &str, act: ClaimAction, sub: impl Into<String>) -> ChatResult<JwtClaims> {
        Ok(JwtClaims::new(
            act,
            self.identity_did_key(account)?,
            sub,
            self.config.jwt_expiry_secs,
        )
        .with_ksu(&self.config.keyserver_url))
    }

    /// Remove the identity from the keyserver and forget it locally, together
    /// with the account's invite key.
    pub async fn unregister_identity(&self, account: &str) -> ChatResult<()> {
        let claims = self
            .claims(account, ClaimAction::UnregisterIdentity, "")?
            .with_pkh(compose_did_pkh(account));
        let id_auth = self.generate_id_auth(account, &claims)?;

        if self.invite_keys.contains(account)? {
            self.unregister_invite_key(account).await?;
        }
        self.keyserver.unregister_identity(&id_auth).await?;

        let identity_key = self.get_identity(account)?;
        self.crypto.keychain_delete(&identity_key, "identity unregistered")?;
        self.identity_keys.delete(account, "identity unregistered")?;
        info!(%account, "Unregistered identity");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Invite key
    // ═══════════════════════════════════════════════════════════════════════

    /// Ensure an invite key exists for `account`; publish it unless private.
    ///
    /// A failed publish does not fail the call: the key exists locally and the
    /// failure is logged. Use [`IdentityKeys::publish_invite_key`] directly to
    /// observe the outcome.
    ///
    /// # Returns
    ///
    /// The invite public key (hex).
    pub async fn register_invite_key(&self, account: &str, is_private: bool) -> ChatResult<String> {
        self.get_identity(account)?;

        let record = match self.invite_keys.get(account)? {
            Some(record) => record,
            None => {
                let invite_key = self.crypto.generate_key_pair()?;
                let record = InviteKeyRecord {
                    account: account.to_string(),
                    invite_key,
                    is_private,
                };
                self.invite_keys.set(account, record.clone())?;
                info!(%account, invite_key = %record.invite_key, "Generated invite key");
                record
            }
        };

        if !is_private {
            if let Err(e) = self.publish_invite_key(account, &record.invite_key).await {
                warn!(%account, error = %e, "Failed to publish invite key");
            }
        }
        if record.is_private != is_private {
            self.invite_keys
                .update(account, &mut |r| r.is_private = is_private)?;
        }
        Ok(record.invite_key)
    }

    /// Publish the invite key binding to the keyserver.
    pub async fn publish_invite_key(&self, account: &str, invite_key: &str) -> ChatResult<()> {
        let claims = self
            .claims(
                account,
                ClaimAction::RegisterInvite,
                did_key_from_hex(KeyKind::X25519, invite_key)?,
            )?
            .with_aud(&self.config.keyserver_url)
            .with_pkh(compose_did_pkh(account));
        let id_auth = self.generate_id_auth(account, &claims)?;
        self.keyserver.register_invite(&id_auth).await?;
        debug!(%account, "Published invite key");
        Ok(())
    }

    /// Withdraw the invite key from the keyserver and discard it, so the next
    /// registration rotates to a fresh key. The identity key is untouched.
    ///
    /// # Returns
    ///
    /// The discarded invite public key (hex).
    pub async fn unregister_invite_key(&self, account: &str) -> ChatResult<String> {
        let record = self.invite_key_record(account)?;
        let claims = self
            .claims(
                account,
                ClaimAction::UnregisterInvite,
                did_key_from_hex(KeyKind::X25519, &record.invite_key)?,
            )?
            .with_aud(&self.config.keyserver_url)
            .with_pkh(compose_did_pkh(account));
        let id_auth = self.generate_id_auth(account, &claims)?;
        self.keyserver.unregister_invite(&id_auth).await?;

        self.crypto.delete_key_pair(&record.invite_key)?;
        self.invite_keys.delete(account, "invite key unregistered")?;
        info!(%account, "Unregistered invite key");
        Ok(record.invite_key)
    }

    pub fn invite_key_record(&self, account: &str) -> ChatResult<InviteKeyRecord> {
        self.invite_keys
            .get(account)?
            .ok_or_else(|| ChatError::InviteKeyNotFound(account.to_string()))
    }

    /// Local invite public key (hex) for `account`.
    pub fn get_invite_key(&self, account: &str) -> ChatResult<String> {
        Ok(self.invite_key_record(account)?.invite_key)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Resolution
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn resolve_identity(&self, public_key: &str) -> ChatResult<IdentityAttestation> {
        self.keyserver.resolve_identity(public_key).await
    }

    /// Published invite key (hex) of any account.
    pub async fn resolve_invite_key(&self, account: &str) -> ChatResult<String> {
        validate_account(account)?;
        let did_key = self.keyserver.resolve_invite(account).await?;
        hex_from_did_key(KeyKind::X25519, &did_key)
    }
}
