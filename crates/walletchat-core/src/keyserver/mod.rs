//! Identity and invite-key directory.
//!
//! The keyserver maps identity public keys to wallet-signed attestations and
//! accounts to their published invite keys. [`HttpKeyserver`] talks to a
//! deployed directory. [`MemoryKeyserver`] is an in-process replica with the
//! same acceptance rules.

mod http;
mod memory;

pub use http::HttpKeyserver;
pub use memory::MemoryKeyserver;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChatResult;
use crate::identity::attestation::IdentityAttestation;

#[async_trait]
pub trait Keyserver: Send + Sync {
    /// `POST /identity`. Fails with `RegistrationFailed` if refused.
    async fn register_identity(&self, attestation: &IdentityAttestation) -> ChatResult<()>;

    /// `GET /identity?publicKey=`. Fails with `IdentityNotFound` on 404.
    async fn resolve_identity(&self, public_key: &str) -> ChatResult<IdentityAttestation>;

    /// `DELETE /identity` with an `unregister_identity` JWT.
    async fn unregister_identity(&self, id_auth: &str) -> ChatResult<()>;

    /// `POST /invite` with a `register_invite` JWT.
    async fn register_invite(&self, id_auth: &str) -> ChatResult<()>;

    /// `DELETE /invite` with an `unregister_invite` JWT.
    async fn unregister_invite(&self, id_auth: &str) -> ChatResult<()>;

    /// `GET /invite?account=`: the account's invite key as an x25519 `did:key`.
    /// Fails with `InviteKeyNotFound` on 404.
    async fn resolve_invite(&self, account: &str) -> ChatResult<String>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct CacaoBody {
    pub cacao: IdentityAttestation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct IdAuthBody {
    pub id_auth: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InviteKeyBody {
    pub invite_key: String,
}

/// Keyserver responses wrap their payload in `{"value": ...}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct ValueBody<T> {
    pub value: T,
}
