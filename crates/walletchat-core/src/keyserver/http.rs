use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

use super::{CacaoBody, IdAuthBody, InviteKeyBody, Keyserver, ValueBody};
use crate::error::{ChatError, ChatResult};
use crate::identity::attestation::IdentityAttestation;

/// reqwest client for a deployed keyserver.
pub struct HttpKeyserver {
    http_client: reqwest::Client,
    base_url: String,
}

impl HttpKeyserver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn error_text(response: reqwest::Response) -> String {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        format!("{} - {}", status, body)
    }
}

#[async_trait]
impl Keyserver for HttpKeyserver {
    async fn register_identity(&self, attestation: &IdentityAttestation) -> ChatResult<()> {
        let url = self.url("/identity");
        let response = self
            .http_client
            .post(&url)
            .json(&CacaoBody {
                cacao: attestation.clone(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let error = Self::error_text(response).await;
            warn!(%url, %error, "Identity registration refused");
            return Err(ChatError::RegistrationFailed(error));
        }
        debug!(iss = %attestation.p.iss, "Registered identity");
        Ok(())
    }

    async fn resolve_identity(&self, public_key: &str) -> ChatResult<IdentityAttestation> {
        let response = self
            .http_client
            .get(self.url("/identity"))
            .query(&[("publicKey", public_key)])
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ChatError::IdentityNotFound(public_key.to_string())),
            status if status.is_success() => {
                let body: ValueBody<CacaoBody> = response.json().await?;
                Ok(body.value.cacao)
            }
            _ => Err(ChatError::Keyserver(Self::error_text(response).await)),
        }
    }

    async fn unregister_identity(&self, id_auth: &str) -> ChatResult<()> {
        let response = self
            .http_client
            .delete(self.url("/identity"))
            .json(&IdAuthBody {
                id_auth: id_auth.to_string(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ChatError::Keyserver(Self::error_text(response).await));
        }
        Ok(())
    }

    async fn register_invite(&self, id_auth: &str) -> ChatResult<()> {
        let response = self
            .http_client
            .post(self.url("/invite"))
            .json(&IdAuthBody {
                id_auth: id_auth.to_string(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ChatError::RegistrationFailed(
                Self::error_text(response).await,
            ));
        }
        Ok(())
    }

    async fn unregister_invite(&self, id_auth: &str) -> ChatResult<()> {
        let response = self
            .http_client
            .delete(self.url("/invite"))
            .json(&IdAuthBody {
                id_auth: id_auth.to_string(),
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(ChatError::Keyserver(Self::error_text(response).await));
        }
        Ok(())
    }

    async fn resolve_invite(&self, account: &str) -> ChatResult<String> {
        let response = self
            .http_client
            .get(self.url("/invite"))
            .query(&[("account", account)])
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(ChatError::InviteKeyNotFound(account.to_string())),
            status if status.is_success() => {
                let body: ValueBody<InviteKeyBody> = response.json().await?;
                Ok(body.value.invite_key)
            }
            _ => Err(ChatError::Keyserver(Self::error_text(response).await)),
        }
    }
}
