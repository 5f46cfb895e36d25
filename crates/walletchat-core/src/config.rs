//! Client configuration

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ChatResult;

pub const DEFAULT_KEYSERVER_URL: &str = "https://keys.walletconnect.com";
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_JWT_EXPIRY_SECS: i64 = 24 * 60 * 60;
pub const DEFAULT_ATTESTATION_TTL_DAYS: i64 = 30;
pub const DEFAULT_ATTESTATION_STATEMENT: &str =
    "I further authorize this app to send and receive messages on my behalf using my identity key.";

const KEYSERVER_URL_ENV: &str = "WALLETCHAT_KEYSERVER_URL";
const PING_TIMEOUT_ENV: &str = "WALLETCHAT_PING_TIMEOUT_MS";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Base URL of the identity/invite keyserver
    pub keyserver_url: String,
    /// Bounded wait for ping and confirmed-send responses
    pub ping_timeout_ms: u64,
    /// Lifetime of every JWT this client signs
    pub jwt_expiry_secs: i64,
    /// Lifetime of identity attestations
    pub attestation_ttl_days: i64,
    /// Statement line shown by the wallet when signing the attestation
    pub attestation_statement: String,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            keyserver_url: DEFAULT_KEYSERVER_URL.to_string(),
            ping_timeout_ms: DEFAULT_PING_TIMEOUT_MS,
            jwt_expiry_secs: DEFAULT_JWT_EXPIRY_SECS,
            attestation_ttl_days: DEFAULT_ATTESTATION_TTL_DAYS,
            attestation_statement: DEFAULT_ATTESTATION_STATEMENT.to_string(),
        }
    }
}

impl ChatConfig {
    /// Defaults overridden by `WALLETCHAT_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(url) = std::env::var(KEYSERVER_URL_ENV) {
            config.keyserver_url = url;
        }
        if let Some(ms) = std::env::var(PING_TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
        {
            config.ping_timeout_ms = ms;
        }
        config
    }

    /// Load from a JSON file; missing fields take defaults.
    pub fn load(path: impl AsRef<Path>) -> ChatResult<Self> {
        let data = std::fs::read(path)?;
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn with_keyserver_url(mut self, url: impl Into<String>) -> Self {
        self.keyserver_url = url.into();
        self
    }

    pub fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_jwt_expiry_secs(mut self, secs: i64) -> Self {
        self.jwt_expiry_secs = secs;
        self
    }

    pub fn ping_timeout(&self) -> Duration {
        Duration::from_millis(self.ping_timeout_ms)
    }

    pub fn attestation_ttl(&self) -> chrono::Duration {
        chrono::Duration::days(self.attestation_ttl_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults() {
        let config = ChatConfig::default();
        assert_eq!(config.keyserver_url, DEFAULT_KEYSERVER_URL);
        assert_eq!(config.ping_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_builders() {
        let config = ChatConfig::default()
            .with_keyserver_url("http://localhost:8080")
            .with_ping_timeout(Duration::from_millis(250))
            .with_jwt_expiry_secs(60);
        assert_eq!(config.keyserver_url, "http://localhost:8080");
        assert_eq!(config.ping_timeout_ms, 250);
        assert_eq!(config.jwt_expiry_secs, 60);
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("chat.json");
        std::fs::write(&path, r#"{"ping_timeout_ms": 500}"#).unwrap();
        let config = ChatConfig::load(&path).unwrap();
        assert_eq!(config.ping_timeout_ms, 500);
        assert_eq!(config.keyserver_url, DEFAULT_KEYSERVER_URL);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempdir().unwrap();
        assert!(ChatConfig::load(dir.path().join("nope.json")).is_err());
    }
}
