//! Records held by the engine's stores.

use serde::{Deserialize, Serialize};

use crate::error::{ChatError, ChatResult};
use crate::identity::did::validate_account;

pub const MAX_INVITE_MESSAGE_LENGTH: usize = 200;
pub const MAX_MESSAGE_LENGTH: usize = 2000;
pub const MAX_MEDIA_TYPE_LENGTH: usize = 20;
pub const MAX_MEDIA_DATA_LENGTH: usize = 500;

fn check_length(field: &str, value: &str, max: usize) -> ChatResult<()> {
    let len = value.chars().count();
    if len > max {
        return Err(ChatError::InvalidParams(format!(
            "{} too long: {} > {}",
            field, len, max
        )));
    }
    Ok(())
}

/// Handshake status, shared by both sides of an invite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InviteStatus {
    Pending,
    Approved,
    Rejected,
}

/// Outbound invite intent. Not persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invite {
    pub message: String,
    pub inviter_account: String,
    pub invitee_account: String,
    /// Invitee's invite public key (hex), as resolved from the keyserver
    pub invitee_public_key: String,
}

impl Invite {
    pub fn validate(&self) -> ChatResult<()> {
        check_length("invite message", &self.message, MAX_INVITE_MESSAGE_LENGTH)?;
        validate_account(&self.inviter_account)?;
        validate_account(&self.invitee_account)?;
        crate::crypto::decode_key_hex(&self.invitee_public_key)?;
        Ok(())
    }
}

/// Invite we sent, keyed by its response topic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SentInvite {
    pub id: u64,
    pub message: String,
    pub inviter_account: String,
    pub invitee_account: String,
    pub status: InviteStatus,
    pub timestamp: i64,
    pub response_topic: String,
    /// Ephemeral key Y, public half (hex)
    pub inviter_pub_key_y: String,
    /// Ephemeral key Y, private half (hex)
    pub inviter_priv_key_y: String,
    /// DH(Y, invitee invite key), hex
    pub sym_key: String,
}

/// Invite we received, keyed by request id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivedInvite {
    pub id: u64,
    pub message: String,
    pub inviter_account: String,
    pub invitee_account: String,
    pub status: InviteStatus,
    pub timestamp: i64,
    /// Inviter's ephemeral key Y (hex)
    pub inviter_public_key: String,
    /// Our invite key X (hex)
    pub invitee_public_key: String,
}

/// An established two-party channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub topic: String,
    pub self_account: String,
    pub peer_account: String,
    /// Hex thread key
    pub sym_key: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Media {
    #[serde(rename = "type")]
    pub kind: String,
    pub data: String,
}

impl Media {
    pub fn validate(&self) -> ChatResult<()> {
        check_length("media type", &self.kind, MAX_MEDIA_TYPE_LENGTH)?;
        check_length("media data", &self.data, MAX_MEDIA_DATA_LENGTH)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub topic: String,
    pub message: String,
    pub author_account: String,
    /// Milliseconds
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media: Option<Media>,
}

impl Message {
    pub fn validate(&self) -> ChatResult<()> {
        check_length("message", &self.message, MAX_MESSAGE_LENGTH)?;
        validate_account(&self.author_account)?;
        if let Some(media) = &self.media {
            media.validate()?;
        }
        Ok(())
    }
}

/// Messages of one thread in arrival order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageLog {
    pub topic: String,
    pub messages: Vec<Message>,
}

impl MessageLog {
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            messages: Vec::new(),
        }
    }
}

/// Account → identity public key (hex). Private half lives in the keychain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentityKeyRecord {
    pub account: String,
    pub identity_key: String,
}

/// Account → invite public key (hex). Private half lives in the keychain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InviteKeyRecord {
    pub account: String,
    pub invite_key: String,
    pub is_private: bool,
}
