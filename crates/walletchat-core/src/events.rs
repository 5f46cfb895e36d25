//! Notifications emitted to the client.

use crate::types::{Message, ReceivedInvite, SentInvite};

/// Capacity of the event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// Someone invited us
    Invite { id: u64, topic: String, invite: ReceivedInvite },
    /// Our invite was accepted; `topic` is the new thread
    InviteAccepted { id: u64, topic: String, invite: SentInvite },
    /// Our invite was declined
    InviteRejected { id: u64, topic: String, invite: SentInvite },
    /// A message arrived on a thread
    Message { id: u64, topic: String, message: Message },
    /// Peer pinged a thread
    Ping { id: u64, topic: String },
    /// Peer left a thread
    Left { id: u64, topic: String },
}

impl ChatEvent {
    /// Wire-level event name.
    pub fn name(&self) -> &'static str {
        match self {
            ChatEvent::Invite { .. } => "chat_invite",
            ChatEvent::InviteAccepted { .. } => "chat_invite_accepted",
            ChatEvent::InviteRejected { .. } => "chat_invite_rejected",
            ChatEvent::Message { .. } => "chat_message",
            ChatEvent::Ping { .. } => "chat_ping",
            ChatEvent::Left { .. } => "chat_left",
        }
    }

    pub fn topic(&self) -> &str {
        match self {
            ChatEvent::Invite { topic, .. }
            | ChatEvent::InviteAccepted { topic, .. }
            | ChatEvent::InviteRejected { topic, .. }
            | ChatEvent::Message { topic, .. }
            | ChatEvent::Ping { topic, .. }
            | ChatEvent::Left { topic, .. } => topic,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let event = ChatEvent::Ping {
            id: 1,
            topic: "t".to_string(),
        };
        assert_eq!(event.name(), "chat_ping");
        assert_eq!(event.topic(), "t");
        assert_eq!(
            ChatEvent::Left {
                id: 2,
                topic: "t".to_string()
            }
            .name(),
            "chat_left"
        );
    }
}
