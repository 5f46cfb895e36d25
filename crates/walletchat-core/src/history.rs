//! JSON-RPC request/response log.
//!
//! Sent requests are kept until their response arrives, so the response can be
//! mapped back to the method that produced it. Handshake responses arrive on a
//! derived topic rather than the request's topic, so lookups match by id.
//!
//! Received requests are remembered by id only, to drop relay redeliveries.
//! Every entry expires with the relay TTL of its method: past that point the
//! relay no longer holds the message and cannot deliver it again.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::error::{ChatError, ChatResult};
use crate::rpc::{ChatMethod, JsonRpcRequest, JsonRpcResponse};

/// TTL for requests whose method is outside the chat protocol.
const UNKNOWN_METHOD_TTL_SECS: u64 = 24 * 60 * 60;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRecord {
    pub id: u64,
    pub topic: String,
    pub request: JsonRpcRequest,
    pub response: Option<JsonRpcResponse>,
    /// Milliseconds since epoch
    pub expires_at: i64,
}

#[derive(Debug, Clone)]
struct SeenRequest {
    topic: String,
    expires_at: i64,
}

#[derive(Default)]
struct HistoryState {
    sent: HashMap<u64, JsonRpcRecord>,
    received: HashMap<u64, SeenRequest>,
}

impl HistoryState {
    fn prune(&mut self, now: i64) {
        let before = self.sent.len() + self.received.len();
        self.sent.retain(|_, r| r.expires_at > now);
        self.received.retain(|_, r| r.expires_at > now);
        let pruned = before - self.sent.len() - self.received.len();
        if pruned > 0 {
            trace!(pruned, "Expired history entries");
        }
    }
}

#[derive(Default)]
pub struct JsonRpcHistory {
    state: RwLock<HistoryState>,
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn expiry_for(request: &JsonRpcRequest, now: i64) -> i64 {
    let ttl = ChatMethod::from_method(&request.method)
        .map(|m| m.request_options().ttl)
        .unwrap_or(UNKNOWN_METHOD_TTL_SECS);
    now + (ttl as i64) * 1000
}

impl JsonRpcHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a request we sent and expect a response to.
    pub fn set(&self, topic: &str, request: &JsonRpcRequest) {
        self.set_at(topic, request, now_millis());
    }

    fn set_at(&self, topic: &str, request: &JsonRpcRequest, now: i64) {
        let mut state = self.state.write();
        state.prune(now);
        state.sent.insert(
            request.id,
            JsonRpcRecord {
                id: request.id,
                topic: topic.to_string(),
                request: request.clone(),
                response: None,
                expires_at: expiry_for(request, now),
            },
        );
    }

    /// Remember an inbound request.
    ///
    /// Returns `false` if a request with this id was already seen on the same
    /// topic, i.e. the relay redelivered it.
    pub fn mark_received(&self, topic: &str, request: &JsonRpcRequest) -> bool {
        self.mark_received_at(topic, request, now_millis())
    }

    fn mark_received_at(&self, topic: &str, request: &JsonRpcRequest, now: i64) -> bool {
        let mut state = self.state.write();
        state.prune(now);
        if let Some(seen) = state.received.get(&request.id) {
            if seen.topic == topic {
                trace!(id = request.id, %topic, "Request already seen");
                return false;
            }
        }
        state.received.insert(
            request.id,
            SeenRequest {
                topic: topic.to_string(),
                expires_at: expiry_for(request, now),
            },
        );
        true
    }

    /// Take the sent request a response answers, with the response attached.
    ///
    /// The record leaves the history: a second response to the same id finds
    /// nothing.
    pub fn resolve(&self, response: &JsonRpcResponse) -> Option<JsonRpcRecord> {
        let mut state = self.state.write();
        match state.sent.remove(&response.id()) {
            Some(mut record) => {
                record.response = Some(response.clone());
                Some(record)
            }
            None => {
                debug!(id = response.id(), "Response for unrecorded request");
                None
            }
        }
    }

    /// The sent request `id` still awaiting a response. `topic` is where the
    /// response arrived.
    pub fn get(&self, topic: &str, id: u64) -> ChatResult<JsonRpcRecord> {
        self.state
            .read()
            .sent
            .get(&id)
            .cloned()
            .ok_or_else(|| ChatError::NotFound {
                context: "history".to_string(),
                key: format!("{} on {}", id, topic),
            })
    }

    /// Sent requests on `topic` still waiting for a response.
    pub fn pending(&self, topic: &str) -> Vec<JsonRpcRecord> {
        self.state
            .read()
            .sent
            .values()
            .filter(|r| r.topic == topic)
            .cloned()
            .collect()
    }

    /// Entries held, sent and received.
    pub fn len(&self) -> usize {
        let state = self.state.read();
        state.sent.len() + state.received.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry on `topic`.
    pub fn delete(&self, topic: &str) {
        let mut state = self.state.write();
        state.sent.retain(|_, r| r.topic != topic);
        state.received.retain(|_, r| r.topic != topic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{EmptyParams, MessageParams};

    fn ping() -> JsonRpcRequest {
        JsonRpcRequest::new(ChatMethod::Ping, &EmptyParams::default()).unwrap()
    }

    fn message() -> JsonRpcRequest {
        JsonRpcRequest::new(
            ChatMethod::Message,
            &MessageParams {
                message_auth: "token".to_string(),
            },
        )
        .unwrap()
    }

    #[test]
    fn test_set_get_resolve() {
        let history = JsonRpcHistory::new();
        let request = ping();
        history.set("thread", &request);
        assert_eq!(history.pending("thread").len(), 1);
        assert_eq!(history.get("thread", request.id).unwrap().request.method, "wc_chatPing");

        let response = JsonRpcResponse::result(request.id, &true).unwrap();
        let record = history.resolve(&response).unwrap();
        assert_eq!(record.request.method, "wc_chatPing");
        assert_eq!(record.response, Some(response.clone()));

        // Resolved records leave the history
        assert!(history.pending("thread").is_empty());
        assert!(history.is_empty());
        assert!(history.resolve(&response).is_none());
    }

    #[test]
    fn test_lookup_ignores_response_topic() {
        let history = JsonRpcHistory::new();
        let request = ping();
        history.set("invite-topic", &request);
        let record = history.get("response-topic", request.id).unwrap();
        assert_eq!(record.topic, "invite-topic");
    }

    #[test]
    fn test_duplicate_request_detected() {
        let history = JsonRpcHistory::new();
        let request = ping();
        assert!(history.mark_received("t", &request));
        assert!(!history.mark_received("t", &request));
        assert!(history.mark_received("other", &request));
    }

    #[test]
    fn test_missing_and_delete() {
        let history = JsonRpcHistory::new();
        assert!(matches!(
            history.get("t", 1),
            Err(ChatError::NotFound { .. })
        ));
        let sent = ping();
        let received = message();
        history.set("t", &sent);
        history.mark_received("t", &received);
        history.delete("t");
        assert!(history.get("t", sent.id).is_err());
        assert!(history.is_empty());
    }

    #[test]
    fn test_round_trips_leave_nothing_behind() {
        let history = JsonRpcHistory::new();
        for _ in 0..100 {
            let request = message();
            history.set("thread", &request);
            history.resolve(&JsonRpcResponse::result(request.id, &true).unwrap());
        }
        assert!(history.is_empty());
    }

    #[test]
    fn test_entries_expire_with_method_ttl() {
        let history = JsonRpcHistory::new();
        let now = now_millis();
        let ping = ping();
        let message = message();
        history.set_at("t", &ping, now);
        history.mark_received_at("t", &message, now);
        assert_eq!(history.len(), 2);

        // Ping lives 30 s on the relay, messages a day
        history.mark_received_at("t", &self::ping(), now + 31_000);
        assert!(history.get("t", ping.id).is_err());
        assert_eq!(history.len(), 2);

        let day_later = now + 24 * 60 * 60 * 1000 + 1;
        history.set_at("t", &self::message(), day_later);
        assert_eq!(history.len(), 1);
        // An expired id is no longer treated as a redelivery
        assert!(history.mark_received_at("t", &message, day_later));
    }
}
