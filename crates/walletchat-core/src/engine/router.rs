//! Relay event router.
//!
//! Every inbound envelope passes through here: decode, drop redeliveries,
//! then dispatch by method. Handler errors are logged, never fatal, so one
//! bad message cannot stall the stream.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, trace, warn};

use super::ChatEngine;
use crate::error::ChatResult;
use crate::rpc::{ChatMethod, JsonRpcPayload, JsonRpcRequest, JsonRpcResponse};
use crate::transport::RelayMessage;

impl ChatEngine {
    /// Drain the transport's inbound stream until it closes.
    pub async fn run_relay_listener(self: Arc<Self>, mut inbound: mpsc::UnboundedReceiver<RelayMessage>) {
        debug!("Relay listener started");
        while let Some(message) = inbound.recv().await {
            if let Err(e) = self.handle_relay_message(&message).await {
                error!(topic = %message.topic, error = %e, "Failed to handle relay message");
            }
        }
        debug!("Relay listener stopped");
    }

    /// Decode one envelope and route it.
    pub async fn handle_relay_message(&self, message: &RelayMessage) -> ChatResult<()> {
        let account = match self.current_account() {
            Ok(account) if self.identity.has_identity(&account) => account,
            _ => {
                debug!(topic = %message.topic, "No identity registered, dropping relay message");
                return Ok(());
            }
        };
        // Only invites need it; thread traffic still flows without one
        let invite_key = self.identity.get_invite_key(&account).ok();

        let payload = self
            .crypto
            .decode(&message.topic, &message.message, invite_key.as_deref())?;
        match payload {
            JsonRpcPayload::Request(request) => {
                if !self.history.mark_received(&message.topic, &request) {
                    trace!(id = request.id, topic = %message.topic, "Duplicate request dropped");
                    return Ok(());
                }
                self.on_relay_request(&message.topic, &request, message.published_at)
                    .await
            }
            JsonRpcPayload::Response(response) => {
                self.on_relay_response(&message.topic, response).await
            }
        }
    }

    async fn on_relay_request(&self, topic: &str, request: &JsonRpcRequest, published_at: i64) -> ChatResult<()> {
        let method = match ChatMethod::from_method(&request.method) {
            Ok(method) => method,
            Err(e) => {
                warn!(id = request.id, %topic, error = %e, "Ignoring request");
                return Ok(());
            }
        };
        trace!(id = request.id, %topic, %method, "Routing request");

        match method {
            ChatMethod::Invite => self.on_incoming_invite(topic, request, published_at).await,
            ChatMethod::Message => self.on_incoming_message(topic, request).await,
            ChatMethod::Leave => self.on_chat_leave_request(topic, request).await,
            ChatMethod::Ping => self.on_chat_ping_request(topic, request).await,
        }
    }

    async fn on_relay_response(&self, topic: &str, response: JsonRpcResponse) -> ChatResult<()> {
        let method = match self.history.resolve(&response) {
            Some(record) => match ChatMethod::from_method(&record.request.method) {
                Ok(method) => method,
                Err(e) => {
                    warn!(id = response.id(), %topic, error = %e, "Ignoring response");
                    return Ok(());
                }
            },
            // The history does not survive a restart; sent invites do
            None if self.sent_invites.contains(topic)? => {
                debug!(id = response.id(), %topic, "Unrecorded response on an invite response topic");
                ChatMethod::Invite
            }
            None => {
                debug!(id = response.id(), %topic, "Response to unknown request dropped");
                return Ok(());
            }
        };
        trace!(id = response.id(), %topic, %method, "Routing response");

        match method {
            ChatMethod::Invite => self.on_invite_response(topic, response).await,
            ChatMethod::Message | ChatMethod::Ping | ChatMethod::Leave => {
                self.on_correlated_response(method, topic, response);
                Ok(())
            }
        }
    }
}
