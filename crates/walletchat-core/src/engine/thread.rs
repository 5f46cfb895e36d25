//! Thread liveness and teardown.

use tracing::{debug, info};

use super::ChatEngine;
use crate::crypto::EncodeOptions;
use crate::error::ChatResult;
use crate::events::ChatEvent;
use crate::rpc::{ChatMethod, EmptyParams, JsonRpcRequest, JsonRpcResponse};

impl ChatEngine {
    /// Check the peer is reachable.
    ///
    /// Fails with `Timeout` if no answer arrives within the configured ping
    /// timeout, or `PeerError` if the peer answers with an error.
    pub async fn ping(&self, topic: &str) -> ChatResult<()> {
        self.require_thread(topic)?;
        let request = JsonRpcRequest::new(ChatMethod::Ping, &EmptyParams::default())?;
        let waiter = self.register_waiter(request.id);
        if let Err(e) = self
            .publish_request(topic, &request, ChatMethod::Ping, &EncodeOptions::Type0)
            .await
        {
            self.drop_waiter(request.id);
            return Err(e);
        }

        self.await_response(request.id, waiter, &format!("ping on {}", topic))
            .await?;
        debug!(%topic, "Ping answered");
        Ok(())
    }

    /// Tell the peer we are leaving, then drop the thread locally.
    pub async fn leave(&self, topic: &str) -> ChatResult<()> {
        let lock = self.locks.lock_for(topic);
        let _guard = lock.lock().await;

        self.require_thread(topic)?;
        let request = JsonRpcRequest::new(ChatMethod::Leave, &EmptyParams::default())?;
        self.publish_request(topic, &request, ChatMethod::Leave, &EncodeOptions::Type0)
            .await?;
        self.leave_chat(topic).await
    }

    pub(super) async fn on_chat_ping_request(&self, topic: &str, request: &JsonRpcRequest) -> ChatResult<()> {
        if let Err(e) = self.require_thread(topic) {
            self.respond_with_error(request.id, topic, ChatMethod::Ping, &e)
                .await;
            return Err(e);
        }
        self.send_result(request.id, topic, ChatMethod::Ping, &true)
            .await?;
        self.emit(ChatEvent::Ping {
            id: request.id,
            topic: topic.to_string(),
        });
        Ok(())
    }

    /// The peer left. Acknowledge before tearing down, since the topic key
    /// goes with the thread.
    pub(super) async fn on_chat_leave_request(&self, topic: &str, request: &JsonRpcRequest) -> ChatResult<()> {
        let lock = self.locks.lock_for(topic);
        let _guard = lock.lock().await;

        if let Err(e) = self.require_thread(topic) {
            self.respond_with_error(request.id, topic, ChatMethod::Leave, &e)
                .await;
            return Err(e);
        }
        self.send_result(request.id, topic, ChatMethod::Leave, &true)
            .await?;
        self.leave_chat(topic).await?;
        info!(%topic, "Peer left thread");
        self.emit(ChatEvent::Left {
            id: request.id,
            topic: topic.to_string(),
        });
        Ok(())
    }

    /// Responses to ping, leave and message requests wake their caller.
    pub(super) fn on_correlated_response(&self, method: ChatMethod, topic: &str, response: JsonRpcResponse) {
        debug!(id = response.id(), %topic, %method, "Response received");
        self.resolve_waiter(response);
    }
}
