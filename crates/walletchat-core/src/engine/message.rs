//! Message exchange on established threads.

use serde_json::Value;
use tracing::{debug, info, warn};

use super::{ChatEngine, ResponseReceiver};
use crate::crypto::{hash_message, EncodeOptions};
use crate::error::{ChatError, ChatResult};
use crate::events::ChatEvent;
use crate::identity::did::{account_from_did_pkh, compose_did_pkh};
use crate::jwt::{self, ClaimAction, JwtClaims};
use crate::rpc::{ChatMethod, JsonRpcRequest, MessageParams, ReceiptResult};
use crate::types::{Message, Thread};

/// Outcome of a confirmed send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub id: u64,
    /// The peer returned a signed receipt for this exact text
    pub receipt_verified: bool,
}

impl ChatEngine {
    /// Send a message on a thread.
    ///
    /// # Arguments
    ///
    /// * `message` - Topic, text, author, timestamp (ms) and optional media.
    ///   The author must be the thread's own account.
    ///
    /// # Returns
    ///
    /// The request id.
    pub async fn send_message(&self, message: Message) -> ChatResult<u64> {
        let (request, _, _) = self.publish_message(message, false).await?;
        Ok(request.id)
    }

    /// Send a message and wait for the peer's receipt, bounded by the ping
    /// timeout. The message is in the local log whatever the outcome.
    pub async fn send_message_with_receipt(&self, message: Message) -> ChatResult<Delivery> {
        let text = message.message.clone();
        let (request, thread, waiter) = self.publish_message(message, true).await?;
        let waiter = waiter.ok_or_else(|| {
            ChatError::Transport(format!("No receipt waiter for {}", request.id))
        })?;

        let value = self
            .await_response(request.id, waiter, &format!("receipt for {}", request.id))
            .await?;
        let receipt_verified = match value {
            Value::Bool(true) => false,
            value => {
                let receipt: ReceiptResult = serde_json::from_value(value).map_err(|e| {
                    ChatError::InvalidParams(format!("Invalid receipt: {}", e))
                })?;
                self.verify_receipt(&thread, &text, &receipt).await?;
                true
            }
        };
        debug!(id = request.id, receipt_verified, "Message delivered");
        Ok(Delivery {
            id: request.id,
            receipt_verified,
        })
    }

    /// Publish under the topic lock, then append.
    ///
    /// With `await_receipt` the response waiter is registered before the
    /// request leaves, so a fast answer is never missed.
    async fn publish_message(
        &self,
        message: Message,
        await_receipt: bool,
    ) -> ChatResult<(JsonRpcRequest, Thread, Option<ResponseReceiver>)> {
        message.validate()?;
        let lock = self.locks.lock_for(&message.topic);
        let _guard = lock.lock().await;

        let thread = self.require_thread(&message.topic)?;
        if message.author_account != thread.self_account {
            return Err(ChatError::InvalidParams(format!(
                "{} cannot post as {} on {}",
                thread.self_account, message.author_account, thread.topic
            )));
        }

        let claims = JwtClaims::issued_at(
            ClaimAction::ChatMessage,
            self.identity.identity_did_key(&thread.self_account)?,
            &message.message,
            message.timestamp / 1000,
            self.config.jwt_expiry_secs,
        )
        .with_ksu(&self.config.keyserver_url)
        .with_aud(compose_did_pkh(&thread.peer_account))
        .with_xma(message.media.clone());
        let message_auth = self.identity.generate_id_auth(&thread.self_account, &claims)?;
        let request = JsonRpcRequest::new(ChatMethod::Message, &MessageParams { message_auth })?;

        let waiter = await_receipt.then(|| self.register_waiter(request.id));
        if let Err(e) = self
            .publish_request(&thread.topic, &request, ChatMethod::Message, &EncodeOptions::Type0)
            .await
        {
            self.drop_waiter(request.id);
            return Err(e);
        }
        self.append_message(message)?;
        info!(id = request.id, topic = %thread.topic, "Sent message");
        Ok((request, thread, waiter))
    }

    async fn verify_receipt(&self, thread: &Thread, text: &str, receipt: &ReceiptResult) -> ChatResult<()> {
        let decoded = jwt::decode(&receipt.receipt_auth)?;
        let signer = self.authenticate(&decoded, ClaimAction::ChatReceipt).await?;
        if signer != thread.peer_account {
            return Err(ChatError::SignatureInvalid(format!(
                "Receipt signed by {}, expected {}",
                signer, thread.peer_account
            )));
        }
        if decoded.claims.sub != hash_message(text) {
            return Err(ChatError::SignatureInvalid(
                "Receipt does not match the sent message".to_string(),
            ));
        }
        Ok(())
    }

    /// Handle a message arriving on a thread.
    pub(super) async fn on_incoming_message(&self, topic: &str, request: &JsonRpcRequest) -> ChatResult<()> {
        let lock = self.locks.lock_for(topic);
        let received = {
            let _guard = lock.lock().await;
            self.receive_message(topic, request).await
        };

        let (message, thread) = match received {
            Ok(received) => received,
            Err(e) => {
                self.respond_with_error(request.id, topic, ChatMethod::Message, &e)
                    .await;
                return Err(e);
            }
        };

        info!(id = request.id, %topic, author = %message.author_account, "Received message");
        let author = message.author_account.clone();
        let text = message.message.clone();
        self.emit(ChatEvent::Message {
            id: request.id,
            topic: topic.to_string(),
            message,
        });

        if author == thread.peer_account {
            match self.build_receipt(&thread, &text) {
                Ok(receipt) => {
                    return self
                        .send_result(request.id, topic, ChatMethod::Message, &receipt)
                        .await
                }
                Err(e) => warn!(%topic, error = %e, "Cannot sign receipt, acknowledging without one"),
            }
        }
        self.send_result(request.id, topic, ChatMethod::Message, &true)
            .await
    }

    /// Verify and store an inbound message.
    async fn receive_message(&self, topic: &str, request: &JsonRpcRequest) -> ChatResult<(Message, Thread)> {
        let thread = self.require_thread(topic)?;
        let params: MessageParams = request.params()?;
        let decoded = jwt::decode(&params.message_auth)?;
        let author = self.authenticate(&decoded, ClaimAction::ChatMessage).await?;

        let recipient = if author == thread.peer_account {
            &thread.self_account
        } else if author == thread.self_account {
            &thread.peer_account
        } else {
            return Err(ChatError::SignatureInvalid(format!(
                "{} is not a member of {}",
                author, topic
            )));
        };
        let audience = account_from_did_pkh(decoded.claims.require_aud()?)?;
        if &audience != recipient {
            return Err(ChatError::SignatureInvalid(format!(
                "Message addressed to {}",
                audience
            )));
        }

        let message = Message {
            topic: topic.to_string(),
            message: decoded.claims.sub.clone(),
            author_account: author,
            timestamp: decoded.claims.iat * 1000,
            media: decoded.claims.xma.clone(),
        };
        message.validate()?;
        self.append_message(message.clone())?;
        Ok((message, thread))
    }

    fn build_receipt(&self, thread: &Thread, text: &str) -> ChatResult<ReceiptResult> {
        let claims = self
            .identity
            .claims(&thread.self_account, ClaimAction::ChatReceipt, hash_message(text))?
            .with_aud(compose_did_pkh(&thread.peer_account));
        Ok(ReceiptResult {
            receipt_auth: self.identity.generate_id_auth(&thread.self_account, &claims)?,
        })
    }
}
