//! Chat protocol engine
//!
//! Owns the invite handshake, message exchange and thread lifecycle state
//! machines, and the relay listener that feeds inbound traffic into them.
//!
//! ## Concurrency
//!
//! Inbound relay traffic is handled by a single listener task, one message at
//! a time. Public calls run on the caller's task. Mutations of a thread or its
//! message log take that topic's lock, and invite creation takes a per-invitee
//! lock, so each keyed record has one writer at a time.
//!
//! Handlers running on the listener task never wait on a response. Anything
//! that waits (ping, confirmed send) runs on the caller's side and is woken
//! through the pending-response table.

mod invite;
mod message;
mod router;
mod thread;

pub use message::Delivery;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::crypto::{topic_from_public_key, Crypto, EncodeOptions};
use crate::error::{ChatError, ChatResult};
use crate::events::{ChatEvent, EVENT_CHANNEL_CAPACITY};
use crate::history::JsonRpcHistory;
use crate::identity::{IdentityKeys, SignatureVerifier};
use crate::jwt::{ClaimAction, DecodedJwt};
use crate::keyserver::Keyserver;
use crate::rpc::{ChatMethod, ErrorResponse, JsonRpcPayload, JsonRpcRequest, JsonRpcResponse};
use crate::store::{ChatStores, Store};
use crate::transport::Transport;
use crate::types::{InviteStatus, Message, MessageLog, ReceivedInvite, SentInvite, Thread};

type ResponseWaiter = oneshot::Sender<Result<Value, ErrorResponse>>;
type ResponseReceiver = oneshot::Receiver<Result<Value, ErrorResponse>>;

/// Everything the engine needs from the outside world.
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub keyserver: Arc<dyn Keyserver>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub stores: ChatStores,
}

/// Lazily created async mutex per key.
#[derive(Default)]
struct KeyedLocks {
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl KeyedLocks {
    fn lock_for(&self, key: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.locks
            .lock()
            .entry(key.to_string())
            .or_default()
            .clone()
    }

    fn forget(&self, key: &str) {
        self.locks.lock().remove(key);
    }
}

pub struct ChatEngine {
    config: ChatConfig,
    transport: Arc<dyn Transport>,
    verifier: Arc<dyn SignatureVerifier>,
    crypto: Arc<Crypto>,
    identity: IdentityKeys,
    history: JsonRpcHistory,
    sent_invites: Arc<dyn Store<SentInvite>>,
    received_invites: Arc<dyn Store<ReceivedInvite>>,
    threads: Arc<dyn Store<Thread>>,
    messages: Arc<dyn Store<MessageLog>>,
    current_account: RwLock<Option<String>>,
    locks: KeyedLocks,
    pending_responses: Mutex<HashMap<u64, ResponseWaiter>>,
    event_tx: broadcast::Sender<ChatEvent>,
}

impl ChatEngine {
    pub fn new(config: ChatConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            transport,
            keyserver,
            verifier,
            stores,
        } = collaborators;
        let crypto = Arc::new(Crypto::new(stores.keychain));
        let identity = IdentityKeys::new(
            config.clone(),
            keyserver,
            crypto.clone(),
            stores.identity_keys,
            stores.invite_keys,
        );
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);

        Self {
            config,
            transport,
            verifier,
            crypto,
            identity,
            history: JsonRpcHistory::new(),
            sent_invites: stores.sent_invites,
            received_invites: stores.received_invites,
            threads: stores.threads,
            messages: stores.messages,
            current_account: RwLock::new(None),
            locks: KeyedLocks::default(),
            pending_responses: Mutex::new(HashMap::new()),
            event_tx,
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn crypto(&self) -> &Crypto {
        &self.crypto
    }

    pub fn identity(&self) -> &IdentityKeys {
        &self.identity
    }

    pub fn history(&self) -> &JsonRpcHistory {
        &self.history
    }

    pub fn transport(&self) -> &dyn Transport {
        self.transport.as_ref()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: ChatEvent) {
        debug!(event = event.name(), topic = event.topic(), "Emitting chat event");
        // No receivers is fine
        let _ = self.event_tx.send(event);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accounts
    // ═══════════════════════════════════════════════════════════════════════

    pub fn current_account(&self) -> ChatResult<String> {
        self.current_account
            .read()
            .clone()
            .ok_or(ChatError::NoAccountRegistered)
    }

    pub fn set_current_account(&self, account: &str) {
        *self.current_account.write() = Some(account.to_string());
    }

    /// Listen for invites addressed to `account`'s invite key.
    pub async fn subscribe_to_self_invite_topic(&self, account: &str) -> ChatResult<String> {
        let invite_key = self.identity.get_invite_key(account)?;
        let topic = topic_from_public_key(&invite_key)?;
        self.transport.subscribe(&topic).await?;
        info!(%account, %topic, "Listening for invites");
        Ok(topic)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════

    pub fn get_thread(&self, topic: &str) -> ChatResult<Option<Thread>> {
        self.threads.get(topic)
    }

    fn require_thread(&self, topic: &str) -> ChatResult<Thread> {
        self.threads
            .get(topic)?
            .ok_or_else(|| ChatError::ThreadNotFound(topic.to_string()))
    }

    pub fn get_threads(&self, account: Option<&str>) -> ChatResult<Vec<Thread>> {
        match account {
            Some(account) => self.threads.filter(&|t| t.self_account == account),
            None => self.threads.get_all(),
        }
    }

    pub fn get_sent_invites(&self, account: &str) -> ChatResult<Vec<SentInvite>> {
        self.sent_invites.filter(&|i| i.inviter_account == account)
    }

    pub fn pending_sent_invites(&self) -> ChatResult<Vec<SentInvite>> {
        self.sent_invites
            .filter(&|i| i.status == InviteStatus::Pending)
    }

    pub fn get_received_invites(&self, account: &str) -> ChatResult<Vec<ReceivedInvite>> {
        self.received_invites
            .filter(&|i| i.invitee_account == account)
    }

    pub fn get_received_invite(&self, id: u64) -> ChatResult<Option<ReceivedInvite>> {
        self.received_invites.get(&id.to_string())
    }

    pub fn get_sent_invite(&self, response_topic: &str) -> ChatResult<Option<SentInvite>> {
        self.sent_invites.get(response_topic)
    }

    /// Messages of a thread in arrival order. Empty for unknown topics.
    pub fn get_messages(&self, topic: &str) -> ChatResult<Vec<Message>> {
        Ok(self
            .messages
            .get(topic)?
            .map(|log| log.messages)
            .unwrap_or_default())
    }

    pub fn has_message_log(&self, topic: &str) -> ChatResult<bool> {
        self.messages.contains(topic)
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Thread state
    // ═══════════════════════════════════════════════════════════════════════

    fn ensure_message_log(&self, topic: &str) -> ChatResult<()> {
        if !self.messages.contains(topic)? {
            self.messages.set(topic, MessageLog::new(topic))?;
        }
        Ok(())
    }

    fn append_message(&self, message: Message) -> ChatResult<()> {
        let topic = message.topic.clone();
        self.ensure_message_log(&topic)?;
        let mut message = Some(message);
        self.messages.update(&topic, &mut |log| {
            if let Some(m) = message.take() {
                log.messages.push(m);
            }
        })?;
        Ok(())
    }

    /// Tear down a thread locally.
    ///
    /// Unsubscribes first so no further relay traffic for the topic reaches
    /// handlers once its state and key are gone.
    async fn leave_chat(&self, topic: &str) -> ChatResult<()> {
        self.transport.unsubscribe(topic).await?;
        self.threads.delete(topic, "left thread")?;
        self.messages.delete(topic, "left thread")?;
        self.crypto.delete_sym_key(topic)?;
        self.history.delete(topic);
        self.locks.forget(topic);
        info!(%topic, "Left thread");
        Ok(())
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Authentication
    // ═══════════════════════════════════════════════════════════════════════

    /// Verify a peer token and the identity behind it.
    ///
    /// Checks the purpose, the signature against the `iss` key and expiry,
    /// then resolves the issuer's attestation and checks the wallet signature
    /// binding that key to an account.
    ///
    /// # Returns
    ///
    /// The account the token speaks for.
    async fn authenticate(&self, decoded: &DecodedJwt, action: ClaimAction) -> ChatResult<String> {
        decoded.claims.expect_action(action)?;
        decoded.verify()?;

        let issuer_key = decoded.issuer_key_hex()?;
        let attestation = self.identity.resolve_identity(&issuer_key).await?;
        if attestation.p.identity_key()? != issuer_key {
            return Err(ChatError::SignatureInvalid(format!(
                "Attestation does not cover {}",
                decoded.claims.iss
            )));
        }
        attestation.verify(self.verifier.as_ref()).await?;
        attestation.p.account()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Wire helpers
    // ═══════════════════════════════════════════════════════════════════════

    async fn publish_request(
        &self,
        topic: &str,
        request: &JsonRpcRequest,
        method: ChatMethod,
        opts: &EncodeOptions,
    ) -> ChatResult<()> {
        let payload = JsonRpcPayload::Request(request.clone());
        let message = self.crypto.encode(topic, &payload, opts)?;
        self.history.set(topic, request);
        self.transport
            .publish(topic, &message, method.request_options())
            .await?;
        debug!(id = request.id, %topic, %method, "Sent request");
        Ok(())
    }

    async fn publish_response(
        &self,
        topic: &str,
        response: JsonRpcResponse,
        method: ChatMethod,
    ) -> ChatResult<()> {
        let id = response.id();
        let payload = JsonRpcPayload::Response(response);
        let message = self.crypto.encode(topic, &payload, &EncodeOptions::Type0)?;
        self.transport
            .publish(topic, &message, method.response_options())
            .await?;
        debug!(id, %topic, %method, "Sent response");
        Ok(())
    }

    async fn send_result<R: Serialize>(
        &self,
        id: u64,
        topic: &str,
        method: ChatMethod,
        result: &R,
    ) -> ChatResult<()> {
        self.publish_response(topic, JsonRpcResponse::result(id, result)?, method)
            .await
    }

    async fn send_error(
        &self,
        id: u64,
        topic: &str,
        method: ChatMethod,
        error: ErrorResponse,
    ) -> ChatResult<()> {
        self.publish_response(topic, JsonRpcResponse::error(id, error), method)
            .await
    }

    /// Report a failed inbound request to the peer. Failure to do so is only
    /// logged; the original error is what the caller propagates.
    async fn respond_with_error(&self, id: u64, topic: &str, method: ChatMethod, cause: &ChatError) {
        if let Err(e) = self
            .send_error(id, topic, method, cause.to_error_response())
            .await
        {
            warn!(id, %topic, %method, error = %e, "Failed to send error response");
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Correlated responses
    // ═══════════════════════════════════════════════════════════════════════

    fn register_waiter(&self, id: u64) -> ResponseReceiver {
        let (tx, rx) = oneshot::channel();
        self.pending_responses.lock().insert(id, tx);
        rx
    }

    fn drop_waiter(&self, id: u64) {
        self.pending_responses.lock().remove(&id);
    }

    /// Hand a response to whoever is waiting on its id, if anyone.
    fn resolve_waiter(&self, response: JsonRpcResponse) {
        let id = response.id();
        match self.pending_responses.lock().remove(&id) {
            Some(waiter) => {
                let _ = waiter.send(response.into_outcome());
            }
            None => debug!(id, "No caller waiting on response"),
        }
    }

    /// Wait for the response to request `id`, bounded by the ping timeout.
    async fn await_response(
        &self,
        id: u64,
        waiter: ResponseReceiver,
        what: &str,
    ) -> ChatResult<Value> {
        match tokio::time::timeout(self.config.ping_timeout(), waiter).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(error))) => Err(ChatError::PeerError(error)),
            Ok(Err(_)) => Err(ChatError::Transport(format!(
                "Response channel for {} closed",
                what
            ))),
            Err(_) => {
                self.drop_waiter(id);
                Err(ChatError::Timeout(what.to_string()))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::identity::{LocalWallet, LocalWalletVerifier};
    use crate::keyserver::MemoryKeyserver;
    use crate::transport::MemoryRelay;

    /// A fresh engine with registered identity and invite key, plus its
    /// relay so tests can attach peers.
    pub(crate) async fn registered_engine() -> (ChatEngine, LocalWallet, MemoryRelay) {
        let relay = MemoryRelay::new();
        let verifier = Arc::new(LocalWalletVerifier);
        let engine = ChatEngine::new(
            ChatConfig::default(),
            Collaborators {
                transport: Arc::new(relay.connect()),
                keyserver: Arc::new(MemoryKeyserver::new(verifier.clone())),
                verifier,
                stores: ChatStores::in_memory(),
            },
        );
        let wallet = LocalWallet::new("eip155:1");
        engine
            .identity()
            .register_identity(wallet.account(), &wallet)
            .await
            .unwrap();
        engine
            .identity()
            .register_invite_key(wallet.account(), false)
            .await
            .unwrap();
        engine.set_current_account(wallet.account());
        (engine, wallet, relay)
    }
}
