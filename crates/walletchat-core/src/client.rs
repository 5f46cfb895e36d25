//! Public chat client
//!
//! [`ChatClient`] wires an engine to its collaborators, runs the relay
//! listener in the background and exposes the account, handshake, message
//! and thread operations. Every failure is logged here before it is
//! returned.
//!
//! # Example
//!
//! ```ignore
//! use walletchat_core::{ChatClient, ChatConfig, Collaborators, LocalWallet};
//!
//! let client = ChatClient::init(ChatConfig::default(), collaborators).await?;
//! let wallet = LocalWallet::new("eip155:1");
//! client.register(wallet.account(), &wallet, false).await?;
//!
//! let mut events = client.subscribe_events();
//! while let Ok(event) = events.recv().await {
//!     println!("{}", event.name());
//! }
//! ```

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::ChatConfig;
use crate::crypto::{topic_from_public_key, Crypto};
use crate::engine::{ChatEngine, Collaborators, Delivery};
use crate::error::{ChatError, ChatResult};
use crate::events::ChatEvent;
use crate::identity::{IdentityAttestation, MessageSigner};
use crate::types::{Invite, Message, ReceivedInvite, SentInvite, Thread};

pub struct ChatClient {
    engine: Arc<ChatEngine>,
    /// Background relay listener, aborted on drop
    listener: JoinHandle<()>,
}

impl ChatClient {
    /// Build the engine and start listening.
    pub async fn init(config: ChatConfig, collaborators: Collaborators) -> ChatResult<Self> {
        let inbound = collaborators.transport.take_messages().ok_or_else(|| {
            ChatError::Transport("Transport inbound stream already taken".to_string())
        })?;
        let engine = Arc::new(ChatEngine::new(config, collaborators));
        let listener = tokio::spawn(engine.clone().run_relay_listener(inbound));

        let client = Self { engine, listener };
        info!(keyserver = %client.engine.config().keyserver_url, "Chat client ready");
        Ok(client)
    }

    /// Subscribe again to the topics of persisted threads and pending sent
    /// invites, so a client reopened on a durable store picks up where it
    /// left off. Runs once an identity is active, since the relay flushes
    /// held messages on subscribe.
    async fn restore_subscriptions(&self) -> ChatResult<()> {
        let transport = self.engine.transport();
        let threads = self.engine.get_threads(None)?;
        for thread in &threads {
            transport.subscribe(&thread.topic).await?;
        }
        // Pending invites still wait on their response topic
        let pending = self.engine.pending_sent_invites()?;
        for invite in &pending {
            transport.subscribe(&invite.response_topic).await?;
        }
        debug!(threads = threads.len(), pending = pending.len(), "Restored subscriptions");
        Ok(())
    }

    pub fn engine(&self) -> &ChatEngine {
        &self.engine
    }

    pub fn config(&self) -> &ChatConfig {
        self.engine.config()
    }

    pub fn crypto(&self) -> &Crypto {
        self.engine.crypto()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ChatEvent> {
        self.engine.subscribe_events()
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Accounts
    // ═══════════════════════════════════════════════════════════════════════

    /// Register `account` and start receiving invites for it.
    ///
    /// # Arguments
    ///
    /// * `account` - `namespace:reference:address`
    /// * `signer` - Wallet that signs the identity attestation
    /// * `private` - Keep the invite key off the keyserver
    ///
    /// # Returns
    ///
    /// The identity public key (hex).
    pub async fn register(
        &self,
        account: &str,
        signer: &dyn MessageSigner,
        private: bool,
    ) -> ChatResult<String> {
        let identity_key = self
            .engine
            .identity()
            .register_identity(account, signer)
            .await
            .inspect_err(|e| warn!(%account, error = %e, "Identity registration failed"))?;
        self.engine
            .identity()
            .register_invite_key(account, private)
            .await
            .inspect_err(|e| warn!(%account, error = %e, "Invite key registration failed"))?;
        self.engine.set_current_account(account);
        self.engine.subscribe_to_self_invite_topic(account).await?;
        self.restore_subscriptions().await?;
        Ok(identity_key)
    }

    pub fn current_account(&self) -> ChatResult<String> {
        self.engine.current_account()
    }

    /// Publish an invite key (generating one if needed).
    pub async fn go_public(&self, account: &str) -> ChatResult<String> {
        let invite_key = self
            .engine
            .identity()
            .register_invite_key(account, false)
            .await
            .inspect_err(|e| warn!(%account, error = %e, "Going public failed"))?;
        self.engine.subscribe_to_self_invite_topic(account).await?;
        Ok(invite_key)
    }

    /// Withdraw and discard the invite key. Existing threads are unaffected.
    ///
    /// Pending received invites are rejected first; once the key is gone
    /// they could no longer be answered.
    pub async fn go_private(&self, account: &str) -> ChatResult<()> {
        self.engine
            .reject_pending_invites(account)
            .await
            .inspect_err(|e| warn!(%account, error = %e, "Rejecting pending invites failed"))?;
        let invite_key = self
            .engine
            .identity()
            .unregister_invite_key(account)
            .await
            .inspect_err(|e| warn!(%account, error = %e, "Going private failed"))?;
        self.engine
            .transport()
            .unsubscribe(&topic_from_public_key(&invite_key)?)
            .await
    }

    /// Remove the identity and invite key from the keyserver and locally.
    pub async fn unregister(&self, account: &str) -> ChatResult<()> {
        let invite_topic = match self.engine.identity().get_invite_key(account) {
            Ok(invite_key) => Some(topic_from_public_key(&invite_key)?),
            Err(_) => None,
        };
        if invite_topic.is_some() {
            self.engine
                .reject_pending_invites(account)
                .await
                .inspect_err(|e| warn!(%account, error = %e, "Rejecting pending invites failed"))?;
        }
        self.engine
            .identity()
            .unregister_identity(account)
            .await
            .inspect_err(|e| warn!(%account, error = %e, "Unregister failed"))?;
        if let Some(topic) = invite_topic {
            self.engine.transport().unsubscribe(&topic).await?;
        }
        Ok(())
    }

    pub async fn resolve_identity(&self, public_key: &str) -> ChatResult<IdentityAttestation> {
        self.engine.identity().resolve_identity(public_key).await
    }

    /// Published invite key (hex) of `account`.
    pub async fn resolve_invite(&self, account: &str) -> ChatResult<String> {
        self.engine.identity().resolve_invite_key(account).await
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Handshake
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn invite(&self, invite: Invite) -> ChatResult<u64> {
        let invitee = invite.invitee_account.clone();
        self.engine
            .invite(invite)
            .await
            .inspect_err(|e| warn!(%invitee, error = %e, "Invite failed"))
    }

    /// Accept invite `id`, returning the new thread topic.
    pub async fn accept(&self, id: u64) -> ChatResult<String> {
        self.engine
            .accept(id)
            .await
            .inspect_err(|e| warn!(id, error = %e, "Accept failed"))
    }

    pub async fn reject(&self, id: u64) -> ChatResult<()> {
        self.engine
            .reject(id)
            .await
            .inspect_err(|e| warn!(id, error = %e, "Reject failed"))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Threads
    // ═══════════════════════════════════════════════════════════════════════

    pub async fn message(&self, message: Message) -> ChatResult<u64> {
        let topic = message.topic.clone();
        self.engine
            .send_message(message)
            .await
            .inspect_err(|e| warn!(%topic, error = %e, "Send failed"))
    }

    pub async fn message_with_receipt(&self, message: Message) -> ChatResult<Delivery> {
        let topic = message.topic.clone();
        self.engine
            .send_message_with_receipt(message)
            .await
            .inspect_err(|e| warn!(%topic, error = %e, "Confirmed send failed"))
    }

    pub async fn ping(&self, topic: &str) -> ChatResult<()> {
        self.engine
            .ping(topic)
            .await
            .inspect_err(|e| warn!(%topic, error = %e, "Ping failed"))
    }

    pub async fn leave(&self, topic: &str) -> ChatResult<()> {
        self.engine
            .leave(topic)
            .await
            .inspect_err(|e| warn!(%topic, error = %e, "Leave failed"))
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Queries
    // ═══════════════════════════════════════════════════════════════════════

    pub fn get_sent_invites(&self, account: &str) -> ChatResult<Vec<SentInvite>> {
        self.engine.get_sent_invites(account)
    }

    pub fn get_received_invites(&self, account: &str) -> ChatResult<Vec<ReceivedInvite>> {
        self.engine.get_received_invites(account)
    }

    pub fn get_threads(&self, account: Option<&str>) -> ChatResult<Vec<Thread>> {
        self.engine.get_threads(account)
    }

    pub fn get_messages(&self, topic: &str) -> ChatResult<Vec<Message>> {
        self.engine.get_messages(topic)
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.listener.abort();
    }
}
