//! Shared fixtures: chat clients on one in-memory relay and keyserver.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use walletchat_core::identity::did::{compose_did_pkh, did_key_from_hex, KeyKind};
use walletchat_core::jwt::{self, ClaimAction, JwtClaims};
use walletchat_core::rpc::{InviteParams, JsonRpcPayload, JsonRpcRequest, JsonRpcResponse, MessageParams};
use walletchat_core::{
    topic_from_public_key, ChatClient, ChatConfig, ChatEvent, ChatMethod, ChatStores,
    Collaborators, Crypto, EncodeOptions, IdentityKeyPair, Invite, LocalWallet,
    LocalWalletVerifier, MemoryKeyserver, MemoryRelay, MemoryTransport, Message, RelayMessage,
    Transport,
};

pub const EVENT_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Peer {
    pub client: ChatClient,
    pub wallet: LocalWallet,
    pub transport: Arc<MemoryTransport>,
    pub events: broadcast::Receiver<ChatEvent>,
}

impl Peer {
    pub fn account(&self) -> &str {
        self.wallet.account()
    }

    pub fn text(&self, topic: &str, message: &str) -> Message {
        Message {
            topic: topic.to_string(),
            message: message.to_string(),
            author_account: self.account().to_string(),
            timestamp: chrono::Utc::now().timestamp_millis(),
            media: None,
        }
    }

    /// Wait for the first event matching `predicate`, skipping others.
    pub async fn next_event(&mut self, predicate: impl Fn(&ChatEvent) -> bool) -> ChatEvent {
        let wait = async {
            loop {
                match self.events.recv().await {
                    Ok(event) if predicate(&event) => return event,
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(e) => panic!("event channel closed: {}", e),
                }
            }
        };
        tokio::time::timeout(EVENT_TIMEOUT, wait)
            .await
            .expect("timed out waiting for event")
    }
}

/// Relay and keyserver shared by every peer of a test.
#[derive(Clone)]
pub struct Network {
    pub relay: MemoryRelay,
    pub keyserver: Arc<MemoryKeyserver>,
}

impl Network {
    pub fn new() -> Self {
        let _ = tracing_subscriber::fmt::try_init();
        Self {
            relay: MemoryRelay::new(),
            keyserver: Arc::new(MemoryKeyserver::new(Arc::new(LocalWalletVerifier))),
        }
    }

    pub async fn peer(&self) -> Peer {
        self.peer_with(ChatConfig::default(), ChatStores::in_memory())
            .await
    }

    pub async fn peer_with(&self, config: ChatConfig, stores: ChatStores) -> Peer {
        self.peer_for(LocalWallet::new("eip155:1"), config, stores)
            .await
    }

    pub async fn peer_for(
        &self,
        wallet: LocalWallet,
        config: ChatConfig,
        stores: ChatStores,
    ) -> Peer {
        let transport = Arc::new(self.relay.connect());
        let client = ChatClient::init(
            config,
            Collaborators {
                transport: transport.clone(),
                keyserver: self.keyserver.clone(),
                verifier: Arc::new(LocalWalletVerifier),
                stores,
            },
        )
        .await
        .unwrap();
        client
            .register(wallet.account(), &wallet, false)
            .await
            .unwrap();
        let events = client.subscribe_events();
        Peer {
            client,
            wallet,
            transport,
            events,
        }
    }
}

/// A relay client that speaks the wire protocol directly, signing with an
/// identity key the keyserver has never seen.
pub struct Outsider {
    pub crypto: Crypto,
    pub identity: IdentityKeyPair,
    pub transport: MemoryTransport,
    inbox: mpsc::UnboundedReceiver<RelayMessage>,
}

impl Outsider {
    pub fn new(network: &Network) -> Self {
        let transport = network.relay.connect();
        let inbox = transport.take_messages().unwrap();
        Self {
            crypto: Crypto::in_memory(),
            identity: IdentityKeyPair::from_seed(&[0xee; 32]),
            transport,
            inbox,
        }
    }

    /// Publish an invite proposal to `invitee`'s invite topic, listening for
    /// the answer. Returns the request id.
    pub async fn send_invite(&self, invitee: &Peer, text: &str) -> u64 {
        let invite_key = invitee
            .client
            .engine()
            .identity()
            .get_invite_key(invitee.account())
            .unwrap();
        let self_key = self.crypto.generate_key_pair().unwrap();
        let response_topic = self
            .crypto
            .generate_shared_key(&self_key, &invite_key, None)
            .unwrap();
        self.transport.subscribe(&response_topic).await.unwrap();

        let claims = JwtClaims::new(ClaimAction::InviteProposal, self.identity.did_key(), text, 60)
            .with_aud(compose_did_pkh(invitee.account()))
            .with_pke(did_key_from_hex(KeyKind::X25519, &self_key).unwrap());
        let request = JsonRpcRequest::new(
            ChatMethod::Invite,
            &InviteParams {
                invite_auth: jwt::encode(&claims, &self.identity).unwrap(),
            },
        )
        .unwrap();
        let invite_topic = topic_from_public_key(&invite_key).unwrap();
        let sealed = self
            .crypto
            .encode(
                &invite_topic,
                &request.clone().into(),
                &EncodeOptions::Type1 {
                    sender_public_key: self_key,
                    receiver_public_key: invite_key,
                },
            )
            .unwrap();
        self.transport
            .publish(&invite_topic, &sealed, ChatMethod::Invite.request_options())
            .await
            .unwrap();
        request.id
    }

    /// Join a thread by its hex key, as someone who learned it out of band.
    pub async fn join_thread(&self, sym_key_hex: &str) -> String {
        let key: [u8; 32] = hex::decode(sym_key_hex).unwrap().try_into().unwrap();
        let topic = self.crypto.set_sym_key(&key, None).unwrap();
        self.transport.subscribe(&topic).await.unwrap();
        topic
    }

    /// Publish a chat message on `topic` with an already signed token.
    pub async fn send_message_auth(&self, topic: &str, message_auth: String) -> u64 {
        let request = JsonRpcRequest::new(ChatMethod::Message, &MessageParams { message_auth }).unwrap();
        let sealed = self
            .crypto
            .encode(topic, &request.clone().into(), &EncodeOptions::Type0)
            .unwrap();
        self.transport
            .publish(topic, &sealed, ChatMethod::Message.request_options())
            .await
            .unwrap();
        request.id
    }

    /// Sign a chat message to `recipient` with our unregistered identity.
    pub fn message_auth(&self, recipient: &str, text: &str) -> String {
        let claims = JwtClaims::new(ClaimAction::ChatMessage, self.identity.did_key(), text, 60)
            .with_aud(compose_did_pkh(recipient));
        jwt::encode(&claims, &self.identity).unwrap()
    }

    /// Next response published on a topic we hold a key for.
    pub async fn next_response(&mut self) -> JsonRpcResponse {
        let wait = async {
            loop {
                let message = self.inbox.recv().await.expect("relay closed");
                match self.crypto.decode(&message.topic, &message.message, None) {
                    Ok(JsonRpcPayload::Response(response)) => return response,
                    _ => continue,
                }
            }
        };
        tokio::time::timeout(EVENT_TIMEOUT, wait)
            .await
            .expect("timed out waiting for response")
    }
}

pub async fn pair() -> (Peer, Peer, Network) {
    let network = Network::new();
    let alice = network.peer().await;
    let bob = network.peer().await;
    (alice, bob, network)
}

/// Send an invite from `inviter` to `invitee` using the published invite key.
pub async fn send_invite(inviter: &Peer, invitee: &Peer, message: &str) -> u64 {
    let invitee_public_key = inviter
        .client
        .resolve_invite(invitee.account())
        .await
        .unwrap();
    inviter
        .client
        .invite(Invite {
            message: message.to_string(),
            inviter_account: inviter.account().to_string(),
            invitee_account: invitee.account().to_string(),
            invitee_public_key,
        })
        .await
        .unwrap()
}

/// Run the full handshake and return the thread topic once both sides
/// have it.
pub async fn establish_thread(inviter: &mut Peer, invitee: &mut Peer) -> String {
    let id = send_invite(inviter, invitee, "hey let's chat").await;
    invitee
        .next_event(|e| matches!(e, ChatEvent::Invite { id: got, .. } if *got == id))
        .await;
    let topic = invitee.client.accept(id).await.unwrap();
    match inviter
        .next_event(|e| matches!(e, ChatEvent::InviteAccepted { .. }))
        .await
    {
        ChatEvent::InviteAccepted { topic: accepted, .. } => assert_eq!(accepted, topic),
        other => panic!("unexpected event {:?}", other),
    }
    topic
}
