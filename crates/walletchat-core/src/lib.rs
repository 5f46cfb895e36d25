//! Wallet Chat Core Library
//!
//! End-to-end encrypted direct messaging between blockchain accounts.
//!
//! ## Overview
//!
//! Two accounts that have never talked before meet through the keyserver:
//! the invitee publishes an x25519 invite key, the inviter derives a topic
//! from it and sends an encrypted invite. Accepting the invite establishes a
//! thread, a relay topic keyed by a secret only the two parties can derive.
//! Every invite, approval, message and receipt is a JWT signed by the
//! account's identity key, which a wallet-signed attestation binds to the
//! account.
//!
//! ## Core Principles
//!
//! - **Relay-agnostic**: the relay only sees topics and ciphertext
//! - **Wallet-anchored identity**: the wallet signs once, the identity key signs
//!   everything after
//! - **Pluggable collaborators**: transport, keyserver, signature verification
//!   and storage are traits with in-memory and production implementations
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use walletchat_core::{
//!     ChatClient, ChatConfig, ChatEvent, ChatStores, Collaborators, Invite, LocalWallet,
//!     LocalWalletVerifier, MemoryKeyserver, MemoryRelay,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let relay = MemoryRelay::new();
//!     let verifier = Arc::new(LocalWalletVerifier);
//!     let keyserver = Arc::new(MemoryKeyserver::new(verifier.clone()));
//!
//!     let client = ChatClient::init(
//!         ChatConfig::default(),
//!         Collaborators {
//!             transport: Arc::new(relay.connect()),
//!             keyserver,
//!             verifier,
//!             stores: ChatStores::in_memory(),
//!         },
//!     )
//!     .await?;
//!
//!     let wallet = LocalWallet::new("eip155:1");
//!     client.register(wallet.account(), &wallet, false).await?;
//!
//!     // Invite a peer whose invite key is on the keyserver
//!     let peer = "eip155:1:0xab16a96d359ec26a11e2c2b3d8f8b8942d5bfcdb";
//!     let id = client
//!         .invite(Invite {
//!             message: "hey let's chat".to_string(),
//!             inviter_account: wallet.account().to_string(),
//!             invitee_account: peer.to_string(),
//!             invitee_public_key: client.resolve_invite(peer).await?,
//!         })
//!         .await?;
//!
//!     let mut events = client.subscribe_events();
//!     while let Ok(event) = events.recv().await {
//!         if let ChatEvent::InviteAccepted { topic, .. } = event {
//!             println!("thread {} open (invite {})", topic, id);
//!             break;
//!         }
//!     }
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod crypto;
pub mod engine;
pub mod error;
pub mod events;
pub mod history;
pub mod identity;
pub mod jwt;
pub mod keyserver;
pub mod rpc;
pub mod store;
pub mod transport;
pub mod types;

// Re-exports
pub use client::ChatClient;
pub use config::ChatConfig;
pub use crypto::{topic_from_public_key, Crypto, EncodeOptions};
pub use engine::{ChatEngine, Collaborators, Delivery};
pub use error::{ChatError, ChatResult};
pub use events::ChatEvent;
pub use identity::{
    AccountId, IdentityAttestation, IdentityKeyPair, IdentityKeys, LocalWallet,
    LocalWalletVerifier, MessageSigner, SignatureVerifier,
};
pub use keyserver::{HttpKeyserver, Keyserver, MemoryKeyserver};
pub use rpc::{ChatMethod, ErrorResponse, PublishOptions};
pub use store::{ChatDatabase, ChatStores, MemoryStore, RedbStore, Store};
pub use transport::{MemoryRelay, MemoryTransport, RelayMessage, Transport};
pub use types::*;
