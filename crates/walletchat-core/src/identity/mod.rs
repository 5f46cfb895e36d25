//! Account identity
//!
//! ## Overview
//!
//! An account (`namespace:reference:address`) chats through two keys:
//! - **Identity key** (ed25519): signs every JWT the account emits. A
//!   wallet-signed [`IdentityAttestation`] on the keyserver binds it to the
//!   account.
//! - **Invite key** (x25519): published so strangers can derive the topic
//!   to send invites to. It can be withdrawn and rotated independently.
//!
//! ## Example
//!
//! ```ignore
//! use walletchat_core::identity::{IdentityKeys, LocalWallet};
//!
//! let wallet = LocalWallet::new("eip155:1");
//! let identity_key = keys.register_identity(wallet.account(), &wallet).await?;
//! let invite_key = keys.register_invite_key(wallet.account(), false).await?;
//! ```

pub mod attestation;
pub mod did;
pub mod keypair;
pub mod manager;
pub mod wallet;

pub use attestation::IdentityAttestation;
pub use did::AccountId;
pub use keypair::IdentityKeyPair;
pub use manager::IdentityKeys;
pub use wallet::{LocalWallet, LocalWalletVerifier, MessageSigner, SignatureVerifier};
