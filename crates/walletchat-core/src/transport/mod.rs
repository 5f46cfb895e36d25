//! Relay transport seam.
//!
//! The engine publishes opaque envelopes to topics and receives everything
//! published to topics it subscribes to through one inbound stream.

mod memory;

pub use memory::{MemoryRelay, MemoryTransport};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::ChatResult;
use crate::rpc::PublishOptions;

/// One envelope delivered by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayMessage {
    pub topic: String,
    /// Base64 envelope
    pub message: String,
    /// Milliseconds
    pub published_at: i64,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn subscribe(&self, topic: &str) -> ChatResult<()>;

    async fn unsubscribe(&self, topic: &str) -> ChatResult<()>;

    async fn publish(&self, topic: &str, message: &str, opts: PublishOptions) -> ChatResult<()>;

    fn is_subscribed(&self, topic: &str) -> bool;

    /// Hand over the inbound stream. Returns `None` once taken.
    fn take_messages(&self) -> Option<mpsc::UnboundedReceiver<RelayMessage>>;
}
