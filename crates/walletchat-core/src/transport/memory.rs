use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::{RelayMessage, Transport};
use crate::error::{ChatError, ChatResult};
use crate::rpc::PublishOptions;

/// In-process relay shared by any number of [`MemoryTransport`] clients.
///
/// Messages are kept for their TTL, so a client that subscribes (or comes
/// back online) after a publish still receives it. A publisher never receives
/// its own messages.
#[derive(Clone, Default)]
pub struct MemoryRelay {
    state: Arc<Mutex<RelayState>>,
}

#[derive(Default)]
struct RelayState {
    next_client_id: u64,
    clients: HashMap<u64, ClientSlot>,
    mailbox: Vec<StoredMessage>,
}

struct ClientSlot {
    sender: mpsc::UnboundedSender<RelayMessage>,
    topics: HashSet<String>,
    online: bool,
}

struct StoredMessage {
    message: RelayMessage,
    publisher: u64,
    expires_at: i64,
    delivered: HashSet<u64>,
}

impl RelayState {
    fn prune(&mut self, now: i64) {
        self.mailbox.retain(|m| m.expires_at > now);
    }

    /// Push every undelivered stored message on `client_id`'s topics.
    fn flush(&mut self, client_id: u64) {
        let RelayState {
            clients, mailbox, ..
        } = self;
        let Some(slot) = clients.get(&client_id) else {
            return;
        };
        if !slot.online {
            return;
        }
        for stored in mailbox.iter_mut() {
            if stored.publisher == client_id
                || stored.delivered.contains(&client_id)
                || !slot.topics.contains(&stored.message.topic)
            {
                continue;
            }
            if slot.sender.send(stored.message.clone()).is_ok() {
                stored.delivered.insert(client_id);
            }
        }
    }
}

impl MemoryRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a new client.
    pub fn connect(&self) -> MemoryTransport {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.state.lock();
        let id = state.next_client_id;
        state.next_client_id += 1;
        state.clients.insert(
            id,
            ClientSlot {
                sender,
                topics: HashSet::new(),
                online: true,
            },
        );
        debug!(client_id = id, "Relay client connected");

        MemoryTransport {
            id,
            relay: self.clone(),
            inbound: Mutex::new(Some(receiver)),
        }
    }

    /// Number of messages still held for delivery.
    pub fn pending_messages(&self) -> usize {
        let mut state = self.state.lock();
        state.prune(now_millis());
        state.mailbox.len()
    }
}

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// One client's connection to a [`MemoryRelay`].
pub struct MemoryTransport {
    id: u64,
    relay: MemoryRelay,
    inbound: Mutex<Option<mpsc::UnboundedReceiver<RelayMessage>>>,
}

impl MemoryTransport {
    pub fn client_id(&self) -> u64 {
        self.id
    }

    /// Simulate losing or regaining the connection. Coming back online
    /// delivers whatever was published meanwhile.
    pub fn set_online(&self, online: bool) {
        let mut state = self.relay.state.lock();
        if let Some(slot) = state.clients.get_mut(&self.id) {
            slot.online = online;
        }
        debug!(client_id = self.id, online, "Relay client connectivity changed");
        if online {
            state.prune(now_millis());
            state.flush(self.id);
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.relay.state.lock().clients.remove(&self.id);
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn subscribe(&self, topic: &str) -> ChatResult<()> {
        let mut state = self.relay.state.lock();
        let slot = state
            .clients
            .get_mut(&self.id)
            .ok_or_else(|| ChatError::Transport("Client disconnected".to_string()))?;
        slot.topics.insert(topic.to_string());
        trace!(client_id = self.id, %topic, "Subscribed");
        state.prune(now_millis());
        state.flush(self.id);
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> ChatResult<()> {
        let mut state = self.relay.state.lock();
        if let Some(slot) = state.clients.get_mut(&self.id) {
            slot.topics.remove(topic);
        }
        trace!(client_id = self.id, %topic, "Unsubscribed");
        Ok(())
    }

    async fn publish(&self, topic: &str, message: &str, opts: PublishOptions) -> ChatResult<()> {
        let now = now_millis();
        let mut state = self.relay.state.lock();
        match state.clients.get(&self.id) {
            Some(slot) if slot.online => {}
            _ => return Err(ChatError::Transport("Client offline".to_string())),
        }
        state.prune(now);

        let mut stored = StoredMessage {
            message: RelayMessage {
                topic: topic.to_string(),
                message: message.to_string(),
                published_at: now,
            },
            publisher: self.id,
            expires_at: now + (opts.ttl as i64) * 1000,
            delivered: HashSet::new(),
        };
        for (id, slot) in state.clients.iter() {
            if *id == self.id || !slot.online || !slot.topics.contains(topic) {
                continue;
            }
            if slot.sender.send(stored.message.clone()).is_ok() {
                stored.delivered.insert(*id);
            }
        }
        trace!(client_id = self.id, %topic, tag = opts.tag, delivered = stored.delivered.len(), "Published");
        state.mailbox.push(stored);
        Ok(())
    }

    fn is_subscribed(&self, topic: &str) -> bool {
        self.relay
            .state
            .lock()
            .clients
            .get(&self.id)
            .is_some_and(|slot| slot.topics.contains(topic))
    }

    fn take_messages(&self) -> Option<mpsc::UnboundedReceiver<RelayMessage>> {
        self.inbound.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const OPTS: PublishOptions = PublishOptions::new(2002, 60, true);

    #[tokio::test]
    async fn test_publish_reaches_subscribers_but_not_publisher() {
        let relay = MemoryRelay::new();
        let alice = relay.connect();
        let bob = relay.connect();
        let mut alice_rx = alice.take_messages().unwrap();
        let mut bob_rx = bob.take_messages().unwrap();

        alice.subscribe("t").await.unwrap();
        bob.subscribe("t").await.unwrap();
        alice.publish("t", "hello", OPTS).await.unwrap();

        let received = bob_rx.recv().await.unwrap();
        assert_eq!(received.topic, "t");
        assert_eq!(received.message, "hello");
        assert!(alice_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_mailbox() {
        let relay = MemoryRelay::new();
        let alice = relay.connect();
        let bob = relay.connect();
        let mut bob_rx = bob.take_messages().unwrap();

        alice.publish("t", "early", OPTS).await.unwrap();
        assert!(bob_rx.try_recv().is_err());

        bob.subscribe("t").await.unwrap();
        assert_eq!(bob_rx.recv().await.unwrap().message, "early");

        // Not redelivered on resubscribe
        bob.unsubscribe("t").await.unwrap();
        bob.subscribe("t").await.unwrap();
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_offline_client_catches_up() {
        let relay = MemoryRelay::new();
        let alice = relay.connect();
        let bob = relay.connect();
        let mut bob_rx = bob.take_messages().unwrap();
        bob.subscribe("t").await.unwrap();

        bob.set_online(false);
        alice.publish("t", "while away", OPTS).await.unwrap();
        assert!(bob_rx.try_recv().is_err());
        assert!(bob.publish("t", "x", OPTS).await.is_err());

        bob.set_online(true);
        assert_eq!(bob_rx.recv().await.unwrap().message, "while away");
    }

    #[tokio::test]
    async fn test_unsubscribed_topic_not_delivered() {
        let relay = MemoryRelay::new();
        let alice = relay.connect();
        let bob = relay.connect();
        let mut bob_rx = bob.take_messages().unwrap();
        bob.subscribe("t").await.unwrap();
        assert!(bob.is_subscribed("t"));
        bob.unsubscribe("t").await.unwrap();
        assert!(!bob.is_subscribed("t"));

        alice.publish("t", "ignored", OPTS).await.unwrap();
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_expired_messages_are_pruned() {
        let relay = MemoryRelay::new();
        let alice = relay.connect();
        alice
            .publish("t", "gone", PublishOptions::new(2006, 0, false))
            .await
            .unwrap();
        assert_eq!(relay.pending_messages(), 0);
    }

    #[test]
    fn test_stream_taken_once() {
        let relay = MemoryRelay::new();
        let client = relay.connect();
        assert!(client.take_messages().is_some());
        assert!(client.take_messages().is_none());
    }
}
