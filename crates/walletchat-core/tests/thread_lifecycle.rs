//! Thread Lifecycle Integration Tests
//!
//! Ping liveness checks and leave teardown on established threads.

mod common;

use std::time::Duration;

use common::{establish_thread, Network};
use walletchat_core::rpc::{EmptyParams, JsonRpcRequest};
use walletchat_core::{
    ChatConfig, ChatError, ChatEvent, ChatMethod, ChatStores, Crypto, EncodeOptions, RelayMessage,
};

#[tokio::test]
async fn test_ping_round_trip() {
    let network = Network::new();
    let mut alice = network.peer().await;
    let mut bob = network.peer().await;
    let topic = establish_thread(&mut alice, &mut bob).await;

    alice.client.ping(&topic).await.unwrap();
    match bob
        .next_event(|e| matches!(e, ChatEvent::Ping { .. }))
        .await
    {
        ChatEvent::Ping { topic: pinged, .. } => assert_eq!(pinged, topic),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_ping_times_out_when_peer_offline() {
    let network = Network::new();
    let config = ChatConfig::default().with_ping_timeout(Duration::from_millis(200));
    let mut alice = network.peer_with(config, ChatStores::in_memory()).await;
    let mut bob = network.peer().await;
    let topic = establish_thread(&mut alice, &mut bob).await;

    bob.transport.set_online(false);
    let result = alice.client.ping(&topic).await;
    assert!(matches!(result, Err(ChatError::Timeout(_))));
}

#[tokio::test]
async fn test_ping_unknown_thread() {
    let network = Network::new();
    let alice = network.peer().await;
    assert!(matches!(
        alice.client.ping("no-such-topic").await,
        Err(ChatError::ThreadNotFound(_))
    ));
}

#[tokio::test]
async fn test_leave_tears_down_both_sides() {
    let network = Network::new();
    let mut alice = network.peer().await;
    let mut bob = network.peer().await;
    let topic = establish_thread(&mut alice, &mut bob).await;

    alice.client.message(alice.text(&topic, "bye")).await.unwrap();
    bob.next_event(|e| matches!(e, ChatEvent::Message { .. }))
        .await;
    let sym_key = bob.client.get_threads(None).unwrap()[0].sym_key.clone();

    alice.client.leave(&topic).await.unwrap();
    assert!(alice.client.get_threads(None).unwrap().is_empty());
    assert!(alice.client.get_messages(&topic).unwrap().is_empty());
    assert!(!alice.client.crypto().has_sym_key(&topic));

    match bob
        .next_event(|e| matches!(e, ChatEvent::Left { .. }))
        .await
    {
        ChatEvent::Left { topic: left, .. } => assert_eq!(left, topic),
        other => panic!("unexpected event {:?}", other),
    }
    assert!(bob.client.get_threads(None).unwrap().is_empty());
    assert!(bob.client.get_messages(&topic).unwrap().is_empty());
    assert!(!bob.client.crypto().has_sym_key(&topic));

    assert!(matches!(
        alice.client.message(alice.text(&topic, "anyone?")).await,
        Err(ChatError::ThreadNotFound(_))
    ));
    assert!(matches!(
        bob.client.leave(&topic).await,
        Err(ChatError::ThreadNotFound(_))
    ));

    // Traffic sealed with the old key no longer opens on either side
    let stale = Crypto::in_memory();
    let key: [u8; 32] = hex::decode(&sym_key).unwrap().try_into().unwrap();
    assert_eq!(stale.set_sym_key(&key, None).unwrap(), topic);
    let ping = JsonRpcRequest::new(ChatMethod::Ping, &EmptyParams::default()).unwrap();
    let sealed = stale
        .encode(&topic, &ping.into(), &EncodeOptions::Type0)
        .unwrap();
    for peer in [&alice, &bob] {
        assert!(peer.client.crypto().decode(&topic, &sealed, None).is_err());
        let delivered = peer
            .client
            .engine()
            .handle_relay_message(&RelayMessage {
                topic: topic.clone(),
                message: sealed.clone(),
                published_at: chrono::Utc::now().timestamp_millis(),
            })
            .await;
        assert!(matches!(delivered, Err(ChatError::KeyNotFound(_))));
        assert!(peer.client.get_messages(&topic).unwrap().is_empty());
    }
}

#[tokio::test]
async fn test_can_reinvite_after_leave() {
    let network = Network::new();
    let mut alice = network.peer().await;
    let mut bob = network.peer().await;
    let first = establish_thread(&mut alice, &mut bob).await;

    alice.client.leave(&first).await.unwrap();
    bob.next_event(|e| matches!(e, ChatEvent::Left { .. }))
        .await;

    let second = establish_thread(&mut alice, &mut bob).await;
    assert_ne!(first, second);
    assert_eq!(alice.client.get_threads(None).unwrap().len(), 1);
}
