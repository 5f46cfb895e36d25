//! Message Exchange Integration Tests
//!
//! ## What These Tests Verify
//!
//! - Messages arrive in send order and land in both logs
//! - Signed receipts confirm delivery of the exact text
//! - Media attachments survive the round trip
//! - A peer that was offline catches up from the relay mailbox
//! - Thread state survives a client restart on a redb store
//! - Messages signed by outsiders are answered with an error and never logged

mod common;

use common::{establish_thread, pair, Network, Outsider};
use tempfile::tempdir;
use walletchat_core::identity::did::compose_did_pkh;
use walletchat_core::jwt::ClaimAction;
use walletchat_core::{
    ChatConfig, ChatDatabase, ChatError, ChatEvent, ChatStores, ErrorResponse, LocalWallet,
    Media, Message,
};

fn message_texts(messages: &[Message]) -> Vec<&str> {
    messages.iter().map(|m| m.message.as_str()).collect()
}

#[tokio::test]
async fn test_messages_arrive_in_order() {
    let (mut alice, mut bob, _network) = pair().await;
    let topic = establish_thread(&mut alice, &mut bob).await;

    let sent: Vec<String> = (0..5).map(|i| format!("message {}", i)).collect();
    for text in &sent {
        alice.client.message(alice.text(&topic, text)).await.unwrap();
    }

    for text in &sent {
        match bob
            .next_event(|e| matches!(e, ChatEvent::Message { .. }))
            .await
        {
            ChatEvent::Message { message, .. } => {
                assert_eq!(&message.message, text);
                assert_eq!(message.author_account, alice.account());
                assert_eq!(message.topic, topic);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    let bob_log = bob.client.get_messages(&topic).unwrap();
    let alice_log = alice.client.get_messages(&topic).unwrap();
    assert_eq!(message_texts(&bob_log), message_texts(&alice_log));
    assert_eq!(bob_log.len(), 5);
}

#[tokio::test]
async fn test_concurrent_sends_from_both_sides() {
    let (mut alice, mut bob, _network) = pair().await;
    let topic = establish_thread(&mut alice, &mut bob).await;

    let alice_sends = (0..3).map(|i| alice.client.message(alice.text(&topic, &format!("a{}", i))));
    let bob_sends = (0..3).map(|i| bob.client.message(bob.text(&topic, &format!("b{}", i))));
    let results = futures::future::join(
        futures::future::join_all(alice_sends),
        futures::future::join_all(bob_sends),
    )
    .await;
    assert!(results.0.iter().chain(results.1.iter()).all(|r| r.is_ok()));

    for _ in 0..3 {
        alice
            .next_event(|e| matches!(e, ChatEvent::Message { .. }))
            .await;
        bob.next_event(|e| matches!(e, ChatEvent::Message { .. }))
            .await;
    }
    assert_eq!(alice.client.get_messages(&topic).unwrap().len(), 6);
    assert_eq!(bob.client.get_messages(&topic).unwrap().len(), 6);
}

#[tokio::test]
async fn test_scenario_hey_then_hi() {
    let (mut alice, mut bob, _network) = pair().await;
    let topic = establish_thread(&mut alice, &mut bob).await;

    bob.client.message(bob.text(&topic, "hi")).await.unwrap();
    alice
        .next_event(|e| matches!(e, ChatEvent::Message { .. }))
        .await;

    let log = alice.client.get_messages(&topic).unwrap();
    assert_eq!(message_texts(&log), vec!["hi"]);
    assert_eq!(log[0].author_account, bob.account());
}

#[tokio::test]
async fn test_message_with_receipt() {
    let (mut alice, mut bob, _network) = pair().await;
    let topic = establish_thread(&mut alice, &mut bob).await;

    let delivery = alice
        .client
        .message_with_receipt(alice.text(&topic, "did you get this?"))
        .await
        .unwrap();
    assert!(delivery.receipt_verified);
    assert!(delivery.id > 0);
    assert_eq!(bob.client.get_messages(&topic).unwrap().len(), 1);
}

#[tokio::test]
async fn test_media_round_trip() {
    let (mut alice, mut bob, _network) = pair().await;
    let topic = establish_thread(&mut alice, &mut bob).await;

    let media = Media {
        kind: "image".to_string(),
        data: "ipfs://bafy".to_string(),
    };
    let mut message = alice.text(&topic, "look");
    message.media = Some(media.clone());
    alice.client.message(message).await.unwrap();

    match bob
        .next_event(|e| matches!(e, ChatEvent::Message { .. }))
        .await
    {
        ChatEvent::Message { message, .. } => assert_eq!(message.media, Some(media)),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_offline_peer_catches_up() {
    let (mut alice, mut bob, _network) = pair().await;
    let topic = establish_thread(&mut alice, &mut bob).await;

    bob.transport.set_online(false);
    for text in ["one", "two", "three"] {
        alice.client.message(alice.text(&topic, text)).await.unwrap();
    }
    bob.transport.set_online(true);

    for _ in 0..3 {
        bob.next_event(|e| matches!(e, ChatEvent::Message { .. }))
            .await;
    }
    let log = bob.client.get_messages(&topic).unwrap();
    assert_eq!(message_texts(&log), vec!["one", "two", "three"]);
}

#[tokio::test]
async fn test_sending_while_offline_fails_without_logging() {
    let (mut alice, mut bob, _network) = pair().await;
    let topic = establish_thread(&mut alice, &mut bob).await;

    alice.transport.set_online(false);
    let result = alice.client.message(alice.text(&topic, "lost")).await;
    assert!(matches!(result, Err(ChatError::Transport(_))));
    assert!(alice.client.get_messages(&topic).unwrap().is_empty());
}

#[tokio::test]
async fn test_thread_survives_restart_on_redb() {
    let dir = tempdir().unwrap();
    let db = ChatDatabase::open(dir.path().join("alice.redb")).unwrap();
    let seed = [42u8; 32];
    let network = Network::new();

    let mut alice = network
        .peer_for(
            LocalWallet::from_seed("eip155:1", &seed),
            ChatConfig::default(),
            ChatStores::open(&db).unwrap(),
        )
        .await;
    let mut bob = network.peer().await;
    let topic = establish_thread(&mut alice, &mut bob).await;
    let identity_key = alice
        .client
        .engine()
        .identity()
        .get_identity(alice.account())
        .unwrap();
    drop(alice);

    let mut alice = network
        .peer_for(
            LocalWallet::from_seed("eip155:1", &seed),
            ChatConfig::default(),
            ChatStores::open(&db).unwrap(),
        )
        .await;
    assert_eq!(
        alice
            .client
            .engine()
            .identity()
            .get_identity(alice.account())
            .unwrap(),
        identity_key
    );
    let threads = alice.client.get_threads(Some(alice.account())).unwrap();
    assert_eq!(threads.len(), 1);
    assert_eq!(threads[0].topic, topic);

    bob.client.message(bob.text(&topic, "still there?")).await.unwrap();
    alice
        .next_event(|e| matches!(e, ChatEvent::Message { .. }))
        .await;
    assert_eq!(
        message_texts(&alice.client.get_messages(&topic).unwrap()),
        vec!["still there?"]
    );
}

#[tokio::test]
async fn test_message_from_unregistered_identity_refused() {
    let network = Network::new();
    let mut alice = network.peer().await;
    let mut bob = network.peer().await;
    let topic = establish_thread(&mut alice, &mut bob).await;

    let mut outsider = Outsider::new(&network);
    let sym_key = bob.client.get_threads(None).unwrap()[0].sym_key.clone();
    assert_eq!(outsider.join_thread(&sym_key).await, topic);

    let auth = outsider.message_auth(bob.account(), "trust me");
    let id = outsider.send_message_auth(&topic, auth).await;
    let response = outsider.next_response().await;
    assert_eq!(response.id(), id);
    assert!(response.into_outcome().is_err());

    assert!(alice.client.get_messages(&topic).unwrap().is_empty());
    assert!(bob.client.get_messages(&topic).unwrap().is_empty());
}

#[tokio::test]
async fn test_message_from_registered_non_member_refused() {
    let network = Network::new();
    let mut alice = network.peer().await;
    let mut bob = network.peer().await;
    let carol = network.peer().await;
    let topic = establish_thread(&mut alice, &mut bob).await;

    // Carol's token is valid, she just is not part of this thread
    let identity = carol.client.engine().identity();
    let claims = identity
        .claims(carol.account(), ClaimAction::ChatMessage, "hi bob")
        .unwrap()
        .with_aud(compose_did_pkh(bob.account()));
    let auth = identity.generate_id_auth(carol.account(), &claims).unwrap();

    let mut outsider = Outsider::new(&network);
    let sym_key = bob.client.get_threads(None).unwrap()[0].sym_key.clone();
    outsider.join_thread(&sym_key).await;
    let id = outsider.send_message_auth(&topic, auth).await;

    let response = outsider.next_response().await;
    assert_eq!(response.id(), id);
    match response.into_outcome() {
        Err(error) => assert_eq!(error.code, ErrorResponse::UNAUTHORIZED),
        Ok(value) => panic!("non-member message accepted: {}", value),
    }
    assert!(alice.client.get_messages(&topic).unwrap().is_empty());
    assert!(bob.client.get_messages(&topic).unwrap().is_empty());
}
