//! Wallet Chat CLI
//!
//! Thin wrapper around walletchat-core for command-line usage.
//!
//! ## Usage
//!
//! ```bash
//! # Run a full invite/message/leave exchange between two local wallets
//! walletchat demo --invite-text "hey let's chat" --message "hi"
//!
//! # Topic a holder of an invite key listens on
//! walletchat topic <public_key_hex>
//!
//! # did:key encoding of a public key
//! walletchat did <public_key_hex> [--x25519]
//!
//! # Query the keyserver
//! walletchat resolve-invite eip155:1:0xab16...
//! walletchat resolve-identity <public_key_hex>
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use tokio::sync::broadcast;
use tracing::debug;
use walletchat_core::identity::did::{did_key_from_hex, KeyKind};
use walletchat_core::{
    topic_from_public_key, ChatClient, ChatConfig, ChatEvent, ChatStores, Collaborators,
    HttpKeyserver, Invite, Keyserver, LocalWallet, LocalWalletVerifier, MemoryKeyserver,
    MemoryRelay, Message,
};

/// How long the demo waits for each peer event
const DEMO_EVENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Wallet Chat - encrypted account-to-account messaging
#[derive(Parser)]
#[command(name = "walletchat")]
#[command(version = "0.1.0")]
#[command(about = "Wallet Chat - encrypted account-to-account messaging")]
struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// JSON config file (default: defaults plus WALLETCHAT_* environment)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run an invite, message and leave exchange between two local wallets
    Demo {
        /// Text of the invite
        #[arg(long, default_value = "hey let's chat")]
        invite_text: String,

        /// Reply sent once the thread is open
        #[arg(long, default_value = "hi")]
        message: String,
    },

    /// Print the topic derived from a public key
    Topic {
        /// Public key (hex)
        public_key: String,
    },

    /// Print the did:key encoding of a public key
    Did {
        /// Public key (hex)
        public_key: String,

        /// Encode as an x25519 key instead of ed25519
        #[arg(long)]
        x25519: bool,
    },

    /// Look up an account's published invite key
    ResolveInvite {
        /// Account (namespace:reference:address)
        account: String,
    },

    /// Look up the attestation behind an identity key
    ResolveIdentity {
        /// Identity public key (hex)
        public_key: String,
    },
}

fn setup_logging(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&PathBuf>) -> Result<ChatConfig> {
    match path {
        Some(path) => ChatConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display())),
        None => Ok(ChatConfig::from_env()),
    }
}

/// Wait for the first event matching `predicate`.
async fn wait_for(
    events: &mut broadcast::Receiver<ChatEvent>,
    what: &str,
    predicate: impl Fn(&ChatEvent) -> bool,
) -> Result<ChatEvent> {
    let wait = async {
        loop {
            let event = events.recv().await?;
            if predicate(&event) {
                return Ok::<_, broadcast::error::RecvError>(event);
            }
            debug!(event = event.name(), "Skipping event");
        }
    };
    tokio::time::timeout(DEMO_EVENT_TIMEOUT, wait)
        .await
        .map_err(|_| anyhow!("Timed out waiting for {}", what))?
        .map_err(|e| anyhow!("Event stream failed while waiting for {}: {}", what, e))
}

async fn demo_client(
    relay: &MemoryRelay,
    keyserver: Arc<MemoryKeyserver>,
    config: ChatConfig,
) -> Result<ChatClient> {
    let client = ChatClient::init(
        config,
        Collaborators {
            transport: Arc::new(relay.connect()),
            keyserver,
            verifier: Arc::new(LocalWalletVerifier),
            stores: ChatStores::in_memory(),
        },
    )
    .await?;
    Ok(client)
}

async fn run_demo(config: ChatConfig, invite_text: String, reply: String) -> Result<()> {
    let relay = MemoryRelay::new();
    let keyserver = Arc::new(MemoryKeyserver::new(Arc::new(LocalWalletVerifier)));

    let alice_wallet = LocalWallet::new("eip155:1");
    let bob_wallet = LocalWallet::new("eip155:1");
    let alice = demo_client(&relay, keyserver.clone(), config.clone()).await?;
    let bob = demo_client(&relay, keyserver, config).await?;
    let mut alice_events = alice.subscribe_events();
    let mut bob_events = bob.subscribe_events();

    alice.register(alice_wallet.account(), &alice_wallet, false).await?;
    bob.register(bob_wallet.account(), &bob_wallet, false).await?;
    println!("Alice: {}", alice_wallet.account());
    println!("Bob:   {}", bob_wallet.account());
    println!();

    let invitee_public_key = alice.resolve_invite(bob_wallet.account()).await?;
    let id = alice
        .invite(Invite {
            message: invite_text,
            inviter_account: alice_wallet.account().to_string(),
            invitee_account: bob_wallet.account().to_string(),
            invitee_public_key,
        })
        .await?;

    if let ChatEvent::Invite { invite, .. } = wait_for(&mut bob_events, "invite", |e| {
        matches!(e, ChatEvent::Invite { .. })
    })
    .await?
    {
        println!("[bob]   chat_invite: \"{}\" from {}", invite.message, invite.inviter_account);
    }

    let topic = bob.accept(id).await?;
    wait_for(&mut alice_events, "invite acceptance", |e| {
        matches!(e, ChatEvent::InviteAccepted { .. })
    })
    .await?;
    println!("[alice] chat_invite_accepted: thread {}", topic);

    let delivery = bob
        .message_with_receipt(Message {
            topic: topic.clone(),
            message: reply,
            author_account: bob_wallet.account().to_string(),
            timestamp: now_millis(),
            media: None,
        })
        .await?;
    if let ChatEvent::Message { message, .. } = wait_for(&mut alice_events, "message", |e| {
        matches!(e, ChatEvent::Message { .. })
    })
    .await?
    {
        println!("[alice] chat_message: \"{}\" from {}", message.message, message.author_account);
    }
    println!(
        "[bob]   receipt: {}",
        if delivery.receipt_verified { "verified" } else { "unsigned" }
    );

    alice.ping(&topic).await?;
    wait_for(&mut bob_events, "ping", |e| matches!(e, ChatEvent::Ping { .. })).await?;
    println!("[bob]   chat_ping");

    alice.leave(&topic).await?;
    wait_for(&mut bob_events, "leave", |e| matches!(e, ChatEvent::Left { .. })).await?;
    println!("[bob]   chat_left");

    println!();
    println!(
        "Threads remaining: alice {}, bob {}",
        alice.get_threads(None)?.len(),
        bob.get_threads(None)?.len()
    );
    Ok(())
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose);

    let config = load_config(cli.config.as_ref())?;

    match cli.command {
        Commands::Demo {
            invite_text,
            message,
        } => {
            run_demo(config, invite_text, message).await?;
        }

        Commands::Topic { public_key } => {
            println!("{}", topic_from_public_key(&public_key)?);
        }

        Commands::Did { public_key, x25519 } => {
            let kind = if x25519 { KeyKind::X25519 } else { KeyKind::Ed25519 };
            println!("{}", did_key_from_hex(kind, &public_key)?);
        }

        Commands::ResolveInvite { account } => {
            let keyserver = HttpKeyserver::new(&config.keyserver_url);
            let did_key = keyserver.resolve_invite(&account).await?;
            println!("{}", did_key);
        }

        Commands::ResolveIdentity { public_key } => {
            let keyserver = HttpKeyserver::new(&config.keyserver_url);
            let attestation = keyserver.resolve_identity(&public_key).await?;
            println!("{}", serde_json::to_string_pretty(&attestation)?);
        }
    }

    Ok(())
}
