use std::sync::Arc;
use std::time::Duration;

use polling_chat_lib::libs::core::config::StoreConfig;
use polling_chat_lib::libs::core::models::{elapsed_label, now_millis};
use polling_chat_lib::libs::gateway::{IdentityProvider, StaticIdentityProvider};
use polling_chat_lib::libs::logging::{init_tracing, DEFAULT_FILTER};
use polling_chat_lib::libs::sync::api::{LoopbackTransport, WireApi};
use polling_chat_lib::{
    open_gateway, ClientSynchronizer, FriendListDelta, FriendSummary, Session, SyncConfig, SyncEvent,
    Username,
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::info;

fn describe(summary: &FriendSummary) -> String {
    match (&summary.last_message, summary.last_timestamp) {
        (Some(text), Some(at)) => format!(
            "{} ({} unread): {} [{}]",
            summary.user,
            summary.unread_count,
            text,
            elapsed_label(now_millis(), at)
        ),
        _ => format!("{} (no messages yet)", summary.user),
    }
}

fn drain(label: &str, events: &mut UnboundedReceiver<SyncEvent>) {
    while let Ok(event) = events.try_recv() {
        match event {
            SyncEvent::FriendListChanged(deltas) => {
                for delta in deltas {
                    match delta {
                        FriendListDelta::Added { index, summary }
                        | FriendListDelta::Updated { index, summary } => {
                            println!("[{}] friend #{}: {}", label, index, describe(&summary))
                        }
                        FriendListDelta::Removed { index, user } => {
                            println!("[{}] friend #{} removed: {}", label, index, user)
                        }
                    }
                }
            }
            other => println!("[{}] {:?}", label, other),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(DEFAULT_FILTER);

    let dir = tempfile::tempdir()?;
    let gateway = open_gateway(&StoreConfig::new(dir.path().join("chat.db")))?;

    let identity = Arc::new(StaticIdentityProvider::new());
    let alice = Session::new(Username::from("alice"), "alice-token");
    let bob = Session::new(Username::from("bob"), "bob-token");
    for session in [&alice, &bob] {
        gateway.register(&session.user, b"demo-credential".to_vec())?;
        identity.issue(session.credential.clone(), session.user.clone());
    }

    let config = SyncConfig::default()
        .with_friend_list_interval(Duration::from_millis(200))
        .with_request_interval(Duration::from_millis(300))
        .with_conversation_interval(Duration::from_millis(200));

    let provider: Arc<dyn IdentityProvider> = identity;
    let client = |session: &Session| {
        let transport = LoopbackTransport::new(Arc::clone(&gateway), Arc::clone(&provider));
        Arc::new(WireApi::new(transport, session))
    };

    let (alice_sync, mut alice_events) =
        ClientSynchronizer::start(alice.clone(), client(&alice), config.clone());
    let (bob_sync, mut bob_events) = ClientSynchronizer::start(bob.clone(), client(&bob), config);

    alice_sync.send_friend_request(bob.user.clone()).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    bob_sync.accept_request(alice.user.clone()).await?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    bob_sync.open_conversation(alice.user.clone());
    alice_sync.open_conversation(bob.user.clone());
    alice_sync.send_message("hi")?;
    tokio::time::sleep(Duration::from_millis(800)).await;

    bob_sync.send_message("hello alice")?;
    tokio::time::sleep(Duration::from_millis(800)).await;

    drain("alice", &mut alice_events);
    drain("bob", &mut bob_events);

    let clean = alice_sync.shutdown().await & bob_sync.shutdown().await;
    info!(clean, "demo finished");
    Ok(())
}
