mod common;

use crate::common::*;
use parking_lot::Mutex;
use polling_chat_lib::libs::core::config::{SendFailurePolicy, SyncConfig};
use polling_chat_lib::libs::core::models::{ConversationEntry, FriendSummary, Username};
use polling_chat_lib::libs::gateway::errors::{ErrorKind, GatewayError};
use polling_chat_lib::libs::sync::api::{ChatApi, Session};
use polling_chat_lib::libs::sync::events::{FriendListDelta, SyncEvent};
use polling_chat_lib::libs::sync::shadow::DeliveryStatus;
use polling_chat_lib::libs::sync::synchronizer::{ClientSynchronizer, SyncError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

/// Server stand-in whose answers the test scripts directly.
struct ScriptedApi {
    me: Username,
    friends: Mutex<Vec<FriendSummary>>,
    requests: Mutex<Vec<Username>>,
    conversations: Mutex<HashMap<Username, Vec<ConversationEntry>>>,
    unread: Mutex<HashMap<Username, u32>>,
    conversation_delay: Mutex<HashMap<Username, Duration>>,
    friends_delay: Mutex<Duration>,
    friend_failures_left: AtomicUsize,
    friend_polls: AtomicUsize,
    action_error: Mutex<Option<ErrorKind>>,
    send_error: Mutex<Option<ErrorKind>>,
}

impl ScriptedApi {
    fn new(me: &str) -> Arc<Self> {
        Arc::new(Self {
            me: user(me),
            friends: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            conversations: Mutex::new(HashMap::new()),
            unread: Mutex::new(HashMap::new()),
            conversation_delay: Mutex::new(HashMap::new()),
            friends_delay: Mutex::new(Duration::ZERO),
            friend_failures_left: AtomicUsize::new(0),
            friend_polls: AtomicUsize::new(0),
            action_error: Mutex::new(None),
            send_error: Mutex::new(None),
        })
    }

    fn scripted_error(kind: ErrorKind) -> GatewayError {
        GatewayError::Remote {
            kind,
            message: format!("scripted {:?} failure", kind),
        }
    }

    fn deliver(&self, from: &str, text: &str) {
        self.conversations
            .lock()
            .entry(user(from))
            .or_default()
            .push(entry(from, text));
        *self.unread.lock().entry(user(from)).or_default() += 1;
    }
}

impl ChatApi for ScriptedApi {
    fn send_request(&self, to: &Username) -> Result<(), GatewayError> {
        if to == &self.me {
            return Err(Self::scripted_error(ErrorKind::Validation));
        }
        Ok(())
    }

    fn accept(&self, requester: &Username) -> Result<(), GatewayError> {
        if let Some(kind) = *self.action_error.lock() {
            return Err(Self::scripted_error(kind));
        }
        self.requests.lock().retain(|pending| pending != requester);
        self.friends
            .lock()
            .push(FriendSummary::without_activity(requester.clone()));
        Ok(())
    }

    fn reject(&self, requester: &Username) -> Result<(), GatewayError> {
        if let Some(kind) = *self.action_error.lock() {
            return Err(Self::scripted_error(kind));
        }
        self.requests.lock().retain(|pending| pending != requester);
        Ok(())
    }

    fn list_friends(&self) -> Result<Vec<FriendSummary>, GatewayError> {
        self.friend_polls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.friends_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }
        let failures = self.friend_failures_left.load(Ordering::SeqCst);
        if failures > 0 {
            self.friend_failures_left.store(failures - 1, Ordering::SeqCst);
            return Err(Self::scripted_error(ErrorKind::Transient));
        }
        Ok(self.friends.lock().clone())
    }

    fn list_requests(&self) -> Result<Vec<Username>, GatewayError> {
        Ok(self.requests.lock().clone())
    }

    fn send_message(&self, receiver: &Username, text: &str) -> Result<(), GatewayError> {
        if let Some(kind) = *self.send_error.lock() {
            return Err(Self::scripted_error(kind));
        }
        self.conversations
            .lock()
            .entry(receiver.clone())
            .or_default()
            .push(ConversationEntry {
                sender: self.me.clone(),
                content: text.to_string(),
                created_at: 0,
            });
        Ok(())
    }

    fn get_conversation(&self, peer: &Username) -> Result<Vec<ConversationEntry>, GatewayError> {
        let delay = self.conversation_delay.lock().get(peer).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        self.unread.lock().remove(peer);
        Ok(self.conversations.lock().get(peer).cloned().unwrap_or_default())
    }

    fn check_notification(&self, peer: &Username) -> Result<u32, GatewayError> {
        Ok(self.unread.lock().get(peer).copied().unwrap_or(0))
    }
}

fn entry(sender: &str, content: &str) -> ConversationEntry {
    ConversationEntry {
        sender: user(sender),
        content: content.to_string(),
        created_at: 0,
    }
}

fn fast_config() -> SyncConfig {
    SyncConfig::default()
        .with_friend_list_interval(Duration::from_millis(30))
        .with_request_interval(Duration::from_millis(30))
        .with_conversation_interval(Duration::from_millis(30))
        .with_shutdown_timeout(Duration::from_millis(500))
}

fn start(api: &Arc<ScriptedApi>, config: SyncConfig) -> (ClientSynchronizer, UnboundedReceiver<SyncEvent>) {
    let session = Session::new(api.me.clone(), format!("{}-token", api.me));
    let api: Arc<dyn ChatApi> = api.clone();
    ClientSynchronizer::start(session, api, config)
}

async fn next_matching<F>(events: &mut UnboundedReceiver<SyncEvent>, mut predicate: F) -> SyncEvent
where
    F: FnMut(&SyncEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(3), async {
        loop {
            match events.recv().await {
                Some(event) if predicate(&event) => return event,
                Some(_) => continue,
                None => panic!("event stream closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

async fn collect_for(events: &mut UnboundedReceiver<SyncEvent>, window: Duration) -> Vec<SyncEvent> {
    let deadline = tokio::time::Instant::now() + window;
    let mut seen = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout_at(deadline, events.recv()).await {
        seen.push(event);
    }
    seen
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn friend_list_changes_arrive_as_deltas() {
    let api = ScriptedApi::new("alice");
    api.friends.lock().push(FriendSummary::without_activity(user("bob")));
    let (sync, mut events) = start(&api, fast_config());

    let added = next_matching(&mut events, |e| matches!(e, SyncEvent::FriendListChanged(_))).await;
    assert_eq!(
        added,
        SyncEvent::FriendListChanged(vec![FriendListDelta::Added {
            index: 0,
            summary: FriendSummary::without_activity(user("bob")),
        }])
    );

    api.friends.lock()[0].unread_count = 2;
    let updated = next_matching(&mut events, |e| matches!(e, SyncEvent::FriendListChanged(_))).await;
    match updated {
        SyncEvent::FriendListChanged(deltas) => assert!(matches!(
            deltas.as_slice(),
            [FriendListDelta::Updated { index: 0, summary }] if summary.unread_count == 2
        )),
        other => panic!("unexpected event {:?}", other),
    }

    *api.friends.lock() = vec![FriendSummary::without_activity(user("carol"))];
    let replaced = next_matching(&mut events, |e| matches!(e, SyncEvent::FriendListChanged(_))).await;
    match replaced {
        SyncEvent::FriendListChanged(deltas) => {
            assert!(deltas.contains(&FriendListDelta::Removed {
                index: 0,
                user: user("bob"),
            }));
            assert!(deltas.contains(&FriendListDelta::Added {
                index: 0,
                summary: FriendSummary::without_activity(user("carol")),
            }));
        }
        other => panic!("unexpected event {:?}", other),
    }

    // a steady list is silent
    let quiet = collect_for(&mut events, Duration::from_millis(150)).await;
    assert!(quiet.iter().all(|e| !matches!(e, SyncEvent::FriendListChanged(_))));

    assert!(sync.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn accepting_a_request_refreshes_friends_immediately() {
    let api = ScriptedApi::new("bob");
    api.requests.lock().push(user("alice"));
    // slow cycles: anything seen after the first ticks must come from the wake-up
    let config = fast_config()
        .with_friend_list_interval(Duration::from_secs(60))
        .with_request_interval(Duration::from_secs(60));
    let (sync, mut events) = start(&api, config);

    let received = next_matching(&mut events, |e| matches!(e, SyncEvent::RequestReceived(_))).await;
    assert_eq!(received, SyncEvent::RequestReceived(user("alice")));

    sync.accept_request(user("alice")).await.expect("accept should succeed");
    let accepted = next_matching(&mut events, |e| matches!(e, SyncEvent::RequestAccepted(_))).await;
    assert_eq!(accepted, SyncEvent::RequestAccepted(user("alice")));

    let friends = next_matching(&mut events, |e| matches!(e, SyncEvent::FriendListChanged(_))).await;
    assert_eq!(
        friends,
        SyncEvent::FriendListChanged(vec![FriendListDelta::Added {
            index: 0,
            summary: FriendSummary::without_activity(user("alice")),
        }])
    );

    let snapshot = sync.snapshot().await.unwrap();
    assert!(snapshot.requests.is_empty());
    assert_eq!(snapshot.friends.len(), 1);

    assert!(sync.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn settled_elsewhere_request_is_reported_and_dropped() {
    let api = ScriptedApi::new("bob");
    api.requests.lock().push(user("alice"));
    let config = fast_config().with_request_interval(Duration::from_secs(60));
    let (sync, mut events) = start(&api, config);

    next_matching(&mut events, |e| matches!(e, SyncEvent::RequestReceived(_))).await;

    *api.action_error.lock() = Some(ErrorKind::Conflict);
    let err = sync.reject_request(user("alice")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Conflict);

    let failed = next_matching(&mut events, |e| matches!(e, SyncEvent::ActionFailed { .. })).await;
    match failed {
        SyncEvent::ActionFailed { action, reason } => {
            assert_eq!(action, "reject friend request");
            assert!(reason.contains("scripted"));
        }
        other => panic!("unexpected event {:?}", other),
    }
    let removed = next_matching(&mut events, |e| matches!(e, SyncEvent::RequestRemoved(_))).await;
    assert_eq!(removed, SyncEvent::RequestRemoved(user("alice")));

    assert!(sync.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn transient_poll_failures_only_skip_ticks() {
    let api = ScriptedApi::new("alice");
    api.friends.lock().push(FriendSummary::without_activity(user("bob")));
    api.friend_failures_left.store(3, Ordering::SeqCst);
    let (sync, mut events) = start(&api, fast_config());

    next_matching(&mut events, |e| matches!(e, SyncEvent::FriendListChanged(_))).await;
    assert!(api.friend_polls.load(Ordering::SeqCst) >= 4);

    assert!(sync.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn switching_conversation_discards_late_result() {
    let api = ScriptedApi::new("alice");
    api.conversations
        .lock()
        .insert(user("bob"), vec![entry("bob", "from bob")]);
    api.conversations
        .lock()
        .insert(user("carol"), vec![entry("carol", "from carol")]);
    api.conversation_delay
        .lock()
        .insert(user("bob"), Duration::from_millis(300));
    let (sync, mut events) = start(&api, fast_config());

    sync.open_conversation(user("bob"));
    tokio::time::sleep(Duration::from_millis(50)).await;
    sync.open_conversation(user("carol"));

    // long enough for bob's delayed response to have come back
    let seen = collect_for(&mut events, Duration::from_millis(600)).await;
    assert!(seen.iter().any(|e| matches!(
        e,
        SyncEvent::TranscriptRefreshed { peer, .. } if peer == &user("carol")
    )));
    assert!(!seen.iter().any(|e| matches!(
        e,
        SyncEvent::TranscriptRefreshed { peer, .. } if peer == &user("bob")
    )));

    let snapshot = sync.snapshot().await.unwrap();
    let conversation = snapshot.conversation.expect("carol's conversation is open");
    assert_eq!(conversation.peer, user("carol"));
    assert_eq!(conversation.confirmed, vec![entry("carol", "from carol")]);
    assert_eq!(sync.active_peer(), Some(user("carol")));

    assert!(sync.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unread_messages_trigger_a_refresh() {
    let api = ScriptedApi::new("alice");
    api.conversations
        .lock()
        .insert(user("bob"), vec![entry("bob", "hey")]);
    let (sync, mut events) = start(&api, fast_config());

    sync.open_conversation(user("bob"));
    let first = next_matching(&mut events, |e| matches!(e, SyncEvent::TranscriptRefreshed { .. })).await;
    assert_eq!(
        first,
        SyncEvent::TranscriptRefreshed {
            peer: user("bob"),
            entries: vec![entry("bob", "hey")],
        }
    );

    api.deliver("bob", "are you there?");
    let received = next_matching(&mut events, |e| matches!(e, SyncEvent::MessageReceived { .. })).await;
    assert_eq!(
        received,
        SyncEvent::MessageReceived {
            peer: user("bob"),
            entry: entry("bob", "are you there?"),
        }
    );
    // the fetch acknowledged it server-side
    assert_eq!(api.check_notification(&user("bob")).unwrap(), 0);

    sync.close_conversation();
    assert_eq!(sync.active_peer(), None);
    assert!(sync.snapshot().await.unwrap().conversation.is_none());

    assert!(sync.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_send_keeps_optimistic_entry_by_default() {
    let api = ScriptedApi::new("alice");
    *api.send_error.lock() = Some(ErrorKind::Transient);
    let (sync, mut events) = start(&api, fast_config());

    sync.open_conversation(user("bob"));
    let local_id = sync.send_message("hi").unwrap();

    let queued = next_matching(&mut events, |e| matches!(e, SyncEvent::MessageQueued { .. })).await;
    assert!(matches!(queued, SyncEvent::MessageQueued { local_id: id, .. } if id == local_id));

    let failed = next_matching(&mut events, |e| matches!(e, SyncEvent::SendFailed { .. })).await;
    assert!(matches!(
        failed,
        SyncEvent::SendFailed { local_id: id, rolled_back: false, .. } if id == local_id
    ));

    let conversation = sync.snapshot().await.unwrap().conversation.unwrap();
    assert_eq!(conversation.local.len(), 1);
    assert_eq!(conversation.local[0].entry.content, "hi");
    assert_eq!(conversation.local[0].status, DeliveryStatus::Failed);

    assert!(sync.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn failed_send_can_roll_back() {
    let api = ScriptedApi::new("alice");
    *api.send_error.lock() = Some(ErrorKind::NotFound);
    let config = fast_config().with_send_failure_policy(SendFailurePolicy::RollBack);
    let (sync, mut events) = start(&api, config);

    sync.open_conversation(user("bob"));
    sync.send_message("hi").unwrap();

    let failed = next_matching(&mut events, |e| matches!(e, SyncEvent::SendFailed { .. })).await;
    assert!(matches!(failed, SyncEvent::SendFailed { rolled_back: true, .. }));

    let conversation = sync.snapshot().await.unwrap().conversation.unwrap();
    assert!(conversation.local.is_empty());

    assert!(sync.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn successful_send_is_confirmed() {
    let api = ScriptedApi::new("alice");
    let (sync, mut events) = start(&api, fast_config());

    assert_eq!(sync.send_message("hi"), Err(SyncError::NoActiveConversation));
    sync.open_conversation(user("bob"));
    assert_eq!(sync.send_message("   "), Err(SyncError::EmptyMessage));
    // wait for the initial load so it cannot fold the send into the transcript
    next_matching(&mut events, |e| matches!(e, SyncEvent::TranscriptRefreshed { .. })).await;

    let local_id = sync.send_message("hi").unwrap();
    let sent = next_matching(&mut events, |e| matches!(e, SyncEvent::MessageSent { .. })).await;
    assert_eq!(
        sent,
        SyncEvent::MessageSent {
            peer: user("bob"),
            local_id,
        }
    );

    let conversation = sync.snapshot().await.unwrap().conversation.unwrap();
    assert_eq!(conversation.local.len(), 1);
    assert_eq!(conversation.local[0].status, DeliveryStatus::Sent);
    assert_eq!(api.conversations.lock()[&user("bob")], vec![entry("alice", "hi")]);

    sync.send_friend_request(user("carol")).await.unwrap();
    let request = next_matching(&mut events, |e| matches!(e, SyncEvent::FriendRequestSent(_))).await;
    assert_eq!(request, SyncEvent::FriendRequestSent(user("carol")));

    assert!(sync.shutdown().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_is_bounded_while_a_poll_is_in_flight() {
    let api = ScriptedApi::new("alice");
    *api.friends_delay.lock() = Duration::from_millis(1500);
    let config = fast_config().with_shutdown_timeout(Duration::from_millis(200));
    let (sync, _events) = start(&api, config);

    // let the first friend poll get stuck in the slow call
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(api.friend_polls.load(Ordering::SeqCst) >= 1);

    let started = Instant::now();
    sync.shutdown().await;
    assert!(started.elapsed() < Duration::from_millis(1000));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn zero_intervals_keep_polling() {
    let api = ScriptedApi::new("bob");
    api.requests.lock().push(user("alice"));
    let config = fast_config()
        .with_friend_list_interval(Duration::ZERO)
        .with_request_interval(Duration::ZERO);
    let (sync, mut events) = start(&api, config);
    assert_eq!(sync.session().user, user("bob"));

    let received = next_matching(&mut events, |e| matches!(e, SyncEvent::RequestReceived(_))).await;
    assert_eq!(received, SyncEvent::RequestReceived(user("alice")));

    api.friends.lock().push(FriendSummary::without_activity(user("carol")));
    next_matching(&mut events, |e| matches!(e, SyncEvent::FriendListChanged(_))).await;

    assert!(sync.shutdown().await);
}
