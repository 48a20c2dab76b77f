use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::libs::core::config::{SendFailurePolicy, SyncConfig};
use crate::libs::core::models::{now_millis, ConversationEntry, FriendSummary, Username};
use crate::libs::gateway::errors::GatewayError;
use crate::libs::sync::api::{ChatApi, Session};
use crate::libs::sync::events::SyncEvent;
use crate::libs::sync::repeating::{GenerationToken, RepeatingTask, TickOutcome};
use crate::libs::sync::shadow::{
    FriendListShadow, RequestShadow, ShadowSnapshot, TranscriptShadow, TranscriptSnapshot,
};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SyncError {
    #[error("no conversation is open")]
    NoActiveConversation,
    #[error("message is empty")]
    EmptyMessage,
    #[error("synchronizer has shut down")]
    ShutDown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestAction {
    Accept,
    Reject,
}

impl RequestAction {
    fn label(self) -> &'static str {
        match self {
            RequestAction::Accept => "accept friend request",
            RequestAction::Reject => "reject friend request",
        }
    }
}

/// Everything that may touch shadow state goes through this queue and is
/// applied by the single UI task.
#[derive(Debug)]
enum UiMessage {
    Friends(Vec<FriendSummary>),
    Requests {
        generation: u64,
        users: Vec<Username>,
    },
    RequestSettled {
        requester: Username,
        action: RequestAction,
    },
    RequestStale(Username),
    Conversation {
        generation: u64,
        entries: Vec<ConversationEntry>,
    },
    ConversationOpened {
        generation: u64,
        peer: Username,
    },
    ConversationClosed,
    OutgoingQueued {
        generation: u64,
        local_id: u64,
        entry: ConversationEntry,
    },
    OutgoingResult {
        peer: Username,
        local_id: u64,
        outcome: Result<(), String>,
    },
    Event(SyncEvent),
    Snapshot(oneshot::Sender<ShadowSnapshot>),
    Close,
}

/// Runs a blocking API call on the blocking pool.
async fn call<T, F>(api: &Arc<dyn ChatApi>, request: F) -> Result<T, GatewayError>
where
    T: Send + 'static,
    F: FnOnce(&dyn ChatApi) -> Result<T, GatewayError> + Send + 'static,
{
    let api = Arc::clone(api);
    match tokio::task::spawn_blocking(move || request(api.as_ref())).await {
        Ok(result) => result,
        Err(join_err) => Err(GatewayError::transport(join_err.to_string())),
    }
}

/// Posts to the UI queue; a closed queue means the synchronizer is gone and
/// the calling cycle should stop.
fn post(ui: &mpsc::UnboundedSender<UiMessage>, message: UiMessage) -> TickOutcome {
    match ui.send(message) {
        Ok(()) => TickOutcome::Continue,
        Err(_) => TickOutcome::Stop,
    }
}

struct ActiveConversation {
    peer: Username,
    generation: u64,
    cycle: RepeatingTask,
}

/// Keeps a client's view of friends, incoming requests and the open
/// conversation in step with the server by polling.
///
/// Three independent cycles feed one UI task that owns the shadow state and
/// emits [`SyncEvent`]s. Results of a conversation poll that was retargeted
/// while in flight are dropped by generation.
pub struct ClientSynchronizer {
    session: Session,
    api: Arc<dyn ChatApi>,
    config: SyncConfig,
    runtime: Handle,
    ui_tx: mpsc::UnboundedSender<UiMessage>,
    ui_task: JoinHandle<()>,
    friend_cycle: RepeatingTask,
    request_cycle: RepeatingTask,
    conversation: Mutex<Option<ActiveConversation>>,
    conversation_generation: GenerationToken,
    request_generation: GenerationToken,
    friends_wake: Arc<Notify>,
    requests_wake: Arc<Notify>,
    next_local_id: AtomicU64,
}

impl ClientSynchronizer {
    /// Starts the friend-list and request cycles and the UI task. Must be
    /// called from within a tokio runtime.
    pub fn start(
        session: Session,
        api: Arc<dyn ChatApi>,
        config: SyncConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SyncEvent>) {
        let runtime = Handle::current();
        let (ui_tx, ui_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();

        let conversation_generation = GenerationToken::new();
        let request_generation = GenerationToken::new();
        let friends_wake = Arc::new(Notify::new());
        let requests_wake = Arc::new(Notify::new());

        let ui_loop = UiLoop {
            me: session.user.clone(),
            policy: config.send_failure_policy,
            friends: FriendListShadow::default(),
            requests: RequestShadow::default(),
            transcript: None,
            conversation_generation: conversation_generation.clone(),
            request_generation: request_generation.clone(),
            events: events_tx,
        };
        let ui_task = runtime.spawn(ui_loop.run(ui_rx));

        let friend_cycle = {
            let api = Arc::clone(&api);
            let ui = ui_tx.clone();
            RepeatingTask::spawn(
                "friend-list",
                config.friend_list_interval,
                Duration::ZERO,
                Some(Arc::clone(&friends_wake)),
                move || {
                    let api = Arc::clone(&api);
                    let ui = ui.clone();
                    async move {
                        match call(&api, |api| api.list_friends()).await {
                            Ok(friends) => post(&ui, UiMessage::Friends(friends)),
                            Err(err) => {
                                warn!(error = %err, "friend list poll failed, skipping tick");
                                TickOutcome::Continue
                            }
                        }
                    }
                },
            )
        };

        let request_cycle = {
            let api = Arc::clone(&api);
            let ui = ui_tx.clone();
            let generations = request_generation.clone();
            RepeatingTask::spawn(
                "friend-requests",
                config.request_interval,
                Duration::ZERO,
                Some(Arc::clone(&requests_wake)),
                move || {
                    let api = Arc::clone(&api);
                    let ui = ui.clone();
                    let generation = generations.current();
                    async move {
                        match call(&api, |api| api.list_requests()).await {
                            Ok(users) => post(&ui, UiMessage::Requests { generation, users }),
                            Err(err) => {
                                warn!(error = %err, "request poll failed, skipping tick");
                                TickOutcome::Continue
                            }
                        }
                    }
                },
            )
        };

        info!(user = %session.user, "client synchronizer started");
        let synchronizer = Self {
            session,
            api,
            config,
            runtime,
            ui_tx,
            ui_task,
            friend_cycle,
            request_cycle,
            conversation: Mutex::new(None),
            conversation_generation,
            request_generation,
            friends_wake,
            requests_wake,
            next_local_id: AtomicU64::new(1),
        };
        (synchronizer, events_rx)
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Retargets the conversation cycle at `peer`. Any earlier cycle stops
    /// and whatever it still has in flight is discarded.
    pub fn open_conversation(&self, peer: Username) {
        let mut active = self.conversation.lock();
        let generation = self.conversation_generation.bump();
        if let Some(previous) = active.take() {
            previous.cycle.cancel();
        }
        let _ = self.ui_tx.send(UiMessage::ConversationOpened {
            generation,
            peer: peer.clone(),
        });

        let api = Arc::clone(&self.api);
        let ui = self.ui_tx.clone();
        let generations = self.conversation_generation.clone();
        let needs_full_fetch = Arc::new(AtomicBool::new(true));
        let target = peer.clone();

        let _guard = self.runtime.enter();
        let cycle = RepeatingTask::spawn(
            format!("conversation-{}", peer),
            self.config.conversation_interval,
            Duration::ZERO,
            None,
            move || {
                let api = Arc::clone(&api);
                let ui = ui.clone();
                let generations = generations.clone();
                let needs_full_fetch = Arc::clone(&needs_full_fetch);
                let peer = target.clone();
                async move {
                    if !generations.is_current(generation) {
                        debug!(%peer, generation, "conversation cycle is stale, stopping");
                        return TickOutcome::Stop;
                    }

                    if !needs_full_fetch.load(Ordering::SeqCst) {
                        let unread_peer = peer.clone();
                        match call(&api, move |api| api.check_notification(&unread_peer)).await {
                            Ok(0) => return TickOutcome::Continue,
                            Ok(unread) => debug!(%peer, unread, "unread messages waiting"),
                            Err(err) => {
                                warn!(%peer, error = %err, "unread poll failed, skipping tick");
                                return TickOutcome::Continue;
                            }
                        }
                    }

                    let fetch_peer = peer.clone();
                    match call(&api, move |api| api.get_conversation(&fetch_peer)).await {
                        Ok(entries) => {
                            needs_full_fetch.store(false, Ordering::SeqCst);
                            post(&ui, UiMessage::Conversation { generation, entries })
                        }
                        Err(err) => {
                            warn!(%peer, error = %err, "conversation fetch failed, skipping tick");
                            TickOutcome::Continue
                        }
                    }
                }
            },
        );

        info!(%peer, generation, "conversation opened");
        *active = Some(ActiveConversation {
            peer,
            generation,
            cycle,
        });
    }

    pub fn close_conversation(&self) {
        let mut active = self.conversation.lock();
        self.conversation_generation.bump();
        if let Some(previous) = active.take() {
            previous.cycle.cancel();
            info!(peer = %previous.peer, "conversation closed");
        }
        let _ = self.ui_tx.send(UiMessage::ConversationClosed);
    }

    pub fn active_peer(&self) -> Option<Username> {
        self.conversation.lock().as_ref().map(|active| active.peer.clone())
    }

    /// Shows `text` in the open conversation right away and sends it in the
    /// background. Returns the local id used in later send events.
    pub fn send_message(&self, text: &str) -> Result<u64, SyncError> {
        if self.ui_tx.is_closed() {
            return Err(SyncError::ShutDown);
        }
        if text.trim().is_empty() {
            return Err(SyncError::EmptyMessage);
        }
        let (peer, generation) = self
            .conversation
            .lock()
            .as_ref()
            .map(|active| (active.peer.clone(), active.generation))
            .ok_or(SyncError::NoActiveConversation)?;

        let local_id = self.next_local_id.fetch_add(1, Ordering::SeqCst);
        let entry = ConversationEntry {
            sender: self.session.user.clone(),
            content: text.to_string(),
            created_at: now_millis(),
        };
        let _ = self.ui_tx.send(UiMessage::OutgoingQueued {
            generation,
            local_id,
            entry,
        });

        let api = Arc::clone(&self.api);
        let ui = self.ui_tx.clone();
        let text = text.to_string();
        self.runtime.spawn(async move {
            let receiver = peer.clone();
            let outcome = call(&api, move |api| api.send_message(&receiver, &text))
                .await
                .map_err(|err| err.to_string());
            let _ = ui.send(UiMessage::OutgoingResult {
                peer,
                local_id,
                outcome,
            });
        });
        Ok(local_id)
    }

    pub async fn send_friend_request(&self, to: Username) -> Result<(), GatewayError> {
        let target = to.clone();
        let result = call(&self.api, move |api| api.send_request(&target)).await;
        let message = match &result {
            Ok(()) => SyncEvent::FriendRequestSent(to),
            Err(err) => SyncEvent::ActionFailed {
                action: "send friend request".to_string(),
                reason: err.to_string(),
            },
        };
        let _ = self.ui_tx.send(UiMessage::Event(message));
        result
    }

    pub async fn accept_request(&self, requester: Username) -> Result<(), GatewayError> {
        self.settle_request(requester, RequestAction::Accept).await
    }

    pub async fn reject_request(&self, requester: Username) -> Result<(), GatewayError> {
        self.settle_request(requester, RequestAction::Reject).await
    }

    /// On success the request leaves the shadow immediately and the friend
    /// list refreshes without waiting for its next tick. A terminal failure
    /// means the request is no longer actionable, so it is dropped as well
    /// and both lists are re-polled.
    async fn settle_request(
        &self,
        requester: Username,
        action: RequestAction,
    ) -> Result<(), GatewayError> {
        let target = requester.clone();
        let result = call(&self.api, move |api| match action {
            RequestAction::Accept => api.accept(&target),
            RequestAction::Reject => api.reject(&target),
        })
        .await;

        match &result {
            Ok(()) => {
                self.request_generation.bump();
                let _ = self.ui_tx.send(UiMessage::RequestSettled { requester, action });
                self.friends_wake.notify_one();
            }
            Err(err) => {
                warn!(%requester, error = %err, action = action.label(), "request action failed");
                let _ = self.ui_tx.send(UiMessage::Event(SyncEvent::ActionFailed {
                    action: action.label().to_string(),
                    reason: err.to_string(),
                }));
                if !err.is_retryable() {
                    self.request_generation.bump();
                    let _ = self.ui_tx.send(UiMessage::RequestStale(requester));
                    self.requests_wake.notify_one();
                    self.friends_wake.notify_one();
                }
            }
        }
        result
    }

    /// Polls the friend list now instead of at the next tick.
    pub fn refresh_friends(&self) {
        self.friends_wake.notify_one();
    }

    pub fn refresh_requests(&self) {
        self.requests_wake.notify_one();
    }

    pub async fn snapshot(&self) -> Result<ShadowSnapshot, SyncError> {
        let (reply, response) = oneshot::channel();
        self.ui_tx
            .send(UiMessage::Snapshot(reply))
            .map_err(|_| SyncError::ShutDown)?;
        response.await.map_err(|_| SyncError::ShutDown)
    }

    /// Stops every cycle and the UI task, waiting at most the configured
    /// shutdown timeout in total. Returns whether everything stopped cleanly
    /// inside that bound.
    pub async fn shutdown(self) -> bool {
        let deadline = tokio::time::Instant::now() + self.config.shutdown_timeout;
        self.conversation_generation.bump();

        let mut cycles = vec![self.friend_cycle, self.request_cycle];
        if let Some(active) = self.conversation.into_inner() {
            cycles.push(active.cycle);
        }
        for cycle in &cycles {
            cycle.cancel();
        }

        let mut clean = true;
        for cycle in cycles {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            clean &= cycle.join(remaining).await;
        }

        let _ = self.ui_tx.send(UiMessage::Close);
        let mut ui_task = self.ui_task;
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if tokio::time::timeout(remaining, &mut ui_task).await.is_err() {
            warn!("ui task did not stop in time, aborting");
            ui_task.abort();
            clean = false;
        }

        info!(user = %self.session.user, clean, "client synchronizer stopped");
        clean
    }
}

/// Owner of the shadow state. Runs on one task; nothing else mutates it.
struct UiLoop {
    me: Username,
    policy: SendFailurePolicy,
    friends: FriendListShadow,
    requests: RequestShadow,
    transcript: Option<(u64, TranscriptShadow)>,
    conversation_generation: GenerationToken,
    request_generation: GenerationToken,
    events: mpsc::UnboundedSender<SyncEvent>,
}

impl UiLoop {
    async fn run(mut self, mut inbox: mpsc::UnboundedReceiver<UiMessage>) {
        while let Some(message) = inbox.recv().await {
            if matches!(message, UiMessage::Close) {
                break;
            }
            self.apply(message);
        }
        debug!(user = %self.me, "ui task stopped");
    }

    fn emit(&self, event: SyncEvent) {
        // the subscriber may have gone away; shadow state stays correct regardless
        let _ = self.events.send(event);
    }

    fn apply(&mut self, message: UiMessage) {
        match message {
            UiMessage::Friends(friends) => {
                let deltas = self.friends.reconcile(friends);
                if !deltas.is_empty() {
                    self.emit(SyncEvent::FriendListChanged(deltas));
                }
            }
            UiMessage::Requests { generation, users } => {
                if !self.request_generation.is_current(generation) {
                    debug!(generation, "dropping stale request poll");
                    return;
                }
                let (added, removed) = self.requests.reconcile(users);
                for user in added {
                    self.emit(SyncEvent::RequestReceived(user));
                }
                for user in removed {
                    self.emit(SyncEvent::RequestRemoved(user));
                }
            }
            UiMessage::RequestSettled { requester, action } => {
                self.requests.remove(&requester);
                self.emit(match action {
                    RequestAction::Accept => SyncEvent::RequestAccepted(requester),
                    RequestAction::Reject => SyncEvent::RequestRejected(requester),
                });
            }
            UiMessage::RequestStale(requester) => {
                if self.requests.remove(&requester) {
                    self.emit(SyncEvent::RequestRemoved(requester));
                }
            }
            UiMessage::ConversationOpened { generation, peer } => {
                self.transcript = Some((generation, TranscriptShadow::new(peer)));
            }
            UiMessage::ConversationClosed => {
                self.transcript = None;
            }
            UiMessage::Conversation {
                generation,
                entries,
            } => self.apply_conversation(generation, entries),
            UiMessage::OutgoingQueued {
                generation,
                local_id,
                entry,
            } => {
                if let Some((current, transcript)) = self.transcript.as_mut() {
                    if *current == generation {
                        transcript.push_local(local_id, entry.clone());
                        let peer = transcript.peer().clone();
                        self.emit(SyncEvent::MessageQueued {
                            peer,
                            local_id,
                            entry,
                        });
                    }
                }
            }
            UiMessage::OutgoingResult {
                peer,
                local_id,
                outcome,
            } => self.apply_send_outcome(peer, local_id, outcome),
            UiMessage::Event(event) => self.emit(event),
            UiMessage::Snapshot(reply) => {
                let _ = reply.send(ShadowSnapshot {
                    friends: self.friends.entries().to_vec(),
                    requests: self.requests.pending().to_vec(),
                    conversation: self
                        .transcript
                        .as_ref()
                        .map(|(_, transcript)| TranscriptSnapshot::from(transcript)),
                });
            }
            UiMessage::Close => {}
        }
    }

    fn apply_conversation(&mut self, generation: u64, entries: Vec<ConversationEntry>) {
        if !self.conversation_generation.is_current(generation) {
            debug!(generation, "dropping stale conversation result");
            return;
        }
        let Some((current, transcript)) = self.transcript.as_mut() else {
            return;
        };
        if *current != generation {
            return;
        }

        let first_load = !transcript.is_loaded();
        let before = transcript.confirmed().len();
        let fresh = transcript.apply_server(&self.me, entries);
        let changed = first_load || transcript.confirmed().len() != before;
        let peer = transcript.peer().clone();
        let confirmed = transcript.confirmed().to_vec();

        if !first_load {
            for entry in fresh {
                self.emit(SyncEvent::MessageReceived {
                    peer: peer.clone(),
                    entry,
                });
            }
        }
        if changed {
            self.emit(SyncEvent::TranscriptRefreshed {
                peer,
                entries: confirmed,
            });
        }
    }

    fn apply_send_outcome(&mut self, peer: Username, local_id: u64, outcome: Result<(), String>) {
        let transcript = self
            .transcript
            .as_mut()
            .map(|(_, transcript)| transcript)
            .filter(|transcript| transcript.peer() == &peer);

        match outcome {
            Ok(()) => {
                if let Some(transcript) = transcript {
                    transcript.mark_sent(local_id);
                }
                self.emit(SyncEvent::MessageSent { peer, local_id });
            }
            Err(reason) => {
                let rolled_back = self.policy == SendFailurePolicy::RollBack;
                if let Some(transcript) = transcript {
                    if rolled_back {
                        transcript.remove(local_id);
                    } else {
                        transcript.mark_failed(local_id);
                    }
                }
                warn!(%peer, local_id, %reason, rolled_back, "message send failed");
                self.emit(SyncEvent::SendFailed {
                    peer,
                    local_id,
                    reason,
                    rolled_back,
                });
            }
        }
    }
}
