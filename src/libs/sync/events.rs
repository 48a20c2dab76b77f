use crate::libs::core::models::{ConversationEntry, FriendSummary, Username};

/// One positional change to the rendered friend list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FriendListDelta {
    Added { index: usize, summary: FriendSummary },
    Removed { index: usize, user: Username },
    Updated { index: usize, summary: FriendSummary },
}

/// What the UI layer subscribes to. Emitted in order from a single task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    FriendListChanged(Vec<FriendListDelta>),
    RequestReceived(Username),
    /// The request disappeared without this client settling it.
    RequestRemoved(Username),
    RequestAccepted(Username),
    RequestRejected(Username),
    FriendRequestSent(Username),
    MessageQueued {
        peer: Username,
        local_id: u64,
        entry: ConversationEntry,
    },
    MessageReceived {
        peer: Username,
        entry: ConversationEntry,
    },
    /// Server transcript for the open conversation after a refresh.
    TranscriptRefreshed {
        peer: Username,
        entries: Vec<ConversationEntry>,
    },
    MessageSent {
        peer: Username,
        local_id: u64,
    },
    SendFailed {
        peer: Username,
        local_id: u64,
        reason: String,
        rolled_back: bool,
    },
    /// A user-initiated action failed; `reason` is fit for display.
    ActionFailed {
        action: String,
        reason: String,
    },
}
