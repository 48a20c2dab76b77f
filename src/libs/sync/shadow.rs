use std::collections::{HashMap, HashSet};

use crate::libs::core::models::{ConversationEntry, FriendSummary, Username};
use crate::libs::sync::events::FriendListDelta;

/// Last friend list shown to the user, in display order.
#[derive(Debug, Clone, Default)]
pub struct FriendListShadow {
    entries: Vec<FriendSummary>,
}

impl FriendListShadow {
    pub fn entries(&self) -> &[FriendSummary] {
        &self.entries
    }

    /// Brings the shadow in line with `fresh` by key and returns the edits.
    ///
    /// Rows that stay keep their position. Removals are reported back to
    /// front so each index is valid at the time it is applied; additions are
    /// appended in server order.
    pub fn reconcile(&mut self, fresh: Vec<FriendSummary>) -> Vec<FriendListDelta> {
        let mut deltas = Vec::new();
        let by_user: HashMap<Username, &FriendSummary> =
            fresh.iter().map(|summary| (summary.user.clone(), summary)).collect();

        for index in (0..self.entries.len()).rev() {
            if !by_user.contains_key(&self.entries[index].user) {
                let removed = self.entries.remove(index);
                deltas.push(FriendListDelta::Removed {
                    index,
                    user: removed.user,
                });
            }
        }

        for (index, entry) in self.entries.iter_mut().enumerate() {
            if let Some(latest) = by_user.get(&entry.user) {
                if **latest != *entry {
                    *entry = (*latest).clone();
                    deltas.push(FriendListDelta::Updated {
                        index,
                        summary: entry.clone(),
                    });
                }
            }
        }

        let mut known: HashSet<Username> =
            self.entries.iter().map(|entry| entry.user.clone()).collect();
        for summary in fresh {
            if known.insert(summary.user.clone()) {
                self.entries.push(summary.clone());
                deltas.push(FriendListDelta::Added {
                    index: self.entries.len() - 1,
                    summary,
                });
            }
        }

        deltas
    }
}

/// Pending incoming requests the user has been shown.
#[derive(Debug, Clone, Default)]
pub struct RequestShadow {
    pending: Vec<Username>,
}

impl RequestShadow {
    pub fn pending(&self) -> &[Username] {
        &self.pending
    }

    /// Returns `(added, removed)`.
    pub fn reconcile(&mut self, fresh: Vec<Username>) -> (Vec<Username>, Vec<Username>) {
        let fresh_set: HashSet<&Username> = fresh.iter().collect();
        let mut removed = Vec::new();
        self.pending.retain(|user| {
            let keep = fresh_set.contains(user);
            if !keep {
                removed.push(user.clone());
            }
            keep
        });

        let mut added = Vec::new();
        for user in fresh {
            if !self.pending.contains(&user) {
                self.pending.push(user.clone());
                added.push(user);
            }
        }
        (added, removed)
    }

    pub fn remove(&mut self, user: &Username) -> bool {
        let before = self.pending.len();
        self.pending.retain(|pending| pending != user);
        self.pending.len() != before
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Failed,
}

/// An outgoing message shown before the server has it in the transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalEntry {
    pub local_id: u64,
    pub entry: ConversationEntry,
    pub status: DeliveryStatus,
}

/// Transcript of the open conversation: what the server last returned plus
/// optimistic local sends not yet seen in it.
#[derive(Debug, Clone)]
pub struct TranscriptShadow {
    peer: Username,
    loaded: bool,
    confirmed: Vec<ConversationEntry>,
    local: Vec<LocalEntry>,
}

impl TranscriptShadow {
    pub fn new(peer: Username) -> Self {
        Self {
            peer,
            loaded: false,
            confirmed: Vec::new(),
            local: Vec::new(),
        }
    }

    pub fn peer(&self) -> &Username {
        &self.peer
    }

    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn confirmed(&self) -> &[ConversationEntry] {
        &self.confirmed
    }

    pub fn local(&self) -> &[LocalEntry] {
        &self.local
    }

    /// Replaces the confirmed transcript with the server's and returns the
    /// entries from the peer that were not there before. Local entries the
    /// server now holds are dropped; failed ones stay until removed.
    pub fn apply_server(
        &mut self,
        me: &Username,
        entries: Vec<ConversationEntry>,
    ) -> Vec<ConversationEntry> {
        let known = self.confirmed.len().min(entries.len());
        let fresh: Vec<ConversationEntry> = entries[known..].to_vec();

        for entry in fresh.iter().filter(|entry| &entry.sender == me) {
            let delivered = self.local.iter().position(|local| {
                local.status != DeliveryStatus::Failed && local.entry.content == entry.content
            });
            if let Some(position) = delivered {
                self.local.remove(position);
            }
        }

        self.confirmed = entries;
        self.loaded = true;
        fresh.into_iter().filter(|entry| &entry.sender != me).collect()
    }

    pub fn push_local(&mut self, local_id: u64, entry: ConversationEntry) {
        self.local.push(LocalEntry {
            local_id,
            entry,
            status: DeliveryStatus::Pending,
        });
    }

    fn set_status(&mut self, local_id: u64, status: DeliveryStatus) -> bool {
        match self.local.iter_mut().find(|local| local.local_id == local_id) {
            Some(local) => {
                local.status = status;
                true
            }
            None => false,
        }
    }

    pub fn mark_sent(&mut self, local_id: u64) -> bool {
        self.set_status(local_id, DeliveryStatus::Sent)
    }

    pub fn mark_failed(&mut self, local_id: u64) -> bool {
        self.set_status(local_id, DeliveryStatus::Failed)
    }

    pub fn remove(&mut self, local_id: u64) -> bool {
        let before = self.local.len();
        self.local.retain(|local| local.local_id != local_id);
        self.local.len() != before
    }
}

/// Copy of everything the client currently shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowSnapshot {
    pub friends: Vec<FriendSummary>,
    pub requests: Vec<Username>,
    pub conversation: Option<TranscriptSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriptSnapshot {
    pub peer: Username,
    pub confirmed: Vec<ConversationEntry>,
    pub local: Vec<LocalEntry>,
}

impl From<&TranscriptShadow> for TranscriptSnapshot {
    fn from(shadow: &TranscriptShadow) -> Self {
        Self {
            peer: shadow.peer.clone(),
            confirmed: shadow.confirmed.clone(),
            local: shadow.local.clone(),
        }
    }
}
