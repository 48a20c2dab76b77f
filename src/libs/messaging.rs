use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info};

use crate::libs::core::models::{ConversationEntry, FriendSummary, Username};
use crate::libs::storage::records::MessageRecord;
use crate::libs::storage::storage_traits::{ChatStore, Storage, StoreError, TransactionMode};

#[derive(Error, Debug)]
pub enum MessagingError {
    #[error("message is empty")]
    EmptyMessage,
    #[error("unknown user: {0}")]
    UnknownUser(Username),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Message persistence plus the per-direction unread counters. A counter is
/// only ever touched in the same transaction as the message rows it counts.
pub struct MessagingEngine<S: Storage> {
    store: Arc<S>,
}

impl<S: Storage> Clone for MessagingEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

fn ensure_users(
    store: &mut dyn ChatStore,
    users: [&Username; 2],
) -> Result<(), MessagingError> {
    for user in users {
        if !store.user_exists(user)? {
            return Err(MessagingError::UnknownUser(user.clone()));
        }
    }
    Ok(())
}

impl<S: Storage> MessagingEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Persists an unread message and bumps the sender->receiver counter.
    pub fn send(
        &self,
        sender: &Username,
        receiver: &Username,
        text: &str,
    ) -> Result<MessageRecord, MessagingError> {
        if text.trim().is_empty() {
            return Err(MessagingError::EmptyMessage);
        }

        let mut record = MessageRecord::new(sender.clone(), receiver.clone(), text.to_string());
        let seq = self.store.transaction(TransactionMode::Write, |store| {
            ensure_users(store, [sender, receiver])?;
            let seq = store.insert_message(&record)?;
            store.increment_unread(receiver, sender)?;
            Ok::<_, MessagingError>(seq)
        })?;
        record.seq = seq;

        info!(%sender, %receiver, seq, "message stored");
        Ok(record)
    }

    /// Whole conversation between `reader` and `peer`, oldest first. Reading
    /// acknowledges: everything `peer` sent to `reader` is marked read and
    /// that direction's counter drops to zero.
    pub fn fetch_conversation(
        &self,
        reader: &Username,
        peer: &Username,
    ) -> Result<Vec<ConversationEntry>, MessagingError> {
        let (entries, acknowledged) = self.store.transaction(TransactionMode::Write, |store| {
            ensure_users(store, [reader, peer])?;
            let messages = store.messages_between(reader, peer)?;
            let acknowledged = store.mark_read(reader, peer)?;
            store.reset_unread(reader, peer)?;
            let entries: Vec<ConversationEntry> =
                messages.iter().map(MessageRecord::to_entry).collect();
            Ok::<_, MessagingError>((entries, acknowledged))
        })?;

        debug!(%reader, %peer, messages = entries.len(), acknowledged, "conversation fetched");
        Ok(entries)
    }

    /// Messages from `sender` that `receiver` has not read yet; zero when the
    /// pair has never exchanged anything.
    pub fn unread_count(&self, receiver: &Username, sender: &Username) -> Result<u32, MessagingError> {
        self.store.transaction(TransactionMode::Read, |store| {
            Ok(store.unread_counter(receiver, sender)?.unwrap_or(0))
        })
    }

    pub fn last_message(
        &self,
        a: &Username,
        b: &Username,
    ) -> Result<Option<MessageRecord>, MessagingError> {
        self.store
            .transaction(TransactionMode::Read, |store| Ok(store.last_message_between(a, b)?))
    }

    /// Friend-list row for `friend` as seen by `owner`, read from one snapshot.
    pub fn summary(&self, owner: &Username, friend: &Username) -> Result<FriendSummary, MessagingError> {
        self.store.transaction(TransactionMode::Read, |store| {
            let last = store.last_message_between(owner, friend)?;
            let unread = store.unread_counter(owner, friend)?.unwrap_or(0);
            Ok(FriendSummary {
                user: friend.clone(),
                last_message: last.as_ref().map(|message| message.content.clone()),
                unread_count: unread,
                last_timestamp: last.map(|message| message.created_at),
            })
        })
    }
}
