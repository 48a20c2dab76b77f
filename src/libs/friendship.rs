use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::libs::core::models::{now_millis, CanonicalPair, FriendshipStatus, Username};
use crate::libs::storage::records::FriendshipRecord;
use crate::libs::storage::storage_traits::{ChatStore, Storage, StoreError, TransactionMode};

#[derive(Error, Debug)]
pub enum FriendshipError {
    #[error("cannot send a friend request to yourself")]
    SelfRequest,
    #[error("unknown user: {0}")]
    UnknownUser(Username),
    #[error("{0} and {1} are already friends")]
    AlreadyFriends(Username, Username),
    #[error("a friend request between {0} and {1} is already pending")]
    DuplicateRequest(Username, Username),
    #[error("no friend request between {0} and {1}")]
    NotFound(Username, Username),
    #[error("friend request was already {0:?}")]
    AlreadyProcessed(FriendshipStatus),
    #[error("cannot accept your own friend request")]
    SelfAccept,
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Owns the friend-request lifecycle. Every mutation is a single write
/// transaction keyed on the canonical pair, so concurrent callers on the same
/// pair serialize and the loser sees the winner's result.
pub struct FriendshipEngine<S: Storage> {
    store: Arc<S>,
}

impl<S: Storage> Clone for FriendshipEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

fn ensure_user(store: &mut dyn ChatStore, user: &Username) -> Result<(), FriendshipError> {
    if store.user_exists(user)? {
        Ok(())
    } else {
        Err(FriendshipError::UnknownUser(user.clone()))
    }
}

impl<S: Storage> FriendshipEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Opens a PENDING request from `from` to `to`. A previously rejected pair
    /// is reopened in place with `from` as the new initiator.
    pub fn send_request(&self, from: &Username, to: &Username) -> Result<(), FriendshipError> {
        if from == to {
            return Err(FriendshipError::SelfRequest);
        }
        let pair = CanonicalPair::new(from, to);

        let result: Result<(), FriendshipError> =
            self.store.transaction(TransactionMode::Write, |store| {
                ensure_user(store, from)?;
                ensure_user(store, to)?;

                match store.load_friendship(&pair)? {
                    None => {
                        store.insert_friendship(&FriendshipRecord::new(pair.clone(), from.clone()))?;
                        Ok(())
                    }
                    Some(record) => match record.status {
                        FriendshipStatus::Accepted => {
                            Err(FriendshipError::AlreadyFriends(from.clone(), to.clone()))
                        }
                        FriendshipStatus::Pending => {
                            Err(FriendshipError::DuplicateRequest(from.clone(), to.clone()))
                        }
                        FriendshipStatus::Rejected => {
                            store.update_friendship(
                                &pair,
                                FriendshipStatus::Pending,
                                from,
                                now_millis(),
                            )?;
                            Ok(())
                        }
                    },
                }
            });

        match &result {
            Ok(()) => info!(%from, %to, "friend request sent"),
            Err(err) => warn!(%from, %to, error = %err, "friend request refused"),
        }
        result
    }

    pub fn accept(&self, accepter: &Username, requester: &Username) -> Result<(), FriendshipError> {
        let result = self.settle(accepter, requester, FriendshipStatus::Accepted);
        match &result {
            Ok(()) => info!(%accepter, %requester, "friend request accepted"),
            Err(err) => warn!(%accepter, %requester, error = %err, "accept refused"),
        }
        result
    }

    /// Closes the pair's record whatever its current status. Rejecting an
    /// accepted friendship is how a friend is removed.
    pub fn reject(&self, rejecter: &Username, requester: &Username) -> Result<(), FriendshipError> {
        let result = self.settle(rejecter, requester, FriendshipStatus::Rejected);
        match &result {
            Ok(()) => info!(%rejecter, %requester, "friend request rejected"),
            Err(err) => warn!(%rejecter, %requester, error = %err, "reject refused"),
        }
        result
    }

    fn settle(
        &self,
        actor: &Username,
        counterpart: &Username,
        outcome: FriendshipStatus,
    ) -> Result<(), FriendshipError> {
        let pair = CanonicalPair::new(actor, counterpart);

        self.store.transaction(TransactionMode::Write, |store| {
            let record = store
                .load_friendship(&pair)?
                .ok_or_else(|| FriendshipError::NotFound(actor.clone(), counterpart.clone()))?;

            if outcome == FriendshipStatus::Accepted {
                if record.status != FriendshipStatus::Pending {
                    return Err(FriendshipError::AlreadyProcessed(record.status));
                }
                if &record.initiated_by == actor {
                    return Err(FriendshipError::SelfAccept);
                }
            }

            store.update_friendship(&pair, outcome, &record.initiated_by, now_millis())?;
            Ok(())
        })
    }

    /// Every user with an accepted friendship involving `user`.
    pub fn list_friends(&self, user: &Username) -> Result<Vec<Username>, FriendshipError> {
        self.store.transaction(TransactionMode::Read, |store| {
            let records = store.friendships_for(user, FriendshipStatus::Accepted)?;
            Ok(records
                .iter()
                .filter_map(|record| record.pair.other(user).cloned())
                .collect())
        })
    }

    /// Senders of pending requests addressed to `user`; requests `user` sent
    /// are excluded.
    pub fn list_incoming_requests(&self, user: &Username) -> Result<Vec<Username>, FriendshipError> {
        self.store.transaction(TransactionMode::Read, |store| {
            let records = store.friendships_for(user, FriendshipStatus::Pending)?;
            Ok(records
                .into_iter()
                .filter(|record| &record.initiated_by != user)
                .map(|record| record.initiated_by)
                .collect())
        })
    }

    pub fn friendship(
        &self,
        a: &Username,
        b: &Username,
    ) -> Result<Option<FriendshipRecord>, FriendshipError> {
        let pair = CanonicalPair::new(a, b);
        self.store
            .transaction(TransactionMode::Read, |store| Ok(store.load_friendship(&pair)?))
    }
}
