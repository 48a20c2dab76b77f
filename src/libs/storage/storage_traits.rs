use crate::libs::core::models::{CanonicalPair, FriendshipStatus, Username};
use crate::libs::storage::records::{FriendshipRecord, MessageRecord, UserRecord};
use thiserror::Error;

/// Whether a unit of work only reads or also mutates records. Writers take
/// the store's write lock up front so read-modify-write sequences serialize.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    Read,
    Write,
}

pub trait Storage: Send + Sync {
    /// Runs `work` inside one transaction: committed when it returns `Ok`,
    /// rolled back when it returns `Err`.
    fn transaction<T, E, F>(&self, mode: TransactionMode, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn ChatStore) -> Result<T, E>,
        E: From<StoreError>;
}

pub trait Transactional {
    fn commit(self) -> Result<(), StoreError>;
    fn rollback(self) -> Result<(), StoreError>;
}

pub trait UserStore {
    fn create_user(&mut self, record: &UserRecord) -> Result<(), StoreError>;
    fn load_user(&mut self, username: &Username) -> Result<Option<UserRecord>, StoreError>;
    fn user_exists(&mut self, username: &Username) -> Result<bool, StoreError>;
    fn update_avatar(&mut self, username: &Username, avatar: &[u8]) -> Result<bool, StoreError>;
    fn update_credential(
        &mut self,
        username: &Username,
        credential_hash: &[u8],
    ) -> Result<bool, StoreError>;
    fn search_users(&mut self, term: &str, limit: usize) -> Result<Vec<Username>, StoreError>;
}

pub trait FriendshipStore {
    fn load_friendship(
        &mut self,
        pair: &CanonicalPair,
    ) -> Result<Option<FriendshipRecord>, StoreError>;
    fn insert_friendship(&mut self, record: &FriendshipRecord) -> Result<(), StoreError>;
    fn update_friendship(
        &mut self,
        pair: &CanonicalPair,
        status: FriendshipStatus,
        initiated_by: &Username,
        updated_at: i64,
    ) -> Result<(), StoreError>;
    fn friendships_for(
        &mut self,
        user: &Username,
        status: FriendshipStatus,
    ) -> Result<Vec<FriendshipRecord>, StoreError>;
    fn count_friendship_records(&mut self, pair: &CanonicalPair) -> Result<usize, StoreError>;
}

pub trait MessageStore {
    /// Inserts the message and returns its store-wide sequence number.
    fn insert_message(&mut self, record: &MessageRecord) -> Result<i64, StoreError>;
    fn messages_between(
        &mut self,
        a: &Username,
        b: &Username,
    ) -> Result<Vec<MessageRecord>, StoreError>;
    fn last_message_between(
        &mut self,
        a: &Username,
        b: &Username,
    ) -> Result<Option<MessageRecord>, StoreError>;
    fn mark_read(&mut self, receiver: &Username, sender: &Username) -> Result<usize, StoreError>;
    /// Unread count derived from the messages table itself.
    fn count_unread_messages(
        &mut self,
        receiver: &Username,
        sender: &Username,
    ) -> Result<u32, StoreError>;
    fn increment_unread(&mut self, receiver: &Username, sender: &Username)
        -> Result<(), StoreError>;
    fn reset_unread(&mut self, receiver: &Username, sender: &Username) -> Result<(), StoreError>;
    fn unread_counter(
        &mut self,
        receiver: &Username,
        sender: &Username,
    ) -> Result<Option<u32>, StoreError>;
}

pub trait ChatStore: UserStore + FriendshipStore + MessageStore {}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Sqlite Error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("ConnectionPool Error: {0}")]
    ConnectionPool(#[from] r2d2::Error),
    #[error("Conversion Error: {0}")]
    Conversion(String),
    #[error("User Already Exists: {0}")]
    UserAlreadyExists(String),
    #[error("Migration Error: {0}")]
    Migration(String),
}
