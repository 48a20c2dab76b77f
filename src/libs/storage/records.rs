use crate::libs::core::models::{
    now_millis, CanonicalPair, ConversationEntry, FriendshipStatus, RecordId, Username,
};

#[derive(Debug, Clone)]
pub struct UserRecord {
    pub username: Username,
    pub credential_hash: Vec<u8>,
    pub avatar: Option<Vec<u8>>,
    pub created_at: i64,
}

impl UserRecord {
    pub fn new(username: Username, credential_hash: Vec<u8>) -> Self {
        Self {
            username,
            credential_hash,
            avatar: None,
            created_at: now_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FriendshipRecord {
    pub friendship_id: RecordId,
    pub pair: CanonicalPair,
    pub status: FriendshipStatus,
    pub initiated_by: Username,
    pub created_at: i64,
    pub updated_at: i64,
}

impl FriendshipRecord {
    /// A fresh PENDING request from `initiated_by` to the other member of `pair`.
    pub fn new(pair: CanonicalPair, initiated_by: Username) -> Self {
        let now = now_millis();
        Self {
            friendship_id: RecordId::generate(),
            pair,
            status: FriendshipStatus::Pending,
            initiated_by,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn from_db(
        friendship_id: RecordId,
        pair: CanonicalPair,
        status: FriendshipStatus,
        initiated_by: Username,
        created_at: i64,
        updated_at: i64,
    ) -> Self {
        Self {
            friendship_id,
            pair,
            status,
            initiated_by,
            created_at,
            updated_at,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MessageRecord {
    /// Store-wide insertion order; zero until persisted.
    pub seq: i64,
    pub message_id: RecordId,
    pub sender: Username,
    pub receiver: Username,
    pub content: String,
    pub is_read: bool,
    pub created_at: i64,
}

impl MessageRecord {
    pub fn new(sender: Username, receiver: Username, content: String) -> Self {
        Self {
            seq: 0,
            message_id: RecordId::generate(),
            sender,
            receiver,
            content,
            is_read: false,
            created_at: now_millis(),
        }
    }

    pub fn from_db(
        seq: i64,
        message_id: RecordId,
        sender: Username,
        receiver: Username,
        content: String,
        is_read: bool,
        created_at: i64,
    ) -> Self {
        Self {
            seq,
            message_id,
            sender,
            receiver,
            content,
            is_read,
            created_at,
        }
    }

    pub fn to_entry(&self) -> ConversationEntry {
        ConversationEntry {
            sender: self.sender.clone(),
            content: self.content.clone(),
            created_at: self.created_at,
        }
    }
}
