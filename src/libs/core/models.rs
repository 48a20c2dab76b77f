use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, ValueRef};
use rusqlite::ToSql;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique user handle. Doubles as the primary key of a user record.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Username(String);

impl Username {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Username {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for Username {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl ToSql for Username {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.as_str()))
    }
}

impl FromSql for Username {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value.as_str().map(|name| Username(name.to_string()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RecordId {
    pub uuid: Uuid,
}

impl RecordId {
    pub fn generate() -> Self {
        Self {
            uuid: Uuid::now_v7(),
        }
    }
}

impl From<[u8; 16]> for RecordId {
    fn from(bytes: [u8; 16]) -> RecordId {
        Self {
            uuid: Uuid::from_bytes(bytes),
        }
    }
}

impl ToSql for RecordId {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.uuid.to_string()))
    }
}

impl FromSql for RecordId {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let uuid_str = value.as_str()?;
        Uuid::parse_str(uuid_str)
            .map(|uuid| RecordId { uuid })
            .map_err(|e| FromSqlError::Other(Box::new(e)))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FriendshipStatus {
    Pending,
    Accepted,
    Rejected,
}

impl FromSql for FriendshipStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value.as_str()? {
            "pending" => Ok(FriendshipStatus::Pending),
            "accepted" => Ok(FriendshipStatus::Accepted),
            "rejected" => Ok(FriendshipStatus::Rejected),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

impl ToSql for FriendshipStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            FriendshipStatus::Pending => Ok(ToSqlOutput::from("pending")),
            FriendshipStatus::Accepted => Ok(ToSqlOutput::from("accepted")),
            FriendshipStatus::Rejected => Ok(ToSqlOutput::from("rejected")),
        }
    }
}

/// An unordered pair of users stored lowest-name-first, so each pair maps to
/// exactly one friendship row.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct CanonicalPair {
    low: Username,
    high: Username,
}

impl CanonicalPair {
    pub fn new(a: &Username, b: &Username) -> Self {
        if a <= b {
            Self {
                low: a.clone(),
                high: b.clone(),
            }
        } else {
            Self {
                low: b.clone(),
                high: a.clone(),
            }
        }
    }

    pub fn low(&self) -> &Username {
        &self.low
    }

    pub fn high(&self) -> &Username {
        &self.high
    }

    /// The member of the pair that is not `user`.
    pub fn other(&self, user: &Username) -> Option<&Username> {
        if &self.low == user {
            Some(&self.high)
        } else if &self.high == user {
            Some(&self.low)
        } else {
            None
        }
    }
}

/// One line of a conversation as returned to clients.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationEntry {
    pub sender: Username,
    pub content: String,
    pub created_at: i64,
}

/// Friend-list row: the friend plus the latest activity between the pair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FriendSummary {
    pub user: Username,
    pub last_message: Option<String>,
    pub unread_count: u32,
    pub last_timestamp: Option<i64>,
}

impl FriendSummary {
    pub fn without_activity(user: Username) -> Self {
        Self {
            user,
            last_message: None,
            unread_count: 0,
            last_timestamp: None,
        }
    }
}

/// Unix time in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Short "time since" label shown next to a friend's last message.
pub fn elapsed_label(now_ms: i64, then_ms: i64) -> String {
    let elapsed = chrono::Duration::milliseconds(now_ms.saturating_sub(then_ms).max(0));
    if elapsed.num_minutes() < 1 {
        "now".to_string()
    } else if elapsed.num_hours() < 1 {
        format!("{}m", elapsed.num_minutes())
    } else if elapsed.num_days() < 1 {
        format!("{}h", elapsed.num_hours())
    } else {
        format!("{}d", elapsed.num_days())
    }
}
