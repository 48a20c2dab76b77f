use crate::libs::core::config::StoreConfig;
use crate::libs::core::models::{CanonicalPair, FriendshipStatus, Username};
use crate::libs::storage::database::database;
use crate::libs::storage::records::{FriendshipRecord, MessageRecord, UserRecord};
use crate::libs::storage::storage_traits::{
    ChatStore, FriendshipStore, MessageStore, Storage, StoreError, TransactionMode, Transactional,
    UserStore,
};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction, TransactionBehavior};
use tracing::warn;

const FRIENDSHIP_COLUMNS: &str =
    "friendship_id, user_low, user_high, status, initiated_by, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "seq, message_id, sender, receiver, content, is_read, created_at";

pub struct SqliteTransaction<'conn> {
    tx: Transaction<'conn>,
}

impl<'conn> SqliteTransaction<'conn> {
    pub fn new(conn: &'conn mut Connection, mode: TransactionMode) -> Result<Self, StoreError> {
        let behavior = match mode {
            TransactionMode::Read => TransactionBehavior::Deferred,
            TransactionMode::Write => TransactionBehavior::Immediate,
        };
        let trans = conn.transaction_with_behavior(behavior)?;
        Ok(Self { tx: trans })
    }
}

impl<'conn> Transactional for SqliteTransaction<'conn> {
    fn commit(self) -> Result<(), StoreError> {
        self.tx.commit().map_err(StoreError::from)
    }

    fn rollback(self) -> Result<(), StoreError> {
        self.tx.rollback().map_err(StoreError::from)
    }
}

#[derive(Debug)]
pub struct SqliteStore {
    conn_pool: Pool<SqliteConnectionManager>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `config.path` and brings the
    /// schema up to date.
    pub fn open(config: &StoreConfig) -> Result<Self, StoreError> {
        let busy_timeout = config.busy_timeout;
        let manager = SqliteConnectionManager::file(&config.path)
            .with_init(move |conn| database::configure_connection(conn, busy_timeout));
        let pool = Pool::builder()
            .max_size(config.max_connections)
            .build(manager)?;
        let store = Self { conn_pool: pool };

        let mut connection = store.new_connection()?;
        database::db_migration(&mut connection)?;
        Ok(store)
    }

    pub fn new_connection(&self) -> Result<PooledConnection<SqliteConnectionManager>, StoreError> {
        Ok(self.conn_pool.get()?)
    }
}

impl Storage for SqliteStore {
    fn transaction<T, E, F>(&self, mode: TransactionMode, work: F) -> Result<T, E>
    where
        F: FnOnce(&mut dyn ChatStore) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut connection = self.new_connection()?;
        let mut sqlite_transaction = SqliteTransaction::new(&mut connection, mode)?;

        match work(&mut sqlite_transaction) {
            Ok(value) => {
                sqlite_transaction.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = sqlite_transaction.rollback() {
                    warn!(error = %rollback_err, "rollback failed");
                }
                Err(err)
            }
        }
    }
}

impl<'conn> ChatStore for SqliteTransaction<'conn> {}

fn friendship_from_row(row: &Row<'_>) -> rusqlite::Result<FriendshipRecord> {
    let low: Username = row.get(1)?;
    let high: Username = row.get(2)?;
    Ok(FriendshipRecord::from_db(
        row.get(0)?,
        CanonicalPair::new(&low, &high),
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRecord> {
    Ok(MessageRecord::from_db(
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

impl<'conn> UserStore for SqliteTransaction<'conn> {
    fn create_user(&mut self, record: &UserRecord) -> Result<(), StoreError> {
        if self.user_exists(&record.username)? {
            return Err(StoreError::UserAlreadyExists(record.username.to_string()));
        }

        self.tx.execute(
            "INSERT INTO users (username, credential_hash, avatar, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                record.username,
                record.credential_hash,
                record.avatar,
                record.created_at
            ],
        )?;
        Ok(())
    }

    fn load_user(&mut self, username: &Username) -> Result<Option<UserRecord>, StoreError> {
        let user = self
            .tx
            .query_row(
                "SELECT username, credential_hash, avatar, created_at FROM users WHERE username = ?1",
                params![username],
                |row| {
                    Ok(UserRecord {
                        username: row.get(0)?,
                        credential_hash: row.get(1)?,
                        avatar: row.get(2)?,
                        created_at: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(user)
    }

    fn user_exists(&mut self, username: &Username) -> Result<bool, StoreError> {
        let count: i64 = self.tx.query_row(
            "SELECT COUNT(*) FROM users WHERE username = ?1",
            params![username],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    fn update_avatar(&mut self, username: &Username, avatar: &[u8]) -> Result<bool, StoreError> {
        let changed = self.tx.execute(
            "UPDATE users SET avatar = ?1 WHERE username = ?2",
            params![avatar, username],
        )?;
        Ok(changed == 1)
    }

    fn update_credential(
        &mut self,
        username: &Username,
        credential_hash: &[u8],
    ) -> Result<bool, StoreError> {
        let changed = self.tx.execute(
            "UPDATE users SET credential_hash = ?1 WHERE username = ?2",
            params![credential_hash, username],
        )?;
        Ok(changed == 1)
    }

    fn search_users(&mut self, term: &str, limit: usize) -> Result<Vec<Username>, StoreError> {
        let limit = i64::try_from(limit).map_err(|e| StoreError::Conversion(e.to_string()))?;
        let mut stmt = self.tx.prepare(
            "SELECT username FROM users WHERE instr(username, ?1) > 0 ORDER BY username LIMIT ?2",
        )?;
        let users = stmt
            .query_map(params![term, limit], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<Username>>>()?;
        Ok(users)
    }
}

impl<'conn> FriendshipStore for SqliteTransaction<'conn> {
    fn load_friendship(
        &mut self,
        pair: &CanonicalPair,
    ) -> Result<Option<FriendshipRecord>, StoreError> {
        let record = self
            .tx
            .query_row(
                &format!(
                    "SELECT {} FROM friendships WHERE user_low = ?1 AND user_high = ?2",
                    FRIENDSHIP_COLUMNS
                ),
                params![pair.low(), pair.high()],
                friendship_from_row,
            )
            .optional()?;
        Ok(record)
    }

    fn insert_friendship(&mut self, record: &FriendshipRecord) -> Result<(), StoreError> {
        self.tx.execute(
            &format!(
                "INSERT INTO friendships ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                FRIENDSHIP_COLUMNS
            ),
            params![
                record.friendship_id,
                record.pair.low(),
                record.pair.high(),
                record.status,
                record.initiated_by,
                record.created_at,
                record.updated_at
            ],
        )?;
        Ok(())
    }

    fn update_friendship(
        &mut self,
        pair: &CanonicalPair,
        status: FriendshipStatus,
        initiated_by: &Username,
        updated_at: i64,
    ) -> Result<(), StoreError> {
        self.tx.execute(
            "UPDATE friendships SET status = ?1, initiated_by = ?2, updated_at = ?3
             WHERE user_low = ?4 AND user_high = ?5",
            params![status, initiated_by, updated_at, pair.low(), pair.high()],
        )?;
        Ok(())
    }

    fn friendships_for(
        &mut self,
        user: &Username,
        status: FriendshipStatus,
    ) -> Result<Vec<FriendshipRecord>, StoreError> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT {} FROM friendships
             WHERE (user_low = ?1 OR user_high = ?1) AND status = ?2
             ORDER BY updated_at, friendship_id",
            FRIENDSHIP_COLUMNS
        ))?;
        let records = stmt
            .query_map(params![user, status], friendship_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    fn count_friendship_records(&mut self, pair: &CanonicalPair) -> Result<usize, StoreError> {
        let count: i64 = self.tx.query_row(
            "SELECT COUNT(*) FROM friendships WHERE user_low = ?1 AND user_high = ?2",
            params![pair.low(), pair.high()],
            |row| row.get(0),
        )?;
        usize::try_from(count).map_err(|e| StoreError::Conversion(e.to_string()))
    }
}

impl<'conn> MessageStore for SqliteTransaction<'conn> {
    fn insert_message(&mut self, record: &MessageRecord) -> Result<i64, StoreError> {
        self.tx.execute(
            "INSERT INTO messages (message_id, sender, receiver, content, is_read, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                record.message_id,
                record.sender,
                record.receiver,
                record.content,
                record.is_read,
                record.created_at
            ],
        )?;
        Ok(self.tx.last_insert_rowid())
    }

    fn messages_between(
        &mut self,
        a: &Username,
        b: &Username,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let mut stmt = self.tx.prepare(&format!(
            "SELECT {} FROM messages
             WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)
             ORDER BY seq ASC",
            MESSAGE_COLUMNS
        ))?;
        let messages = stmt
            .query_map(params![a, b], message_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(messages)
    }

    fn last_message_between(
        &mut self,
        a: &Username,
        b: &Username,
    ) -> Result<Option<MessageRecord>, StoreError> {
        let message = self
            .tx
            .query_row(
                &format!(
                    "SELECT {} FROM messages
                     WHERE (sender = ?1 AND receiver = ?2) OR (sender = ?2 AND receiver = ?1)
                     ORDER BY seq DESC LIMIT 1",
                    MESSAGE_COLUMNS
                ),
                params![a, b],
                message_from_row,
            )
            .optional()?;
        Ok(message)
    }

    fn mark_read(&mut self, receiver: &Username, sender: &Username) -> Result<usize, StoreError> {
        let changed = self.tx.execute(
            "UPDATE messages SET is_read = 1
             WHERE receiver = ?1 AND sender = ?2 AND is_read = 0",
            params![receiver, sender],
        )?;
        Ok(changed)
    }

    fn count_unread_messages(
        &mut self,
        receiver: &Username,
        sender: &Username,
    ) -> Result<u32, StoreError> {
        let count: u32 = self.tx.query_row(
            "SELECT COUNT(*) FROM messages WHERE receiver = ?1 AND sender = ?2 AND is_read = 0",
            params![receiver, sender],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    fn increment_unread(
        &mut self,
        receiver: &Username,
        sender: &Username,
    ) -> Result<(), StoreError> {
        self.tx.execute(
            "INSERT INTO unread_counters (receiver, sender, unread) VALUES (?1, ?2, 1)
             ON CONFLICT (receiver, sender) DO UPDATE SET unread = unread + 1",
            params![receiver, sender],
        )?;
        Ok(())
    }

    fn reset_unread(&mut self, receiver: &Username, sender: &Username) -> Result<(), StoreError> {
        self.tx.execute(
            "UPDATE unread_counters SET unread = 0 WHERE receiver = ?1 AND sender = ?2",
            params![receiver, sender],
        )?;
        Ok(())
    }

    fn unread_counter(
        &mut self,
        receiver: &Username,
        sender: &Username,
    ) -> Result<Option<u32>, StoreError> {
        let count = self
            .tx
            .query_row(
                "SELECT unread FROM unread_counters WHERE receiver = ?1 AND sender = ?2",
                params![receiver, sender],
                |row| row.get(0),
            )
            .optional()?;
        Ok(count)
    }
}
