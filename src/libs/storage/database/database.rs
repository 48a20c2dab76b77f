use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use crate::libs::storage::storage_traits::StoreError;

pub const SCHEMA_VERSION: &str = "1";

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    username TEXT PRIMARY KEY,
    credential_hash BLOB NOT NULL,
    avatar BLOB,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS friendships (
    friendship_id TEXT PRIMARY KEY,
    user_low TEXT NOT NULL,
    user_high TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    initiated_by TEXT NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,

    UNIQUE (user_low, user_high),
    FOREIGN KEY (user_low) REFERENCES users(username) ON DELETE CASCADE,
    FOREIGN KEY (user_high) REFERENCES users(username) ON DELETE CASCADE,

    CHECK (user_low < user_high),
    CHECK (initiated_by IN (user_low, user_high)),
    CHECK (status IN ('pending', 'accepted', 'rejected'))
);
CREATE INDEX IF NOT EXISTS idx_friendships_user_high ON friendships(user_high, status);

CREATE TABLE IF NOT EXISTS messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id TEXT NOT NULL UNIQUE,
    sender TEXT NOT NULL,
    receiver TEXT NOT NULL,
    content TEXT NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,

    FOREIGN KEY (sender) REFERENCES users(username) ON DELETE CASCADE,
    FOREIGN KEY (receiver) REFERENCES users(username) ON DELETE CASCADE,

    CHECK (is_read IN (0, 1))
);
CREATE INDEX IF NOT EXISTS idx_messages_sender_receiver ON messages(sender, receiver, seq);
CREATE INDEX IF NOT EXISTS idx_messages_receiver_sender ON messages(receiver, sender, is_read);

-- one row per (receiver, sender) direction, kept in step with messages.is_read
CREATE TABLE IF NOT EXISTS unread_counters (
    receiver TEXT NOT NULL,
    sender TEXT NOT NULL,
    unread INTEGER NOT NULL DEFAULT 0,

    PRIMARY KEY (receiver, sender),
    FOREIGN KEY (receiver) REFERENCES users(username) ON DELETE CASCADE,
    FOREIGN KEY (sender) REFERENCES users(username) ON DELETE CASCADE,

    CHECK (unread >= 0)
);

CREATE TABLE IF NOT EXISTS app_settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
);
"#;

/// Per-connection setup run by the pool for every new connection.
pub(crate) fn configure_connection(
    connection: &mut Connection,
    busy_timeout: std::time::Duration,
) -> Result<(), rusqlite::Error> {
    connection.busy_timeout(busy_timeout)?;
    // journal_mode answers with a row, so it cannot go through execute_batch
    let _mode: String = connection.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    connection.execute_batch("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

pub(crate) fn db_migration(connection: &mut Connection) -> Result<(), StoreError> {
    let transaction = connection.transaction()?;

    transaction.execute_batch(SCHEMA)?;
    transaction.execute(
        "INSERT OR IGNORE INTO app_settings (key, value) VALUES ('schema_version', ?1)",
        [SCHEMA_VERSION],
    )?;

    let version: Option<String> = transaction
        .query_row(
            "SELECT value FROM app_settings WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;

    match version.as_deref() {
        Some(SCHEMA_VERSION) => {
            debug!(version = SCHEMA_VERSION, "schema is current");
        }
        other => {
            return Err(StoreError::Migration(format!(
                "unsupported schema version {:?}, expected {}",
                other, SCHEMA_VERSION
            )));
        }
    }

    transaction.commit()?;
    info!("record store schema ready");
    Ok(())
}
