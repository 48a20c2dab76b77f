#![allow(dead_code)]

use std::sync::Arc;

use polling_chat_lib::libs::core::config::StoreConfig;
use polling_chat_lib::libs::core::models::Username;
use polling_chat_lib::libs::gateway::SyncGateway;
use polling_chat_lib::libs::storage::database::storage_sqllite::SqliteStore;
use polling_chat_lib::libs::storage::storage_traits::{Storage, TransactionMode};
use polling_chat_lib::libs::storage::records::UserRecord;
use tempfile::TempDir;

/// A store in its own temporary directory. Keep the struct alive for as long
/// as the store is used; dropping it deletes the database.
pub struct TestBackend {
    pub dir: TempDir,
    pub store: Arc<SqliteStore>,
}

impl TestBackend {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let config = StoreConfig::new(dir.path().join("chat_test.db"));
        let store = Arc::new(SqliteStore::open(&config).expect("Failed to open store"));
        Self { dir, store }
    }

    pub fn with_users(names: &[&str]) -> Self {
        let backend = Self::new();
        for name in names {
            backend.add_user(name);
        }
        backend
    }

    pub fn add_user(&self, name: &str) -> Username {
        let username = Username::from(name);
        let record = UserRecord::new(username.clone(), format!("hash-{}", name).into_bytes());
        self.store
            .transaction(TransactionMode::Write, |store| store.create_user(&record))
            .expect("Failed to create user");
        username
    }

    pub fn gateway(&self) -> Arc<SyncGateway<SqliteStore>> {
        Arc::new(SyncGateway::new(Arc::clone(&self.store)))
    }
}

pub fn user(name: &str) -> Username {
    Username::from(name)
}
