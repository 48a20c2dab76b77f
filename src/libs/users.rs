use std::sync::Arc;

use thiserror::Error;
use tracing::info;

use crate::libs::core::models::Username;
use crate::libs::storage::records::UserRecord;
use crate::libs::storage::storage_traits::{Storage, StoreError, TransactionMode};

pub const SEARCH_LIMIT: usize = 20;

#[derive(Error, Debug)]
pub enum UserError {
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("user not found: {0}")]
    NotFound(Username),
    #[error("user already exists: {0}")]
    AlreadyExists(Username),
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// Registration, lookup and avatar storage for user records.
pub struct UserDirectory<S: Storage> {
    store: Arc<S>,
}

impl<S: Storage> Clone for UserDirectory<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: Storage> UserDirectory<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn register(&self, username: &Username, credential_hash: Vec<u8>) -> Result<(), UserError> {
        if username.is_blank() {
            return Err(UserError::Validation("username must not be blank".to_string()));
        }
        let record = UserRecord::new(username.clone(), credential_hash);

        self.store.transaction(TransactionMode::Write, |store| {
            match store.create_user(&record) {
                Err(StoreError::UserAlreadyExists(_)) => {
                    Err(UserError::AlreadyExists(username.clone()))
                }
                other => other.map_err(UserError::from),
            }
        })?;

        info!(%username, "user registered");
        Ok(())
    }

    pub fn exists(&self, username: &Username) -> Result<bool, UserError> {
        self.store
            .transaction(TransactionMode::Read, |store| Ok(store.user_exists(username)?))
    }

    /// Usernames containing `term`, in name order, at most [`SEARCH_LIMIT`].
    pub fn search_users(&self, term: &str) -> Result<Vec<Username>, UserError> {
        let term = term.trim();
        if term.is_empty() {
            return Err(UserError::Validation("search term must not be blank".to_string()));
        }
        self.store.transaction(TransactionMode::Read, |store| {
            Ok(store.search_users(term, SEARCH_LIMIT)?)
        })
    }

    /// Avatar bytes, empty when the user never uploaded one.
    pub fn avatar(&self, username: &Username) -> Result<Vec<u8>, UserError> {
        self.store.transaction(TransactionMode::Read, |store| {
            let user = store
                .load_user(username)?
                .ok_or_else(|| UserError::NotFound(username.clone()))?;
            Ok(user.avatar.unwrap_or_default())
        })
    }

    pub fn set_avatar(&self, username: &Username, avatar: &[u8]) -> Result<(), UserError> {
        if avatar.is_empty() {
            return Err(UserError::Validation("avatar payload is empty".to_string()));
        }
        let updated = self.store.transaction(TransactionMode::Write, |store| {
            Ok::<_, UserError>(store.update_avatar(username, avatar)?)
        })?;
        if !updated {
            return Err(UserError::NotFound(username.clone()));
        }
        info!(%username, bytes = avatar.len(), "avatar updated");
        Ok(())
    }

    pub fn update_credential(
        &self,
        username: &Username,
        credential_hash: &[u8],
    ) -> Result<(), UserError> {
        if credential_hash.is_empty() {
            return Err(UserError::Validation("credential hash is empty".to_string()));
        }
        let updated = self.store.transaction(TransactionMode::Write, |store| {
            Ok::<_, UserError>(store.update_credential(username, credential_hash)?)
        })?;
        if !updated {
            return Err(UserError::NotFound(username.clone()));
        }
        Ok(())
    }
}
