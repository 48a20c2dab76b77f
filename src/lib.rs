pub mod libs;

use std::sync::Arc;

use crate::libs::core::config::StoreConfig;
use crate::libs::gateway::SyncGateway;
use crate::libs::storage::database::storage_sqllite::SqliteStore;
use crate::libs::storage::storage_traits::StoreError;

pub use crate::libs::core::config::{SendFailurePolicy, SyncConfig};
pub use crate::libs::core::models::{ConversationEntry, FriendSummary, FriendshipStatus, Username};
pub use crate::libs::gateway::errors::{ErrorKind, GatewayError};
pub use crate::libs::sync::api::{ChatApi, Session};
pub use crate::libs::sync::events::{FriendListDelta, SyncEvent};
pub use crate::libs::sync::synchronizer::{ClientSynchronizer, SyncError};

/// Opens the SQLite store described by `config` and builds a gateway over it.
pub fn open_gateway(config: &StoreConfig) -> Result<Arc<SyncGateway<SqliteStore>>, StoreError> {
    let store = Arc::new(SqliteStore::open(config)?);
    Ok(Arc::new(SyncGateway::new(store)))
}
