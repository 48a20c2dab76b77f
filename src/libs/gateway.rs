pub mod errors;
pub mod wire;

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::libs::core::models::{ConversationEntry, FriendSummary, Username};
use crate::libs::friendship::FriendshipEngine;
use crate::libs::gateway::errors::GatewayError;
use crate::libs::gateway::wire::{GatewayRequest, GatewayResponse, RequestEnvelope};
use crate::libs::messaging::MessagingEngine;
use crate::libs::storage::storage_traits::Storage;
use crate::libs::users::UserDirectory;

/// Resolves the opaque credential attached to a request to the calling user.
pub trait IdentityProvider: Send + Sync {
    fn authenticate(&self, credential: &str) -> Option<Username>;
}

/// Token table filled in by whoever issues sessions.
#[derive(Debug, Default)]
pub struct StaticIdentityProvider {
    tokens: RwLock<HashMap<String, Username>>,
}

impl StaticIdentityProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, credential: impl Into<String>, user: Username) {
        self.tokens.write().insert(credential.into(), user);
    }

    pub fn revoke(&self, credential: &str) -> bool {
        self.tokens.write().remove(credential).is_some()
    }
}

impl IdentityProvider for StaticIdentityProvider {
    fn authenticate(&self, credential: &str) -> Option<Username> {
        self.tokens.read().get(credential).cloned()
    }
}

/// Request/response boundary over the engines. Holds no per-caller state, so
/// any call can be repeated: duplicates fail with a conflict instead of
/// writing twice, reads are side-effect free apart from read receipts.
pub struct SyncGateway<S: Storage> {
    friendships: FriendshipEngine<S>,
    messaging: MessagingEngine<S>,
    users: UserDirectory<S>,
}

impl<S: Storage> SyncGateway<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            friendships: FriendshipEngine::new(Arc::clone(&store)),
            messaging: MessagingEngine::new(Arc::clone(&store)),
            users: UserDirectory::new(store),
        }
    }

    pub fn friendships(&self) -> &FriendshipEngine<S> {
        &self.friendships
    }

    pub fn messaging(&self) -> &MessagingEngine<S> {
        &self.messaging
    }

    pub fn users(&self) -> &UserDirectory<S> {
        &self.users
    }

    pub fn register(&self, username: &Username, credential_hash: Vec<u8>) -> Result<(), GatewayError> {
        Ok(self.users.register(username, credential_hash)?)
    }

    pub fn send_request(&self, caller: &Username, to: &Username) -> Result<(), GatewayError> {
        Ok(self.friendships.send_request(caller, to)?)
    }

    pub fn accept(&self, caller: &Username, requester: &Username) -> Result<(), GatewayError> {
        Ok(self.friendships.accept(caller, requester)?)
    }

    pub fn reject(&self, caller: &Username, requester: &Username) -> Result<(), GatewayError> {
        Ok(self.friendships.reject(caller, requester)?)
    }

    /// Friends of `caller` with their latest activity, sorted by name.
    pub fn list_friends(&self, caller: &Username) -> Result<Vec<FriendSummary>, GatewayError> {
        let mut friends = self.friendships.list_friends(caller)?;
        friends.sort();

        let mut summaries = Vec::with_capacity(friends.len());
        for friend in &friends {
            summaries.push(self.messaging.summary(caller, friend)?);
        }
        Ok(summaries)
    }

    pub fn list_requests(&self, caller: &Username) -> Result<Vec<Username>, GatewayError> {
        let mut requests = self.friendships.list_incoming_requests(caller)?;
        requests.sort();
        Ok(requests)
    }

    pub fn send_message(
        &self,
        caller: &Username,
        receiver: &Username,
        text: &str,
    ) -> Result<(), GatewayError> {
        self.messaging.send(caller, receiver, text)?;
        Ok(())
    }

    pub fn get_conversation(
        &self,
        caller: &Username,
        peer: &Username,
    ) -> Result<Vec<ConversationEntry>, GatewayError> {
        Ok(self.messaging.fetch_conversation(caller, peer)?)
    }

    pub fn check_notification(&self, caller: &Username, peer: &Username) -> Result<u32, GatewayError> {
        Ok(self.messaging.unread_count(caller, peer)?)
    }

    pub fn search_users(&self, term: &str) -> Result<Vec<Username>, GatewayError> {
        Ok(self.users.search_users(term)?)
    }

    pub fn avatar(&self, user: &Username) -> Result<Vec<u8>, GatewayError> {
        Ok(self.users.avatar(user)?)
    }

    pub fn set_avatar(&self, caller: &Username, avatar: &[u8]) -> Result<(), GatewayError> {
        Ok(self.users.set_avatar(caller, avatar)?)
    }

    /// Authenticates the envelope and runs its request. Registration is the
    /// only request accepted without a known credential.
    pub fn handle(&self, identity: &dyn IdentityProvider, envelope: RequestEnvelope) -> GatewayResponse {
        let result = match envelope.request {
            GatewayRequest::Register {
                username,
                credential_hash,
            } => self
                .register(&username, credential_hash)
                .map(|()| GatewayResponse::Ack),
            request => match identity.authenticate(&envelope.credential) {
                Some(caller) => self.dispatch(&caller, request),
                None => Err(GatewayError::Unauthorized),
            },
        };

        result.unwrap_or_else(|err| {
            debug!(error = %err, kind = ?err.kind(), "request failed");
            GatewayResponse::Error(err.to_body())
        })
    }

    fn dispatch(&self, caller: &Username, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let response = match request {
            GatewayRequest::Register {
                username,
                credential_hash,
            } => {
                self.register(&username, credential_hash)?;
                GatewayResponse::Ack
            }
            GatewayRequest::SendRequest { to } => {
                self.send_request(caller, &to)?;
                GatewayResponse::Ack
            }
            GatewayRequest::Accept { requester } => {
                self.accept(caller, &requester)?;
                GatewayResponse::Ack
            }
            GatewayRequest::Reject { requester } => {
                self.reject(caller, &requester)?;
                GatewayResponse::Ack
            }
            GatewayRequest::ListFriends => GatewayResponse::Friends(self.list_friends(caller)?),
            GatewayRequest::ListRequests => GatewayResponse::Users(self.list_requests(caller)?),
            GatewayRequest::SendMessage { receiver, text } => {
                self.send_message(caller, &receiver, &text)?;
                GatewayResponse::Ack
            }
            GatewayRequest::GetConversation { peer } => {
                GatewayResponse::Conversation(self.get_conversation(caller, &peer)?)
            }
            GatewayRequest::CheckNotification { peer } => {
                GatewayResponse::Count(self.check_notification(caller, &peer)?)
            }
            GatewayRequest::SearchUsers { term } => GatewayResponse::Users(self.search_users(&term)?),
            GatewayRequest::GetAvatar { user } => GatewayResponse::Avatar(self.avatar(&user)?),
            GatewayRequest::SetAvatar { avatar } => {
                self.set_avatar(caller, &avatar)?;
                GatewayResponse::Ack
            }
        };
        Ok(response)
    }

    /// Byte-level entry point: decodes a [`RequestEnvelope`], handles it and
    /// encodes the response. Undecodable frames get an error response.
    pub fn handle_frame(&self, identity: &dyn IdentityProvider, frame: &[u8]) -> Vec<u8> {
        let response = match wire::decode::<RequestEnvelope>(frame) {
            Ok(envelope) => self.handle(identity, envelope),
            Err(err) => {
                warn!(error = %err, bytes = frame.len(), "dropping undecodable request frame");
                GatewayResponse::Error(err.to_body())
            }
        };

        match wire::encode(&response) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(error = %err, "failed to encode response");
                wire::encode(&GatewayResponse::Error(err.to_body())).unwrap_or_default()
            }
        }
    }
}
