use std::sync::Arc;

use crate::libs::core::models::{ConversationEntry, FriendSummary, Username};
use crate::libs::gateway::errors::GatewayError;
use crate::libs::gateway::wire::{self, GatewayRequest, GatewayResponse, RequestEnvelope};
use crate::libs::gateway::{IdentityProvider, SyncGateway};
use crate::libs::storage::storage_traits::Storage;

/// The signed-in user on this client. Passed explicitly to whatever needs to
/// know who "me" is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub user: Username,
    pub credential: String,
}

impl Session {
    pub fn new(user: Username, credential: impl Into<String>) -> Self {
        Self {
            user,
            credential: credential.into(),
        }
    }
}

/// Gateway operations from one session's point of view. Calls block, so the
/// synchronizer always runs them off the async workers.
pub trait ChatApi: Send + Sync + 'static {
    fn send_request(&self, to: &Username) -> Result<(), GatewayError>;
    fn accept(&self, requester: &Username) -> Result<(), GatewayError>;
    fn reject(&self, requester: &Username) -> Result<(), GatewayError>;
    fn list_friends(&self) -> Result<Vec<FriendSummary>, GatewayError>;
    fn list_requests(&self) -> Result<Vec<Username>, GatewayError>;
    fn send_message(&self, receiver: &Username, text: &str) -> Result<(), GatewayError>;
    fn get_conversation(&self, peer: &Username) -> Result<Vec<ConversationEntry>, GatewayError>;
    fn check_notification(&self, peer: &Username) -> Result<u32, GatewayError>;
}

/// Calls the gateway directly, already knowing the caller.
pub struct InProcessApi<S: Storage> {
    gateway: Arc<SyncGateway<S>>,
    caller: Username,
}

impl<S: Storage> InProcessApi<S> {
    pub fn new(gateway: Arc<SyncGateway<S>>, caller: Username) -> Self {
        Self { gateway, caller }
    }
}

impl<S: Storage + 'static> ChatApi for InProcessApi<S> {
    fn send_request(&self, to: &Username) -> Result<(), GatewayError> {
        self.gateway.send_request(&self.caller, to)
    }

    fn accept(&self, requester: &Username) -> Result<(), GatewayError> {
        self.gateway.accept(&self.caller, requester)
    }

    fn reject(&self, requester: &Username) -> Result<(), GatewayError> {
        self.gateway.reject(&self.caller, requester)
    }

    fn list_friends(&self) -> Result<Vec<FriendSummary>, GatewayError> {
        self.gateway.list_friends(&self.caller)
    }

    fn list_requests(&self) -> Result<Vec<Username>, GatewayError> {
        self.gateway.list_requests(&self.caller)
    }

    fn send_message(&self, receiver: &Username, text: &str) -> Result<(), GatewayError> {
        self.gateway.send_message(&self.caller, receiver, text)
    }

    fn get_conversation(&self, peer: &Username) -> Result<Vec<ConversationEntry>, GatewayError> {
        self.gateway.get_conversation(&self.caller, peer)
    }

    fn check_notification(&self, peer: &Username) -> Result<u32, GatewayError> {
        self.gateway.check_notification(&self.caller, peer)
    }
}

/// Moves one encoded request frame to a gateway and returns the encoded
/// response frame.
pub trait Transport: Send + Sync + 'static {
    fn round_trip(&self, frame: Vec<u8>) -> Result<Vec<u8>, GatewayError>;
}

/// Transport that hands frames straight to an in-process gateway.
pub struct LoopbackTransport<S: Storage> {
    gateway: Arc<SyncGateway<S>>,
    identity: Arc<dyn IdentityProvider>,
}

impl<S: Storage> LoopbackTransport<S> {
    pub fn new(gateway: Arc<SyncGateway<S>>, identity: Arc<dyn IdentityProvider>) -> Self {
        Self { gateway, identity }
    }
}

impl<S: Storage + 'static> Transport for LoopbackTransport<S> {
    fn round_trip(&self, frame: Vec<u8>) -> Result<Vec<u8>, GatewayError> {
        Ok(self.gateway.handle_frame(self.identity.as_ref(), &frame))
    }
}

/// [`ChatApi`] speaking the encoded request/response protocol over a
/// [`Transport`].
pub struct WireApi<T: Transport> {
    transport: T,
    credential: String,
}

impl<T: Transport> WireApi<T> {
    pub fn new(transport: T, session: &Session) -> Self {
        Self {
            transport,
            credential: session.credential.clone(),
        }
    }

    fn call(&self, request: GatewayRequest) -> Result<GatewayResponse, GatewayError> {
        let envelope = RequestEnvelope {
            credential: self.credential.clone(),
            request,
        };
        let reply = self.transport.round_trip(wire::encode(&envelope)?)?;
        match wire::decode::<GatewayResponse>(&reply)? {
            GatewayResponse::Error(body) => Err(body.into()),
            response => Ok(response),
        }
    }

    fn expect_ack(&self, request: GatewayRequest) -> Result<(), GatewayError> {
        match self.call(request)? {
            GatewayResponse::Ack => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &GatewayResponse) -> GatewayError {
    GatewayError::codec(format!("unexpected response: {:?}", response))
}

impl<T: Transport> ChatApi for WireApi<T> {
    fn send_request(&self, to: &Username) -> Result<(), GatewayError> {
        self.expect_ack(GatewayRequest::SendRequest { to: to.clone() })
    }

    fn accept(&self, requester: &Username) -> Result<(), GatewayError> {
        self.expect_ack(GatewayRequest::Accept {
            requester: requester.clone(),
        })
    }

    fn reject(&self, requester: &Username) -> Result<(), GatewayError> {
        self.expect_ack(GatewayRequest::Reject {
            requester: requester.clone(),
        })
    }

    fn list_friends(&self) -> Result<Vec<FriendSummary>, GatewayError> {
        match self.call(GatewayRequest::ListFriends)? {
            GatewayResponse::Friends(friends) => Ok(friends),
            other => Err(unexpected(&other)),
        }
    }

    fn list_requests(&self) -> Result<Vec<Username>, GatewayError> {
        match self.call(GatewayRequest::ListRequests)? {
            GatewayResponse::Users(users) => Ok(users),
            other => Err(unexpected(&other)),
        }
    }

    fn send_message(&self, receiver: &Username, text: &str) -> Result<(), GatewayError> {
        self.expect_ack(GatewayRequest::SendMessage {
            receiver: receiver.clone(),
            text: text.to_string(),
        })
    }

    fn get_conversation(&self, peer: &Username) -> Result<Vec<ConversationEntry>, GatewayError> {
        match self.call(GatewayRequest::GetConversation { peer: peer.clone() })? {
            GatewayResponse::Conversation(entries) => Ok(entries),
            other => Err(unexpected(&other)),
        }
    }

    fn check_notification(&self, peer: &Username) -> Result<u32, GatewayError> {
        match self.call(GatewayRequest::CheckNotification { peer: peer.clone() })? {
            GatewayResponse::Count(count) => Ok(count),
            other => Err(unexpected(&other)),
        }
    }
}
