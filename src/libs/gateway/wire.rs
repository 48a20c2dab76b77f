use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::libs::core::models::{ConversationEntry, FriendSummary, Username};
use crate::libs::gateway::errors::{ErrorBody, GatewayError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GatewayRequest {
    Register {
        username: Username,
        credential_hash: Vec<u8>,
    },
    SendRequest {
        to: Username,
    },
    Accept {
        requester: Username,
    },
    Reject {
        requester: Username,
    },
    ListFriends,
    ListRequests,
    SendMessage {
        receiver: Username,
        text: String,
    },
    GetConversation {
        peer: Username,
    },
    CheckNotification {
        peer: Username,
    },
    SearchUsers {
        term: String,
    },
    GetAvatar {
        user: Username,
    },
    SetAvatar {
        avatar: Vec<u8>,
    },
}

/// A request plus the opaque credential the identity provider resolves to
/// the calling user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestEnvelope {
    pub credential: String,
    pub request: GatewayRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum GatewayResponse {
    Ack,
    Friends(Vec<FriendSummary>),
    Users(Vec<Username>),
    Conversation(Vec<ConversationEntry>),
    Count(u32),
    Avatar(Vec<u8>),
    Error(ErrorBody),
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, GatewayError> {
    bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| GatewayError::codec(e.to_string()))
}

pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Result<T, GatewayError> {
    let (value, _read) = bincode::serde::decode_from_slice(frame, bincode::config::standard())
        .map_err(|e| GatewayError::codec(e.to_string()))?;
    Ok(value)
}
