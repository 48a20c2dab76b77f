use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::libs::friendship::FriendshipError;
use crate::libs::messaging::MessagingError;
use crate::libs::users::UserError;

/// Coarse classification callers use to decide between retrying and
/// reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    Validation,
    Conflict,
    NotFound,
    Transient,
    Unauthorized,
    Protocol,
}

/// Error as carried inside a response frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: ErrorKind,
    pub message: String,
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error(transparent)]
    Friendship(#[from] FriendshipError),
    #[error(transparent)]
    Messaging(#[from] MessagingError),
    #[error(transparent)]
    Users(#[from] UserError),
    #[error("caller could not be authenticated")]
    Unauthorized,
    #[error("transport error: {0}")]
    Transport(String),
    #[error("codec error: {0}")]
    Codec(String),
    #[error("{message}")]
    Remote { kind: ErrorKind, message: String },
}

impl GatewayError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn codec(message: impl Into<String>) -> Self {
        Self::Codec(message.into())
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Friendship(err) => match err {
                FriendshipError::SelfRequest | FriendshipError::SelfAccept => ErrorKind::Validation,
                FriendshipError::AlreadyFriends(..)
                | FriendshipError::DuplicateRequest(..)
                | FriendshipError::AlreadyProcessed(_) => ErrorKind::Conflict,
                FriendshipError::UnknownUser(_) | FriendshipError::NotFound(..) => {
                    ErrorKind::NotFound
                }
                FriendshipError::Storage(_) => ErrorKind::Transient,
            },
            Self::Messaging(err) => match err {
                MessagingError::EmptyMessage => ErrorKind::Validation,
                MessagingError::UnknownUser(_) => ErrorKind::NotFound,
                MessagingError::Storage(_) => ErrorKind::Transient,
            },
            Self::Users(err) => match err {
                UserError::Validation(_) => ErrorKind::Validation,
                UserError::NotFound(_) => ErrorKind::NotFound,
                UserError::AlreadyExists(_) => ErrorKind::Conflict,
                UserError::Storage(_) => ErrorKind::Transient,
            },
            Self::Unauthorized => ErrorKind::Unauthorized,
            Self::Transport(_) => ErrorKind::Transient,
            Self::Codec(_) => ErrorKind::Protocol,
            Self::Remote { kind, .. } => *kind,
        }
    }

    /// Only transient failures are worth repeating as-is; everything else
    /// will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            kind: self.kind(),
            message: self.to_string(),
        }
    }
}

impl From<ErrorBody> for GatewayError {
    fn from(body: ErrorBody) -> Self {
        Self::Remote {
            kind: body.kind,
            message: body.message,
        }
    }
}
