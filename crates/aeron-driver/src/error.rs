//! The conductor's error umbrella: every lower-layer error plus the
//! resource-management failures that only make sense once there is a
//! registry of clients, publications and subscriptions to check against.

use thiserror::Error;

use aeron_protocol::command::error_code;

pub type Result<T> = std::result::Result<T, AeronError>;

#[derive(Error, Debug)]
pub enum AeronError {
    #[error(transparent)]
    Protocol(#[from] aeron_protocol::ProtocolError),

    #[error(transparent)]
    LogBuffer(#[from] aeron_log_buffer::LogBufferError),

    #[error(transparent)]
    Ipc(#[from] aeron_ipc::IpcError),

    #[error("storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("no publication with registration id {0}")]
    UnknownPublication(i64),

    #[error("no subscription with registration id {0}")]
    UnknownSubscription(i64),

    #[error("session id {session_id} already active on stream {stream_id}")]
    SessionIdClash { session_id: i32, stream_id: i32 },

    #[error("a subscription with incompatible settings already exists on stream {stream_id}")]
    SubscriptionClash { stream_id: i32 },

    #[error("no space left in {0}")]
    InsufficientStorage(String),
}

impl AeronError {
    /// The wire error code a client-facing `ErrorResponse` should carry.
    pub fn to_error_code(&self) -> i32 {
        match self {
            Self::UnknownPublication(_) => error_code::UNKNOWN_PUBLICATION,
            Self::UnknownSubscription(_) => error_code::UNKNOWN_SUBSCRIPTION,
            Self::SessionIdClash { .. } => error_code::SESSION_ID_CLASH,
            Self::SubscriptionClash { .. } => error_code::SUBSCRIPTION_CLASHES,
            Self::Storage(_) | Self::InsufficientStorage(_) => error_code::STORAGE_SPACE,
            Self::Protocol(_) | Self::LogBuffer(_) | Self::Ipc(_) => error_code::GENERIC_ERROR,
        }
    }
}
