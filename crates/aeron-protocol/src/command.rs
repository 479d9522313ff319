//! Command-and-control protocol exchanged between client and driver over the
//! conductor's ring buffers (see `aeron-driver::command_ring`).
//!
//! Every record starts with a small fixed header - `(length, type_id)` - the
//! same two-field packing the underlying ring buffer itself uses for its own
//! framing (`aeron-log-buffer` reuses the identical trick for claim/commit).
//! The payload that follows is one of the client->driver command types or
//! one of the driver->client response types below.

use crate::error::{ ProtocolError, Result };

/// Message type discriminants. Client -> driver commands use the low range,
/// driver -> client responses use the high range, matching the convention
/// real Aeron control protocols use to keep the two directions visually
/// distinct in a shared ring.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    AddIpcPublication = 1,
    RemovePublication = 2,
    AddIpcSubscription = 3,
    RemoveSubscription = 4,
    ClientKeepalive = 5,
    ClientClose = 6,

    PublicationReady = 101,
    SubscriptionReady = 102,
    AvailableImage = 103,
    UnavailableImage = 104,
    OperationSucceeded = 105,
    ErrorResponse = 106,
}

impl MessageType {
    pub fn from_i32(v: i32) -> Result<Self> {
        Ok(match v {
            1 => Self::AddIpcPublication,
            2 => Self::RemovePublication,
            3 => Self::AddIpcSubscription,
            4 => Self::RemoveSubscription,
            5 => Self::ClientKeepalive,
            6 => Self::ClientClose,
            101 => Self::PublicationReady,
            102 => Self::SubscriptionReady,
            103 => Self::AvailableImage,
            104 => Self::UnavailableImage,
            105 => Self::OperationSucceeded,
            106 => Self::ErrorResponse,
            other => {
                return Err(ProtocolError::invalid_command(format!("unknown message type {other}")));
            }
        })
    }
}

/// Correlation id assigned by the client (or conductor, for notifications
/// that were not requested) to match a response to its request.
pub type CorrelationId = i64;

#[derive(Debug, Clone)]
pub struct AddPublicationCommand {
    pub correlation_id: CorrelationId,
    pub client_id: i64,
    pub stream_id: i32,
    /// `None` lets the conductor allocate one.
    pub session_id: Option<i32>,
    pub is_exclusive: bool,
}

#[derive(Debug, Clone)]
pub struct RemovePublicationCommand {
    pub correlation_id: CorrelationId,
    pub client_id: i64,
    pub registration_id: i64,
}

#[derive(Debug, Clone)]
pub struct AddSubscriptionCommand {
    pub correlation_id: CorrelationId,
    pub client_id: i64,
    pub stream_id: i32,
    pub is_tether: bool,
}

#[derive(Debug, Clone)]
pub struct RemoveSubscriptionCommand {
    pub correlation_id: CorrelationId,
    pub client_id: i64,
    pub registration_id: i64,
}

#[derive(Debug, Clone)]
pub struct ClientKeepaliveCommand {
    pub client_id: i64,
}

#[derive(Debug, Clone)]
pub struct PublicationReady {
    pub correlation_id: CorrelationId,
    pub registration_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub log_file_name: String,
}

#[derive(Debug, Clone)]
pub struct SubscriptionReady {
    pub correlation_id: CorrelationId,
}

#[derive(Debug, Clone)]
pub struct ImageNotification {
    pub correlation_id: CorrelationId,
    pub subscription_registration_id: i64,
    pub session_id: i32,
    pub stream_id: i32,
    pub log_file_name: String,
}

#[derive(Debug, Clone)]
pub struct OperationSucceeded {
    pub correlation_id: CorrelationId,
}

#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub offending_correlation_id: CorrelationId,
    pub error_code: i32,
    pub message: String,
}

/// Error codes surfaced to clients, distinct from the in-process
/// `ProtocolError`/`AeronError` taxonomy used internally.
pub mod error_code {
    pub const UNKNOWN_PUBLICATION: i32 = 1;
    pub const UNKNOWN_SUBSCRIPTION: i32 = 2;
    pub const SESSION_ID_CLASH: i32 = 3;
    pub const SUBSCRIPTION_CLASHES: i32 = 4;
    pub const STORAGE_SPACE: i32 = 5;
    pub const GENERIC_ERROR: i32 = 6;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips() {
        for v in [1, 2, 3, 4, 5, 6, 101, 102, 103, 104, 105, 106] {
            assert!(MessageType::from_i32(v).is_ok());
        }
        assert!(MessageType::from_i32(999).is_err());
    }
}
