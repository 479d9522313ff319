//! Error types shared across the protocol layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors that can arise while encoding, decoding or validating wire structures.
///
/// This does not cover storage or liveness failures (see `aeron-driver`'s
/// `AeronError`, which wraps this type alongside the conductor's own
/// taxonomy) - it only covers malformed or out-of-range protocol data.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("invalid configuration: {message}")]
    InvalidConfig { message: String },

    #[error("invalid frame: {reason}")]
    InvalidFrame { reason: String },

    #[error("invalid command: {reason}")]
    InvalidCommand { reason: String },

    #[error("position out of range: {message}")]
    InvalidPosition { message: String },
}

impl ProtocolError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::InvalidConfig { message: message.into() }
    }

    pub fn invalid_frame(reason: impl Into<String>) -> Self {
        Self::InvalidFrame { reason: reason.into() }
    }

    pub fn invalid_command(reason: impl Into<String>) -> Self {
        Self::InvalidCommand { reason: reason.into() }
    }

    pub fn invalid_position(message: impl Into<String>) -> Self {
        Self::InvalidPosition { message: message.into() }
    }
}
