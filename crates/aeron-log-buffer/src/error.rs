//! Error types for the log buffer layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LogBufferError>;

#[derive(Error, Debug)]
pub enum LogBufferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] aeron_protocol::ProtocolError),

    #[error("log buffer is back-pressured: position would exceed publisher limit")]
    BackPressured,

    #[error("log buffer is admin-closed")]
    Closed,

    #[error("invalid log buffer file: {reason}")]
    InvalidFile { reason: String },

    #[error("message of {length} bytes exceeds mtu of {mtu}")]
    MessageTooLarge { length: i32, mtu: i32 },
}

impl LogBufferError {
    pub fn invalid_file(reason: impl Into<String>) -> Self {
        Self::InvalidFile { reason: reason.into() }
    }
}
