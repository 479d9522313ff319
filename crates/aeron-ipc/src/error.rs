//! Error types for the IPC publication / image layer.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, IpcError>;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error(transparent)]
    LogBuffer(#[from] aeron_log_buffer::LogBufferError),

    #[error("no subscriber with registration id {0}")]
    UnknownSubscriber(i64),

    #[error("publication is no longer active")]
    NotActive,
}
