//! The driver conductor: command dispatch, resource registries, session id
//! allocation, system counters and the timer-driven duty cycle that ties
//! the log buffer and IPC layers into a runnable driver process.

pub mod command_ring;
pub mod conductor;
pub mod context;
pub mod counters;
pub mod error;
pub mod session_id;

pub use command_ring::{ CommandRingBuffer, DriverCommand };
pub use conductor::{ DriverConductor, DriverResponse };
pub use context::{ DriverContext, DriverContextBuilder, NanoClock, SystemNanoClock };
pub use counters::{ CountersManager, SystemCounters };
pub use error::{ AeronError, Result };
pub use session_id::SessionIdAllocator;
