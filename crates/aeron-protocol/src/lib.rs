//! Wire protocol primitives shared by the log buffer, the IPC publication
//! and the driver conductor: frame layout, position algebra, padded
//! counters and the command-and-control message types.

pub mod command;
pub mod counter;
pub mod error;
pub mod frame;
pub mod position;

pub use counter::PaddedCounter;
pub use error::{ ProtocolError, Result };
pub use frame::{ FrameHeader, FrameType, HEADER_LENGTH, FRAME_ALIGNMENT };
